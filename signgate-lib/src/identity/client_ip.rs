use std::net::{IpAddr, SocketAddr};

/// Extract the original client address for anonymous callers.
///
/// Looks at the left-most entry of the forwarded-for header (the client as
/// seen by the first proxy), then the peer address of the connection, then
/// the configured fallback.
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `forwarded_header` - Header carrying the proxy chain (e.g. `x-forwarded-for`)
/// * `peer` - Address of the directly connected socket, if known
/// * `fallback` - Address to use when nothing else is available
///
/// # Returns
/// `None` only when no source yields a parseable address
pub fn extract_client_ip(
    headers: &http::HeaderMap,
    forwarded_header: &str,
    peer: Option<IpAddr>,
    fallback: Option<IpAddr>,
) -> Option<IpAddr> {
    if let Some(value) = headers.get(forwarded_header) {
        if let Ok(chain) = value.to_str() {
            if let Some(first) = chain.split(',').next() {
                if let Some(ip) = parse_hop(first.trim()) {
                    return Some(ip);
                }
            }
        }
    }
    peer.or(fallback)
}

/// A hop may carry a port (`203.0.113.5:4711`, `[2001:db8::1]:443`)
fn parse_hop(hop: &str) -> Option<IpAddr> {
    if hop.is_empty() {
        return None;
    }
    hop.parse::<IpAddr>()
        .ok()
        .or_else(|| hop.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers_with(name: &'static str, value: &'static str) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn picks_left_most_hop() {
        let headers = headers_with("x-forwarded-for", "203.0.113.5, 10.0.0.1, 10.0.0.2");
        let ip = extract_client_ip(&headers, "x-forwarded-for", None, None);
        assert_eq!(ip, Some(IpAddr::from([203, 0, 113, 5])));
    }

    #[test]
    fn accepts_hop_with_port() {
        let headers = headers_with("x-forwarded-for", "[2001:db8::1]:443, 10.0.0.1");
        let ip = extract_client_ip(&headers, "x-forwarded-for", None, None);
        assert_eq!(ip, "2001:db8::1".parse::<IpAddr>().ok());
    }

    #[test]
    fn garbage_header_falls_back_to_peer() {
        let headers = headers_with("x-forwarded-for", "unknown, 10.0.0.1");
        let peer = IpAddr::from([192, 0, 2, 10]);
        let ip = extract_client_ip(&headers, "x-forwarded-for", Some(peer), None);
        assert_eq!(ip, Some(peer));
    }

    #[test]
    fn uses_fallback_without_peer() {
        let fallback = IpAddr::from([127, 0, 0, 1]);
        let ip = extract_client_ip(&http::HeaderMap::new(), "x-forwarded-for", None, Some(fallback));
        assert_eq!(ip, Some(fallback));
    }

    #[test]
    fn nothing_available() {
        assert!(extract_client_ip(&http::HeaderMap::new(), "x-forwarded-for", None, None).is_none());
    }
}
