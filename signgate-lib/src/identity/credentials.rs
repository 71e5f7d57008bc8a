use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::IdentityConfig;

/// Kind of credential material a caller presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    #[default]
    ApiKey,
    Session,
}

/// Raw credential taken from request headers.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    kind: CredentialKind,
    secret: String,
}

impl Credential {
    pub fn api_key(secret: impl Into<String>) -> Self {
        Self { kind: CredentialKind::ApiKey, secret: secret.into() }
    }

    pub fn session(secret: impl Into<String>) -> Self {
        Self { kind: CredentialKind::Session, secret: secret.into() }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Pull credential material out of the request headers.
///
/// Precedence: `Authorization: Bearer`, API-key header, session header,
/// session cookie. A header that is present but blank still counts as a
/// credential, so it is rejected rather than silently treated as anonymous.
pub fn extract_credential(headers: &http::HeaderMap, config: &IdentityConfig) -> Option<Credential> {
    if let Some(value) = header_str(headers, http::header::AUTHORIZATION.as_str()) {
        if let Some((scheme, token)) = value.split_once(' ') {
            if scheme.eq_ignore_ascii_case("bearer") {
                return Some(Credential::api_key(token.trim()));
            }
        }
    }

    if let Some(value) = header_str(headers, &config.api_key_header) {
        return Some(Credential::api_key(value.trim()));
    }

    if let Some(value) = header_str(headers, &config.session_header) {
        return Some(Credential::session(value.trim()));
    }

    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == config.session_cookie)
        .map(|(_, value)| Credential::session(value.trim()))
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn config() -> IdentityConfig {
        IdentityConfig::default()
    }

    #[test]
    fn bearer_token_wins() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk_live_1"));
        headers.insert("x-api-key", HeaderValue::from_static("sk_other"));

        let credential = extract_credential(&headers, &config());
        assert_eq!(credential, Some(Credential::api_key("sk_live_1")));
    }

    #[test]
    fn basic_auth_is_not_a_credential() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert!(extract_credential(&headers, &config()).is_none());
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = http::HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("theme=dark; session=abc123; lang=en"));

        let credential = extract_credential(&headers, &config());
        assert_eq!(credential, Some(Credential::session("abc123")));
    }

    #[test]
    fn blank_api_key_is_still_present() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("   "));

        let credential = extract_credential(&headers, &config());
        assert_eq!(credential.map(|c| c.secret().to_string()), Some(String::new()));
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", Credential::api_key("sk_live_secret"));
        assert!(!rendered.contains("sk_live_secret"));
    }
}
