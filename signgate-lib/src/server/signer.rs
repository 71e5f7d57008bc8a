use http::header::{HeaderName, HeaderValue};
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::http_result::{HttpError, HttpResult};
use super::responses::RespBody;
use crate::config::{KeepAliveConfig, SignerConfig, TimeoutConfig};
use crate::identity::Identity;
use crate::telemetry::Metrics;

pub type HttpClient = Client<HttpConnector, Incoming>;

const X_SIGNGATE_SCOPE: HeaderName = HeaderName::from_static("x-signgate-scope");
const X_SIGNGATE_TIER: HeaderName = HeaderName::from_static("x-signgate-tier");

/// Pooled HTTP/1.1 client bound to the signing backend
///
/// Connections are reused across requests; one client is shared by every
/// connection the gateway serves.
#[derive(Clone)]
pub struct SignerClient {
    client: Arc<HttpClient>,
    address: String,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl SignerClient {
    pub fn new(signer: &SignerConfig, timeouts: &TimeoutConfig, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            client: Arc::new(create_client(signer, timeouts)),
            address: signer.address.clone(),
            timeout: Duration::from_millis(signer.timeout_ms),
            metrics,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send an admitted request to the signer and stream its answer back.
    ///
    /// The caller's scope and effective tier travel as `x-signgate-*`
    /// headers; any such headers sent by the caller are replaced.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        identity: &Identity,
    ) -> HttpResult<Response<RespBody>> {
        let start = Instant::now();

        let pq = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = format!("http://{}{}", self.address, pq)
            .parse::<http::Uri>()
            .map_err(|e| HttpError::InvalidUri(e.to_string()))?;

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        parts.version = http::Version::HTTP_11;
        parts.headers.insert(X_SIGNGATE_SCOPE, header_value(identity.scope().as_str()));
        parts
            .headers
            .insert(X_SIGNGATE_TIER, HeaderValue::from_static(identity.effective_tier().as_str()));

        let out_req = Request::from_parts(parts, body);
        let result = tokio::time::timeout(self.timeout, self.client.request(out_req)).await;
        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(Ok(resp)) => {
                let status = resp.status().as_u16();
                debug!(status, duration_ms = duration * 1000.0, "signer answered");
                if let Some(m) = &self.metrics {
                    m.record_signer_duration(duration, status);
                }
                Ok(resp.map(|b| b.boxed()))
            }
            Ok(Err(e)) => {
                let error = HttpError::SignerUnreachable(e.to_string());
                warn!(signer = %self.address, error = %e, "signer request failed");
                self.record_error(&error);
                Err(error)
            }
            Err(_) => {
                let error = HttpError::SignerTimeout;
                warn!(signer = %self.address, timeout_ms = self.timeout.as_millis() as u64, "signer request timed out");
                self.record_error(&error);
                Err(error)
            }
        }
    }

    fn record_error(&self, error: &HttpError) {
        if let Some(m) = &self.metrics {
            m.record_signer_error(error.error_type());
        }
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

fn create_client(signer: &SignerConfig, timeouts: &TimeoutConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(Duration::from_millis(timeouts.connect_ms)));
    set_keepalive(&mut connector, &timeouts.keep_alive);

    let mut builder = Client::builder(TokioExecutor::new());
    builder.pool_idle_timeout(Duration::from_millis(timeouts.idle_ms));
    if signer.pool_max_idle_per_host > 0 {
        builder.pool_max_idle_per_host(signer.pool_max_idle_per_host);
    }

    builder.build(connector)
}

fn set_keepalive(connector: &mut HttpConnector, keep_alive: &KeepAliveConfig) {
    // TCP keep-alive: sends periodic packets to keep idle pooled connections alive
    if keep_alive.enabled {
        connector.set_keepalive(Some(Duration::from_secs(keep_alive.timeout_secs)));
    } else {
        connector.set_keepalive(None);
    }
}
