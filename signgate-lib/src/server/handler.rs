use http::Request;
use hyper::body::Incoming;
use hyper::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use super::http_result::HttpError;
use super::responses::{apply_rate_limit_headers, error_response, rate_limited_response, RespBody};
use super::signer::SignerClient;
use crate::gateway::Gateway;
use crate::identity::RequestMetadata;
use crate::limiter::RateLimitError;
use crate::store::OutcomeRecord;
use crate::telemetry::Metrics;

/// Outcome error kind for a signer that answered with a 5xx status
pub const ERROR_KIND_SIGNER_STATUS: &str = "signer_status";

/// Shared by every connection the gateway serves
pub struct ServerState {
    pub gateway: Arc<Gateway>,
    pub signer: SignerClient,
    pub metrics: Option<Arc<Metrics>>,
}

/// Resolve, check, forward, account.
///
/// Denied and unauthenticated requests never reach the signer and are not
/// accounted. Admitted requests are accounted whatever the signer answers.
pub async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    state: &ServerState,
) -> Response<RespBody> {
    let method = req.method().clone();
    let resp = admit_and_forward(req, peer, state).await;

    if let Some(m) = &state.metrics {
        m.record_request(method.as_str(), resp.status().as_u16());
    }
    resp
}

async fn admit_and_forward(
    req: Request<Incoming>,
    peer: SocketAddr,
    state: &ServerState,
) -> Response<RespBody> {
    let gateway = &state.gateway;
    let metadata = RequestMetadata::new(req.headers().clone(), Some(peer.ip()));

    let identity = match gateway.resolve_and_authenticate(&metadata).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(?peer, reason = e.reason(), "request rejected by identity resolution");
            return error_response(&HttpError::from(e));
        }
    };

    let decision = match gateway.check_limit(&identity).await.into_result() {
        Ok(decision) => decision,
        Err(RateLimitError::Exceeded { window, decision, .. }) => {
            debug!(scope = %decision.scope, window = %window, "request denied by rate limit");
            return rate_limited_response(window, &decision);
        }
    };

    let started = Instant::now();
    let result = state.signer.forward(req, &identity).await;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let finished_at = gateway.clock().now();
    let scope = identity.scope();

    let outcome = match &result {
        Ok(resp) if resp.status().is_server_error() => {
            OutcomeRecord::failure(scope, finished_at, latency_ms, ERROR_KIND_SIGNER_STATUS)
        }
        Ok(_) => OutcomeRecord::success(scope, finished_at, latency_ms),
        Err(e) => OutcomeRecord::failure(scope, finished_at, latency_ms, e.error_type()),
    };
    gateway.record_outcome(&identity, outcome);

    let mut resp = result.unwrap_or_else(|e| error_response(&e));
    apply_rate_limit_headers(resp.headers_mut(), &decision);
    resp
}
