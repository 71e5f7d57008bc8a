use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use hyper::StatusCode;
use serde_json::json;

use crate::clock::Clock;
use crate::error::{GatewayError, Result};
use crate::identity::Scope;
use crate::store::{CounterKey, QuotaStore};
use crate::window::Window;

type RespBody = BoxBody<Bytes, hyper::Error>;

fn json_response(status: StatusCode, value: &serde_json::Value) -> Result<Response<RespBody>> {
    let body_bytes = serde_json::to_vec(value)
        .map_err(|e| GatewayError::Http(format!("Failed to serialize health response: {e}")))?;

    let body = Full::new(Bytes::from(body_bytes))
        .map_err(|never| match never {})
        .boxed();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .map_err(|e| GatewayError::Http(format!("Failed to build health response: {e}")))
}

/// Health check response - always returns 200 if process is running
pub fn health_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, &json!({"status": "healthy"}))
}

/// Readiness check - verifies that the quota store answers
/// Returns 200 when a probe read succeeds, 503 otherwise
pub async fn ready_check_response(
    store: &dyn QuotaStore,
    clock: &dyn Clock,
) -> Result<Response<RespBody>> {
    let probe = CounterKey::at(&Scope::new("probe:ready"), Window::Daily, clock.now(), 60);
    match store.read(&probe).await {
        Ok(_) => json_response(StatusCode::OK, &json!({"status": "ready"})),
        Err(e) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({"status": "not_ready", "reason": "store_unavailable", "detail": e.to_string()}),
        ),
    }
}

/// Liveness check - always returns 200 if process is running
pub fn live_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, &json!({"status": "alive"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn ready_when_store_answers() -> Result<()> {
        let store = MemoryStore::new(8);
        let resp = ready_check_response(&store, &SystemClock).await?;
        assert_eq!(resp.status(), StatusCode::OK);
        Ok(())
    }

    #[test]
    fn live_is_always_ok() -> Result<()> {
        assert_eq!(live_check_response()?.status(), StatusCode::OK);
        Ok(())
    }
}
