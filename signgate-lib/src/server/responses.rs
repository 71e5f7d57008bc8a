use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use serde_json::json;

use super::http_result::HttpError;
use crate::limiter::{Decision, Limit, Remaining};
use crate::window::Window;

pub(crate) type RespBody = BoxBody<Bytes, hyper::Error>;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");
const X_RATELIMIT_DEGRADED: HeaderName = HeaderName::from_static("x-ratelimit-degraded");

fn full(bytes: impl Into<Bytes>) -> RespBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<RespBody> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut resp = Response::new(full(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn secs_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (reset_at - now).num_seconds().max(0)
}

fn numeric(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Build HTTP response with status code of 4xx and 5xx and a JSON error body
pub(crate) fn error_response(error: &HttpError) -> Response<RespBody> {
    json_response(StatusCode::from(error), &json!({ "error": error.public_message() }))
}

/// 429 naming the exhausted window and when it resets
pub(crate) fn rate_limited_response(window: Window, decision: &Decision) -> Response<RespBody> {
    let reset_at = decision.reset_at(window);
    let retry_after = secs_until(reset_at, decision.evaluated_at);

    let mut resp = json_response(
        StatusCode::TOO_MANY_REQUESTS,
        &json!({
            "error": HttpError::LimitExceeded(window).public_message(),
            "window": window,
            "reset_at": reset_at.to_rfc3339(),
            "retry_after_secs": retry_after,
            "remaining": {
                "daily": decision.remaining(Window::Daily),
                "hourly": decision.remaining(Window::Hourly),
                "burst": decision.remaining(Window::Burst),
            },
        }),
    );
    resp.headers_mut().insert(RETRY_AFTER, numeric(retry_after));
    apply_rate_limit_headers(resp.headers_mut(), decision);
    resp
}

/// Describe the tightest finite window of `decision` on a response
pub(crate) fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    if let Some(status) = decision.tightest() {
        if let Limit::Finite(limit) = status.limit {
            headers.insert(X_RATELIMIT_LIMIT, numeric(limit));
        }
        if let Remaining::Count(remaining) = status.remaining {
            headers.insert(X_RATELIMIT_REMAINING, numeric(remaining));
        }
        headers.insert(X_RATELIMIT_RESET, numeric(secs_until(status.reset_at, decision.evaluated_at)));
        headers.insert(X_RATELIMIT_WINDOW, HeaderValue::from_static(status.window.as_str()));
    }
    if decision.degraded {
        headers.insert(X_RATELIMIT_DEGRADED, HeaderValue::from_static("true"));
    }
}
