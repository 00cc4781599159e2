//! HTTP surface of a rate limit decision.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::RateLimitDecision;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_BACKEND: &str = "x-ratelimit-backend";

/// Add the `X-RateLimit-*` headers and `Retry-After` (seconds until the window
/// resets, at least 1) to allowed and blocked responses alike.
pub fn apply_rate_limit_headers(decision: &RateLimitDecision, headers: &mut HeaderMap) {
    let values = [
        (HEADER_LIMIT, HeaderValue::from(decision.limit)),
        (HEADER_REMAINING, HeaderValue::from(decision.remaining)),
        (HEADER_RESET, HeaderValue::from(decision.reset_epoch_seconds())),
        (HEADER_BACKEND, HeaderValue::from_static(decision.backend.as_str())),
    ];
    for (name, value) in values {
        headers.insert(HeaderName::from_static(name), value);
    }
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_seconds));
}

/// `response` with the headers of `decision` added.
#[must_use]
pub fn with_rate_limit_headers(mut response: Response, decision: &RateLimitDecision) -> Response {
    apply_rate_limit_headers(decision, response.headers_mut());
    response
}

/// 429 with the standard failure body.
#[must_use]
pub fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let body = Json(json!({
        "success": false,
        "error": "Too many requests",
        "detail": format!("Retry in {} seconds", decision.retry_after_seconds),
    }));
    with_rate_limit_headers((StatusCode::TOO_MANY_REQUESTS, body).into_response(), decision)
}

/// Client address for IP keyed limits: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then `"unknown"`.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| "unknown".to_string(), str::to_string)
}
