//! Authenticated principal extraction and authorization helpers.
//!
//! Flow Overview: read the bearer header or session cookie, verify the signed
//! token, and hand the payload to the handler. Every failure is the same 401 so
//! callers cannot tell a forged token from an expired one.

use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use tracing::debug;

use super::super::error_response;
use super::state::AuthState;
use crate::rate_limit::{
    client_ip, rate_limited_response, with_rate_limit_headers, RateLimitDecision, RateLimitPolicy,
};
use crate::session::{extract_session_token, Role, SessionPayload};

/// Resolve the session token into its payload, or a 401 response.
pub fn require_auth(headers: &HeaderMap, state: &AuthState) -> Result<SessionPayload, Response> {
    let Some(token) = extract_session_token(headers) else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "Not authenticated"));
    };
    state.sessions().verify(&token).map_err(|err| {
        debug!("session rejected: {err}");
        error_response(StatusCode::UNAUTHORIZED, "Not authenticated")
    })
}

/// Authenticate and charge the API budget.
///
/// A valid session is limited per subject. Without one there is no subject, so
/// the caller IP is charged against the same bucket and the 401 carries its
/// window.
pub async fn authorize_api(
    headers: &HeaderMap,
    state: &AuthState,
) -> Result<(SessionPayload, RateLimitDecision), Response> {
    let payload = match require_auth(headers, state) {
        Ok(payload) => payload,
        Err(response) => {
            let decision = state
                .limiter()
                .check_ip(RateLimitPolicy::API_BY_SUBJECT, &client_ip(headers))
                .await;
            if decision.blocked {
                return Err(rate_limited_response(&decision));
            }
            return Err(with_rate_limit_headers(response, &decision));
        }
    };

    let decision = state
        .limiter()
        .check_subject(RateLimitPolicy::API_BY_SUBJECT, &payload.subject_id)
        .await;
    if decision.blocked {
        return Err(rate_limited_response(&decision));
    }
    Ok((payload, decision))
}

/// 403 unless the principal holds one of `allowed`.
pub fn require_role(payload: &SessionPayload, allowed: &[Role]) -> Result<(), Response> {
    if allowed.contains(&payload.role) {
        Ok(())
    } else {
        Err(error_response(StatusCode::FORBIDDEN, "Forbidden"))
    }
}
