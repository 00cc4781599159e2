//! One-time passcode endpoints.
//!
//! Flow Overview:
//! 1) Rate limit by caller IP, then by normalized email.
//! 2) `request` always answers 202 for a well-formed email so the endpoint
//!    cannot be used to discover accounts.
//! 3) `verify` redeems the code, signs a session and sets the cookie.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, instrument, warn};

use super::super::error_response;
use super::{
    state::AuthState,
    types::{AcceptedResponse, ErrorResponse, OtpRequest, OtpVerifyRequest, OtpVerifyResponse, SessionUser},
};
use crate::otp::{normalize_email, valid_email, OtpError};
use crate::rate_limit::{
    client_ip, rate_limited_response, with_rate_limit_headers, RateLimitDecision, RateLimitPolicy,
};
use crate::session::session_cookie;

/// The decision closest to blocking; its headers are the ones worth showing.
fn tighter(first: RateLimitDecision, second: RateLimitDecision) -> RateLimitDecision {
    if second.remaining < first.remaining {
        second
    } else {
        first
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp/request",
    request_body = OtpRequest,
    responses(
        (status = 202, description = "Code sent if the account exists", body = AcceptedResponse),
        (status = 400, description = "Missing or invalid email", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 503, description = "One-time passcodes are not configured", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn otp_request(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpRequest>>,
) -> Response {
    let ip = client_ip(&headers);
    let ip_decision = auth_state
        .limiter()
        .check_ip(RateLimitPolicy::OTP_REQUEST_BY_IP, &ip)
        .await;
    if ip_decision.blocked {
        return rate_limited_response(&ip_decision);
    }

    let Some(Json(request)) = payload else {
        return with_rate_limit_headers(
            error_response(StatusCode::BAD_REQUEST, "Missing payload"),
            &ip_decision,
        );
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return with_rate_limit_headers(
            error_response(StatusCode::BAD_REQUEST, "Invalid email"),
            &ip_decision,
        );
    }

    let email_decision = auth_state
        .limiter()
        .check_subject(RateLimitPolicy::OTP_REQUEST_BY_EMAIL, &email)
        .await;
    if email_decision.blocked {
        return rate_limited_response(&email_decision);
    }
    let decision = tighter(ip_decision, email_decision);

    match auth_state.otp().issue(&email, Some(&ip)).await {
        Ok(_) => {}
        Err(OtpError::InvalidEmail) => {
            return with_rate_limit_headers(
                error_response(StatusCode::BAD_REQUEST, "Invalid email"),
                &decision,
            );
        }
        Err(OtpError::Config) => {
            return with_rate_limit_headers(
                error_response(StatusCode::SERVICE_UNAVAILABLE, "One-time passcodes are not configured"),
                &decision,
            );
        }
        Err(err) => {
            // Still 202: a failure here only happens for known accounts.
            error!("Failed to issue one-time passcode: {err}");
        }
    }

    let body = AcceptedResponse {
        success: true,
        message: "If the account exists, a code has been sent".to_string(),
    };
    with_rate_limit_headers((StatusCode::ACCEPTED, Json(body)).into_response(), &decision)
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Code accepted, session cookie set", body = OtpVerifyResponse),
        (status = 400, description = "Missing payload", body = ErrorResponse),
        (status = 401, description = "Invalid or expired code", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 500, description = "Verification failed", body = ErrorResponse),
        (status = 503, description = "Sessions or one-time passcodes are not configured", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn otp_verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpVerifyRequest>>,
) -> Response {
    let ip = client_ip(&headers);
    let ip_decision = auth_state
        .limiter()
        .check_ip(RateLimitPolicy::OTP_VERIFY_BY_IP, &ip)
        .await;
    if ip_decision.blocked {
        return rate_limited_response(&ip_decision);
    }

    let Some(Json(request)) = payload else {
        return with_rate_limit_headers(
            error_response(StatusCode::BAD_REQUEST, "Missing payload"),
            &ip_decision,
        );
    };
    let email = normalize_email(&request.email);
    let email_decision = auth_state
        .limiter()
        .check_subject(RateLimitPolicy::OTP_VERIFY_BY_EMAIL, &email)
        .await;
    if email_decision.blocked {
        return rate_limited_response(&email_decision);
    }
    let decision = tighter(ip_decision, email_decision);

    // Refuse before consuming a code we could not turn into a session.
    if !auth_state.sessions().is_configured() {
        error!("Session signing secret is not configured");
        return with_rate_limit_headers(
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Sessions are not configured"),
            &decision,
        );
    }

    let claim = match auth_state.otp().verify(&email, &request.code, Some(&ip)).await {
        Ok(claim) => claim,
        Err(OtpError::InvalidOrExpired | OtpError::InvalidEmail) => {
            return with_rate_limit_headers(
                error_response(StatusCode::UNAUTHORIZED, "Invalid or expired code"),
                &decision,
            );
        }
        Err(OtpError::Config) => {
            return with_rate_limit_headers(
                error_response(StatusCode::SERVICE_UNAVAILABLE, "One-time passcodes are not configured"),
                &decision,
            );
        }
        Err(err) => {
            error!("Failed to verify one-time passcode: {err}");
            return with_rate_limit_headers(
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed"),
                &decision,
            );
        }
    };

    let ttl_seconds = auth_state.config().session_ttl_seconds();
    let token = match auth_state.sessions().sign(&claim.session_claims(), ttl_seconds) {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to sign session: {err}");
            return with_rate_limit_headers(
                error_response(StatusCode::SERVICE_UNAVAILABLE, "Sessions are not configured"),
                &decision,
            );
        }
    };
    let cookie = match session_cookie(&token, ttl_seconds, auth_state.config().session_cookie_secure()) {
        Ok(cookie) => cookie,
        Err(err) => {
            warn!("Failed to build session cookie: {err}");
            return with_rate_limit_headers(
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed"),
                &decision,
            );
        }
    };

    let body = OtpVerifyResponse {
        success: true,
        user: SessionUser {
            id: claim.user_id.to_string(),
            email: claim.email,
            role: claim.role.to_string(),
            tenant_id: claim.tenant_id,
        },
    };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.headers_mut().insert(SET_COOKIE, cookie);
    with_rate_limit_headers(response, &decision)
}
