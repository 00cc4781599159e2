//! Session endpoints for cookie and bearer auth.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, instrument};

use super::{
    principal::authorize_api,
    state::AuthState,
    types::{ErrorResponse, SessionResponse},
};
use crate::rate_limit::with_rate_limit_headers;
use crate::session::clear_session_cookie;

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn session(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let (payload, decision) = match authorize_api(&headers, &auth_state).await {
        Ok(authorized) => authorized,
        Err(response) => return response,
    };

    let body = SessionResponse {
        subject_id: payload.subject_id,
        role: payload.role.to_string(),
        tenant_id: payload.tenant_id,
        expires_at: payload.expires_at,
    };
    with_rate_limit_headers((StatusCode::OK, Json(body)).into_response(), &decision)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Tokens are stateless; clearing the cookie is all there is to do.
    let mut response_headers = HeaderMap::new();
    match clear_session_cookie(auth_state.config().session_cookie_secure()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build logout cookie: {err}"),
    }
    (StatusCode::NO_CONTENT, response_headers)
}
