//! Operator status for super admins.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use super::auth::{
    principal::{authorize_api, require_role},
    types::ErrorResponse,
    AuthState,
};
use crate::rate_limit::with_rate_limit_headers;
use crate::session::Role;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AdminStatus {
    pub rate_limit_backend: String,
    pub local_rate_limit_windows: usize,
    pub sessions_configured: bool,
    pub otp_hashing_enabled: bool,
    pub otp_require_hash: bool,
}

#[utoipa::path(
    get,
    path = "/v1/admin/status",
    responses(
        (status = 200, description = "Gate status", body = AdminStatus),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 403, description = "Not a super admin", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn status(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let (payload, decision) = match authorize_api(&headers, &auth_state).await {
        Ok(authorized) => authorized,
        Err(response) => return response,
    };
    if let Err(response) = require_role(&payload, &[Role::SuperAdmin]) {
        return with_rate_limit_headers(response, &decision);
    }

    let limiter = auth_state.limiter();

    let otp_config = auth_state.otp().config();
    let body = AdminStatus {
        rate_limit_backend: limiter.configured_backend().as_str().to_string(),
        local_rate_limit_windows: limiter.local_windows().await,
        sessions_configured: auth_state.sessions().is_configured(),
        otp_hashing_enabled: otp_config.hashing_enabled(),
        otp_require_hash: otp_config.require_hash(),
    };
    with_rate_limit_headers((StatusCode::OK, Json(body)).into_response(), &decision)
}
