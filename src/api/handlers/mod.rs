pub mod admin;
pub mod auth;
pub mod health;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use auth::types::ErrorResponse;

/// `{success: false, error}` with the given status.
pub(crate) fn error_response(status: StatusCode, error: &str) -> Response {
    let body = ErrorResponse {
        success: false,
        error: error.to_string(),
        detail: None,
    };
    (status, Json(body)).into_response()
}
