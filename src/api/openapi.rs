use super::handlers::{admin, auth, health};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::otp::otp_request,
        auth::otp::otp_verify,
        auth::session::session,
        auth::session::logout,
        admin::status,
    ),
    components(schemas(
        health::Health,
        admin::AdminStatus,
        auth::types::OtpRequest,
        auth::types::OtpVerifyRequest,
        auth::types::OtpVerifyResponse,
        auth::types::SessionUser,
        auth::types::SessionResponse,
        auth::types::AcceptedResponse,
        auth::types::ErrorResponse,
    )),
    tags(
        (name = "health", description = "Liveness and build information"),
        (name = "auth", description = "One-time passcode login and sessions"),
        (name = "admin", description = "Operator status"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
