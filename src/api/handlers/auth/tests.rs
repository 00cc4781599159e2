//! Auth handler tests driven through the full router.

use super::{AuthConfig, AuthState};
use crate::api::router;
use crate::audit::{AuditLogger, LogAuditSink};
use crate::clock::{ManualClock, OsEntropy};
use crate::identity::{MemoryIdentityStore, UserRecord};
use crate::otp::testing::RecordingMailer;
use crate::otp::{MemoryOtpStore, OtpConfig, OtpVerifier};
use crate::rate_limit::RateLimiter;
use crate::session::{Role, SessionClaims, SessionCodec};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "s3cret";
const ADMIN_EMAIL: &str = "root@example.com";
const USER_EMAIL: &str = "ana@example.com";

struct Harness {
    app: Router,
    mailer: Arc<RecordingMailer>,
    tokens: SessionCodec,
}

async fn harness_with(secret: Option<&str>, frontend: &str) -> Harness {
    let clock = Arc::new(ManualClock::at_seconds(1_700_000_000));
    let identities = Arc::new(MemoryIdentityStore::new());
    for (email, role) in [(ADMIN_EMAIL, Role::SuperAdmin), (USER_EMAIL, Role::User)] {
        identities
            .insert(UserRecord {
                id: Uuid::new_v4(),
                email: email.to_string(),
                role,
                tenant_id: None,
            })
            .await;
    }
    let mailer = Arc::new(RecordingMailer::default());
    let otp = OtpVerifier::new(
        Arc::new(MemoryOtpStore::new(clock.clone())),
        identities,
        mailer.clone(),
        Arc::new(OsEntropy),
        AuditLogger::new(Arc::new(LogAuditSink), None),
        OtpConfig::new(Some(SecretString::from("pepper".to_string()))),
    );
    let secret = secret.map(|secret| SecretString::from(secret.to_string()));
    let state = AuthState::new(
        AuthConfig::new(frontend.to_string()),
        SessionCodec::new(secret.clone(), clock.clone()),
        otp,
        RateLimiter::memory(clock.clone()),
    );
    Harness {
        app: router(Arc::new(state)),
        mailer,
        tokens: SessionCodec::new(secret, clock),
    }
}

async fn harness() -> Harness {
    harness_with(Some(SECRET), "https://visio360.app").await
}

async fn send(app: &Router, request: Request<Body>) -> Result<Response> {
    Ok(app.clone().oneshot(request).await?)
}

fn post_json(uri: &str, ip: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))?)
}

fn get_with_token(uri: &str, token: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?)
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|value| value.to_str().ok())
}

fn token_for(harness: &Harness, role: Role) -> Result<String> {
    let claims = SessionClaims {
        subject_id: Uuid::new_v4().to_string(),
        role,
        tenant_id: None,
    };
    Ok(harness.tokens.sign(&claims, 3600)?)
}

#[tokio::test]
async fn health_reports_build_and_request_id() -> Result<()> {
    let harness = harness().await;
    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = send(&harness.app, request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, "x-app").is_some_and(|value| value.starts_with("visio360:")));
    assert!(header_str(&response, "x-request-id").is_some_and(|value| value.len() == 26));
    let body = json_body(response).await?;
    assert_eq!(body["rate_limit_backend"], "memory");
    Ok(())
}

#[tokio::test]
async fn otp_login_sets_cookie_and_session_resolves() -> Result<()> {
    let harness = harness().await;

    let response = send(
        &harness.app,
        post_json("/v1/auth/otp/request", "10.0.0.1", &json!({"email": "Ana@Example.com"}))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("5"));
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("4"));
    assert_eq!(header_str(&response, "x-ratelimit-backend"), Some("memory"));
    let code = harness.mailer.last_code().context("no code mailed")?;

    let response = send(
        &harness.app,
        post_json(
            "/v1/auth/otp/verify",
            "10.0.0.1",
            &json!({"email": USER_EMAIL, "code": code}),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = header_str(&response, "set-cookie")
        .context("missing session cookie")?
        .to_string();
    assert!(cookie.starts_with("visio360_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Max-Age=604800"));
    assert!(cookie.contains("Secure"));
    let body = json_body(response).await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], USER_EMAIL);
    assert_eq!(body["user"]["role"], "user");

    let cookie_pair = cookie.split(';').next().context("empty cookie")?.to_string();
    let request = Request::builder()
        .uri("/v1/auth/session")
        .header(header::COOKIE, cookie_pair)
        .body(Body::empty())?;
    let response = send(&harness.app, request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("120"));
    let body = json_body(response).await?;
    assert_eq!(body["role"], "user");
    Ok(())
}

#[tokio::test]
async fn wrong_code_is_a_generic_401() -> Result<()> {
    let harness = harness().await;
    let response = send(
        &harness.app,
        post_json(
            "/v1/auth/otp/verify",
            "10.0.0.2",
            &json!({"email": USER_EMAIL, "code": "000000"}),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(header_str(&response, "x-ratelimit-remaining").is_some());
    let body = json_body(response).await?;
    assert_eq!(body, json!({"success": false, "error": "Invalid or expired code"}));
    Ok(())
}

#[tokio::test]
async fn unknown_email_still_gets_202() -> Result<()> {
    let harness = harness().await;
    let response = send(
        &harness.app,
        post_json("/v1/auth/otp/request", "10.0.0.3", &json!({"email": "ghost@example.com"}))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(harness.mailer.last_code(), None);
    Ok(())
}

#[tokio::test]
async fn invalid_or_missing_payload_is_400() -> Result<()> {
    let harness = harness().await;
    let response = send(
        &harness.app,
        post_json("/v1/auth/otp/request", "10.0.0.4", &json!({"email": "nope"}))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // The IP window was charged before the payload was read.
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("5"));
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("4"));
    assert_eq!(header_str(&response, "retry-after"), Some("900"));

    let request = Request::builder()
        .method("POST")
        .uri("/v1/auth/otp/verify")
        .body(Body::empty())?;
    let response = send(&harness.app, request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("10"));
    Ok(())
}

#[tokio::test]
async fn sixth_request_from_an_ip_is_429() -> Result<()> {
    let harness = harness().await;
    for index in 0..5 {
        let email = format!("user{index}@example.com");
        let response = send(
            &harness.app,
            post_json("/v1/auth/otp/request", "10.0.0.5", &json!({"email": email}))?,
        )
        .await?;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = send(
        &harness.app,
        post_json("/v1/auth/otp/request", "10.0.0.5", &json!({"email": "late@example.com"}))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("0"));
    assert_eq!(header_str(&response, "retry-after"), Some("900"));
    let body = json_body(response).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Too many requests");
    assert!(body["detail"].is_string());

    // Another IP is unaffected.
    let response = send(
        &harness.app,
        post_json("/v1/auth/otp/request", "10.0.0.6", &json!({"email": "late@example.com"}))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    Ok(())
}

#[tokio::test]
async fn verify_without_signing_secret_is_503() -> Result<()> {
    let harness = harness_with(None, "https://visio360.app").await;
    let response = send(
        &harness.app,
        post_json(
            "/v1/auth/otp/verify",
            "10.0.0.7",
            &json!({"email": USER_EMAIL, "code": "123456"}),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(header_str(&response, "x-ratelimit-remaining").is_some());
    Ok(())
}

#[tokio::test]
async fn session_requires_a_valid_token() -> Result<()> {
    let harness = harness().await;
    let request = Request::builder().uri("/v1/auth/session").body(Body::empty())?;
    let response = send(&harness.app, request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("120"));
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("119"));
    let body = json_body(response).await?;
    assert_eq!(body, json!({"success": false, "error": "Not authenticated"}));

    let response = send(&harness.app, get_with_token("/v1/auth/session", "garbage.token")?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn session_is_limited_per_subject() -> Result<()> {
    let harness = harness().await;
    let token = token_for(&harness, Role::User)?;

    let response = send(&harness.app, get_with_token("/v1/auth/session", &token)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("120"));
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("119"));
    assert_eq!(header_str(&response, "retry-after"), Some("60"));

    for _ in 1..120 {
        let response = send(&harness.app, get_with_token("/v1/auth/session", &token)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&harness.app, get_with_token("/v1/auth/session", &token)?).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("0"));
    assert_eq!(header_str(&response, "retry-after"), Some("60"));

    // A different subject has its own window.
    let other = token_for(&harness, Role::User)?;
    let response = send(&harness.app, get_with_token("/v1/auth/session", &other)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn verify_is_limited_per_email_across_ips() -> Result<()> {
    let harness = harness().await;
    for index in 0..5 {
        let response = send(
            &harness.app,
            post_json(
                "/v1/auth/otp/verify",
                &format!("10.1.0.{index}"),
                &json!({"email": USER_EMAIL, "code": "000000"}),
            )?,
        )
        .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = send(
        &harness.app,
        post_json(
            "/v1/auth/otp/verify",
            "10.1.0.99",
            &json!({"email": "ANA@example.com", "code": "000000"}),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("5"));
    assert_eq!(header_str(&response, "retry-after"), Some("900"));
    Ok(())
}

#[tokio::test]
async fn admin_status_requires_super_admin() -> Result<()> {
    let harness = harness().await;

    let user_token = token_for(&harness, Role::User)?;
    let response = send(&harness.app, get_with_token("/v1/admin/status", &user_token)?).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("119"));
    let body = json_body(response).await?;
    assert_eq!(body, json!({"success": false, "error": "Forbidden"}));

    let admin_token = token_for(&harness, Role::SuperAdmin)?;
    let response = send(&harness.app, get_with_token("/v1/admin/status", &admin_token)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["rate_limit_backend"], "memory");
    assert_eq!(body["sessions_configured"], true);
    assert_eq!(body["otp_hashing_enabled"], true);
    assert!(body["local_rate_limit_windows"].as_u64().is_some_and(|count| count >= 1));
    Ok(())
}

#[tokio::test]
async fn logout_clears_cookie() -> Result<()> {
    let harness = harness_with(Some(SECRET), "http://localhost:5173").await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/auth/logout")
        .body(Body::empty())?;
    let response = send(&harness.app, request).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = header_str(&response, "set-cookie").context("missing cookie")?;
    assert!(cookie.contains("Max-Age=0"));
    assert!(!cookie.contains("Secure"));
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let harness = harness().await;
    let request = Request::builder()
        .uri("/api-docs/openapi.json")
        .body(Body::empty())?;
    let response = send(&harness.app, request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert!(body["paths"]["/v1/auth/otp/verify"].is_object());
    Ok(())
}
