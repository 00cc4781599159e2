use crate::api::{self, AuthConfig, AuthState};
use crate::audit::{AuditLogger, PgAuditSink};
use crate::clock::{Clock, OsEntropy, SystemClock};
use crate::cli::commands::rate_limit::Remote;
use crate::identity::PgIdentityStore;
use crate::otp::{LogOtpMailer, OtpConfig, OtpVerifier, PgOtpStore};
use crate::rate_limit::{RateLimiter, RemoteConfig, RemoteCounterStore};
use crate::session::SessionCodec;
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub session_secret: Option<SecretString>,
    pub session_ttl_seconds: i64,
    pub otp_pepper: Option<SecretString>,
    pub audit_pepper: Option<SecretString>,
    pub otp_require_hash: bool,
    pub otp_ttl_seconds: u64,
    pub rate_limit_remote: Option<Remote>,
    pub rate_limit_timeout_ms: u64,
    pub rate_limit_cooldown_seconds: u64,
    pub rate_limit_sweep_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the rate limit store is
/// misconfigured, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let sessions = SessionCodec::new(args.session_secret, Arc::clone(&clock));
    if !sessions.is_configured() {
        warn!("No session secret configured: logins are disabled");
    }

    if args.otp_pepper.is_none() {
        warn!("No OTP pepper configured: codes are stored in plaintext");
    }
    let otp_config = OtpConfig::new(args.otp_pepper)
        .with_require_hash(args.otp_require_hash)
        .with_ttl_seconds(args.otp_ttl_seconds);
    let otp = OtpVerifier::new(
        Arc::new(PgOtpStore::new(pool.clone())),
        Arc::new(PgIdentityStore::new(pool.clone())),
        Arc::new(LogOtpMailer),
        Arc::new(OsEntropy),
        AuditLogger::new(Arc::new(PgAuditSink::new(pool)), args.audit_pepper)
            .with_clock(Arc::clone(&clock)),
        otp_config,
    );

    let limiter = match args.rate_limit_remote {
        Some(remote) => {
            let config = RemoteConfig::new(remote.url, remote.token)
                .with_timeout(Duration::from_millis(args.rate_limit_timeout_ms));
            let store = RemoteCounterStore::new(config, Arc::clone(&clock))?;
            info!("Rate limiting with the shared store");
            RateLimiter::with_remote(
                Arc::new(store),
                clock,
                Duration::from_secs(args.rate_limit_cooldown_seconds),
            )
        }
        None => {
            info!("Rate limiting in process memory");
            RateLimiter::memory(clock)
        }
    };
    let _sweeper = limiter.spawn_sweeper(Duration::from_secs(args.rate_limit_sweep_seconds));

    let auth_config = AuthConfig::new(args.frontend_base_url).with_session_ttl_seconds(args.session_ttl_seconds);
    let auth_state = Arc::new(AuthState::new(auth_config, sessions, otp, limiter));

    api::new(args.port, auth_state).await
}
