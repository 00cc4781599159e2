//! Auth state and configuration shared by every handler.

use crate::otp::OtpVerifier;
use crate::rate_limit::RateLimiter;
use crate::session::SessionCodec;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    /// Cookies drop `Secure` only for a plain-HTTP frontend (local development).
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        !self
            .frontend_base_url
            .trim()
            .to_ascii_lowercase()
            .starts_with("http://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    sessions: SessionCodec,
    otp: OtpVerifier,
    limiter: RateLimiter,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, sessions: SessionCodec, otp: OtpVerifier, limiter: RateLimiter) -> Self {
        Self {
            config,
            sessions,
            otp,
            limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionCodec {
        &self.sessions
    }

    #[must_use]
    pub fn otp(&self) -> &OtpVerifier {
        &self.otp
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
