//! Fixed-window rate limiting.
//!
//! Flow Overview:
//! 1) Handlers build a key from a bucket and either the caller IP or the
//!    authenticated subject (`rl:{bucket}:ip:{address}`, `rl:{bucket}:sub:{subject}`).
//! 2) The configured [`CounterStore`] increments that key. With a remote store
//!    configured, the increment goes through [`FailOpenStore`], which falls back
//!    to process memory on any remote failure.
//! 3) The hit count is turned into a [`RateLimitDecision`] that carries the
//!    response headers.
//!
//! Windows are fixed: the first hit opens a window, later hits share its reset
//! time, and the first hit after the reset starts over at 1.

mod fail_open;
mod headers;
mod memory;
mod remote;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::clock::Clock;

pub use fail_open::FailOpenStore;
pub use headers::{
    apply_rate_limit_headers, client_ip, rate_limited_response, with_rate_limit_headers,
    HEADER_BACKEND, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
};
pub use memory::MemoryCounterStore;
pub use remote::{RemoteConfig, RemoteCounterStore};

/// Which counter store answered a check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Remote,
}

impl Backend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Remote => "remote",
        }
    }
}

/// Counter state right after an increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hit {
    pub count: u64,
    pub reset_at_ms: i64,
    pub backend: Backend,
}

/// Remote store failures. These never reach a caller of [`RateLimiter::check`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("rate limit store transport error: {0}")]
    Transport(String),
    #[error("rate limit store returned HTTP {0}")]
    Status(u16),
    #[error("rate limit store returned a malformed response: {0}")]
    Malformed(String),
    #[error("rate limit store timed out")]
    Timeout,
}

pub type CounterFuture<'a> = Pin<Box<dyn Future<Output = Result<Hit, BackendError>> + Send + 'a>>;

pub trait CounterStore: Send + Sync {
    /// Count one hit against `key`, opening a window of `window` if none is active.
    fn increment<'a>(&'a self, key: &'a str, window: Duration) -> CounterFuture<'a>;

    fn backend(&self) -> Backend;
}

/// A named limit: at most `max` hits per `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub bucket: &'static str,
    pub max: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const OTP_REQUEST_BY_IP: Self = Self::new("otp_request", 5, 15 * 60);
    pub const OTP_REQUEST_BY_EMAIL: Self = Self::new("otp_request", 5, 15 * 60);
    pub const OTP_VERIFY_BY_IP: Self = Self::new("otp_verify", 10, 15 * 60);
    pub const OTP_VERIFY_BY_EMAIL: Self = Self::new("otp_verify", 5, 15 * 60);
    pub const API_BY_SUBJECT: Self = Self::new("api", 120, 60);

    #[must_use]
    pub const fn new(bucket: &'static str, max: u64, window_seconds: u64) -> Self {
        Self {
            bucket,
            max,
            window: Duration::from_secs(window_seconds),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub blocked: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at_ms: i64,
    /// Seconds until the window resets, never below 1.
    pub retry_after_seconds: u64,
    pub backend: Backend,
}

impl RateLimitDecision {
    fn from_hit(hit: Hit, max: u64, now_ms: i64) -> Self {
        let until_reset_ms = hit.reset_at_ms.saturating_sub(now_ms).max(0);
        let retry_after_seconds = u64::try_from(until_reset_ms)
            .unwrap_or(0)
            .div_ceil(1000)
            .max(1);
        Self {
            blocked: hit.count > max,
            limit: max,
            remaining: max - hit.count.min(max),
            reset_at_ms: hit.reset_at_ms,
            retry_after_seconds,
            backend: hit.backend,
        }
    }

    /// Reset time as unix seconds, rounded up.
    #[must_use]
    pub fn reset_epoch_seconds(&self) -> i64 {
        self.reset_at_ms.saturating_add(999).div_euclid(1000)
    }
}

#[must_use]
pub fn ip_key(bucket: &str, address: &str) -> String {
    format!("rl:{bucket}:ip:{address}")
}

#[must_use]
pub fn subject_key(bucket: &str, subject: &str) -> String {
    format!("rl:{bucket}:sub:{subject}")
}

/// Shared limiter handed to handlers through the auth state.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    local: Arc<MemoryCounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Process-local counting only.
    #[must_use]
    pub fn memory(clock: Arc<dyn Clock>) -> Self {
        let local = Arc::new(MemoryCounterStore::new(Arc::clone(&clock)));
        Self {
            store: local.clone(),
            local,
            clock,
        }
    }

    /// Remote counting with a memory fallback. `cooldown` of zero retries the
    /// remote store on every call even after a failure.
    #[must_use]
    pub fn with_remote(remote: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        let local = Arc::new(MemoryCounterStore::new(Arc::clone(&clock)));
        let store = Arc::new(FailOpenStore::new(
            remote,
            local.clone(),
            Arc::clone(&clock),
            cooldown,
        ));
        Self { store, local, clock }
    }

    /// Backend selected at construction.
    #[must_use]
    pub fn configured_backend(&self) -> Backend {
        self.store.backend()
    }

    /// Number of windows held in process memory.
    pub async fn local_windows(&self) -> usize {
        self.local.len().await
    }

    /// Evict expired local windows every `every`.
    #[must_use]
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        self.local.clone().spawn_sweeper(every)
    }

    pub async fn check(&self, key: &str, max: u64, window: Duration) -> RateLimitDecision {
        let hit = match self.store.increment(key, window).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!("rate limit store failed, counting locally: {err}");
                self.local.hit(key, window).await
            }
        };
        RateLimitDecision::from_hit(hit, max, self.clock.now_millis())
    }

    pub async fn check_ip(&self, policy: RateLimitPolicy, address: &str) -> RateLimitDecision {
        self.check(&ip_key(policy.bucket, address), policy.max, policy.window)
            .await
    }

    pub async fn check_subject(&self, policy: RateLimitPolicy, subject: &str) -> RateLimitDecision {
        self.check(&subject_key(policy.bucket, subject), policy.max, policy.window)
            .await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.store.backend())
            .finish_non_exhaustive()
    }
}
