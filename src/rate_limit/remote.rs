//! Shared counters in a Redis-compatible store reached over its REST pipeline API.
//!
//! One round trip per check:
//! `SET key 0 PX <window> NX`, `INCR key`, `PEXPIRE key <window> NX`, `PTTL key`.
//! The `NX` flags keep the expiry from being refreshed once the window is open.
//! The pipeline is not atomic: a key that expires between `SET` and `INCR` is
//! recreated by `INCR` without a TTL, and `PEXPIRE .. NX` gives it one so the
//! key cannot count up forever.

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{Backend, BackendError, CounterFuture, CounterStore, Hit};
use crate::clock::Clock;
use crate::APP_USER_AGENT;

const DEFAULT_TIMEOUT_MS: u64 = 500;

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    url: String,
    token: SecretString,
    timeout: Duration,
}

impl RemoteConfig {
    #[must_use]
    pub fn new(url: String, token: SecretString) -> Self {
        Self {
            url,
            token,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct PipelineReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RemoteCounterStore {
    client: Client,
    endpoint: String,
    token: SecretString,
    clock: Arc<dyn Clock>,
}

impl RemoteCounterStore {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(config: RemoteConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let base = Url::parse(config.url.trim()).context("invalid rate limit store URL")?;
        let endpoint = format!("{}/pipeline", base.as_str().trim_end_matches('/'));
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context("failed to build rate limit store client")?;
        Ok(Self {
            client,
            endpoint,
            token: config.token,
            clock,
        })
    }

    async fn pipeline(&self, key: &str, window_ms: u64) -> Result<Vec<PipelineReply>, BackendError> {
        let window = window_ms.to_string();
        let body = json!([
            ["SET", key, "0", "PX", window, "NX"],
            ["INCR", key],
            ["PEXPIRE", key, window, "NX"],
            ["PTTL", key],
        ]);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        response
            .json::<Vec<PipelineReply>>()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Malformed(err.to_string())
                }
            })
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(err.to_string())
    }
}

/// Integer replies may arrive as JSON numbers or strings.
fn integer_result(reply: &PipelineReply, command: &str) -> Result<i64, BackendError> {
    if let Some(error) = &reply.error {
        return Err(BackendError::Malformed(format!("{command} failed: {error}")));
    }
    match &reply.result {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| BackendError::Malformed(format!("{command} returned a non-integer")))
}

fn parse_hit(replies: &[PipelineReply], now_ms: i64, window_ms: i64) -> Result<Hit, BackendError> {
    let [set, incr, expire, pttl] = replies else {
        return Err(BackendError::Malformed(format!(
            "expected 4 replies, got {}",
            replies.len()
        )));
    };
    if let Some(error) = &set.error {
        return Err(BackendError::Malformed(format!("SET failed: {error}")));
    }
    let count = u64::try_from(integer_result(incr, "INCR")?)
        .map_err(|_| BackendError::Malformed("INCR returned a negative count".to_string()))?;
    if integer_result(expire, "PEXPIRE")? == 1 {
        debug!(count, "rate limit key had no expiry, window set");
    }
    let ttl_ms = integer_result(pttl, "PTTL")?;

    let reset_at_ms = if ttl_ms < 0 {
        // -2: key vanished between commands. -1 cannot survive PEXPIRE NX.
        warn!(ttl_ms, "rate limit key has no expiry, assuming a full window");
        now_ms.saturating_add(window_ms)
    } else {
        now_ms.saturating_add(ttl_ms)
    };
    Ok(Hit {
        count,
        reset_at_ms,
        backend: Backend::Remote,
    })
}

impl CounterStore for RemoteCounterStore {
    fn increment<'a>(&'a self, key: &'a str, window: Duration) -> CounterFuture<'a> {
        Box::pin(async move {
            let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
            let replies = self.pipeline(key, window_ms).await?;
            parse_hit(
                &replies,
                self.clock.now_millis(),
                i64::try_from(window_ms).unwrap_or(i64::MAX),
            )
        })
    }

    fn backend(&self) -> Backend {
        Backend::Remote
    }
}

impl std::fmt::Debug for RemoteCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCounterStore")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
