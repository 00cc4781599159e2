use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Backend, CounterFuture, CounterStore, MemoryCounterStore};
use crate::clock::Clock;

/// Try the remote store, count locally when it fails.
///
/// After a failure the remote store is skipped until `cooldown` has passed,
/// so an outage costs one timeout per cooldown instead of one per request.
pub struct FailOpenStore {
    remote: Arc<dyn CounterStore>,
    local: Arc<MemoryCounterStore>,
    clock: Arc<dyn Clock>,
    cooldown_ms: i64,
    /// Millis before which the remote store is skipped; 0 when healthy.
    skip_until_ms: AtomicI64,
}

impl FailOpenStore {
    #[must_use]
    pub fn new(
        remote: Arc<dyn CounterStore>,
        local: Arc<MemoryCounterStore>,
        clock: Arc<dyn Clock>,
        cooldown: Duration,
    ) -> Self {
        Self {
            remote,
            local,
            clock,
            cooldown_ms: i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX),
            skip_until_ms: AtomicI64::new(0),
        }
    }
}

impl CounterStore for FailOpenStore {
    fn increment<'a>(&'a self, key: &'a str, window: Duration) -> CounterFuture<'a> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            if now < self.skip_until_ms.load(Ordering::Acquire) {
                return Ok(self.local.hit(key, window).await);
            }

            match self.remote.increment(key, window).await {
                Ok(hit) => {
                    if self.skip_until_ms.swap(0, Ordering::AcqRel) != 0 {
                        info!("rate limit store recovered");
                    }
                    Ok(hit)
                }
                Err(err) => {
                    warn!("rate limit store unavailable, failing open to memory: {err}");
                    if self.cooldown_ms > 0 {
                        self.skip_until_ms
                            .store(now.saturating_add(self.cooldown_ms), Ordering::Release);
                    }
                    Ok(self.local.hit(key, window).await)
                }
            }
        })
    }

    fn backend(&self) -> Backend {
        self.remote.backend()
    }
}
