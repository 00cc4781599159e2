//! Process-local counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Backend, CounterFuture, CounterStore, Hit};
use crate::clock::Clock;

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u64,
    reset_at_ms: i64,
}

pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Increment `key`; the lock covers the read and the write.
    pub async fn hit(&self, key: &str, window: Duration) -> Hit {
        let now = self.clock.now_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at_ms: now.saturating_add(window_ms),
        });
        if now >= entry.reset_at_ms {
            *entry = Window {
                count: 0,
                reset_at_ms: now.saturating_add(window_ms),
            };
        }
        entry.count = entry.count.saturating_add(1);
        Hit {
            count: entry.count,
            reset_at_ms: entry.reset_at_ms,
            backend: Backend::Memory,
        }
    }

    pub async fn len(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired windows, returning how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| window.reset_at_ms > now);
        before - windows.len()
    }

    #[must_use]
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep().await;
                if removed > 0 {
                    debug!(removed, "swept expired rate limit windows");
                }
            }
        })
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment<'a>(&'a self, key: &'a str, window: Duration) -> CounterFuture<'a> {
        Box::pin(async move { Ok(self.hit(key, window).await) })
    }

    fn backend(&self) -> Backend {
        Backend::Memory
    }
}

impl std::fmt::Debug for MemoryCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCounterStore").finish_non_exhaustive()
    }
}
