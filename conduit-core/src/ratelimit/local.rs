use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{CounterStore, RateLimitError, WindowHit};
use crate::config::BackendKind;

struct Window {
    started: Instant,
    length: Duration,
    count: u64,
}

impl Window {
    fn is_elapsed(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length
    }
}

/// Fixed-window counters held in this process.
///
/// Counters are not shared between instances and are lost on restart.
#[derive(Default)]
pub struct LocalCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every window that has already ended. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            return 0;
        };
        let before = windows.len();
        windows.retain(|_, window| !window.is_elapsed(now));
        before - windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::Store("counter table lock poisoned".into()))?;

        let entry = windows.entry(key.to_string()).or_insert_with(|| Window {
            started: now,
            length: window,
            count: 0,
        });
        if entry.is_elapsed(now) {
            entry.started = now;
            entry.length = window;
            entry.count = 0;
        }
        entry.count += 1;

        let reset_after = entry.length.saturating_sub(now.duration_since(entry.started));
        Ok(WindowHit {
            count: entry.count,
            reset_after,
        })
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    fn sweep(&self) -> usize {
        LocalCounterStore::sweep(self)
    }
}
