//! Counter storage.
//!
//! The engine talks to counters through the [`CounterStore`] trait so any
//! process-local or external keyed store with TTL support can back it. The
//! reference implementation is an in-memory map guarded by one mutex, with
//! lazy expiry on read.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A request counter for one (scope, period) window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleCounter {
    /// When the current window started
    pub window_start: DateTime<Utc>,
    /// Requests observed in this window, including the current one
    pub total_requests: u64,
}

impl ThrottleCounter {
    /// Start a fresh window with a count of one.
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            total_requests: 1,
        }
    }

    /// A copy of this counter with the count advanced by one. The window
    /// start is unchanged.
    pub fn incremented(&self) -> Self {
        Self {
            window_start: self.window_start,
            total_requests: self.total_requests.saturating_add(1),
        }
    }

    /// Whether this counter's window has fully elapsed relative to `now`.
    pub fn expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let secs = window.as_secs().min(i64::MAX as u64) as i64;
        self.window_start + chrono::Duration::seconds(secs) < now
    }
}

/// Storage contract for throttle counters.
///
/// A saved entry must become unreadable once `expiry` has elapsed from the
/// counter's own `window_start`, not from the write time. Implementations
/// backed by external stores may fail; the engine propagates such failures
/// without partially applying a counter update.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the counter for a key, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<ThrottleCounter>>;

    /// Upsert the counter for a key with the given time-to-live.
    async fn save(&self, key: &str, counter: ThrottleCounter, expiry: Duration) -> Result<()>;
}

struct StoredCounter {
    counter: ThrottleCounter,
    expires_at: DateTime<Utc>,
}

/// In-memory reference [`CounterStore`].
///
/// Expiry is enforced lazily: expired entries are dropped when read. Callers
/// holding many distinct scopes should run [`Self::sweep`] periodically to
/// bound memory.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, StoredCounter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, stored| stored.expires_at >= now);
        before - entries.len()
    }

    /// Number of live entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove all entries. Primarily useful for tests.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<ThrottleCounter>> {
        let now = Utc::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(stored) if stored.expires_at >= now => Ok(Some(stored.counter)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, counter: ThrottleCounter, expiry: Duration) -> Result<()> {
        let secs = expiry.as_secs().min(i64::MAX as u64) as i64;
        let expires_at = counter.window_start + chrono::Duration::seconds(secs);

        self.entries
            .lock()
            .insert(key.to_string(), StoredCounter { counter, expires_at });
        Ok(())
    }
}
