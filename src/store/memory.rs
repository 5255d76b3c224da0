use super::{CounterStore, WindowMode};
use crate::error::{RateLimitError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// How often `increment` sweeps expired counters out of the map.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// In-process counter store.
///
/// Only suitable for a single instance and for tests: limits are not shared
/// between processes. Expiry follows tokio's clock, so paused-time tests can
/// advance through windows.
///
/// Expired counters are swept during `increment` at most once per purge
/// interval, so memory stays bounded by the keys seen within one window.
#[derive(Debug)]
pub struct MemoryStore {
    counters: Mutex<Counters>,
    purge_interval: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    entries: HashMap<String, Counter>,
    next_purge: Option<Instant>,
}

impl Counters {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let initial_count = self.entries.len();
        self.entries.retain(|_, counter| !counter.is_expired(now));
        initial_count - self.entries.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(purge_interval: Duration) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            purge_interval,
        }
    }

    /// Current count for a key, or `None` once it has expired.
    pub fn count(&self, key: &str) -> Result<Option<u64>> {
        let counters = self.lock()?;
        let now = Instant::now();
        Ok(counters
            .entries
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.count))
    }

    /// Remaining time-to-live of a key.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let counters = self.lock()?;
        let now = Instant::now();
        Ok(counters
            .entries
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .and_then(|counter| counter.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    /// Number of counters held, expired ones not yet swept included.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every expired counter, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        Ok(self.lock()?.purge_expired(Instant::now()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Counters>> {
        self.counters
            .lock()
            .map_err(|_| RateLimitError::Store("Failed to acquire counter lock".into()))
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window_secs: u64, mode: WindowMode) -> Result<u64> {
        let mut counters = self.lock()?;
        let now = Instant::now();

        match counters.next_purge {
            Some(at) if at <= now => {
                let removed = counters.purge_expired(now);
                if removed > 0 {
                    tracing::debug!(
                        target: "redis_ratelimit::store",
                        removed = removed,
                        "Purged expired counters"
                    );
                }
                counters.next_purge = Some(now + self.purge_interval);
            }
            Some(_) => {}
            None => counters.next_purge = Some(now + self.purge_interval),
        }

        let counter = counters.entries.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        if counter.is_expired(now) {
            *counter = Counter {
                count: 0,
                expires_at: None,
            };
        }

        counter.count += 1;
        let deadline = now + Duration::from_secs(window_secs);
        match mode {
            WindowMode::Refreshing => counter.expires_at = Some(deadline),
            WindowMode::Fixed => {
                counter.expires_at.get_or_insert(deadline);
            }
        }

        Ok(counter.count)
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}
