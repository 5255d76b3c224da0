//! Counter stores backing the rate limiter.
//!
//! A store owns the authoritative request counts. The limiter never caches or
//! mirrors them; every admission decision is one [`CounterStore::increment`]
//! round trip.

use crate::error::Result;
use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// How a counter's time-to-live is maintained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowMode {
    /// Every increment resets the time-to-live to the full window, so a key
    /// that keeps receiving traffic never expires.
    #[default]
    Refreshing,
    /// The time-to-live is only set when the counter has none; the window
    /// closes one window length after its first request.
    Fixed,
}

/// Atomic counter storage shared by every instance enforcing the same limits.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key` by one, creating it at 1 when absent,
    /// and apply the window's time-to-live, as one indivisible operation.
    ///
    /// Returns the post-increment count. Concurrent callers on the same key
    /// each observe a distinct count.
    async fn increment(&self, key: &str, window_secs: u64, mode: WindowMode) -> Result<u64>;

    /// Round trip to the store without touching any counter.
    async fn ping(&self) -> Result<()>;
}
