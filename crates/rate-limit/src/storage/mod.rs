//! Storage backends for rate limit counters.

use std::{future::Future, sync::Arc, time::Duration};

use config::StorageConfig;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod redis;
mod redis_pool;

pub use memory::InMemoryStorage;
pub use redis::RedisStorage;

/// Per-key state of the sliding window counter.
///
/// `window_start` opens the current fixed sub-window, `current` counts hits inside
/// it and `previous` is the total of the sub-window right before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Start of the current sub-window.
    pub window_start: Timestamp,
    /// Hits observed in the current sub-window.
    pub current: u64,
    /// Hits observed in the preceding sub-window.
    pub previous: u64,
}

impl CounterRecord {
    /// A record with no hits, opening its window at `now`.
    pub fn empty(now: Timestamp) -> Self {
        Self {
            window_start: now,
            current: 0,
            previous: 0,
        }
    }

    /// Brings the record forward to `now`.
    ///
    /// Records two or more periods old carry no information and start over. A record
    /// whose current sub-window has ended is rolled exactly once: after the staleness
    /// check, less than two periods have passed.
    pub fn advance(self, now: Timestamp, period_secs: u64) -> Self {
        let elapsed = elapsed_secs(self.window_start, now);
        let period = period_secs as f64;

        if elapsed >= 2.0 * period {
            return Self::empty(now);
        }

        if elapsed >= period {
            return Self {
                window_start: self.window_start + SignedDuration::from_secs(period_secs as i64),
                current: 0,
                previous: self.current,
            };
        }

        self
    }

    /// Counts one more hit in the current sub-window.
    pub fn hit(self) -> Self {
        Self {
            current: self.current.saturating_add(1),
            ..self
        }
    }

    /// Sliding window estimate: the previous sub-window weighted by how much of it
    /// still overlaps the trailing period, plus the current sub-window.
    pub fn estimate(&self, now: Timestamp, period_secs: u64) -> f64 {
        let period = period_secs as f64;
        let elapsed = elapsed_secs(self.window_start, now);
        let weight = (1.0 - elapsed / period).max(0.0);

        self.previous as f64 * weight + self.current as f64
    }
}

/// Seconds from `start` to `now`, clamped at zero for records written by a clock
/// running ahead of ours.
fn elapsed_secs(start: Timestamp, now: Timestamp) -> f64 {
    now.duration_since(start).as_secs_f64().max(0.0)
}

/// Shared key-value store holding one [`CounterRecord`] per rate-limit key.
///
/// `update` is the only way to change a record. Backends apply it atomically per key: the
/// function sees the latest stored record and its result is written before any other update
/// of the same key can read. Backends that retry on contention may call it more than once.
pub trait CounterStorage: Send + Sync + 'static {
    /// Replaces the record for `key` with `f(current)`, expiring it after `ttl`, and returns
    /// the record written. `current` is `None` when the key is absent or expired.
    fn update<F>(&self, key: &str, ttl: Duration, f: F) -> impl Future<Output = Result<CounterRecord, StorageError>> + Send
    where
        F: Fn(Option<CounterRecord>) -> CounterRecord + Send + Sync;
}

impl<S: CounterStorage> CounterStorage for Arc<S> {
    async fn update<F>(&self, key: &str, ttl: Duration, f: F) -> Result<CounterRecord, StorageError>
    where
        F: Fn(Option<CounterRecord>) -> CounterRecord + Send + Sync,
    {
        self.as_ref().update(key, ttl, f).await
    }
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage connection error: {0}")]
    Connection(String),
    /// The backend was reached but the command failed.
    #[error("Storage query error: {0}")]
    Query(String),
    /// A counter record could not be encoded.
    #[error("Malformed counter record: {0}")]
    Malformed(String),
    /// The in-memory store holds `max_entries` live counters and cannot take a new key.
    #[error("Storage is full: {0} live counters")]
    Full(usize),
}

/// Storage backend selected by configuration.
pub enum Storage {
    /// Process-local counters.
    Memory(InMemoryStorage),
    /// Counters shared through Redis.
    Redis(RedisStorage),
}

impl Storage {
    /// Builds the backend described by `config`.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let storage = match config {
            StorageConfig::Memory(memory) => Storage::Memory(InMemoryStorage::new(memory.max_entries)),
            StorageConfig::Redis(redis) => Storage::Redis(RedisStorage::new(redis).await?),
        };

        Ok(storage)
    }
}

impl CounterStorage for Storage {
    async fn update<F>(&self, key: &str, ttl: Duration, f: F) -> Result<CounterRecord, StorageError>
    where
        F: Fn(Option<CounterRecord>) -> CounterRecord + Send + Sync,
    {
        match self {
            Storage::Memory(storage) => storage.update(key, ttl, f).await,
            Storage::Redis(storage) => storage.update(key, ttl, f).await,
        }
    }
}
