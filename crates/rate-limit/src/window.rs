//! Sliding window counter over a [`CounterStorage`].

use std::{sync::Arc, time::Duration};

use jiff::Timestamp;

use crate::clock::{Clock, SystemClock};
use crate::storage::{CounterRecord, CounterStorage, StorageError};

/// Result of counting one hit against a key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Estimated hits in the trailing period, this one included.
    pub count: f64,
    /// Start of the sub-window the hit was counted in.
    pub window_start: Timestamp,
}

/// Counts hits per key with O(1) state, tolerating an unreliable store.
pub struct SlidingWindow<S> {
    storage: S,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl<S: CounterStorage> SlidingWindow<S> {
    /// A window over `storage`, using the wall clock and the given store timeout.
    pub fn new(storage: S, timeout: Duration) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            timeout,
        }
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The clock all windows are computed against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Counts one hit for `key` and returns the estimate for a period of `period_secs`.
    ///
    /// Never fails. When the store errors, holds a malformed value or does not answer within
    /// the timeout, the hit reads as zero with a window starting now.
    pub async fn observe(&self, key: &str, period_secs: u64) -> Observation {
        let now = self.clock.now();

        match tokio::time::timeout(self.timeout, self.count_hit(key, period_secs, now)).await {
            Ok(Ok(observation)) => observation,
            Ok(Err(e)) => {
                log::warn!("Rate limit store failed for key '{key}', admitting request: {e}");
                Self::fail_open(now)
            }
            Err(_) => {
                log::warn!(
                    "Rate limit store did not answer within {:?} for key '{key}', admitting request",
                    self.timeout
                );
                Self::fail_open(now)
            }
        }
    }

    async fn count_hit(&self, key: &str, period_secs: u64, now: Timestamp) -> Result<Observation, StorageError> {
        let ttl = Duration::from_secs(period_secs.saturating_mul(2));

        let record = self
            .storage
            .update(key, ttl, |record| {
                record
                    .unwrap_or_else(|| CounterRecord::empty(now))
                    .advance(now, period_secs)
                    .hit()
            })
            .await?;

        let count = record.estimate(now, period_secs);
        log::debug!("Key '{key}' at {count:.2} hits in the last {period_secs}s");

        Ok(Observation {
            count,
            window_start: record.window_start,
        })
    }

    fn fail_open(now: Timestamp) -> Observation {
        Observation {
            count: 0.0,
            window_start: now,
        }
    }
}
