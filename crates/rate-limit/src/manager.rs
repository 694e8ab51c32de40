//! Rate limit manager implementation.

use std::{sync::Arc, time::Duration};

use config::RateLimitConfig;
use jiff::{SignedDuration, Timestamp};
use serde::{Serialize, Serializer};

use crate::clock::Clock;
use crate::error::RateLimitError;
use crate::spec::RateSpec;
use crate::storage::{CounterStorage, Storage};
use crate::window::SlidingWindow;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the caller is over quota.
    pub limited: bool,
    /// Estimated hits in the trailing period, the checked request included.
    pub count: f64,
    /// Quota the count is measured against.
    pub limit: u64,
    /// When the counted sub-window ends. Serialized as unix seconds.
    #[serde(serialize_with = "unix_seconds")]
    pub reset: Timestamp,
}

fn unix_seconds<S: Serializer>(timestamp: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(timestamp.as_second())
}

impl RateLimitDecision {
    /// Whole requests left before the quota is hit.
    pub fn remaining(&self) -> u64 {
        (self.limit as f64 - self.count).max(0.0).floor() as u64
    }

    /// Seconds until the window resets, never less than one.
    pub fn retry_after(&self, now: Timestamp) -> u64 {
        let secs = self.reset.duration_since(now).as_secs_f64().ceil();

        if secs < 1.0 { 1 } else { secs as u64 }
    }
}

/// Evaluates quotas against a shared counter store.
///
/// The manager owns no counters itself; any number of managers may share one store.
pub struct RateLimitManager<S = Storage> {
    window: SlidingWindow<S>,
}

impl RateLimitManager<Storage> {
    /// Create a new rate limit manager with the configured storage backend.
    pub async fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let storage = Storage::from_config(&config.storage).await?;

        Ok(Self::new(storage).with_store_timeout(config.store_timeout))
    }
}

impl<S: CounterStorage> RateLimitManager<S> {
    /// A manager over `storage` with the wall clock and a 250ms store timeout.
    pub fn new(storage: S) -> Self {
        Self {
            window: SlidingWindow::new(storage, Duration::from_millis(250)),
        }
    }

    /// Replaces the clock windows are computed against.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.window.set_clock(clock);
        self
    }

    /// Bounds each store round trip. Slower ones count as store failures.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.window.set_timeout(timeout);
        self
    }

    /// The clock windows are computed against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.window.clock()
    }

    /// Counts one request for `key` against a single quota.
    pub async fn check_one(&self, key: &str, spec: &RateSpec) -> RateLimitDecision {
        let observation = self.window.observe(key, spec.period_secs()).await;

        RateLimitDecision {
            limited: observation.count > spec.limit() as f64,
            count: observation.count,
            limit: spec.limit(),
            reset: observation.window_start + SignedDuration::from_secs(spec.period_secs() as i64),
        }
    }

    /// Counts one request for `key` against every quota, each on its own counter.
    ///
    /// All quotas are observed even once one is violated. The reported numbers come from the
    /// violated quota that resets last, or from the first quota when none is violated.
    pub async fn check_all(&self, key: &str, specs: &[RateSpec]) -> RateLimitDecision {
        let mut first = None;
        let mut violated: Option<RateLimitDecision> = None;

        for (index, spec) in specs.iter().enumerate() {
            let decision = self.check_one(&format!("{key}:{index}"), spec).await;

            if decision.limited && violated.is_none_or(|worst| decision.reset > worst.reset) {
                violated = Some(decision);
            }

            first.get_or_insert(decision);
        }

        if let Some(decision) = violated {
            log::debug!("Key '{key}' over quota: {:.2}/{}", decision.count, decision.limit);
            return decision;
        }

        first.unwrap_or_else(|| RateLimitDecision {
            limited: false,
            count: 0.0,
            limit: 0,
            reset: self.clock().now(),
        })
    }
}
