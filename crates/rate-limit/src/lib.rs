//! Request-rate admission control.
//!
//! Quotas such as `"30/h"` are tracked per key with a sliding window counter: two
//! integers and a timestamp per key, kept in a shared store (in memory or Redis).
//! Store failures never block traffic; an unreachable or slow store admits the request.

#![deny(missing_docs)]

mod clock;
mod error;
mod manager;
mod spec;
mod storage;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::RateLimitError;
pub use manager::{RateLimitDecision, RateLimitManager};
pub use spec::{InvalidRateSpec, RateSpec, parse_rates};
pub use storage::{CounterRecord, CounterStorage, InMemoryStorage, RedisStorage, Storage, StorageError};
pub use window::{Observation, SlidingWindow};
