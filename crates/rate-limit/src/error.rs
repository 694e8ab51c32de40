//! Error types for rate limiting.

use crate::spec::InvalidRateSpec;
use crate::storage::StorageError;

/// Errors raised while setting up rate limiting. Admission checks themselves never fail.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// A quota could not be parsed.
    #[error(transparent)]
    InvalidRateSpec(#[from] InvalidRateSpec),

    /// A protected operation was registered without any quota.
    #[error("at least one rate spec is required")]
    MissingRates,

    /// A method filter names something that is not an HTTP method.
    #[error("invalid HTTP method '{0}' in method filter")]
    InvalidMethod(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
