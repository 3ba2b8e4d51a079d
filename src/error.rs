//! Error types for round-up allocation

use thiserror::Error;

/// Result type alias for allocator calls
pub type AllocationResult<T> = std::result::Result<T, AllocationError>;

/// Rejections from the allocator. Each one is fatal for that call; the
/// caller must correct its input before retrying.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error("Round-up amount must be positive, got {0} cents")]
    NonPositiveAmount(i64),

    #[error("Malformed weight {weight} for ticker {ticker}")]
    MalformedWeight { ticker: String, weight: f64 },

    #[error("Ticker weights add up to more than can be represented")]
    WeightOverflow,

    #[error("No default ticker configured for the fallback allocation")]
    MissingDefaultTicker,
}
