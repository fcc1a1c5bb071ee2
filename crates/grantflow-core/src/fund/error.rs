//! Fund module error types.

use thiserror::Error;

/// Errors that can occur while validating or appending fund releases.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FundError {
    /// Release amount is zero or negative.
    #[error("invalid release amount: {amount} (must be positive)")]
    InvalidAmount {
        /// The rejected amount.
        amount: i64,
    },

    /// Release would push the aggregate past the work order's ceiling.
    #[error(
        "over-allocation: release of {attempted} on top of {already_released} exceeds ceiling {ceiling}"
    )]
    OverAllocation {
        /// The amount the caller attempted to release.
        attempted: i64,
        /// Sum of prior releases across all tiers.
        already_released: i64,
        /// The work order's authorized ceiling.
        ceiling: i64,
    },

    /// Unknown tier string in the persistent store.
    #[error("invalid release tier: {value}")]
    InvalidTier {
        /// The unrecognized tier string.
        value: String,
    },
}
