//! Fund-release data model and ledger arithmetic.
//!
//! Money flows down the custody chain in installments. Each installment is
//! recorded as an append-only [`FundRelease`] against one work order and one
//! [`ReleaseTier`]. Releases are never edited or deleted; corrections happen
//! by releasing further installments, never by rewriting history.
//!
//! # Ceiling invariant
//!
//! For any work order, `sum(release.amount) <= work_order.amount` across
//! **all** tiers combined. A State-tier release and an IA-tier release are
//! independent sub-ledgers, but both draw against the same ceiling. The
//! aggregate check lives in [`check_ceiling`] and is enforced by the daemon
//! inside the same transaction that appends the release.

mod error;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::FundError;

/// One tier of the Ministry -> State -> IA -> EA custody chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTier {
    /// Central ministry releasing to a state.
    Ministry,
    /// State releasing to an implementing agency.
    State,
    /// Implementing agency releasing to an executing agency.
    ImplementingAgency,
    /// Executing agency releasing to a village-level recipient.
    ExecutingAgency,
}

impl ReleaseTier {
    /// Stable string form used in the persistent store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ministry => "ministry",
            Self::State => "state",
            Self::ImplementingAgency => "implementing_agency",
            Self::ExecutingAgency => "executing_agency",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`FundError::InvalidTier`] if `value` is not a known tier.
    pub fn parse(value: &str) -> Result<Self, FundError> {
        match value {
            "ministry" => Ok(Self::Ministry),
            "state" => Ok(Self::State),
            "implementing_agency" => Ok(Self::ImplementingAgency),
            "executing_agency" => Ok(Self::ExecutingAgency),
            other => Err(FundError::InvalidTier {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReleaseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended installment of a work order's fund ledger.
///
/// `installment_number` is assigned by the store at append time, strictly
/// increasing per work order, and is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRelease {
    /// Release identifier (uuid, assigned at append).
    pub id: String,

    /// Work order this release draws against.
    pub work_order_id: String,

    /// Custody tier issuing the release.
    pub tier: ReleaseTier,

    /// Per-work-order installment sequence, starting at 1.
    pub installment_number: u32,

    /// Amount in whole rupees. Always positive.
    pub amount: i64,

    /// Administrative sanction order authorizing this installment.
    pub sanction_order_no: String,

    /// Nanoseconds since Unix epoch at append time.
    pub released_at_ns: u64,
}

/// Point-in-time ledger totals for one work order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// The work order's authorized ceiling.
    pub allocated: i64,

    /// Sum of all appended releases, across every tier.
    pub released: i64,

    /// Funds used per the most recent progress report (0 when none).
    pub used: i64,

    /// `released - used`.
    pub remaining: i64,
}

impl LedgerSummary {
    /// Builds a summary from the three stored figures.
    #[must_use]
    pub const fn new(allocated: i64, released: i64, used: i64) -> Self {
        Self {
            allocated,
            released,
            used,
            remaining: released - used,
        }
    }
}

/// Validates a release amount in isolation.
///
/// # Errors
///
/// Returns [`FundError::InvalidAmount`] if `amount <= 0`.
pub const fn check_release_amount(amount: i64) -> Result<(), FundError> {
    if amount <= 0 {
        return Err(FundError::InvalidAmount { amount });
    }
    Ok(())
}

/// Validates a release against the work order's aggregate ceiling.
///
/// `already_released` is the sum of every prior release for the work order,
/// across all tiers. The caller must read that sum inside the same
/// transaction that will append the release, or the check has a race gap.
///
/// # Errors
///
/// Returns [`FundError::OverAllocation`] if the new total would exceed the
/// ceiling.
pub const fn check_ceiling(
    already_released: i64,
    amount: i64,
    ceiling: i64,
) -> Result<(), FundError> {
    // Amounts are validated positive before this point, so the sum cannot
    // wrap in practice; saturating keeps the check sound on bad input.
    let new_total = already_released.saturating_add(amount);
    if new_total > ceiling {
        return Err(FundError::OverAllocation {
            attempted: amount,
            already_released,
            ceiling,
        });
    }
    Ok(())
}
