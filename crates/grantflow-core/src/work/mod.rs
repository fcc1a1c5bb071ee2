//! Work-order data model and derived progress snapshots.
//!
//! A work order is created when a proposal is assigned to an executing
//! agency, or directly for village-level disbursement (no proposal). Its
//! `amount` is the authorized ceiling and is immutable after creation;
//! money moves through [`crate::fund`] releases, never by editing the
//! ceiling.
//!
//! # Snapshot derivation
//!
//! The mutable fields on a work order (status, progress, funds figures) are
//! a denormalized cache of the **most recent** progress report, never a
//! merge of older ones. [`compute_snapshot`] is the single place the
//! arithmetic lives, so the cache-coherence invariant — re-scan reports,
//! take the latest, recompute, compare — is testable against one function.
//!
//! # Progress denominator
//!
//! `progress_percentage = funds_used / amount * 100`, where `amount` is the
//! total authorized ceiling. This denominator is applied uniformly; funds
//! released is never used as a denominator anywhere in the workspace.


use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a work order. Transitions are monotonic forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    /// Created, no progress report yet.
    Pending,
    /// At least one progress report below 100%.
    InProgress,
    /// Progress reached 100%. Terminal.
    Completed,
}

impl WorkOrderStatus {
    /// Stable string form used in the persistent store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidStatus`] for unknown strings.
    pub fn parse(value: &str) -> Result<Self, SnapshotError> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(SnapshotError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }

    /// Monotonic ordering rank. A snapshot may never move a work order to a
    /// status with a lower rank.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
        }
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of assigned, funded work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    /// Work order identifier (uuid).
    pub id: String,

    /// Originating proposal, or `None` for direct village disbursement.
    pub proposal_id: Option<String>,

    /// Human-readable title.
    pub title: String,

    /// Authorized ceiling in whole rupees. Immutable after creation.
    pub amount: i64,

    /// Implementing agency in custody of the work.
    pub implementing_agency_id: String,

    /// Executing agency carrying out the work.
    pub executing_agency_id: String,

    /// Free-form site location description.
    pub location: String,

    /// Reference coordinates of the work site, when surveyed.
    pub site_latitude: Option<f64>,

    /// Reference coordinates of the work site, when surveyed.
    pub site_longitude: Option<f64>,

    /// Completion deadline, nanoseconds since Unix epoch.
    pub deadline_ns: Option<u64>,

    /// Current derived snapshot.
    pub snapshot: WorkSnapshot,

    /// Nanoseconds since Unix epoch at creation.
    pub created_at_ns: u64,
}

/// Denormalized view of the most recent progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkSnapshot {
    /// Derived status.
    pub status: WorkOrderStatus,

    /// Percent complete, clamped to `0..=100`.
    pub progress_percentage: u8,

    /// Cumulative funds released at report time.
    pub funds_released: i64,

    /// Cumulative funds used at report time.
    pub funds_used: i64,

    /// `funds_released - funds_used`.
    pub funds_remaining: i64,

    /// When the underlying report was created (0 for a fresh work order).
    pub updated_at_ns: u64,
}

impl WorkSnapshot {
    /// Snapshot of a freshly created work order with no reports.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            status: WorkOrderStatus::Pending,
            progress_percentage: 0,
            funds_released: 0,
            funds_used: 0,
            funds_remaining: 0,
            updated_at_ns: 0,
        }
    }
}

/// Errors that can occur deriving a work-order snapshot.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    /// Funds-used figure fails range validation against funds released.
    ///
    /// Clamping is never applied silently; the report is rejected instead.
    #[error("validation failed: funds_used {funds_used} exceeds funds_released {funds_released}")]
    UsedExceedsReleased {
        /// Reported funds used.
        funds_used: i64,
        /// Funds released per the ledger.
        funds_released: i64,
    },

    /// A funds figure is negative.
    #[error("validation failed: {field} must not be negative, got {value}")]
    NegativeFunds {
        /// The offending field.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// Unknown status string in the persistent store.
    #[error("invalid work order status: {value}")]
    InvalidStatus {
        /// The unrecognized status string.
        value: String,
    },
}

/// Derives the snapshot for a report's funds figures.
///
/// `amount` is the work order's authorized ceiling, `funds_released` comes
/// from the fund ledger (not from the submitter), and `funds_used` is the
/// reported cumulative spend.
///
/// Invariants produced:
///
/// - `funds_remaining = funds_released - funds_used`, never negative
/// - `progress = clamp(0, 100, funds_used * 100 / amount)`
/// - `status == Completed` exactly when `progress >= 100`
///
/// # Errors
///
/// Returns [`SnapshotError::NegativeFunds`] or
/// [`SnapshotError::UsedExceedsReleased`] instead of clamping bad input.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute_snapshot(
    amount: i64,
    funds_released: i64,
    funds_used: i64,
    reported_at_ns: u64,
) -> Result<WorkSnapshot, SnapshotError> {
    if funds_released < 0 {
        return Err(SnapshotError::NegativeFunds {
            field: "funds_released",
            value: funds_released,
        });
    }
    if funds_used < 0 {
        return Err(SnapshotError::NegativeFunds {
            field: "funds_used",
            value: funds_used,
        });
    }
    if funds_used > funds_released {
        return Err(SnapshotError::UsedExceedsReleased {
            funds_used,
            funds_released,
        });
    }

    // amount > 0 is enforced at work-order creation; guard anyway so a
    // corrupted row cannot divide by zero.
    let progress = if amount > 0 {
        (funds_used.saturating_mul(100) / amount).clamp(0, 100) as u8
    } else {
        0
    };

    let status = if progress >= 100 {
        WorkOrderStatus::Completed
    } else {
        WorkOrderStatus::InProgress
    };

    Ok(WorkSnapshot {
        status,
        progress_percentage: progress,
        funds_released,
        funds_used,
        funds_remaining: funds_released - funds_used,
        updated_at_ns: reported_at_ns,
    })
}
