//! grantflow-core - Domain logic for the grantflow fund tracker
//!
//! This crate holds the pure domain layer of grantflow: how a proposal
//! moves through its approval pipeline, how fund releases are bounded by a
//! work order's authorized ceiling, how a work order's snapshot is derived
//! from its most recent progress report, and how photographic evidence is
//! captured, geoverified, and stamped. Nothing in this crate performs I/O
//! against the persistent store; that lives in `grantflow-daemon`.
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with validated defaults
//! - [`evidence`]: capture sessions, overlay stamping, object storage
//! - [`fund`]: release tiers, fund-release records, ledger arithmetic
//! - [`geo`]: haversine distance and site-proximity verification
//! - [`proposal`]: proposal records and the approval state machine
//! - [`work`]: work orders and derived progress snapshots
//!
//! # Custody chain
//!
//! ```text
//! Ministry -> State -> Implementing Agency -> Executing Agency -> Village
//! ```
//!
//! Each tier keeps its own fund-release sub-ledger against a work order;
//! all tiers are bounded together by the same authorized ceiling.

pub mod config;
pub mod evidence;
pub mod fund;
pub mod geo;
pub mod proposal;
pub mod work;

/// Returns the current time as nanoseconds since the Unix epoch.
///
/// Timestamps won't overflow `u64` until the year 2554.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
