//! Transition table for the proposal approval pipeline.
//!
//! Three entry points cover every mutation of a proposal's status:
//!
//! - [`decide_transition`]: review decisions (approve/reject) by the tier
//!   whose review is currently pending.
//! - [`assign_transition`]: agency assignments after ministry approval.
//! - [`progress_transition`]: execution progress derived from the linked
//!   work order's snapshot.
//!
//! All are pure functions over the closed enums in this crate, so the full
//! transition space is enumerable in tests.

use crate::work::WorkOrderStatus;

use super::{ActorTier, Outcome, ProposalError, ProposalStatus};

/// Applies a review decision to a proposal status.
///
/// The reviewing tier must match the proposal's pending stage: the State
/// reviews `Submitted`, the Ministry reviews `ApprovedByState`. Agencies
/// never review. Rejection is terminal; once a proposal is rejected no
/// `(tier, outcome)` pair transitions it anywhere, which makes a concurrent
/// double-submission of a decision fail deterministically on the loser.
///
/// # Errors
///
/// Returns [`ProposalError::InvalidTransition`] for every combination not
/// in the table.
pub const fn decide_transition(
    status: ProposalStatus,
    tier: ActorTier,
    outcome: Outcome,
) -> Result<ProposalStatus, ProposalError> {
    match (status, tier, outcome) {
        (ProposalStatus::Submitted, ActorTier::State, Outcome::Approve) => {
            Ok(ProposalStatus::ApprovedByState)
        },
        (ProposalStatus::Submitted, ActorTier::State, Outcome::Reject) => {
            Ok(ProposalStatus::RejectedByState)
        },
        (ProposalStatus::ApprovedByState, ActorTier::Ministry, Outcome::Approve) => {
            Ok(ProposalStatus::ApprovedByMinistry)
        },
        (ProposalStatus::ApprovedByState, ActorTier::Ministry, Outcome::Reject) => {
            Ok(ProposalStatus::RejectedByMinistry)
        },
        (from, tier, outcome) => Err(ProposalError::InvalidTransition {
            from,
            tier,
            outcome: Some(outcome),
        }),
    }
}

/// Applies an agency assignment to a proposal status.
///
/// Only two assignments are legal: an implementing agency onto
/// `ApprovedByMinistry`, and an executing agency onto `AssignedToIa`. The
/// EA assignment is the point where the daemon creates the work order, in
/// the same transaction as this transition.
///
/// # Errors
///
/// Returns [`ProposalError::InvalidTransition`] for every other
/// combination.
pub const fn assign_transition(
    status: ProposalStatus,
    agency_tier: ActorTier,
) -> Result<ProposalStatus, ProposalError> {
    match (status, agency_tier) {
        (ProposalStatus::ApprovedByMinistry, ActorTier::ImplementingAgency) => {
            Ok(ProposalStatus::AssignedToIa)
        },
        (ProposalStatus::AssignedToIa, ActorTier::ExecutingAgency) => {
            Ok(ProposalStatus::AssignedToEa)
        },
        (from, tier) => Err(ProposalError::InvalidTransition {
            from,
            tier,
            outcome: None,
        }),
    }
}

/// Derives the proposal status change implied by a work order snapshot.
///
/// Progress flows one way: `AssignedToEa` moves to `InProgress` once the
/// first report lands, and either of those moves to `Completed` when the
/// snapshot reaches full progress. Every other combination — including a
/// snapshot that slips back below full spend after the proposal completed —
/// is a no-op, so a stale or regressive snapshot can never rewind the
/// pipeline.
#[must_use]
pub const fn progress_transition(
    status: ProposalStatus,
    work_status: WorkOrderStatus,
) -> Option<ProposalStatus> {
    match (status, work_status) {
        (ProposalStatus::AssignedToEa, WorkOrderStatus::InProgress) => {
            Some(ProposalStatus::InProgress)
        },
        (
            ProposalStatus::AssignedToEa | ProposalStatus::InProgress,
            WorkOrderStatus::Completed,
        ) => Some(ProposalStatus::Completed),
        _ => None,
    }
}

/// Validates the shape of a new submission.
///
/// # Errors
///
/// Returns [`ProposalError::Validation`] if the project name or district
/// reference is empty (after trimming) or the estimated cost is not
/// positive.
pub fn validate_submission(
    project_name: &str,
    estimated_cost: i64,
    district_ref: &str,
) -> Result<(), ProposalError> {
    if project_name.trim().is_empty() {
        return Err(ProposalError::Validation {
            field: "project_name",
            reason: "must not be empty".to_string(),
        });
    }
    if estimated_cost <= 0 {
        return Err(ProposalError::Validation {
            field: "estimated_cost",
            reason: format!("must be positive, got {estimated_cost}"),
        });
    }
    if district_ref.trim().is_empty() {
        return Err(ProposalError::Validation {
            field: "district_ref",
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}
