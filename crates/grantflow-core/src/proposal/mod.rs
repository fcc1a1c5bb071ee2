//! Proposal data model and approval lifecycle.
//!
//! A proposal enters at `Submitted` and walks a fixed review pipeline:
//!
//! ```text
//! Submitted --State approve--> ApprovedByState --Ministry approve--> ApprovedByMinistry
//!     |                             |
//!     +--State reject--> RejectedByState (terminal)
//!                                   +--Ministry reject--> RejectedByMinistry (terminal)
//!
//! ApprovedByMinistry --assign IA--> AssignedToIa --assign EA--> AssignedToEa
//! AssignedToEa --> InProgress --> Completed (terminal)
//! ```
//!
//! The transition functions in [`lifecycle`] are total over
//! `(status, tier, outcome)`: every illegal combination yields a typed
//! [`ProposalError::InvalidTransition`], never a panic and never a silent
//! no-op. Rejection is terminal; a second decision against a rejected
//! proposal fails the same way regardless of which actor retries it.

mod error;
mod lifecycle;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::ProposalError;
pub use lifecycle::{
    assign_transition, decide_transition, progress_transition, validate_submission,
};

/// Grant program component a proposal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Adarsh Gram (model village) component.
    AdarshGram,
    /// Grant-in-aid component.
    GrantInAid,
    /// Hostel construction component.
    Hostel,
}

impl Component {
    /// Stable string form used in the persistent store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdarshGram => "adarsh_gram",
            Self::GrantInAid => "grant_in_aid",
            Self::Hostel => "hostel",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`ProposalError::InvalidComponent`] for unknown strings.
    pub fn parse(value: &str) -> Result<Self, ProposalError> {
        match value {
            "adarsh_gram" => Ok(Self::AdarshGram),
            "grant_in_aid" => Ok(Self::GrantInAid),
            "hostel" => Ok(Self::Hostel),
            other => Err(ProposalError::InvalidComponent {
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a proposal.
///
/// Closed enum: illegal states are unrepresentable, and transitions happen
/// only through [`decide_transition`] and [`assign_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Submitted by a district, waiting on state review.
    Submitted,
    /// Approved by the state, waiting on ministry review.
    ApprovedByState,
    /// Approved by the ministry, waiting on IA assignment.
    ApprovedByMinistry,
    /// Assigned to an implementing agency, waiting on EA assignment.
    AssignedToIa,
    /// Assigned to an executing agency; a work order now exists.
    AssignedToEa,
    /// Work has started against the assigned work order.
    InProgress,
    /// Work finished. Terminal.
    Completed,
    /// Rejected at state review. Terminal.
    RejectedByState,
    /// Rejected at ministry review. Terminal.
    RejectedByMinistry,
}

impl ProposalStatus {
    /// Stable string form used in the persistent store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::ApprovedByState => "approved_by_state",
            Self::ApprovedByMinistry => "approved_by_ministry",
            Self::AssignedToIa => "assigned_to_ia",
            Self::AssignedToEa => "assigned_to_ea",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::RejectedByState => "rejected_by_state",
            Self::RejectedByMinistry => "rejected_by_ministry",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`ProposalError::InvalidStatus`] for unknown strings.
    pub fn parse(value: &str) -> Result<Self, ProposalError> {
        match value {
            "submitted" => Ok(Self::Submitted),
            "approved_by_state" => Ok(Self::ApprovedByState),
            "approved_by_ministry" => Ok(Self::ApprovedByMinistry),
            "assigned_to_ia" => Ok(Self::AssignedToIa),
            "assigned_to_ea" => Ok(Self::AssignedToEa),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "rejected_by_state" => Ok(Self::RejectedByState),
            "rejected_by_ministry" => Ok(Self::RejectedByMinistry),
            other => Err(ProposalError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }

    /// Whether no further transitions are permitted from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::RejectedByState | Self::RejectedByMinistry
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reviewing or assigned actor tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorTier {
    /// State-level reviewer.
    State,
    /// Central ministry reviewer.
    Ministry,
    /// Implementing agency.
    ImplementingAgency,
    /// Executing agency.
    ExecutingAgency,
}

impl ActorTier {
    /// Stable string form used in the persistent store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Ministry => "ministry",
            Self::ImplementingAgency => "implementing_agency",
            Self::ExecutingAgency => "executing_agency",
        }
    }
}

/// Review decision outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Advance the proposal to the next review stage.
    Approve,
    /// Terminate the proposal at the current stage.
    Reject,
}

/// A grant proposal.
///
/// Immutable once the status leaves `Submitted`, except for `status` and
/// the assignment references — the daemon enforces this at the write path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposal identifier (uuid).
    pub id: String,

    /// Human-readable project name.
    pub project_name: String,

    /// Grant component.
    pub component: Component,

    /// Estimated cost in whole rupees. Always positive.
    pub estimated_cost: i64,

    /// District that submitted the proposal.
    pub district_ref: String,

    /// Current lifecycle state.
    pub status: ProposalStatus,

    /// Implementing agency, set by the IA assignment.
    pub implementing_agency_id: Option<String>,

    /// Executing agency, set by the EA assignment.
    pub executing_agency_id: Option<String>,

    /// Nanoseconds since Unix epoch at submission.
    pub created_at_ns: u64,
}
