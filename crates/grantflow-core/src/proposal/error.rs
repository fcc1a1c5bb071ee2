//! Proposal module error types.

use std::fmt;

use thiserror::Error;

use super::{ActorTier, Outcome, ProposalStatus};

/// Errors that can occur in the proposal lifecycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProposalError {
    /// Submission field failed shape/range validation.
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The `(state, tier, outcome)` combination is not in the transition
    /// table. `outcome` is `None` for assignment attempts.
    #[error("invalid transition from {from} by {tier} ({})", DisplayOutcome(*.outcome))]
    InvalidTransition {
        /// The proposal's current status.
        from: ProposalStatus,
        /// The acting tier.
        tier: ActorTier,
        /// The decision outcome, or `None` for an assignment.
        outcome: Option<Outcome>,
    },

    /// Unknown status string in the persistent store.
    #[error("invalid proposal status: {value}")]
    InvalidStatus {
        /// The unrecognized status string.
        value: String,
    },

    /// Unknown component string in the persistent store.
    #[error("invalid component: {value}")]
    InvalidComponent {
        /// The unrecognized component string.
        value: String,
    },
}

/// Display helper for the optional outcome in `InvalidTransition`.
struct DisplayOutcome(Option<Outcome>);

impl fmt::Display for DisplayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(Outcome::Approve) => f.write_str("approve"),
            Some(Outcome::Reject) => f.write_str("reject"),
            None => f.write_str("assign"),
        }
    }
}

impl fmt::Display for ActorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
