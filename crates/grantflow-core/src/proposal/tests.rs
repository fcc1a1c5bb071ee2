//! Tests for the proposal approval state machine.

use super::*;

const ALL_STATUSES: [ProposalStatus; 9] = [
    ProposalStatus::Submitted,
    ProposalStatus::ApprovedByState,
    ProposalStatus::ApprovedByMinistry,
    ProposalStatus::AssignedToIa,
    ProposalStatus::AssignedToEa,
    ProposalStatus::InProgress,
    ProposalStatus::Completed,
    ProposalStatus::RejectedByState,
    ProposalStatus::RejectedByMinistry,
];

const ALL_TIERS: [ActorTier; 4] = [
    ActorTier::State,
    ActorTier::Ministry,
    ActorTier::ImplementingAgency,
    ActorTier::ExecutingAgency,
];

#[test]
fn test_happy_path_to_assignment() {
    let s = decide_transition(ProposalStatus::Submitted, ActorTier::State, Outcome::Approve)
        .unwrap();
    assert_eq!(s, ProposalStatus::ApprovedByState);

    let s = decide_transition(s, ActorTier::Ministry, Outcome::Approve).unwrap();
    assert_eq!(s, ProposalStatus::ApprovedByMinistry);

    let s = assign_transition(s, ActorTier::ImplementingAgency).unwrap();
    assert_eq!(s, ProposalStatus::AssignedToIa);

    let s = assign_transition(s, ActorTier::ExecutingAgency).unwrap();
    assert_eq!(s, ProposalStatus::AssignedToEa);
}

#[test]
fn test_rejection_paths() {
    assert_eq!(
        decide_transition(ProposalStatus::Submitted, ActorTier::State, Outcome::Reject).unwrap(),
        ProposalStatus::RejectedByState
    );
    assert_eq!(
        decide_transition(
            ProposalStatus::ApprovedByState,
            ActorTier::Ministry,
            Outcome::Reject
        )
        .unwrap(),
        ProposalStatus::RejectedByMinistry
    );
}

#[test]
fn test_tier_must_match_pending_stage() {
    // Ministry cannot review a freshly submitted proposal.
    assert!(matches!(
        decide_transition(ProposalStatus::Submitted, ActorTier::Ministry, Outcome::Approve),
        Err(ProposalError::InvalidTransition { .. })
    ));
    // State cannot re-review its own approval.
    assert!(matches!(
        decide_transition(ProposalStatus::ApprovedByState, ActorTier::State, Outcome::Approve),
        Err(ProposalError::InvalidTransition { .. })
    ));
}

#[test]
fn test_rejection_is_terminal() {
    for rejected in [
        ProposalStatus::RejectedByState,
        ProposalStatus::RejectedByMinistry,
    ] {
        assert!(rejected.is_terminal());
        for tier in ALL_TIERS {
            for outcome in [Outcome::Approve, Outcome::Reject] {
                assert!(
                    decide_transition(rejected, tier, outcome).is_err(),
                    "decision on {rejected} by {tier} must fail"
                );
            }
            assert!(assign_transition(rejected, tier).is_err());
        }
    }
}

/// The transition table is a total function: every combination either
/// appears in the table or fails with `InvalidTransition`, deterministically.
#[test]
fn test_decide_is_total_and_deterministic() {
    let legal: &[(ProposalStatus, ActorTier, Outcome, ProposalStatus)] = &[
        (
            ProposalStatus::Submitted,
            ActorTier::State,
            Outcome::Approve,
            ProposalStatus::ApprovedByState,
        ),
        (
            ProposalStatus::Submitted,
            ActorTier::State,
            Outcome::Reject,
            ProposalStatus::RejectedByState,
        ),
        (
            ProposalStatus::ApprovedByState,
            ActorTier::Ministry,
            Outcome::Approve,
            ProposalStatus::ApprovedByMinistry,
        ),
        (
            ProposalStatus::ApprovedByState,
            ActorTier::Ministry,
            Outcome::Reject,
            ProposalStatus::RejectedByMinistry,
        ),
    ];

    for status in ALL_STATUSES {
        for tier in ALL_TIERS {
            for outcome in [Outcome::Approve, Outcome::Reject] {
                let expected = legal
                    .iter()
                    .find(|(s, t, o, _)| *s == status && *t == tier && *o == outcome)
                    .map(|(_, _, _, next)| *next);

                let first = decide_transition(status, tier, outcome);
                let second = decide_transition(status, tier, outcome);

                match (expected, &first) {
                    (Some(next), Ok(got)) => assert_eq!(*got, next),
                    (None, Err(ProposalError::InvalidTransition { .. })) => {},
                    (want, got) => {
                        panic!("({status}, {tier}, {outcome:?}): want {want:?}, got {got:?}")
                    },
                }
                // Determinism: same inputs, same classification.
                assert_eq!(first.is_ok(), second.is_ok());
            }
        }
    }
}

#[test]
fn test_assign_only_from_ministry_approval_chain() {
    for status in ALL_STATUSES {
        for tier in ALL_TIERS {
            let legal = matches!(
                (status, tier),
                (ProposalStatus::ApprovedByMinistry, ActorTier::ImplementingAgency)
                    | (ProposalStatus::AssignedToIa, ActorTier::ExecutingAgency)
            );
            assert_eq!(assign_transition(status, tier).is_ok(), legal);
        }
    }
}

#[test]
fn test_progress_advances_but_never_rewinds() {
    use crate::work::WorkOrderStatus;

    assert_eq!(
        progress_transition(ProposalStatus::AssignedToEa, WorkOrderStatus::InProgress),
        Some(ProposalStatus::InProgress)
    );
    assert_eq!(
        progress_transition(ProposalStatus::AssignedToEa, WorkOrderStatus::Completed),
        Some(ProposalStatus::Completed)
    );
    assert_eq!(
        progress_transition(ProposalStatus::InProgress, WorkOrderStatus::Completed),
        Some(ProposalStatus::Completed)
    );

    // Already in sync, or the work order slipped back: no change.
    assert_eq!(
        progress_transition(ProposalStatus::InProgress, WorkOrderStatus::InProgress),
        None
    );
    assert_eq!(
        progress_transition(ProposalStatus::Completed, WorkOrderStatus::InProgress),
        None
    );

    // Only post-assignment statuses ever move on progress.
    for status in ALL_STATUSES {
        if matches!(
            status,
            ProposalStatus::AssignedToEa | ProposalStatus::InProgress
        ) {
            continue;
        }
        for work_status in [
            WorkOrderStatus::Pending,
            WorkOrderStatus::InProgress,
            WorkOrderStatus::Completed,
        ] {
            assert_eq!(progress_transition(status, work_status), None);
        }
    }
}

#[test]
fn test_validate_submission() {
    assert!(validate_submission("Hostel Block A", 2_500_000, "district-11").is_ok());
    assert!(matches!(
        validate_submission("  ", 2_500_000, "district-11"),
        Err(ProposalError::Validation { field: "project_name", .. })
    ));
    assert!(matches!(
        validate_submission("Hostel Block A", 0, "district-11"),
        Err(ProposalError::Validation { field: "estimated_cost", .. })
    ));
    assert!(matches!(
        validate_submission("Hostel Block A", 2_500_000, ""),
        Err(ProposalError::Validation { field: "district_ref", .. })
    ));
}

#[test]
fn test_status_string_round_trip() {
    for status in ALL_STATUSES {
        assert_eq!(ProposalStatus::parse(status.as_str()).unwrap(), status);
    }
    assert!(ProposalStatus::parse("PENDING").is_err());
}
