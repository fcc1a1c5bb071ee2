//! Tests for fund-release arithmetic.

use proptest::prelude::*;

use super::*;

#[test]
fn test_tier_round_trip() {
    for tier in [
        ReleaseTier::Ministry,
        ReleaseTier::State,
        ReleaseTier::ImplementingAgency,
        ReleaseTier::ExecutingAgency,
    ] {
        assert_eq!(ReleaseTier::parse(tier.as_str()).unwrap(), tier);
    }
}

#[test]
fn test_tier_parse_rejects_unknown() {
    let err = ReleaseTier::parse("district").unwrap_err();
    assert!(matches!(err, FundError::InvalidTier { .. }));
}

#[test]
fn test_amount_must_be_positive() {
    assert!(check_release_amount(1).is_ok());
    assert!(matches!(
        check_release_amount(0),
        Err(FundError::InvalidAmount { amount: 0 })
    ));
    assert!(matches!(
        check_release_amount(-50_000),
        Err(FundError::InvalidAmount { .. })
    ));
}

#[test]
fn test_ceiling_exact_fit_is_allowed() {
    // Releasing exactly up to the ceiling is legal; one rupee more is not.
    assert!(check_ceiling(600_000, 400_000, 1_000_000).is_ok());
    assert!(matches!(
        check_ceiling(600_000, 400_001, 1_000_000),
        Err(FundError::OverAllocation { .. })
    ));
}

#[test]
fn test_over_allocation_reports_figures() {
    let err = check_ceiling(600_000, 500_000, 1_000_000).unwrap_err();
    match err {
        FundError::OverAllocation {
            attempted,
            already_released,
            ceiling,
        } => {
            assert_eq!(attempted, 500_000);
            assert_eq!(already_released, 600_000);
            assert_eq!(ceiling, 1_000_000);
        },
        other => panic!("expected OverAllocation, got {other:?}"),
    }
}

#[test]
fn test_summary_remaining() {
    let summary = LedgerSummary::new(1_000_000, 600_000, 250_000);
    assert_eq!(summary.remaining, 350_000);
}

proptest! {
    /// Any sequence of ceiling-checked releases never exceeds the ceiling.
    #[test]
    fn prop_checked_releases_never_exceed_ceiling(
        ceiling in 1i64..10_000_000,
        amounts in proptest::collection::vec(1i64..5_000_000, 0..32),
    ) {
        let mut released = 0i64;
        for amount in amounts {
            if check_ceiling(released, amount, ceiling).is_ok() {
                released += amount;
            }
        }
        prop_assert!(released <= ceiling);
    }

    /// The ceiling check is a total decision: it either admits the release
    /// or returns `OverAllocation`, and admits exactly when the sum fits.
    #[test]
    fn prop_ceiling_check_matches_sum(
        released in 0i64..10_000_000,
        amount in 1i64..10_000_000,
        ceiling in 0i64..10_000_000,
    ) {
        let fits = released + amount <= ceiling;
        prop_assert_eq!(check_ceiling(released, amount, ceiling).is_ok(), fits);
    }
}
