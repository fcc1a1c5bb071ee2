//! Ledger invariants under concurrent release attempts.
//!
//! Threads hammer a single work order's ceiling; regardless of
//! interleaving, the sum of accepted releases never exceeds the ceiling
//! and installment numbers come out dense and unique.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use grantflow_core::fund::{FundError, ReleaseTier};
use grantflow_core::proposal::ActorTier;
use grantflow_daemon::ledger::{FundLedger, LedgerError};
use grantflow_daemon::lifecycle::{NewWorkOrder, ProposalLifecycle};
use grantflow_daemon::notifier::ChangeNotifier;
use grantflow_daemon::store::Store;
use proptest::prelude::*;

const CEILING: i64 = 1_000_000;

/// In-memory daemon services plus one work order with the test ceiling.
fn setup() -> (Arc<FundLedger>, String) {
    let store = Arc::new(Store::in_memory().unwrap());
    let notifier = Arc::new(ChangeNotifier::new(Arc::clone(&store), 64));
    let lifecycle = ProposalLifecycle::new(Arc::clone(&store), Arc::clone(&notifier));

    let ia = lifecycle
        .register_agency("IA", ActorTier::ImplementingAgency, Some("IA-1"), None)
        .unwrap();
    let ea = lifecycle
        .register_agency("EA", ActorTier::ExecutingAgency, Some("EA-1"), None)
        .unwrap();
    let order = lifecycle
        .create_village_work_order(&NewWorkOrder {
            title: "Bridge".to_string(),
            amount: CEILING,
            implementing_agency_id: ia.id,
            executing_agency_id: ea.id,
            location: "ranchi".to_string(),
            site_latitude: None,
            site_longitude: None,
            deadline_ns: None,
        })
        .unwrap();

    let ledger = Arc::new(FundLedger::new(store, notifier));
    (ledger, order.id)
}

/// Eight writers race forty releases whose total would be six times the
/// ceiling; the accepted subset never breaches it.
#[test]
fn test_concurrent_releases_never_exceed_ceiling() {
    let (ledger, order_id) = setup();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 5;
    const AMOUNT: i64 = 150_000;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            let order_id = order_id.clone();
            thread::spawn(move || {
                let mut accepted = 0_u32;
                for i in 0..PER_THREAD {
                    let result = ledger.release(
                        &order_id,
                        ReleaseTier::State,
                        AMOUNT,
                        &format!("SO-{t}-{i}"),
                    );
                    match result {
                        Ok(_) => accepted += 1,
                        Err(LedgerError::Fund(FundError::OverAllocation { .. })) => {},
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
                accepted
            })
        })
        .collect();

    let accepted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let summary = ledger.summarize(&order_id).unwrap();
    assert!(
        summary.released <= CEILING,
        "released {} exceeds ceiling {CEILING}",
        summary.released
    );
    assert_eq!(summary.released, i64::from(accepted) * AMOUNT);
    // With 150,000 per installment the winners fill 900,000 exactly.
    assert_eq!(summary.released, 900_000);
}

/// Installment numbers are dense, unique, and ordered regardless of which
/// thread won each slot.
#[test]
fn test_installment_numbers_dense_and_unique() {
    let (ledger, order_id) = setup();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            let order_id = order_id.clone();
            thread::spawn(move || {
                for i in 0..3 {
                    ledger
                        .release(&order_id, ReleaseTier::Ministry, 10_000, &format!("SO-{t}-{i}"))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let releases = ledger.releases(&order_id).unwrap();
    assert_eq!(releases.len(), 12);
    let numbers: HashSet<u32> = releases.iter().map(|r| r.installment_number).collect();
    assert_eq!(numbers, (1..=12).collect::<HashSet<u32>>());
}

/// Per-tier sub-ledgers partition the full ledger.
#[test]
fn test_tier_sub_ledgers_partition() {
    let (ledger, order_id) = setup();
    ledger
        .release(&order_id, ReleaseTier::Ministry, 400_000, "SO-1")
        .unwrap();
    ledger
        .release(&order_id, ReleaseTier::State, 300_000, "SO-2")
        .unwrap();
    ledger
        .release(&order_id, ReleaseTier::Ministry, 200_000, "SO-3")
        .unwrap();

    let ministry = ledger
        .releases_for_tier(&order_id, ReleaseTier::Ministry)
        .unwrap();
    let state = ledger.releases_for_tier(&order_id, ReleaseTier::State).unwrap();
    assert_eq!(ministry.len(), 2);
    assert_eq!(state.len(), 1);
    assert_eq!(
        ministry.iter().chain(&state).map(|r| r.amount).sum::<i64>(),
        ledger.summarize(&order_id).unwrap().released
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any sequence of release attempts leaves the ledger at or under the
    /// ceiling, and a release is rejected only when it would breach it.
    #[test]
    fn prop_release_sequences_respect_ceiling(amounts in prop::collection::vec(1_i64..400_000, 1..12)) {
        let (ledger, order_id) = setup();
        let mut expected = 0_i64;
        for (i, amount) in amounts.iter().enumerate() {
            match ledger.release(&order_id, ReleaseTier::State, *amount, &format!("SO-{i}")) {
                Ok(summary) => {
                    expected += amount;
                    prop_assert_eq!(summary.released, expected);
                },
                Err(LedgerError::Fund(FundError::OverAllocation { .. })) => {
                    prop_assert!(expected + amount > CEILING);
                },
                Err(other) => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
            }
        }
        prop_assert!(ledger.summarize(&order_id).unwrap().released <= CEILING);
    }
}
