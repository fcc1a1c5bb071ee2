//! Coherence between the progress-report audit trail and the work order's
//! denormalized snapshot, plus report history pagination and the one-way
//! viewed flag.

use std::sync::Arc;

use grantflow_core::fund::ReleaseTier;
use grantflow_core::proposal::ActorTier;
use grantflow_core::work::{SnapshotError, WorkOrderStatus};
use grantflow_daemon::ledger::FundLedger;
use grantflow_daemon::lifecycle::{NewWorkOrder, ProposalLifecycle};
use grantflow_daemon::notifier::{AudienceRole, ChangeNotifier};
use grantflow_daemon::recorder::{NewReport, ProgressRecorder, RecorderError};
use grantflow_daemon::store::Store;

struct Fixture {
    ledger: FundLedger,
    recorder: ProgressRecorder,
    order_id: String,
}

fn fixture(amount: i64) -> Fixture {
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
            title: "School building".to_string(),
            amount,
            implementing_agency_id: ia.id,
            executing_agency_id: ea.id,
            location: "ranchi".to_string(),
            site_latitude: None,
            site_longitude: None,
            deadline_ns: None,
        })
        .unwrap();

    Fixture {
        ledger: FundLedger::new(Arc::clone(&store), Arc::clone(&notifier)),
        recorder: ProgressRecorder::new(store, notifier),
        order_id: order.id,
    }
}

fn report(order_id: &str, funds_used: i64) -> NewReport {
    NewReport {
        work_order_id: order_id.to_string(),
        reported_by: "EA-1".to_string(),
        funds_used,
        remarks: String::new(),
        evidence: Vec::new(),
    }
}

/// After every submission, the snapshot on the work order equals the
/// newest report in the audit trail.
#[test]
fn test_snapshot_tracks_latest_report() {
    let fx = fixture(1_000_000);
    fx.ledger
        .release(&fx.order_id, ReleaseTier::Ministry, 1_000_000, "SO-1")
        .unwrap();

    for used in [100_000, 250_000, 600_000] {
        let submitted = fx.recorder.submit_report(&report(&fx.order_id, used)).unwrap();
        let order = fx.recorder.work_order(&fx.order_id).unwrap();

        assert_eq!(order.snapshot.progress_percentage, submitted.progress_percentage);
        assert_eq!(order.snapshot.funds_used, submitted.funds_used);
        assert_eq!(order.snapshot.funds_released, submitted.funds_released);
        assert_eq!(order.snapshot.funds_remaining, submitted.funds_remaining);
        assert_eq!(order.snapshot.updated_at_ns, submitted.created_at_ns);

        // Re-scan of the trail agrees with the cache.
        let page = fx.recorder.history(&fx.order_id, None, 1).unwrap();
        assert_eq!(page.reports[0].id, submitted.id);
    }

    let order = fx.recorder.work_order(&fx.order_id).unwrap();
    assert_eq!(order.snapshot.status, WorkOrderStatus::InProgress);
    assert_eq!(order.snapshot.progress_percentage, 60);
}

/// Spending 100% of the authorized amount completes the work order.
#[test]
fn test_full_spend_completes() {
    let fx = fixture(500_000);
    fx.ledger
        .release(&fx.order_id, ReleaseTier::Ministry, 500_000, "SO-1")
        .unwrap();

    let submitted = fx.recorder.submit_report(&report(&fx.order_id, 500_000)).unwrap();
    assert_eq!(submitted.progress_percentage, 100);

    let order = fx.recorder.work_order(&fx.order_id).unwrap();
    assert_eq!(order.snapshot.status, WorkOrderStatus::Completed);
}

/// A report cannot claim more spent than has been released.
#[test]
fn test_used_exceeding_released_rejected() {
    let fx = fixture(1_000_000);
    fx.ledger
        .release(&fx.order_id, ReleaseTier::Ministry, 200_000, "SO-1")
        .unwrap();

    let err = fx
        .recorder
        .submit_report(&report(&fx.order_id, 300_000))
        .unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Snapshot(SnapshotError::UsedExceedsReleased {
            funds_used: 300_000,
            funds_released: 200_000,
        })
    ));

    // Nothing was written.
    let page = fx.recorder.history(&fx.order_id, None, 10).unwrap();
    assert!(page.reports.is_empty());
    let order = fx.recorder.work_order(&fx.order_id).unwrap();
    assert_eq!(order.snapshot.status, WorkOrderStatus::Pending);
}

/// Once completed, a report that would move the order backwards is
/// rejected.
#[test]
fn test_status_regression_rejected() {
    let fx = fixture(300_000);
    fx.ledger
        .release(&fx.order_id, ReleaseTier::Ministry, 300_000, "SO-1")
        .unwrap();
    fx.recorder.submit_report(&report(&fx.order_id, 300_000)).unwrap();

    let err = fx
        .recorder
        .submit_report(&report(&fx.order_id, 150_000))
        .unwrap_err();
    assert!(matches!(
        err,
        RecorderError::StatusRegression {
            from: WorkOrderStatus::Completed,
            to: WorkOrderStatus::InProgress,
        }
    ));

    let order = fx.recorder.work_order(&fx.order_id).unwrap();
    assert_eq!(order.snapshot.status, WorkOrderStatus::Completed);
}

/// The viewed flag flips exactly once; the second call preserves the
/// original timestamp.
#[test]
fn test_mark_viewed_idempotent() {
    let fx = fixture(1_000_000);
    fx.ledger
        .release(&fx.order_id, ReleaseTier::Ministry, 100_000, "SO-1")
        .unwrap();
    let submitted = fx.recorder.submit_report(&report(&fx.order_id, 50_000)).unwrap();
    assert!(!submitted.viewed_by_recipient);

    let changed = fx
        .recorder
        .mark_viewed(&submitted.id, AudienceRole::ImplementingAgency)
        .unwrap();
    assert!(changed, "first call flips the flag");
    let first = fx.recorder.report(&submitted.id).unwrap();
    assert!(first.viewed_by_recipient);
    let viewed_at = first.viewed_at_ns.expect("flip records a timestamp");

    let changed = fx
        .recorder
        .mark_viewed(&submitted.id, AudienceRole::ImplementingAgency)
        .unwrap();
    assert!(!changed, "second call is a no-op");
    let second = fx.recorder.report(&submitted.id).unwrap();
    assert_eq!(second.viewed_at_ns, Some(viewed_at), "timestamp survives re-marking");

    let err = fx
        .recorder
        .mark_viewed("no-such-report", AudienceRole::Ministry)
        .unwrap_err();
    assert!(matches!(err, RecorderError::ReportNotFound { .. }));
}

/// The first page of history reads cleanly without a cursor, on both an
/// empty and a populated trail.
#[test]
fn test_history_first_page_needs_no_cursor() {
    let fx = fixture(1_000_000);

    // Empty trail: a cursorless read succeeds and returns nothing.
    let page = fx.recorder.history(&fx.order_id, None, 10).unwrap();
    assert!(page.reports.is_empty());
    assert!(page.next.is_none());

    fx.ledger
        .release(&fx.order_id, ReleaseTier::Ministry, 1_000_000, "SO-1")
        .unwrap();
    let first = fx.recorder.submit_report(&report(&fx.order_id, 100_000)).unwrap();
    let second = fx.recorder.submit_report(&report(&fx.order_id, 200_000)).unwrap();

    let page = fx.recorder.history(&fx.order_id, None, 10).unwrap();
    assert_eq!(
        page.reports.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        vec![second.id.as_str(), first.id.as_str()],
        "cursorless read returns the full trail newest first"
    );
    assert!(page.next.is_none(), "an unfilled page ends pagination");
}

/// Keyset pagination walks the full trail newest-first without gaps or
/// duplicates.
#[test]
fn test_history_pagination() {
    let fx = fixture(1_000_000);
    fx.ledger
        .release(&fx.order_id, ReleaseTier::Ministry, 1_000_000, "SO-1")
        .unwrap();

    let mut submitted_ids = Vec::new();
    for used in (1..=5).map(|i| i * 100_000) {
        submitted_ids.push(fx.recorder.submit_report(&report(&fx.order_id, used)).unwrap().id);
    }
    submitted_ids.reverse(); // newest first

    let mut walked = Vec::new();
    let mut cursor = None;
    loop {
        let page = fx.recorder.history(&fx.order_id, cursor.as_ref(), 2).unwrap();
        assert!(page.reports.len() <= 2);
        walked.extend(page.reports.iter().map(|r| r.id.clone()));
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(walked, submitted_ids);
}
