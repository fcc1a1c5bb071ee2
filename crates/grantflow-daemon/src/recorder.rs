//! Progress-report audit trail and work-order snapshot maintenance.
//!
//! Reports are append-only: each submission adds a row, and the work
//! order's denormalized snapshot is refreshed from the latest report
//! re-read inside the same transaction. Tie-breaking on `(created_at_ns
//! DESC, id DESC)` keeps the refresh deterministic even when two reports
//! land in the same nanosecond.
//!
//! # Evidence re-verification
//!
//! Client devices stamp and verify photos at capture time, but the
//! recorder never trusts those figures: each photo's distance to the
//! work-order site is recomputed here from the stored site coordinates,
//! and the persisted `verified` flag reflects the server-side result. A
//! work order without surveyed coordinates records every photo as
//! unverified.

use std::sync::Arc;

use grantflow_core::evidence::{EvidencePhoto, ObjectRef};
use grantflow_core::geo::{GeoPoint, SITE_VERIFICATION_RADIUS_M, verify_proximity};
use grantflow_core::now_ns;
use grantflow_core::proposal::{ProposalError, ProposalStatus, progress_transition};
use grantflow_core::work::{SnapshotError, WorkOrder, WorkOrderStatus, WorkSnapshot, compute_snapshot};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notifier::{
    AudienceRole, ChangeNotifier, ChangeOp, EntityKind, NewNotification, NotifierError, Priority,
};
use crate::store::{Store, StoreError};

/// Errors that can occur in the progress recorder.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecorderError {
    /// No work order exists with the given id.
    #[error("work order not found: {id}")]
    WorkOrderNotFound {
        /// The missing work order id.
        id: String,
    },

    /// No progress report exists with the given id.
    #[error("progress report not found: {id}")]
    ReportNotFound {
        /// The missing report id.
        id: String,
    },

    /// Snapshot computation rejected the reported figures.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// A stored proposal row failed domain validation.
    #[error(transparent)]
    Proposal(#[from] ProposalError),

    /// The report would move the work order backwards in status.
    #[error("status regression rejected: {from} -> {to}")]
    StatusRegression {
        /// Current work-order status.
        from: WorkOrderStatus,
        /// Status the report would produce.
        to: WorkOrderStatus,
    },

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Notification persistence failure.
    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

impl From<rusqlite::Error> for RecorderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// A persisted progress report with its attached evidence.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    /// Report identifier (uuid).
    pub id: String,
    /// Work order reported on.
    pub work_order_id: String,
    /// Reporting actor (executing agency id or operator handle).
    pub reported_by: String,
    /// Percentage derived from the reported figures, 0-100.
    pub progress_percentage: u8,
    /// Funds released at report time, whole rupees.
    pub funds_released: i64,
    /// Funds used as reported, whole rupees.
    pub funds_used: i64,
    /// `funds_released - funds_used`.
    pub funds_remaining: i64,
    /// Free-text remarks.
    pub remarks: String,
    /// One-way viewed flag, set by the recipient tier.
    pub viewed_by_recipient: bool,
    /// When the flag flipped, nanoseconds since Unix epoch.
    pub viewed_at_ns: Option<u64>,
    /// Submission time, nanoseconds since Unix epoch.
    pub created_at_ns: u64,
    /// Photos attached to this report, with server-side verification.
    pub evidence: Vec<EvidencePhoto>,
}

/// Fields of a report as submitted by the executing agency.
#[derive(Debug, Clone)]
pub struct NewReport {
    /// Work order reported on.
    pub work_order_id: String,
    /// Reporting actor.
    pub reported_by: String,
    /// Cumulative funds used, whole rupees.
    pub funds_used: i64,
    /// Free-text remarks.
    pub remarks: String,
    /// Photos captured for this report. Location and verification fields
    /// are treated as claims and re-verified server-side.
    pub evidence: Vec<EvidencePhoto>,
}

/// Restartable keyset cursor into a work order's report history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportCursor {
    /// `created_at_ns` of the last report returned.
    pub created_at_ns: u64,
    /// Id of the last report returned, the tie-breaker.
    pub id: String,
}

/// One page of descending report history.
#[derive(Debug)]
pub struct ReportPage {
    /// Reports, newest first.
    pub reports: Vec<ProgressReport>,
    /// Cursor for the next page, `None` when exhausted.
    pub next: Option<ReportCursor>,
}

/// The progress-report service.
pub struct ProgressRecorder {
    store: Arc<Store>,
    notifier: Arc<ChangeNotifier>,
    verification_radius_m: f64,
}

impl ProgressRecorder {
    /// Creates the service with the default 500 m verification radius.
    #[must_use]
    pub fn new(store: Arc<Store>, notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            store,
            notifier,
            verification_radius_m: SITE_VERIFICATION_RADIUS_M,
        }
    }

    /// Overrides the verification radius (metres).
    #[must_use]
    pub fn with_verification_radius(mut self, radius_m: f64) -> Self {
        self.verification_radius_m = radius_m;
        self
    }

    /// Submits a progress report and refreshes the work order's snapshot,
    /// all in one transaction.
    ///
    /// Funds released is read from the fund ledger inside the same
    /// transaction, never taken from the caller. The snapshot written to
    /// the work order comes from re-reading the latest report after the
    /// insert, so out-of-order submissions cannot regress the cache. When
    /// the work order was created from a proposal, the proposal's status
    /// follows the derived status (`AssignedToEa` to `InProgress` to
    /// `Completed`) in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`RecorderError::WorkOrderNotFound`] for an unknown work order
    /// - [`SnapshotError`] variants when the figures fail validation
    /// - [`RecorderError::StatusRegression`] when the computed status
    ///   ranks below the work order's current status
    pub fn submit_report(&self, new: &NewReport) -> Result<ProgressReport, RecorderError> {
        let reported_at_ns = now_ns();
        let (report, advanced) = self.store.with_write_tx(
            |tx| {
                let order = load_work_order(tx, &new.work_order_id)?;
                let released = released_total(tx, &new.work_order_id)?;
                let snapshot =
                    compute_snapshot(order.amount, released, new.funds_used, reported_at_ns)
                        .map_err(RecorderError::from)?;
                if snapshot.status.rank() < order.snapshot.status.rank() {
                    return Err(RecorderError::StatusRegression {
                        from: order.snapshot.status,
                        to: snapshot.status,
                    });
                }

                let site = site_point(&order);
                let evidence: Vec<EvidencePhoto> = new
                    .evidence
                    .iter()
                    .map(|photo| reverify_photo(photo, site, self.verification_radius_m))
                    .collect();

                let report = ProgressReport {
                    id: Uuid::new_v4().to_string(),
                    work_order_id: new.work_order_id.clone(),
                    reported_by: new.reported_by.clone(),
                    progress_percentage: snapshot.progress_percentage,
                    funds_released: snapshot.funds_released,
                    funds_used: snapshot.funds_used,
                    funds_remaining: snapshot.funds_remaining,
                    remarks: new.remarks.clone(),
                    viewed_by_recipient: false,
                    viewed_at_ns: None,
                    created_at_ns: reported_at_ns,
                    evidence,
                };

                tx.execute(
                    "INSERT INTO progress_reports
                         (id, work_order_id, reported_by, progress_percentage,
                          funds_released, funds_used, funds_remaining, remarks,
                          created_at_ns)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        report.id,
                        report.work_order_id,
                        report.reported_by,
                        report.progress_percentage,
                        report.funds_released,
                        report.funds_used,
                        report.funds_remaining,
                        report.remarks,
                        report.created_at_ns,
                    ],
                )
                .map_err(RecorderError::from)?;

                for photo in &report.evidence {
                    tx.execute(
                        "INSERT INTO evidence_photos
                             (id, report_id, object_ref, captured_at_ns,
                              latitude, longitude, distance_to_site_m, verified)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            Uuid::new_v4().to_string(),
                            report.id,
                            photo.object_ref.0,
                            photo.captured_at_ns,
                            photo.latitude,
                            photo.longitude,
                            photo.distance_to_site_m,
                            photo.verified,
                        ],
                    )
                    .map_err(RecorderError::from)?;
                }

                let derived = refresh_snapshot(tx, &new.work_order_id)?;
                let advanced = match (order.proposal_id.as_deref(), derived) {
                    (Some(proposal_id), Some(status)) => advance_proposal(tx, proposal_id, status)?
                        .map(|next| (proposal_id.to_string(), next)),
                    _ => None,
                };

                let unverified = report.evidence.iter().filter(|p| !p.verified).count();
                self.notifier.persist(
                    tx,
                    &NewNotification {
                        audience_role: AudienceRole::ImplementingAgency,
                        title: "Progress report submitted".to_string(),
                        message: format!(
                            "{}: {}% complete, {} photo(s), {} unverified",
                            order.title,
                            report.progress_percentage,
                            report.evidence.len(),
                            unverified,
                        ),
                        priority: if snapshot.status == WorkOrderStatus::Completed {
                            Priority::High
                        } else {
                            Priority::Normal
                        },
                    },
                )?;

                Ok((report, advanced))
            },
            RecorderError::from,
        )?;

        let unverified = report.evidence.iter().filter(|p| !p.verified).count();
        if unverified > 0 {
            warn!(
                report_id = %report.id,
                work_order_id = %report.work_order_id,
                unverified,
                "report carries unverified evidence"
            );
        }
        info!(
            report_id = %report.id,
            work_order_id = %report.work_order_id,
            progress = report.progress_percentage,
            "progress report recorded"
        );
        self.notifier.publish(
            EntityKind::ProgressReport,
            &report.id,
            ChangeOp::Insert,
            Some(report.work_order_id.clone()),
        );
        self.notifier.publish(
            EntityKind::WorkOrder,
            &report.work_order_id,
            ChangeOp::Update,
            Some(report.work_order_id.clone()),
        );
        if let Some((proposal_id, next)) = advanced {
            info!(
                proposal_id = %proposal_id,
                status = next.as_str(),
                "proposal advanced by work-order progress"
            );
            self.notifier.publish(
                EntityKind::Proposal,
                proposal_id,
                ChangeOp::Update,
                Some(report.work_order_id.clone()),
            );
        }
        Ok(report)
    }

    /// Flips the viewed flag on a report, returning whether this call
    /// changed it. One-way and idempotent: a second call is a no-op that
    /// preserves the first `viewed_at_ns`.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::ReportNotFound`] for an unknown report.
    pub fn mark_viewed(
        &self,
        report_id: &str,
        viewer_role: AudienceRole,
    ) -> Result<bool, RecorderError> {
        let (work_order_id, changed) = self.store.with_write_tx(
            |tx| {
                let work_order_id: Option<String> = tx
                    .query_row(
                        "SELECT work_order_id FROM progress_reports WHERE id = ?1",
                        params![report_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(RecorderError::from)?;
                let work_order_id =
                    work_order_id.ok_or_else(|| RecorderError::ReportNotFound {
                        id: report_id.to_string(),
                    })?;

                let changed = tx
                    .execute(
                        "UPDATE progress_reports
                         SET viewed_by_recipient = 1, viewed_at_ns = ?1
                         WHERE id = ?2 AND viewed_by_recipient = 0",
                        params![now_ns(), report_id],
                    )
                    .map_err(RecorderError::from)?
                    > 0;

                Ok((work_order_id, changed))
            },
            RecorderError::from,
        )?;

        if changed {
            info!(
                report_id,
                viewer_role = viewer_role.as_str(),
                "report marked viewed"
            );
            self.notifier.publish(
                EntityKind::ProgressReport,
                report_id,
                ChangeOp::Update,
                Some(work_order_id),
            );
        }
        Ok(changed)
    }

    /// Returns one page of report history for a work order, newest first.
    ///
    /// The cursor is a `(created_at_ns, id)` keyset, so pagination is
    /// restartable and unaffected by reports inserted between calls.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn history(
        &self,
        work_order_id: &str,
        cursor: Option<&ReportCursor>,
        limit: usize,
    ) -> Result<ReportPage, RecorderError> {
        self.store.with_conn(|conn| {
            // NULL keyset parameters short-circuit the predicate, so the
            // first page carries no bound at all.
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM progress_reports
                     WHERE work_order_id = ?1
                       AND (?2 IS NULL
                            OR created_at_ns < ?2
                            OR (created_at_ns = ?2 AND id < ?3))
                     ORDER BY created_at_ns DESC, id DESC
                     LIMIT ?4",
                )
                .map_err(RecorderError::from)?;
            let ids = stmt
                .query_map(
                    params![
                        work_order_id,
                        cursor.map(|c| c.created_at_ns),
                        cursor.map(|c| c.id.as_str()),
                        limit as i64,
                    ],
                    |row| row.get::<_, String>(0),
                )
                .map_err(RecorderError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(RecorderError::from)?;

            let mut reports = Vec::with_capacity(ids.len());
            for id in ids {
                reports.push(load_report(conn, &id)?);
            }
            let next = (reports.len() == limit)
                .then(|| reports.last())
                .flatten()
                .map(|last| ReportCursor {
                    created_at_ns: last.created_at_ns,
                    id: last.id.clone(),
                });
            Ok(ReportPage { reports, next })
        })
    }

    /// Loads a single report with its evidence.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::ReportNotFound`] if no row exists.
    pub fn report(&self, report_id: &str) -> Result<ProgressReport, RecorderError> {
        self.store.with_conn(|conn| load_report(conn, report_id))
    }

    /// Loads a work order with its current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::WorkOrderNotFound`] if no row exists.
    pub fn work_order(&self, work_order_id: &str) -> Result<WorkOrder, RecorderError> {
        self.store
            .with_conn(|conn| load_work_order(conn, work_order_id))
    }
}

/// Recomputes a photo's verification against the stored site coordinates.
///
/// Client-claimed distance and verified fields are discarded. A missing
/// site survey or missing fix yields unverified with no distance.
fn reverify_photo(photo: &EvidencePhoto, site: Option<GeoPoint>, radius_m: f64) -> EvidencePhoto {
    let capture = match (photo.latitude, photo.longitude) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon).ok(),
        _ => None,
    };
    let verification = match site {
        Some(site) => verify_proximity(capture, site, radius_m),
        None => grantflow_core::geo::SiteVerification::UNAVAILABLE,
    };
    EvidencePhoto {
        object_ref: ObjectRef(photo.object_ref.0.clone()),
        captured_at_ns: photo.captured_at_ns,
        latitude: capture.map(|p| p.latitude),
        longitude: capture.map(|p| p.longitude),
        distance_to_site_m: verification.distance_m,
        verified: verification.verified,
    }
}

/// Surveyed site point of a work order, when both coordinates are present
/// and in range.
fn site_point(order: &WorkOrder) -> Option<GeoPoint> {
    match (order.site_latitude, order.site_longitude) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon).ok(),
        _ => None,
    }
}

/// Loads a work order row.
pub(crate) fn load_work_order(
    conn: &Connection,
    work_order_id: &str,
) -> Result<WorkOrder, RecorderError> {
    conn.query_row(
        "SELECT id, proposal_id, title, amount, implementing_agency_id,
                executing_agency_id, location, site_latitude, site_longitude,
                deadline_ns, status, progress_percentage, funds_released,
                funds_used, funds_remaining, snapshot_updated_at_ns, created_at_ns
         FROM work_orders WHERE id = ?1",
        params![work_order_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, Option<f64>>(8)?,
                row.get::<_, Option<u64>>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, u8>(11)?,
                row.get::<_, i64>(12)?,
                row.get::<_, i64>(13)?,
                row.get::<_, i64>(14)?,
                row.get::<_, u64>(15)?,
                row.get::<_, u64>(16)?,
            ))
        },
    )
    .optional()?
    .map_or_else(
        || {
            Err(RecorderError::WorkOrderNotFound {
                id: work_order_id.to_string(),
            })
        },
        |row| {
            let (
                id,
                proposal_id,
                title,
                amount,
                implementing_agency_id,
                executing_agency_id,
                location,
                site_latitude,
                site_longitude,
                deadline_ns,
                status,
                progress_percentage,
                funds_released,
                funds_used,
                funds_remaining,
                snapshot_updated_at_ns,
                created_at_ns,
            ) = row;
            Ok(WorkOrder {
                id,
                proposal_id,
                title,
                amount,
                implementing_agency_id,
                executing_agency_id,
                location,
                site_latitude,
                site_longitude,
                deadline_ns,
                snapshot: WorkSnapshot {
                    status: WorkOrderStatus::parse(&status)?,
                    progress_percentage,
                    funds_released,
                    funds_used,
                    funds_remaining,
                    updated_at_ns: snapshot_updated_at_ns,
                },
                created_at_ns,
            })
        },
    )
}

/// Sum of every release for the work order, across tiers.
fn released_total(conn: &Connection, work_order_id: &str) -> Result<i64, RecorderError> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM fund_releases WHERE work_order_id = ?1",
        params![work_order_id],
        |row| row.get(0),
    )
    .map_err(RecorderError::from)
}

/// Loads a report row with its evidence.
fn load_report(conn: &Connection, report_id: &str) -> Result<ProgressReport, RecorderError> {
    let mut report = conn
        .query_row(
            "SELECT id, work_order_id, reported_by, progress_percentage,
                    funds_released, funds_used, funds_remaining, remarks,
                    viewed_by_recipient, viewed_at_ns, created_at_ns
             FROM progress_reports WHERE id = ?1",
            params![report_id],
            |row| {
                Ok(ProgressReport {
                    id: row.get(0)?,
                    work_order_id: row.get(1)?,
                    reported_by: row.get(2)?,
                    progress_percentage: row.get(3)?,
                    funds_released: row.get(4)?,
                    funds_used: row.get(5)?,
                    funds_remaining: row.get(6)?,
                    remarks: row.get(7)?,
                    viewed_by_recipient: row.get(8)?,
                    viewed_at_ns: row.get(9)?,
                    created_at_ns: row.get(10)?,
                    evidence: Vec::new(),
                })
            },
        )
        .optional()?
        .ok_or_else(|| RecorderError::ReportNotFound {
            id: report_id.to_string(),
        })?;

    let mut stmt = conn
        .prepare(
            "SELECT object_ref, captured_at_ns, latitude, longitude,
                    distance_to_site_m, verified
             FROM evidence_photos WHERE report_id = ?1
             ORDER BY captured_at_ns, object_ref",
        )
        .map_err(RecorderError::from)?;
    report.evidence = stmt
        .query_map(params![report_id], |row| {
            Ok(EvidencePhoto {
                object_ref: ObjectRef(row.get(0)?),
                captured_at_ns: row.get(1)?,
                latitude: row.get(2)?,
                longitude: row.get(3)?,
                distance_to_site_m: row.get(4)?,
                verified: row.get(5)?,
            })
        })
        .map_err(RecorderError::from)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(RecorderError::from)?;

    Ok(report)
}

/// Refreshes the work order's denormalized snapshot from the latest
/// report, if any. Idempotent: re-running against the same rows writes
/// the same values.
fn refresh_snapshot(
    tx: &Transaction<'_>,
    work_order_id: &str,
) -> Result<Option<WorkOrderStatus>, RecorderError> {
    let latest = tx
        .query_row(
            "SELECT progress_percentage, funds_released, funds_used,
                    funds_remaining, created_at_ns
             FROM progress_reports WHERE work_order_id = ?1
             ORDER BY created_at_ns DESC, id DESC LIMIT 1",
            params![work_order_id],
            |row| {
                Ok((
                    row.get::<_, u8>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, u64>(4)?,
                ))
            },
        )
        .optional()
        .map_err(RecorderError::from)?;

    let Some((progress, released, used, remaining, created_at_ns)) = latest else {
        return Ok(None);
    };
    let status = if progress >= 100 {
        WorkOrderStatus::Completed
    } else {
        WorkOrderStatus::InProgress
    };
    tx.execute(
        "UPDATE work_orders
         SET status = ?1, progress_percentage = ?2, funds_released = ?3,
             funds_used = ?4, funds_remaining = ?5, snapshot_updated_at_ns = ?6
         WHERE id = ?7",
        params![
            status.as_str(),
            progress,
            released,
            used,
            remaining,
            created_at_ns,
            work_order_id,
        ],
    )
    .map_err(RecorderError::from)?;
    Ok(Some(status))
}

/// Moves a proposal forward when its linked work order's progress implies
/// it. Applies [`progress_transition`], so the update is one-way and a
/// no-op for any status outside the execution phase.
fn advance_proposal(
    tx: &Transaction<'_>,
    proposal_id: &str,
    work_status: WorkOrderStatus,
) -> Result<Option<ProposalStatus>, RecorderError> {
    let current: Option<String> = tx
        .query_row(
            "SELECT status FROM proposals WHERE id = ?1",
            params![proposal_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(RecorderError::from)?;
    let Some(current) = current else {
        return Ok(None);
    };
    let Some(next) = progress_transition(ProposalStatus::parse(&current)?, work_status) else {
        return Ok(None);
    };
    tx.execute(
        "UPDATE proposals SET status = ?1 WHERE id = ?2",
        params![next.as_str(), proposal_id],
    )
    .map_err(RecorderError::from)?;
    Ok(Some(next))
}
