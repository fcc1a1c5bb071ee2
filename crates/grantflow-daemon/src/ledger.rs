//! Fund ledger service: ceiling-bounded installment releases.
//!
//! Releases are appended inside one IMMEDIATE transaction that re-reads
//! the ceiling and the aggregate of prior releases before inserting, so
//! concurrent releases against the same work order serialize on the check
//! — there is no read-then-write gap for a second writer to slip through.
//! The `UNIQUE (work_order_id, installment_number)` constraint is the
//! schema-level backstop: even a hypothetical unserialized append cannot
//! assign the same installment number twice.
//!
//! Tier sub-ledgers are independent views of the same append-only table;
//! the ceiling check always aggregates across **all** tiers.

use std::sync::Arc;

use grantflow_core::fund::{
    FundError, FundRelease, LedgerSummary, ReleaseTier, check_ceiling, check_release_amount,
};
use grantflow_core::now_ns;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::notifier::{
    AudienceRole, ChangeNotifier, ChangeOp, EntityKind, NewNotification, NotifierError, Priority,
};
use crate::store::{Store, StoreError};

/// Errors that can occur in the fund ledger.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Domain validation failure (bad amount, over-allocation).
    #[error(transparent)]
    Fund(#[from] FundError),

    /// No work order exists with the given id.
    #[error("work order not found: {id}")]
    WorkOrderNotFound {
        /// The missing work order id.
        id: String,
    },

    /// Storage failure, including exhausted concurrency retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Notification persistence failure.
    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// One item of a batch release.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    /// Work order to release against.
    pub work_order_id: String,
    /// Issuing tier.
    pub tier: ReleaseTier,
    /// Amount in whole rupees.
    pub amount: i64,
    /// Sanction order reference.
    pub sanction_order_no: String,
}

/// Per-item outcome of a batch release.
///
/// Batch failures are reported item by item so the caller can retry only
/// the failed subset; one bad item never rolls back its siblings.
#[derive(Debug)]
pub struct BatchItemOutcome {
    /// The work order the item targeted.
    pub work_order_id: String,
    /// The item's result.
    pub result: Result<LedgerSummary, LedgerError>,
}

/// The fund ledger service.
pub struct FundLedger {
    store: Arc<Store>,
    notifier: Arc<ChangeNotifier>,
}

impl FundLedger {
    /// Creates the service over the shared store and notifier.
    #[must_use]
    pub fn new(store: Arc<Store>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Appends a fund release, returning the updated ledger summary.
    ///
    /// The ceiling check, installment numbering, insert, and notification
    /// all happen in a single transaction.
    ///
    /// # Errors
    ///
    /// - [`FundError::InvalidAmount`] for a non-positive amount
    /// - [`FundError::OverAllocation`] past the work order's ceiling
    /// - [`LedgerError::WorkOrderNotFound`] for an unknown work order
    /// - [`StoreError::ConcurrencyConflict`] after exhausted write retries
    pub fn release(
        &self,
        work_order_id: &str,
        tier: ReleaseTier,
        amount: i64,
        sanction_order_no: &str,
    ) -> Result<LedgerSummary, LedgerError> {
        check_release_amount(amount)?;

        let (release_id, summary) = self.store.with_write_tx(
            |tx| {
                let ceiling = work_order_ceiling(tx, work_order_id)?;
                let already_released = released_total(tx, work_order_id)?;
                check_ceiling(already_released, amount, ceiling)?;

                // Installment numbers are assigned here, under the same
                // transaction as the append; the UNIQUE constraint makes
                // a duplicate assignment a hard failure, not a silent one.
                let installment: u32 = tx.query_row(
                    "SELECT COALESCE(MAX(installment_number), 0) + 1
                     FROM fund_releases WHERE work_order_id = ?1",
                    params![work_order_id],
                    |row| row.get(0),
                )?;

                let release_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO fund_releases
                         (id, work_order_id, tier, installment_number, amount,
                          sanction_order_no, released_at_ns)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        release_id,
                        work_order_id,
                        tier.as_str(),
                        installment,
                        amount,
                        sanction_order_no,
                        now_ns(),
                    ],
                )?;

                let used = latest_funds_used(tx, work_order_id)?;
                let summary = LedgerSummary::new(ceiling, already_released + amount, used);

                self.notifier.persist(
                    tx,
                    &NewNotification {
                        audience_role: recipient_audience(tier),
                        title: "Funds released".to_string(),
                        message: format!(
                            "Installment {installment} of \u{20b9}{amount} released \
                             (sanction {sanction_order_no})"
                        ),
                        priority: Priority::Normal,
                    },
                )?;

                Ok((release_id, summary))
            },
            LedgerError::from,
        )?;

        info!(
            work_order_id,
            tier = tier.as_str(),
            amount,
            released = summary.released,
            "fund release appended"
        );
        self.notifier.publish(
            EntityKind::FundRelease,
            release_id,
            ChangeOp::Insert,
            Some(work_order_id.to_string()),
        );
        Ok(summary)
    }

    /// Releases a batch of installments, one transaction per item.
    ///
    /// Returns per-item outcomes in input order.
    #[must_use]
    pub fn release_batch(&self, requests: &[ReleaseRequest]) -> Vec<BatchItemOutcome> {
        requests
            .iter()
            .map(|req| BatchItemOutcome {
                work_order_id: req.work_order_id.clone(),
                result: self.release(
                    &req.work_order_id,
                    req.tier,
                    req.amount,
                    &req.sanction_order_no,
                ),
            })
            .collect()
    }

    /// Returns the current ledger summary for a work order. Read-only and
    /// safe for concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WorkOrderNotFound`] for an unknown work
    /// order.
    pub fn summarize(&self, work_order_id: &str) -> Result<LedgerSummary, LedgerError> {
        self.store.with_conn(|conn| {
            let ceiling = work_order_ceiling(conn, work_order_id)?;
            let released = released_total(conn, work_order_id)?;
            let used = latest_funds_used(conn, work_order_id)?;
            Ok(LedgerSummary::new(ceiling, released, used))
        })
    }

    /// Returns every release for a work order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn releases(&self, work_order_id: &str) -> Result<Vec<FundRelease>, LedgerError> {
        self.releases_filtered(work_order_id, None)
    }

    /// Returns one tier's sub-ledger for a work order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn releases_for_tier(
        &self,
        work_order_id: &str,
        tier: ReleaseTier,
    ) -> Result<Vec<FundRelease>, LedgerError> {
        self.releases_filtered(work_order_id, Some(tier))
    }

    fn releases_filtered(
        &self,
        work_order_id: &str,
        tier: Option<ReleaseTier>,
    ) -> Result<Vec<FundRelease>, LedgerError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, work_order_id, tier, installment_number, amount,
                        sanction_order_no, released_at_ns
                 FROM fund_releases
                 WHERE work_order_id = ?1 AND (?2 IS NULL OR tier = ?2)
                 ORDER BY installment_number ASC",
            )?;

            let rows = stmt.query_map(
                params![work_order_id, tier.map(ReleaseTier::as_str)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, u64>(6)?,
                    ))
                },
            )?;

            let mut releases = Vec::new();
            for row in rows {
                let (id, work_order_id, tier_str, installment_number, amount, sanction, at) =
                    row?;
                releases.push(FundRelease {
                    id,
                    work_order_id,
                    tier: ReleaseTier::parse(&tier_str)?,
                    installment_number,
                    amount,
                    sanction_order_no: sanction,
                    released_at_ns: at,
                });
            }
            Ok(releases)
        })
    }
}

/// Audience that learns about a release: the tier receiving the money.
const fn recipient_audience(tier: ReleaseTier) -> AudienceRole {
    match tier {
        ReleaseTier::Ministry => AudienceRole::State,
        ReleaseTier::State => AudienceRole::ImplementingAgency,
        ReleaseTier::ImplementingAgency => AudienceRole::ExecutingAgency,
        ReleaseTier::ExecutingAgency => AudienceRole::District,
    }
}

/// Reads a work order's authorized ceiling.
fn work_order_ceiling(conn: &Connection, work_order_id: &str) -> Result<i64, LedgerError> {
    conn.query_row(
        "SELECT amount FROM work_orders WHERE id = ?1",
        params![work_order_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::WorkOrderNotFound {
        id: work_order_id.to_string(),
    })
}

/// Sums every release for a work order, across all tiers.
fn released_total(conn: &Connection, work_order_id: &str) -> Result<i64, LedgerError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM fund_releases WHERE work_order_id = ?1",
        params![work_order_id],
        |row| row.get(0),
    )?)
}

/// Funds used per the most recent progress report, 0 when none exists.
fn latest_funds_used(conn: &Connection, work_order_id: &str) -> Result<i64, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT funds_used FROM progress_reports
             WHERE work_order_id = ?1
             ORDER BY created_at_ns DESC, id DESC
             LIMIT 1",
            params![work_order_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}
