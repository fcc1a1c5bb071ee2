//! Typed submission surface over the daemon services.
//!
//! There is no HTTP layer here; these serde-derived request types and the
//! [`Grantflow`] facade are the integration boundary for whatever front
//! end sits above the daemon. Requests deserialize from JSON, get mapped
//! onto the owning service's input types, and the service's own
//! validation and transaction discipline applies unchanged.

use std::sync::Arc;

use grantflow_core::config::GrantflowConfig;
use grantflow_core::evidence::{
    CaptureDevice, EvidencePhoto, LocationProvider, MemoryObjectStore, ObjectStore,
};
use grantflow_core::fund::ReleaseTier;
use serde::{Deserialize, Serialize};

use crate::ledger::{FundLedger, LedgerError, ReleaseRequest};
use crate::lifecycle::ProposalLifecycle;
use crate::notifier::{AudienceRole, ChangeNotifier, Notification, NotifierError};
use crate::recorder::{NewReport, ProgressRecorder, ProgressReport, RecorderError};
use crate::store::{Store, StoreError};

/// A fund release as submitted by the disbursing tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundReleaseRequest {
    /// Work order receiving the installment.
    pub work_order_id: String,
    /// Custody tier performing the release.
    pub tier: ReleaseTier,
    /// Amount in whole rupees.
    pub amount: i64,
    /// Sanction order number authorizing the release.
    pub sanction_order_no: String,
}

impl From<FundReleaseRequest> for ReleaseRequest {
    fn from(req: FundReleaseRequest) -> Self {
        Self {
            work_order_id: req.work_order_id,
            tier: req.tier,
            amount: req.amount,
            sanction_order_no: req.sanction_order_no,
        }
    }
}

/// A progress report as submitted by the executing agency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSubmission {
    /// Work order reported on.
    pub work_order_id: String,
    /// Reporting actor.
    pub reported_by: String,
    /// Cumulative funds used, whole rupees.
    pub funds_used: i64,
    /// Free-text remarks.
    #[serde(default)]
    pub remarks: String,
    /// Captured photos. Verification fields are claims; the recorder
    /// recomputes them.
    #[serde(default)]
    pub evidence: Vec<EvidencePhoto>,
}

/// Notification feed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedQuery {
    /// Audience to read as.
    pub audience_role: AudienceRole,
    /// When true, only unread notifications are returned.
    #[serde(default)]
    pub unread_only: bool,
    /// Keyset cursor: return notifications created strictly before this.
    #[serde(default)]
    pub before_ns: Option<u64>,
    /// Page size.
    #[serde(default = "default_feed_limit")]
    pub limit: u32,
}

const fn default_feed_limit() -> u32 {
    50
}

/// The assembled daemon: one store, one notifier, every service wired to
/// them.
pub struct Grantflow {
    store: Arc<Store>,
    notifier: Arc<ChangeNotifier>,
    /// Fund disbursement ledger.
    pub ledger: FundLedger,
    /// Proposal lifecycle and assignment.
    pub lifecycle: ProposalLifecycle,
    /// Progress reports and snapshots.
    pub recorder: ProgressRecorder,
    /// Evidence capture pipeline.
    pub capture: CaptureDevice,
}

impl Grantflow {
    /// Assembles the daemon from config, with the given location provider
    /// and object store for the capture pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or the
    /// schema fails to apply.
    pub fn open(
        config: &GrantflowConfig,
        provider: Arc<dyn LocationProvider>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, StoreError> {
        let store = Store::open(&config.database_path)?
            .with_write_retry_max_attempts(config.write_retry_max_attempts);
        Self::assemble(Arc::new(store), config, provider, objects)
    }

    /// Assembles the daemon over an in-memory database with an in-memory
    /// object store. Test and demo path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema fails to apply.
    pub fn in_memory(
        config: &GrantflowConfig,
        provider: Arc<dyn LocationProvider>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(Store::in_memory()?);
        Self::assemble(store, config, provider, Arc::new(MemoryObjectStore::new()))
    }

    fn assemble(
        store: Arc<Store>,
        config: &GrantflowConfig,
        provider: Arc<dyn LocationProvider>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, StoreError> {
        let notifier = Arc::new(ChangeNotifier::new(
            Arc::clone(&store),
            config.notifier_channel_capacity,
        ));
        Ok(Self {
            ledger: FundLedger::new(Arc::clone(&store), Arc::clone(&notifier)),
            lifecycle: ProposalLifecycle::new(Arc::clone(&store), Arc::clone(&notifier)),
            recorder: ProgressRecorder::new(Arc::clone(&store), Arc::clone(&notifier))
                .with_verification_radius(config.verification_radius_m),
            capture: CaptureDevice::new(provider, objects, config.capture_config()),
            store,
            notifier,
        })
    }

    /// The shared change notifier, for subscribing to [`crate::notifier::ChangeEvent`]s.
    #[must_use]
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// The shared store handle.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Releases funds from a typed request, returning the updated summary.
    ///
    /// # Errors
    ///
    /// See [`FundLedger::release`].
    pub fn release_funds(
        &self,
        request: &FundReleaseRequest,
    ) -> Result<grantflow_core::fund::LedgerSummary, LedgerError> {
        self.ledger.release(
            &request.work_order_id,
            request.tier,
            request.amount,
            &request.sanction_order_no,
        )
    }

    /// Records a progress report from a typed submission.
    ///
    /// # Errors
    ///
    /// See [`ProgressRecorder::submit_report`].
    pub fn submit_progress(
        &self,
        submission: ProgressSubmission,
    ) -> Result<ProgressReport, RecorderError> {
        self.recorder.submit_report(&NewReport {
            work_order_id: submission.work_order_id,
            reported_by: submission.reported_by,
            funds_used: submission.funds_used,
            remarks: submission.remarks,
            evidence: submission.evidence,
        })
    }

    /// Reads a notification feed page for the query.
    ///
    /// # Errors
    ///
    /// See [`ChangeNotifier::feed`].
    pub fn notifications(&self, query: &FeedQuery) -> Result<Vec<Notification>, NotifierError> {
        self.notifier
            .feed(query.audience_role, query.unread_only, query.before_ns, query.limit)
    }
}
