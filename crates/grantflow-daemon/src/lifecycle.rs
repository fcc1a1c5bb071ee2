//! Proposal lifecycle service: submission, review, agency assignment.
//!
//! The transition rules themselves are pure functions in
//! `grantflow_core::proposal`; this service re-reads the proposal's
//! current status inside the write transaction before applying them, so a
//! concurrent double-submission of a decision loses deterministically —
//! the second writer sees the already-transitioned (possibly terminal)
//! status and fails with `InvalidTransition`.
//!
//! # Agency resolution
//!
//! Assignment resolves the agency by account number when the caller
//! supplies one; match-by-name is the documented fallback for callers
//! that only know the agency by name. Multiple candidates fail closed
//! with [`LifecycleError::AmbiguousAgencyMatch`] — the service never
//! guesses between agencies that are about to take custody of funds.

use std::sync::Arc;

use grantflow_core::now_ns;
use grantflow_core::proposal::{
    ActorTier, Component, Outcome, Proposal, ProposalError, ProposalStatus, assign_transition,
    decide_transition, validate_submission,
};
use grantflow_core::work::{WorkOrder, WorkSnapshot};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::notifier::{
    AudienceRole, ChangeNotifier, ChangeOp, EntityKind, NewNotification, NotifierError, Priority,
};
use crate::store::{Store, StoreError};

/// Errors that can occur in the proposal lifecycle service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// Domain validation or transition failure.
    #[error(transparent)]
    Proposal(#[from] ProposalError),

    /// No proposal exists with the given id.
    #[error("proposal not found: {id}")]
    ProposalNotFound {
        /// The missing proposal id.
        id: String,
    },

    /// No agency matched the resolution query.
    #[error("no {tier} agency matched {query}")]
    AgencyNotFound {
        /// The tier searched.
        tier: ActorTier,
        /// Human-readable description of the query.
        query: String,
    },

    /// More than one agency matched; assignment fails closed.
    #[error("ambiguous agency match: {candidates:?}")]
    AmbiguousAgencyMatch {
        /// Ids of every candidate that matched.
        candidates: Vec<String>,
    },

    /// The district reference does not resolve to any registered village.
    #[error("unknown district: {district_ref}")]
    UnknownDistrict {
        /// The unresolvable district reference.
        district_ref: String,
    },

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Notification persistence failure.
    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

impl From<rusqlite::Error> for LifecycleError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// Fields of a proposal supplied by the submitting district.
#[derive(Debug, Clone)]
pub struct NewProposal {
    /// Project name.
    pub project_name: String,
    /// Grant component.
    pub component: Component,
    /// Estimated cost in whole rupees.
    pub estimated_cost: i64,
    /// Submitting district.
    pub district_ref: String,
}

/// A registered village. Villages anchor district references: a proposal's
/// `district_ref` must match at least one village's district.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Village {
    /// Village identifier (uuid).
    pub id: String,
    /// Village name.
    pub name: String,
    /// District the village belongs to.
    pub district_ref: String,
}

/// A registered agency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agency {
    /// Agency identifier (uuid).
    pub id: String,
    /// Registered name.
    pub name: String,
    /// Custody tier the agency operates at.
    pub tier: ActorTier,
    /// Bank account number, the primary assignment join key.
    pub account_no: Option<String>,
    /// Home district, when the agency is district-scoped.
    pub district_ref: Option<String>,
}

/// Agency resolution query for assignment.
///
/// `account_no` is the primary key; `name` is the documented fallback used
/// only when the account number is absent.
#[derive(Debug, Clone, Default)]
pub struct AgencyQuery {
    /// Account-number match (primary).
    pub account_no: Option<String>,
    /// Name match (fallback).
    pub name: Option<String>,
}

/// Result of an assignment: the updated proposal, plus the work order when
/// the assignment was IA -> EA.
#[derive(Debug)]
pub struct AssignmentOutcome {
    /// The proposal after the transition.
    pub proposal: Proposal,
    /// Created on the EA assignment, in the same transaction.
    pub work_order: Option<WorkOrder>,
}

/// Fields of a directly created (village-level) work order.
#[derive(Debug, Clone)]
pub struct NewWorkOrder {
    /// Title.
    pub title: String,
    /// Authorized ceiling in whole rupees.
    pub amount: i64,
    /// Implementing agency id.
    pub implementing_agency_id: String,
    /// Executing agency id.
    pub executing_agency_id: String,
    /// Site location description.
    pub location: String,
    /// Surveyed site latitude, when known.
    pub site_latitude: Option<f64>,
    /// Surveyed site longitude, when known.
    pub site_longitude: Option<f64>,
    /// Completion deadline, nanoseconds since Unix epoch.
    pub deadline_ns: Option<u64>,
}

/// The proposal lifecycle service.
pub struct ProposalLifecycle {
    store: Arc<Store>,
    notifier: Arc<ChangeNotifier>,
}

impl ProposalLifecycle {
    /// Creates the service over the shared store and notifier.
    #[must_use]
    pub fn new(store: Arc<Store>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Registers an agency. Setup-path helper for district/state admin
    /// tooling.
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails.
    pub fn register_agency(
        &self,
        name: &str,
        tier: ActorTier,
        account_no: Option<&str>,
        district_ref: Option<&str>,
    ) -> Result<Agency, LifecycleError> {
        let agency = Agency {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            tier,
            account_no: account_no.map(ToString::to_string),
            district_ref: district_ref.map(ToString::to_string),
        };
        self.store.with_write_tx(
            |tx| {
                tx.execute(
                    "INSERT INTO agencies (id, name, tier, account_no, district_ref)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        agency.id,
                        agency.name,
                        agency.tier.as_str(),
                        agency.account_no,
                        agency.district_ref,
                    ],
                )
                .map_err(LifecycleError::from)?;
                Ok(())
            },
            LifecycleError::from,
        )?;
        Ok(agency)
    }

    /// Registers a village under a district. Setup-path helper, like
    /// [`Self::register_agency`].
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails.
    pub fn register_village(
        &self,
        name: &str,
        district_ref: &str,
    ) -> Result<Village, LifecycleError> {
        let village = Village {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            district_ref: district_ref.to_string(),
        };
        self.store.with_write_tx(
            |tx| {
                tx.execute(
                    "INSERT INTO villages (id, name, district_ref) VALUES (?1, ?2, ?3)",
                    params![village.id, village.name, village.district_ref],
                )
                .map_err(LifecycleError::from)?;
                Ok(())
            },
            LifecycleError::from,
        )?;
        Ok(village)
    }

    /// Submits a new proposal, producing `Submitted`.
    ///
    /// The district reference must resolve: at least one registered
    /// village belongs to it. The check runs inside the insert's
    /// transaction, so a proposal can never land under a district the
    /// store has not seen.
    ///
    /// # Errors
    ///
    /// Returns [`ProposalError::Validation`] for an empty name, empty
    /// district, or non-positive estimated cost, and
    /// [`LifecycleError::UnknownDistrict`] when no village resolves the
    /// district reference.
    pub fn submit(&self, new: &NewProposal) -> Result<Proposal, LifecycleError> {
        validate_submission(&new.project_name, new.estimated_cost, &new.district_ref)
            .map_err(LifecycleError::from)?;

        let proposal = Proposal {
            id: Uuid::new_v4().to_string(),
            project_name: new.project_name.clone(),
            component: new.component,
            estimated_cost: new.estimated_cost,
            district_ref: new.district_ref.clone(),
            status: ProposalStatus::Submitted,
            implementing_agency_id: None,
            executing_agency_id: None,
            created_at_ns: now_ns(),
        };

        self.store.with_write_tx(
            |tx| {
                resolve_district(tx, &proposal.district_ref)?;
                tx.execute(
                    "INSERT INTO proposals
                         (id, project_name, component, estimated_cost, district_ref,
                          status, created_at_ns)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        proposal.id,
                        proposal.project_name,
                        proposal.component.as_str(),
                        proposal.estimated_cost,
                        proposal.district_ref,
                        proposal.status.as_str(),
                        proposal.created_at_ns,
                    ],
                )
                .map_err(LifecycleError::from)?;

                self.notifier.persist(
                    tx,
                    &NewNotification {
                        audience_role: AudienceRole::State,
                        title: "Proposal submitted".to_string(),
                        message: format!(
                            "{} ({}) awaiting state review",
                            proposal.project_name,
                            proposal.component.as_str()
                        ),
                        priority: Priority::Normal,
                    },
                )?;
                Ok(())
            },
            LifecycleError::from,
        )?;

        info!(proposal_id = %proposal.id, "proposal submitted");
        self.notifier
            .publish(EntityKind::Proposal, &proposal.id, ChangeOp::Insert, None);
        Ok(proposal)
    }

    /// Applies a review decision.
    ///
    /// The proposal's status is re-read inside the transaction; the
    /// transition table decides from that status, so no stale-read window
    /// exists between check and write.
    ///
    /// # Errors
    ///
    /// Returns [`ProposalError::InvalidTransition`] when `actor_tier` does
    /// not hold the pending review or the proposal is terminal.
    pub fn decide(
        &self,
        proposal_id: &str,
        actor_tier: ActorTier,
        outcome: Outcome,
    ) -> Result<Proposal, LifecycleError> {
        let proposal = self.store.with_write_tx(
            |tx| {
                let mut proposal = load_proposal(tx, proposal_id)?;
                let next = decide_transition(proposal.status, actor_tier, outcome)
                    .map_err(LifecycleError::from)?;

                tx.execute(
                    "UPDATE proposals SET status = ?1 WHERE id = ?2",
                    params![next.as_str(), proposal_id],
                )
                .map_err(LifecycleError::from)?;
                proposal.status = next;

                let (title, priority) = match outcome {
                    Outcome::Approve => ("Proposal approved", Priority::Normal),
                    Outcome::Reject => ("Proposal rejected", Priority::High),
                };
                self.notifier.persist(
                    tx,
                    &NewNotification {
                        audience_role: AudienceRole::District,
                        title: title.to_string(),
                        message: format!(
                            "{} is now {}",
                            proposal.project_name,
                            next.as_str()
                        ),
                        priority,
                    },
                )?;

                Ok(proposal)
            },
            LifecycleError::from,
        )?;

        info!(
            proposal_id,
            tier = actor_tier.as_str(),
            status = proposal.status.as_str(),
            "proposal decision applied"
        );
        self.notifier
            .publish(EntityKind::Proposal, proposal_id, ChangeOp::Update, None);
        Ok(proposal)
    }

    /// Assigns the proposal to an agency at `agency_tier`.
    ///
    /// The IA assignment is legal from `ApprovedByMinistry`; the EA
    /// assignment is legal from `AssignedToIa` and also creates the work
    /// order in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`ProposalError::InvalidTransition`] from any other status
    /// - [`LifecycleError::AgencyNotFound`] when nothing matches the query
    /// - [`LifecycleError::AmbiguousAgencyMatch`] when several agencies do
    pub fn assign(
        &self,
        proposal_id: &str,
        query: &AgencyQuery,
        agency_tier: ActorTier,
    ) -> Result<AssignmentOutcome, LifecycleError> {
        let outcome = self.store.with_write_tx(
            |tx| {
                let mut proposal = load_proposal(tx, proposal_id)?;
                let next = assign_transition(proposal.status, agency_tier)
                    .map_err(LifecycleError::from)?;
                let agency = resolve_agency(tx, agency_tier, query)?;

                let work_order = match agency_tier {
                    ActorTier::ImplementingAgency => {
                        tx.execute(
                            "UPDATE proposals
                             SET status = ?1, implementing_agency_id = ?2
                             WHERE id = ?3",
                            params![next.as_str(), agency.id, proposal_id],
                        )
                        .map_err(LifecycleError::from)?;
                        proposal.implementing_agency_id = Some(agency.id.clone());
                        None
                    },
                    ActorTier::ExecutingAgency => {
                        tx.execute(
                            "UPDATE proposals
                             SET status = ?1, executing_agency_id = ?2
                             WHERE id = ?3",
                            params![next.as_str(), agency.id, proposal_id],
                        )
                        .map_err(LifecycleError::from)?;
                        proposal.executing_agency_id = Some(agency.id.clone());

                        // The transition table guarantees AssignedToIa, so
                        // the IA reference is present.
                        let ia_id = proposal.implementing_agency_id.clone().ok_or_else(|| {
                            LifecycleError::ProposalNotFound {
                                id: proposal_id.to_string(),
                            }
                        })?;
                        Some(insert_work_order(
                            tx,
                            &NewWorkOrder {
                                title: proposal.project_name.clone(),
                                amount: proposal.estimated_cost,
                                implementing_agency_id: ia_id,
                                executing_agency_id: agency.id.clone(),
                                location: proposal.district_ref.clone(),
                                site_latitude: None,
                                site_longitude: None,
                                deadline_ns: None,
                            },
                            Some(proposal_id.to_string()),
                        )?)
                    },
                    // The transition table already rejected State/Ministry.
                    ActorTier::State | ActorTier::Ministry => {
                        return Err(ProposalError::InvalidTransition {
                            from: proposal.status,
                            tier: agency_tier,
                            outcome: None,
                        }
                        .into());
                    },
                };
                proposal.status = next;

                self.notifier.persist(
                    tx,
                    &NewNotification {
                        audience_role: match agency_tier {
                            ActorTier::ExecutingAgency => AudienceRole::ExecutingAgency,
                            _ => AudienceRole::ImplementingAgency,
                        },
                        title: "Work assigned".to_string(),
                        message: format!("{} assigned to {}", proposal.project_name, agency.name),
                        priority: Priority::Normal,
                    },
                )?;

                Ok(AssignmentOutcome {
                    proposal,
                    work_order,
                })
            },
            LifecycleError::from,
        )?;

        info!(
            proposal_id,
            tier = agency_tier.as_str(),
            work_order_created = outcome.work_order.is_some(),
            "proposal assigned"
        );
        self.notifier
            .publish(EntityKind::Proposal, proposal_id, ChangeOp::Update, None);
        if let Some(work_order) = &outcome.work_order {
            self.notifier.publish(
                EntityKind::WorkOrder,
                &work_order.id,
                ChangeOp::Insert,
                Some(work_order.id.clone()),
            );
        }
        Ok(outcome)
    }

    /// Creates a work order directly, without a proposal — the
    /// village-level disbursement path.
    ///
    /// # Errors
    ///
    /// Returns [`ProposalError::Validation`] for an empty title or
    /// non-positive amount.
    pub fn create_village_work_order(
        &self,
        new: &NewWorkOrder,
    ) -> Result<WorkOrder, LifecycleError> {
        if new.title.trim().is_empty() {
            return Err(ProposalError::Validation {
                field: "project_name",
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if new.amount <= 0 {
            return Err(ProposalError::Validation {
                field: "estimated_cost",
                reason: format!("must be positive, got {}", new.amount),
            }
            .into());
        }

        let work_order = self.store.with_write_tx(
            |tx| {
                let work_order = insert_work_order(tx, new, None)?;
                self.notifier.persist(
                    tx,
                    &NewNotification {
                        audience_role: AudienceRole::ExecutingAgency,
                        title: "Work order created".to_string(),
                        message: format!("{} (direct village disbursement)", new.title),
                        priority: Priority::Normal,
                    },
                )?;
                Ok(work_order)
            },
            LifecycleError::from,
        )?;

        info!(work_order_id = %work_order.id, "village work order created");
        self.notifier.publish(
            EntityKind::WorkOrder,
            &work_order.id,
            ChangeOp::Insert,
            Some(work_order.id.clone()),
        );
        Ok(work_order)
    }

    /// Loads a proposal by id.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ProposalNotFound`] if no row exists.
    pub fn get(&self, proposal_id: &str) -> Result<Proposal, LifecycleError> {
        self.store.with_conn(|conn| load_proposal(conn, proposal_id))
    }
}

/// Checks that a district reference resolves to at least one registered
/// village.
fn resolve_district(conn: &Connection, district_ref: &str) -> Result<(), LifecycleError> {
    let known: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM villages WHERE district_ref = ?1 LIMIT 1",
            params![district_ref],
            |row| row.get(0),
        )
        .optional()
        .map_err(LifecycleError::from)?;
    if known.is_none() {
        return Err(LifecycleError::UnknownDistrict {
            district_ref: district_ref.to_string(),
        });
    }
    Ok(())
}

/// Loads a proposal row.
fn load_proposal(conn: &Connection, proposal_id: &str) -> Result<Proposal, LifecycleError> {
    conn.query_row(
        "SELECT id, project_name, component, estimated_cost, district_ref, status,
                implementing_agency_id, executing_agency_id, created_at_ns
         FROM proposals WHERE id = ?1",
        params![proposal_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, u64>(8)?,
            ))
        },
    )
    .optional()?
    .map_or_else(
        || {
            Err(LifecycleError::ProposalNotFound {
                id: proposal_id.to_string(),
            })
        },
        |(id, project_name, component, estimated_cost, district_ref, status, ia, ea, created)| {
            Ok(Proposal {
                id,
                project_name,
                component: Component::parse(&component)?,
                estimated_cost,
                district_ref,
                status: ProposalStatus::parse(&status)?,
                implementing_agency_id: ia,
                executing_agency_id: ea,
                created_at_ns: created,
            })
        },
    )
}

/// Resolves an agency by tier-appropriate join key, failing closed on
/// ambiguity.
fn resolve_agency(
    conn: &Connection,
    tier: ActorTier,
    query: &AgencyQuery,
) -> Result<Agency, LifecycleError> {
    let (sql, key): (&str, &str) = if let Some(account) = &query.account_no {
        (
            "SELECT id, name, tier, account_no, district_ref
             FROM agencies WHERE tier = ?1 AND account_no = ?2",
            account,
        )
    } else if let Some(name) = &query.name {
        (
            "SELECT id, name, tier, account_no, district_ref
             FROM agencies WHERE tier = ?1 AND name = ?2",
            name,
        )
    } else {
        return Err(LifecycleError::AgencyNotFound {
            tier,
            query: "empty query".to_string(),
        });
    };

    let mut stmt = conn.prepare(sql).map_err(LifecycleError::from)?;
    let rows = stmt
        .query_map(params![tier.as_str(), key], |row| {
            Ok(Agency {
                id: row.get(0)?,
                name: row.get(1)?,
                tier,
                account_no: row.get(3)?,
                district_ref: row.get(4)?,
            })
        })
        .map_err(LifecycleError::from)?;

    let mut candidates = Vec::new();
    for row in rows {
        candidates.push(row.map_err(LifecycleError::from)?);
    }

    match candidates.len() {
        0 => Err(LifecycleError::AgencyNotFound {
            tier,
            query: key.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(LifecycleError::AmbiguousAgencyMatch {
            candidates: candidates.into_iter().map(|a| a.id).collect(),
        }),
    }
}

/// Inserts a work order row with a fresh initial snapshot.
fn insert_work_order(
    tx: &Transaction<'_>,
    new: &NewWorkOrder,
    proposal_id: Option<String>,
) -> Result<WorkOrder, LifecycleError> {
    let snapshot = WorkSnapshot::initial();
    let work_order = WorkOrder {
        id: Uuid::new_v4().to_string(),
        proposal_id,
        title: new.title.clone(),
        amount: new.amount,
        implementing_agency_id: new.implementing_agency_id.clone(),
        executing_agency_id: new.executing_agency_id.clone(),
        location: new.location.clone(),
        site_latitude: new.site_latitude,
        site_longitude: new.site_longitude,
        deadline_ns: new.deadline_ns,
        snapshot,
        created_at_ns: now_ns(),
    };

    tx.execute(
        "INSERT INTO work_orders
             (id, proposal_id, title, amount, implementing_agency_id, executing_agency_id,
              location, site_latitude, site_longitude, deadline_ns, status,
              progress_percentage, funds_released, funds_used, funds_remaining,
              snapshot_updated_at_ns, created_at_ns)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, 0, 0, 0, 0, ?12)",
        params![
            work_order.id,
            work_order.proposal_id,
            work_order.title,
            work_order.amount,
            work_order.implementing_agency_id,
            work_order.executing_agency_id,
            work_order.location,
            work_order.site_latitude,
            work_order.site_longitude,
            work_order.deadline_ns,
            snapshot.status.as_str(),
            work_order.created_at_ns,
        ],
    )
    .map_err(LifecycleError::from)?;

    Ok(work_order)
}
