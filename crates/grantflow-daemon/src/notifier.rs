//! Change-event fan-out and the persisted notification feed.
//!
//! Every committed mutation in the ledger, lifecycle, and recorder
//! services produces two artifacts:
//!
//! 1. A [`Notification`] row, inserted **inside** the mutating transaction
//!    so it commits or rolls back with the mutation it describes.
//! 2. A [`ChangeEvent`] broadcast **after** commit, carrying entity
//!    identity only — observers filter by the foreign keys they care
//!    about (their own agency's work orders); the notifier knows nothing
//!    about subscriber identity.
//!
//! Delivery is at-least-once: a subscriber that lags the broadcast channel
//! observes `Lagged` and re-syncs from the notifications table, so a
//! dropped receiver never loses committed events. Consumers must be
//! idempotent on re-delivery.
//!
//! Read-state is tracked per audience role, not per individual recipient.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::store::{Store, StoreError};

/// Errors that can occur in the notification feed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifierError {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No notification exists with the given id.
    #[error("notification not found: {id}")]
    NotificationNotFound {
        /// The missing notification id.
        id: String,
    },

    /// Unknown role or priority string in the persistent store.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Which field failed to parse.
        field: &'static str,
        /// The unrecognized value.
        value: String,
    },
}

impl From<rusqlite::Error> for NotifierError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// Audience a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceRole {
    /// Central ministry dashboards.
    Ministry,
    /// State dashboards.
    State,
    /// Implementing agencies.
    ImplementingAgency,
    /// Executing agencies.
    ExecutingAgency,
    /// Submitting districts.
    District,
}

impl AudienceRole {
    /// Stable string form used in the persistent store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ministry => "ministry",
            Self::State => "state",
            Self::ImplementingAgency => "implementing_agency",
            Self::ExecutingAgency => "executing_agency",
            Self::District => "district",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::InvalidField`] for unknown strings.
    pub fn parse(value: &str) -> Result<Self, NotifierError> {
        match value {
            "ministry" => Ok(Self::Ministry),
            "state" => Ok(Self::State),
            "implementing_agency" => Ok(Self::ImplementingAgency),
            "executing_agency" => Ok(Self::ExecutingAgency),
            "district" => Ok(Self::District),
            other => Err(NotifierError::InvalidField {
                field: "audience_role",
                value: other.to_string(),
            }),
        }
    }
}

/// Notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Informational.
    Normal,
    /// Needs attention (rejections, over-allocation attempts).
    High,
}

impl Priority {
    /// Stable string form used in the persistent store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::InvalidField`] for unknown strings.
    pub fn parse(value: &str) -> Result<Self, NotifierError> {
        match value {
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(NotifierError::InvalidField {
                field: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted notification, consumed via the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification identifier (uuid).
    pub id: String,
    /// Audience role this notification addresses.
    pub audience_role: AudienceRole,
    /// Short title.
    pub title: String,
    /// Body message.
    pub message: String,
    /// Priority.
    pub priority: Priority,
    /// Role-level read flag.
    pub read: bool,
    /// Nanoseconds since Unix epoch at creation.
    pub created_at_ns: u64,
}

/// Kind of entity a change event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A proposal row changed.
    Proposal,
    /// A work order row changed.
    WorkOrder,
    /// A fund release was appended.
    FundRelease,
    /// A progress report was appended or its viewed flag flipped.
    ProgressReport,
    /// A notification row changed.
    Notification,
}

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

/// A committed mutation, broadcast to subscribers.
///
/// Carries identity only — enough for an observer to decide whether to
/// re-query. Filtering by `work_order_id` (or any other foreign key) is
/// the observer's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Monotonic sequence number within this process.
    pub seq: u64,
    /// Entity kind.
    pub entity: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Mutation kind.
    pub op: ChangeOp,
    /// Owning work order, when the entity has one.
    pub work_order_id: Option<String>,
}

/// Fields of a notification not assigned by the notifier.
#[derive(Debug, Clone)]
pub struct NewNotification {
    /// Audience role to address.
    pub audience_role: AudienceRole,
    /// Short title.
    pub title: String,
    /// Body message.
    pub message: String,
    /// Priority.
    pub priority: Priority,
}

/// Change-event broadcaster and notification feed.
pub struct ChangeNotifier {
    store: Arc<Store>,
    sender: broadcast::Sender<ChangeEvent>,
    seq: AtomicU64,
}

impl ChangeNotifier {
    /// Creates a notifier over the shared store.
    #[must_use]
    pub fn new(store: Arc<Store>, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            store,
            sender,
            seq: AtomicU64::new(0),
        }
    }

    /// Subscribes to the change-event stream.
    ///
    /// A receiver that falls behind sees
    /// [`broadcast::error::RecvError::Lagged`] and should re-sync from the
    /// notification feed before resuming; events are re-derivable from the
    /// store, so lagging loses no committed data.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Inserts a notification row inside the caller's transaction.
    ///
    /// The row commits or rolls back with the mutation it describes.
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails.
    pub fn persist(
        &self,
        tx: &Transaction<'_>,
        new: &NewNotification,
    ) -> Result<Notification, NotifierError> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            audience_role: new.audience_role,
            title: new.title.clone(),
            message: new.message.clone(),
            priority: new.priority,
            read: false,
            created_at_ns: grantflow_core::now_ns(),
        };

        tx.execute(
            "INSERT INTO notifications (id, audience_role, title, message, priority, read, created_at_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                notification.id,
                notification.audience_role.as_str(),
                notification.title,
                notification.message,
                notification.priority.as_str(),
                notification.created_at_ns,
            ],
        )?;

        Ok(notification)
    }

    /// Broadcasts a change event for an already-committed mutation.
    ///
    /// Must be called only after the owning transaction has committed.
    /// Lack of subscribers is not an error.
    pub fn publish(
        &self,
        entity: EntityKind,
        entity_id: impl Into<String>,
        op: ChangeOp,
        work_order_id: Option<String>,
    ) {
        let event = ChangeEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            entity,
            entity_id: entity_id.into(),
            op,
            work_order_id,
        };
        debug!(seq = event.seq, entity = ?event.entity, op = ?event.op, "change event");
        let _ = self.sender.send(event);
    }

    /// Queries the notification feed for one audience role, newest first.
    ///
    /// `cursor` is the `created_at_ns` of the last notification from the
    /// previous page; pass `None` to start from the newest.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn feed(
        &self,
        role: AudienceRole,
        unread_only: bool,
        cursor: Option<u64>,
        limit: u32,
    ) -> Result<Vec<Notification>, NotifierError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, audience_role, title, message, priority, read, created_at_ns
                 FROM notifications
                 WHERE audience_role = ?1
                   AND (?2 = 0 OR read = 0)
                   AND (?3 IS NULL OR created_at_ns < ?3)
                 ORDER BY created_at_ns DESC, id DESC
                 LIMIT ?4",
            )?;

            let rows = stmt.query_map(
                params![role.as_str(), i64::from(unread_only), cursor, limit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, u64>(6)?,
                    ))
                },
            )?;

            let mut notifications = Vec::new();
            for row in rows {
                let (id, role_str, title, message, priority_str, read, created_at_ns) = row?;
                notifications.push(Notification {
                    id,
                    audience_role: AudienceRole::parse(&role_str)?,
                    title,
                    message,
                    priority: Priority::parse(&priority_str)?,
                    read,
                    created_at_ns,
                });
            }
            Ok(notifications)
        })
    }

    /// Marks a notification read for its audience role. Idempotent: a
    /// second call is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::NotificationNotFound`] if no such
    /// notification exists.
    pub fn mark_read(&self, id: &str) -> Result<(), NotifierError> {
        let changed = self.store.with_write_tx(
            |tx| {
                let exists: Option<String> = tx
                    .query_row(
                        "SELECT id FROM notifications WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(NotifierError::from)?;

                if exists.is_none() {
                    return Err(NotifierError::NotificationNotFound { id: id.to_string() });
                }

                let changed = tx
                    .execute(
                        "UPDATE notifications SET read = 1 WHERE id = ?1 AND read = 0",
                        params![id],
                    )
                    .map_err(NotifierError::from)?;
                Ok(changed > 0)
            },
            NotifierError::from,
        )?;

        if changed {
            self.publish(EntityKind::Notification, id, ChangeOp::Update, None);
        }
        Ok(())
    }
}
