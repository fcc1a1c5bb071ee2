//! `SQLite`-backed persistent store.
//!
//! One [`Store`] wraps one connection behind a mutex. WAL mode allows
//! concurrent readers while a write is in flight; writers serialize on the
//! mutex within the process and on `SQLITE_BUSY` across processes.
//!
//! # Write retry
//!
//! [`Store::with_write_tx`] runs a closure inside an IMMEDIATE transaction.
//! The whole read-check-write sequence the closure performs is atomic; a
//! busy/locked failure is retried with a short doubling backoff up to the
//! configured attempt budget, then surfaced as
//! [`StoreError::ConcurrencyConflict`]. Domain errors pass through
//! untouched and are never retried.

// SQLite returns i64 for row IDs and counts, but they're always
// non-negative in this schema. Mutex poisoning indicates a panic in
// another thread, which is unrecoverable.
#![allow(clippy::missing_panics_doc)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use thiserror::Error;
use tracing::warn;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Base backoff between write retries; doubles per attempt.
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Errors that can occur at the storage layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure on a write that stayed busy past the retry
    /// budget. The caller may retry the whole operation.
    #[error("concurrency conflict: write still busy after {attempts} attempts")]
    ConcurrencyConflict {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl StoreError {
    /// Whether the underlying failure is a busy/locked condition worth
    /// retrying.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// The shared persistent store.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    write_retry_max_attempts: u32,
}

impl Store {
    /// Opens or creates the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            write_retry_max_attempts: 3,
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            write_retry_max_attempts: 3,
        })
    }

    /// Overrides the write retry budget (from configuration). A budget of
    /// zero is clamped to one attempt.
    #[must_use]
    pub const fn with_write_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.write_retry_max_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Runs a read-only closure against the connection.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error.
    pub fn with_conn<T, E>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, E>,
    ) -> Result<T, E> {
        let conn = self.conn.lock().expect("store lock poisoned");
        f(&conn)
    }

    /// Runs a closure inside an IMMEDIATE write transaction, committing on
    /// `Ok` and rolling back on `Err`.
    ///
    /// Busy/locked failures are retried up to the attempt budget with a
    /// doubling backoff; any other error — including every domain error the
    /// closure returns — is surfaced on the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or
    /// [`StoreError::ConcurrencyConflict`] (wrapped by `wrap`) after the
    /// retry budget is exhausted.
    pub fn with_write_tx<T, E>(
        &self,
        f: impl Fn(&Transaction<'_>) -> Result<T, E>,
        wrap: impl Fn(StoreError) -> E,
    ) -> Result<T, E>
    where
        E: std::error::Error + 'static,
    {
        let max_attempts = self.write_retry_max_attempts;
        let mut backoff = WRITE_RETRY_BACKOFF;

        for attempt in 1..=max_attempts {
            let mut conn = self.conn.lock().expect("store lock poisoned");
            let result = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| wrap(StoreError::Database(e)))
                .and_then(|tx| {
                    let value = f(&tx)?;
                    tx.commit().map_err(|e| wrap(StoreError::Database(e)))?;
                    Ok(value)
                });
            drop(conn);

            match result {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && is_busy_error(&err) => {
                    warn!(attempt, error = %err, "write transaction busy, retrying");
                    std::thread::sleep(backoff);
                    backoff *= 2;
                },
                Err(err) => {
                    if is_busy_error(&err) {
                        return Err(wrap(StoreError::ConcurrencyConflict {
                            attempts: max_attempts,
                        }));
                    }
                    return Err(err);
                },
            }
        }

        Err(wrap(StoreError::ConcurrencyConflict {
            attempts: max_attempts,
        }))
    }
}

/// Detects a busy/locked condition by walking the error's source chain
/// down to the [`StoreError`] or `rusqlite` error that service error
/// types wrap.
fn is_busy_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(store) = e.downcast_ref::<StoreError>() {
            return store.is_busy();
        }
        if let Some(sqlite) = e.downcast_ref::<rusqlite::Error>() {
            return matches!(
                sqlite.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            );
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn temp_store() -> (Store, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = Store::open(dir.path().join("grantflow.db")).expect("failed to open store");
        (store, dir)
    }

    #[test]
    fn test_schema_applies_cleanly() {
        let (store, _dir) = temp_store();
        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM work_orders", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_wal_mode_enabled_on_disk() {
        let (store, _dir) = temp_store();
        let mode: String = store
            .with_conn(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_write_tx_commits_on_ok() {
        let store = Store::in_memory().unwrap();
        store
            .with_write_tx(
                |tx| {
                    tx.execute(
                        "INSERT INTO agencies (id, name, tier) VALUES ('a1', 'IA North', 'implementing_agency')",
                        [],
                    )
                    .map_err(StoreError::from)?;
                    Ok(())
                },
                |e| e,
            )
            .unwrap();

        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM agencies", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_write_tx_rolls_back_on_err() {
        let store = Store::in_memory().unwrap();
        let result: Result<(), StoreError> = store.with_write_tx(
            |tx| {
                tx.execute(
                    "INSERT INTO agencies (id, name, tier) VALUES ('a1', 'IA North', 'implementing_agency')",
                    [],
                )
                .map_err(StoreError::from)?;
                // Simulate a validation failure after the insert.
                Err(StoreError::ConcurrencyConflict { attempts: 0 })
            },
            |e| e,
        );
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM agencies", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(count, 0, "failed transaction must leave no partial state");
    }

    #[test]
    fn test_zero_retry_budget_still_allows_one_attempt() {
        let store = Store::in_memory().unwrap().with_write_retry_max_attempts(0);
        store
            .with_write_tx(
                |tx| {
                    tx.execute(
                        "INSERT INTO agencies (id, name, tier) VALUES ('a1', 'IA North', 'implementing_agency')",
                        [],
                    )
                    .map_err(StoreError::from)?;
                    Ok(())
                },
                |e| e,
            )
            .unwrap();
    }

    #[test]
    fn test_busy_detection_walks_source_chain() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(is_busy_error(&StoreError::Database(busy)));

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("CHECK constraint failed".to_string()),
        );
        assert!(!is_busy_error(&StoreError::Database(constraint)));
        assert!(!is_busy_error(&StoreError::ConcurrencyConflict { attempts: 3 }));
    }

    #[test]
    fn test_check_constraint_rejects_non_positive_amount() {
        let store = Store::in_memory().unwrap();
        let result = store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO proposals
                     (id, project_name, component, estimated_cost, district_ref, status, created_at_ns)
                 VALUES ('p1', 'X', 'hostel', 0, 'd1', 'submitted', 1)",
                [],
            )
        });
        assert!(result.is_err());
    }
}
