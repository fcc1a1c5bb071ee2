//! grantflow-daemon - Persistent services for the grantflow fund tracker
//!
//! This crate owns the durable side of grantflow: the SQLite store and the
//! four services that mutate it. Domain rules live in `grantflow-core`;
//! this crate is where they are enforced transactionally.
//!
//! # Modules
//!
//! - [`store`]: SQLite connection management, schema, write-retry policy
//! - [`ledger`]: fund releases bounded by the work-order ceiling
//! - [`lifecycle`]: proposal review, agency assignment, work-order creation
//! - [`recorder`]: append-only progress reports and snapshot denormalization
//! - [`notifier`]: change-event fan-out and the persisted notification feed
//! - [`surface`]: typed request/response structs for agency-facing tooling
//!
//! # Write discipline
//!
//! Every mutating operation runs inside one SQLite transaction covering the
//! full sequence the operation needs to be atomic: precondition re-read,
//! row writes, snapshot denormalization, and the notification row. The
//! change event is broadcast only after the transaction commits, so
//! observers never see a mutation that later rolled back.

pub mod ledger;
pub mod lifecycle;
pub mod notifier;
pub mod recorder;
pub mod store;
pub mod surface;
