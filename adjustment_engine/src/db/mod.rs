//! #  Database management and control.
//!
//! This module provides the interface contracts of the reconciliation engine's database *backends*, and the backends
//! themselves.
//!
//! ## Traits
//! * [`ReconciliationDatabase`] defines the transactional operations: single-event reconciliation, stream
//!   reconciliation, order completion and return arrival, plus read access to the records they produce.
//! * [`OutboxManagement`] defines how pending ledger notifications are claimed, delivered and released.
//!
//! A backend must support transactions and an exclusive per-order lock on the payment meta record. Currently SQLite
//! is the only supported backend.
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;
