//! Adjustment Reconciliation Engine
//!
//! The reconciliation engine records marketplace-driven financial events (payments, holds, returns, fund releases)
//! against orders, and propagates the net changes to an external accounting ledger. It guarantees that resubmitting an
//! event is a no-op, and that concurrent writers to the same order are serialised.
//!
//! The library is divided into these main sections:
//! 1. Database management and control ([`mod@db`]). Currently, SQLite is the only supported backend. You should never
//!    need to access the database directly. Instead, use the public API. The exception is the data types used in the
//!    database. These are defined in the [`db_types`] module and are public.
//! 2. The single-event [`mod@pipeline`] and the [`classifier`] that maps adjustment types onto ledger categories.
//! 3. The [`ledger`] boundary. Notifications are written to a durable outbox in the same transaction as the change
//!    they describe and delivered after commit.
//! 4. The public API ([`ReconciliationApi`]), which ties the above together.
mod db;

pub mod classifier;
pub mod config;
pub mod db_types;
pub mod ledger;
mod oms_api;
pub mod pipeline;
pub mod stream;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::{EngineConfig, OutboxConfig};
#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use db::traits::{
    AdjustmentRequest,
    CompletionOutcome,
    OutboxManagement,
    ReconciliationDatabase,
    ReconciliationError,
    ReconciliationOutcome,
    ReturnArrivedOutcome,
    RevenueChangeOutcome,
};
pub use ledger::{HttpLedgerClient, LedgerClient, LedgerConfig, LedgerError};
pub use oms_api::{
    outbox_drain::{drain_all_pending, drain_order, DrainReport},
    reconciliation_api::{AdjustmentReceipt, ReconciliationApi},
};
