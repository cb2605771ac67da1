//! # Reconciliation engine public API
//!
//! * [`reconciliation_api`] is the primary API: it records marketplace financial events against orders, applies
//!   fund-set streams, completes orders, handles returned goods, and delivers the resulting ledger notifications.
//! * [`outbox_drain`] delivers committed ledger notifications from the outbox. The API calls it straight after each
//!   commit; [`outbox_drain::drain_all_pending`] is the sweep that catches anything left behind.
//!
//! # API usage
//!
//! An API instance is created by supplying a database backend and a ledger client.
//!
//! ```rust,ignore
//! use adjustment_engine::{EngineConfig, HttpLedgerClient, ReconciliationApi, SqliteDatabase};
//! let config = EngineConfig::from_env_or_default();
//! let db = SqliteDatabase::new_with_config(&config).await?;
//! let ledger = HttpLedgerClient::new(config.ledger.clone())?;
//! let api = ReconciliationApi::new(db, ledger).with_outbox_config(config.outbox);
//! let receipt = api.apply_adjustment(request).await?;
//! ```
pub mod outbox_drain;
pub mod reconciliation_api;
