//! The boundary to the external accounting ledger.
//!
//! The ledger is not transactional with the local database. Notifications are submitted at-least-once; the ledger
//! deduplicates on [`LedgerNotification::reference_id`].
mod http;

pub use http::{HttpLedgerClient, LedgerConfig};
use thiserror::Error;

use crate::db_types::LedgerNotification;

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Could not initialise the ledger client. {0}")]
    Initialization(String),
    #[error("Could not reach the ledger. {0}")]
    Transport(String),
    #[error("The ledger rejected the submission. Status {status}. {message}")]
    Rejected { status: u16, message: String },
    #[error("Could not serialize or deserialize a ledger message. {0}")]
    Serialization(String),
}

/// A sink for receivable adjustments.
#[allow(async_fn_in_trait)]
pub trait LedgerClient: Clone {
    /// Submits a receivable adjustment. An `Ok` result is the ledger's acknowledgement.
    async fn submit_adjustment(&self, notification: &LedgerNotification) -> Result<(), LedgerError>;
}
