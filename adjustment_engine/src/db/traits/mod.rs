mod data_objects;
mod outbox_management;
mod reconciliation_database;

pub use data_objects::{
    AdjustmentRequest,
    CompletionOutcome,
    ReconciliationOutcome,
    ReturnArrivedOutcome,
    RevenueChangeOutcome,
};
pub use outbox_management::OutboxManagement;
pub use reconciliation_database::{ReconciliationDatabase, ReconciliationError};
