use futures_util::Stream;
use thiserror::Error;

use crate::{
    classifier::ClassificationError,
    db::traits::{AdjustmentRequest, CompletionOutcome, ReconciliationOutcome, ReturnArrivedOutcome, RevenueChangeOutcome},
    db_types::{Actor, Adjustment, AuditTimestamp, Money, Order, PaymentMeta, TagRelation},
    ledger::LedgerError,
    pipeline::Step,
    stream::{StreamEvent, StreamSummary},
};

/// This trait defines the transactional behaviour of backends supporting the reconciliation engine.
///
/// Every mutating method runs inside a single database transaction and either commits in full or not at all. Ledger
/// notifications are never sent from here; they are written to the outbox in the same transaction and delivered by
/// the caller after commit.
#[allow(async_fn_in_trait)]
pub trait ReconciliationDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Records a single marketplace financial event against an order.
    ///
    /// In a single atomic transaction:
    /// * The order's ownership is validated against the request's team.
    /// * The order's payment meta record is locked (created if absent) and the receivable latch is evaluated.
    /// * The adjustment is upserted on its natural key `(order, at, type)`.
    /// * At most one ledger notification is decided on and written to the outbox.
    ///
    /// Any failure rolls back every write.
    async fn reconcile_adjustment(&self, request: AdjustmentRequest) -> Result<ReconciliationOutcome, ReconciliationError>;

    /// Applies an ordered stream of fund-set / completion events inside one transaction. The transaction commits only
    /// if the stream ends cleanly. A `Rollback` event, or any error, discards everything applied so far.
    async fn apply_stream<S>(&self, events: S, actor: Actor) -> Result<StreamSummary, ReconciliationError>
    where S: Stream<Item = StreamEvent> + Unpin;

    /// Marks the order as completed, appends an audit timestamp and removes tracking-origin tags, atomically.
    ///
    /// Orders that are `Cancelled`, `Completed` or `ReturnProblem` keep their status; the audit entry and tag removal
    /// still happen. `status_changed` in the result tells the two cases apart.
    async fn complete_order(
        &self,
        order_id: i64,
        team_id: i64,
        actor: Actor,
    ) -> Result<CompletionOutcome, ReconciliationError>;

    /// Handles returned goods arriving at the warehouse. If the order's receivable had not yet been created on the
    /// ledger, the latch is flipped and a `CancelReceive` notification is queued. The order moves to
    /// `ReturnCompleted`.
    async fn return_arrived(&self, return_tx_id: &str, actor: Actor) -> Result<ReturnArrivedOutcome, ReconciliationError>;

    /// Deletes a single adjustment after checking that its order belongs to `team_id`. Returns the deleted row.
    ///
    /// No ledger notification is produced. The order's payment gate is taken so that the delete is serialised with
    /// every other writer to the order.
    async fn delete_adjustment(&self, adjustment_id: i64, team_id: i64) -> Result<Adjustment, ReconciliationError>;

    /// Corrects the order's estimated revenue (`mp_total`). Only orders created within the last
    /// [`REVENUE_EDIT_WINDOW_DAYS`](crate::pipeline::REVENUE_EDIT_WINDOW_DAYS) days can be corrected. A changed total queues an
    /// `EditReceivable` notification carrying the new total; an unchanged one is a no-op.
    async fn change_estimated_revenue(
        &self,
        order_id: i64,
        team_id: i64,
        total: Money,
    ) -> Result<RevenueChangeOutcome, ReconciliationError>;

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, ReconciliationError>;

    /// All adjustments for the order, ordered by event time.
    async fn fetch_adjustments_for_order(&self, order_id: i64) -> Result<Vec<Adjustment>, ReconciliationError>;

    async fn fetch_payment_meta(&self, order_id: i64) -> Result<Option<PaymentMeta>, ReconciliationError>;

    async fn fetch_audit_trail(&self, order_id: i64) -> Result<Vec<AuditTimestamp>, ReconciliationError>;

    async fn fetch_tag_relations(&self, order_id: i64) -> Result<Vec<TagRelation>, ReconciliationError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), ReconciliationError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    #[error("Validation failed. {0}")]
    Validation(String),
    #[error("{0}")]
    Classification(#[from] ClassificationError),
    #[error("Could not acquire the payment gate lock in time. {0}")]
    LockContention(String),
    #[error("Local state is committed, but {pending} ledger notification(s) could not be delivered. {source}")]
    Notification { adjustment_id: Option<i64>, pending: usize, source: LedgerError },
    #[error("The stream was rolled back by its producer. {0}")]
    StreamAbort(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(i64),
    #[error("The requested adjustment {0} does not exist")]
    AdjustmentNotFound(i64),
    #[error("The requested outbox entry {0} does not exist")]
    OutboxEntryNotFound(i64),
    #[error("Pipeline step {0:?} ran before its inputs were available")]
    StepOutOfOrder(Step),
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
}

impl ReconciliationError {
    /// Errors for which resubmitting the identical request is both safe and likely to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention(_) | Self::Notification { .. })
    }
}

// SQLITE_BUSY and SQLITE_LOCKED, including their extended result codes.
fn is_lock_contention(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok()).map(|c| matches!(c & 0xff, 5 | 6)).unwrap_or(false)
}

impl From<sqlx::Error> for ReconciliationError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) if is_lock_contention(db_err.code().as_deref()) => {
                ReconciliationError::LockContention(e.to_string())
            },
            _ => ReconciliationError::DatabaseError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn busy_and_locked_codes_are_contention() {
        assert!(is_lock_contention(Some("5")));
        assert!(is_lock_contention(Some("517"))); // SQLITE_BUSY_SNAPSHOT
        assert!(is_lock_contention(Some("262"))); // SQLITE_LOCKED_SHAREDCACHE
        assert!(!is_lock_contention(Some("2067"))); // SQLITE_CONSTRAINT_UNIQUE
        assert!(!is_lock_contention(None));
    }

    #[test]
    fn retryable_errors() {
        assert!(ReconciliationError::LockContention("busy".into()).is_retryable());
        assert!(!ReconciliationError::Validation("team".into()).is_retryable());
        assert!(!ReconciliationError::StreamAbort("producer".into()).is_retryable());
    }
}
