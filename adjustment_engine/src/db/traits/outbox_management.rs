use chrono::{DateTime, Utc};

use crate::{db::traits::ReconciliationError, db_types::OutboxEntry};

/// Behaviour for the durable ledger outbox.
///
/// Rows are written by [`ReconciliationDatabase`](crate::ReconciliationDatabase) operations in the same transaction as
/// the change they describe. Delivery is at-least-once: a row is claimed, dispatched, then marked delivered. A claim
/// that is never resolved (e.g. the process died mid-dispatch) becomes claimable again once it is older than the
/// caller's staleness cutoff.
#[allow(async_fn_in_trait)]
pub trait OutboxManagement {
    /// Claims the oldest undelivered entry for the order, provided it is `Pending` or an abandoned `InFlight` claim
    /// made before `stale_before`. Returns `None` when there is nothing to claim, including when the oldest entry is
    /// currently claimed by someone else. Entries for one order are therefore always dispatched in order.
    async fn claim_next_outbox_entry(
        &self,
        order_id: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, ReconciliationError>;

    /// Marks a claimed entry as delivered.
    async fn mark_outbox_delivered(&self, id: i64) -> Result<OutboxEntry, ReconciliationError>;

    /// Returns a claimed entry to `Pending` after a failed dispatch, recording the error.
    async fn release_outbox_entry(&self, id: i64, error: &str) -> Result<OutboxEntry, ReconciliationError>;

    /// All outbox entries for the order, oldest first.
    async fn fetch_outbox_for_order(&self, order_id: i64) -> Result<Vec<OutboxEntry>, ReconciliationError>;

    /// The ids of every order with at least one undelivered outbox entry.
    async fn fetch_orders_with_undelivered_outbox(&self) -> Result<Vec<i64>, ReconciliationError>;
}
