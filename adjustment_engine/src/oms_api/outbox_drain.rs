use std::time::Duration;

use chrono::Utc;
use log::*;
use serde::Serialize;

use crate::{
    db::traits::{OutboxManagement, ReconciliationError},
    db_types::OutboxStatus,
    ledger::LedgerClient,
};

/// The result of a sweep over every order with undelivered notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub orders: usize,
    pub delivered: usize,
    /// Orders whose drain stopped on a ledger failure. Their notifications remain pending.
    pub failed_orders: Vec<i64>,
}

/// Delivers the order's undelivered notifications to the ledger, oldest first, and returns how many were delivered.
///
/// Draining stops at the first ledger failure: the failed entry is released back to `Pending` and a
/// [`ReconciliationError::Notification`] is returned. Later entries are not attempted, so the ledger always sees an
/// order's notifications in the order they were committed.
pub async fn drain_order<B, L>(
    db: &B,
    ledger: &L,
    order_id: i64,
    claim_timeout: Duration,
) -> Result<usize, ReconciliationError>
where
    B: OutboxManagement,
    L: LedgerClient,
{
    let timeout = chrono::Duration::from_std(claim_timeout).unwrap_or_else(|_| chrono::Duration::days(365));
    let stale_before = Utc::now() - timeout;
    let mut delivered = 0;
    while let Some(entry) = db.claim_next_outbox_entry(order_id, stale_before).await? {
        match ledger.submit_adjustment(&entry.notification()).await {
            Ok(()) => {
                db.mark_outbox_delivered(entry.id).await?;
                delivered += 1;
                trace!("📬️ Outbox entry {} for order {order_id} delivered", entry.id);
            },
            Err(e) => {
                db.release_outbox_entry(entry.id, &e.to_string()).await?;
                let pending = db
                    .fetch_outbox_for_order(order_id)
                    .await?
                    .iter()
                    .filter(|e| e.status != OutboxStatus::Delivered)
                    .count();
                warn!(
                    "📬️ Could not deliver outbox entry {} for order {order_id} (attempt {}). {pending} notifications \
                     remain pending. {e}",
                    entry.id, entry.attempts
                );
                return Err(ReconciliationError::Notification { adjustment_id: None, pending, source: e });
            },
        }
    }
    if delivered > 0 {
        debug!("📬️ Delivered {delivered} notifications for order {order_id}");
    }
    Ok(delivered)
}

/// Sweeps every order with undelivered notifications, including entries whose claim has gone stale. A ledger failure
/// on one order does not stop the sweep; database errors do.
pub async fn drain_all_pending<B, L>(db: &B, ledger: &L, claim_timeout: Duration) -> Result<DrainReport, ReconciliationError>
where
    B: OutboxManagement,
    L: LedgerClient,
{
    let order_ids = db.fetch_orders_with_undelivered_outbox().await?;
    let mut report = DrainReport { orders: order_ids.len(), ..Default::default() };
    for order_id in order_ids {
        match drain_order(db, ledger, order_id, claim_timeout).await {
            Ok(n) => report.delivered += n,
            Err(ReconciliationError::Notification { .. }) => report.failed_orders.push(order_id),
            Err(e) => return Err(e),
        }
    }
    info!(
        "📬️ Outbox sweep complete. {} notifications delivered across {} orders. {} orders still pending",
        report.delivered,
        report.orders,
        report.failed_orders.len()
    );
    Ok(report)
}
