use std::fmt::Debug;

use futures_util::Stream;
use log::*;
use serde::Serialize;

use crate::{
    config::OutboxConfig,
    db::traits::{
        AdjustmentRequest,
        CompletionOutcome,
        OutboxManagement,
        ReconciliationDatabase,
        ReconciliationError,
        ReconciliationOutcome,
        ReturnArrivedOutcome,
        RevenueChangeOutcome,
    },
    db_types::{Actor, Adjustment, Money, OutboxEntry},
    ledger::LedgerClient,
    oms_api::outbox_drain::{drain_all_pending, drain_order, DrainReport},
    stream::{StreamEvent, StreamSummary},
};

/// The result of [`ReconciliationApi::apply_adjustment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjustmentReceipt {
    pub outcome: ReconciliationOutcome,
    /// The number of the order's ledger notifications delivered after commit. This includes any notifications left
    /// pending by earlier calls.
    pub delivered: usize,
}

/// `ReconciliationApi` is the primary API for recording marketplace financial events against orders and propagating
/// them to the accounting ledger.
///
/// Every operation commits its local changes first. Ledger notifications are written to the outbox as part of that
/// commit and delivered afterwards, outside any lock. A delivery failure never rolls back local state; it is reported
/// as [`ReconciliationError::Notification`] and the notification stays in the outbox. Resubmitting the same request is
/// safe and retries the delivery.
pub struct ReconciliationApi<B, L> {
    db: B,
    ledger: L,
    outbox: OutboxConfig,
}

impl<B, L> Debug for ReconciliationApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi ({:?})", self.outbox)
    }
}

impl<B, L> ReconciliationApi<B, L> {
    pub fn new(db: B, ledger: L) -> Self {
        Self { db, ledger, outbox: OutboxConfig::default() }
    }

    pub fn with_outbox_config(mut self, outbox: OutboxConfig) -> Self {
        self.outbox = outbox;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

impl<B, L> ReconciliationApi<B, L>
where
    B: ReconciliationDatabase + OutboxManagement,
    L: LedgerClient,
{
    /// Records a single marketplace financial event against an order.
    ///
    /// The event is validated, the order's payment gate is taken, the adjustment is diff-upserted, and at most one
    /// ledger notification is queued, all in one transaction. After the commit, the order's pending notifications are
    /// delivered (unless delivery on commit is switched off).
    pub async fn apply_adjustment(&self, request: AdjustmentRequest) -> Result<AdjustmentReceipt, ReconciliationError> {
        let order_id = request.order_id;
        let outcome = self.db.reconcile_adjustment(request).await?;
        let delivered = if self.outbox.drain_on_commit {
            self.deliver(order_id).await.map_err(|e| match e {
                ReconciliationError::Notification { pending, source, .. } => {
                    ReconciliationError::Notification { adjustment_id: Some(outcome.adjustment.id), pending, source }
                },
                e => e,
            })?
        } else {
            0
        };
        Ok(AdjustmentReceipt { outcome, delivered })
    }

    /// Applies an ordered stream of fund-set and completion events as one unit. Nothing is persisted unless the stream
    /// ends cleanly.
    pub async fn process_stream<S>(&self, events: S, actor: Actor) -> Result<StreamSummary, ReconciliationError>
    where S: Stream<Item = StreamEvent> + Unpin {
        let result = self.db.apply_stream(events, actor).await;
        match &result {
            Ok(summary) => debug!("🔄️🌊️ Stream applied {} events", summary.events_applied()),
            Err(e) => info!("🔄️🌊️ Stream aborted. Nothing was persisted. {e}"),
        }
        result
    }

    /// Marks the order as completed. See [`ReconciliationDatabase::complete_order`].
    pub async fn complete_order(
        &self,
        order_id: i64,
        team_id: i64,
        actor: Actor,
    ) -> Result<CompletionOutcome, ReconciliationError> {
        self.db.complete_order(order_id, team_id, actor).await
    }

    /// Records the arrival of returned goods, cancelling the receivable if it was never created.
    pub async fn return_arrived(
        &self,
        return_tx_id: &str,
        actor: Actor,
    ) -> Result<ReturnArrivedOutcome, ReconciliationError> {
        let outcome = self.db.return_arrived(return_tx_id, actor).await?;
        if outcome.notification.is_some() && self.outbox.drain_on_commit {
            self.deliver(outcome.order.id).await?;
        }
        Ok(outcome)
    }

    /// Deletes an adjustment on behalf of `team_id`, which must own the adjustment's order. The ledger is not told.
    pub async fn delete_adjustment(&self, adjustment_id: i64, team_id: i64) -> Result<Adjustment, ReconciliationError> {
        self.db.delete_adjustment(adjustment_id, team_id).await
    }

    /// Corrects the order's estimated revenue within a week of the order's creation, and re-bases its receivable on
    /// the ledger.
    pub async fn change_estimated_revenue(
        &self,
        order_id: i64,
        team_id: i64,
        total: Money,
    ) -> Result<RevenueChangeOutcome, ReconciliationError> {
        let outcome = self.db.change_estimated_revenue(order_id, team_id, total).await?;
        if outcome.notification.is_some() && self.outbox.drain_on_commit {
            self.deliver(order_id).await?;
        }
        Ok(outcome)
    }

    /// All adjustments recorded against the order, in event time order.
    pub async fn list_adjustments(&self, order_id: i64) -> Result<Vec<Adjustment>, ReconciliationError> {
        self.db.fetch_adjustments_for_order(order_id).await
    }

    /// The order's ledger notifications and their delivery state.
    pub async fn list_outbox(&self, order_id: i64) -> Result<Vec<OutboxEntry>, ReconciliationError> {
        self.db.fetch_outbox_for_order(order_id).await
    }

    /// Delivers every undelivered notification for every order. This is the external reconciliation sweep for
    /// notifications left behind by ledger outages or crashes between commit and delivery.
    pub async fn drain_all_pending(&self) -> Result<DrainReport, ReconciliationError> {
        drain_all_pending(&self.db, &self.ledger, self.outbox.claim_timeout).await
    }

    async fn deliver(&self, order_id: i64) -> Result<usize, ReconciliationError> {
        drain_order(&self.db, &self.ledger, order_id, self.outbox.claim_timeout).await
    }
}
