//! The stream reconciler keeps one SQLite transaction open for the whole of an inbound event stream.
use log::*;
use sqlx::{SqliteConnection, SqlitePool};

use super::{adjustments, audit, orders, payment_meta, write_tx::WriteTransaction};
use crate::{
    db::traits::ReconciliationError,
    db_types::{Actor, AdjustmentType, NewAdjustment, OrderStatusType},
    stream::{AdjustmentSet, CompletedSet, StreamEvent, StreamState, StreamSummary},
};

pub struct StreamReconciler {
    tx: Option<WriteTransaction>,
    state: StreamState,
    actor: Actor,
    summary: StreamSummary,
}

impl StreamReconciler {
    pub async fn begin(pool: &SqlitePool, actor: Actor) -> Result<Self, ReconciliationError> {
        let tx = WriteTransaction::begin(pool).await?;
        trace!("🌊️ Stream transaction opened");
        Ok(Self { tx: Some(tx), state: StreamState::Streaming, actor, summary: StreamSummary::default() })
    }

    /// Applies one event in place. Any error, including a `Rollback` event, aborts the stream: the transaction is
    /// rolled back and every subsequent call fails.
    pub async fn apply(&mut self, event: StreamEvent) -> Result<(), ReconciliationError> {
        let result = self.try_apply(event).await;
        if result.is_err() {
            self.abort().await;
        }
        result
    }

    async fn try_apply(&mut self, event: StreamEvent) -> Result<(), ReconciliationError> {
        let actor = self.actor;
        let conn = self.connection()?;
        match event {
            StreamEvent::Rollback { message } => {
                info!("🌊️ Stream rolled back by its producer. {message}");
                Err(ReconciliationError::StreamAbort(message))
            },
            StreamEvent::AdjustmentSet(event) => {
                let order_id = apply_adjustment_set(event, conn).await?;
                self.summary.adjustments_set += 1;
                self.summary.touch(order_id);
                Ok(())
            },
            StreamEvent::CompletedSet(event) => {
                let order_id = apply_completed_set(event, actor, conn).await?;
                self.summary.orders_completed += 1;
                self.summary.touch(order_id);
                Ok(())
            },
        }
    }

    fn connection(&mut self) -> Result<&mut SqliteConnection, ReconciliationError> {
        let state = self.state;
        match self.tx.as_mut() {
            Some(tx) if !state.is_terminal() => Ok(&mut **tx),
            _ => Err(ReconciliationError::StreamAbort(format!("The stream has already ended ({state})"))),
        }
    }

    async fn abort(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                // The transaction discards its connection on drop, which rolls back anyway
                warn!("🌊️ Could not roll back the stream transaction cleanly. {e}");
            }
        }
        self.state = StreamState::Aborted;
        debug!("🌊️ Stream aborted. {} applied events were discarded", self.summary.events_applied());
    }

    /// Commits everything applied so far. Only possible while the stream is still live.
    pub async fn commit(mut self) -> Result<StreamSummary, ReconciliationError> {
        let tx = match (self.state, self.tx.take()) {
            (StreamState::Streaming, Some(tx)) => tx,
            (state, _) => {
                return Err(ReconciliationError::StreamAbort(format!("Cannot commit a stream that is {state}")))
            },
        };
        tx.commit().await?;
        self.state = StreamState::Committed;
        info!(
            "🌊️ Stream committed. {} adjustments set and {} orders completed across {} orders",
            self.summary.adjustments_set,
            self.summary.orders_completed,
            self.summary.orders.len()
        );
        Ok(self.summary)
    }
}

/// Last-write-wins upsert on `(order, type)`. Returns the order id.
async fn apply_adjustment_set(event: AdjustmentSet, conn: &mut SqliteConnection) -> Result<i64, ReconciliationError> {
    let order = orders::resolve_order(event.team_id, &event.order, conn).await?;
    payment_meta::acquire(order.id, conn).await?;
    let adj = NewAdjustment::new(order.id, event.adjustment_type, event.amount, event.at)
        .with_shop_id(order.shop_id)
        .with_description(event.description);
    let result = adjustments::set_by_type(adj, conn).await?;
    debug!(
        "🌊️ {} adjustment {} on order {} set to {} ({})",
        result.adjustment.adjustment_type, result.adjustment.id, order.id, result.adjustment.amount, result.state
    );
    Ok(order.id)
}

/// Completes the order: status, withdrawal stamp, OrderFund settlement time, audit entry and tracking tag removal.
async fn apply_completed_set(
    event: CompletedSet,
    actor: Actor,
    conn: &mut SqliteConnection,
) -> Result<i64, ReconciliationError> {
    let order = orders::resolve_order(event.team_id, &event.order, conn).await?;
    payment_meta::acquire(order.id, conn).await?;
    orders::stamp_withdrawal(order.id, event.amount, Some(event.wd_at), conn).await?;
    orders::update_order_status(order.id, OrderStatusType::Completed, conn).await?;
    let n = adjustments::set_fund_at_for_type(order.id, AdjustmentType::OrderFund, event.wd_at, conn).await?;
    audit::append_timestamp(order.id, OrderStatusType::Completed, actor, conn).await?;
    let tags = audit::remove_tracking_tags(order.id, conn).await?;
    debug!("🌊️ Order {} completed. {n} fund adjustments settled, {tags} tracking tags removed", order.id);
    Ok(order.id)
}
