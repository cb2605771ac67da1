//! `SqliteDatabase` is a concrete implementation of a reconciliation engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`traits`] module.
//!
//! [`traits`]: crate::db::traits
use std::{fmt::Debug, time::Duration};

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use log::*;
use sqlx::{SqliteConnection, SqlitePool};

use super::{
    adjustments,
    audit,
    db_url,
    new_pool,
    orders,
    outbox,
    payment_meta,
    pipeline,
    stream::StreamReconciler,
    write_tx::WriteTransaction,
};
use crate::{
    config::EngineConfig,
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
    db_types::{
        Actor,
        Adjustment,
        AuditTimestamp,
        LedgerCategory,
        LedgerNotification,
        Money,
        NewOrder,
        Order,
        OrderStatusType,
        OutboxEntry,
        PaymentMeta,
        RelationFrom,
        TagRelation,
    },
    pipeline::ReconciliationContext,
    stream::{StreamEvent, StreamSummary},
};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl ReconciliationDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Runs the reconciliation pipeline inside a single write transaction. The transaction only commits if every step
    /// succeeds; otherwise it is rolled back, discarding every write made by earlier steps.
    async fn reconcile_adjustment(&self, request: AdjustmentRequest) -> Result<ReconciliationOutcome, ReconciliationError> {
        let mut tx = WriteTransaction::begin(&self.pool).await?;
        let mut ctx = ReconciliationContext::new(request);
        let result = pipeline::run(&mut ctx, &mut tx).await;
        tx.finish(result).await?;
        let upsert = ctx.upsert.ok_or(ReconciliationError::DatabaseError("Pipeline produced no adjustment".into()))?;
        info!(
            "💸️ {} adjustment {} for order {} reconciled ({}). Notification queued: {}",
            upsert.adjustment.adjustment_type,
            upsert.adjustment.id,
            upsert.adjustment.order_id,
            upsert.state,
            ctx.queued.is_some()
        );
        Ok(ReconciliationOutcome {
            adjustment: upsert.adjustment,
            state: upsert.state,
            receivable_created: ctx.receivable_created,
            notification: ctx.queued,
        })
    }

    async fn apply_stream<S>(&self, mut events: S, actor: Actor) -> Result<StreamSummary, ReconciliationError>
    where S: Stream<Item = StreamEvent> + Unpin {
        let mut reconciler = StreamReconciler::begin(&self.pool, actor).await?;
        while let Some(event) = events.next().await {
            reconciler.apply(event).await?;
        }
        reconciler.commit().await
    }

    async fn complete_order(
        &self,
        order_id: i64,
        team_id: i64,
        actor: Actor,
    ) -> Result<CompletionOutcome, ReconciliationError> {
        let mut tx = WriteTransaction::begin(&self.pool).await?;
        let result = mark_completed(order_id, team_id, actor, &mut tx).await;
        let outcome = tx.finish(result).await?;
        info!("📝️ Order {order_id} completion recorded. {} tracking tags removed", outcome.tags_removed);
        Ok(outcome)
    }

    async fn return_arrived(&self, return_tx_id: &str, actor: Actor) -> Result<ReturnArrivedOutcome, ReconciliationError> {
        let mut tx = WriteTransaction::begin(&self.pool).await?;
        let result = record_return_arrival(return_tx_id, actor, &mut tx).await;
        let outcome = tx.finish(result).await?;
        info!(
            "📦️ Return {return_tx_id} for order {} arrived. Receivable cancelled: {}",
            outcome.order.id,
            outcome.notification.is_some()
        );
        Ok(outcome)
    }

    async fn delete_adjustment(&self, adjustment_id: i64, team_id: i64) -> Result<Adjustment, ReconciliationError> {
        let mut tx = WriteTransaction::begin(&self.pool).await?;
        let result = remove_adjustment(adjustment_id, team_id, &mut tx).await;
        let deleted = tx.finish(result).await?;
        info!(
            "🗑️ {} adjustment {adjustment_id} of {} deleted from order {} by team {team_id}",
            deleted.adjustment_type, deleted.amount, deleted.order_id
        );
        Ok(deleted)
    }

    async fn change_estimated_revenue(
        &self,
        order_id: i64,
        team_id: i64,
        total: Money,
    ) -> Result<RevenueChangeOutcome, ReconciliationError> {
        let mut tx = WriteTransaction::begin(&self.pool).await?;
        let result = rebase_estimated_revenue(order_id, team_id, total, &mut tx).await;
        let outcome = tx.finish(result).await?;
        if outcome.notification.is_some() {
            info!("💰️ Estimated revenue of order {order_id} changed from {} to {total}", outcome.previous_total);
        }
        Ok(outcome)
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_id(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_adjustments_for_order(&self, order_id: i64) -> Result<Vec<Adjustment>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let adjustments = adjustments::fetch_adjustments_for_order(order_id, &mut conn).await?;
        Ok(adjustments)
    }

    async fn fetch_payment_meta(&self, order_id: i64) -> Result<Option<PaymentMeta>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let meta = payment_meta::fetch_payment_meta(order_id, &mut conn).await?;
        Ok(meta)
    }

    async fn fetch_audit_trail(&self, order_id: i64) -> Result<Vec<AuditTimestamp>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let trail = audit::fetch_audit_trail(order_id, &mut conn).await?;
        Ok(trail)
    }

    async fn fetch_tag_relations(&self, order_id: i64) -> Result<Vec<TagRelation>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let tags = audit::fetch_tag_relations(order_id, &mut conn).await?;
        Ok(tags)
    }

    async fn close(&mut self) -> Result<(), ReconciliationError> {
        self.pool.close().await;
        Ok(())
    }
}

impl OutboxManagement for SqliteDatabase {
    async fn claim_next_outbox_entry(
        &self,
        order_id: i64,
        stale_before: chrono::DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let entry = outbox::claim_next(order_id, Utc::now(), stale_before, &mut conn).await?;
        if let Some(e) = &entry {
            trace!("📬️ Claimed outbox entry {} for order {order_id} (attempt {})", e.id, e.attempts);
        }
        Ok(entry)
    }

    async fn mark_outbox_delivered(&self, id: i64) -> Result<OutboxEntry, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        outbox::mark_delivered(id, Utc::now(), &mut conn).await
    }

    async fn release_outbox_entry(&self, id: i64, error: &str) -> Result<OutboxEntry, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        outbox::release(id, error, &mut conn).await
    }

    async fn fetch_outbox_for_order(&self, order_id: i64) -> Result<Vec<OutboxEntry>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let entries = outbox::fetch_for_order(order_id, &mut conn).await?;
        Ok(entries)
    }

    async fn fetch_orders_with_undelivered_outbox(&self) -> Result<Vec<i64>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let ids = outbox::orders_with_undelivered(&mut conn).await?;
        Ok(ids)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the `OMS_DATABASE_URL` environment variable.
    pub async fn new(max_connections: u32) -> Result<Self, ReconciliationError> {
        let url = db_url();
        SqliteDatabase::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, ReconciliationError> {
        let pool = new_pool(url, max_connections, DEFAULT_BUSY_TIMEOUT).await?;
        trace!("🗃️ Created new SQLite database connection pool for {url}");
        Ok(Self { url: url.to_string(), pool })
    }

    pub async fn new_with_config(config: &EngineConfig) -> Result<Self, ReconciliationError> {
        let pool = new_pool(&config.database_url, config.max_connections, config.lock_timeout).await?;
        trace!(
            "🗃️ Created new SQLite database connection pool for {} (busy timeout {:?})",
            config.database_url,
            config.lock_timeout
        );
        Ok(Self { url: config.database_url.clone(), pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts an order. Orders belong to the order service; this is for imports and test fixtures.
    pub async fn insert_order(&self, order: NewOrder) -> Result<Order, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::insert_order(order, &mut conn).await?;
        Ok(order)
    }

    /// Attaches a tag to an order. Tag management belongs to the order service; this is for imports and test fixtures.
    pub async fn tag_order(
        &self,
        order_id: i64,
        tag_id: i64,
        from: RelationFrom,
    ) -> Result<TagRelation, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let rel = audit::insert_tag_relation(order_id, tag_id, from, &mut conn).await?;
        Ok(rel)
    }
}

async fn mark_completed(
    order_id: i64,
    team_id: i64,
    actor: Actor,
    conn: &mut SqliteConnection,
) -> Result<CompletionOutcome, ReconciliationError> {
    let order = orders::fetch_order_by_id(order_id, conn).await?.ok_or(ReconciliationError::OrderNotFound(order_id))?;
    crate::pipeline::validate_ownership(&order, team_id)?;
    let (order, status_changed) = if order.status.blocks_completion() {
        debug!("📝️ Order {order_id} is {}. Status left unchanged", order.status);
        (order, false)
    } else {
        (orders::update_order_status(order_id, OrderStatusType::Completed, conn).await?, true)
    };
    audit::append_timestamp(order_id, OrderStatusType::Completed, actor, conn).await?;
    let tags_removed = audit::remove_tracking_tags(order_id, conn).await?;
    Ok(CompletionOutcome { order, status_changed, tags_removed })
}

async fn record_return_arrival(
    return_tx_id: &str,
    actor: Actor,
    conn: &mut SqliteConnection,
) -> Result<ReturnArrivedOutcome, ReconciliationError> {
    let order = orders::fetch_order_by_return_tx_id(return_tx_id, conn).await?.ok_or_else(|| {
        ReconciliationError::Validation(format!("No order found for inventory return transaction {return_tx_id}"))
    })?;
    let meta = payment_meta::acquire(order.id, conn).await?;
    let notification = if meta.receivable_adjusted {
        None
    } else {
        payment_meta::flip_latch(meta, conn).await?;
        let now = Utc::now();
        let notification = LedgerNotification {
            order_id: order.id,
            team_id: order.team_id,
            shop_id: order.shop_id,
            reference_id: format!("return-{}", order.id),
            amount: order.mp_total,
            description: format!("returned goods arrived for order {}", order.order_ref_id),
            category: LedgerCategory::CancelReceive,
            event_at: now,
            settle_at: Some(now),
        };
        Some(outbox::enqueue(notification, conn).await?)
    };
    let order = orders::update_order_status(order.id, OrderStatusType::ReturnCompleted, conn).await?;
    audit::append_timestamp(order.id, OrderStatusType::ReturnCompleted, actor, conn).await?;
    Ok(ReturnArrivedOutcome { order, notification })
}

async fn remove_adjustment(
    adjustment_id: i64,
    team_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Adjustment, ReconciliationError> {
    let adj = adjustments::fetch_adjustment(adjustment_id, conn)
        .await?
        .ok_or(ReconciliationError::AdjustmentNotFound(adjustment_id))?;
    let order =
        orders::fetch_order_by_id(adj.order_id, conn).await?.ok_or(ReconciliationError::OrderNotFound(adj.order_id))?;
    crate::pipeline::validate_ownership(&order, team_id)?;
    payment_meta::acquire(order.id, conn).await?;
    adjustments::delete_adjustment(adjustment_id, conn)
        .await?
        .ok_or(ReconciliationError::AdjustmentNotFound(adjustment_id))
}

async fn rebase_estimated_revenue(
    order_id: i64,
    team_id: i64,
    total: Money,
    conn: &mut SqliteConnection,
) -> Result<RevenueChangeOutcome, ReconciliationError> {
    let order = orders::fetch_order_by_id(order_id, conn).await?.ok_or(ReconciliationError::OrderNotFound(order_id))?;
    crate::pipeline::validate_ownership(&order, team_id)?;
    let now = Utc::now();
    crate::pipeline::validate_revenue_change(&order, total, now)?;
    let previous_total = order.mp_total;
    if previous_total == total {
        debug!("💰️ Estimated revenue of order {order_id} is already {total}. Nothing to do");
        return Ok(RevenueChangeOutcome { order, previous_total, notification: None });
    }
    payment_meta::acquire(order_id, conn).await?;
    let order = orders::update_mp_total(order_id, total, conn).await?;
    let notification = LedgerNotification {
        order_id,
        team_id: order.team_id,
        shop_id: order.shop_id,
        reference_id: format!("est-revenue-{order_id}"),
        amount: total,
        description: format!("estimated revenue of order {} changed from {previous_total}", order.order_ref_id),
        category: LedgerCategory::EditReceivable,
        event_at: now,
        settle_at: None,
    };
    let entry = outbox::enqueue(notification, conn).await?;
    Ok(RevenueChangeOutcome { order, previous_total, notification: Some(entry) })
}
