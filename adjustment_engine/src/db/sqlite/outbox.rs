use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db::traits::ReconciliationError,
    db_types::{LedgerNotification, OutboxEntry, OutboxStatus},
};

/// Writes a pending notification to the outbox. Call this inside the transaction that produced the notification, so
/// that it is committed (or discarded) together with the change it describes.
pub async fn enqueue(notification: LedgerNotification, conn: &mut SqliteConnection) -> Result<OutboxEntry, sqlx::Error> {
    let entry: OutboxEntry = sqlx::query_as(
        r#"
            INSERT INTO ledger_outbox
                (order_id, team_id, shop_id, reference_id, amount, description, category, event_at, settle_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
        "#,
    )
    .bind(notification.order_id)
    .bind(notification.team_id)
    .bind(notification.shop_id)
    .bind(notification.reference_id)
    .bind(notification.amount)
    .bind(notification.description)
    .bind(notification.category.to_string())
    .bind(notification.event_at)
    .bind(notification.settle_at)
    .bind(OutboxStatus::Pending.to_string())
    .fetch_one(conn)
    .await?;
    debug!("📬️ Queued {} notification {} of {} for order {}", entry.category, entry.id, entry.amount, entry.order_id);
    Ok(entry)
}

/// Claims the oldest undelivered entry for the order, if it is claimable. See
/// [`OutboxManagement::claim_next_outbox_entry`](crate::OutboxManagement::claim_next_outbox_entry).
pub async fn claim_next(
    order_id: i64,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<OutboxEntry>, sqlx::Error> {
    let entry = sqlx::query_as(
        r#"
            UPDATE ledger_outbox SET status = $1, attempts = attempts + 1, claimed_at = $2
            WHERE id = (
                SELECT id FROM ledger_outbox WHERE order_id = $3 AND status != $4 ORDER BY id LIMIT 1
            )
            AND (status = $5 OR (status = $1 AND claimed_at < $6))
            RETURNING *
        "#,
    )
    .bind(OutboxStatus::InFlight.to_string())
    .bind(now)
    .bind(order_id)
    .bind(OutboxStatus::Delivered.to_string())
    .bind(OutboxStatus::Pending.to_string())
    .bind(stale_before)
    .fetch_optional(conn)
    .await?;
    Ok(entry)
}

pub async fn mark_delivered(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<OutboxEntry, ReconciliationError> {
    let entry: Option<OutboxEntry> = sqlx::query_as(
        "UPDATE ledger_outbox SET status = $1, delivered_at = $2, last_error = NULL WHERE id = $3 RETURNING *",
    )
    .bind(OutboxStatus::Delivered.to_string())
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    entry.ok_or(ReconciliationError::OutboxEntryNotFound(id))
}

pub async fn release(id: i64, error: &str, conn: &mut SqliteConnection) -> Result<OutboxEntry, ReconciliationError> {
    let entry: Option<OutboxEntry> = sqlx::query_as(
        "UPDATE ledger_outbox SET status = $1, claimed_at = NULL, last_error = $2 WHERE id = $3 AND status = $4 \
         RETURNING *",
    )
    .bind(OutboxStatus::Pending.to_string())
    .bind(error)
    .bind(id)
    .bind(OutboxStatus::InFlight.to_string())
    .fetch_optional(conn)
    .await?;
    entry.ok_or(ReconciliationError::OutboxEntryNotFound(id))
}

pub async fn fetch_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OutboxEntry>, sqlx::Error> {
    let entries =
        sqlx::query_as("SELECT * FROM ledger_outbox WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await?;
    Ok(entries)
}

pub async fn orders_with_undelivered(conn: &mut SqliteConnection) -> Result<Vec<i64>, sqlx::Error> {
    let ids = sqlx::query_scalar(
        "SELECT DISTINCT order_id FROM ledger_outbox WHERE status != $1 ORDER BY order_id",
    )
    .bind(OutboxStatus::Delivered.to_string())
    .fetch_all(conn)
    .await?;
    Ok(ids)
}
