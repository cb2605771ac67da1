use log::*;
use sqlx::SqliteConnection;

use crate::{
    db::traits::ReconciliationError,
    db_types::{AdjustmentType, PaymentMeta},
};

/// Acquires the order's payment gate within the caller's transaction, creating the gating row if it does not exist.
///
/// The upsert is a write, so from here until the transaction ends no other transaction can write to the database.
/// Concurrent callers block for the busy timeout and then fail with [`ReconciliationError::LockContention`].
pub async fn acquire(order_id: i64, conn: &mut SqliteConnection) -> Result<PaymentMeta, ReconciliationError> {
    let meta: PaymentMeta = sqlx::query_as(
        r#"
            INSERT INTO payment_meta (order_id) VALUES ($1)
            ON CONFLICT (order_id) DO UPDATE SET lock_count = lock_count + 1, updated_at = CURRENT_TIMESTAMP
            RETURNING *
        "#,
    )
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    trace!("🔒️ Payment gate for order {order_id} acquired (lock #{})", meta.lock_count);
    Ok(meta)
}

pub async fn fetch_payment_meta(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<PaymentMeta>, sqlx::Error> {
    let meta = sqlx::query_as("SELECT * FROM payment_meta WHERE order_id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(meta)
}

/// Evaluates the receivable latch for an adjustment of the given type. Returns the (possibly updated) meta, and
/// `true` if this call flipped the latch, i.e. this event creates the order's receivable.
///
/// `meta` must have been returned by [`acquire`] in the same transaction.
pub async fn latch(
    meta: PaymentMeta,
    adjustment_type: AdjustmentType,
    conn: &mut SqliteConnection,
) -> Result<(PaymentMeta, bool), ReconciliationError> {
    if meta.receivable_adjusted || !adjustment_type.creates_receivable() {
        return Ok((meta, false));
    }
    let meta = flip_latch(meta, conn).await?;
    Ok((meta, true))
}

/// Flips the latch unconditionally. A latch that is already set is returned unchanged.
pub async fn flip_latch(meta: PaymentMeta, conn: &mut SqliteConnection) -> Result<PaymentMeta, ReconciliationError> {
    if meta.receivable_adjusted {
        return Ok(meta);
    }
    let result: Option<PaymentMeta> = sqlx::query_as(
        r#"
            UPDATE payment_meta SET receivable_adjusted = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND receivable_adjusted = FALSE
            RETURNING *
        "#,
    )
    .bind(meta.id)
    .fetch_optional(conn)
    .await?;
    let meta = result.ok_or_else(|| {
        ReconciliationError::DatabaseError(format!(
            "The receivable latch for order {} changed while the payment gate was held",
            meta.order_id
        ))
    })?;
    info!("🔒️ Receivable latch set for order {}", meta.order_id);
    Ok(meta)
}
