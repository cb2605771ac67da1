use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db::traits::ReconciliationError,
    db_types::{Adjustment, AdjustmentType, NewAdjustment, UpsertResult, UpsertState},
};

/// Fetches the adjustment with the natural key `(order_id, at, adjustment_type)`.
pub async fn fetch_by_natural_key(
    order_id: i64,
    at: DateTime<Utc>,
    adjustment_type: AdjustmentType,
    conn: &mut SqliteConnection,
) -> Result<Option<Adjustment>, sqlx::Error> {
    let adj = sqlx::query_as("SELECT * FROM adjustments WHERE order_id = $1 AND at = $2 AND adjustment_type = $3")
        .bind(order_id)
        .bind(at)
        .bind(adjustment_type.to_string())
        .fetch_optional(conn)
        .await?;
    Ok(adj)
}

/// The most recently created adjustment of the given type for the order, regardless of event time.
pub async fn fetch_latest_by_type(
    order_id: i64,
    adjustment_type: AdjustmentType,
    conn: &mut SqliteConnection,
) -> Result<Option<Adjustment>, sqlx::Error> {
    let adj = sqlx::query_as(
        "SELECT * FROM adjustments WHERE order_id = $1 AND adjustment_type = $2 ORDER BY id DESC LIMIT 1",
    )
    .bind(order_id)
    .bind(adjustment_type.to_string())
    .fetch_optional(conn)
    .await?;
    Ok(adj)
}

pub async fn fetch_adjustment(id: i64, conn: &mut SqliteConnection) -> Result<Option<Adjustment>, sqlx::Error> {
    let adj = sqlx::query_as("SELECT * FROM adjustments WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(adj)
}

/// Deletes the adjustment, returning the deleted row. `None` if there was no such adjustment.
pub async fn delete_adjustment(id: i64, conn: &mut SqliteConnection) -> Result<Option<Adjustment>, sqlx::Error> {
    let adj = sqlx::query_as("DELETE FROM adjustments WHERE id = $1 RETURNING *").bind(id).fetch_optional(conn).await?;
    Ok(adj)
}

pub async fn fetch_adjustments_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Adjustment>, sqlx::Error> {
    let adjustments =
        sqlx::query_as("SELECT * FROM adjustments WHERE order_id = $1 ORDER BY at ASC, id ASC")
            .bind(order_id)
            .fetch_all(conn)
            .await?;
    Ok(adjustments)
}

pub async fn insert_adjustment(adj: NewAdjustment, conn: &mut SqliteConnection) -> Result<Adjustment, sqlx::Error> {
    let adj: Adjustment = sqlx::query_as(
        r#"
            INSERT INTO adjustments
                (order_id, shop_id, adjustment_type, amount, at, fund_at, description, source, is_multi_region)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(adj.order_id)
    .bind(adj.shop_id)
    .bind(adj.adjustment_type.to_string())
    .bind(adj.amount)
    .bind(adj.at)
    .bind(adj.fund_at)
    .bind(adj.description)
    .bind(adj.source)
    .bind(adj.is_multi_region)
    .fetch_one(conn)
    .await?;
    Ok(adj)
}

/// Overwrites the mutable fields of an existing adjustment with those in `adj`.
async fn overwrite_adjustment(
    id: i64,
    adj: NewAdjustment,
    conn: &mut SqliteConnection,
) -> Result<Adjustment, ReconciliationError> {
    let result: Option<Adjustment> = sqlx::query_as(
        r#"
            UPDATE adjustments SET
                amount = $1,
                at = $2,
                fund_at = $3,
                source = $4,
                description = $5,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $6
            RETURNING *
        "#,
    )
    .bind(adj.amount)
    .bind(adj.at)
    .bind(adj.fund_at)
    .bind(adj.source)
    .bind(adj.description)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    result.ok_or_else(|| ReconciliationError::DatabaseError(format!("Adjustment {id} vanished during update")))
}

/// Diff-based upsert on the natural key `(order, at, type)`.
///
/// * No row for the key: the adjustment is inserted and the result is `Created`.
/// * A row with the same amount, event time and settlement time: nothing is written and the result is `Noop`.
/// * Otherwise the row is overwritten and the result is `Edited`.
///
/// Must be called while holding the order's payment gate, or the lookup and the write may race.
pub async fn upsert(adj: NewAdjustment, conn: &mut SqliteConnection) -> Result<UpsertResult, ReconciliationError> {
    let existing = fetch_by_natural_key(adj.order_id, adj.at, adj.adjustment_type, conn).await?;
    let result = match existing {
        None => {
            let adj = insert_adjustment(adj, conn).await?;
            debug!("💸️ {} adjustment {} of {} created for order {}", adj.adjustment_type, adj.id, adj.amount, adj.order_id);
            UpsertResult::new(adj, UpsertState::Created)
        },
        Some(prev) if prev.same_financials(&adj) => {
            trace!("💸️ Adjustment {} is unchanged. Nothing to do", prev.id);
            UpsertResult::new(prev, UpsertState::Noop)
        },
        Some(prev) => {
            let updated = overwrite_adjustment(prev.id, adj, conn).await?;
            debug!("💸️ Adjustment {} edited. Amount {} -> {}", prev.id, prev.amount, updated.amount);
            UpsertResult::new(updated, UpsertState::Edited)
        },
    };
    Ok(result)
}

/// Sets the amount of the order's adjustment of the given type, keyed on `(order, type)` only. If several rows share
/// the key, the most recently created one is updated. Inserts if there is none.
pub async fn set_by_type(
    adj: NewAdjustment,
    conn: &mut SqliteConnection,
) -> Result<UpsertResult, ReconciliationError> {
    match fetch_latest_by_type(adj.order_id, adj.adjustment_type, conn).await? {
        None => {
            let adj = insert_adjustment(adj, conn).await?;
            Ok(UpsertResult::new(adj, UpsertState::Created))
        },
        Some(prev) if prev.amount == adj.amount && prev.at == adj.at => Ok(UpsertResult::new(prev, UpsertState::Noop)),
        Some(prev) => {
            let result: Option<Adjustment> = sqlx::query_as(
                "UPDATE adjustments SET amount = $1, at = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $3 RETURNING *",
            )
            .bind(adj.amount)
            .bind(adj.at)
            .bind(prev.id)
            .fetch_optional(conn)
            .await?;
            let updated = result.ok_or_else(|| {
                ReconciliationError::DatabaseError(format!("Adjustment {} vanished during update", prev.id))
            })?;
            Ok(UpsertResult::new(updated, UpsertState::Edited))
        },
    }
}

/// Sets the settlement time of every adjustment of the given type on the order. Returns the number of rows touched.
pub async fn set_fund_at_for_type(
    order_id: i64,
    adjustment_type: AdjustmentType,
    fund_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
            UPDATE adjustments SET fund_at = $1, updated_at = CURRENT_TIMESTAMP
            WHERE order_id = $2 AND adjustment_type = $3
        "#,
    )
    .bind(fund_at)
    .bind(order_id)
    .bind(adjustment_type.to_string())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
