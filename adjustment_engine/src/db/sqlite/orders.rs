use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db::traits::ReconciliationError,
    db_types::{Money, NewOrder, Order, OrderIdentifier, OrderStatusType},
};

/// Inserts a new order. Orders are owned by the order service; this exists for fixtures and imports.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, sqlx::Error> {
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (order_ref_id, team_id, shop_id, status, mp_total, inventory_return_tx_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(order.order_ref_id)
    .bind(order.team_id)
    .bind(order.shop_id)
    .bind(order.status.to_string())
    .bind(order.mp_total)
    .bind(order.inventory_return_tx_id)
    .fetch_one(conn)
    .await?;
    debug!("📝️ Order [{}] inserted with id {}", order.order_ref_id, order.id);
    Ok(order)
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

/// Resolves an order as referred to by an inbound stream event. The order must belong to `team_id` and must not be
/// cancelled. An order whose marketplace shop has not been set cannot take part in reconciliation.
pub async fn resolve_order(
    team_id: i64,
    ident: &OrderIdentifier,
    conn: &mut SqliteConnection,
) -> Result<Order, ReconciliationError> {
    let (id, ref_id) = match ident {
        OrderIdentifier::Id(0) => return Err(ReconciliationError::Validation("Empty order id".into())),
        OrderIdentifier::RefId(r) if r.is_empty() => {
            return Err(ReconciliationError::Validation("Empty order reference id".into()))
        },
        OrderIdentifier::Id(id) => (*id, ""),
        OrderIdentifier::RefId(r) => (0, r.as_str()),
    };
    let order: Option<Order> = sqlx::query_as(
        r#"
            SELECT * FROM orders
            WHERE team_id = $1 AND (id = $2 OR order_ref_id = $3) AND status != $4
            LIMIT 1
        "#,
    )
    .bind(team_id)
    .bind(id)
    .bind(ref_id)
    .bind(OrderStatusType::Cancelled.to_string())
    .fetch_optional(conn)
    .await?;
    let order = order.ok_or_else(|| {
        ReconciliationError::Validation(format!("No active order {ident} found for team {team_id}"))
    })?;
    if order.shop_id == 0 {
        return Err(ReconciliationError::Validation(format!(
            "Order {} ({}) has no marketplace shop set",
            order.id, order.order_ref_id
        )));
    }
    Ok(order)
}

pub async fn fetch_order_by_return_tx_id(
    tx_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE inventory_return_tx_id = $1 ORDER BY id LIMIT 1")
        .bind(tx_id)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn update_order_status(
    id: i64,
    status: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Order, ReconciliationError> {
    let result: Option<Order> =
        sqlx::query_as("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status.to_string())
            .bind(id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(ReconciliationError::OrderNotFound(id))
}

/// Stamps the order's withdrawal fields: the amount withdrawn, the withdrawn flag and when it happened.
pub async fn stamp_withdrawal(
    id: i64,
    wd_total: Money,
    wd_fund_at: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> Result<Order, ReconciliationError> {
    let result: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET wd_total = $1, wd_fund = TRUE, wd_fund_at = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *
        "#,
    )
    .bind(wd_total)
    .bind(wd_fund_at)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Withdrawal of {wd_total} stamped on order {id}");
    result.ok_or(ReconciliationError::OrderNotFound(id))
}

/// Overwrites the order's marketplace (estimated revenue) total.
pub async fn update_mp_total(id: i64, mp_total: Money, conn: &mut SqliteConnection) -> Result<Order, ReconciliationError> {
    let result: Option<Order> =
        sqlx::query_as("UPDATE orders SET mp_total = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(mp_total)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(ReconciliationError::OrderNotFound(id))
}
