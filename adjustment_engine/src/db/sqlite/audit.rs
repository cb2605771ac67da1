use chrono::Utc;
use sqlx::SqliteConnection;

use crate::db_types::{Actor, AuditTimestamp, OrderStatusType, RelationFrom, TagRelation};

/// Appends an entry to the order's status audit trail.
pub async fn append_timestamp(
    order_id: i64,
    status: OrderStatusType,
    actor: Actor,
    conn: &mut SqliteConnection,
) -> Result<AuditTimestamp, sqlx::Error> {
    let ts = sqlx::query_as(
        r#"
            INSERT INTO order_timestamps (order_id, actor_id, actor_type, order_status, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(actor.id)
    .bind(actor.actor_type.to_string())
    .bind(status.to_string())
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(ts)
}

pub async fn fetch_audit_trail(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<AuditTimestamp>, sqlx::Error> {
    let trail = sqlx::query_as("SELECT * FROM order_timestamps WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(trail)
}

pub async fn insert_tag_relation(
    order_id: i64,
    tag_id: i64,
    from: RelationFrom,
    conn: &mut SqliteConnection,
) -> Result<TagRelation, sqlx::Error> {
    let rel = sqlx::query_as(
        "INSERT INTO order_tag_relations (order_id, tag_id, relation_from) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(order_id)
    .bind(tag_id)
    .bind(from.to_string())
    .fetch_one(conn)
    .await?;
    Ok(rel)
}

pub async fn fetch_tag_relations(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<TagRelation>, sqlx::Error> {
    let tags = sqlx::query_as("SELECT * FROM order_tag_relations WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(tags)
}

/// Removes the tags that the shipment tracking synchroniser attached to the order. Returns the number removed.
pub async fn remove_tracking_tags(order_id: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM order_tag_relations WHERE order_id = $1 AND relation_from = $2")
        .bind(order_id)
        .bind(RelationFrom::Tracking.to_string())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
