//! # SQLite backend
//!
//! [`SqliteDatabase`] implements the backend traits. The modules below hold the "low-level" SQLite interactions as
//! simple functions that accept a `&mut SqliteConnection`. Callers obtain a connection from the pool, or open a
//! transaction and pass `&mut tx` through, without any other changes.
//!
//! SQLite has no `SELECT ... FOR UPDATE`. Every write path opens its transaction with `BEGIN IMMEDIATE` (see
//! [`write_tx`]), so it holds the database write lock from its first statement until it ends. Competing writers queue
//! on the busy handler for up to the configured busy timeout and only then fail with a lock contention error. The
//! payment gate row in `payment_meta` is still written first in every order-scoped transaction, so the gate counts
//! every serialised writer.
use std::{str::FromStr, time::Duration};

use log::*;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod adjustments;
pub mod audit;
pub mod orders;
pub mod outbox;
pub mod payment_meta;
mod pipeline;
mod sqlite_impl;
mod stream;
mod write_tx;

pub use sqlite_impl::SqliteDatabase;

const SQLITE_DB_URL: &str = "sqlite://data/oms_adjustments.db";

pub fn db_url() -> String {
    let result = std::env::var("OMS_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ OMS_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32, busy_timeout: Duration) -> Result<SqlitePool, SqlxError> {
    let options =
        SqliteConnectOptions::from_str(url)?.journal_mode(SqliteJournalMode::Wal).busy_timeout(busy_timeout);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}
