//! Write transactions that take the database write lock up front.
//!
//! sqlx opens transactions with a deferred `BEGIN`. Under WAL, a deferred transaction that reads before it writes
//! cannot wait for the write lock: the upgrade fails immediately with `SQLITE_BUSY` whatever the busy timeout is.
//! Every write path in this backend reads first, so it opens its transaction with `BEGIN IMMEDIATE` instead, which
//! waits on the busy handler like any other write.
//!
//! Callers end a transaction with [`WriteTransaction::finish`], or with an explicit commit or rollback. If a
//! [`WriteTransaction`] is dropped while still open (a cancelled future, a panic), its connection is detached from the
//! pool and closed. SQLite rolls back the open transaction when the connection closes, and no half-finished
//! transaction is ever handed back to the pool.
use std::ops::{Deref, DerefMut};

use log::*;
use sqlx::{pool::PoolConnection, Sqlite, SqliteConnection, SqlitePool};

use crate::db::traits::ReconciliationError;

pub struct WriteTransaction {
    conn: Option<PoolConnection<Sqlite>>,
    open: bool,
}

impl WriteTransaction {
    /// Acquires a connection and opens an immediate transaction on it, waiting up to the pool's busy timeout for the
    /// write lock.
    pub async fn begin(pool: &SqlitePool) -> Result<Self, ReconciliationError> {
        let conn = pool.acquire().await?;
        // Marked open before BEGIN is sent, so that a future dropped while waiting for the lock discards the connection
        let mut tx = Self { conn: Some(conn), open: true };
        if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(&mut *tx).await {
            tx.open = false;
            return Err(e.into());
        }
        Ok(tx)
    }

    /// If `COMMIT` fails the transaction is still open, and dropping `self` rolls it back.
    pub async fn commit(mut self) -> Result<(), ReconciliationError> {
        sqlx::query("COMMIT").execute(&mut *self).await?;
        self.open = false;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), ReconciliationError> {
        sqlx::query("ROLLBACK").execute(&mut *self).await?;
        self.open = false;
        Ok(())
    }

    /// Commits if `result` is `Ok`, and rolls back otherwise. The result is passed through, unless the commit fails.
    pub async fn finish<T>(self, result: Result<T, ReconciliationError>) -> Result<T, ReconciliationError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            },
            Err(e) => {
                if let Err(rb) = self.rollback().await {
                    warn!("🗃️ Could not roll back cleanly after '{e}'. The connection will be discarded. {rb}");
                }
                Err(e)
            },
        }
    }
}

impl Deref for WriteTransaction {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection
        self.conn.as_deref().unwrap_or_else(|| unreachable!("write transaction used after drop"))
    }
}

impl DerefMut for WriteTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().unwrap_or_else(|| unreachable!("write transaction used after drop"))
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Some(conn) = self.conn.take() {
            warn!("🗃️ Write transaction dropped before it finished. Closing its connection to roll it back");
            drop(conn.detach());
        }
    }
}
