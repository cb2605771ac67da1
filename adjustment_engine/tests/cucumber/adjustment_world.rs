use std::collections::HashMap;

use adjustment_engine::{
    db_types::Order,
    test_utils::{
        ledger::RecordingLedger,
        prepare_env::{create_database, random_db_path, run_migrations},
    },
    ReconciliationApi,
    ReconciliationError,
    SqliteDatabase,
};
use chrono::{DateTime, TimeZone, Utc};
use cucumber::World;
use log::*;
use tokio::time::sleep;

pub type Api = ReconciliationApi<SqliteDatabase, RecordingLedger>;

#[derive(Default, Debug, World)]
pub struct AdjustmentWorld {
    pub system: Option<AdjustmentSystem>,
    /// Orders created by the scenario, keyed by reference id
    pub orders: HashMap<String, Order>,
    pub last_error: Option<ReconciliationError>,
}

#[derive(Debug)]
pub struct AdjustmentSystem {
    pub db_path: String,
    pub api: Api,
    pub ledger: RecordingLedger,
}

impl AdjustmentWorld {
    pub fn system(&self) -> &AdjustmentSystem {
        self.system.as_ref().expect("System not initialised")
    }

    pub fn api(&self) -> &Api {
        &self.system().api
    }

    pub fn ledger(&self) -> &RecordingLedger {
        &self.system().ledger
    }

    pub fn order(&self, ref_id: &str) -> &Order {
        self.orders.get(ref_id).unwrap_or_else(|| panic!("Order {ref_id} was never created"))
    }

    /// Records the outcome of an operation the scenario expects may fail.
    pub fn record<T>(&mut self, result: Result<T, ReconciliationError>) {
        self.last_error = result.err();
        if let Some(e) = &self.last_error {
            debug!("🥒️ Operation failed: {e}");
        }
    }
}

impl AdjustmentSystem {
    pub async fn new() -> Self {
        let url = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&url, 1).await.expect("Error creating connection to database");
        debug!("Created database: {url}");
        sleep(std::time::Duration::from_millis(50)).await;
        let ledger = RecordingLedger::new();
        let api = ReconciliationApi::new(db, ledger.clone());
        Self { db_path: url, api, ledger }
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}

/// Midnight on the given day of June 2024.
pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, d, 0, 0, 0).unwrap()
}

/// Maps an error onto the name used in the feature files.
pub fn error_kind(err: &ReconciliationError) -> &'static str {
    match err {
        ReconciliationError::Validation(_) => "validation",
        ReconciliationError::Classification(_) => "classification",
        ReconciliationError::LockContention(_) => "contention",
        ReconciliationError::Notification { .. } => "notification",
        ReconciliationError::StreamAbort(_) => "abort",
        ReconciliationError::OrderNotFound(_) | ReconciliationError::AdjustmentNotFound(_) => "not-found",
        ReconciliationError::OutboxEntryNotFound(_) => "outbox",
        ReconciliationError::StepOutOfOrder(_) => "pipeline",
        ReconciliationError::DatabaseError(_) => "database",
    }
}
