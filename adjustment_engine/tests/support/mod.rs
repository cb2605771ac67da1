#![allow(dead_code)]

use adjustment_engine::{
    db_types::{AdjustmentType, Money, NewOrder, Order},
    test_utils::{ledger::RecordingLedger, prepare_env::prepare_test_env, prepare_env::random_db_path},
    AdjustmentRequest,
    EngineConfig,
    ReconciliationApi,
    SqliteDatabase,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Connection, SqliteConnection};

pub type TestApi = ReconciliationApi<SqliteDatabase, RecordingLedger>;

pub struct TestSystem {
    pub url: String,
    pub api: TestApi,
    pub ledger: RecordingLedger,
}

pub async fn setup() -> TestSystem {
    setup_with(|config| config).await
}

/// Like [`setup`], but lets the test adjust the engine configuration first.
pub async fn setup_with<F>(configure: F) -> TestSystem
where F: FnOnce(EngineConfig) -> EngineConfig {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let config = configure(EngineConfig::new(url.clone()));
    let db = SqliteDatabase::new_with_config(&config).await.expect("Error creating database");
    let ledger = RecordingLedger::new();
    let api = ReconciliationApi::new(db, ledger.clone()).with_outbox_config(config.outbox);
    TestSystem { url, api, ledger }
}

impl TestSystem {
    /// Inserts an order owned by `team_id`, with marketplace shop 9 and a marketplace total of 1,000.
    pub async fn order(&self, ref_id: &str, team_id: i64) -> Order {
        self.api.db().insert_order(NewOrder::new(ref_id, team_id, 9, Money::from(1_000))).await.expect("Error inserting order")
    }
}

/// Opens a separate connection that holds the database write lock until `ROLLBACK` is executed on it.
pub async fn hold_write_lock(url: &str) -> SqliteConnection {
    let mut conn = SqliteConnection::connect(url).await.expect("Error opening blocking connection");
    sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await.expect("Error taking the write lock");
    conn
}

pub async fn release_write_lock(mut conn: SqliteConnection) {
    sqlx::query("ROLLBACK").execute(&mut conn).await.expect("Error releasing the write lock");
}

pub fn t(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
}

pub fn request(order: &Order, adjustment_type: AdjustmentType, amount: i64, at: DateTime<Utc>) -> AdjustmentRequest {
    AdjustmentRequest::new(order.id, order.team_id, order.shop_id, adjustment_type, Money::from(amount), at, t(28, 0))
        .with_description(format!("{adjustment_type} from marketplace"))
        .with_source("test")
}
