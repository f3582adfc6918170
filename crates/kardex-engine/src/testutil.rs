//! Shared helpers for engine tests: an in-memory database with a seeded
//! catalog and stock.

use chrono::{Duration, NaiveDate, Utc};

use kardex_core::Product;
use kardex_db::{Database, DbConfig};

use crate::ledger::StockLedger;

/// Fresh in-memory database with migrations applied.
pub async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// Creates a product; whole units only unless `allow_fractional`.
pub async fn seed_product(db: &Database, sku: &str, allow_fractional: bool) -> Product {
    db.products()
        .create(sku, &format!("{sku} (test)"), "unit", allow_fractional)
        .await
        .unwrap()
}

/// Receives `quantity` of `sku` into warehouse `W1` as one batch
/// expiring `expires_in_days` from now (None = no expiry).
pub async fn seed_stock(db: &Database, sku: &str, quantity: f64, expires_in_days: Option<i64>) {
    let expiry = expires_in_days.map(days_from_now);
    StockLedger::new(db.clone())
        .receive(
            sku,
            "W1",
            expires_in_days.map(|d| format!("B{d}")).as_deref(),
            expiry,
            quantity,
            "INTAKE-TEST",
            "tester",
        )
        .await
        .unwrap();
}

pub fn days_from_now(days: i64) -> NaiveDate {
    (Utc::now() + Duration::days(days)).date_naive()
}
