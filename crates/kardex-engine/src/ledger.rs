//! # Stock Ledger
//!
//! The single primitive every stock mutation in the system goes through,
//! plus the intake/adjustment operations that bring stock into existence.
//!
//! ## applyMovement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply_movement(conn, request)                                         │
//! │                                                                         │
//! │  1. lock the stock record row (touch UPDATE)                           │
//! │  2. read current quantities  → before                                  │
//! │  3. after = before + delta                                             │
//! │     after < 0 and !allow_negative  → StockInsufficient, no writes      │
//! │  4. persist new quantities (+ reserved_delta for combined ops)         │
//! │  5. append the MovementRecord (before/after snapshot, conversion      │
//! │     metadata, document reference)                                      │
//! │                                                                         │
//! │  No events emitted here - callers do, after commit.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use kardex_core::{
    ConversionInfo, CoreError, MovementKind, Shortage, StockMovement, QTY_EPSILON,
};
use kardex_db::repository::product::ProductRepository;
use kardex_db::repository::stock::StockRepository;
use kardex_db::Database;

use crate::error::{EngineError, EngineResult};

/// One requested ledger mutation.
#[derive(Debug, Clone)]
pub struct MovementRequest<'a> {
    pub stock_record_id: &'a str,
    /// Signed on-hand delta in base units; negative = outflow.
    pub delta: f64,
    /// Reserved-counter delta, for combined operations (reservation
    /// consumption decrements reserved and on-hand together). Zero for
    /// plain movements.
    pub reserved_delta: f64,
    pub kind: MovementKind,
    pub document_reference: &'a str,
    pub actor: &'a str,
    pub conversion: ConversionInfo,
    /// Whether on-hand may go below zero (credit-sale policy).
    pub allow_negative: bool,
}

/// The stock ledger: owns all writes to StockRecord and StockMovement.
#[derive(Debug, Clone)]
pub struct StockLedger {
    db: Database,
    stock: StockRepository,
    products: ProductRepository,
}

impl StockLedger {
    /// Creates a ledger over the given database.
    pub fn new(db: Database) -> Self {
        let stock = db.stock();
        let products = db.products();
        StockLedger {
            db,
            stock,
            products,
        }
    }

    /// Atomically applies one movement to one stock record.
    ///
    /// Must run inside the caller's transaction; the first statement is a
    /// row-lock touch, so concurrent appliers serialize per record.
    ///
    /// ## Failure
    /// - `StockInsufficient` when the result would go negative and
    ///   `allow_negative` is not set (recoverable, caller decides)
    /// - `RecordNotFound` when the stock record does not exist
    pub async fn apply_movement(
        &self,
        conn: &mut SqliteConnection,
        request: MovementRequest<'_>,
    ) -> EngineResult<StockMovement> {
        self.stock.lock_record(conn, request.stock_record_id).await?;
        let record = self.stock.get_record_tx(conn, request.stock_record_id).await?;

        let before = record.quantity_on_hand;
        let after = before + request.delta;

        if after < -QTY_EPSILON && !request.allow_negative {
            // Only the error path needs the SKU; resolve it here so the
            // shortage detail is readable to the caller.
            let product = self.products.get_by_id_tx(conn, &record.product_id).await?;
            return Err(EngineError::Core(CoreError::StockInsufficient {
                document: request.document_reference.to_string(),
                shortages: vec![Shortage {
                    product_id: record.product_id.clone(),
                    sku: product.sku,
                    needed: -request.delta,
                    available: before,
                }],
            }));
        }

        let new_reserved = record.quantity_reserved + request.reserved_delta;
        debug_assert!(new_reserved > -QTY_EPSILON, "reserved counter underflow");

        self.stock
            .set_quantities(conn, &record.id, after, new_reserved.max(0.0))
            .await?;

        let movement = StockMovement {
            id: Uuid::new_v4().to_string(),
            stock_record_id: record.id.clone(),
            product_id: record.product_id.clone(),
            warehouse_id: record.warehouse_id.clone(),
            kind: request.kind,
            quantity_delta: request.delta,
            quantity_before: before,
            quantity_after: after,
            document_reference: request.document_reference.to_string(),
            requested_quantity: request.conversion.requested_quantity,
            requested_unit: request.conversion.requested_unit.clone(),
            base_unit: request.conversion.base_unit.clone(),
            conversion_factor: request.conversion.conversion_factor,
            conversion_applied: request.conversion.conversion_applied,
            actor: request.actor.to_string(),
            created_at: Utc::now(),
        };

        self.stock.insert_movement(conn, &movement).await?;

        debug!(
            record = %record.id,
            kind = %request.kind,
            before,
            after,
            document = %request.document_reference,
            "Movement applied"
        );

        Ok(movement)
    }

    /// Brings stock into a warehouse (purchase intake).
    ///
    /// Creates the stock record on first entry for the
    /// (product, warehouse, batch) key; subsequent intakes of the same
    /// batch accumulate on the existing record.
    pub async fn receive(
        &self,
        sku: &str,
        warehouse_id: &str,
        batch_code: Option<&str>,
        expiry_date: Option<NaiveDate>,
        quantity: f64,
        document_reference: &str,
        actor: &str,
    ) -> EngineResult<StockMovement> {
        if quantity <= 0.0 {
            return Err(EngineError::Core(
                kardex_core::ValidationError::MustBePositive {
                    field: "quantity".to_string(),
                }
                .into(),
            ));
        }

        let product = self
            .products
            .get_by_sku(sku)
            .await?
            .ok_or_else(|| EngineError::Core(CoreError::ProductNotFound(sku.to_string())))?;

        let mut tx = self.db.begin_write().await?;

        self.stock
            .lock_stock(&mut tx, &product.id, warehouse_id)
            .await?;

        let existing = self
            .stock
            .candidates_fifo(&mut tx, &product.id, warehouse_id, true)
            .await?;
        let record = match existing
            .into_iter()
            .find(|r| r.batch_code.as_deref() == batch_code && r.expiry_date == expiry_date)
        {
            Some(record) => record,
            None => {
                self.stock
                    .create_record(&mut tx, &product.id, warehouse_id, batch_code, expiry_date)
                    .await?
            }
        };

        let movement = self
            .apply_movement(
                &mut tx,
                MovementRequest {
                    stock_record_id: &record.id,
                    delta: quantity,
                    reserved_delta: 0.0,
                    kind: MovementKind::PurchaseIn,
                    document_reference,
                    actor,
                    conversion: ConversionInfo::default(),
                    allow_negative: false,
                },
            )
            .await?;

        tx.commit().await.map_err(kardex_db::DbError::from)?;
        Ok(movement)
    }

    /// Manual stock correction (count adjustment or waste write-off).
    ///
    /// Positive deltas use `AdjustmentIn`; negative deltas use the given
    /// outflow kind (`AdjustmentOut` or `WasteOut`) and never drive
    /// on-hand negative.
    pub async fn adjust(
        &self,
        stock_record_id: &str,
        delta: f64,
        kind: MovementKind,
        document_reference: &str,
        actor: &str,
    ) -> EngineResult<StockMovement> {
        let mut tx = self.db.begin_write().await?;

        let movement = self
            .apply_movement(
                &mut tx,
                MovementRequest {
                    stock_record_id,
                    delta,
                    reserved_delta: 0.0,
                    kind,
                    document_reference,
                    actor,
                    conversion: ConversionInfo::default(),
                    allow_negative: false,
                },
            )
            .await?;

        tx.commit().await.map_err(kardex_db::DbError::from)?;
        Ok(movement)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_product, test_db};

    #[tokio::test]
    async fn test_receive_creates_record_and_movement() {
        let db = test_db().await;
        seed_product(&db, "WATER-500", false).await;
        let ledger = StockLedger::new(db.clone());

        let movement = ledger
            .receive("WATER-500", "W1", Some("B1"), None, 100.0, "PO-1", "tester")
            .await
            .unwrap();

        assert_eq!(movement.kind, MovementKind::PurchaseIn);
        assert_eq!(movement.quantity_before, 0.0);
        assert_eq!(movement.quantity_after, 100.0);

        let record = db.stock().get_record(&movement.stock_record_id).await.unwrap();
        assert_eq!(record.quantity_on_hand, 100.0);
        assert_eq!(record.quantity_reserved, 0.0);
        assert_eq!(record.quantity_available, 100.0);
    }

    #[tokio::test]
    async fn test_receive_same_batch_accumulates() {
        let db = test_db().await;
        seed_product(&db, "WATER-500", false).await;
        let ledger = StockLedger::new(db.clone());

        let first = ledger
            .receive("WATER-500", "W1", Some("B1"), None, 40.0, "PO-1", "tester")
            .await
            .unwrap();
        let second = ledger
            .receive("WATER-500", "W1", Some("B1"), None, 60.0, "PO-2", "tester")
            .await
            .unwrap();

        assert_eq!(first.stock_record_id, second.stock_record_id);
        let record = db.stock().get_record(&first.stock_record_id).await.unwrap();
        assert_eq!(record.quantity_on_hand, 100.0);
    }

    #[tokio::test]
    async fn test_receive_rejects_non_positive_quantity() {
        let db = test_db().await;
        seed_product(&db, "WATER-500", false).await;
        let ledger = StockLedger::new(db.clone());

        let err = ledger
            .receive("WATER-500", "W1", None, None, 0.0, "PO-1", "tester")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_adjust_never_drives_negative() {
        let db = test_db().await;
        seed_product(&db, "WATER-500", false).await;
        let ledger = StockLedger::new(db.clone());

        let intake = ledger
            .receive("WATER-500", "W1", None, None, 10.0, "PO-1", "tester")
            .await
            .unwrap();

        let err = ledger
            .adjust(&intake.stock_record_id, -12.0, MovementKind::WasteOut, "ADJ-1", "tester")
            .await
            .unwrap_err();
        match err {
            EngineError::Core(CoreError::StockInsufficient { shortages, .. }) => {
                // Shortage detail names the product, not its internal id.
                assert_eq!(shortages[0].sku, "WATER-500");
                assert_eq!(shortages[0].available, 10.0);
            }
            other => panic!("expected StockInsufficient, got {other:?}"),
        }

        // Nothing written; the record and its movement trail are intact.
        let record = db.stock().get_record(&intake.stock_record_id).await.unwrap();
        assert_eq!(record.quantity_on_hand, 10.0);
        let sum = db.stock().movement_sum(&intake.stock_record_id).await.unwrap();
        assert_eq!(sum, 10.0);
    }

    #[tokio::test]
    async fn test_movement_sum_matches_on_hand() {
        let db = test_db().await;
        seed_product(&db, "WATER-500", false).await;
        let ledger = StockLedger::new(db.clone());

        let intake = ledger
            .receive("WATER-500", "W1", None, None, 50.0, "PO-1", "tester")
            .await
            .unwrap();
        ledger
            .adjust(&intake.stock_record_id, -8.0, MovementKind::WasteOut, "ADJ-1", "tester")
            .await
            .unwrap();
        ledger
            .adjust(&intake.stock_record_id, 3.0, MovementKind::AdjustmentIn, "ADJ-2", "tester")
            .await
            .unwrap();

        let record = db.stock().get_record(&intake.stock_record_id).await.unwrap();
        let sum = db.stock().movement_sum(&intake.stock_record_id).await.unwrap();
        assert_eq!(record.quantity_on_hand, 45.0);
        assert_eq!(sum, record.quantity_on_hand - record.initial_quantity);
    }
}
