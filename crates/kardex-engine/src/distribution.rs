//! # Distribution Engine
//!
//! FIFO-by-expiry stock consumption for confirmed orders, idempotent
//! reversal for cancelled orders, and the read-only availability check.
//!
//! ## Consume
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  consume(lines, document, warehouse, allow_negative)                   │
//! │                                                                         │
//! │  BEFORE the transaction (no locks held):                               │
//! │    resolve each line: product lookup, sale-unit → base-unit,           │
//! │    fractional enforcement                                              │
//! │                                                                         │
//! │  INSIDE one transaction (all lines, all records, all-or-nothing):      │
//! │    per line:                                                            │
//! │      lock stock for (product, warehouse)                               │
//! │      query candidates FIFO (expiry asc, nulls last, creation asc)      │
//! │      plan greedy draw; shortfall → collect shortage, keep checking     │
//! │      apply one movement per (line, record) slice                       │
//! │    any shortage collected → StockInsufficient, transaction dropped     │
//! │                                                                         │
//! │  One MovementRecord per record touched; partial consumption across    │
//! │  records for a single line is expected.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::SqliteConnection;
use tracing::{debug, info};

use kardex_core::{
    plan_allocation, resolve_quantity, AvailabilityReport, CoreError, DocumentLine, MovementKind,
    Product, ResolvedQuantity, Shortage, StockMovement, REVERSAL_SUFFIX,
};
use kardex_db::repository::product::ProductRepository;
use kardex_db::repository::stock::StockRepository;
use kardex_db::Database;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{MovementRequest, StockLedger};

/// A document line after product lookup and unit resolution.
#[derive(Debug, Clone)]
pub struct ResolvedLine {
    pub product: Product,
    pub resolved: ResolvedQuantity,
    pub unit_price_cents: i64,
}

/// Result of an idempotent reversal.
#[derive(Debug, Clone)]
pub struct ReversalSummary {
    /// Total base-unit quantity added back (zero for a no-op).
    pub restored_quantity: f64,
    /// The positive movements written (empty for a no-op).
    pub movements: Vec<StockMovement>,
}

/// The distribution engine: consumes and restores on-hand stock.
#[derive(Debug, Clone)]
pub struct DistributionEngine {
    db: Database,
    stock: StockRepository,
    products: ProductRepository,
    ledger: StockLedger,
}

impl DistributionEngine {
    /// Creates a distribution engine over the given database.
    pub fn new(db: Database) -> Self {
        let stock = db.stock();
        let products = db.products();
        let ledger = StockLedger::new(db.clone());
        DistributionEngine {
            db,
            stock,
            products,
            ledger,
        }
    }

    // =========================================================================
    // Line resolution (pre-lock validation)
    // =========================================================================

    /// Resolves raw document lines: product lookup, conversion, and
    /// fractional enforcement. Runs before any lock is taken, so a
    /// rejected quantity never creates a movement.
    pub async fn resolve_lines(&self, lines: &[DocumentLine]) -> EngineResult<Vec<ResolvedLine>> {
        let mut resolved = Vec::with_capacity(lines.len());

        for line in lines {
            let product = self
                .products
                .get_by_sku(&line.sku)
                .await?
                .ok_or_else(|| EngineError::Core(CoreError::ProductNotFound(line.sku.clone())))?;
            let conversions = self.products.conversions_for(&product.id).await?;
            let quantity =
                resolve_quantity(&product, &conversions, line.quantity, line.unit.as_deref())?;

            resolved.push(ResolvedLine {
                product,
                resolved: quantity,
                unit_price_cents: line.unit_price_cents,
            });
        }

        Ok(resolved)
    }

    // =========================================================================
    // Consume
    // =========================================================================

    /// Consumes stock for a document in its own transaction.
    pub async fn consume(
        &self,
        lines: &[DocumentLine],
        document_reference: &str,
        warehouse_id: &str,
        allow_negative: bool,
        actor: &str,
    ) -> EngineResult<Vec<StockMovement>> {
        let resolved = self.resolve_lines(lines).await?;

        let mut tx = self.db.begin_write().await?;
        let movements = self
            .consume_tx(
                &mut tx,
                &resolved,
                document_reference,
                warehouse_id,
                allow_negative,
                actor,
            )
            .await?;
        tx.commit().await.map_err(kardex_db::DbError::from)?;

        info!(
            document = document_reference,
            movements = movements.len(),
            "Stock consumed"
        );
        Ok(movements)
    }

    /// Consumes stock inside the caller's transaction (order creation
    /// runs this in the same transaction as the order rows).
    pub async fn consume_tx(
        &self,
        conn: &mut SqliteConnection,
        resolved: &[ResolvedLine],
        document_reference: &str,
        warehouse_id: &str,
        allow_negative: bool,
        actor: &str,
    ) -> EngineResult<Vec<StockMovement>> {
        let mut movements = Vec::new();
        let mut shortages: Vec<Shortage> = Vec::new();

        for line in resolved {
            let needed = line.resolved.base_quantity;

            self.stock
                .lock_stock(conn, &line.product.id, warehouse_id)
                .await?;
            let candidates = self
                .stock
                .candidates_fifo(conn, &line.product.id, warehouse_id, allow_negative)
                .await?;

            let plan = match plan_allocation(&candidates, needed, allow_negative) {
                Ok(plan) => plan,
                Err(shortfall) => {
                    shortages.push(Shortage {
                        product_id: line.product.id.clone(),
                        sku: line.product.sku.clone(),
                        needed: shortfall.needed,
                        available: shortfall.available,
                    });
                    continue;
                }
            };

            // A line already short? Keep planning to report every short
            // line, but stop writing - the transaction is doomed.
            if !shortages.is_empty() {
                continue;
            }

            for slice in plan {
                let movement = self
                    .ledger
                    .apply_movement(
                        conn,
                        MovementRequest {
                            stock_record_id: &slice.stock_record_id,
                            delta: -slice.quantity,
                            reserved_delta: 0.0,
                            kind: MovementKind::SaleOut,
                            document_reference,
                            actor,
                            conversion: line.resolved.conversion_info(&line.product.base_unit),
                            allow_negative,
                        },
                    )
                    .await?;
                movements.push(movement);
            }
        }

        if !shortages.is_empty() {
            return Err(EngineError::Core(CoreError::StockInsufficient {
                document: document_reference.to_string(),
                shortages,
            }));
        }

        Ok(movements)
    }

    // =========================================================================
    // Reverse
    // =========================================================================

    /// Restores every consumption recorded under a document reference.
    ///
    /// Idempotent: the reversal writes its movements under
    /// `{document}-REVERSAL`, and a second call that finds that marker
    /// (or no consumption at all) is a successful no-op.
    pub async fn reverse(&self, document_reference: &str, actor: &str) -> EngineResult<ReversalSummary> {
        let mut tx = self.db.begin_write().await?;
        let summary = self.reverse_tx(&mut tx, document_reference, actor).await?;
        tx.commit().await.map_err(kardex_db::DbError::from)?;
        Ok(summary)
    }

    /// Reversal inside the caller's transaction (order rejection runs
    /// this in the same transaction as the state change).
    pub async fn reverse_tx(
        &self,
        conn: &mut SqliteConnection,
        document_reference: &str,
        actor: &str,
    ) -> EngineResult<ReversalSummary> {
        let reversal_reference = format!("{document_reference}{REVERSAL_SUFFIX}");

        // Already reversed - nothing to do.
        let prior = self
            .stock
            .movements_for_document_tx(conn, &reversal_reference)
            .await?;
        if !prior.is_empty() {
            debug!(document = document_reference, "Reversal already recorded, no-op");
            return Ok(ReversalSummary {
                restored_quantity: 0.0,
                movements: Vec::new(),
            });
        }

        let consumed: Vec<StockMovement> = self
            .stock
            .movements_for_document_tx(conn, document_reference)
            .await?
            .into_iter()
            .filter(|m| MovementKind::CONSUMPTION_KINDS.contains(&m.kind))
            .collect();

        // Nothing consumed under this reference is a valid terminal
        // state, not an error.
        if consumed.is_empty() {
            debug!(document = document_reference, "No consumption to reverse");
            return Ok(ReversalSummary {
                restored_quantity: 0.0,
                movements: Vec::new(),
            });
        }

        let mut restored = 0.0;
        let mut movements = Vec::with_capacity(consumed.len());

        for movement in &consumed {
            let give_back = movement.quantity_delta.abs();
            let reversal = self
                .ledger
                .apply_movement(
                    conn,
                    MovementRequest {
                        stock_record_id: &movement.stock_record_id,
                        delta: give_back,
                        reserved_delta: 0.0,
                        kind: MovementKind::ReversalIn,
                        document_reference: &reversal_reference,
                        actor,
                        conversion: Default::default(),
                        // The record may still be negative from other
                        // credit sales; an inflow never fails the gate.
                        allow_negative: true,
                    },
                )
                .await?;
            restored += give_back;
            movements.push(reversal);
        }

        info!(
            document = document_reference,
            restored, "Consumption reversed"
        );

        Ok(ReversalSummary {
            restored_quantity: restored,
            movements,
        })
    }

    // =========================================================================
    // Availability
    // =========================================================================

    /// Read-only availability check: applies the same unit-conversion
    /// resolution as `consume` without mutating anything.
    pub async fn check_availability(
        &self,
        lines: &[DocumentLine],
        warehouse_id: &str,
    ) -> EngineResult<AvailabilityReport> {
        let resolved = self.resolve_lines(lines).await?;
        self.check_resolved(&resolved, warehouse_id).await
    }

    /// Availability check for already-resolved lines.
    pub async fn check_resolved(
        &self,
        resolved: &[ResolvedLine],
        warehouse_id: &str,
    ) -> EngineResult<AvailabilityReport> {
        // Aggregate demand per product first: two lines of the same
        // product must not each pass against the same availability.
        let mut demand: Vec<(&Product, f64)> = Vec::new();
        for line in resolved {
            match demand.iter_mut().find(|(p, _)| p.id == line.product.id) {
                Some((_, needed)) => *needed += line.resolved.base_quantity,
                None => demand.push((&line.product, line.resolved.base_quantity)),
            }
        }

        let mut shortages = Vec::new();
        for (product, needed) in demand {
            let available = self.stock.total_available(&product.id, warehouse_id).await?;
            if available + kardex_core::QTY_EPSILON < needed {
                shortages.push(Shortage {
                    product_id: product.id.clone(),
                    sku: product.sku.clone(),
                    needed,
                    available,
                });
            }
        }

        Ok(AvailabilityReport {
            ok: shortages.is_empty(),
            shortages,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_product, seed_stock, test_db};

    #[tokio::test]
    async fn test_consume_draws_fifo_across_batches() {
        let db = test_db().await;
        seed_product(&db, "MILK-1L", false).await;
        // Three batches of 5, expiring at 10, 20 and 30 days.
        seed_stock(&db, "MILK-1L", 5.0, Some(10)).await;
        seed_stock(&db, "MILK-1L", 5.0, Some(20)).await;
        seed_stock(&db, "MILK-1L", 5.0, Some(30)).await;

        let engine = DistributionEngine::new(db.clone());
        let movements = engine
            .consume(&[DocumentLine::new("MILK-1L", 7.0, 120)], "V-T1", "W1", false, "tester")
            .await
            .unwrap();

        // 5 from the soonest batch, 2 from the next.
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].quantity_delta, -5.0);
        assert_eq!(movements[1].quantity_delta, -2.0);
        assert!(movements.iter().all(|m| m.kind == MovementKind::SaleOut));

        let product = db.products().get_by_sku("MILK-1L").await.unwrap().unwrap();
        let on_hand = db.stock().total_on_hand(&product.id, "W1").await.unwrap();
        assert_eq!(on_hand, 8.0);
    }

    #[tokio::test]
    async fn test_shortage_reports_every_short_line_and_writes_nothing() {
        let db = test_db().await;
        seed_product(&db, "A", false).await;
        seed_product(&db, "B", false).await;
        seed_stock(&db, "A", 3.0, None).await;
        seed_stock(&db, "B", 2.0, None).await;

        let engine = DistributionEngine::new(db.clone());
        let err = engine
            .consume(
                &[
                    DocumentLine::new("A", 5.0, 100),
                    DocumentLine::new("B", 4.0, 100),
                ],
                "V-T2",
                "W1",
                false,
                "tester",
            )
            .await
            .unwrap_err();

        match err {
            EngineError::Core(CoreError::StockInsufficient { shortages, .. }) => {
                assert_eq!(shortages.len(), 2);
                assert_eq!(shortages[0].available, 3.0);
                assert_eq!(shortages[1].available, 2.0);
            }
            other => panic!("expected StockInsufficient, got {other:?}"),
        }

        // All-or-nothing: neither product moved.
        let a = db.products().get_by_sku("A").await.unwrap().unwrap();
        assert_eq!(db.stock().total_on_hand(&a.id, "W1").await.unwrap(), 3.0);
        assert!(db.stock().movements_for_document("V-T2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allow_negative_overdraws() {
        let db = test_db().await;
        seed_product(&db, "SUGAR-KG", false).await;
        seed_stock(&db, "SUGAR-KG", 4.0, None).await;

        let engine = DistributionEngine::new(db.clone());
        let movements = engine
            .consume(&[DocumentLine::new("SUGAR-KG", 10.0, 100)], "V-T3", "W1", true, "tester")
            .await
            .unwrap();

        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity_after, -6.0);
    }

    #[tokio::test]
    async fn test_reverse_restores_and_is_idempotent() {
        let db = test_db().await;
        seed_product(&db, "RICE-KG", false).await;
        seed_stock(&db, "RICE-KG", 20.0, None).await;

        let engine = DistributionEngine::new(db.clone());
        engine
            .consume(&[DocumentLine::new("RICE-KG", 12.0, 100)], "V-T4", "W1", false, "tester")
            .await
            .unwrap();

        let first = engine.reverse("V-T4", "tester").await.unwrap();
        assert_eq!(first.restored_quantity, 12.0);
        assert_eq!(first.movements.len(), 1);
        assert_eq!(first.movements[0].kind, MovementKind::ReversalIn);

        // Second call finds the reversal marker and does nothing.
        let second = engine.reverse("V-T4", "tester").await.unwrap();
        assert_eq!(second.restored_quantity, 0.0);
        assert!(second.movements.is_empty());

        let product = db.products().get_by_sku("RICE-KG").await.unwrap().unwrap();
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 20.0);
    }

    #[tokio::test]
    async fn test_reverse_succeeds_while_record_still_negative() {
        let db = test_db().await;
        seed_product(&db, "RICE-KG", false).await;
        seed_stock(&db, "RICE-KG", 10.0, None).await;

        let engine = DistributionEngine::new(db.clone());
        // Two credit sales drive the record to -25.
        engine
            .consume(&[DocumentLine::new("RICE-KG", 30.0, 100)], "V-C1", "W1", true, "tester")
            .await
            .unwrap();
        engine
            .consume(&[DocumentLine::new("RICE-KG", 5.0, 100)], "V-C2", "W1", true, "tester")
            .await
            .unwrap();

        // Reversing the smaller sale leaves the record negative; the
        // restore must go through anyway.
        let summary = engine.reverse("V-C2", "tester").await.unwrap();
        assert_eq!(summary.restored_quantity, 5.0);

        let product = db.products().get_by_sku("RICE-KG").await.unwrap().unwrap();
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), -20.0);
    }

    #[tokio::test]
    async fn test_concurrent_consume_one_wins_one_is_short() {
        // A file-backed pool with several connections, so the two calls
        // genuinely race on the write lock.
        let path = std::env::temp_dir().join(format!("kardex-race-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(kardex_db::DbConfig::new(&path).max_connections(4))
            .await
            .unwrap();
        seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 40.0, None).await;

        let engine = DistributionEngine::new(db.clone());
        let spawn_consume = |document: &str| {
            let engine = engine.clone();
            let document = document.to_string();
            tokio::spawn(async move {
                engine
                    .consume(&[DocumentLine::new("FLOUR-KG", 30.0, 100)], &document, "W1", false, "tester")
                    .await
            })
        };
        let first = spawn_consume("V-RACE-A");
        let second = spawn_consume("V-RACE-B");
        let results = [first.await.unwrap(), second.await.unwrap()];

        // Combined demand exceeds availability: exactly one call gets
        // its full 30, the other is told it is short.
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find(|r| r.is_err()).unwrap();
        assert!(matches!(
            loser,
            Err(EngineError::Core(CoreError::StockInsufficient { .. }))
        ));

        let product = db.products().get_by_sku("FLOUR-KG").await.unwrap().unwrap();
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 10.0);

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn test_reverse_with_no_consumption_is_noop() {
        let db = test_db().await;
        let engine = DistributionEngine::new(db.clone());

        let summary = engine.reverse("V-NEVER-EXISTED", "tester").await.unwrap();
        assert_eq!(summary.restored_quantity, 0.0);
    }

    #[tokio::test]
    async fn test_availability_aggregates_repeated_skus() {
        let db = test_db().await;
        seed_product(&db, "OIL-1L", false).await;
        seed_stock(&db, "OIL-1L", 10.0, None).await;

        let engine = DistributionEngine::new(db.clone());
        // Two lines of 6 against 10 available must fail as a pair.
        let report = engine
            .check_availability(
                &[
                    DocumentLine::new("OIL-1L", 6.0, 100),
                    DocumentLine::new("OIL-1L", 6.0, 100),
                ],
                "W1",
            )
            .await
            .unwrap();

        assert!(!report.ok);
        assert_eq!(report.shortages.len(), 1);
        assert_eq!(report.shortages[0].needed, 12.0);
        assert_eq!(report.shortages[0].available, 10.0);
    }

    #[tokio::test]
    async fn test_unit_conversion_consumes_base_units() {
        let db = test_db().await;
        let product = seed_product(&db, "WATER-500", false).await;
        db.products().add_conversion(&product.id, "box", 12.0).await.unwrap();
        seed_stock(&db, "WATER-500", 30.0, None).await;

        let engine = DistributionEngine::new(db.clone());
        let movements = engine
            .consume(
                &[DocumentLine::new("WATER-500", 2.0, 1500).with_unit("box")],
                "V-T5",
                "W1",
                false,
                "tester",
            )
            .await
            .unwrap();

        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity_delta, -24.0);
        assert_eq!(movements[0].requested_quantity, Some(2.0));
        assert_eq!(movements[0].requested_unit.as_deref(), Some("box"));
        assert_eq!(movements[0].conversion_factor, Some(12.0));
        assert!(movements[0].conversion_applied);
    }
}
