//! # Order State Machine
//!
//! Order (venta) lifecycle: direct creation with immediate consumption,
//! approval, and rejection with idempotent reversal.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create ──► Pending ──approve──► Approved                              │
//! │               │                     │                                   │
//! │               └──reject─────────────┴──reject──► Rejected              │
//! │                                                                         │
//! │  Direct creation consumes stock in the SAME transaction that writes    │
//! │  the order rows: a shortage rolls back the order, a constraint         │
//! │  failure rolls back the consumption. Converted orders arrive through   │
//! │  the quote engine with their consumption already done, so rejection    │
//! │  reverses by document reference and never cares which path created     │
//! │  the order.                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotency
//! Creation accepts an optional caller key; a key that was already used
//! returns the existing order and consumes nothing. Rejection of an
//! already-rejected order is a successful no-op.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use kardex_core::{
    document_total, validate_lines, validate_supplied_total, CoreError, DocumentLine, Order,
    OrderLine, OrderState, PaymentPolicy, StockMovement,
};
use kardex_db::repository::order::{generate_order_line_id, OrderRepository};
use kardex_db::{Database, DbError};

use crate::distribution::{DistributionEngine, ReversalSummary};
use crate::error::{EngineError, EngineResult};
use crate::events::DomainEvent;

/// Input for direct order creation.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub lines: Vec<DocumentLine>,
    pub warehouse_id: String,
    pub payment_policy: PaymentPolicy,
    /// Caller-supplied key; a repeat returns the existing order instead
    /// of consuming twice.
    pub idempotency_key: Option<String>,
    /// Caller-computed total for cross-checking, in currency units.
    pub expected_total: Option<f64>,
    pub actor: String,
}

/// Result of order creation.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order: Order,
    /// Movements written by this call; empty on an idempotent replay.
    pub movements: Vec<StockMovement>,
    /// Whether this call found an existing order for the key.
    pub replayed: bool,
    /// Event to dispatch; `None` on a replay.
    pub event: Option<DomainEvent>,
}

/// The order state machine.
#[derive(Debug, Clone)]
pub struct OrderEngine {
    db: Database,
    orders: OrderRepository,
    distribution: DistributionEngine,
}

impl OrderEngine {
    /// Creates an order engine over the given database.
    pub fn new(db: Database) -> Self {
        let orders = db.orders();
        let distribution = DistributionEngine::new(db.clone());
        OrderEngine {
            db,
            orders,
            distribution,
        }
    }

    // =========================================================================
    // Create (direct sale)
    // =========================================================================

    /// Creates a direct order, consuming stock in the same transaction.
    ///
    /// `Immediate` orders fail with the full shortage list when any line
    /// is short; `Credit` orders may drive on-hand negative instead.
    pub async fn create(&self, request: OrderRequest) -> EngineResult<OrderOutcome> {
        validate_lines(&request.lines).map_err(CoreError::from)?;
        if let Some(expected) = request.expected_total {
            validate_supplied_total(expected, document_total(&request.lines))
                .map_err(CoreError::from)?;
        }

        // Product lookups, conversion, and fractional enforcement run on
        // the pool first; a bad quantity never opens a transaction.
        let resolved = self.distribution.resolve_lines(&request.lines).await?;

        let mut tx = self.db.begin_write().await?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self.orders.find_by_idempotency_key(&mut tx, key).await? {
                debug!(key, number = %existing.number, "Idempotent replay, returning existing order");
                return Ok(OrderOutcome {
                    order: existing,
                    movements: Vec::new(),
                    replayed: true,
                    event: None,
                });
            }
        }

        let now = Utc::now();
        let number = self.orders.next_number(&mut tx).await?;
        let order = Order {
            id: Uuid::new_v4().to_string(),
            number,
            warehouse_id: request.warehouse_id.clone(),
            state: OrderState::Pending,
            payment_policy: request.payment_policy,
            quote_id: None,
            idempotency_key: request.idempotency_key.clone(),
            notes: None,
            created_at: now,
            updated_at: now,
        };

        // Two racers on the same key (or the same freshly computed
        // number) both pass the reads; the UNIQUE index stops the second
        // insert, which we surface as a conflict so a retry replays the
        // key lookup or recomputes the number.
        if let Err(err) = self.orders.insert(&mut tx, &order).await {
            return Err(match err {
                DbError::UniqueViolation { ref field, .. }
                    if field.contains("idempotency_key") =>
                {
                    EngineError::Core(CoreError::ConcurrencyConflict(format!(
                        "idempotency key raced for order {}",
                        order.number
                    )))
                }
                DbError::UniqueViolation { ref field, .. } if field.contains("number") => {
                    EngineError::Core(CoreError::ConcurrencyConflict(format!(
                        "order number {} raced",
                        order.number
                    )))
                }
                other => other.into(),
            });
        }

        for line in &resolved {
            let order_line = OrderLine {
                id: generate_order_line_id(),
                order_id: order.id.clone(),
                product_id: line.product.id.clone(),
                quantity: line.resolved.requested_quantity,
                requested_unit: line.resolved.requested_unit.clone(),
                unit_price_cents: line.unit_price_cents,
                created_at: now,
            };
            self.orders.insert_line(&mut tx, &order_line).await?;
        }

        let movements = self
            .distribution
            .consume_tx(
                &mut tx,
                &resolved,
                &order.number,
                &request.warehouse_id,
                request.payment_policy.allows_negative_stock(),
                &request.actor,
            )
            .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(
            number = %order.number,
            policy = ?request.payment_policy,
            movements = movements.len(),
            "Order created"
        );
        let event = DomainEvent::OrderCreated {
            order_id: order.id.clone(),
            number: order.number.clone(),
            warehouse_id: order.warehouse_id.clone(),
            payment_policy: order.payment_policy,
        };
        Ok(OrderOutcome {
            order,
            movements,
            replayed: false,
            event: Some(event),
        })
    }

    // =========================================================================
    // Approve
    // =========================================================================

    /// Approves a pending order. Stock already moved at creation, so
    /// this is a bookkeeping transition only.
    pub async fn approve(&self, order_id: &str, actor: &str) -> EngineResult<(Order, DomainEvent)> {
        let mut tx = self.db.begin_write().await?;

        let order = self.orders.lock_order(&mut tx, order_id).await?;
        if order.state != OrderState::Pending {
            return Err(EngineError::Core(CoreError::invalid_transition(
                "Order",
                order_id,
                order.state,
                OrderState::Approved,
            )));
        }
        if !self
            .orders
            .transition(&mut tx, order_id, OrderState::Pending, OrderState::Approved)
            .await?
        {
            return Err(EngineError::Core(CoreError::ConcurrencyConflict(format!(
                "order {order_id} changed state during approval"
            ))));
        }
        self.orders
            .append_note(&mut tx, order_id, &format!("Approved by {actor}"))
            .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(number = %order.number, "Order approved");
        let event = DomainEvent::OrderApproved {
            order_id: order.id.clone(),
            number: order.number.clone(),
        };
        let approved = Order {
            state: OrderState::Approved,
            ..order
        };
        Ok((approved, event))
    }

    // =========================================================================
    // Reject (cancel with reversal)
    // =========================================================================

    /// Rejects an order and restores everything it consumed.
    ///
    /// The reversal is keyed on the order's document reference, so it
    /// works identically for direct and converted orders, and repeating
    /// the call (or rejecting an order that consumed nothing) is a
    /// successful no-op.
    pub async fn reject(
        &self,
        order_id: &str,
        reason: &str,
        actor: &str,
    ) -> EngineResult<(Order, ReversalSummary, Option<DomainEvent>)> {
        let mut tx = self.db.begin_write().await?;

        let order = self.orders.lock_order(&mut tx, order_id).await?;

        if order.state == OrderState::Rejected {
            // Already rejected; run the (no-op) reversal for safety and
            // report success without a second event.
            let summary = self
                .reversal_tx(&mut tx, &order.number, actor)
                .await?;
            tx.commit().await.map_err(DbError::from)?;
            return Ok((order, summary, None));
        }

        if !self
            .orders
            .transition(&mut tx, order_id, order.state, OrderState::Rejected)
            .await?
        {
            return Err(EngineError::Core(CoreError::ConcurrencyConflict(format!(
                "order {order_id} changed state during rejection"
            ))));
        }

        let summary = self.reversal_tx(&mut tx, &order.number, actor).await?;
        self.orders
            .append_note(&mut tx, order_id, &format!("Rejected by {actor}: {reason}"))
            .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(
            number = %order.number,
            restored = summary.restored_quantity,
            "Order rejected"
        );
        let event = DomainEvent::OrderRejected {
            order_id: order.id.clone(),
            number: order.number.clone(),
            reason: reason.to_string(),
            restored_quantity: summary.restored_quantity,
        };
        let rejected = Order {
            state: OrderState::Rejected,
            ..order
        };
        Ok((rejected, summary, Some(event)))
    }

    async fn reversal_tx(
        &self,
        conn: &mut SqliteConnection,
        order_number: &str,
        actor: &str,
    ) -> EngineResult<ReversalSummary> {
        self.distribution.reverse_tx(conn, order_number, actor).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kardex_core::MovementKind;

    use crate::testutil::{seed_product, seed_stock, test_db};

    fn request(sku: &str, qty: f64) -> OrderRequest {
        OrderRequest {
            lines: vec![DocumentLine::new(sku, qty, 250)],
            warehouse_id: "W1".to_string(),
            payment_policy: PaymentPolicy::Immediate,
            idempotency_key: None,
            expected_total: None,
            actor: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_consumes_immediately() {
        let db = test_db().await;
        let product = seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 90.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let outcome = engine.create(request("FLOUR-KG", 30.0)).await.unwrap();

        assert!(outcome.order.number.starts_with("V-"));
        assert_eq!(outcome.order.state, OrderState::Pending);
        assert!(!outcome.replayed);
        assert_eq!(outcome.movements.len(), 1);
        assert_eq!(outcome.movements[0].kind, MovementKind::SaleOut);
        assert_eq!(outcome.movements[0].document_reference, outcome.order.number);
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 60.0);
    }

    #[tokio::test]
    async fn test_shortage_rolls_back_order_rows() {
        let db = test_db().await;
        let product = seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 10.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let err = engine.create(request("FLOUR-KG", 30.0)).await.unwrap_err();

        match err {
            EngineError::Core(CoreError::StockInsufficient { shortages, .. }) => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].needed, 30.0);
                assert_eq!(shortages[0].available, 10.0);
            }
            other => panic!("expected StockInsufficient, got {other:?}"),
        }
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_credit_policy_allows_negative() {
        let db = test_db().await;
        let product = seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 10.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let outcome = engine
            .create(OrderRequest {
                payment_policy: PaymentPolicy::Credit,
                ..request("FLOUR-KG", 30.0)
            })
            .await
            .unwrap();

        assert_eq!(outcome.movements[0].quantity_after, -20.0);
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), -20.0);
    }

    #[tokio::test]
    async fn test_fractional_rejected_before_any_write() {
        let db = test_db().await;
        let product = seed_product(&db, "WATER-500", false).await;
        seed_stock(&db, "WATER-500", 50.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let err = engine.create(request("WATER-500", 2.5)).await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::Core(CoreError::FractionalQuantityNotAllowed { .. })
        ));
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 50.0);
    }

    #[tokio::test]
    async fn test_fractional_allowed_when_product_permits() {
        let db = test_db().await;
        seed_product(&db, "CHEESE-KG", true).await;
        seed_stock(&db, "CHEESE-KG", 10.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let outcome = engine.create(request("CHEESE-KG", 2.5)).await.unwrap();
        assert_eq!(outcome.movements[0].quantity_delta, -2.5);
    }

    #[tokio::test]
    async fn test_idempotency_key_replays_without_consuming() {
        let db = test_db().await;
        let product = seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 90.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let keyed = OrderRequest {
            idempotency_key: Some("client-abc-1".to_string()),
            ..request("FLOUR-KG", 30.0)
        };

        let first = engine.create(keyed.clone()).await.unwrap();
        let second = engine.create(keyed).await.unwrap();

        assert!(second.replayed);
        assert_eq!(second.order.id, first.order.id);
        assert!(second.movements.is_empty());
        assert!(second.event.is_none());
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 60.0);
    }

    #[tokio::test]
    async fn test_approve_is_bookkeeping_only() {
        let db = test_db().await;
        let product = seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 90.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let outcome = engine.create(request("FLOUR-KG", 30.0)).await.unwrap();
        let (approved, _) = engine.approve(&outcome.order.id, "tester").await.unwrap();

        assert_eq!(approved.state, OrderState::Approved);
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 60.0);

        let err = engine.approve(&outcome.order.id, "tester").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_restores_stock_idempotently() {
        let db = test_db().await;
        let product = seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 90.0, None).await;

        let engine = OrderEngine::new(db.clone());
        let outcome = engine.create(request("FLOUR-KG", 30.0)).await.unwrap();
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 60.0);

        let (rejected, summary, event) = engine
            .reject(&outcome.order.id, "customer cancelled", "tester")
            .await
            .unwrap();
        assert_eq!(rejected.state, OrderState::Rejected);
        assert_eq!(summary.restored_quantity, 30.0);
        assert!(event.is_some());
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 90.0);

        // Rejecting again restores nothing and emits nothing.
        let (_, summary, event) = engine
            .reject(&outcome.order.id, "again", "tester")
            .await
            .unwrap();
        assert_eq!(summary.restored_quantity, 0.0);
        assert!(event.is_none());
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 90.0);
    }

    #[tokio::test]
    async fn test_reject_multi_batch_order_restores_each_record() {
        let db = test_db().await;
        let product = seed_product(&db, "MILK-1L", false).await;
        seed_stock(&db, "MILK-1L", 5.0, Some(10)).await;
        seed_stock(&db, "MILK-1L", 5.0, Some(20)).await;

        let engine = OrderEngine::new(db.clone());
        let outcome = engine.create(request("MILK-1L", 7.0)).await.unwrap();
        assert_eq!(outcome.movements.len(), 2);

        let (_, summary, _) = engine
            .reject(&outcome.order.id, "cancelled", "tester")
            .await
            .unwrap();
        assert_eq!(summary.restored_quantity, 7.0);
        assert_eq!(summary.movements.len(), 2);
        assert_eq!(db.stock().total_on_hand(&product.id, "W1").await.unwrap(), 10.0);
    }
}
