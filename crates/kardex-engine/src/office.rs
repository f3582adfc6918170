//! # Back Office Facade
//!
//! The single entry point outer layers call. Composes the engines,
//! applies the bounded-retry policy for conflicts, and dispatches domain
//! events to listeners after each transaction commits.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          BackOffice                                     │
//! │                                                                         │
//! │   quotes ──► QuoteEngine ──┐                                           │
//! │   orders ──► OrderEngine ──┼──► DistributionEngine ──► StockLedger     │
//! │   stock  ──► StockLedger ──┘       ReservationEngine                   │
//! │                                                                         │
//! │   retry:   ConcurrencyConflict → retry up to max_retries with backoff  │
//! │   events:  dispatched post-commit, listener failure logged and dropped │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, warn};

use kardex_core::{
    AvailabilityReport, DocumentLine, MovementKind, Order, PaymentPolicy, Quote, StockMovement,
};
use kardex_db::Database;

use crate::distribution::{DistributionEngine, ReversalSummary};
use crate::error::EngineResult;
use crate::events::{DomainEvent, EventListener};
use crate::ledger::StockLedger;
use crate::order::{OrderEngine, OrderOutcome, OrderRequest};
use crate::quote::{QuoteEngine, QuoteRequest};

/// Tuning knobs for the facade and the expiry sweep.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per operation when the only failure is a write conflict.
    pub max_retries: u32,
    /// Base backoff between attempts; doubled each retry.
    pub retry_base_delay: Duration,
    /// How often the expiry sweep wakes up.
    pub sweep_interval: Duration,
    /// Quotes expired per sweep pass.
    pub sweep_batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(50),
            sweep_interval: Duration::from_secs(60),
            sweep_batch_size: 100,
        }
    }
}

/// The back-office facade.
#[derive(Clone)]
pub struct BackOffice {
    db: Database,
    config: EngineConfig,
    quotes: QuoteEngine,
    orders: OrderEngine,
    distribution: DistributionEngine,
    ledger: StockLedger,
    listeners: Arc<Vec<Arc<dyn EventListener>>>,
}

impl BackOffice {
    /// Creates a facade with the default configuration.
    pub fn new(db: Database) -> Self {
        Self::with_config(db, EngineConfig::default())
    }

    /// Creates a facade with explicit configuration.
    pub fn with_config(db: Database, config: EngineConfig) -> Self {
        let quotes = QuoteEngine::new(db.clone());
        let orders = OrderEngine::new(db.clone());
        let distribution = DistributionEngine::new(db.clone());
        let ledger = StockLedger::new(db.clone());
        BackOffice {
            db,
            config,
            quotes,
            orders,
            distribution,
            ledger,
            listeners: Arc::new(Vec::new()),
        }
    }

    /// Registers an event listener. Listeners are called after commit,
    /// in registration order; a failing listener is logged and skipped.
    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) {
        Arc::make_mut(&mut self.listeners).push(listener);
    }

    /// The underlying database handle (reporting, tests).
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    /// Creates a quote and places its holds.
    pub async fn create_quote(&self, request: QuoteRequest) -> EngineResult<Quote> {
        let (quote, event) = self
            .with_retry(|| self.quotes.create(request.clone()))
            .await?;
        self.dispatch(&event);
        Ok(quote)
    }

    /// Approves a pending quote, renewing its validity window.
    pub async fn approve_quote(&self, quote_id: &str, actor: &str) -> EngineResult<Quote> {
        let (quote, event) = self
            .with_retry(|| self.quotes.approve(quote_id, actor))
            .await?;
        self.dispatch(&event);
        Ok(quote)
    }

    /// Rejects a quote, releasing its holds.
    pub async fn reject_quote(
        &self,
        quote_id: &str,
        reason: &str,
        actor: &str,
    ) -> EngineResult<Quote> {
        let (quote, event) = self
            .with_retry(|| self.quotes.reject(quote_id, reason, actor))
            .await?;
        self.dispatch(&event);
        Ok(quote)
    }

    /// Converts an approved quote into an order, consuming its holds.
    pub async fn convert_quote(
        &self,
        quote_id: &str,
        payment_policy: PaymentPolicy,
        actor: &str,
    ) -> EngineResult<(Order, Vec<StockMovement>)> {
        let (order, movements, event) = self
            .with_retry(|| self.quotes.convert(quote_id, payment_policy, actor))
            .await?;
        self.dispatch(&event);
        Ok((order, movements))
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Creates a direct order, consuming stock immediately.
    pub async fn create_order(&self, request: OrderRequest) -> EngineResult<OrderOutcome> {
        let outcome = self
            .with_retry(|| self.orders.create(request.clone()))
            .await?;
        if let Some(event) = &outcome.event {
            self.dispatch(event);
        }
        Ok(outcome)
    }

    /// Approves a pending order.
    pub async fn approve_order(&self, order_id: &str, actor: &str) -> EngineResult<Order> {
        let (order, event) = self
            .with_retry(|| self.orders.approve(order_id, actor))
            .await?;
        self.dispatch(&event);
        Ok(order)
    }

    /// Rejects an order and restores what it consumed.
    pub async fn reject_order(
        &self,
        order_id: &str,
        reason: &str,
        actor: &str,
    ) -> EngineResult<(Order, ReversalSummary)> {
        let (order, summary, event) = self
            .with_retry(|| self.orders.reject(order_id, reason, actor))
            .await?;
        if let Some(event) = &event {
            self.dispatch(event);
        }
        Ok((order, summary))
    }

    // =========================================================================
    // Stock
    // =========================================================================

    /// Receives stock into a warehouse (purchase intake).
    #[allow(clippy::too_many_arguments)]
    pub async fn receive_stock(
        &self,
        sku: &str,
        warehouse_id: &str,
        batch_code: Option<&str>,
        expiry_date: Option<NaiveDate>,
        quantity: f64,
        document_reference: &str,
        actor: &str,
    ) -> EngineResult<StockMovement> {
        self.with_retry(|| {
            self.ledger.receive(
                sku,
                warehouse_id,
                batch_code,
                expiry_date,
                quantity,
                document_reference,
                actor,
            )
        })
        .await
    }

    /// Manual stock correction or waste write-off.
    pub async fn adjust_stock(
        &self,
        stock_record_id: &str,
        delta: f64,
        kind: MovementKind,
        document_reference: &str,
        actor: &str,
    ) -> EngineResult<StockMovement> {
        self.with_retry(|| {
            self.ledger
                .adjust(stock_record_id, delta, kind, document_reference, actor)
        })
        .await
    }

    /// Read-only availability check for a prospective document.
    pub async fn check_availability(
        &self,
        lines: &[DocumentLine],
        warehouse_id: &str,
    ) -> EngineResult<AvailabilityReport> {
        self.distribution.check_availability(lines, warehouse_id).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Runs an operation, retrying write conflicts with doubling backoff.
    ///
    /// Only retryable errors requeue; a business error on attempt one is
    /// final. Each attempt re-runs the WHOLE operation, which is safe
    /// because every operation is one transaction.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut delay = self.config.retry_base_delay;
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(attempt, error = %err, "Retrying after conflict");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Dispatches an event to every listener, post-commit.
    pub(crate) fn dispatch(&self, event: &DomainEvent) {
        for listener in self.listeners.iter() {
            if let Err(err) = listener.on_event(event) {
                warn!(error = %err, "Event listener failed, continuing");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use kardex_db::{Database, DbConfig};

    use crate::testutil::{seed_product, seed_stock};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EventListener for Recorder {
        fn on_event(
            &self,
            event: &DomainEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let tag = serde_json::to_value(event).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string();
            self.events.lock().unwrap().push(tag);
            Ok(())
        }
    }

    struct Failing;

    impl EventListener for Failing {
        fn on_event(
            &self,
            _event: &DomainEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("listener down".into())
        }
    }

    async fn office_with_recorder() -> (BackOffice, Arc<Recorder>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut office = BackOffice::new(db);
        office.add_listener(recorder.clone());
        (office, recorder)
    }

    #[tokio::test]
    async fn test_quote_to_order_emits_lifecycle_events() {
        let (office, recorder) = office_with_recorder().await;
        let db = office.database().clone();
        seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 100.0, None).await;

        let quote = office
            .create_quote(QuoteRequest {
                lines: vec![DocumentLine::new("FLOUR-KG", 10.0, 250)],
                warehouse_id: "W1".to_string(),
                validity_days: None,
                expected_total: None,
                actor: "tester".to_string(),
            })
            .await
            .unwrap();
        office.approve_quote(&quote.id, "tester").await.unwrap();
        let (order, movements) = office
            .convert_quote(&quote.id, PaymentPolicy::Immediate, "tester")
            .await
            .unwrap();

        assert_eq!(movements.len(), 1);
        assert!(order.number.starts_with("V-"));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["quote_created", "quote_approved", "quote_converted"]
        );
    }

    #[tokio::test]
    async fn test_failing_listener_never_blocks_the_operation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 100.0, None).await;

        let mut office = BackOffice::new(db.clone());
        office.add_listener(Arc::new(Failing));
        let recorder = Arc::new(Recorder::default());
        office.add_listener(recorder.clone());

        let outcome = office
            .create_order(OrderRequest {
                lines: vec![DocumentLine::new("FLOUR-KG", 5.0, 250)],
                warehouse_id: "W1".to_string(),
                payment_policy: PaymentPolicy::Immediate,
                idempotency_key: None,
                expected_total: None,
                actor: "tester".to_string(),
            })
            .await
            .unwrap();

        // The commit stood and later listeners still ran.
        assert_eq!(outcome.movements.len(), 1);
        assert_eq!(*recorder.events.lock().unwrap(), vec!["order_created"]);
    }

    #[tokio::test]
    async fn test_replay_emits_no_event() {
        let (office, recorder) = office_with_recorder().await;
        let db = office.database().clone();
        seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 100.0, None).await;

        let request = OrderRequest {
            lines: vec![DocumentLine::new("FLOUR-KG", 5.0, 250)],
            warehouse_id: "W1".to_string(),
            payment_policy: PaymentPolicy::Immediate,
            idempotency_key: Some("key-1".to_string()),
            expected_total: None,
            actor: "tester".to_string(),
        };
        office.create_order(request.clone()).await.unwrap();
        office.create_order(request).await.unwrap();

        assert_eq!(*recorder.events.lock().unwrap(), vec!["order_created"]);
    }

    #[tokio::test]
    async fn test_receive_and_adjust_via_facade() {
        let (office, _) = office_with_recorder().await;
        let db = office.database().clone();
        seed_product(&db, "RICE-KG", false).await;

        let intake = office
            .receive_stock("RICE-KG", "W1", Some("B1"), None, 50.0, "PO-9", "tester")
            .await
            .unwrap();
        office
            .adjust_stock(&intake.stock_record_id, -5.0, MovementKind::WasteOut, "ADJ-9", "tester")
            .await
            .unwrap();

        let record = db.stock().get_record(&intake.stock_record_id).await.unwrap();
        assert_eq!(record.quantity_on_hand, 45.0);
    }

    #[tokio::test]
    async fn test_availability_through_facade() {
        let (office, _) = office_with_recorder().await;
        let db = office.database().clone();
        seed_product(&db, "RICE-KG", false).await;
        seed_stock(&db, "RICE-KG", 10.0, None).await;

        let report = office
            .check_availability(&[DocumentLine::new("RICE-KG", 4.0, 100)], "W1")
            .await
            .unwrap();
        assert!(report.ok);

        let report = office
            .check_availability(&[DocumentLine::new("RICE-KG", 14.0, 100)], "W1")
            .await
            .unwrap();
        assert!(!report.ok);
        assert_eq!(report.shortages[0].missing(), 4.0);
    }
}
