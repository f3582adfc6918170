//! # Quote State Machine
//!
//! Quote (proforma) lifecycle: create with soft holds, approve, reject,
//! convert into an order, expire.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create ──► Pending ──approve──► Approved ──convert──► Converted       │
//! │               │                     │                                   │
//! │               ├──reject─────────────┴──reject──► Rejected  (released)  │
//! │               └──expire─────────────────expire──► Expired  (released)  │
//! │                                                                         │
//! │  Conversion is the ONLY path from reservation to movement: each        │
//! │  active slice is consumed once, tagged with the new order's number.    │
//! │  The Approved → Converted guard makes double conversion impossible.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expiry is lazy as well as swept: approve/convert on a quote whose
//! window has passed expires it in place and reports `ExpiredQuote`,
//! so a stale quote can never hold stock past its window just because
//! the sweeper is behind.

use chrono::{Duration, Utc};
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use kardex_core::{
    document_total, validate_lines, validate_supplied_total, validate_validity_days, CoreError,
    DocumentLine, Order, OrderState, PaymentPolicy, Quote, QuoteLine, QuoteState, StockMovement,
    DEFAULT_VALIDITY_DAYS,
};
use kardex_db::repository::order::{generate_order_line_id, OrderRepository};
use kardex_db::repository::quote::{generate_quote_line_id, QuoteRepository};
use kardex_db::{Database, DbError};

use crate::distribution::DistributionEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::DomainEvent;
use crate::reservation::ReservationEngine;

/// Input for quote creation.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub lines: Vec<DocumentLine>,
    pub warehouse_id: String,
    /// Validity window in days; defaults to 15.
    pub validity_days: Option<i64>,
    /// Caller-computed total for cross-checking, in currency units.
    pub expected_total: Option<f64>,
    pub actor: String,
}

/// The quote state machine.
#[derive(Debug, Clone)]
pub struct QuoteEngine {
    db: Database,
    quotes: QuoteRepository,
    orders: OrderRepository,
    distribution: DistributionEngine,
    reservations: ReservationEngine,
}

impl QuoteEngine {
    /// Creates a quote engine over the given database.
    pub fn new(db: Database) -> Self {
        let quotes = db.quotes();
        let orders = db.orders();
        let distribution = DistributionEngine::new(db.clone());
        let reservations = ReservationEngine::new(db.clone());
        QuoteEngine {
            db,
            quotes,
            orders,
            distribution,
            reservations,
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Creates a quote in `Pending` and places its reservations.
    ///
    /// All-or-nothing: a shortage on any line fails the whole quote with
    /// the full shortage list and nothing is held.
    pub async fn create(&self, request: QuoteRequest) -> EngineResult<(Quote, DomainEvent)> {
        validate_lines(&request.lines).map_err(CoreError::from)?;
        let validity_days = request.validity_days.unwrap_or(DEFAULT_VALIDITY_DAYS);
        validate_validity_days(validity_days).map_err(CoreError::from)?;
        if let Some(expected) = request.expected_total {
            validate_supplied_total(expected, document_total(&request.lines))
                .map_err(CoreError::from)?;
        }

        // Product lookups and unit resolution run on the pool, before
        // the write transaction opens.
        let resolved = self.distribution.resolve_lines(&request.lines).await?;

        let mut tx = self.db.begin_write().await?;

        let now = Utc::now();
        let expires_at = now + Duration::days(validity_days);
        let quote = Quote {
            id: Uuid::new_v4().to_string(),
            number: self.quotes.next_number(&mut tx).await?,
            warehouse_id: request.warehouse_id.clone(),
            state: QuoteState::Pending,
            expires_at,
            converted_order_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };

        // A racer may have computed the same number; the UNIQUE index
        // fails the loser, and a retry recomputes.
        if let Err(err) = self.quotes.insert(&mut tx, &quote).await {
            return Err(match err {
                DbError::UniqueViolation { ref field, .. } if field.contains("number") => {
                    EngineError::Core(CoreError::ConcurrencyConflict(format!(
                        "quote number {} raced",
                        quote.number
                    )))
                }
                other => other.into(),
            });
        }
        for line in &resolved {
            let quote_line = QuoteLine {
                id: generate_quote_line_id(),
                quote_id: quote.id.clone(),
                product_id: line.product.id.clone(),
                quantity: line.resolved.requested_quantity,
                requested_unit: line.resolved.requested_unit.clone(),
                unit_price_cents: line.unit_price_cents,
                created_at: now,
            };
            self.quotes.insert_line(&mut tx, &quote_line).await?;
        }

        self.reservations
            .reserve_tx(
                &mut tx,
                &quote.id,
                &quote.number,
                &resolved,
                &request.warehouse_id,
                expires_at,
            )
            .await?;

        tx.commit().await.map_err(kardex_db::DbError::from)?;

        info!(number = %quote.number, lines = resolved.len(), "Quote created");
        let event = DomainEvent::QuoteCreated {
            quote_id: quote.id.clone(),
            number: quote.number.clone(),
            warehouse_id: quote.warehouse_id.clone(),
        };
        Ok((quote, event))
    }

    // =========================================================================
    // Approve
    // =========================================================================

    /// Approves a pending quote and restarts its validity window.
    ///
    /// The holds are extended to the new window, so an approved quote
    /// keeps its stock for the full renewed period.
    pub async fn approve(&self, quote_id: &str, actor: &str) -> EngineResult<(Quote, DomainEvent)> {
        let mut tx = self.db.begin_write().await?;

        let quote = self.quotes.lock_quote(&mut tx, quote_id).await?;
        if self.expire_in_place(&mut tx, &quote).await? {
            tx.commit().await.map_err(kardex_db::DbError::from)?;
            return Err(EngineError::Core(CoreError::ExpiredQuote {
                id: quote.id,
                expired_at: quote.expires_at.to_rfc3339(),
            }));
        }

        if quote.state != QuoteState::Pending {
            return Err(EngineError::Core(CoreError::invalid_transition(
                "Quote",
                quote_id,
                quote.state,
                QuoteState::Approved,
            )));
        }
        if !self
            .quotes
            .transition(&mut tx, quote_id, QuoteState::Pending, QuoteState::Approved)
            .await?
        {
            return Err(EngineError::Core(CoreError::ConcurrencyConflict(format!(
                "quote {quote_id} changed state during approval"
            ))));
        }

        let new_expires_at = Utc::now() + Duration::days(DEFAULT_VALIDITY_DAYS);
        self.quotes
            .set_expires_at(&mut tx, quote_id, new_expires_at)
            .await?;
        self.reservations
            .extend_tx(&mut tx, quote_id, new_expires_at)
            .await?;
        self.quotes
            .append_note(&mut tx, quote_id, &format!("Approved by {actor}"))
            .await?;

        tx.commit().await.map_err(kardex_db::DbError::from)?;

        info!(number = %quote.number, "Quote approved");
        let event = DomainEvent::QuoteApproved {
            quote_id: quote.id.clone(),
            number: quote.number.clone(),
        };
        let approved = Quote {
            state: QuoteState::Approved,
            expires_at: new_expires_at,
            ..quote
        };
        Ok((approved, event))
    }

    // =========================================================================
    // Reject
    // =========================================================================

    /// Rejects a pending or approved quote and releases its holds.
    pub async fn reject(
        &self,
        quote_id: &str,
        reason: &str,
        actor: &str,
    ) -> EngineResult<(Quote, DomainEvent)> {
        let mut tx = self.db.begin_write().await?;

        let quote = self.quotes.lock_quote(&mut tx, quote_id).await?;
        if !quote.state.can_transition_to(QuoteState::Rejected) {
            return Err(EngineError::Core(CoreError::invalid_transition(
                "Quote",
                quote_id,
                quote.state,
                QuoteState::Rejected,
            )));
        }
        if !self
            .quotes
            .transition(&mut tx, quote_id, quote.state, QuoteState::Rejected)
            .await?
        {
            return Err(EngineError::Core(CoreError::ConcurrencyConflict(format!(
                "quote {quote_id} changed state during rejection"
            ))));
        }

        let released = self.reservations.release_tx(&mut tx, quote_id).await?;
        self.quotes
            .append_note(&mut tx, quote_id, &format!("Rejected by {actor}: {reason}"))
            .await?;

        tx.commit().await.map_err(kardex_db::DbError::from)?;

        info!(number = %quote.number, released, "Quote rejected");
        let event = DomainEvent::QuoteRejected {
            quote_id: quote.id.clone(),
            number: quote.number.clone(),
            reason: reason.to_string(),
        };
        let rejected = Quote {
            state: QuoteState::Rejected,
            ..quote
        };
        Ok((rejected, event))
    }

    // =========================================================================
    // Convert
    // =========================================================================

    /// Converts an approved quote into an order, consuming its holds.
    ///
    /// The `Approved → Converted` guard runs under the quote's row lock,
    /// so of two concurrent conversions exactly one wins; the loser gets
    /// `ConcurrencyConflict` (or `InvalidStateTransition` once the state
    /// is visible) and no second consumption can occur.
    pub async fn convert(
        &self,
        quote_id: &str,
        payment_policy: PaymentPolicy,
        actor: &str,
    ) -> EngineResult<(Order, Vec<StockMovement>, DomainEvent)> {
        // Lines are immutable after creation; read them off the pool.
        let quote_lines = self.quotes.lines(quote_id).await?;

        let mut tx = self.db.begin_write().await?;

        let quote = self.quotes.lock_quote(&mut tx, quote_id).await?;
        if self.expire_in_place(&mut tx, &quote).await? {
            tx.commit().await.map_err(kardex_db::DbError::from)?;
            return Err(EngineError::Core(CoreError::ExpiredQuote {
                id: quote.id,
                expired_at: quote.expires_at.to_rfc3339(),
            }));
        }

        if quote.state != QuoteState::Approved {
            return Err(EngineError::Core(CoreError::invalid_transition(
                "Quote",
                quote_id,
                quote.state,
                QuoteState::Converted,
            )));
        }
        if !self
            .quotes
            .transition(
                &mut tx,
                quote_id,
                QuoteState::Approved,
                QuoteState::Converted,
            )
            .await?
        {
            return Err(EngineError::Core(CoreError::ConcurrencyConflict(format!(
                "quote {quote_id} changed state during conversion"
            ))));
        }

        // Conversion is the confirmation, so the order starts Approved.
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            number: self.orders.next_number(&mut tx).await?,
            warehouse_id: quote.warehouse_id.clone(),
            state: OrderState::Approved,
            payment_policy,
            quote_id: Some(quote.id.clone()),
            idempotency_key: None,
            notes: Some(format!("Converted from {}", quote.number)),
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(&mut tx, &order).await?;
        for line in &quote_lines {
            let order_line = kardex_core::OrderLine {
                id: generate_order_line_id(),
                order_id: order.id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                requested_unit: line.requested_unit.clone(),
                unit_price_cents: line.unit_price_cents,
                created_at: now,
            };
            self.orders.insert_line(&mut tx, &order_line).await?;
        }

        let movements = self
            .reservations
            .consume_tx(&mut tx, quote_id, &order.number, actor)
            .await?;
        self.quotes
            .set_converted_order(&mut tx, quote_id, &order.id)
            .await?;

        tx.commit().await.map_err(kardex_db::DbError::from)?;

        info!(
            quote = %quote.number,
            order = %order.number,
            movements = movements.len(),
            "Quote converted"
        );
        let event = DomainEvent::QuoteConverted {
            quote_id: quote.id.clone(),
            quote_number: quote.number.clone(),
            order_id: order.id.clone(),
            order_number: order.number.clone(),
        };
        Ok((order, movements, event))
    }

    // =========================================================================
    // Expire
    // =========================================================================

    /// Expires a single quote if its window has passed.
    ///
    /// Idempotent: returns `None` when the quote is already terminal or
    /// still inside its window. Used by the sweeper.
    pub async fn expire(&self, quote_id: &str) -> EngineResult<Option<DomainEvent>> {
        let mut tx = self.db.begin_write().await?;

        let quote = self.quotes.lock_quote(&mut tx, quote_id).await?;
        if !self.expire_in_place(&mut tx, &quote).await? {
            return Ok(None);
        }

        tx.commit().await.map_err(kardex_db::DbError::from)?;

        Ok(Some(DomainEvent::QuoteExpired {
            quote_id: quote.id,
            number: quote.number,
        }))
    }

    /// Transitions a live quote whose window has passed to `Expired` and
    /// releases its holds. Returns whether anything happened. Runs under
    /// the quote lock the caller already holds.
    async fn expire_in_place(
        &self,
        conn: &mut SqliteConnection,
        quote: &Quote,
    ) -> EngineResult<bool> {
        if quote.state.is_terminal() || quote.expires_at >= Utc::now() {
            return Ok(false);
        }

        if !self
            .quotes
            .transition(conn, &quote.id, quote.state, QuoteState::Expired)
            .await?
        {
            // A racer already moved it; treat as not-expired-here.
            return Ok(false);
        }
        let released = self.reservations.release_tx(conn, &quote.id).await?;
        self.quotes
            .append_note(conn, &quote.id, "Expired: validity window passed")
            .await?;

        warn!(number = %quote.number, released, "Quote expired");
        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
