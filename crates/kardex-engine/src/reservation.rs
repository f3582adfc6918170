//! # Reservation Engine
//!
//! Soft holds on stock for approved quotes. Reserving bumps the reserved
//! counter on the chosen records; on-hand does not move and NO movement
//! is written. The movement appears only if the quote converts, at which
//! point each slice is consumed (reserved and on-hand decremented
//! together, one `ReservationConsumed` movement per slice, tagged with
//! the ORDER's document reference).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reserve      on_hand  ──      reserved  +q     movement: none         │
//! │  release      on_hand  ──      reserved  -q     movement: none         │
//! │  consume      on_hand  -q      reserved  -q     movement: -q           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Slices are allocated FIFO-by-expiry, one reservation row per
//! (line, record) pair, so the per-record invariant
//! `sum(active slices) == quantity_reserved` holds at all times.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use kardex_core::{
    plan_allocation, ConversionInfo, CoreError, MovementKind, Reservation, ReservationState,
    Shortage, StockMovement,
};
use kardex_db::repository::reservation::ReservationRepository;
use kardex_db::repository::stock::StockRepository;
use kardex_db::Database;

use crate::distribution::ResolvedLine;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{MovementRequest, StockLedger};

/// The reservation engine: places, releases and consumes soft holds.
#[derive(Debug, Clone)]
pub struct ReservationEngine {
    stock: StockRepository,
    reservations: ReservationRepository,
    ledger: StockLedger,
}

impl ReservationEngine {
    /// Creates a reservation engine over the given database.
    pub fn new(db: Database) -> Self {
        let stock = db.stock();
        let reservations = db.reservations();
        let ledger = StockLedger::new(db);
        ReservationEngine {
            stock,
            reservations,
            ledger,
        }
    }

    /// Places holds for every line of a quote, FIFO across records.
    ///
    /// All-or-nothing: any line short of availability fails the whole
    /// call with the full shortage list, and the caller's transaction
    /// rolls back. Reservations never overdraw, regardless of the
    /// payment policy.
    pub async fn reserve_tx(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
        quote_number: &str,
        resolved: &[ResolvedLine],
        warehouse_id: &str,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<Vec<Reservation>> {
        let mut placed = Vec::new();
        let mut shortages: Vec<Shortage> = Vec::new();

        for line in resolved {
            let needed = line.resolved.base_quantity;

            self.stock
                .lock_stock(conn, &line.product.id, warehouse_id)
                .await?;
            let candidates = self
                .stock
                .candidates_fifo(conn, &line.product.id, warehouse_id, false)
                .await?;

            let plan = match plan_allocation(&candidates, needed, false) {
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

            if !shortages.is_empty() {
                continue;
            }

            for slice in plan {
                self.stock.lock_record(conn, &slice.stock_record_id).await?;
                let record = self.stock.get_record_tx(conn, &slice.stock_record_id).await?;
                self.stock
                    .set_quantities(
                        conn,
                        &record.id,
                        record.quantity_on_hand,
                        record.quantity_reserved + slice.quantity,
                    )
                    .await?;

                let reservation = self
                    .reservations
                    .insert(
                        conn,
                        quote_id,
                        &line.product.id,
                        warehouse_id,
                        &record.id,
                        slice.quantity,
                        expires_at,
                    )
                    .await?;
                placed.push(reservation);
            }
        }

        if !shortages.is_empty() {
            return Err(EngineError::Core(CoreError::StockInsufficient {
                document: quote_number.to_string(),
                shortages,
            }));
        }

        info!(quote_id, slices = placed.len(), "Reservations placed");
        Ok(placed)
    }

    /// Releases every active hold for a quote (rejection or expiry).
    ///
    /// Returns the total base-unit quantity released. Idempotent: a
    /// quote with no active slices releases nothing.
    pub async fn release_tx(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
    ) -> EngineResult<f64> {
        let active = self.reservations.active_for_quote(conn, quote_id).await?;
        let mut released = 0.0;

        for reservation in &active {
            self.stock
                .lock_record(conn, &reservation.stock_record_id)
                .await?;
            let record = self
                .stock
                .get_record_tx(conn, &reservation.stock_record_id)
                .await?;
            self.stock
                .set_quantities(
                    conn,
                    &record.id,
                    record.quantity_on_hand,
                    (record.quantity_reserved - reservation.quantity).max(0.0),
                )
                .await?;
            self.reservations
                .settle(conn, &reservation.id, ReservationState::Released)
                .await?;
            released += reservation.quantity;
        }

        debug!(quote_id, released, "Reservations released");
        Ok(released)
    }

    /// Consumes every active hold for a converting quote.
    ///
    /// Each slice becomes one `ReservationConsumed` movement tagged with
    /// the order's document reference; reserved and on-hand drop
    /// together, so availability for other customers is unchanged.
    pub async fn consume_tx(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
        order_reference: &str,
        actor: &str,
    ) -> EngineResult<Vec<StockMovement>> {
        let active = self.reservations.active_for_quote(conn, quote_id).await?;
        let mut movements = Vec::with_capacity(active.len());

        for reservation in &active {
            let movement = self
                .ledger
                .apply_movement(
                    conn,
                    MovementRequest {
                        stock_record_id: &reservation.stock_record_id,
                        delta: -reservation.quantity,
                        reserved_delta: -reservation.quantity,
                        kind: MovementKind::ReservationConsumed,
                        document_reference: order_reference,
                        actor,
                        conversion: ConversionInfo::default(),
                        // A credit sale may have overdrawn past this hold
                        // already; the hold was granted against real stock
                        // and must still consume.
                        allow_negative: true,
                    },
                )
                .await?;
            self.reservations
                .settle(conn, &reservation.id, ReservationState::Consumed)
                .await?;
            movements.push(movement);
        }

        info!(
            quote_id,
            order = order_reference,
            slices = movements.len(),
            "Reservations consumed"
        );
        Ok(movements)
    }

    /// Extends every active hold for a quote to a new expiry.
    pub async fn extend_tx(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> EngineResult<u64> {
        let extended = self
            .reservations
            .extend(conn, quote_id, new_expires_at)
            .await?;
        Ok(extended)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
