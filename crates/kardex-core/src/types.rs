//! # Domain Types
//!
//! Core domain types for the inventory ledger and order lifecycle engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   StockRecord   │   │  StockMovement  │   │   Reservation   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  on_hand        │◄──│  quantity_delta │   │  quantity       │       │
//! │  │  reserved       │   │  before / after │   │  expires_at     │       │
//! │  │  expiry_date    │   │  document_ref   │   │  state          │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │  Quote (+lines) │   │  Order (+lines) │                             │
//! │  │  ─────────────  │   │  ─────────────  │                             │
//! │  │  Pending        │   │  Pending        │                             │
//! │  │  Approved       │   │  Approved       │                             │
//! │  │  Converted      │   │  Rejected       │                             │
//! │  │  Rejected       │   └─────────────────┘                             │
//! │  │  Expired        │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every aggregate has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID: (sku, quote/order number) - human-readable

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::QTY_EPSILON;

// =============================================================================
// Product
// =============================================================================

/// A product held in stock and sold on quotes/orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name shown on documents.
    pub name: String,

    /// Storage unit all ledger quantities are expressed in (e.g. "bottle").
    pub base_unit: String,

    /// Whether quantities may be fractional (bulk goods) or must be whole
    /// units (packaged goods).
    pub allow_fractional: bool,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    /// When the product was created.
    pub created_at: DateTime<Utc>,

    /// When the product was last updated.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Unit Conversion
// =============================================================================

/// A configured conversion from a sale unit into the product's base unit.
///
/// `factor` is the number of base units in one `from_unit`:
/// a box of 12 bottles is `(from_unit: "box", factor: 12.0)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UnitConversion {
    pub product_id: String,
    pub from_unit: String,
    pub factor: f64,
}

// =============================================================================
// Stock Record
// =============================================================================

/// Per product × warehouse (optionally per batch) quantity record.
///
/// ## Invariant
/// `quantity_available == quantity_on_hand - quantity_reserved` at all
/// times; the schema enforces this with a generated column. Neither
/// on-hand nor available may go negative unless the credit-sale policy
/// explicitly allows it.
///
/// Mutated exclusively through ledger operations; never deleted, only
/// zeroed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockRecord {
    pub id: String,
    pub product_id: String,
    pub warehouse_id: String,

    /// Batch/lot code when the warehouse tracks batches.
    pub batch_code: Option<String>,

    /// Drives FIFO ordering: soonest expiry is consumed first, records
    /// without expiry last.
    pub expiry_date: Option<NaiveDate>,

    /// Physical quantity in the warehouse, in base units.
    pub quantity_on_hand: f64,

    /// Soft holds from active quote reservations.
    pub quantity_reserved: f64,

    /// on_hand - reserved, maintained by the database as a generated column.
    pub quantity_available: f64,

    /// On-hand at record creation, kept for the movement-sum audit
    /// invariant.
    pub initial_quantity: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// Quantity a new reservation or non-negative consumption may draw.
    #[inline]
    pub fn available(&self) -> f64 {
        self.quantity_on_hand - self.quantity_reserved
    }
}

// =============================================================================
// Movement Kind
// =============================================================================

/// Tag for every ledger mutation.
///
/// Consumption kinds (`SaleOut`, `ReservationConsumed`) are the ones a
/// reversal looks up by document reference; a document may carry either,
/// depending on whether the order was direct or quote-originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Stock entering the warehouse from a purchase.
    PurchaseIn,
    /// Direct sale consumption.
    SaleOut,
    /// Manual correction upwards.
    AdjustmentIn,
    /// Manual correction downwards.
    AdjustmentOut,
    /// Spoilage/waste write-off.
    WasteOut,
    /// Reserved stock consumed when a quote converts to an order.
    ReservationConsumed,
    /// Consumption returned by an order rejection.
    ReversalIn,
}

impl MovementKind {
    /// Kinds that represent consumption and are eligible for reversal.
    pub const CONSUMPTION_KINDS: [MovementKind; 2] =
        [MovementKind::SaleOut, MovementKind::ReservationConsumed];

    /// Whether a movement of this kind removes stock from the warehouse.
    pub fn is_outflow(&self) -> bool {
        matches!(
            self,
            MovementKind::SaleOut
                | MovementKind::AdjustmentOut
                | MovementKind::WasteOut
                | MovementKind::ReservationConsumed
        )
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MovementKind::PurchaseIn => "purchase_in",
            MovementKind::SaleOut => "sale_out",
            MovementKind::AdjustmentIn => "adjustment_in",
            MovementKind::AdjustmentOut => "adjustment_out",
            MovementKind::WasteOut => "waste_out",
            MovementKind::ReservationConsumed => "reservation_consumed",
            MovementKind::ReversalIn => "reversal_in",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// One append-only ledger entry per stock mutation.
///
/// ## Invariant
/// For a given StockRecord, the sum of `quantity_delta` since creation
/// equals `quantity_on_hand - initial_quantity`. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub stock_record_id: String,
    pub product_id: String,
    pub warehouse_id: String,
    pub kind: MovementKind,

    /// Signed delta in base units; negative = outflow.
    pub quantity_delta: f64,

    /// On-hand snapshot before the mutation (audit).
    pub quantity_before: f64,

    /// On-hand snapshot after the mutation (audit).
    pub quantity_after: f64,

    /// Correlation id (order/quote number); the idempotency key for
    /// reversal lookup.
    pub document_reference: String,

    /// Conversion metadata: quantity as the caller requested it.
    pub requested_quantity: Option<f64>,
    /// Sale unit the caller requested in, when it differed from base.
    pub requested_unit: Option<String>,
    /// Base unit the delta is expressed in.
    pub base_unit: Option<String>,
    /// Factor applied (base units per requested unit).
    pub conversion_factor: Option<f64>,
    /// Whether a conversion was applied at all.
    pub conversion_applied: bool,

    /// Who triggered the mutation.
    pub actor: String,

    pub created_at: DateTime<Utc>,
}

/// Conversion metadata attached to a movement when the caller's unit
/// differed from the storage unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionInfo {
    pub requested_quantity: Option<f64>,
    pub requested_unit: Option<String>,
    pub base_unit: Option<String>,
    pub conversion_factor: Option<f64>,
    pub conversion_applied: bool,
}

// =============================================================================
// Reservation
// =============================================================================

/// Lifecycle of a reservation slice.
///
/// Active → Released (rejection/expiry) or Active → Consumed (conversion),
/// never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Active,
    Released,
    Consumed,
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationState::Active => "active",
            ReservationState::Released => "released",
            ReservationState::Consumed => "consumed",
        };
        f.write_str(s)
    }
}

/// A soft hold on a specific stock record for one quote line.
///
/// Reservations allocate FIFO across stock records exactly like
/// consumption does, so one quote line may produce several slices.
///
/// ## Invariant
/// The sum of active reservation quantities for a StockRecord equals that
/// record's `quantity_reserved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Reservation {
    pub id: String,
    pub quote_id: String,
    pub product_id: String,
    pub warehouse_id: String,
    pub stock_record_id: String,

    /// Reserved quantity in base units.
    pub quantity: f64,

    pub state: ReservationState,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Quote (Proforma)
// =============================================================================

/// The status of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum QuoteState {
    /// Awaiting approval; reservations active.
    Pending,
    /// Approved; reservations extended, convertible to an order.
    Approved,
    /// Converted into exactly one order (terminal).
    Converted,
    /// Rejected; reservations released (terminal).
    Rejected,
    /// Validity window passed; reservations released (terminal).
    Expired,
}

impl QuoteState {
    /// Transition table.
    ///
    /// | From     | To        | Trigger          |
    /// |----------|-----------|------------------|
    /// | Pending  | Approved  | approve()        |
    /// | Pending  | Rejected  | reject()         |
    /// | Approved | Converted | convert()        |
    /// | Approved | Rejected  | reject()         |
    /// | Pending/Approved | Expired | background sweep |
    pub fn can_transition_to(&self, next: QuoteState) -> bool {
        use QuoteState::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (Approved, Converted)
                | (Approved, Rejected)
                | (Approved, Expired)
        )
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QuoteState::Converted | QuoteState::Rejected | QuoteState::Expired
        )
    }
}

impl std::fmt::Display for QuoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuoteState::Pending => "pending",
            QuoteState::Approved => "approved",
            QuoteState::Converted => "converted",
            QuoteState::Rejected => "rejected",
            QuoteState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A quote (proforma): a priced offer that soft-holds stock until it is
/// converted, rejected, or expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Quote {
    pub id: String,
    /// Business number, e.g. `P-20260823-0001`.
    pub number: String,
    pub warehouse_id: String,
    pub state: QuoteState,
    pub expires_at: DateTime<Utc>,
    /// Set exactly once, when the quote converts.
    pub converted_order_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line on a quote. Snapshot pattern: price frozen at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct QuoteLine {
    pub id: String,
    pub quote_id: String,
    pub product_id: String,
    /// Quantity as requested, in `requested_unit` (or base unit if none).
    pub quantity: f64,
    /// Sale unit; None means the product's base unit.
    pub requested_unit: Option<String>,
    /// Unit price in cents.
    pub unit_price_cents: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Order (Venta)
// =============================================================================

/// The status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Pending,
    Approved,
    /// Cancelled; any consumed stock has been reversed (terminal).
    Rejected,
}

impl OrderState {
    /// Transition table: Pending → Approved, Pending → Rejected,
    /// Approved → Rejected (with reversal).
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Rejected)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderState::Pending => "pending",
            OrderState::Approved => "approved",
            OrderState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Payment policy attached to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum PaymentPolicy {
    /// Paid up front: stock is validated and may never go negative.
    Immediate,
    /// Credit sale (promise of future payment): stock validation is
    /// skipped and on-hand may go negative.
    Credit,
}

impl PaymentPolicy {
    /// Whether this policy permits consuming into negative stock.
    #[inline]
    pub fn allows_negative_stock(&self) -> bool {
        matches!(self, PaymentPolicy::Credit)
    }
}

/// An order (venta): a confirmed sale that consumes stock exactly once,
/// whether created directly or via a converted quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    /// Business number, e.g. `V-20260823-0001`; doubles as the
    /// document reference on every movement this order produced.
    pub number: String,
    pub warehouse_id: String,
    pub state: OrderState,
    pub payment_policy: PaymentPolicy,
    /// Back-reference to the originating quote, when converted.
    pub quote_id: Option<String>,
    /// Caller-supplied key; creation with a previously used key returns
    /// the existing order instead of consuming twice.
    pub idempotency_key: Option<String>,
    /// Audit notes (rejection reasons are appended here).
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line on an order. Snapshot pattern: price frozen at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderLine {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub requested_unit: Option<String>,
    pub unit_price_cents: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Document Lines & Shortages
// =============================================================================

/// One requested line on an inbound document (quote or order), before
/// unit resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentLine {
    /// Product identified by SKU (business key callers hold).
    pub sku: String,
    /// Quantity in `unit` (or the product's base unit when None).
    pub quantity: f64,
    /// Sale unit; None means base unit.
    pub unit: Option<String>,
    /// Unit price in cents.
    pub unit_price_cents: i64,
}

impl DocumentLine {
    /// Convenience constructor for a line in base units.
    pub fn new(sku: impl Into<String>, quantity: f64, unit_price_cents: i64) -> Self {
        DocumentLine {
            sku: sku.into(),
            quantity,
            unit: None,
            unit_price_cents,
        }
    }

    /// Same line expressed in a sale unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Per-line shortage detail carried by `StockInsufficient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortage {
    pub product_id: String,
    pub sku: String,
    /// Needed quantity in base units.
    pub needed: f64,
    /// Available quantity in base units at check time.
    pub available: f64,
}

impl Shortage {
    /// Missing quantity (always positive).
    #[inline]
    pub fn missing(&self) -> f64 {
        (self.needed - self.available).max(0.0)
    }
}

/// Result of a read-only availability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub ok: bool,
    pub shortages: Vec<Shortage>,
}

impl AvailabilityReport {
    /// A report with no shortages.
    pub fn ok() -> Self {
        AvailabilityReport {
            ok: true,
            shortages: Vec::new(),
        }
    }
}

// =============================================================================
// Quantity helpers
// =============================================================================

/// Whether a quantity is a whole number, within [`QTY_EPSILON`].
///
/// Quantities ride through legacy floating storage, so `3.0000000001`
/// still counts as whole.
#[inline]
pub fn is_whole_quantity(qty: f64) -> bool {
    (qty - qty.round()).abs() < QTY_EPSILON
}

/// Whether a quantity is effectively zero, within [`QTY_EPSILON`].
#[inline]
pub fn is_zero_quantity(qty: f64) -> bool {
    qty.abs() < QTY_EPSILON
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_transition_table() {
        use QuoteState::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Expired));
        assert!(Approved.can_transition_to(Converted));
        assert!(Approved.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Expired));

        // Terminal states admit nothing.
        assert!(!Converted.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Approved));
        // Pending cannot convert directly.
        assert!(!Pending.can_transition_to(Converted));
    }

    #[test]
    fn test_order_transition_table() {
        use OrderState::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Approved.can_transition_to(Pending));
    }

    #[test]
    fn test_payment_policy_negative_stock() {
        assert!(PaymentPolicy::Credit.allows_negative_stock());
        assert!(!PaymentPolicy::Immediate.allows_negative_stock());
    }

    #[test]
    fn test_whole_quantity_tolerates_float_noise() {
        assert!(is_whole_quantity(3.0));
        assert!(is_whole_quantity(3.0000000001));
        assert!(!is_whole_quantity(2.5));
    }

    #[test]
    fn test_shortage_missing() {
        let s = Shortage {
            product_id: "p".into(),
            sku: "X".into(),
            needed: 7.0,
            available: 4.5,
        };
        assert!((s.missing() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_consumption_kinds_are_outflows() {
        for kind in MovementKind::CONSUMPTION_KINDS {
            assert!(kind.is_outflow());
        }
        assert!(!MovementKind::ReversalIn.is_outflow());
        assert!(!MovementKind::PurchaseIn.is_outflow());
    }
}
