//! # kardex-core: Pure Business Logic for the Kardex Back-Office
//!
//! This crate is the **heart** of the inventory ledger and order lifecycle
//! engine. It contains all business logic as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kardex Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Controllers / schedulers (external)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                kardex-engine (orchestration)                    │   │
//! │  │    ledger • distribution • reservation • quote • order          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kardex-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   units   │  │ allocation │  │ validation│  │   │
//! │  │   │  ledger,  │  │ sale→base │  │ FIFO plans │  │   rules   │  │   │
//! │  │   │  states   │  │ factors   │  │            │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    kardex-db (Database Layer)                   │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (StockRecord, StockMovement, Quote, Order, ...)
//! - [`units`] - Sale-unit to base-unit conversion resolution
//! - [`allocation`] - Pure FIFO-by-expiry allocation planning
//! - [`validation`] - Document-shape validation and the totals tolerance
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: deterministic - same input = same output
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Closed State Enums**: transitions validated against tables, never
//!    ad hoc string comparisons
//! 4. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod types;
pub mod units;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use kardex_core::Quote` instead of
// `use kardex_core::types::Quote`

pub use allocation::{fifo_order, plan_allocation, AllocationSlice, Shortfall};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;
pub use units::{resolve_quantity, ResolvedQuantity};
pub use validation::{
    document_total, validate_lines, validate_supplied_total, validate_validity_days,
    ValidationResult,
};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Absolute epsilon for quantity comparisons.
///
/// Quantities ride through legacy floating storage; equality and
/// whole-number checks must absorb representation noise.
pub const QTY_EPSILON: f64 = 1e-9;

/// Absolute tolerance when validating externally supplied totals against
/// computed totals. Documented policy for legacy floating storage, not a
/// bug.
pub const TOTAL_TOLERANCE: f64 = 0.01;

/// Maximum quote validity window.
pub const MAX_VALIDITY_DAYS: i64 = 365;

/// Default quote validity window when the caller supplies none.
pub const DEFAULT_VALIDITY_DAYS: i64 = 15;

/// Suffix appended to a document reference by a reversal, making repeated
/// reversal calls a no-op.
pub const REVERSAL_SUFFIX: &str = "-REVERSAL";
