//! # Error Types
//!
//! Domain-specific error types for kardex-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kardex-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  kardex-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  kardex-engine errors (separate crate)                                 │
//! │  └── EngineError      - What orchestration callers see                 │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, quantities, states)
//! 3. Errors are enum variants, never String
//! 4. Shortage detail is structured so the caller can render a precise
//!    per-line message

use thiserror::Error;

use crate::types::Shortage;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations in the stock ledger,
/// the distribution/reservation engines, or the quote/order state machines.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found (unknown SKU or deactivated product).
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// A stock record, quote, or order row does not exist.
    #[error("{entity} not found: {id}")]
    RecordNotFound { entity: String, id: String },

    /// Not enough available stock to satisfy a document.
    ///
    /// Carries one [`Shortage`] per short line so the caller can show
    /// exactly which lines were short and by how much.
    #[error("Insufficient stock for {document}: {} line(s) short", shortages.len())]
    StockInsufficient {
        document: String,
        shortages: Vec<Shortage>,
    },

    /// Product only sells in whole units and the resolved quantity is not
    /// a whole number.
    #[error("Product {sku} does not allow fractional quantities (requested {requested})")]
    FractionalQuantityNotAllowed { sku: String, requested: f64 },

    /// The requested sale unit differs from the storage unit and no
    /// conversion factor is configured for it.
    #[error("No unit conversion configured for {sku}: {from_unit} -> {to_unit}")]
    ConversionNotConfigured {
        sku: String,
        from_unit: String,
        to_unit: String,
    },

    /// A state machine transition that the transition table forbids.
    ///
    /// Never retried: it means the caller's view of state was stale.
    #[error("{entity} {id} is {current}, cannot transition to {requested}")]
    InvalidStateTransition {
        entity: String,
        id: String,
        current: String,
        requested: String,
    },

    /// Quote validity window has passed.
    #[error("Quote {id} expired at {expired_at}")]
    ExpiredQuote { id: String, expired_at: String },

    /// Two writers raced on the same row; the loser gets this and may
    /// retry a bounded number of times.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a RecordNotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::RecordNotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidStateTransition error.
    pub fn invalid_transition(
        entity: impl Into<String>,
        id: impl Into<String>,
        current: impl std::fmt::Display,
        requested: impl std::fmt::Display,
    ) -> Self {
        CoreError::InvalidStateTransition {
            entity: entity.into(),
            id: id.into(),
            current: current.to_string(),
            requested: requested.to_string(),
        }
    }

    /// Whether the error is safe to retry automatically.
    ///
    /// Only [`CoreError::ConcurrencyConflict`] qualifies; everything else
    /// reflects a stable fact about the data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict(_))
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when a document doesn't meet requirements.
/// Used for early validation before any lock is taken.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Document has no lines.
    #[error("document must have at least one line")]
    EmptyDocument,

    /// Externally supplied total disagrees with the computed total by more
    /// than the documented tolerance.
    #[error("total mismatch: supplied {supplied}, computed {computed}")]
    TotalMismatch { supplied: f64, computed: f64 },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
