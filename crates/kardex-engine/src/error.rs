//! # Engine Error Types
//!
//! The error surface orchestration callers see.
//!
//! ## Propagation Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Validation-class (StockInsufficient, FractionalQuantityNotAllowed,    │
//! │  ConversionNotConfigured)                                              │
//! │      → detected before/during the transaction, no partial writes       │
//! │                                                                         │
//! │  ConcurrencyConflict                                                   │
//! │      → safe to retry a bounded number of times (BackOffice does)       │
//! │                                                                         │
//! │  InvalidStateTransition                                                │
//! │      → never retried; the caller's view of state was stale             │
//! │                                                                         │
//! │  Any error inside a transaction aborts the whole document              │
//! │  (all-or-nothing across all lines).                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use kardex_core::CoreError;
use kardex_db::DbError;

/// Errors surfaced by the engines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Business rule violation (shortages, bad conversions, stale state).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Infrastructure failure below the business rules.
    #[error("Storage error: {0}")]
    Db(DbError),
}

impl EngineError {
    /// Whether the whole operation may be retried automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Core(e) => e.is_retryable(),
            EngineError::Db(e) => e.is_retryable(),
        }
    }
}

/// Database errors that carry business meaning are lifted into
/// [`CoreError`]; the rest stay infrastructure errors.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(msg) => EngineError::Core(CoreError::ConcurrencyConflict(msg)),
            DbError::NotFound { entity, id } => {
                EngineError::Core(CoreError::RecordNotFound { entity, id })
            }
            other => EngineError::Db(other),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_lifts_to_core() {
        let err: EngineError = DbError::Conflict("database is locked".into()).into();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::ConcurrencyConflict(_))
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found_lifts_to_core() {
        let err: EngineError = DbError::not_found("Quote", "q1").into();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::RecordNotFound { .. })
        ));
        assert!(!err.is_retryable());
    }
}
