//! # Validation Module
//!
//! Document validation for the back-office engines.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (controllers, excluded from this core)                │
//! │  ├── Request deserialization and auth                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - document-shape validation                      │
//! │  ├── Non-empty line sets, positive quantities                          │
//! │  ├── Validity windows, supplied-total tolerance                        │
//! │  └── Runs BEFORE any row lock is taken                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / UNIQUE / FK constraints                                │
//! │  └── Generated-column availability invariant                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::DocumentLine;
use crate::{MAX_VALIDITY_DAYS, TOTAL_TOLERANCE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Document Validators
// =============================================================================

/// Validates the shape of an inbound document's lines.
///
/// ## Rules
/// - At least one line
/// - Every SKU non-empty
/// - Every quantity strictly positive
/// - Every unit price non-negative
pub fn validate_lines(lines: &[DocumentLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::EmptyDocument);
    }

    for line in lines {
        if line.sku.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "sku".to_string(),
            });
        }
        if line.quantity <= 0.0 {
            return Err(ValidationError::MustBePositive {
                field: format!("quantity ({})", line.sku),
            });
        }
        if line.unit_price_cents < 0 {
            return Err(ValidationError::MustBePositive {
                field: format!("unit_price ({})", line.sku),
            });
        }
    }

    Ok(())
}

/// Validates a quote validity window in days.
pub fn validate_validity_days(days: i64) -> ValidationResult<()> {
    if !(1..=MAX_VALIDITY_DAYS).contains(&days) {
        return Err(ValidationError::OutOfRange {
            field: "validity_days".to_string(),
            min: 1,
            max: MAX_VALIDITY_DAYS,
        });
    }
    Ok(())
}

// =============================================================================
// Totals
// =============================================================================

/// Computes a document total in currency units (not cents).
///
/// Quantities are floats from legacy storage, so the result is a float;
/// comparisons against it must use [`validate_supplied_total`].
pub fn document_total(lines: &[DocumentLine]) -> f64 {
    lines
        .iter()
        .map(|l| l.quantity * (l.unit_price_cents as f64 / 100.0))
        .sum()
}

/// Validates an externally supplied total against the computed total.
///
/// Applies the documented absolute tolerance (0.01) to absorb rounding in
/// legacy floating storage. The tolerance is policy, not a bug.
pub fn validate_supplied_total(supplied: f64, computed: f64) -> ValidationResult<()> {
    if (supplied - computed).abs() > TOTAL_TOLERANCE {
        return Err(ValidationError::TotalMismatch { supplied, computed });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_rejected() {
        assert!(matches!(
            validate_lines(&[]),
            Err(ValidationError::EmptyDocument)
        ));
    }

    #[test]
    fn test_valid_lines_pass() {
        let lines = vec![
            DocumentLine::new("WATER-500", 3.0, 150),
            DocumentLine::new("FLOUR-KG", 2.5, 90),
        ];
        assert!(validate_lines(&lines).is_ok());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let lines = vec![DocumentLine::new("WATER-500", 0.0, 150)];
        assert!(matches!(
            validate_lines(&lines),
            Err(ValidationError::MustBePositive { .. })
        ));
    }

    #[test]
    fn test_blank_sku_rejected() {
        let lines = vec![DocumentLine::new("  ", 1.0, 150)];
        assert!(matches!(
            validate_lines(&lines),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_validity_days_bounds() {
        assert!(validate_validity_days(1).is_ok());
        assert!(validate_validity_days(MAX_VALIDITY_DAYS).is_ok());
        assert!(validate_validity_days(0).is_err());
        assert!(validate_validity_days(MAX_VALIDITY_DAYS + 1).is_err());
    }

    #[test]
    fn test_document_total() {
        let lines = vec![
            DocumentLine::new("A", 2.0, 150), // 3.00
            DocumentLine::new("B", 0.5, 100), // 0.50
        ];
        assert!((document_total(&lines) - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_total_tolerance_absorbs_rounding() {
        assert!(validate_supplied_total(3.50, 3.509).is_ok());
        assert!(validate_supplied_total(3.50, 3.52).is_err());
    }
}
