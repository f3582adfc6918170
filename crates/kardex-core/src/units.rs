//! # Unit Conversion
//!
//! Resolves quantities requested in a sale unit into the product's base
//! (storage) unit before any lock is taken.
//!
//! ## Conversion Direction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Sale Unit → Base Unit                               │
//! │                                                                         │
//! │  UnitConversion { from_unit: "box", factor: 12.0 }                     │
//! │                                                                         │
//! │  request: 2 box   ──► base_quantity = 2 × 12 = 24 bottle               │
//! │  request: 5       ──► no unit given, already base: 5 bottle            │
//! │  request: 2 crate ──► no factor configured → ConversionNotConfigured   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fractional Enforcement
//! Products flagged `allow_fractional = false` reject any resolved base
//! quantity that is not a whole number (within epsilon, since quantities
//! ride through legacy floating storage). The check happens here, before
//! any stock row is locked.

use crate::error::{CoreError, CoreResult};
use crate::types::{is_whole_quantity, ConversionInfo, Product, UnitConversion};

/// A quantity resolved into the product's base unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuantity {
    /// Quantity in base units; the only number the ledger ever sees.
    pub base_quantity: f64,
    /// Base units per requested unit (1.0 when no conversion applied).
    pub factor: f64,
    /// Whether a conversion table entry was applied.
    pub applied: bool,
    /// Quantity exactly as the caller requested it.
    pub requested_quantity: f64,
    /// Unit the caller requested in, when it differed from base.
    pub requested_unit: Option<String>,
}

impl ResolvedQuantity {
    /// Conversion metadata for the movement audit trail.
    pub fn conversion_info(&self, base_unit: &str) -> ConversionInfo {
        ConversionInfo {
            requested_quantity: Some(self.requested_quantity),
            requested_unit: self.requested_unit.clone(),
            base_unit: Some(base_unit.to_string()),
            conversion_factor: Some(self.factor),
            conversion_applied: self.applied,
        }
    }
}

/// Resolves a requested quantity into base units.
///
/// ## Rules
/// 1. No unit, or the unit equals the product's base unit → factor 1.
/// 2. Otherwise a conversion entry for (product, unit) must exist, else
///    `ConversionNotConfigured`.
/// 3. Non-fractional products reject non-whole base quantities with
///    `FractionalQuantityNotAllowed`.
///
/// Unit names compare case-insensitively ("Box" and "box" are the same
/// sale unit).
pub fn resolve_quantity(
    product: &Product,
    conversions: &[UnitConversion],
    quantity: f64,
    unit: Option<&str>,
) -> CoreResult<ResolvedQuantity> {
    let (factor, applied, requested_unit) = match unit {
        None => (1.0, false, None),
        Some(u) if u.eq_ignore_ascii_case(&product.base_unit) => (1.0, false, None),
        Some(u) => {
            let conv = conversions
                .iter()
                .find(|c| c.product_id == product.id && c.from_unit.eq_ignore_ascii_case(u))
                .ok_or_else(|| CoreError::ConversionNotConfigured {
                    sku: product.sku.clone(),
                    from_unit: u.to_string(),
                    to_unit: product.base_unit.clone(),
                })?;
            (conv.factor, true, Some(u.to_string()))
        }
    };

    let base_quantity = quantity * factor;

    if !product.allow_fractional && !is_whole_quantity(base_quantity) {
        return Err(CoreError::FractionalQuantityNotAllowed {
            sku: product.sku.clone(),
            requested: quantity,
        });
    }

    Ok(ResolvedQuantity {
        base_quantity,
        factor,
        applied,
        requested_quantity: quantity,
        requested_unit,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(allow_fractional: bool) -> Product {
        Product {
            id: "p1".to_string(),
            sku: "WATER-500".to_string(),
            name: "Water 500ml".to_string(),
            base_unit: "bottle".to_string(),
            allow_fractional,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn box_of_12() -> UnitConversion {
        UnitConversion {
            product_id: "p1".to_string(),
            from_unit: "box".to_string(),
            factor: 12.0,
        }
    }

    #[test]
    fn test_base_unit_passes_through() {
        let r = resolve_quantity(&product(false), &[], 5.0, None).unwrap();
        assert_eq!(r.base_quantity, 5.0);
        assert!(!r.applied);
        assert_eq!(r.factor, 1.0);
    }

    #[test]
    fn test_same_unit_name_is_not_a_conversion() {
        let r = resolve_quantity(&product(false), &[], 5.0, Some("Bottle")).unwrap();
        assert!(!r.applied);
    }

    #[test]
    fn test_box_converts_to_bottles() {
        let r = resolve_quantity(&product(false), &[box_of_12()], 2.0, Some("box")).unwrap();
        assert_eq!(r.base_quantity, 24.0);
        assert!(r.applied);
        assert_eq!(r.factor, 12.0);
        assert_eq!(r.requested_unit.as_deref(), Some("box"));
    }

    #[test]
    fn test_missing_conversion_rejected() {
        let err = resolve_quantity(&product(false), &[box_of_12()], 2.0, Some("crate"))
            .unwrap_err();
        assert!(matches!(err, CoreError::ConversionNotConfigured { .. }));
    }

    #[test]
    fn test_fractional_rejected_for_whole_unit_product() {
        let err = resolve_quantity(&product(false), &[], 2.5, None).unwrap_err();
        match err {
            CoreError::FractionalQuantityNotAllowed { requested, .. } => {
                assert_eq!(requested, 2.5)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fractional_sale_unit_with_whole_base_is_allowed() {
        // Half a box of 12 is 6 whole bottles.
        let r = resolve_quantity(&product(false), &[box_of_12()], 0.5, Some("box")).unwrap();
        assert_eq!(r.base_quantity, 6.0);
    }

    #[test]
    fn test_fractional_allowed_product_accepts_fractions() {
        let mut p = product(true);
        p.base_unit = "kg".to_string();
        let r = resolve_quantity(&p, &[], 2.5, None).unwrap();
        assert_eq!(r.base_quantity, 2.5);
    }

    #[test]
    fn test_conversion_info_metadata() {
        let r = resolve_quantity(&product(false), &[box_of_12()], 2.0, Some("box")).unwrap();
        let info = r.conversion_info("bottle");
        assert_eq!(info.requested_quantity, Some(2.0));
        assert_eq!(info.conversion_factor, Some(12.0));
        assert!(info.conversion_applied);
        assert_eq!(info.base_unit.as_deref(), Some("bottle"));
    }
}
