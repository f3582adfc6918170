//! # FIFO Allocation Planning
//!
//! Pure planning of which stock records a consumption (or reservation)
//! draws from. The plan is computed against a snapshot of candidate
//! records; the engine applies it inside the same transaction that locked
//! the rows, so the snapshot cannot go stale.
//!
//! ## FIFO-by-expiry
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Candidates (sorted):   batch A (exp 2026-01-10, avail 5)              │
//! │                         batch B (exp 2026-02-01, avail 5)              │
//! │                         batch C (no expiry,      avail 5)              │
//! │                                                                         │
//! │  need 7  ──►  take 5 from A, take 2 from B                             │
//! │  need 16, allow_negative ──► 5 + 5 + 5, last slice overdraws to 6      │
//! │  need 16, !allow_negative ──► Shortfall { available: 15 }              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ordering is deterministic (expiry ascending with nulls last, then
//! creation order), so the choice of records is stable across retries.

use std::cmp::Ordering;

use crate::types::{is_zero_quantity, StockRecord};

/// One slice of an allocation plan: take `quantity` from one record.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationSlice {
    pub stock_record_id: String,
    /// Base-unit quantity drawn from this record. The last slice of a
    /// negative-stock plan may exceed the record's availability.
    pub quantity: f64,
}

/// Total availability was short of the requirement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shortfall {
    /// Total available across all candidates at planning time.
    pub available: f64,
    /// Quantity that was required.
    pub needed: f64,
}

/// FIFO-by-expiry comparator: soonest expiry first, records without an
/// expiry date last, creation order as the tie-break.
pub fn fifo_order(a: &StockRecord, b: &StockRecord) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(ea), Some(eb)) => ea.cmp(&eb).then(a.created_at.cmp(&b.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.created_at.cmp(&b.created_at),
    }
}

/// Plans a greedy FIFO draw of `needed` base units across `candidates`.
///
/// Candidates must already be in FIFO order (the repository query orders
/// them; [`fifo_order`] is the same ordering for in-memory callers).
/// Draws are bounded by each record's availability (`on_hand - reserved`);
/// when `allow_negative` is set and availability runs out, the remainder
/// is dumped on the last candidate, which goes negative.
///
/// Returns one slice per record touched; partial draws across records
/// for a single line are expected.
pub fn plan_allocation(
    candidates: &[StockRecord],
    needed: f64,
    allow_negative: bool,
) -> Result<Vec<AllocationSlice>, Shortfall> {
    let total_available: f64 = candidates.iter().map(|r| r.available().max(0.0)).sum();

    if total_available < needed && !allow_negative {
        return Err(Shortfall {
            available: total_available,
            needed,
        });
    }

    let mut remaining = needed;
    let mut slices: Vec<AllocationSlice> = Vec::new();

    for record in candidates {
        if is_zero_quantity(remaining) {
            break;
        }
        let take = remaining.min(record.available().max(0.0));
        if is_zero_quantity(take) {
            continue;
        }
        slices.push(AllocationSlice {
            stock_record_id: record.id.clone(),
            quantity: take,
        });
        remaining -= take;
    }

    // Negative-stock policy: the last record absorbs the shortfall.
    if !is_zero_quantity(remaining) {
        debug_assert!(allow_negative);
        match slices.last_mut() {
            Some(last) => last.quantity += remaining,
            None => {
                let record = candidates.last().ok_or(Shortfall {
                    available: total_available,
                    needed,
                })?;
                slices.push(AllocationSlice {
                    stock_record_id: record.id.clone(),
                    quantity: remaining,
                });
            }
        }
    }

    Ok(slices)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};

    fn record(id: &str, expiry: Option<(i32, u32, u32)>, on_hand: f64, age_secs: i64) -> StockRecord {
        let created = Utc::now() - Duration::seconds(age_secs);
        StockRecord {
            id: id.to_string(),
            product_id: "p1".to_string(),
            warehouse_id: "w1".to_string(),
            batch_code: Some(id.to_string()),
            expiry_date: expiry.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap()),
            quantity_on_hand: on_hand,
            quantity_reserved: 0.0,
            quantity_available: on_hand,
            initial_quantity: on_hand,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_fifo_order_soonest_expiry_first() {
        let a = record("a", Some((2026, 1, 10)), 5.0, 10);
        let b = record("b", Some((2026, 2, 1)), 5.0, 20);
        let c = record("c", None, 5.0, 30);

        let mut records = vec![c.clone(), b.clone(), a.clone()];
        records.sort_by(fifo_order);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fifo_order_null_expiry_ties_on_creation() {
        let older = record("older", None, 5.0, 100);
        let newer = record("newer", None, 5.0, 10);
        let mut records = vec![newer.clone(), older.clone()];
        records.sort_by(fifo_order);
        assert_eq!(records[0].id, "older");
    }

    #[test]
    fn test_consume_7_of_5_5_5_draws_two_batches() {
        let candidates = vec![
            record("d1", Some((2026, 1, 1)), 5.0, 30),
            record("d2", Some((2026, 2, 1)), 5.0, 20),
            record("d3", Some((2026, 3, 1)), 5.0, 10),
        ];
        let slices = plan_allocation(&candidates, 7.0, false).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].stock_record_id, "d1");
        assert_eq!(slices[0].quantity, 5.0);
        assert_eq!(slices[1].stock_record_id, "d2");
        assert_eq!(slices[1].quantity, 2.0);
    }

    #[test]
    fn test_shortfall_reported_when_negative_not_allowed() {
        let candidates = vec![record("a", None, 10.0, 0)];
        let err = plan_allocation(&candidates, 12.0, false).unwrap_err();
        assert_eq!(err.available, 10.0);
        assert_eq!(err.needed, 12.0);
    }

    #[test]
    fn test_allow_negative_overdraws_last_record() {
        let candidates = vec![
            record("a", Some((2026, 1, 1)), 5.0, 10),
            record("b", Some((2026, 2, 1)), 5.0, 0),
        ];
        let slices = plan_allocation(&candidates, 16.0, true).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].quantity, 5.0);
        // 5 available + 6 overdraw on the last record.
        assert_eq!(slices[1].quantity, 11.0);
    }

    #[test]
    fn test_allow_negative_with_no_candidates_is_shortfall() {
        let err = plan_allocation(&[], 3.0, true).unwrap_err();
        assert_eq!(err.available, 0.0);
    }

    #[test]
    fn test_reserved_quantity_reduces_draw() {
        let mut r = record("a", None, 10.0, 0);
        r.quantity_reserved = 4.0;
        r.quantity_available = 6.0;
        let err = plan_allocation(&[r], 8.0, false).unwrap_err();
        assert_eq!(err.available, 6.0);
    }

    #[test]
    fn test_exact_fit_consumes_everything() {
        let candidates = vec![
            record("a", Some((2026, 1, 1)), 5.0, 10),
            record("b", Some((2026, 2, 1)), 5.0, 0),
        ];
        let slices = plan_allocation(&candidates, 10.0, false).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].quantity + slices[1].quantity, 10.0);
    }
}
