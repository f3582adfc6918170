//! # Domain Events
//!
//! Post-commit notifications for external collaborators (accounting
//! postings, notifications). Events are returned by each operation and
//! dispatched by the orchestration layer AFTER the transaction commits;
//! delivery failure never rolls back stock.

use serde::{Deserialize, Serialize};

use kardex_core::PaymentPolicy;

/// A lifecycle event emitted after a committed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    QuoteCreated {
        quote_id: String,
        number: String,
        warehouse_id: String,
    },
    QuoteApproved {
        quote_id: String,
        number: String,
    },
    QuoteRejected {
        quote_id: String,
        number: String,
        reason: String,
    },
    QuoteExpired {
        quote_id: String,
        number: String,
    },
    QuoteConverted {
        quote_id: String,
        quote_number: String,
        order_id: String,
        order_number: String,
    },
    OrderCreated {
        order_id: String,
        number: String,
        warehouse_id: String,
        payment_policy: PaymentPolicy,
    },
    OrderApproved {
        order_id: String,
        number: String,
    },
    OrderRejected {
        order_id: String,
        number: String,
        reason: String,
        /// Base-unit quantity restored by the reversal (zero when the
        /// order had nothing consumed).
        restored_quantity: f64,
    },
}

/// Best-effort consumer of domain events.
///
/// Implementations must not block for long; a returned error is logged
/// and dropped, never propagated into the stock transaction.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DomainEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DomainEvent::QuoteApproved {
            quote_id: "q1".to_string(),
            number: "P-20260823-0001".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"quote_approved\""));
        assert!(json.contains("P-20260823-0001"));
    }
}
