//! # kardex-engine: Ledger & State Machine Engines
//!
//! Every stock mutation and every quote/order state transition in the
//! system runs through this crate. It layers on `kardex-core` (pure
//! rules) and `kardex-db` (persistence) and exposes [`BackOffice`], the
//! facade outer layers call.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          BackOffice (office)                           │
//! │      bounded retry on conflicts, post-commit event dispatch            │
//! │                                                                         │
//! │   QuoteEngine (quote)          OrderEngine (order)                     │
//! │      │  reserve/release/consume   │  consume at creation               │
//! │      ▼                            ▼                                    │
//! │   ReservationEngine (reservation) DistributionEngine (distribution)    │
//! │      │                            │  FIFO plan, idempotent reverse     │
//! │      └────────────┬───────────────┘                                    │
//! │                   ▼                                                     │
//! │            StockLedger (ledger)                                        │
//! │      apply_movement: the one primitive that writes stock               │
//! │                                                                         │
//! │   ExpirySweeper (sweep): background quote expiry                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Discipline
//! Every mutating operation is exactly one SQLite transaction whose
//! first statement touches the primary row (quote, order, or stock
//! record), serializing concurrent writers. `SQLITE_BUSY` surfaces as a
//! retryable conflict, which [`BackOffice`] retries with backoff.

pub mod distribution;
pub mod error;
pub mod events;
pub mod ledger;
pub mod office;
pub mod order;
pub mod quote;
pub mod reservation;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testutil;

pub use distribution::{DistributionEngine, ResolvedLine, ReversalSummary};
pub use error::{EngineError, EngineResult};
pub use events::{DomainEvent, EventListener};
pub use ledger::{MovementRequest, StockLedger};
pub use office::{BackOffice, EngineConfig};
pub use order::{OrderEngine, OrderOutcome, OrderRequest};
pub use quote::{QuoteEngine, QuoteRequest};
pub use reservation::ReservationEngine;
pub use sweep::ExpirySweeper;
