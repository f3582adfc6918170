//! # Expiry Sweep
//!
//! Background pass that expires quotes whose validity window has passed
//! and releases their holds, so abandoned quotes cannot pin stock.
//!
//! The sweep is one of two expiry paths; approve/convert also expire a
//! stale quote in place, so correctness never depends on sweep timing.
//! Each quote is expired in its own transaction under its own row lock,
//! and a quote that a racer already moved is skipped silently.

use chrono::Utc;
use tracing::{debug, error, info};

use kardex_db::repository::quote::QuoteRepository;

use crate::error::EngineResult;
use crate::office::BackOffice;
use crate::quote::QuoteEngine;

/// Periodic quote-expiry worker.
#[derive(Clone)]
pub struct ExpirySweeper {
    office: BackOffice,
    quotes: QuoteRepository,
    engine: QuoteEngine,
}

impl ExpirySweeper {
    /// Creates a sweeper bound to a facade (for config and event
    /// dispatch).
    pub fn new(office: BackOffice) -> Self {
        let db = office.database().clone();
        let quotes = db.quotes();
        let engine = QuoteEngine::new(db);
        ExpirySweeper {
            office,
            quotes,
            engine,
        }
    }

    /// Expires one batch of overdue quotes. Returns how many expired.
    pub async fn run_once(&self) -> EngineResult<usize> {
        let batch = self.office.config().sweep_batch_size;
        let candidates = self.quotes.expired_candidates(Utc::now(), batch).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut expired = 0;
        for quote in candidates {
            match self.engine.expire(&quote.id).await {
                Ok(Some(event)) => {
                    self.office.dispatch(&event);
                    expired += 1;
                }
                // Raced with an approve/convert/reject; nothing to do.
                Ok(None) => debug!(number = %quote.number, "Quote no longer expirable, skipped"),
                Err(err) => {
                    error!(number = %quote.number, error = %err, "Failed to expire quote");
                }
            }
        }

        info!(expired, "Expiry sweep finished");
        Ok(expired)
    }

    /// Spawns the sweep loop on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let interval = self.office.config().sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    error!(error = %err, "Expiry sweep pass failed");
                }
            }
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use kardex_core::{DocumentLine, QuoteState};

    use crate::office::BackOffice;
    use crate::quote::QuoteRequest;
    use crate::testutil::{seed_product, seed_stock, test_db};

    #[tokio::test]
    async fn test_sweep_expires_overdue_quotes_and_releases_holds() {
        let db = test_db().await;
        let product = seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 100.0, None).await;

        let office = BackOffice::new(db.clone());
        let quote = office
            .create_quote(QuoteRequest {
                lines: vec![DocumentLine::new("FLOUR-KG", 10.0, 250)],
                warehouse_id: "W1".to_string(),
                validity_days: Some(1),
                expected_total: None,
                actor: "tester".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(db.stock().total_available(&product.id, "W1").await.unwrap(), 90.0);

        // Push the window into the past.
        let mut tx = db.begin_write().await.unwrap();
        db.quotes()
            .set_expires_at(&mut tx, &quote.id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let sweeper = ExpirySweeper::new(office);
        assert_eq!(sweeper.run_once().await.unwrap(), 1);

        let stored = db.quotes().get(&quote.id).await.unwrap();
        assert_eq!(stored.state, QuoteState::Expired);
        assert_eq!(db.stock().total_available(&product.id, "W1").await.unwrap(), 100.0);

        // A second pass finds nothing.
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_live_quotes() {
        let db = test_db().await;
        seed_product(&db, "FLOUR-KG", false).await;
        seed_stock(&db, "FLOUR-KG", 100.0, None).await;

        let office = BackOffice::new(db.clone());
        office
            .create_quote(QuoteRequest {
                lines: vec![DocumentLine::new("FLOUR-KG", 10.0, 250)],
                warehouse_id: "W1".to_string(),
                validity_days: None,
                expected_total: None,
                actor: "tester".to_string(),
            })
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(office);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }
}
