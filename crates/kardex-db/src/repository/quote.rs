//! # Quote Repository
//!
//! Database operations for quotes (proformas) and their lines.
//!
//! ## Quote Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create ──► Pending ──approve──► Approved ──convert──► Converted       │
//! │               │                     │                                   │
//! │               ├──reject─────────────┴──reject──► Rejected              │
//! │               └──sweep──────────────────sweep──► Expired               │
//! │                                                                         │
//! │  Every transition: lock_quote (touch) → state check → guarded UPDATE   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use kardex_core::{Quote, QuoteLine, QuoteState};

const QUOTE_COLUMNS: &str = r#"
    id, number, warehouse_id, state, expires_at, converted_order_id,
    notes, created_at, updated_at
"#;

/// Repository for quote database operations.
#[derive(Debug, Clone)]
pub struct QuoteRepository {
    pool: SqlitePool,
}

impl QuoteRepository {
    /// Creates a new QuoteRepository.
    pub fn new(pool: SqlitePool) -> Self {
        QuoteRepository { pool }
    }

    /// Inserts a quote header.
    pub async fn insert(&self, conn: &mut SqliteConnection, quote: &Quote) -> DbResult<()> {
        debug!(id = %quote.id, number = %quote.number, "Inserting quote");

        sqlx::query(
            r#"
            INSERT INTO quotes (
                id, number, warehouse_id, state, expires_at,
                converted_order_id, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&quote.id)
        .bind(&quote.number)
        .bind(&quote.warehouse_id)
        .bind(quote.state)
        .bind(quote.expires_at)
        .bind(&quote.converted_order_id)
        .bind(&quote.notes)
        .bind(quote.created_at)
        .bind(quote.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a quote line (snapshot pattern: price frozen here).
    pub async fn insert_line(&self, conn: &mut SqliteConnection, line: &QuoteLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO quote_lines (
                id, quote_id, product_id, quantity, requested_unit,
                unit_price_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&line.id)
        .bind(&line.quote_id)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(&line.requested_unit)
        .bind(line.unit_price_cents)
        .bind(line.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Acquires the write lock on a quote row and returns the current row.
    ///
    /// Must be the first statement of every quote state transition, so
    /// two concurrent approve/reject/convert calls serialize and the
    /// second sees the already-updated state.
    pub async fn lock_quote(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Quote> {
        let result = sqlx::query("UPDATE quotes SET updated_at = updated_at WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Quote", id));
        }

        let sql = format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?1");
        let quote = sqlx::query_as::<_, Quote>(&sql)
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;

        Ok(quote)
    }

    /// Guarded state transition: only succeeds when the row is still in
    /// `from`. Zero rows affected means a racer got there first.
    pub async fn transition(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: QuoteState,
        to: QuoteState,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE quotes SET state = ?3, updated_at = ?4 WHERE id = ?1 AND state = ?2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Updates the quote's validity window.
    pub async fn set_expires_at(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query("UPDATE quotes SET expires_at = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(expires_at)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Records the one-way link to the order a quote converted into.
    pub async fn set_converted_order(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        order_id: &str,
    ) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE quotes SET converted_order_id = ?2, updated_at = ?3
             WHERE id = ?1 AND converted_order_id IS NULL",
        )
        .bind(id)
        .bind(order_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Appends a note line (rejection reasons, expiry remarks).
    pub async fn append_note(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        note: &str,
    ) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE quotes SET
                notes = COALESCE(notes || char(10), '') || ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(note)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Gets a quote by ID (pool read).
    pub async fn get(&self, id: &str) -> DbResult<Quote> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?1");
        sqlx::query_as::<_, Quote>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Quote", id))
    }

    /// Lines for a quote, inside a transaction.
    pub async fn lines_tx(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
    ) -> DbResult<Vec<QuoteLine>> {
        let lines = sqlx::query_as::<_, QuoteLine>(
            r#"
            SELECT id, quote_id, product_id, quantity, requested_unit,
                   unit_price_cents, created_at
            FROM quote_lines
            WHERE quote_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(quote_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(lines)
    }

    /// Lines for a quote (pool read).
    pub async fn lines(&self, quote_id: &str) -> DbResult<Vec<QuoteLine>> {
        let lines = sqlx::query_as::<_, QuoteLine>(
            r#"
            SELECT id, quote_id, product_id, quantity, requested_unit,
                   unit_price_cents, created_at
            FROM quote_lines
            WHERE quote_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Next quote number in format P-YYYYMMDD-NNNN.
    ///
    /// The sequence resumes from today's highest persisted number, so a
    /// process restart continues where the previous run stopped. Two
    /// concurrent creators can still read the same maximum; the UNIQUE
    /// index on `quotes.number` fails the loser, which surfaces as a
    /// retryable conflict.
    pub async fn next_number(&self, conn: &mut SqliteConnection) -> DbResult<String> {
        let prefix = format!("P-{}", Utc::now().format("%Y%m%d"));
        let max: Option<String> =
            sqlx::query_scalar("SELECT MAX(number) FROM quotes WHERE number LIKE ?1")
                .bind(format!("{prefix}-%"))
                .fetch_one(&mut *conn)
                .await?;
        let seq = max
            .as_deref()
            .and_then(|number| number.rsplit('-').next())
            .and_then(|tail| tail.parse::<u32>().ok())
            .unwrap_or(0)
            + 1;
        Ok(format!("{prefix}-{seq:04}"))
    }

    /// Quotes whose validity window has passed and are still live.
    ///
    /// Used by the expiry sweep; the index on (state, expires_at) keeps
    /// this cheap.
    pub async fn expired_candidates(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Quote>> {
        let sql = format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes
             WHERE state IN ('pending', 'approved') AND expires_at < ?1
             ORDER BY expires_at ASC
             LIMIT ?2"
        );
        let quotes = sqlx::query_as::<_, Quote>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(quotes)
    }
}

/// Generates a new quote line ID.
pub fn generate_quote_line_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_quote_numbers_resume_from_persisted_max() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.quotes();
        let prefix = format!("P-{}", Utc::now().format("%Y%m%d"));
        let now = Utc::now();

        let mut tx = db.pool().begin().await.unwrap();
        assert_eq!(repo.next_number(&mut tx).await.unwrap(), format!("{prefix}-0001"));

        let quote = Quote {
            id: Uuid::new_v4().to_string(),
            number: format!("{prefix}-0007"),
            warehouse_id: "W1".to_string(),
            state: QuoteState::Pending,
            expires_at: now,
            converted_order_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        repo.insert(&mut tx, &quote).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        assert_eq!(repo.next_number(&mut tx).await.unwrap(), format!("{prefix}-0008"));
    }
}
