//! # Reservation Repository
//!
//! Database operations for quote reservations (soft holds on stock).
//!
//! State changes here touch only the reservation rows; the reserved
//! counter on stock records is owned by the engines and updated in the
//! same transaction.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use kardex_core::{Reservation, ReservationState};

const RESERVATION_COLUMNS: &str = r#"
    id, quote_id, product_id, warehouse_id, stock_record_id,
    quantity, state, expires_at, created_at, updated_at
"#;

/// Repository for reservation database operations.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// Inserts an active reservation slice.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
        product_id: &str,
        warehouse_id: &str,
        stock_record_id: &str,
        quantity: f64,
        expires_at: DateTime<Utc>,
    ) -> DbResult<Reservation> {
        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            quote_id: quote_id.to_string(),
            product_id: product_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            stock_record_id: stock_record_id.to_string(),
            quantity,
            state: ReservationState::Active,
            expires_at,
            created_at: now,
            updated_at: now,
        };

        debug!(
            id = %reservation.id,
            quote_id,
            stock_record_id,
            quantity,
            "Creating reservation"
        );

        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, quote_id, product_id, warehouse_id, stock_record_id,
                quantity, state, expires_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.quote_id)
        .bind(&reservation.product_id)
        .bind(&reservation.warehouse_id)
        .bind(&reservation.stock_record_id)
        .bind(reservation.quantity)
        .bind(reservation.state)
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(reservation)
    }

    /// Active reservation slices for a quote, inside a transaction.
    pub async fn active_for_quote(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations
             WHERE quote_id = ?1 AND state = 'active'
             ORDER BY created_at ASC, id ASC"
        );
        let reservations = sqlx::query_as::<_, Reservation>(&sql)
            .bind(quote_id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(reservations)
    }

    /// Extends the expiry of all active reservations for a quote.
    pub async fn extend(
        &self,
        conn: &mut SqliteConnection,
        quote_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> DbResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE reservations SET expires_at = ?2, updated_at = ?3
            WHERE quote_id = ?1 AND state = 'active'
            "#,
        )
        .bind(quote_id)
        .bind(new_expires_at)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Moves one reservation slice out of the active state.
    ///
    /// Guarded on `state = 'active'` so a slice can be released OR
    /// consumed, never both.
    pub async fn settle(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        state: ReservationState,
    ) -> DbResult<()> {
        debug_assert!(state != ReservationState::Active);
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE reservations SET state = ?2, updated_at = ?3
            WHERE id = ?1 AND state = 'active'
            "#,
        )
        .bind(id)
        .bind(state)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Reservation (active)", id));
        }

        Ok(())
    }

    /// All reservations for a quote regardless of state (audit/tests).
    pub async fn all_for_quote(&self, quote_id: &str) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations
             WHERE quote_id = ?1
             ORDER BY created_at ASC, id ASC"
        );
        let reservations = sqlx::query_as::<_, Reservation>(&sql)
            .bind(quote_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(reservations)
    }
}
