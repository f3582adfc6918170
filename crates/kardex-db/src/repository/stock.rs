//! # Stock Repository
//!
//! Database operations for stock records and the append-only movement log.
//!
//! ## Locking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Engine transaction                                                     │
//! │                                                                         │
//! │  1. lock_stock(product, warehouse)  ← touch UPDATE, takes write lock   │
//! │  2. candidates_fifo(...)            ← stable FIFO-ordered read         │
//! │  3. set_quantities(...) per record                                     │
//! │  4. insert_movement(...) per record                                    │
//! │  5. commit                                                              │
//! │                                                                         │
//! │  The touch in step 1 serializes every concurrent consumer/reserver     │
//! │  of the same stock before any quantity is read.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use kardex_core::{StockMovement, StockRecord};

const RECORD_COLUMNS: &str = r#"
    id, product_id, warehouse_id, batch_code, expiry_date,
    quantity_on_hand, quantity_reserved, quantity_available,
    initial_quantity, created_at, updated_at
"#;

const MOVEMENT_COLUMNS: &str = r#"
    id, stock_record_id, product_id, warehouse_id, kind,
    quantity_delta, quantity_before, quantity_after, document_reference,
    requested_quantity, requested_unit, base_unit, conversion_factor,
    conversion_applied, actor, created_at
"#;

/// Repository for stock records and movements.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Acquires the write lock by touching every record of the
    /// (product, warehouse) pair.
    ///
    /// Must be the first statement of a consuming/reserving transaction.
    /// Returns the number of records touched (zero when no stock record
    /// exists yet).
    pub async fn lock_stock(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        warehouse_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE stock_records SET updated_at = updated_at
             WHERE product_id = ?1 AND warehouse_id = ?2",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Acquires the write lock by touching a single record.
    pub async fn lock_record(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE stock_records SET updated_at = updated_at WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("StockRecord", id));
        }
        Ok(())
    }

    /// Fetches a record inside a transaction.
    pub async fn get_record_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<StockRecord> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM stock_records WHERE id = ?1");
        sqlx::query_as::<_, StockRecord>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("StockRecord", id))
    }

    /// Candidate records for FIFO allocation, in deterministic order:
    /// expiry date ascending with NULLs last, then creation order.
    ///
    /// `include_exhausted` widens the query to records with no
    /// availability, so a negative-stock draw has something to overdraw.
    pub async fn candidates_fifo(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        warehouse_id: &str,
        include_exhausted: bool,
    ) -> DbResult<Vec<StockRecord>> {
        let filter = if include_exhausted {
            ""
        } else {
            "AND quantity_available > 0"
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records
             WHERE product_id = ?1 AND warehouse_id = ?2 {filter}
             ORDER BY expiry_date IS NULL, expiry_date ASC, created_at ASC, id ASC"
        );

        let records = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(product_id)
            .bind(warehouse_id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(records)
    }

    /// Creates an empty stock record (stock enters through a movement).
    pub async fn create_record(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        warehouse_id: &str,
        batch_code: Option<&str>,
        expiry_date: Option<NaiveDate>,
    ) -> DbResult<StockRecord> {
        let now = Utc::now();
        let record = StockRecord {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            batch_code: batch_code.map(str::to_string),
            expiry_date,
            quantity_on_hand: 0.0,
            quantity_reserved: 0.0,
            quantity_available: 0.0,
            initial_quantity: 0.0,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %record.id, product_id, warehouse_id, "Creating stock record");

        sqlx::query(
            r#"
            INSERT INTO stock_records (
                id, product_id, warehouse_id, batch_code, expiry_date,
                quantity_on_hand, quantity_reserved, initial_quantity,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&record.id)
        .bind(&record.product_id)
        .bind(&record.warehouse_id)
        .bind(&record.batch_code)
        .bind(record.expiry_date)
        .bind(record.quantity_on_hand)
        .bind(record.quantity_reserved)
        .bind(record.initial_quantity)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(record)
    }

    /// Writes new on-hand/reserved quantities for a record.
    ///
    /// The engines compute the new values under the transaction's lock;
    /// this is a plain persist, never arithmetic in SQL.
    pub async fn set_quantities(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        quantity_on_hand: f64,
        quantity_reserved: f64,
    ) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE stock_records SET
                quantity_on_hand = ?2,
                quantity_reserved = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(quantity_on_hand)
        .bind(quantity_reserved)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("StockRecord", id));
        }

        Ok(())
    }

    /// Appends a movement to the log. Movements are immutable once
    /// created; there is no update or delete path.
    pub async fn insert_movement(
        &self,
        conn: &mut SqliteConnection,
        movement: &StockMovement,
    ) -> DbResult<()> {
        debug!(
            id = %movement.id,
            kind = %movement.kind,
            delta = movement.quantity_delta,
            document = %movement.document_reference,
            "Appending stock movement"
        );

        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, stock_record_id, product_id, warehouse_id, kind,
                quantity_delta, quantity_before, quantity_after, document_reference,
                requested_quantity, requested_unit, base_unit, conversion_factor,
                conversion_applied, actor, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.stock_record_id)
        .bind(&movement.product_id)
        .bind(&movement.warehouse_id)
        .bind(movement.kind)
        .bind(movement.quantity_delta)
        .bind(movement.quantity_before)
        .bind(movement.quantity_after)
        .bind(&movement.document_reference)
        .bind(movement.requested_quantity)
        .bind(&movement.requested_unit)
        .bind(&movement.base_unit)
        .bind(movement.conversion_factor)
        .bind(movement.conversion_applied)
        .bind(&movement.actor)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// All movements recorded under a document reference, inside a
    /// transaction (reversal lookup path, uses the document index).
    pub async fn movements_for_document_tx(
        &self,
        conn: &mut SqliteConnection,
        document_reference: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements
             WHERE document_reference = ?1
             ORDER BY created_at ASC, id ASC"
        );
        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(document_reference)
            .fetch_all(&mut *conn)
            .await?;

        Ok(movements)
    }

    // =========================================================================
    // Pool-scoped reads
    // =========================================================================

    /// Fetches a record outside any transaction.
    pub async fn get_record(&self, id: &str) -> DbResult<StockRecord> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM stock_records WHERE id = ?1");
        sqlx::query_as::<_, StockRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("StockRecord", id))
    }

    /// All movements for a document reference.
    pub async fn movements_for_document(
        &self,
        document_reference: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements
             WHERE document_reference = ?1
             ORDER BY created_at ASC, id ASC"
        );
        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(document_reference)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }

    /// Total on-hand for a product in a warehouse across all records.
    pub async fn total_on_hand(&self, product_id: &str, warehouse_id: &str) -> DbResult<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(quantity_on_hand) FROM stock_records
             WHERE product_id = ?1 AND warehouse_id = ?2",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0.0))
    }

    /// Total unreserved stock for a product in a warehouse.
    pub async fn total_available(&self, product_id: &str, warehouse_id: &str) -> DbResult<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(quantity_available) FROM stock_records
             WHERE product_id = ?1 AND warehouse_id = ?2 AND quantity_available > 0",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0.0))
    }

    /// Sum of movement deltas for one record (audit invariant: equals
    /// `quantity_on_hand - initial_quantity`).
    pub async fn movement_sum(&self, stock_record_id: &str) -> DbResult<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(quantity_delta) FROM stock_movements WHERE stock_record_id = ?1",
        )
        .bind(stock_record_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0.0))
    }

    /// Sum of active reservation quantities for one record (audit
    /// invariant: equals the record's `quantity_reserved`).
    pub async fn active_reservation_sum(&self, stock_record_id: &str) -> DbResult<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(quantity) FROM reservations
             WHERE stock_record_id = ?1 AND state = 'active'",
        )
        .bind(stock_record_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0.0))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
