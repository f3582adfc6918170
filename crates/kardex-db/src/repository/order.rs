//! # Order Repository
//!
//! Database operations for orders (ventas) and their lines.
//!
//! The order number doubles as the `document_reference` on every stock
//! movement the order produced, which is what makes rejection-reversal
//! idempotent.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use kardex_core::{Order, OrderLine, OrderState};

const ORDER_COLUMNS: &str = r#"
    id, number, warehouse_id, state, payment_policy, quote_id,
    idempotency_key, notes, created_at, updated_at
"#;

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Inserts an order header.
    pub async fn insert(&self, conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, number = %order.number, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, number, warehouse_id, state, payment_policy, quote_id,
                idempotency_key, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&order.id)
        .bind(&order.number)
        .bind(&order.warehouse_id)
        .bind(order.state)
        .bind(order.payment_policy)
        .bind(&order.quote_id)
        .bind(&order.idempotency_key)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts an order line (snapshot pattern: price frozen here).
    pub async fn insert_line(&self, conn: &mut SqliteConnection, line: &OrderLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (
                id, order_id, product_id, quantity, requested_unit,
                unit_price_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&line.id)
        .bind(&line.order_id)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(&line.requested_unit)
        .bind(line.unit_price_cents)
        .bind(line.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Acquires the write lock on an order row and returns the current
    /// row. First statement of every order state transition.
    pub async fn lock_order(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Order> {
        let result = sqlx::query("UPDATE orders SET updated_at = updated_at WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", id));
        }

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;

        Ok(order)
    }

    /// Guarded state transition: only succeeds when the row is still in
    /// `from`.
    pub async fn transition(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: OrderState,
        to: OrderState,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE orders SET state = ?3, updated_at = ?4 WHERE id = ?1 AND state = ?2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Appends a note line to the audit trail (rejection reasons).
    pub async fn append_note(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        note: &str,
    ) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE orders SET
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

    /// Gets an order by ID (pool read).
    pub async fn get(&self, id: &str) -> DbResult<Order> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))
    }

    /// Looks up a previously created order by idempotency key, inside a
    /// transaction. Creation with a used key returns this order instead
    /// of consuming stock again.
    pub async fn find_by_idempotency_key(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
    ) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = ?1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(order)
    }

    /// Next order number in format V-YYYYMMDD-NNNN.
    ///
    /// The sequence resumes from today's highest persisted number, so a
    /// process restart continues where the previous run stopped. Two
    /// concurrent creators can still read the same maximum; the UNIQUE
    /// index on `orders.number` fails the loser, which surfaces as a
    /// retryable conflict.
    pub async fn next_number(&self, conn: &mut SqliteConnection) -> DbResult<String> {
        let prefix = format!("V-{}", Utc::now().format("%Y%m%d"));
        let max: Option<String> =
            sqlx::query_scalar("SELECT MAX(number) FROM orders WHERE number LIKE ?1")
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

    /// Lines for an order (pool read).
    pub async fn lines(&self, order_id: &str) -> DbResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT id, order_id, product_id, quantity, requested_unit,
                   unit_price_cents, created_at
            FROM order_lines
            WHERE order_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }
}

/// Generates a new order line ID.
pub fn generate_order_line_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use kardex_core::PaymentPolicy;

    fn order_numbered(number: &str) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4().to_string(),
            number: number.to_string(),
            warehouse_id: "W1".to_string(),
            state: OrderState::Pending,
            payment_policy: PaymentPolicy::Immediate,
            quote_id: None,
            idempotency_key: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_order_numbers_resume_from_persisted_max() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.orders();
        let prefix = format!("V-{}", Utc::now().format("%Y%m%d"));

        let mut tx = db.pool().begin().await.unwrap();
        let first = repo.next_number(&mut tx).await.unwrap();
        assert_eq!(first, format!("{prefix}-0001"));

        // An order persisted by an earlier run pushes the sequence past
        // its number.
        repo.insert(&mut tx, &order_numbered(&format!("{prefix}-0041")))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        let next = repo.next_number(&mut tx).await.unwrap();
        assert_eq!(next, format!("{prefix}-0042"));
    }
}
