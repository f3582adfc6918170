//! # Product Repository
//!
//! Database operations for products and their unit-conversion tables.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use kardex_core::{Product, UnitConversion};

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Creates a product and returns it.
    pub async fn create(
        &self,
        sku: &str,
        name: &str,
        base_unit: &str,
        allow_fractional: bool,
    ) -> DbResult<Product> {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: sku.to_string(),
            name: name.to_string(),
            base_unit: base_unit.to_string(),
            allow_fractional,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %product.id, sku = %product.sku, "Creating product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, base_unit, allow_fractional, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.base_unit)
        .bind(product.allow_fractional)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets an active product by SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, base_unit, allow_fractional, is_active,
                   created_at, updated_at
            FROM products
            WHERE sku = ?1 AND is_active = 1
            "#,
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by ID, active or not.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Product> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, base_unit, allow_fractional, is_active,
                   created_at, updated_at
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("Product", id))?;

        Ok(product)
    }

    /// Gets a product by ID inside a transaction.
    pub async fn get_by_id_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Product> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, base_unit, allow_fractional, is_active,
                   created_at, updated_at
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Product", id))?;

        Ok(product)
    }

    /// Adds a sale-unit conversion factor for a product.
    ///
    /// `factor` is base units per one `from_unit`.
    pub async fn add_conversion(
        &self,
        product_id: &str,
        from_unit: &str,
        factor: f64,
    ) -> DbResult<()> {
        debug!(product_id, from_unit, factor, "Adding unit conversion");

        sqlx::query(
            r#"
            INSERT INTO unit_conversions (product_id, from_unit, factor)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(product_id)
        .bind(from_unit)
        .bind(factor)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets all configured conversions for a product.
    pub async fn conversions_for(&self, product_id: &str) -> DbResult<Vec<UnitConversion>> {
        let conversions = sqlx::query_as::<_, UnitConversion>(
            r#"
            SELECT product_id, from_unit, factor
            FROM unit_conversions
            WHERE product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversions)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
