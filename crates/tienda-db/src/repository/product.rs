//! # Product Repository
//!
//! Catalog maintenance: create, edit and delete products. Each write is
//! guarded by an operation id and leaves a `product_*` entry in the history
//! ledger, in the same transaction as the change itself.
//!
//! ## Delete
//! ```text
//! BEGIN
//!   history has op_id?          → AlreadyApplied
//!   DELETE inventory_stock rows for the product
//!   DELETE products row
//!   INSERT history (product_delete, details = product)
//!   image_url set?              → INSERT outbox_jobs (pending)
//! COMMIT → ProductRemoved + InventoryUpserted for each touched inventory
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tienda_core::validation::{validate_amount, validate_name};
use tienda_core::{CatalogEvent, CommitOutcome, HistoryRecord, OperationKind, Product};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::catalog::{fetch_product, publish, publish_inventories};
use super::ledger::{history_exists, insert_history};
use super::outbox::enqueue_in;
use crate::error::{DbError, DbResult};

/// Editable product fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDraft {
    pub name: String,
    #[serde(default)]
    pub brand_id: Option<String>,
    pub cost: f64,
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl ProductDraft {
    /// Validates and normalizes the draft into a product with the given id.
    fn into_product(self, id: String) -> DbResult<Product> {
        let name = validate_name("nombre", &self.name)?;
        let cost = validate_amount("costo", self.cost)?;
        let price = validate_amount("precio", self.price)?;
        let non_blank = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        Ok(Product {
            id,
            name,
            brand_id: non_blank(self.brand_id),
            cost,
            price,
            image_url: non_blank(self.image_url),
        })
    }
}

/// Repository for idempotent product writes.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
    events: broadcast::Sender<CatalogEvent>,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool, events: broadcast::Sender<CatalogEvent>) -> Self {
        ProductRepository { pool, events }
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, id).await
    }

    /// Counts all products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Creates a product.
    ///
    /// On `AlreadyApplied` the product returned is the one recorded by the
    /// first successful attempt.
    pub async fn create(
        &self,
        op_id: &str,
        draft: ProductDraft,
        user_id: Option<&str>,
    ) -> DbResult<(CommitOutcome, Product)> {
        let product = draft.into_product(Uuid::new_v4().to_string())?;
        let mut tx = self.pool.begin().await?;

        if history_exists(&mut tx, op_id).await? {
            tx.rollback().await?;
            let product = self.recorded_product(op_id).await?;
            info!(op_id = %op_id, product_id = %product.id, "Product create already applied");
            return Ok((CommitOutcome::AlreadyApplied, product));
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO products (id, name, brand_id, cost, price, image_url, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.brand_id)
        .bind(product.cost)
        .bind(product.price)
        .bind(&product.image_url)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let record =
            HistoryRecord::product_audit(op_id, OperationKind::ProductCreate, &product, user_id, now);
        insert_history(&mut tx, &record).await?;
        tx.commit().await?;

        info!(op_id = %op_id, product_id = %product.id, name = %product.name, "Product created");
        publish(&self.events, CatalogEvent::ProductUpserted(product.clone()));
        Ok((CommitOutcome::Applied, product))
    }

    /// Replaces a product's editable fields.
    pub async fn edit(
        &self,
        op_id: &str,
        id: &str,
        draft: ProductDraft,
        user_id: Option<&str>,
    ) -> DbResult<CommitOutcome> {
        let product = draft.into_product(id.to_string())?;
        let mut tx = self.pool.begin().await?;

        if history_exists(&mut tx, op_id).await? {
            tx.rollback().await?;
            info!(op_id = %op_id, product_id = %id, "Product edit already applied");
            return Ok(CommitOutcome::AlreadyApplied);
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = ?2, brand_id = ?3, cost = ?4, price = ?5, image_url = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.brand_id)
        .bind(product.cost)
        .bind(product.price)
        .bind(&product.image_url)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        let record =
            HistoryRecord::product_audit(op_id, OperationKind::ProductEdit, &product, user_id, now);
        insert_history(&mut tx, &record).await?;
        tx.commit().await?;

        info!(op_id = %op_id, product_id = %id, "Product edited");
        publish(&self.events, CatalogEvent::ProductUpserted(product));
        Ok(CommitOutcome::Applied)
    }

    /// Deletes a product, its stock rows and queues its image for cleanup.
    pub async fn delete(
        &self,
        op_id: &str,
        id: &str,
        user_id: Option<&str>,
    ) -> DbResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        if history_exists(&mut tx, op_id).await? {
            tx.rollback().await?;
            info!(op_id = %op_id, product_id = %id, "Product delete already applied");
            return Ok(CommitOutcome::AlreadyApplied);
        }

        let product = fetch_product(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;

        let touched: Vec<String> =
            sqlx::query_scalar("SELECT inventory_id FROM inventory_stock WHERE product_id = ?1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM inventory_stock WHERE product_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM products WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let record = HistoryRecord::product_audit(
            op_id,
            OperationKind::ProductDelete,
            &product,
            user_id,
            Utc::now(),
        );
        insert_history(&mut tx, &record).await?;

        if let Some(url) = &product.image_url {
            enqueue_in(&mut tx, id, url).await?;
        }

        tx.commit().await?;

        info!(op_id = %op_id, product_id = %id, stock_rows = touched.len(), "Product deleted");
        publish(&self.events, CatalogEvent::ProductRemoved { id: id.to_string() });
        if let Err(e) =
            publish_inventories(&self.pool, &self.events, touched.iter().map(String::as_str)).await
        {
            debug!(error = %e, "Inventory refresh after delete not published");
        }
        Ok(CommitOutcome::Applied)
    }

    async fn recorded_product(&self, op_id: &str) -> DbResult<Product> {
        let payload: String = sqlx::query_scalar("SELECT payload FROM history WHERE op_id = ?1")
            .bind(op_id)
            .fetch_one(&self.pool)
            .await?;
        let record: HistoryRecord = serde_json::from_str(&payload)?;
        let details = record
            .details
            .ok_or_else(|| DbError::Serialization(format!("history {} has no product", op_id)))?;
        Ok(serde_json::from_value(details)?)
    }
}
