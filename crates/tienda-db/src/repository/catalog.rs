//! # Catalog Repository
//!
//! Products, inventories (with their stock maps), brands and the singleton
//! settings document, plus the change feed screens subscribe to.
//!
//! ## Change Feed
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  write (create_inventory, set_exchange_rates, ledger commit, ...)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT                                                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  re-read the touched document ──► CatalogEvent ──► broadcast            │
//! │                                                    │                    │
//! │                       ┌────────────────────────────┼──────────┐         │
//! │                       ▼                            ▼          ▼         │
//! │                   Cashier                        Buys     Transfers     │
//! │              CatalogSnapshot::apply()                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are only sent after the transaction commits, so a subscriber never
//! sees a change that was rolled back.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tienda_core::validation::{validate_name, validate_rates};
use tienda_core::{
    Brand, CatalogEvent, CatalogSnapshot, ExchangeRates, Inventory, NamedRef, Product, StockEntry,
};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbResult;

/// Repository for catalog reads and catalog-level writes.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
    events: broadcast::Sender<CatalogEvent>,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool, events: broadcast::Sender<CatalogEvent>) -> Self {
        CatalogRepository { pool, events }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Loads every collection into a fresh snapshot.
    pub async fn load_snapshot(&self) -> DbResult<CatalogSnapshot> {
        let products = self.list_products().await?;
        let inventories = self.list_inventories().await?;
        let brands = self.list_brands().await?;
        let rates = self.exchange_rates().await?;

        debug!(
            products = products.len(),
            inventories = inventories.len(),
            brands = brands.len(),
            "Catalog snapshot loaded"
        );

        Ok(CatalogSnapshot::from_parts(
            products,
            inventories,
            brands,
            rates,
        ))
    }

    /// All products ordered by name.
    pub async fn list_products(&self) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, name, brand_id, cost, price, image_url FROM products ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    /// A single product.
    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, id).await
    }

    /// All brands ordered by name.
    pub async fn list_brands(&self) -> DbResult<Vec<Brand>> {
        let brands = sqlx::query_as::<_, Brand>("SELECT id, name FROM brands ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(brands)
    }

    /// All inventories with their stock maps, ordered by id.
    pub async fn list_inventories(&self) -> DbResult<Vec<Inventory>> {
        let rows = sqlx::query("SELECT id, name FROM inventories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut inventories: BTreeMap<String, Inventory> = BTreeMap::new();
        for row in rows {
            let id: String = row.try_get("id")?;
            let name: String = row.try_get("name")?;
            inventories.insert(id.clone(), Inventory::new(id, name));
        }

        let stock_rows =
            sqlx::query("SELECT inventory_id, product_id, quantity FROM inventory_stock")
                .fetch_all(&self.pool)
                .await?;
        for row in stock_rows {
            let inventory_id: String = row.try_get("inventory_id")?;
            if let Some(inventory) = inventories.get_mut(&inventory_id) {
                inventory.products.insert(
                    row.try_get("product_id")?,
                    StockEntry {
                        quantity: row.try_get("quantity")?,
                    },
                );
            }
        }

        Ok(inventories.into_values().collect())
    }

    /// One inventory with its stock map.
    pub async fn get_inventory(&self, id: &str) -> DbResult<Option<Inventory>> {
        let mut conn = self.pool.acquire().await?;
        fetch_inventory(&mut conn, id).await
    }

    /// Reads the live quantities of some products in one inventory.
    ///
    /// Products without a stock row are reported as 0. This is the remote
    /// re-read behind the pre-flight drift check.
    pub async fn read_stock(
        &self,
        inventory_id: &str,
        product_ids: &[String],
    ) -> DbResult<BTreeMap<String, i64>> {
        let mut conn = self.pool.acquire().await?;
        let mut stock = BTreeMap::new();
        for product_id in product_ids {
            let quantity = current_quantity(&mut conn, inventory_id, product_id).await?;
            stock.insert(product_id.clone(), quantity);
        }
        debug!(inventory_id = %inventory_id, products = product_ids.len(), "Stock re-read");
        Ok(stock)
    }

    /// Current exchange rates (zeros until configured).
    pub async fn exchange_rates(&self) -> DbResult<ExchangeRates> {
        let row = sqlx::query("SELECT bcv_rate, paralelo_rate FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(ExchangeRates::new(
                row.try_get("bcv_rate")?,
                row.try_get("paralelo_rate")?,
            )),
            None => Ok(ExchangeRates::default()),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates an inventory and returns its id and name.
    pub async fn create_inventory(&self, name: &str) -> DbResult<NamedRef> {
        let name = validate_name("nombre del inventario", name)?;
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO inventories (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(&name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        info!(id = %id, name = %name, "Inventory created");
        self.publish(CatalogEvent::InventoryUpserted(Inventory::new(
            id.clone(),
            name.clone(),
        )));
        Ok(NamedRef { id, name })
    }

    /// Creates a brand and returns its id and name.
    pub async fn create_brand(&self, name: &str) -> DbResult<NamedRef> {
        let name = validate_name("nombre de la marca", name)?;
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO brands (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(&name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        info!(id = %id, name = %name, "Brand created");
        self.publish(CatalogEvent::BrandUpserted(Brand {
            id: id.clone(),
            name: name.clone(),
        }));
        Ok(NamedRef { id, name })
    }

    /// Updates the settings document.
    pub async fn set_exchange_rates(&self, rates: ExchangeRates) -> DbResult<()> {
        let rates = validate_rates(rates)?;

        sqlx::query(
            r#"
            INSERT INTO settings (id, bcv_rate, paralelo_rate, updated_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                bcv_rate = excluded.bcv_rate,
                paralelo_rate = excluded.paralelo_rate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(rates.bcv)
        .bind(rates.paralelo)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(bcv = rates.bcv, paralelo = rates.paralelo, "Exchange rates updated");
        self.publish(CatalogEvent::SettingsChanged(rates));
        Ok(())
    }

    /// Re-reads inventories after a commit and publishes them.
    pub async fn publish_inventories<'a, I>(&self, ids: I) -> DbResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        publish_inventories(&self.pool, &self.events, ids).await
    }

    fn publish(&self, event: CatalogEvent) {
        publish(&self.events, event);
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Sends an event. Having no subscribers is not an error.
pub(crate) fn publish(events: &broadcast::Sender<CatalogEvent>, event: CatalogEvent) {
    if events.send(event).is_err() {
        debug!("No catalog subscribers");
    }
}

/// Publishes the committed state of each inventory.
pub(crate) async fn publish_inventories<'a, I>(
    pool: &SqlitePool,
    events: &broadcast::Sender<CatalogEvent>,
    ids: I,
) -> DbResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut conn = pool.acquire().await?;
    for id in ids {
        if let Some(inventory) = fetch_inventory(&mut conn, id).await? {
            publish(events, CatalogEvent::InventoryUpserted(inventory));
        }
    }
    Ok(())
}

pub(crate) async fn fetch_product(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(
        "SELECT id, name, brand_id, cost, price, image_url FROM products WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(product)
}

pub(crate) async fn fetch_inventory(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Inventory>> {
    let Some(row) = sqlx::query("SELECT id, name FROM inventories WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let mut inventory = Inventory::new(
        row.try_get::<String, _>("id")?,
        row.try_get::<String, _>("name")?,
    );
    let stock_rows =
        sqlx::query("SELECT product_id, quantity FROM inventory_stock WHERE inventory_id = ?1")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
    for row in stock_rows {
        inventory.products.insert(
            row.try_get("product_id")?,
            StockEntry {
                quantity: row.try_get("quantity")?,
            },
        );
    }
    Ok(Some(inventory))
}

/// Quantity of one product in one inventory; 0 when there is no row.
pub(crate) async fn current_quantity(
    conn: &mut SqliteConnection,
    inventory_id: &str,
    product_id: &str,
) -> DbResult<i64> {
    let quantity: Option<i64> = sqlx::query_scalar(
        "SELECT quantity FROM inventory_stock WHERE inventory_id = ?1 AND product_id = ?2",
    )
    .bind(inventory_id)
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(quantity.unwrap_or(0))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use tienda_core::{CatalogEvent, ExchangeRates};

    #[tokio::test]
    async fn test_create_inventory_returns_named_ref() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut events = db.subscribe();

        let created = db.catalog().create_inventory("  Depósito ").await.unwrap();
        assert_eq!(created.name, "Depósito");
        assert!(!created.id.is_empty());

        match events.recv().await.unwrap() {
            CatalogEvent::InventoryUpserted(inv) => assert_eq!(inv.id, created.id),
            other => panic!("unexpected event {:?}", other),
        }

        let inventories = db.catalog().list_inventories().await.unwrap();
        assert_eq!(inventories.len(), 1);
        assert!(db.catalog().create_inventory("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_create_brand() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let brand = db.catalog().create_brand("Polar").await.unwrap();
        let brands = db.catalog().list_brands().await.unwrap();
        assert_eq!(brands.len(), 1);
        assert_eq!(brands[0].id, brand.id);
    }

    #[tokio::test]
    async fn test_exchange_rates_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        assert!(!catalog.exchange_rates().await.unwrap().is_valid());
        catalog
            .set_exchange_rates(ExchangeRates::new(36.5, 41.0))
            .await
            .unwrap();
        assert_eq!(
            catalog.exchange_rates().await.unwrap(),
            ExchangeRates::new(36.5, 41.0)
        );
        assert!(catalog
            .set_exchange_rates(ExchangeRates::new(0.0, 41.0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_read_stock_missing_is_zero() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let inv = db.catalog().create_inventory("Tienda").await.unwrap();
        let stock = db
            .catalog()
            .read_stock(&inv.id, &["P1".to_string()])
            .await
            .unwrap();
        assert_eq!(stock.get("P1"), Some(&0));
    }
}
