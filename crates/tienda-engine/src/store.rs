//! # Collaborator Seams
//!
//! The engine talks to its stores through traits so screens can run
//! against SQLite in production and in-memory fakes in tests.
//!
//! ```text
//! ┌──────────────────┐        ┌─────────────────────────────────────────┐
//! │  Screen / engine │──────► │ CatalogStore                            │
//! │                  │        │   load_snapshot, subscribe, read_stock, │
//! │                  │        │   commit                                │
//! │                  │        ├─────────────────────────────────────────┤
//! │                  │──────► │ LocalCache                              │
//! │                  │        │   get, set, remove                      │
//! ├──────────────────┤        ├─────────────────────────────────────────┤
//! │CatalogMaintenance│──────► │ CatalogAdmin                            │
//! │                  │        │   product create/edit/delete, rates,    │
//! │                  │        │   inventories, brands                   │
//! └──────────────────┘        └─────────────────────────────────────────┘
//!                                  ▲                    ▲
//!                                  │                    │
//!                       tienda_db::Database        MemoryCache
//! ```
//!
//! All three are object safe; the engine holds them as `Arc<dyn ...>`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tienda_core::{
    CatalogEvent, CatalogSnapshot, CommitOutcome, CommitPlan, ExchangeRates, NamedRef, Product,
};
use tienda_db::{Database, ProductDraft};
use tokio::sync::{broadcast, RwLock};

use crate::error::EngineResult;

/// The catalog and ledger as the engine sees them.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Full snapshot of products, inventories, brands and rates.
    async fn load_snapshot(&self) -> EngineResult<CatalogSnapshot>;

    /// Live change feed.
    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent>;

    /// Current quantities for some products in one inventory; unknown
    /// products read as 0.
    async fn read_stock(
        &self,
        inventory_id: &str,
        product_ids: &[String],
    ) -> EngineResult<BTreeMap<String, i64>>;

    /// Applies a plan atomically, idempotent by op id.
    async fn commit(&self, plan: &CommitPlan) -> EngineResult<CommitOutcome>;
}

/// Durable key/value storage for session payloads and pending markers.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> EngineResult<()>;
    async fn remove(&self, key: &str) -> EngineResult<()>;
}

/// Catalog writes outside the sale/purchase/transfer ledger. Product writes
/// are idempotent by op id like [`CatalogStore::commit`].
#[async_trait]
pub trait CatalogAdmin: Send + Sync {
    async fn create_product(
        &self,
        op_id: &str,
        draft: ProductDraft,
        user_id: Option<&str>,
    ) -> EngineResult<(CommitOutcome, Product)>;

    async fn edit_product(
        &self,
        op_id: &str,
        id: &str,
        draft: ProductDraft,
        user_id: Option<&str>,
    ) -> EngineResult<CommitOutcome>;

    async fn delete_product(
        &self,
        op_id: &str,
        id: &str,
        user_id: Option<&str>,
    ) -> EngineResult<CommitOutcome>;

    async fn create_inventory(&self, name: &str) -> EngineResult<NamedRef>;
    async fn create_brand(&self, name: &str) -> EngineResult<NamedRef>;
    async fn set_exchange_rates(&self, rates: ExchangeRates) -> EngineResult<()>;
}

// =============================================================================
// SQLite
// =============================================================================

#[async_trait]
impl CatalogStore for Database {
    async fn load_snapshot(&self) -> EngineResult<CatalogSnapshot> {
        Ok(self.catalog().load_snapshot().await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        Database::subscribe(self)
    }

    async fn read_stock(
        &self,
        inventory_id: &str,
        product_ids: &[String],
    ) -> EngineResult<BTreeMap<String, i64>> {
        Ok(self.catalog().read_stock(inventory_id, product_ids).await?)
    }

    async fn commit(&self, plan: &CommitPlan) -> EngineResult<CommitOutcome> {
        Ok(self.ledger().commit(plan).await?)
    }
}

#[async_trait]
impl CatalogAdmin for Database {
    async fn create_product(
        &self,
        op_id: &str,
        draft: ProductDraft,
        user_id: Option<&str>,
    ) -> EngineResult<(CommitOutcome, Product)> {
        Ok(self.products().create(op_id, draft, user_id).await?)
    }

    async fn edit_product(
        &self,
        op_id: &str,
        id: &str,
        draft: ProductDraft,
        user_id: Option<&str>,
    ) -> EngineResult<CommitOutcome> {
        Ok(self.products().edit(op_id, id, draft, user_id).await?)
    }

    async fn delete_product(
        &self,
        op_id: &str,
        id: &str,
        user_id: Option<&str>,
    ) -> EngineResult<CommitOutcome> {
        Ok(self.products().delete(op_id, id, user_id).await?)
    }

    async fn create_inventory(&self, name: &str) -> EngineResult<NamedRef> {
        Ok(self.catalog().create_inventory(name).await?)
    }

    async fn create_brand(&self, name: &str) -> EngineResult<NamedRef> {
        Ok(self.catalog().create_brand(name).await?)
    }

    async fn set_exchange_rates(&self, rates: ExchangeRates) -> EngineResult<()> {
        Ok(self.catalog().set_exchange_rates(rates).await?)
    }
}

#[async_trait]
impl LocalCache for Database {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.cache().get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        Ok(self.cache().set(key, value).await?)
    }

    async fn remove(&self, key: &str) -> EngineResult<()> {
        self.cache().remove(key).await?;
        Ok(())
    }
}

// =============================================================================
// In-Memory Cache
// =============================================================================

/// Process-local cache, for tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> EngineResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tienda_db::DbConfig;

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty().await);
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        cache.remove("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_database_as_collaborators() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cache: &dyn LocalCache = &db;
        cache.set("cashier:state:anon", "{}").await.unwrap();
        assert!(cache.get("cashier:state:anon").await.unwrap().is_some());

        let store: &dyn CatalogStore = &db;
        let snapshot = store.load_snapshot().await.unwrap();
        assert!(!snapshot.has_inventories());
    }
}
