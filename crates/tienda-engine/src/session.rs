//! # Session Manager
//!
//! Restores a screen's tabs from the local cache in two phases and writes
//! them back on every change.
//!
//! ## Mount Sequence
//! ```text
//!   mount
//!     │
//!     ├─ Phase 1: quick_load()
//!     │    user key ──miss──► anon key ──miss──► empty tabs
//!     │    normalized, deduped, sanitized; applied before the catalog
//!     │
//!     ├─ catalog snapshot arrives
//!     │
//!     └─ Phase 2: reconcile() (once, needs at least one inventory)
//!          untouched since phase 1 ──► payload re-read and restored
//!          active inventory: cached if it still exists, else first
//!          stock-bounded screens ──► every tab fitted into stock
//! ```
//!
//! ## Write Guard
//! ```text
//!   phase 1 not done and no interaction         ──► skip
//!   empty tabs, no interaction, stored has items ──► skip
//!   otherwise                                    ──► write both keys
//! ```

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tienda_core::session::{persist_decision, resolve_active_inventory, session_keys, PersistDecision};
use tienda_core::{CatalogSnapshot, ScreenKind, SessionCachePayload, StockAdjustment, TabSet};
use tracing::{debug, info, warn};

use crate::store::LocalCache;

/// Result of phase 1.
#[derive(Debug, Clone)]
pub struct QuickLoad {
    pub tabs: TabSet,
    pub active_inventory_id: Option<String>,
    /// Units restored across every tab; zero when nothing was cached.
    pub restored_items: i64,
}

/// Result of phase 2.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub active_inventory_id: Option<String>,
    pub adjustments: Vec<StockAdjustment>,
}

pub struct SessionManager {
    screen: ScreenKind,
    user_id: Option<String>,
    cache: Arc<dyn LocalCache>,
    quick_load_done: bool,
    reconciled: bool,
}

impl SessionManager {
    pub fn new(screen: ScreenKind, cache: Arc<dyn LocalCache>, user_id: Option<String>) -> Self {
        SessionManager {
            screen,
            user_id,
            cache,
            quick_load_done: false,
            reconciled: false,
        }
    }

    pub fn screen(&self) -> ScreenKind {
        self.screen
    }

    pub fn quick_load_done(&self) -> bool {
        self.quick_load_done
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    /// Cache keys, user first.
    pub fn keys(&self) -> Vec<String> {
        session_keys(self.screen, self.user_id.as_deref())
    }

    /// First payload that parses, user key first.
    async fn read_payload(&self) -> Option<SessionCachePayload> {
        for key in self.keys() {
            match self.cache.get(&key).await {
                Ok(Some(json)) => match SessionCachePayload::from_json(&json) {
                    Ok(payload) => {
                        debug!(key = %key, items = payload.item_count(), "Session payload found");
                        return Some(payload);
                    }
                    Err(e) => warn!(key = %key, error = %e, "Ignoring unreadable session payload"),
                },
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to read session payload"),
            }
        }
        None
    }

    async fn stored_item_count(&self, key: &str) -> Option<i64> {
        let json = self.cache.get(key).await.ok()??;
        SessionCachePayload::from_json(&json)
            .ok()
            .map(|payload| payload.item_count())
    }

    // =========================================================================
    // Phase 1
    // =========================================================================

    /// Restores cached tabs without waiting for the catalog.
    pub async fn quick_load(&mut self) -> QuickLoad {
        let payload = self.read_payload().await;
        self.quick_load_done = true;

        let Some(payload) = payload else {
            debug!(screen = %self.screen, "No cached session");
            return QuickLoad {
                tabs: TabSet::new(self.screen),
                active_inventory_id: None,
                restored_items: 0,
            };
        };

        let tabs = payload.restore(self.screen);
        let restored_items = tabs.item_count();
        info!(screen = %self.screen, items = restored_items, "Session restored");
        QuickLoad {
            tabs,
            active_inventory_id: payload.active_inventory_id,
            restored_items,
        }
    }

    // =========================================================================
    // Phase 2
    // =========================================================================

    /// Fits the tabs into the snapshot's stock. Runs once, and only once the
    /// snapshot lists an inventory; returns `None` otherwise.
    pub async fn reconcile(
        &mut self,
        tabs: &mut TabSet,
        snapshot: &CatalogSnapshot,
        current_inventory: Option<&str>,
    ) -> Option<ReconcileReport> {
        if self.reconciled || !snapshot.has_inventories() {
            return None;
        }
        self.reconciled = true;

        let mut cached_inventory = current_inventory.map(str::to_string);
        if !tabs.user_interacted() {
            if let Some(payload) = self.read_payload().await {
                *tabs = payload.restore(self.screen);
                cached_inventory = payload.active_inventory_id.or(cached_inventory);
            }
        }

        let active_inventory_id = resolve_active_inventory(
            cached_inventory.as_deref(),
            snapshot.inventories().map(|inv| inv.id.as_str()),
        );

        let adjustments = match (&active_inventory_id, self.screen.is_stock_bounded()) {
            (Some(inventory_id), true) => {
                tabs.reconcile(|pid| snapshot.stock_of(inventory_id, pid), None)
            }
            _ => Vec::new(),
        };

        if !adjustments.is_empty() {
            info!(
                screen = %self.screen,
                adjusted = adjustments.len(),
                "Cached quantities fitted to stock"
            );
        }

        Some(ReconcileReport {
            active_inventory_id,
            adjustments,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes the tabs under every key unless the guard says otherwise.
    pub async fn persist(&self, tabs: &TabSet, active_inventory_id: Option<&str>) -> PersistDecision {
        let keys = self.keys();
        let in_memory = tabs.item_count();
        let interacted = tabs.user_interacted();

        let mut stored = Vec::new();
        if self.quick_load_done && in_memory == 0 && !interacted {
            for key in &keys {
                stored.push(self.stored_item_count(key).await);
            }
        }

        let decision = persist_decision(self.quick_load_done, interacted, in_memory, stored);
        if !decision.should_write() {
            debug!(screen = %self.screen, ?decision, "Skipping session write");
            return decision;
        }

        let payload = SessionCachePayload::capture(tabs, active_inventory_id, Utc::now());
        let json = match payload.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(screen = %self.screen, error = %e, "Failed to encode session payload");
                return decision;
            }
        };

        let writes = keys.iter().map(|key| {
            let json = json.as_str();
            async move { (key, self.cache.set(key, json).await) }
        });
        for (key, result) in join_all(writes).await {
            if let Err(e) = result {
                warn!(key = %key, error = %e, "Failed to write session payload");
            }
        }
        decision
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("screen", &self.screen)
            .field("user_id", &self.user_id)
            .field("quick_load_done", &self.quick_load_done)
            .field("reconciled", &self.reconciled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCache;
    use tienda_core::{ExchangeRates, Inventory, Product};

    fn rates() -> ExchangeRates {
        ExchangeRates::new(36.0, 40.0)
    }

    fn product(id: &str) -> Product {
        Product {
            id: id.into(),
            name: id.into(),
            brand_id: None,
            cost: 1.0,
            price: 2.0,
            image_url: None,
        }
    }

    fn snapshot(stock: i64) -> CatalogSnapshot {
        CatalogSnapshot::from_parts(
            vec![product("P")],
            vec![Inventory::new("A", "Tienda").with_stock("P", stock)],
            vec![],
            rates(),
        )
    }

    fn manager(cache: Arc<MemoryCache>, user: Option<&str>) -> SessionManager {
        SessionManager::new(ScreenKind::Cashier, cache, user.map(str::to_string))
    }

    async fn store(cache: &MemoryCache, key: &str, set: &TabSet, inventory: Option<&str>) {
        let json = SessionCachePayload::capture(set, inventory, Utc::now())
            .to_json()
            .unwrap();
        cache.set(key, &json).await.unwrap();
    }

    #[tokio::test]
    async fn test_quick_load_falls_back_to_anon() {
        let cache = Arc::new(MemoryCache::new());
        let mut set = TabSet::new(ScreenKind::Cashier);
        set.add_line(&product("P"), 2, rates());
        store(&cache, "cashier:state:anon", &set, Some("A")).await;

        let mut session = manager(cache, Some("u1"));
        let loaded = session.quick_load().await;
        assert!(session.quick_load_done());
        assert_eq!(loaded.restored_items, 2);
        assert_eq!(loaded.active_inventory_id.as_deref(), Some("A"));
        assert!(!loaded.tabs.user_interacted());
    }

    #[tokio::test]
    async fn test_quick_load_empty_cache() {
        let mut session = manager(Arc::new(MemoryCache::new()), None);
        let loaded = session.quick_load().await;
        assert_eq!(loaded.restored_items, 0);
        assert_eq!(loaded.tabs.tabs().len(), 9);
    }

    #[tokio::test]
    async fn test_reconcile_waits_for_inventories() {
        let mut session = manager(Arc::new(MemoryCache::new()), None);
        let mut tabs = session.quick_load().await.tabs;
        assert!(session
            .reconcile(&mut tabs, &CatalogSnapshot::new(), None)
            .await
            .is_none());
        assert!(!session.is_reconciled());

        let report = session.reconcile(&mut tabs, &snapshot(3), None).await.unwrap();
        assert_eq!(report.active_inventory_id.as_deref(), Some("A"));
        assert!(session.reconcile(&mut tabs, &snapshot(3), None).await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_unknown_inventory_falls_back() {
        let cache = Arc::new(MemoryCache::new());
        let mut set = TabSet::new(ScreenKind::Cashier);
        set.add_line(&product("P"), 1, rates());
        store(&cache, "cashier:state:anon", &set, Some("gone")).await;

        let mut session = manager(cache, None);
        let mut tabs = session.quick_load().await.tabs;
        let report = session.reconcile(&mut tabs, &snapshot(5), None).await.unwrap();
        assert_eq!(report.active_inventory_id.as_deref(), Some("A"));
        assert!(report.adjustments.is_empty());
    }

    #[tokio::test]
    async fn test_persist_skips_before_restore() {
        let cache = Arc::new(MemoryCache::new());
        let session = manager(cache.clone(), None);
        let tabs = TabSet::new(ScreenKind::Cashier);
        let decision = session.persist(&tabs, None).await;
        assert_eq!(decision, PersistDecision::SkipBeforeRestore);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_persist_writes_both_keys() {
        let cache = Arc::new(MemoryCache::new());
        let mut session = manager(cache.clone(), Some("u1"));
        let mut tabs = session.quick_load().await.tabs;
        tabs.add_line(&product("P"), 1, rates());

        let decision = session.persist(&tabs, Some("A")).await;
        assert_eq!(decision, PersistDecision::Write);
        for key in ["cashier:state:u1", "cashier:state:anon"] {
            let json = cache.get(key).await.unwrap().unwrap();
            assert_eq!(SessionCachePayload::from_json(&json).unwrap().item_count(), 1);
        }
    }
}
