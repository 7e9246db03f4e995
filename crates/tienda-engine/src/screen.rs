//! # Screen
//!
//! One Cashier, Buys or Transfers screen: its tabs, its view of the
//! catalog, its toast slot and its retry cycle. A `Screen` is owned by a
//! single task; nothing in it is shared between screens.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  mount()                                                                │
//! │    phase 1 quick load ──► "Sesión restaurada"                           │
//! │    subscribe + snapshot                                                 │
//! │    phase 2 reconcile  ──► "Cantidades ajustadas al stock disponible"    │
//! │                                                                         │
//! │  cart edits ──► TabSet ──► session write (guarded)                      │
//! │  sync_catalog() ──► drains change events into the snapshot             │
//! │                                                                         │
//! │  confirm()                                                              │
//! │    prepare ──► first attempt ──┬── Ok ──► post-commit ──► Committed     │
//! │                                └── transient ──► retry cycle ──►        │
//! │                                    Retrying; settle() picks it up       │
//! │                                                                         │
//! │  drop ──► retry cycle abandoned                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tienda_core::reconcile::describe_adjustments;
use tienda_core::reservation::reservation_hint;
use tienda_core::{
    AddOutcome, CartTotals, CatalogEvent, CatalogSnapshot, CommitOutcome, CoreError, CustomerForm,
    ScreenKind, StockAdjustment, TabSet,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::committer::{ConfirmOptions, PreparedCommit, TransactionCommitter};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::idempotency::IdempotencyGuard;
use crate::notify::Notifier;
use crate::retry::{RetryCycle, RetryManager, RetryStatus};
use crate::session::SessionManager;
use crate::store::{CatalogStore, LocalCache};

/// How a confirm ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmResult {
    /// The ledger holds the operation.
    Committed {
        outcome: CommitOutcome,
        business_id: String,
        adjustments: Vec<StockAdjustment>,
    },
    /// The first attempt failed; a retry cycle owns the operation now.
    Retrying { op_id: String },
}

struct PendingCommit {
    prepared: PreparedCommit,
    cycle: RetryCycle<CommitOutcome>,
}

pub struct Screen {
    kind: ScreenKind,
    store: Arc<dyn CatalogStore>,
    session: SessionManager,
    committer: TransactionCommitter,
    retry: RetryManager,
    notifier: Notifier,
    snapshot: CatalogSnapshot,
    events: Option<broadcast::Receiver<CatalogEvent>>,
    tabs: TabSet,
    active_inventory_id: Option<String>,
    pending: Option<PendingCommit>,
}

impl Screen {
    pub fn new(
        kind: ScreenKind,
        store: Arc<dyn CatalogStore>,
        cache: Arc<dyn LocalCache>,
        config: &EngineConfig,
    ) -> Self {
        let user_id = config.user_id().map(str::to_string);
        let notifier = Notifier::new(config.toast_duration());
        let guard = IdempotencyGuard::new(Arc::clone(&cache), user_id.clone());

        Screen {
            kind,
            session: SessionManager::new(kind, cache, user_id.clone()),
            committer: TransactionCommitter::new(
                Arc::clone(&store),
                guard,
                user_id,
                config.commit.preflight_remote_check,
            ),
            retry: RetryManager::new(notifier.clone(), config.retry_countdown()),
            notifier,
            store,
            snapshot: CatalogSnapshot::new(),
            events: None,
            tabs: TabSet::new(kind),
            active_inventory_id: None,
            pending: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn kind(&self) -> ScreenKind {
        self.kind
    }

    pub fn tabs(&self) -> &TabSet {
        &self.tabs
    }

    pub fn snapshot(&self) -> &CatalogSnapshot {
        &self.snapshot
    }

    pub fn active_inventory_id(&self) -> Option<&str> {
        self.active_inventory_id.as_deref()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn retry_status(&self) -> RetryStatus {
        self.retry.status()
    }

    pub fn subscribe_retry(&self) -> watch::Receiver<RetryStatus> {
        self.retry.subscribe()
    }

    pub fn has_pending_commit(&self) -> bool {
        self.pending.is_some()
    }

    /// Totals of the active tab at current rates.
    pub fn totals(&self) -> CartTotals {
        self.tabs.totals(self.snapshot.rates())
    }

    /// Stock of a product in the active inventory.
    pub fn stock_of(&self, product_id: &str) -> i64 {
        self.active_inventory_id
            .as_deref()
            .map_or(0, |inv| self.snapshot.stock_of(inv, product_id))
    }

    // =========================================================================
    // Mount & Catalog
    // =========================================================================

    /// Restores the session, loads the catalog and fits the tabs into it.
    pub async fn mount(&mut self) -> EngineResult<()> {
        let loaded = self.session.quick_load().await;
        self.tabs = loaded.tabs;
        self.active_inventory_id = loaded.active_inventory_id;
        if loaded.restored_items > 0 {
            self.notifier.info("Sesión restaurada");
        }

        // Subscribe first so nothing committed during the load is missed.
        self.events = Some(self.store.subscribe());
        self.snapshot = self.store.load_snapshot().await?;
        if self.snapshot.rates().is_valid() {
            self.tabs.refresh_amounts(self.snapshot.rates());
        }
        info!(screen = %self.kind, "Screen mounted");

        self.reconcile_session().await;
        Ok(())
    }

    async fn reconcile_session(&mut self) {
        let report = self
            .session
            .reconcile(
                &mut self.tabs,
                &self.snapshot,
                self.active_inventory_id.as_deref(),
            )
            .await;
        let Some(report) = report else {
            return;
        };

        self.active_inventory_id = report.active_inventory_id;
        if self.snapshot.rates().is_valid() {
            self.tabs.refresh_amounts(self.snapshot.rates());
        }
        if let Some(message) = describe_adjustments(&report.adjustments) {
            self.notifier.info(message);
        }
        self.persist().await;
    }

    /// Applies every queued catalog event. Returns how many were applied.
    pub async fn sync_catalog(&mut self) -> EngineResult<usize> {
        let Some(events) = self.events.as_mut() else {
            return Ok(0);
        };

        let mut applied = 0;
        let mut rates_changed = false;
        let mut reload = false;
        loop {
            match events.try_recv() {
                Ok(event) => {
                    rates_changed |= matches!(event, CatalogEvent::SettingsChanged(_));
                    self.snapshot.apply(event);
                    applied += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(screen = %self.kind, skipped, "Catalog feed lagged, reloading snapshot");
                    reload = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if reload {
            self.snapshot = self.store.load_snapshot().await?;
            rates_changed = true;
        }
        if rates_changed {
            debug!(screen = %self.kind, "Rates changed, refreshing amounts");
            self.tabs.refresh_amounts(self.snapshot.rates());
            self.persist().await;
        }
        if applied > 0 || reload {
            self.reconcile_session().await;
        }
        Ok(applied)
    }

    // =========================================================================
    // Cart Edits
    // =========================================================================

    async fn persist(&self) {
        self.session
            .persist(&self.tabs, self.active_inventory_id.as_deref())
            .await;
    }

    fn report<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e) = &result {
            self.notifier.error(e.user_message());
        }
        result
    }

    pub async fn select_tab(&mut self, tab_id: &str) -> EngineResult<()> {
        let result = self.tabs.select_tab(tab_id).map_err(EngineError::from);
        self.report(result)?;
        self.persist().await;
        Ok(())
    }

    pub async fn select_inventory(&mut self, inventory_id: &str) -> EngineResult<()> {
        if self.snapshot.inventory(inventory_id).is_none() {
            return self.report(Err(CoreError::InventoryNotFound(inventory_id.to_string()).into()));
        }
        self.active_inventory_id = Some(inventory_id.to_string());
        self.persist().await;
        Ok(())
    }

    /// Adds from the product search, capped by what other tabs hold.
    pub async fn add_product(&mut self, product_id: &str, quantity: i64) -> EngineResult<AddOutcome> {
        let Some(product) = self.snapshot.product(product_id).cloned() else {
            return self.report(Err(CoreError::ProductNotFound(product_id.to_string()).into()));
        };
        let stock = self.stock_of(product_id);
        let outcome = self
            .tabs
            .add_line_capped(&product, quantity, self.snapshot.rates(), stock);

        match &outcome {
            AddOutcome::Rejected { message } => self.notifier.error(message.clone()),
            AddOutcome::Clamped { message, .. } => self.notifier.info(message.clone()),
            AddOutcome::Added { .. } => {}
        }
        if outcome.added() > 0 {
            self.persist().await;
        }
        Ok(outcome)
    }

    /// Typed quantity. Fractions are truncated; zero removes the line.
    pub async fn set_quantity(&mut self, product_id: &str, quantity: f64) -> EngineResult<()> {
        let result = self.tabs.set_quantity(product_id, quantity).map_err(EngineError::from);
        self.report(result)?;
        self.persist().await;
        Ok(())
    }

    /// One more unit if stock allows. Returns whether the line grew.
    pub async fn increment(&mut self, product_id: &str) -> EngineResult<bool> {
        let stock = self.stock_of(product_id);
        let result = self.tabs.increment(product_id, stock).map_err(EngineError::from);
        let grew = self.report(result)?;
        if grew {
            self.persist().await;
        } else if let Some(hint) =
            reservation_hint(self.tabs.tabs(), product_id, self.tabs.active_tab_id())
        {
            self.notifier.info(hint);
        }
        Ok(grew)
    }

    pub async fn remove_line(&mut self, product_id: &str) -> EngineResult<()> {
        let result = self.tabs.remove_line(product_id).map_err(EngineError::from);
        self.report(result)?;
        self.persist().await;
        Ok(())
    }

    /// Price (Cashier) or cost (Buys, Transfers) typed by the user.
    pub async fn override_principal(&mut self, product_id: &str, raw: &str) -> EngineResult<()> {
        let rates = self.snapshot.rates();
        let result = self
            .tabs
            .override_principal(product_id, raw, rates)
            .map_err(EngineError::from);
        self.report(result)?;
        self.persist().await;
        Ok(())
    }

    pub async fn override_adjusted_usd(&mut self, product_id: &str, raw: &str) -> EngineResult<()> {
        let rates = self.snapshot.rates();
        let result = self
            .tabs
            .override_adjusted_usd(product_id, raw, rates)
            .map_err(EngineError::from);
        self.report(result)?;
        self.persist().await;
        Ok(())
    }

    pub async fn reset_to_base(&mut self, product_id: &str) -> EngineResult<()> {
        let rates = self.snapshot.rates();
        let result = self
            .tabs
            .reset_to_base(product_id, rates)
            .map_err(EngineError::from);
        self.report(result)?;
        self.persist().await;
        Ok(())
    }

    pub async fn set_customer(&mut self, customer: Option<CustomerForm>) {
        self.tabs.set_customer(customer);
        self.persist().await;
    }

    pub async fn set_payment_method(&mut self, method: Option<String>) {
        self.tabs.set_payment_method(method);
        self.persist().await;
    }

    // =========================================================================
    // Confirm
    // =========================================================================

    /// Commits the active tab.
    ///
    /// ## Errors
    /// Validation, stock and drift errors come back directly (also shown as
    /// a toast). A transient store failure is not an error: the operation
    /// moves to the retry cycle and `Retrying` is returned.
    pub async fn confirm(&mut self, options: ConfirmOptions) -> EngineResult<ConfirmResult> {
        if self.pending.is_some() || self.retry.is_busy() {
            return self.report(Err(EngineError::RetryBusy));
        }

        let prepared = self
            .committer
            .prepare(
                &self.tabs,
                &self.snapshot,
                self.active_inventory_id.as_deref(),
                &options,
            )
            .await;
        let prepared = self.report(prepared)?;

        let op = self.committer.operation(&prepared);
        match op.attempt().await {
            Ok(outcome) => Ok(self.finish(prepared, outcome).await),
            Err(e) if e.is_transient() => {
                warn!(op_id = %prepared.op_id(), error = %e, "Commit failed, starting retry cycle");
                let cycle = self.retry.start(op.with_last_error(e.user_message()))?;
                let op_id = cycle.op_id().to_string();
                self.pending = Some(PendingCommit { prepared, cycle });
                Ok(ConfirmResult::Retrying { op_id })
            }
            Err(e) => self.report(Err(e)),
        }
    }

    async fn finish(&mut self, prepared: PreparedCommit, outcome: CommitOutcome) -> ConfirmResult {
        let adjustments = self.committer.post_commit(&mut self.tabs, &prepared).await;
        let mut message = prepared.success_message();
        if let Some(adjusted) = describe_adjustments(&adjustments) {
            message = format!("{}\n{}", message, adjusted);
        }
        self.notifier.success(message);
        self.persist().await;

        info!(
            screen = %self.kind,
            op_id = %prepared.op_id(),
            business_id = %prepared.business_id(),
            ?outcome,
            "Transaction committed"
        );
        ConfirmResult::Committed {
            outcome,
            business_id: prepared.business_id().to_string(),
            adjustments,
        }
    }

    /// Collects a finished retry cycle without waiting.
    pub async fn settle(&mut self) -> Option<EngineResult<ConfirmResult>> {
        if !self.pending.as_ref()?.cycle.is_finished() {
            return None;
        }
        self.wait_pending().await
    }

    /// Waits for the retry cycle, if any, and applies its result.
    pub async fn wait_pending(&mut self) -> Option<EngineResult<ConfirmResult>> {
        let PendingCommit { prepared, cycle } = self.pending.take()?;
        Some(match cycle.join().await {
            Ok(outcome) => Ok(self.finish(prepared, outcome).await),
            Err(e) => {
                debug!(op_id = %prepared.op_id(), error = %e, "Retry cycle ended without commit");
                Err(e)
            }
        })
    }

    /// Skips the retry countdown.
    pub fn retry_now(&self) -> bool {
        self.retry.retry_now()
    }

    /// Gives up on the pending operation.
    pub fn abandon(&self) -> bool {
        self.retry.abandon()
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if self.pending.is_some() {
            debug!(screen = %self.kind, "Screen dropped with a pending commit, abandoning");
            self.retry.abandon();
        }
    }
}

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen")
            .field("kind", &self.kind)
            .field("active_tab", &self.tabs.active_tab_id())
            .field("active_inventory_id", &self.active_inventory_id)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCache;
    use tienda_core::{Product, Severity};
    use tienda_db::{Database, DbConfig, ProductDraft};

    async fn seeded() -> (Arc<Database>, Product, String) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        db.catalog()
            .set_exchange_rates(tienda_core::ExchangeRates::new(36.0, 40.0))
            .await
            .unwrap();
        let inventory = db.catalog().create_inventory("Tienda").await.unwrap();
        let draft = ProductDraft {
            name: "Harina".into(),
            brand_id: None,
            cost: 0.8,
            price: 1.0,
            image_url: None,
        };
        let (_, product) = db
            .products()
            .create("product_create_new_1_aaaa0001", draft, None)
            .await
            .unwrap();
        (db, product, inventory.id)
    }

    fn screen(db: &Arc<Database>, kind: ScreenKind) -> Screen {
        let store: Arc<dyn CatalogStore> = db.clone();
        Screen::new(kind, store, Arc::new(MemoryCache::new()), &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_mount_selects_first_inventory() {
        let (db, _, inventory_id) = seeded().await;
        let mut screen = screen(&db, ScreenKind::Cashier);
        screen.mount().await.unwrap();
        assert_eq!(screen.active_inventory_id(), Some(inventory_id.as_str()));
        assert!(screen.notifier().current().is_none());
    }

    #[tokio::test]
    async fn test_add_without_stock_is_rejected() {
        let (db, product, _) = seeded().await;
        let mut screen = screen(&db, ScreenKind::Cashier);
        screen.mount().await.unwrap();

        let outcome = screen.add_product(&product.id, 1).await.unwrap();
        assert!(matches!(outcome, AddOutcome::Rejected { .. }));
        assert_eq!(screen.notifier().current().unwrap().severity, Severity::Error);
        assert_eq!(screen.tabs().item_count(), 0);
    }

    #[tokio::test]
    async fn test_purchase_then_sale_through_screens() {
        let (db, product, inventory_id) = seeded().await;

        let mut buys = screen(&db, ScreenKind::Buys);
        buys.mount().await.unwrap();
        buys.add_product(&product.id, 5).await.unwrap();
        let result = buys.confirm(ConfirmOptions::default()).await.unwrap();
        assert!(matches!(
            result,
            ConfirmResult::Committed { outcome: CommitOutcome::Applied, .. }
        ));
        assert_eq!(buys.tabs().item_count(), 0);

        let mut cashier = screen(&db, ScreenKind::Cashier);
        cashier.mount().await.unwrap();
        assert_eq!(cashier.stock_of(&product.id), 5);

        cashier.add_product(&product.id, 2).await.unwrap();
        cashier.set_payment_method(Some("efectivo".into())).await;
        let result = cashier
            .confirm(ConfirmOptions::default().without_customer())
            .await
            .unwrap();
        match result {
            ConfirmResult::Committed { business_id, .. } => assert!(business_id.starts_with("VTA-")),
            other => panic!("unexpected result {:?}", other),
        }

        let stock = db
            .catalog()
            .read_stock(&inventory_id, &[product.id.clone()])
            .await
            .unwrap();
        assert_eq!(stock.get(&product.id), Some(&3));
    }

    #[tokio::test]
    async fn test_catalog_events_update_snapshot() {
        let (db, product, inventory_id) = seeded().await;
        let mut screen = screen(&db, ScreenKind::Cashier);
        screen.mount().await.unwrap();
        assert_eq!(screen.stock_of(&product.id), 0);

        db.catalog()
            .set_exchange_rates(tienda_core::ExchangeRates::new(40.0, 44.0))
            .await
            .unwrap();
        let applied = screen.sync_catalog().await.unwrap();
        assert!(applied >= 1);
        assert_eq!(screen.snapshot().rates().bcv, 40.0);
        assert!(screen.snapshot().inventory(&inventory_id).is_some());
    }

    #[tokio::test]
    async fn test_unknown_inventory_rejected() {
        let (db, _, _) = seeded().await;
        let mut screen = screen(&db, ScreenKind::Transfers);
        screen.mount().await.unwrap();
        let err = screen.select_inventory("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InventoryNotFound(_))));
    }
}
