//! End-to-end flows over an in-memory SQLite database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tienda_core::commit::{plan_purchase, PlanContext};
use tienda_core::session::PersistDecision;
use tienda_core::{
    CatalogEvent, CatalogSnapshot, CommitOutcome, CommitPlan, ExchangeRates, LineItem,
    OperationKind, Product, ScreenKind, SessionCachePayload, Tab, TabSet,
};
use tienda_db::{Database, DbConfig, HistoryFilter, ProductDraft};
use tienda_engine::{
    CatalogStore, ConfirmOptions, ConfirmResult, EngineConfig, EngineError, EngineResult,
    IdempotencyGuard, LocalCache, MemoryCache, RetryStatus, Screen, SessionManager,
    TransactionCommitter,
};
use tokio::sync::broadcast;

// =============================================================================
// Fixtures
// =============================================================================

fn rates() -> ExchangeRates {
    ExchangeRates::new(36.0, 40.0)
}

async fn database() -> Arc<Database> {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.catalog().set_exchange_rates(rates()).await.unwrap();
    Arc::new(db)
}

async fn product(db: &Database, name: &str, price: f64) -> Product {
    let draft = ProductDraft {
        name: name.into(),
        brand_id: None,
        cost: price * 0.8,
        price,
        image_url: None,
    };
    let op_id = format!("product_create_{}_0_{:0>8}", name, name.len());
    db.products().create(&op_id, draft, None).await.unwrap().1
}

/// Loads opening stock through a purchase, like the seed binary does.
async fn restock(db: &Database, inventory_id: &str, product: &Product, quantity: i64) {
    let mut tab = Tab::new("1");
    tab.cart
        .push(LineItem::from_product(product, ScreenKind::Buys, quantity, rates()));
    let op_id = format!("purchase_setup_{}_{}", Utc::now().timestamp_millis(), product.id);
    let ctx = PlanContext {
        op_id: &op_id,
        rates: rates(),
        user_id: None,
        now: Utc::now(),
    };
    let plan = plan_purchase(ctx, &tab, Some(inventory_id)).unwrap();
    db.ledger().commit(&plan).await.unwrap();
}

async fn stock(db: &Database, inventory_id: &str, product: &Product) -> i64 {
    let stock = db
        .catalog()
        .read_stock(inventory_id, &[product.id.clone()])
        .await
        .unwrap();
    stock.get(&product.id).copied().unwrap_or(0)
}

async fn sales(db: &Database) -> usize {
    db.ledger()
        .list(&HistoryFilter::default().kind(OperationKind::Sale))
        .await
        .unwrap()
        .len()
}

fn config(countdown_secs: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.countdown_secs = countdown_secs;
    config
}

/// Fails the first `failures` commits. With `lose_ack` the failing commits
/// still reach the database; only the answer is lost.
struct FlakyStore {
    db: Arc<Database>,
    failures: AtomicU32,
    commits: AtomicU32,
    lose_ack: bool,
}

impl FlakyStore {
    fn new(db: Arc<Database>, failures: u32, lose_ack: bool) -> Self {
        FlakyStore {
            db,
            failures: AtomicU32::new(failures),
            commits: AtomicU32::new(0),
            lose_ack,
        }
    }
}

#[async_trait]
impl CatalogStore for FlakyStore {
    async fn load_snapshot(&self) -> EngineResult<CatalogSnapshot> {
        CatalogStore::load_snapshot(&*self.db).await
    }

    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.db.subscribe()
    }

    async fn read_stock(
        &self,
        inventory_id: &str,
        product_ids: &[String],
    ) -> EngineResult<BTreeMap<String, i64>> {
        CatalogStore::read_stock(&*self.db, inventory_id, product_ids).await
    }

    async fn commit(&self, plan: &CommitPlan) -> EngineResult<CommitOutcome> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            if self.lose_ack {
                CatalogStore::commit(&*self.db, plan).await?;
            }
            return Err(EngineError::Unavailable("conexión perdida".into()));
        }
        CatalogStore::commit(&*self.db, plan).await
    }
}

/// Counts every remote call.
struct CountingStore {
    db: Arc<Database>,
    calls: AtomicU32,
}

#[async_trait]
impl CatalogStore for CountingStore {
    async fn load_snapshot(&self) -> EngineResult<CatalogSnapshot> {
        CatalogStore::load_snapshot(&*self.db).await
    }

    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.db.subscribe()
    }

    async fn read_stock(
        &self,
        inventory_id: &str,
        product_ids: &[String],
    ) -> EngineResult<BTreeMap<String, i64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        CatalogStore::read_stock(&*self.db, inventory_id, product_ids).await
    }

    async fn commit(&self, plan: &CommitPlan) -> EngineResult<CommitOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        CatalogStore::commit(&*self.db, plan).await
    }
}

// =============================================================================
// Flows
// =============================================================================

#[tokio::test]
async fn test_oversell_is_rejected_before_any_remote_call() {
    let db = database().await;
    let inventory = db.catalog().create_inventory("Tienda").await.unwrap();
    let p1 = product(&db, "P1", 5.0).await;
    restock(&db, &inventory.id, &p1, 1).await;

    let store = Arc::new(CountingStore {
        db: db.clone(),
        calls: AtomicU32::new(0),
    });
    let cache = Arc::new(MemoryCache::new());
    let committer = TransactionCommitter::new(
        store.clone(),
        IdempotencyGuard::new(cache, None),
        None,
        true,
    );

    let snapshot = CatalogStore::load_snapshot(&*db).await.unwrap();
    let mut tabs = TabSet::new(ScreenKind::Cashier);
    tabs.add_line(&p1, 2, rates());
    tabs.set_payment_method(Some("efectivo".into()));

    let err = committer
        .prepare(
            &tabs,
            &snapshot,
            Some(&inventory.id),
            &ConfirmOptions::default().without_customer(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.user_message(), "Stock insuficiente para \"P1\". Solo quedan 1.");
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    assert_eq!(sales(&db).await, 0);
    assert_eq!(stock(&db, &inventory.id, &p1).await, 1);
}

#[tokio::test]
async fn test_two_failures_then_success_commits_once() {
    let db = database().await;
    let inventory = db.catalog().create_inventory("Tienda").await.unwrap();
    let harina = product(&db, "Harina", 2.0).await;
    restock(&db, &inventory.id, &harina, 5).await;

    let flaky = Arc::new(FlakyStore::new(db.clone(), 2, false));
    let mut screen = Screen::new(
        ScreenKind::Cashier,
        flaky.clone(),
        Arc::new(MemoryCache::new()),
        &config(1),
    );
    screen.mount().await.unwrap();
    screen.add_product(&harina.id, 2).await.unwrap();
    screen.set_payment_method(Some("efectivo".into())).await;

    // First attempt fails inline.
    let result = screen
        .confirm(ConfirmOptions::default().without_customer())
        .await
        .unwrap();
    assert!(matches!(result, ConfirmResult::Retrying { .. }));
    assert!(screen.has_pending_commit());

    // Manual retry fails as well.
    let mut status = screen.subscribe_retry();
    status.wait_for(RetryStatus::is_waiting).await.unwrap();
    assert!(screen.retry_now());

    // The countdown then retries on its own and succeeds.
    let settled = screen.wait_pending().await.unwrap().unwrap();
    match settled {
        ConfirmResult::Committed { outcome, .. } => assert_eq!(outcome, CommitOutcome::Applied),
        other => panic!("unexpected result {:?}", other),
    }

    assert_eq!(flaky.commits.load(Ordering::SeqCst), 3);
    assert_eq!(sales(&db).await, 1);
    assert_eq!(stock(&db, &inventory.id, &harina).await, 3);
    assert_eq!(screen.tabs().active().cart.len(), 0);
    assert_eq!(screen.retry_status(), RetryStatus::Idle);
}

#[tokio::test]
async fn test_lost_acknowledgement_is_already_applied() {
    let db = database().await;
    let inventory = db.catalog().create_inventory("Tienda").await.unwrap();
    let harina = product(&db, "Harina", 2.0).await;
    restock(&db, &inventory.id, &harina, 5).await;

    let flaky = Arc::new(FlakyStore::new(db.clone(), 1, true));
    let cache = Arc::new(MemoryCache::new());
    let mut screen = Screen::new(ScreenKind::Cashier, flaky.clone(), cache.clone(), &config(1));
    screen.mount().await.unwrap();
    screen.add_product(&harina.id, 2).await.unwrap();
    screen.set_payment_method(Some("efectivo".into())).await;

    let result = screen
        .confirm(ConfirmOptions::default().without_customer())
        .await
        .unwrap();
    assert!(matches!(result, ConfirmResult::Retrying { .. }));
    assert!(cache.get("sale:pending:cashier-1:anon").await.unwrap().is_some());

    let settled = screen.wait_pending().await.unwrap().unwrap();
    match settled {
        ConfirmResult::Committed { outcome, .. } => {
            assert_eq!(outcome, CommitOutcome::AlreadyApplied)
        }
        other => panic!("unexpected result {:?}", other),
    }

    assert_eq!(flaky.commits.load(Ordering::SeqCst), 2);
    assert_eq!(sales(&db).await, 1);
    assert_eq!(stock(&db, &inventory.id, &harina).await, 3);
    assert!(cache.get("sale:pending:cashier-1:anon").await.unwrap().is_none());
}

#[tokio::test]
async fn test_retried_commit_clears_its_own_tab() {
    let db = database().await;
    let inventory = db.catalog().create_inventory("Tienda").await.unwrap();
    let harina = product(&db, "Harina", 2.0).await;
    restock(&db, &inventory.id, &harina, 10).await;

    let flaky = Arc::new(FlakyStore::new(db.clone(), 1, false));
    let mut screen = Screen::new(
        ScreenKind::Cashier,
        flaky.clone(),
        Arc::new(MemoryCache::new()),
        &config(1),
    );
    screen.mount().await.unwrap();
    screen.add_product(&harina.id, 2).await.unwrap();
    screen.set_payment_method(Some("efectivo".into())).await;

    let result = screen
        .confirm(ConfirmOptions::default().without_customer())
        .await
        .unwrap();
    assert!(matches!(result, ConfirmResult::Retrying { .. }));

    // The cashier moves on to the next customer while the sale retries.
    screen.select_tab("2").await.unwrap();
    screen.add_product(&harina.id, 3).await.unwrap();

    let settled = screen.wait_pending().await.unwrap().unwrap();
    match settled {
        ConfirmResult::Committed { outcome, .. } => assert_eq!(outcome, CommitOutcome::Applied),
        other => panic!("unexpected result {:?}", other),
    }

    let tabs = screen.tabs();
    assert_eq!(tabs.active_tab_id(), "2");
    assert_eq!(tabs.tab("1").unwrap().quantity_of(&harina.id), 0);
    assert_eq!(tabs.tab("2").unwrap().quantity_of(&harina.id), 3);
    assert_eq!(stock(&db, &inventory.id, &harina).await, 8);
    assert_eq!(sales(&db).await, 1);
}

#[tokio::test]
async fn test_edited_cart_after_abandon_is_a_new_sale() {
    let db = database().await;
    let inventory = db.catalog().create_inventory("Tienda").await.unwrap();
    let harina = product(&db, "Harina", 2.0).await;
    restock(&db, &inventory.id, &harina, 10).await;

    // The first attempt lands but its answer is lost.
    let flaky = Arc::new(FlakyStore::new(db.clone(), 1, true));
    let cache = Arc::new(MemoryCache::new());
    let mut screen = Screen::new(ScreenKind::Cashier, flaky.clone(), cache.clone(), &config(30));
    screen.mount().await.unwrap();
    screen.add_product(&harina.id, 2).await.unwrap();
    screen.set_payment_method(Some("efectivo".into())).await;

    let result = screen
        .confirm(ConfirmOptions::default().without_customer())
        .await
        .unwrap();
    let first_op = match result {
        ConfirmResult::Retrying { op_id } => op_id,
        other => panic!("unexpected result {:?}", other),
    };

    assert!(screen.abandon());
    let abandoned = screen.wait_pending().await.unwrap();
    assert!(matches!(abandoned, Err(EngineError::Abandoned(_))));
    assert_eq!(stock(&db, &inventory.id, &harina).await, 8);

    screen.set_quantity(&harina.id, 5.0).await.unwrap();
    let result = screen
        .confirm(ConfirmOptions::default().without_customer())
        .await
        .unwrap();
    match result {
        ConfirmResult::Committed { outcome, .. } => assert_eq!(outcome, CommitOutcome::Applied),
        other => panic!("unexpected result {:?}", other),
    }

    assert_eq!(stock(&db, &inventory.id, &harina).await, 3);
    assert_eq!(sales(&db).await, 2);
    let ops: Vec<String> = db
        .ledger()
        .list(&HistoryFilter::default().kind(OperationKind::Sale))
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.op_id)
        .collect();
    assert!(ops.contains(&first_op));
    assert!(cache.get("sale:pending:cashier-1:anon").await.unwrap().is_none());
}

#[tokio::test]
async fn test_phase_two_fits_cached_tabs_into_stock() {
    let db = database().await;
    let inventory = db.catalog().create_inventory("Tienda").await.unwrap();
    let p = product(&db, "P", 1.0).await;
    restock(&db, &inventory.id, &p, 3).await;

    // Cached before stock dropped: 2 units in tab 1 and 2 in tab 2.
    let mut cached = TabSet::new(ScreenKind::Cashier);
    cached.add_line(&p, 2, rates());
    cached.select_tab("2").unwrap();
    cached.add_line(&p, 2, rates());
    cached.select_tab("1").unwrap();
    let payload = SessionCachePayload::capture(&cached, Some(&inventory.id), Utc::now());
    let cache = Arc::new(MemoryCache::new());
    cache
        .set("cashier:state:anon", &payload.to_json().unwrap())
        .await
        .unwrap();

    let store: Arc<dyn CatalogStore> = db.clone();
    let mut screen = Screen::new(ScreenKind::Cashier, store, cache.clone(), &config(30));
    screen.mount().await.unwrap();

    let tabs = screen.tabs();
    assert_eq!(tabs.active_tab_id(), "1");
    assert_eq!(tabs.tab("1").unwrap().quantity_of(&p.id), 2);
    assert_eq!(tabs.tab("2").unwrap().quantity_of(&p.id), 1);
    assert_eq!(screen.active_inventory_id(), Some(inventory.id.as_str()));

    let toast = screen.notifier().current().unwrap();
    assert_eq!(
        toast.message,
        "Cantidades ajustadas al stock disponible:\nPestaña 2 · P: 2→1"
    );
}

#[tokio::test]
async fn test_empty_tabs_do_not_clobber_stored_session() {
    let cache = Arc::new(MemoryCache::new());
    let mut session = SessionManager::new(ScreenKind::Cashier, cache.clone(), None);
    let loaded = session.quick_load().await;
    assert_eq!(loaded.restored_items, 0);

    // Another writer stored three items after the quick load.
    let p = Product {
        id: "P".into(),
        name: "P".into(),
        brand_id: None,
        cost: 1.0,
        price: 2.0,
        image_url: None,
    };
    let mut elsewhere = TabSet::new(ScreenKind::Cashier);
    elsewhere.add_line(&p, 3, rates());
    let stored = SessionCachePayload::capture(&elsewhere, None, Utc::now())
        .to_json()
        .unwrap();
    cache.set("cashier:state:anon", &stored).await.unwrap();

    let decision = session.persist(&loaded.tabs, None).await;
    assert_eq!(decision, PersistDecision::SkipWouldClobber);
    assert_eq!(
        cache.get("cashier:state:anon").await.unwrap().as_deref(),
        Some(stored.as_str())
    );
}

#[tokio::test]
async fn test_nothing_is_written_before_quick_load() {
    let cache = Arc::new(MemoryCache::new());
    let session = SessionManager::new(ScreenKind::Buys, cache.clone(), Some("ana".into()));

    let decision = session.persist(&TabSet::new(ScreenKind::Buys), None).await;
    assert_eq!(decision, PersistDecision::SkipBeforeRestore);
    assert!(cache.is_empty().await);
}
