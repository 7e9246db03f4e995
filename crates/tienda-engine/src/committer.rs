//! # Transaction Committer
//!
//! Turns the active tab into a ledger write.
//!
//! ## Commit Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  prepare()                                                              │
//! │    1. local validation ── cart, inventory, payment, customer, dest      │
//! │    2. pre-flight                                                        │
//! │         sale / transfer: quantity ≤ known stock (one remote re-read     │
//! │                          for products the snapshot does not list)       │
//! │         purchase:        cached vs remote stock, DriftDetected unless   │
//! │                          the caller accepted the drift                  │
//! │    3. op id from the idempotency guard (reused while the cart is        │
//! │       unchanged)                                                        │
//! │    4. CommitPlan: deltas + history record                               │
//! │                                                                         │
//! │  operation()  ──► RetryableOperation: store.commit(plan), then the      │
//! │                   pending marker is released                            │
//! │                                                                         │
//! │  post_commit()                                                          │
//! │    committed tab cleared, even if another tab is active by now; the     │
//! │    rest are fitted to post-commit stock for the products that left      │
//! │    the inventory                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tienda_core::commit::{
    check_stock, detect_drift, plan_purchase, plan_sale, plan_transfer, require_customer,
    tab_fingerprint, validate_purchase, validate_sale, validate_transfer, PlanContext,
};
use tienda_core::{
    CatalogSnapshot, CommitOutcome, CommitPlan, CoreError, LineItem, OperationKind, ScreenKind,
    StockAdjustment, TabSet,
};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::idempotency::IdempotencyGuard;
use crate::retry::RetryableOperation;
use crate::store::CatalogStore;

/// Caller choices for a confirm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmOptions {
    /// Sell without a national id.
    pub confirm_without_customer: bool,
    /// Go ahead with a purchase although stock changed remotely.
    pub accept_drift: bool,
    /// Transfers only.
    pub destination_inventory_id: Option<String>,
}

impl ConfirmOptions {
    pub fn without_customer(mut self) -> Self {
        self.confirm_without_customer = true;
        self
    }

    pub fn accepting_drift(mut self) -> Self {
        self.accept_drift = true;
        self
    }

    pub fn to_inventory(mut self, inventory_id: impl Into<String>) -> Self {
        self.destination_inventory_id = Some(inventory_id.into());
        self
    }
}

/// A validated plan waiting to be written.
#[derive(Debug, Clone)]
pub struct PreparedCommit {
    pub kind: OperationKind,
    /// Tab the plan was built from.
    pub tab_id: String,
    /// Pending-marker entity: `{screen}-{tab}`.
    pub entity: String,
    pub inventory_id: String,
    pub plan: CommitPlan,
    /// Products that leave `inventory_id`.
    pub outgoing: BTreeSet<String>,
    /// Stock of `outgoing` as known before the commit.
    pub stock_before: BTreeMap<String, i64>,
}

impl PreparedCommit {
    pub fn op_id(&self) -> &str {
        &self.plan.op_id
    }

    pub fn business_id(&self) -> &str {
        &self.plan.record.business_id
    }

    /// Toast shown once the ledger accepts the plan.
    pub fn success_message(&self) -> String {
        let noun = match self.kind {
            OperationKind::Sale => "Venta",
            OperationKind::Purchase => "Compra",
            OperationKind::Transfer => "Transferencia",
            OperationKind::ProductCreate
            | OperationKind::ProductEdit
            | OperationKind::ProductDelete => "Operación",
        };
        format!("{} {} registrada", noun, self.business_id())
    }
}

pub struct TransactionCommitter {
    store: Arc<dyn CatalogStore>,
    guard: IdempotencyGuard,
    user_id: Option<String>,
    preflight_remote_check: bool,
}

impl TransactionCommitter {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        guard: IdempotencyGuard,
        user_id: Option<String>,
        preflight_remote_check: bool,
    ) -> Self {
        TransactionCommitter {
            store,
            guard,
            user_id,
            preflight_remote_check,
        }
    }

    /// Pending-marker entity for a tab.
    pub fn entity(screen: ScreenKind, tab_id: &str) -> String {
        format!("{}-{}", screen.as_str(), tab_id)
    }

    fn context<'a>(&'a self, op_id: &'a str, snapshot: &CatalogSnapshot) -> PlanContext<'a> {
        PlanContext {
            op_id,
            rates: snapshot.rates(),
            user_id: self.user_id.as_deref(),
            now: Utc::now(),
        }
    }

    // =========================================================================
    // Prepare
    // =========================================================================

    /// Validates the active tab and builds its plan.
    pub async fn prepare(
        &self,
        tabs: &TabSet,
        snapshot: &CatalogSnapshot,
        inventory_id: Option<&str>,
        options: &ConfirmOptions,
    ) -> EngineResult<PreparedCommit> {
        match tabs.screen() {
            ScreenKind::Cashier => self.prepare_sale(tabs, snapshot, inventory_id, options).await,
            ScreenKind::Buys => self.prepare_purchase(tabs, snapshot, inventory_id, options).await,
            ScreenKind::Transfers => {
                self.prepare_transfer(tabs, snapshot, inventory_id, options).await
            }
        }
    }

    pub async fn prepare_sale(
        &self,
        tabs: &TabSet,
        snapshot: &CatalogSnapshot,
        inventory_id: Option<&str>,
        options: &ConfirmOptions,
    ) -> EngineResult<PreparedCommit> {
        let tab = tabs.active();
        validate_sale(tab, inventory_id)?;
        require_customer(tab, options.confirm_without_customer)?;
        let inventory = inventory_id.ok_or(CoreError::NoInventorySelected)?;

        let stock_before = self.preflight_stock(snapshot, inventory, &tab.cart).await?;

        let entity = Self::entity(tabs.screen(), &tab.id);
        let marker = self
            .guard
            .acquire(OperationKind::Sale, &entity, &tab_fingerprint(tab, inventory, None))
            .await;
        let plan = plan_sale(
            self.context(&marker.op_id, snapshot),
            tab,
            Some(inventory),
            options.confirm_without_customer,
        )?;

        debug!(op_id = %plan.op_id, lines = plan.record.lines.len(), "Sale prepared");
        Ok(PreparedCommit {
            kind: OperationKind::Sale,
            tab_id: tab.id.clone(),
            entity,
            inventory_id: inventory.to_string(),
            outgoing: stock_before.keys().cloned().collect(),
            stock_before,
            plan,
        })
    }

    pub async fn prepare_purchase(
        &self,
        tabs: &TabSet,
        snapshot: &CatalogSnapshot,
        inventory_id: Option<&str>,
        options: &ConfirmOptions,
    ) -> EngineResult<PreparedCommit> {
        let tab = tabs.active();
        validate_purchase(tab, inventory_id)?;
        let inventory = inventory_id.ok_or(CoreError::NoInventorySelected)?;

        if self.preflight_remote_check && !options.accept_drift {
            let ids = product_ids(&tab.cart);
            let remote = self.store.read_stock(inventory, &ids).await?;
            let drift = detect_drift(
                &tab.cart,
                |pid| snapshot.stock_of(inventory, pid),
                |pid| remote.get(pid).copied().unwrap_or(0),
            );
            if !drift.is_empty() {
                warn!(inventory, products = drift.len(), "Purchase blocked by stock drift");
                return Err(EngineError::DriftDetected(drift));
            }
        }

        let entity = Self::entity(tabs.screen(), &tab.id);
        let marker = self
            .guard
            .acquire(OperationKind::Purchase, &entity, &tab_fingerprint(tab, inventory, None))
            .await;
        let plan = plan_purchase(self.context(&marker.op_id, snapshot), tab, Some(inventory))?;

        debug!(op_id = %plan.op_id, lines = plan.record.lines.len(), "Purchase prepared");
        Ok(PreparedCommit {
            kind: OperationKind::Purchase,
            tab_id: tab.id.clone(),
            entity,
            inventory_id: inventory.to_string(),
            outgoing: BTreeSet::new(),
            stock_before: BTreeMap::new(),
            plan,
        })
    }

    pub async fn prepare_transfer(
        &self,
        tabs: &TabSet,
        snapshot: &CatalogSnapshot,
        inventory_id: Option<&str>,
        options: &ConfirmOptions,
    ) -> EngineResult<PreparedCommit> {
        let tab = tabs.active();
        let destination = options.destination_inventory_id.as_deref();
        validate_transfer(tab, inventory_id, destination)?;
        let inventory = inventory_id.ok_or(CoreError::NoInventorySelected)?;

        let stock_before = self.preflight_stock(snapshot, inventory, &tab.cart).await?;

        let entity = Self::entity(tabs.screen(), &tab.id);
        let fingerprint = tab_fingerprint(tab, inventory, destination);
        let marker = self
            .guard
            .acquire(OperationKind::Transfer, &entity, &fingerprint)
            .await;
        let plan = plan_transfer(
            self.context(&marker.op_id, snapshot),
            tab,
            Some(inventory),
            destination,
        )?;

        debug!(op_id = %plan.op_id, lines = plan.record.lines.len(), "Transfer prepared");
        Ok(PreparedCommit {
            kind: OperationKind::Transfer,
            tab_id: tab.id.clone(),
            entity,
            inventory_id: inventory.to_string(),
            outgoing: stock_before.keys().cloned().collect(),
            stock_before,
            plan,
        })
    }

    /// Fails when a line asks for more than the inventory holds. Products
    /// the snapshot has no entry for are read remotely, once.
    async fn preflight_stock(
        &self,
        snapshot: &CatalogSnapshot,
        inventory_id: &str,
        lines: &[LineItem],
    ) -> EngineResult<BTreeMap<String, i64>> {
        let known = snapshot.inventory(inventory_id);
        let unknown: Vec<String> = product_ids(lines)
            .into_iter()
            .filter(|pid| known.map_or(true, |inv| !inv.knows(pid)))
            .collect();

        let remote = if unknown.is_empty() {
            BTreeMap::new()
        } else {
            debug!(inventory_id, products = unknown.len(), "Re-reading stock missing from cache");
            self.store.read_stock(inventory_id, &unknown).await?
        };

        let stock: BTreeMap<String, i64> = product_ids(lines)
            .into_iter()
            .map(|pid| {
                let quantity = remote
                    .get(&pid)
                    .copied()
                    .unwrap_or_else(|| snapshot.stock_of(inventory_id, &pid));
                (pid, quantity)
            })
            .collect();

        check_stock(lines, |pid| stock.get(pid).copied().unwrap_or(0))?;
        Ok(stock)
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// The retryable write for a prepared plan. Every attempt sends the same
    /// plan, so a duplicate reaches the store as `AlreadyApplied`.
    pub fn operation(&self, prepared: &PreparedCommit) -> RetryableOperation<CommitOutcome> {
        let store = Arc::clone(&self.store);
        let guard = self.guard.clone();
        let plan = Arc::new(prepared.plan.clone());
        let kind = prepared.kind;
        let entity = Arc::new(prepared.entity.clone());

        RetryableOperation::new(
            prepared.op_id().to_string(),
            prepared.success_message(),
            move || {
                let store = Arc::clone(&store);
                let guard = guard.clone();
                let plan = Arc::clone(&plan);
                let entity = Arc::clone(&entity);
                async move {
                    match store.commit(&plan).await {
                        Ok(outcome) => {
                            info!(op_id = %plan.op_id, ?outcome, "Ledger commit confirmed");
                            guard.release(kind, &entity).await;
                            Ok(outcome)
                        }
                        Err(e) => {
                            // Nothing was written; a later confirm may use a new id.
                            if !e.is_transient() {
                                guard.release(kind, &entity).await;
                            }
                            Err(e)
                        }
                    }
                }
            },
        )
    }

    /// Clears the committed tab and fits the remaining tabs into what the
    /// inventory holds now. The user may have moved to another tab while
    /// the commit was retrying; that one is left alone.
    pub async fn post_commit(
        &self,
        tabs: &mut TabSet,
        prepared: &PreparedCommit,
    ) -> Vec<StockAdjustment> {
        if let Err(e) = tabs.clear_tab(&prepared.tab_id) {
            warn!(op_id = %prepared.op_id(), tab_id = %prepared.tab_id, error = %e, "Committed tab is gone");
        }
        if prepared.outgoing.is_empty() || !tabs.screen().is_stock_bounded() {
            return Vec::new();
        }

        let ids: Vec<String> = prepared.outgoing.iter().cloned().collect();
        let stock = match self.store.read_stock(&prepared.inventory_id, &ids).await {
            Ok(stock) => stock,
            Err(e) => {
                warn!(op_id = %prepared.op_id(), error = %e, "Post-commit stock read failed, using local estimate");
                estimate_after(prepared)
            }
        };

        let adjustments = tabs.reconcile(
            |pid| stock.get(pid).copied().unwrap_or(0),
            Some(&prepared.outgoing),
        );
        if !adjustments.is_empty() {
            info!(op_id = %prepared.op_id(), adjusted = adjustments.len(), "Tabs fitted to post-commit stock");
        }
        adjustments
    }
}

impl std::fmt::Debug for TransactionCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCommitter")
            .field("user_id", &self.user_id)
            .field("preflight_remote_check", &self.preflight_remote_check)
            .finish()
    }
}

fn product_ids(lines: &[LineItem]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line.quantity > 0)
        .map(|line| line.doc_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Pre-commit stock plus the plan's deltas on the source inventory.
fn estimate_after(prepared: &PreparedCommit) -> BTreeMap<String, i64> {
    let mut stock = prepared.stock_before.clone();
    for delta in prepared
        .plan
        .deltas
        .iter()
        .filter(|d| d.inventory_id == prepared.inventory_id)
    {
        if let Some(quantity) = stock.get_mut(&delta.product_id) {
            *quantity = (*quantity + delta.delta).max(0);
        }
    }
    stock
}
