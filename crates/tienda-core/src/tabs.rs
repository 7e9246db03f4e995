//! # Tab-Scoped Cart Model
//!
//! A screen owns a fixed set of tabs, each an independent order in progress.
//! Exactly one tab is active; every cart operation targets it and leaves the
//! other tabs untouched.
//!
//! ## Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          TabSet (per screen)                            │
//! │                                                                         │
//! │   select_tab("3")                                                       │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌─────────┬─────────┬─────────┬─────┬─────────┐                       │
//! │   │  Tab 1  │  Tab 2  │ Tab 3 ★ │ ... │  Tab 9  │                       │
//! │   └─────────┴─────────┴────┬────┴─────┴─────────┘                       │
//! │                            │                                            │
//! │      add_line / set_quantity / override_principal / remove_line         │
//! │                            │                                            │
//! │                            ▼                                            │
//! │              cached MoneyAmounts recomputed per line                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Interaction Latch
//! The first cart-mutating call flips `user_interacted` to true and nothing
//! flips it back. Session persistence relies on it to tell a real "user
//! emptied the cart" apart from an empty first render.

use std::collections::BTreeSet;

use crate::currency::{CartTotals, ExchangeRates};
use crate::error::{CoreError, CoreResult};
use crate::reconcile::{reconcile_tabs, StockAdjustment};
use crate::reservation::{available_for, reserved_for, ReservationMap};
use crate::types::{tab_ids, CustomerForm, LineItem, Product, ScreenKind, Tab};
use crate::validation::{parse_decimal, validate_quantity};

// =============================================================================
// Add Outcome
// =============================================================================

/// Result of a stock-capped add from the product search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The full quantity was added.
    Added { quantity: i64 },
    /// Only part of the request fit in the available stock.
    Clamped {
        requested: i64,
        added: i64,
        message: String,
    },
    /// Nothing could be added.
    Rejected { message: String },
}

impl AddOutcome {
    /// Message to show the user, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            AddOutcome::Added { .. } => None,
            AddOutcome::Clamped { message, .. } | AddOutcome::Rejected { message } => {
                Some(message)
            }
        }
    }

    /// Units that ended up in the cart.
    pub fn added(&self) -> i64 {
        match self {
            AddOutcome::Added { quantity } => *quantity,
            AddOutcome::Clamped { added, .. } => *added,
            AddOutcome::Rejected { .. } => 0,
        }
    }
}

// =============================================================================
// Tab Set
// =============================================================================

/// The fixed tabs of one screen plus the active selection.
///
/// Invariant: `tabs` holds exactly the screen's fixed tab ids (never empty)
/// and `active_tab_id` is one of them. Only `new`, `from_tabs` and
/// `select_tab` change the tab list or the selection.
#[derive(Debug, Clone, PartialEq)]
pub struct TabSet {
    screen: ScreenKind,
    tabs: Vec<Tab>,
    active_tab_id: String,
    user_interacted: bool,
}

impl TabSet {
    /// Creates the screen's empty tabs with tab "1" active.
    pub fn new(screen: ScreenKind) -> Self {
        TabSet {
            screen,
            tabs: tab_ids(screen.tab_count()).map(Tab::new).collect(),
            active_tab_id: "1".to_string(),
            user_interacted: false,
        }
    }

    /// Builds a set from restored tabs, normalizing to the screen's tab
    /// count and merging duplicate lines.
    pub fn from_tabs(screen: ScreenKind, tabs: Vec<Tab>, active_tab_id: Option<&str>) -> Self {
        let mut set = TabSet::new(screen);
        set.tabs = normalize_tabs(screen, tabs);
        set.dedupe();
        if let Some(id) = active_tab_id {
            if set.tab(id).is_some() {
                set.active_tab_id = id.to_string();
            }
        }
        set
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn screen(&self) -> ScreenKind {
        self.screen
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_tab_id(&self) -> &str {
        &self.active_tab_id
    }

    pub fn tab(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    /// The active tab.
    pub fn active(&self) -> &Tab {
        let index = self.active_index();
        &self.tabs[index]
    }

    fn active_index(&self) -> usize {
        debug_assert!(!self.tabs.is_empty(), "tab set without tabs");
        self.tabs
            .iter()
            .position(|tab| tab.id == self.active_tab_id)
            .unwrap_or(0)
    }

    fn active_mut(&mut self) -> &mut Tab {
        let index = self.active_index();
        &mut self.tabs[index]
    }

    fn line_mut(&mut self, key: &str) -> CoreResult<&mut LineItem> {
        self.active_mut()
            .line_mut(key)
            .ok_or_else(|| CoreError::LineNotFound(key.to_string()))
    }

    /// Whether the user has mutated a cart since this set was created.
    pub fn user_interacted(&self) -> bool {
        self.user_interacted
    }

    fn mark_interacted(&mut self) {
        self.user_interacted = true;
    }

    /// Units across every tab.
    pub fn item_count(&self) -> i64 {
        self.tabs.iter().map(Tab::item_count).sum()
    }

    /// Totals for the active tab, summed per line.
    pub fn totals(&self, rates: ExchangeRates) -> CartTotals {
        CartTotals::from_lines(&self.active().cart, rates)
    }

    /// Reservations held outside the active tab.
    pub fn reservations(&self) -> ReservationMap {
        ReservationMap::build(&self.tabs, &self.active_tab_id)
    }

    /// Units of a product the active tab may still add.
    pub fn available_for(&self, product_id: &str, stock: i64) -> i64 {
        let reserved = reserved_for(&self.tabs, product_id, &self.active_tab_id);
        available_for(stock, reserved, self.active().quantity_of(product_id))
    }

    /// Whether the increment control for a line is enabled.
    pub fn can_increment(&self, product_id: &str, stock: i64) -> bool {
        !self.screen.is_stock_bounded() || self.available_for(product_id, stock) > 0
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    /// Switches the active tab. Carts and stock are untouched.
    pub fn select_tab(&mut self, id: &str) -> CoreResult<()> {
        if self.tab(id).is_none() {
            return Err(CoreError::TabNotFound(id.to_string()));
        }
        self.active_tab_id = id.to_string();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Cart Mutations
    // -------------------------------------------------------------------------

    /// Adds units of a product to the active tab, merging with an existing
    /// line. A quantity of zero or less does nothing.
    pub fn add_line(&mut self, product: &Product, quantity: i64, rates: ExchangeRates) {
        if quantity <= 0 {
            return;
        }
        let screen = self.screen;
        let tab = self.active_mut();
        match tab.line_mut(&product.id) {
            Some(line) => line.quantity += quantity,
            None => tab
                .cart
                .push(LineItem::from_product(product, screen, quantity, rates)),
        }
        self.mark_interacted();
    }

    /// Adds from the product search, bounded by what other tabs reserve.
    ///
    /// Purchases are not stock-bounded and always add the full quantity.
    pub fn add_line_capped(
        &mut self,
        product: &Product,
        quantity: i64,
        rates: ExchangeRates,
        stock: i64,
    ) -> AddOutcome {
        if quantity <= 0 {
            return AddOutcome::Added { quantity: 0 };
        }
        if !self.screen.is_stock_bounded() {
            self.add_line(product, quantity, rates);
            return AddOutcome::Added { quantity };
        }

        let available = self.available_for(&product.id, stock);
        if available <= 0 {
            return AddOutcome::Rejected {
                message: CoreError::NothingAvailable {
                    name: product.name.clone(),
                }
                .to_string(),
            };
        }

        if quantity > available {
            self.add_line(product, available, rates);
            return AddOutcome::Clamped {
                requested: quantity,
                added: available,
                message: format!(
                    "Solo se agregaron {} de {} unidades de \"{}\"",
                    available, quantity, product.name
                ),
            };
        }

        self.add_line(product, quantity, rates);
        AddOutcome::Added { quantity }
    }

    /// Sets a line's quantity. Zero removes the line; NaN, infinity and
    /// negatives are rejected without touching the cart.
    pub fn set_quantity(&mut self, key: &str, quantity: f64) -> CoreResult<()> {
        let quantity = validate_quantity(quantity)?;
        if quantity == 0 {
            return self.remove_line(key);
        }
        self.line_mut(key)?.quantity = quantity;
        self.mark_interacted();
        Ok(())
    }

    /// Adds one unit if stock allows. Returns whether the line grew.
    pub fn increment(&mut self, key: &str, stock: i64) -> CoreResult<bool> {
        if self.active().line(key).is_none() {
            return Err(CoreError::LineNotFound(key.to_string()));
        }
        if !self.can_increment(key, stock) {
            return Ok(false);
        }
        self.line_mut(key)?.quantity += 1;
        self.mark_interacted();
        Ok(true)
    }

    /// Removes a line from the active tab.
    pub fn remove_line(&mut self, key: &str) -> CoreResult<()> {
        let tab = self.active_mut();
        let before = tab.cart.len();
        tab.cart.retain(|line| line.doc_id != key);
        if tab.cart.len() == before {
            return Err(CoreError::LineNotFound(key.to_string()));
        }
        self.mark_interacted();
        Ok(())
    }

    /// Replaces a line's USD principal with user input.
    pub fn override_principal(
        &mut self,
        key: &str,
        raw: &str,
        rates: ExchangeRates,
    ) -> CoreResult<()> {
        let field = if self.screen.uses_price() { "precio" } else { "costo" };
        let principal = parse_decimal(field, raw)?;
        let line = self.line_mut(key)?;
        line.principal = principal;
        line.custom_principal = true;
        line.custom_adjusted = false;
        line.recompute(rates);
        self.mark_interacted();
        Ok(())
    }

    /// Edits the adjusted USD figure directly.
    ///
    /// The Cashier back-solves the principal as
    /// `entered × bcv / paralelo`; other screens take the entered value as
    /// both principal and adjusted USD.
    pub fn override_adjusted_usd(
        &mut self,
        key: &str,
        raw: &str,
        rates: ExchangeRates,
    ) -> CoreResult<()> {
        let entered = parse_decimal("monto ajustado", raw)?;
        let back_solve = self.screen.uses_price();
        let line = self.line_mut(key)?;

        if back_solve {
            line.principal = if rates.is_valid() {
                entered * rates.bcv / rates.paralelo
            } else {
                entered
            };
            line.custom_adjusted = false;
        } else {
            line.principal = entered;
            line.custom_adjusted = true;
        }
        line.custom_principal = true;
        line.recompute(rates);
        self.mark_interacted();
        Ok(())
    }

    /// Restores the catalog principal and clears the custom flag.
    pub fn reset_to_base(&mut self, key: &str, rates: ExchangeRates) -> CoreResult<()> {
        let line = self.line_mut(key)?;
        line.principal = line.base_principal;
        line.custom_principal = false;
        line.custom_adjusted = false;
        line.recompute(rates);
        self.mark_interacted();
        Ok(())
    }

    /// Sets the active tab's customer.
    pub fn set_customer(&mut self, customer: Option<CustomerForm>) {
        self.active_mut().customer = customer;
    }

    /// Sets the active tab's payment method.
    pub fn set_payment_method(&mut self, method: Option<String>) {
        self.active_mut().payment_method = method.filter(|m| !m.trim().is_empty());
    }

    /// Empties the active tab after a committed transaction.
    pub fn clear_active(&mut self) {
        self.active_mut().clear();
        self.mark_interacted();
    }

    /// Empties one tab after its transaction committed. The active tab may
    /// have changed since the commit started.
    pub fn clear_tab(&mut self, id: &str) -> CoreResult<()> {
        let tab = self
            .tabs
            .iter_mut()
            .find(|tab| tab.id == id)
            .ok_or_else(|| CoreError::TabNotFound(id.to_string()))?;
        tab.clear();
        self.mark_interacted();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Whole-Set Maintenance
    // -------------------------------------------------------------------------

    /// Merges duplicate lines in every tab. Returns true if any merged.
    pub fn dedupe(&mut self) -> bool {
        let mut merged = false;
        for tab in &mut self.tabs {
            merged |= tab.dedupe();
        }
        merged
    }

    /// Recomputes every cached amount after a rates change.
    pub fn refresh_amounts(&mut self, rates: ExchangeRates) {
        for line in self.tabs.iter_mut().flat_map(|tab| tab.cart.iter_mut()) {
            line.recompute(rates);
        }
    }

    /// Fits quantities into stock, active tab first.
    pub fn reconcile<F>(&mut self, stock_of: F, only: Option<&BTreeSet<String>>) -> Vec<StockAdjustment>
    where
        F: Fn(&str) -> i64,
    {
        let active = self.active_tab_id.clone();
        reconcile_tabs(&mut self.tabs, &active, stock_of, only)
    }

    /// Tabs as they are written to the local cache.
    ///
    /// Cashier drops customer notes and the payment method.
    pub fn cached_tabs(&self) -> Vec<Tab> {
        let sanitize = self.screen.sanitizes_customer();
        self.tabs
            .iter()
            .map(|tab| {
                let mut tab = tab.clone();
                if sanitize {
                    tab.customer = tab.customer.as_ref().map(CustomerForm::sanitized);
                    tab.payment_method = None;
                }
                tab
            })
            .collect()
    }
}

/// Exactly one tab per fixed id, in order. Missing tabs are synthesized,
/// unknown ids and repeats are dropped.
pub fn normalize_tabs(screen: ScreenKind, tabs: Vec<Tab>) -> Vec<Tab> {
    let mut pool = tabs;
    tab_ids(screen.tab_count())
        .map(|id| match pool.iter().position(|tab| tab.id == id) {
            Some(index) => {
                let mut tab = pool.swap_remove(index);
                if tab.name.trim().is_empty() {
                    tab.name = Tab::new(id).name;
                }
                tab
            }
            None => Tab::new(id),
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
