//! # Domain Types
//!
//! Core domain types shared by the Cashier, Buys and Transfers screens.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │   Inventory     │   │     Brand       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  id             │   │  id             │       │
//! │  │  cost (USD)     │   │  name           │   │  name           │       │
//! │  │  price (USD)    │   │  products: map  │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Tab        │──►│    LineItem     │   │  CustomerForm   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id "1".."9"    │   │  doc_id         │   │  name, phone    │       │
//! │  │  cart           │   │  quantity       │   │  id (cédula)    │       │
//! │  │  customer       │   │  principal      │   │  address        │       │
//! │  │  payment_method │   │  cached amounts │   │  notes          │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Principal: cost or price?
//! A line carries one USD principal. The Cashier prices lines with the
//! product's `price`; Buys and Transfers use its `cost`. Persisted carts
//! written by older clients spell the principal fields either way, so
//! deserialization accepts both spellings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::currency::{split_adjusted, ExchangeRates, MoneyAmounts};
use crate::error::ValidationError;

// =============================================================================
// Screen Kind
// =============================================================================

/// The three screens that own a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ScreenKind {
    /// Sales at the till. Prices lines with `price`.
    Cashier,
    /// Purchases from suppliers. Prices lines with `cost`.
    Buys,
    /// Moves stock between inventories. Single implicit list.
    Transfers,
}

impl ScreenKind {
    /// Storage prefix used in local cache keys.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScreenKind::Cashier => "cashier",
            ScreenKind::Buys => "buys",
            ScreenKind::Transfers => "transfers",
        }
    }

    /// Number of fixed tabs this screen owns.
    pub const fn tab_count(&self) -> usize {
        match self {
            ScreenKind::Cashier | ScreenKind::Buys => crate::TAB_COUNT,
            ScreenKind::Transfers => 1,
        }
    }

    /// Whether the line principal is the product's sale price.
    pub const fn uses_price(&self) -> bool {
        matches!(self, ScreenKind::Cashier)
    }

    /// Whether quantities are capped by the selected inventory's stock.
    ///
    /// Purchases bring stock in, so they are never capped.
    pub const fn is_stock_bounded(&self) -> bool {
        !matches!(self, ScreenKind::Buys)
    }

    /// Whether customer `notes` and the payment method are dropped before
    /// the session is cached.
    pub const fn sanitizes_customer(&self) -> bool {
        matches!(self, ScreenKind::Cashier)
    }
}

impl fmt::Display for ScreenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cashier" => Ok(ScreenKind::Cashier),
            "buys" => Ok(ScreenKind::Buys),
            "transfers" => Ok(ScreenKind::Transfers),
            other => Err(ValidationError::InvalidFormat {
                field: "pantalla".to_string(),
                reason: format!("'{}' no es una pantalla conocida", other),
            }),
        }
    }
}

// =============================================================================
// Catalog Entities
// =============================================================================

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product key, also the line identity in carts.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Brand this product belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    /// Purchase cost in USD.
    pub cost: f64,
    /// Sale price in USD.
    pub price: f64,
    /// Public URL of the product image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Product {
    /// USD principal this screen prices the product with.
    #[inline]
    pub fn principal_for(&self, screen: ScreenKind) -> f64 {
        if screen.uses_price() {
            self.price
        } else {
            self.cost
        }
    }
}

/// A product brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Brand {
    pub id: String,
    pub name: String,
}

/// Quantity on hand for one product in one inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockEntry {
    pub quantity: i64,
}

/// A stock location holding a map of product id to quantity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub products: BTreeMap<String, StockEntry>,
}

impl Inventory {
    /// Creates an empty inventory.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Inventory {
            id: id.into(),
            name: name.into(),
            products: BTreeMap::new(),
        }
    }

    /// Builder-style stock entry, mostly for tests and seeding.
    pub fn with_stock(mut self, product_id: impl Into<String>, quantity: i64) -> Self {
        self.products
            .insert(product_id.into(), StockEntry { quantity });
        self
    }

    /// Quantity of a product. A missing entry means no stock.
    #[inline]
    pub fn stock_of(&self, product_id: &str) -> i64 {
        self.products
            .get(product_id)
            .map(|entry| entry.quantity.max(0))
            .unwrap_or(0)
    }

    /// Whether the inventory carries an entry for the product at all.
    #[inline]
    pub fn knows(&self, product_id: &str) -> bool {
        self.products.contains_key(product_id)
    }
}

/// Result of creating an inventory or brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

// =============================================================================
// Line Item
// =============================================================================

/// One product line in a tab's cart.
///
/// The amounts fields cache [`MoneyAmounts`] for display; they are always
/// recomputed from `principal`, except that a line with `custom_adjusted`
/// keeps its adjusted USD equal to the principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Product key. Older payloads call it `id`.
    #[serde(alias = "id")]
    pub doc_id: String,

    pub name: String,

    #[serde(default)]
    pub quantity: i64,

    /// USD principal used for this transaction.
    #[serde(alias = "price", alias = "cost")]
    pub principal: f64,

    /// Catalog value at the time the line was added, kept for reset.
    #[serde(default, alias = "basePrice", alias = "baseCost")]
    pub base_principal: f64,

    /// The user typed a different principal.
    #[serde(default, alias = "customPrice", alias = "customCost")]
    pub custom_principal: bool,

    /// Adjusted USD was typed on a screen that stores it verbatim.
    #[serde(default)]
    pub custom_adjusted: bool,

    #[serde(default, alias = "priceUsdAdjusted", alias = "costUsdAdjusted")]
    pub usd_adjusted: f64,

    #[serde(default, alias = "priceBs", alias = "costBs")]
    pub bs: i64,

    #[serde(default, alias = "priceBsDecimals", alias = "costBsDecimals")]
    pub bs_decimals: i64,
}

impl LineItem {
    /// Creates a line priced at the catalog value.
    pub fn new(
        doc_id: impl Into<String>,
        name: impl Into<String>,
        quantity: i64,
        principal: f64,
        rates: ExchangeRates,
    ) -> Self {
        let mut line = LineItem {
            doc_id: doc_id.into(),
            name: name.into(),
            quantity,
            principal,
            base_principal: principal,
            custom_principal: false,
            custom_adjusted: false,
            usd_adjusted: 0.0,
            bs: 0,
            bs_decimals: 0,
        };
        line.recompute(rates);
        line
    }

    /// Line for a catalog product on the given screen.
    pub fn from_product(
        product: &Product,
        screen: ScreenKind,
        quantity: i64,
        rates: ExchangeRates,
    ) -> Self {
        LineItem::new(
            product.id.clone(),
            product.name.clone(),
            quantity,
            product.principal_for(screen),
            rates,
        )
    }

    /// Unit amounts derived from the principal. A verbatim adjusted figure
    /// replaces the converted one and is split with the BCV rate.
    pub fn amounts(&self, rates: ExchangeRates) -> MoneyAmounts {
        let mut amounts = rates.amounts(self.principal);
        if self.custom_adjusted {
            let (usd_int, bs_decimals) = split_adjusted(self.principal, rates.bcv);
            amounts.usd_adjusted = self.principal;
            amounts.usd_int = usd_int;
            amounts.bs_decimals = bs_decimals;
        }
        amounts
    }

    /// Refreshes the cached amounts from the principal.
    pub fn recompute(&mut self, rates: ExchangeRates) {
        let amounts = self.amounts(rates);
        self.usd_adjusted = amounts.usd_adjusted;
        self.bs = amounts.bs;
        self.bs_decimals = amounts.bs_decimals;
    }

    /// Line total in USD principal.
    #[inline]
    pub fn subtotal_usd(&self) -> f64 {
        self.principal * self.quantity as f64
    }
}

// =============================================================================
// Customer
// =============================================================================

/// Customer details captured on a Cashier tab.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustomerForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    /// National id (cédula).
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub address: String,
    /// Kept only in sale history, never cached or stored in the directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CustomerForm {
    /// Copy without the fields that never leave the sale record.
    pub fn sanitized(&self) -> CustomerForm {
        CustomerForm {
            notes: None,
            ..self.clone()
        }
    }

    /// Whether the form carries a non-blank national id.
    pub fn has_national_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Whether every field is blank.
    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty()
            && self.phone.trim().is_empty()
            && self.id.trim().is_empty()
            && self.address.trim().is_empty()
            && self.notes.as_deref().map_or(true, |n| n.trim().is_empty())
    }
}

// =============================================================================
// Tab
// =============================================================================

/// One of the fixed order slots on a screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cart: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

impl Tab {
    /// Creates an empty tab with the default name.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Tab {
            name: format!("Pestaña {}", id),
            id,
            cart: Vec::new(),
            customer: None,
            payment_method: None,
        }
    }

    /// Units across every line.
    pub fn item_count(&self) -> i64 {
        self.cart.iter().map(|line| line.quantity.max(0)).sum()
    }

    /// Quantity of a product in this tab (0 when absent).
    pub fn quantity_of(&self, product_id: &str) -> i64 {
        self.cart
            .iter()
            .filter(|line| line.doc_id == product_id)
            .map(|line| line.quantity)
            .sum()
    }

    /// Line for a product.
    pub fn line(&self, product_id: &str) -> Option<&LineItem> {
        self.cart.iter().find(|line| line.doc_id == product_id)
    }

    /// Mutable line for a product.
    pub fn line_mut(&mut self, product_id: &str) -> Option<&mut LineItem> {
        self.cart.iter_mut().find(|line| line.doc_id == product_id)
    }

    /// Merges duplicate product lines, keeping the first occurrence and
    /// summing quantities into it. Returns true when anything was merged.
    pub fn dedupe(&mut self) -> bool {
        let before = self.cart.len();
        let mut merged: Vec<LineItem> = Vec::with_capacity(before);
        for line in self.cart.drain(..) {
            match merged.iter_mut().find(|m| m.doc_id == line.doc_id) {
                Some(existing) => existing.quantity += line.quantity,
                None => merged.push(line),
            }
        }
        self.cart = merged;
        self.cart.len() != before
    }

    /// Empties the cart and forgets customer and payment method.
    pub fn clear(&mut self) {
        self.cart.clear();
        self.customer = None;
        self.payment_method = None;
    }
}

/// The fixed tab ids for a screen: "1".."n".
pub fn tab_ids(count: usize) -> impl Iterator<Item = String> {
    (1..=count).map(|n| n.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_kind_roundtrip() {
        for screen in [ScreenKind::Cashier, ScreenKind::Buys, ScreenKind::Transfers] {
            assert_eq!(screen.as_str().parse::<ScreenKind>().unwrap(), screen);
        }
        assert!("kitchen".parse::<ScreenKind>().is_err());
        assert_eq!(ScreenKind::Cashier.tab_count(), 9);
        assert_eq!(ScreenKind::Transfers.tab_count(), 1);
    }

    #[test]
    fn test_principal_depends_on_screen() {
        let product = Product {
            id: "P1".into(),
            name: "Harina".into(),
            brand_id: None,
            cost: 1.5,
            price: 2.0,
            image_url: None,
        };
        assert_eq!(product.principal_for(ScreenKind::Cashier), 2.0);
        assert_eq!(product.principal_for(ScreenKind::Buys), 1.5);
        assert_eq!(product.principal_for(ScreenKind::Transfers), 1.5);
    }

    #[test]
    fn test_missing_stock_entry_is_zero() {
        let inv = Inventory::new("A", "Principal").with_stock("P1", 4);
        assert_eq!(inv.stock_of("P1"), 4);
        assert_eq!(inv.stock_of("P2"), 0);
        assert!(!inv.knows("P2"));
    }

    #[test]
    fn test_line_item_accepts_legacy_price_fields() {
        let json = r#"{"id":"P1","name":"Arroz","quantity":2,"price":3.5,
            "basePrice":4.0,"customPrice":true,"priceBs":140,
            "priceUsdAdjusted":3.88,"priceBsDecimals":32}"#;
        let line: LineItem = serde_json::from_str(json).unwrap();
        assert_eq!(line.doc_id, "P1");
        assert_eq!(line.principal, 3.5);
        assert_eq!(line.base_principal, 4.0);
        assert!(line.custom_principal);
        assert_eq!(line.bs, 140);
    }

    #[test]
    fn test_line_item_accepts_legacy_cost_fields() {
        let json = r#"{"docId":"P2","name":"Aceite","quantity":1,"cost":2.0,"baseCost":2.0}"#;
        let line: LineItem = serde_json::from_str(json).unwrap();
        assert_eq!(line.doc_id, "P2");
        assert_eq!(line.principal, 2.0);
        assert!(!line.custom_principal);
    }

    #[test]
    fn test_dedupe_sums_quantities() {
        let rates = ExchangeRates::new(36.0, 40.0);
        let mut tab = Tab::new("1");
        tab.cart.push(LineItem::new("P", "Pan", 2, 1.0, rates));
        tab.cart.push(LineItem::new("Q", "Queso", 1, 3.0, rates));
        tab.cart.push(LineItem::new("P", "Pan", 3, 1.0, rates));

        assert!(tab.dedupe());
        assert_eq!(tab.cart.len(), 2);
        assert_eq!(tab.quantity_of("P"), 5);
        assert!(!tab.dedupe());
    }

    #[test]
    fn test_customer_sanitized_drops_notes() {
        let form = CustomerForm {
            name: "Ana".into(),
            id: "V-123".into(),
            notes: Some("entrega martes".into()),
            ..CustomerForm::default()
        };
        let clean = form.sanitized();
        assert_eq!(clean.notes, None);
        assert_eq!(clean.name, "Ana");
        let json = serde_json::to_string(&clean).unwrap();
        assert!(!json.contains("notes"));
    }
}
