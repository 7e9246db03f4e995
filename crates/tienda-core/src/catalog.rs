//! # Catalog Snapshot
//!
//! In-memory projection of the catalog store: products, inventories,
//! brands and the exchange rates from the settings document.
//!
//! ## Event Flow
//! ```text
//! ┌──────────────┐  CatalogEvent  ┌──────────────────┐  read-only  ┌────────┐
//! │ CatalogStore │ ─────────────► │ CatalogSnapshot  │ ──────────► │ Screen │
//! │ (tienda-db)  │   broadcast    │  apply(event)    │             │        │
//! └──────────────┘                └──────────────────┘             └────────┘
//! ```
//!
//! Collections carry no cross-collection ordering, so a cart may reference a
//! product the snapshot does not (yet, or any longer) know. Lookups return
//! `Option` and stock lookups treat unknown entries as zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::currency::ExchangeRates;
use crate::types::{Brand, Inventory, Product};

/// A change delivered by the catalog subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogEvent {
    ProductUpserted(Product),
    ProductRemoved { id: String },
    InventoryUpserted(Inventory),
    InventoryRemoved { id: String },
    BrandUpserted(Brand),
    BrandRemoved { id: String },
    SettingsChanged(ExchangeRates),
}

/// Live view of the catalog collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    products: BTreeMap<String, Product>,
    inventories: BTreeMap<String, Inventory>,
    brands: BTreeMap<String, Brand>,
    rates: ExchangeRates,
}

impl CatalogSnapshot {
    /// Empty snapshot with conversion disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot loaded in one go (initial subscription payload).
    pub fn from_parts(
        products: Vec<Product>,
        inventories: Vec<Inventory>,
        brands: Vec<Brand>,
        rates: ExchangeRates,
    ) -> Self {
        CatalogSnapshot {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
            inventories: inventories
                .into_iter()
                .map(|i| (i.id.clone(), i))
                .collect(),
            brands: brands.into_iter().map(|b| (b.id.clone(), b)).collect(),
            rates,
        }
    }

    /// Applies one change event.
    pub fn apply(&mut self, event: CatalogEvent) {
        match event {
            CatalogEvent::ProductUpserted(product) => {
                self.products.insert(product.id.clone(), product);
            }
            CatalogEvent::ProductRemoved { id } => {
                self.products.remove(&id);
            }
            CatalogEvent::InventoryUpserted(inventory) => {
                self.inventories.insert(inventory.id.clone(), inventory);
            }
            CatalogEvent::InventoryRemoved { id } => {
                self.inventories.remove(&id);
            }
            CatalogEvent::BrandUpserted(brand) => {
                self.brands.insert(brand.id.clone(), brand);
            }
            CatalogEvent::BrandRemoved { id } => {
                self.brands.remove(&id);
            }
            CatalogEvent::SettingsChanged(rates) => {
                self.rates = rates;
            }
        }
    }

    #[inline]
    pub fn rates(&self) -> ExchangeRates {
        self.rates
    }

    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn inventory(&self, id: &str) -> Option<&Inventory> {
        self.inventories.get(id)
    }

    /// Inventories ordered by id.
    pub fn inventories(&self) -> impl Iterator<Item = &Inventory> {
        self.inventories.values()
    }

    pub fn has_inventories(&self) -> bool {
        !self.inventories.is_empty()
    }

    /// First inventory by id, the fallback selection.
    pub fn first_inventory(&self) -> Option<&Inventory> {
        self.inventories.values().next()
    }

    pub fn brand(&self, id: &str) -> Option<&Brand> {
        self.brands.get(id)
    }

    /// Stock of a product in an inventory. Unknown inventory or product is 0.
    pub fn stock_of(&self, inventory_id: &str, product_id: &str) -> i64 {
        self.inventories
            .get(inventory_id)
            .map(|inv| inv.stock_of(product_id))
            .unwrap_or(0)
    }

    /// Display name for a product, falling back to the id.
    pub fn product_name<'a>(&'a self, product_id: &'a str) -> &'a str {
        self.products
            .get(product_id)
            .map(|p| p.name.as_str())
            .unwrap_or(product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str) -> Product {
        Product {
            id: id.into(),
            name: format!("Producto {}", id),
            brand_id: None,
            cost: 1.0,
            price: 2.0,
            image_url: None,
        }
    }

    #[test]
    fn test_apply_events() {
        let mut snap = CatalogSnapshot::new();
        assert!(!snap.has_inventories());

        snap.apply(CatalogEvent::ProductUpserted(product("P1")));
        snap.apply(CatalogEvent::InventoryUpserted(
            Inventory::new("B", "Depósito").with_stock("P1", 7),
        ));
        snap.apply(CatalogEvent::InventoryUpserted(Inventory::new("A", "Tienda")));
        snap.apply(CatalogEvent::SettingsChanged(ExchangeRates::new(36.0, 40.0)));

        assert_eq!(snap.stock_of("B", "P1"), 7);
        assert_eq!(snap.stock_of("A", "P1"), 0);
        assert_eq!(snap.stock_of("Z", "P1"), 0);
        assert_eq!(snap.first_inventory().map(|i| i.id.as_str()), Some("A"));
        assert!(snap.rates().is_valid());

        snap.apply(CatalogEvent::ProductRemoved { id: "P1".into() });
        assert!(snap.product("P1").is_none());
        assert_eq!(snap.product_name("P1"), "P1");
    }

    #[test]
    fn test_event_json_shape() {
        let event = CatalogEvent::InventoryRemoved { id: "A".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"inventory_removed","id":"A"}"#);
    }
}
