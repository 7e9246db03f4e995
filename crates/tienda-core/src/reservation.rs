//! # Cross-Tab Reservations
//!
//! Every tab on a screen draws from the same selected inventory. Units held
//! in the *other* tabs' carts are reserved and reduce what the active tab
//! may still add.
//!
//! ```text
//!   stock(P) = 6
//!   ┌────────────┐  ┌────────────┐  ┌────────────┐
//!   │ Tab 1 (★)  │  │   Tab 2    │  │   Tab 3    │
//!   │  P × 2     │  │  P × 3     │  │  P × 0     │
//!   └────────────┘  └────────────┘  └────────────┘
//!   reserved_for(P, "1")  = 3
//!   available_for(6, 3, 2) = max(0, 6 - 3 - 2) = 1
//! ```
//!
//! ## Mutually Exclusive Tabs
//! Reservations are evaluated from each tab's point of view. Two tabs can
//! together hold more than the physical stock when each was filled while
//! the other was smaller (tab 1: 5, tab 2: 3, stock 6). Both then see zero
//! available and neither can grow; the overlap is resolved by
//! [`crate::reconcile`] on the next reload or sale.

use std::collections::BTreeMap;

use crate::types::Tab;

/// Units of a product held in every tab except `exclude_tab_id`.
///
/// Passing an id that matches no tab (e.g. `""`) sums all tabs.
pub fn reserved_for(tabs: &[Tab], product_id: &str, exclude_tab_id: &str) -> i64 {
    tabs.iter()
        .filter(|tab| tab.id != exclude_tab_id)
        .map(|tab| tab.quantity_of(product_id).max(0))
        .sum()
}

/// Units the active tab may still add.
#[inline]
pub fn available_for(stock: i64, reserved: i64, qty_in_active: i64) -> i64 {
    (stock - reserved - qty_in_active).max(0)
}

/// Per-tab quantities of a product outside the excluded tab, in tab order.
pub fn breakdown<'a>(
    tabs: &'a [Tab],
    product_id: &'a str,
    exclude_tab_id: &'a str,
) -> impl Iterator<Item = (&'a Tab, i64)> + 'a {
    tabs.iter()
        .filter(move |tab| tab.id != exclude_tab_id)
        .map(move |tab| (tab, tab.quantity_of(product_id)))
        .filter(|(_, qty)| *qty > 0)
}

/// Hint shown next to a product when other tabs hold some of it.
///
/// Returns `None` when nothing is reserved.
///
/// ## Example
/// ```text
/// Reservado en otras pestañas: 4 (Pestaña 2: 3, Pestaña 5: 1)
/// ```
pub fn reservation_hint(tabs: &[Tab], product_id: &str, active_tab_id: &str) -> Option<String> {
    let parts: Vec<String> = breakdown(tabs, product_id, active_tab_id)
        .map(|(tab, qty)| format!("{}: {}", tab.name, qty))
        .collect();
    if parts.is_empty() {
        return None;
    }
    let total = reserved_for(tabs, product_id, active_tab_id);
    Some(format!(
        "Reservado en otras pestañas: {} ({})",
        total,
        parts.join(", ")
    ))
}

// =============================================================================
// Reservation Map
// =============================================================================

/// Product id → units reserved outside the active tab.
///
/// Rebuilt whenever the tabs or the active tab change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationMap {
    active_tab_id: String,
    reserved: BTreeMap<String, i64>,
}

impl ReservationMap {
    /// Sums every non-active tab's cart.
    pub fn build(tabs: &[Tab], active_tab_id: &str) -> Self {
        let mut reserved: BTreeMap<String, i64> = BTreeMap::new();
        for tab in tabs.iter().filter(|tab| tab.id != active_tab_id) {
            for line in &tab.cart {
                if line.quantity > 0 {
                    *reserved.entry(line.doc_id.clone()).or_insert(0) += line.quantity;
                }
            }
        }
        ReservationMap {
            active_tab_id: active_tab_id.to_string(),
            reserved,
        }
    }

    /// Tab the map was built for.
    pub fn active_tab_id(&self) -> &str {
        &self.active_tab_id
    }

    /// Reserved units for a product (0 when none).
    #[inline]
    pub fn get(&self, product_id: &str) -> i64 {
        self.reserved.get(product_id).copied().unwrap_or(0)
    }

    /// Units still addable given the stock and what the active tab holds.
    #[inline]
    pub fn available(&self, product_id: &str, stock: i64, qty_in_active: i64) -> i64 {
        available_for(stock, self.get(product_id), qty_in_active)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.reserved.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::ExchangeRates;
    use crate::types::LineItem;

    fn tab_with(id: &str, lines: &[(&str, i64)]) -> Tab {
        let rates = ExchangeRates::new(36.0, 40.0);
        let mut tab = Tab::new(id);
        for (pid, qty) in lines {
            tab.cart.push(LineItem::new(*pid, *pid, *qty, 1.0, rates));
        }
        tab
    }

    #[test]
    fn test_mutually_exclusive_tabs_both_capped() {
        // Tab 1 holds 5, tab 2 holds 3, stock is 6.
        let tabs = vec![tab_with("1", &[("P", 5)]), tab_with("2", &[("P", 3)])];

        let reserved_1 = reserved_for(&tabs, "P", "1");
        assert_eq!(reserved_1, 3);
        assert_eq!(available_for(6, reserved_1, 5), 0);

        let reserved_2 = reserved_for(&tabs, "P", "2");
        assert_eq!(reserved_2, 5);
        assert_eq!(available_for(6, reserved_2, 3), 0);

        // Total held exceeds stock; both tabs simply cannot grow.
        assert_eq!(reserved_for(&tabs, "P", ""), 8);
    }

    #[test]
    fn test_reservation_accounting_is_conservative() {
        let tabs = vec![
            tab_with("1", &[("P", 2), ("Q", 1)]),
            tab_with("2", &[("P", 4)]),
            tab_with("3", &[]),
            tab_with("4", &[("Q", 7), ("P", 1)]),
        ];
        for pid in ["P", "Q", "R"] {
            let direct: i64 = tabs.iter().map(|t| t.quantity_of(pid)).sum();
            assert_eq!(reserved_for(&tabs, pid, ""), direct);
            for tab in &tabs {
                assert_eq!(
                    reserved_for(&tabs, pid, &tab.id) + tab.quantity_of(pid),
                    direct
                );
            }
        }
    }

    #[test]
    fn test_available_never_negative() {
        assert_eq!(available_for(2, 5, 1), 0);
        assert_eq!(available_for(10, 3, 2), 5);
        assert_eq!(available_for(0, 0, 0), 0);
    }

    #[test]
    fn test_map_matches_reserved_for() {
        let tabs = vec![
            tab_with("1", &[("P", 2)]),
            tab_with("2", &[("P", 4), ("Q", 2)]),
            tab_with("3", &[("Q", 1)]),
        ];
        let map = ReservationMap::build(&tabs, "2");
        assert_eq!(map.active_tab_id(), "2");
        assert_eq!(map.get("P"), reserved_for(&tabs, "P", "2"));
        assert_eq!(map.get("Q"), 1);
        assert_eq!(map.get("Z"), 0);
        assert_eq!(map.available("P", 10, 4), 4);
    }

    #[test]
    fn test_hint_lists_other_tabs() {
        let tabs = vec![
            tab_with("1", &[("P", 1)]),
            tab_with("2", &[("P", 3)]),
            tab_with("5", &[("P", 1)]),
        ];
        assert_eq!(
            reservation_hint(&tabs, "P", "1").as_deref(),
            Some("Reservado en otras pestañas: 4 (Pestaña 2: 3, Pestaña 5: 1)")
        );
        assert_eq!(reservation_hint(&tabs, "Q", "1"), None);
    }
}
