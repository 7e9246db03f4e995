//! # Stock Reconciliation
//!
//! Fits cart quantities across all tabs into the stock that actually exists.
//! Used when a cached session is restored and after every committed sale.
//!
//! ## Distribution Order
//! ```text
//!   stock(P) = 5          desired            reconciled
//!   ┌─────────────┐       ┌──────┐           ┌──────┐
//!   │ Tab 3 (★)   │       │  4   │  ──1st──► │  4   │   remaining 1
//!   │ Tab 1       │       │  2   │  ──2nd──► │  1   │   remaining 0
//!   │ Tab 2       │       │  1   │  ──3rd──► │  0   │   line removed
//!   └─────────────┘       └──────┘           └──────┘
//! ```
//!
//! 1. The active tab is served first, capped at total stock.
//! 2. Other tabs follow in ascending tab-id order, each clamped to what is
//!    left.
//! 3. Lines that end at zero are removed.
//!
//! Only reductions happen; a tab never gains units here.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Tab;

/// One quantity change made by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub tab_id: String,
    pub tab_name: String,
    pub product_id: String,
    pub product_name: String,
    pub old_quantity: i64,
    pub new_quantity: i64,
}

impl fmt::Display for StockAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} · {}: {}→{}",
            self.tab_name, self.product_name, self.old_quantity, self.new_quantity
        )
    }
}

/// Renders adjustments as one message, one change per line.
pub fn describe_adjustments(adjustments: &[StockAdjustment]) -> Option<String> {
    if adjustments.is_empty() {
        return None;
    }
    let lines: Vec<String> = adjustments.iter().map(ToString::to_string).collect();
    Some(format!(
        "Cantidades ajustadas al stock disponible:\n{}",
        lines.join("\n")
    ))
}

/// Numeric order for "1".."9", falling back to string order.
fn tab_order(tab: &Tab) -> (u32, String) {
    (tab.id.parse().unwrap_or(u32::MAX), tab.id.clone())
}

/// Clamps every tab's quantities to the stock reported by `stock_of`.
///
/// `only` restricts the pass to a set of products (post-sale reconciliation
/// touches only what was sold). Returns the changes in application order.
pub fn reconcile_tabs<F>(
    tabs: &mut [Tab],
    active_tab_id: &str,
    stock_of: F,
    only: Option<&BTreeSet<String>>,
) -> Vec<StockAdjustment>
where
    F: Fn(&str) -> i64,
{
    let products: BTreeSet<String> = tabs
        .iter()
        .flat_map(|tab| tab.cart.iter().map(|line| line.doc_id.clone()))
        .filter(|pid| only.map_or(true, |set| set.contains(pid)))
        .collect();

    // Active first, then ascending id.
    let mut order: Vec<usize> = (0..tabs.len()).collect();
    order.sort_by_key(|&i| (tabs[i].id != active_tab_id, tab_order(&tabs[i])));

    let mut adjustments = Vec::new();

    for product_id in &products {
        let mut remaining = stock_of(product_id).max(0);

        for &index in &order {
            let tab = &mut tabs[index];
            let Some(line) = tab.line_mut(product_id) else {
                continue;
            };

            let desired = line.quantity.max(0);
            let granted = desired.min(remaining);
            remaining -= granted;

            if granted != line.quantity {
                let product_name = line.name.clone();
                line.quantity = granted;
                adjustments.push(StockAdjustment {
                    tab_id: tab.id.clone(),
                    tab_name: tab.name.clone(),
                    product_id: product_id.clone(),
                    product_name,
                    old_quantity: desired,
                    new_quantity: granted,
                });
            }
        }
    }

    for tab in tabs.iter_mut() {
        tab.cart.retain(|line| line.quantity > 0);
    }

    adjustments
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::ExchangeRates;
    use crate::reservation::reserved_for;
    use crate::types::LineItem;

    fn tab_with(id: &str, lines: &[(&str, i64)]) -> Tab {
        let rates = ExchangeRates::new(36.0, 40.0);
        let mut tab = Tab::new(id);
        for (pid, qty) in lines {
            tab.cart
                .push(LineItem::new(*pid, format!("Prod {}", pid), *qty, 1.0, rates));
        }
        tab
    }

    #[test]
    fn test_active_tab_served_first() {
        let mut tabs = vec![
            tab_with("1", &[("P", 2)]),
            tab_with("2", &[("P", 1)]),
            tab_with("3", &[("P", 4)]),
        ];
        let adjustments = reconcile_tabs(&mut tabs, "3", |_| 5, None);

        assert_eq!(tabs[2].quantity_of("P"), 4);
        assert_eq!(tabs[0].quantity_of("P"), 1);
        assert!(tabs[1].cart.is_empty());

        assert_eq!(adjustments.len(), 2);
        assert_eq!(adjustments[0].to_string(), "Pestaña 1 · Prod P: 2→1");
        assert_eq!(adjustments[1].to_string(), "Pestaña 2 · Prod P: 1→0");
    }

    #[test]
    fn test_active_capped_when_over_stock() {
        let mut tabs = vec![tab_with("1", &[("P", 3)]), tab_with("2", &[("P", 9)])];
        let adjustments = reconcile_tabs(&mut tabs, "2", |_| 4, None);

        assert_eq!(tabs[1].quantity_of("P"), 4);
        assert_eq!(tabs[0].quantity_of("P"), 0);
        assert!(tabs[0].cart.is_empty());
        assert_eq!(adjustments.len(), 2);
    }

    #[test]
    fn test_nothing_changes_when_stock_suffices() {
        let mut tabs = vec![tab_with("1", &[("P", 3), ("Q", 1)]), tab_with("2", &[("P", 2)])];
        let before = tabs.clone();
        let adjustments = reconcile_tabs(&mut tabs, "1", |_| 10, None);
        assert!(adjustments.is_empty());
        assert_eq!(tabs, before);
        assert_eq!(describe_adjustments(&adjustments), None);
    }

    #[test]
    fn test_filter_limits_products() {
        let mut tabs = vec![tab_with("1", &[("P", 3), ("Q", 3)])];
        let only: BTreeSet<String> = ["P".to_string()].into_iter().collect();
        let adjustments = reconcile_tabs(&mut tabs, "1", |_| 1, Some(&only));

        assert_eq!(adjustments.len(), 1);
        assert_eq!(tabs[0].quantity_of("P"), 1);
        assert_eq!(tabs[0].quantity_of("Q"), 3);
    }

    #[test]
    fn test_result_fits_stock() {
        let mut tabs = vec![
            tab_with("1", &[("P", 4), ("Q", 2)]),
            tab_with("2", &[("P", 4)]),
            tab_with("3", &[("Q", 6), ("P", 1)]),
        ];
        let stock = |pid: &str| if pid == "P" { 6 } else { 3 };
        reconcile_tabs(&mut tabs, "2", stock, None);
        for pid in ["P", "Q"] {
            assert!(reserved_for(&tabs, pid, "") <= stock(pid));
        }
    }

    #[test]
    fn test_ascending_numeric_order() {
        let mut tabs: Vec<Tab> = ["9", "10", "2"]
            .iter()
            .map(|id| tab_with(id, &[("P", 1)]))
            .collect();
        reconcile_tabs(&mut tabs, "none", |_| 2, None);
        assert_eq!(tabs[2].quantity_of("P"), 1); // "2"
        assert_eq!(tabs[0].quantity_of("P"), 1); // "9"
        assert_eq!(tabs[1].quantity_of("P"), 0); // "10"
    }
}
