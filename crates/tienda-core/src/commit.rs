//! # Commit Plans
//!
//! Turns a confirmed tab into the exact mutation the ledger applies: relative
//! stock deltas plus one immutable history record. Building a plan is pure;
//! executing it belongs to `tienda-db`.
//!
//! ## Plan Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CommitPlan (op_id)                             │
//! │                                                                         │
//! │  deltas:   [ (inventory A, P1, -2), (inventory A, P7, -1) ]             │
//! │  record:   HistoryRecord { lines, totals, rates, business_id, ... }     │
//! │  customer: Some(CustomerRecord)   (sales with a national id only)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//!   Sale       source  -qty
//!   Purchase   target  +qty
//!   Transfer   source  -qty   destination +qty
//! ```
//!
//! Deltas are relative so concurrent writers never overwrite each other's
//! absolute quantities.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::{CartTotals, ExchangeRates};
use crate::error::{CoreError, CoreResult};
use crate::idempotency::{business_id, fingerprint, OperationKind};
use crate::types::{CustomerForm, LineItem, Product, Tab};
use crate::validation::normalize_national_id;

// =============================================================================
// Stock Delta
// =============================================================================

/// Relative change to one product's quantity in one inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDelta {
    pub inventory_id: String,
    pub product_id: String,
    pub product_name: String,
    pub delta: i64,
}

impl StockDelta {
    /// The delta that undoes this one.
    pub fn reversed(&self) -> StockDelta {
        StockDelta {
            delta: -self.delta,
            ..self.clone()
        }
    }
}

/// Folds lines into one delta per product, skipping empty lines.
fn deltas_for(lines: &[LineItem], inventory_id: &str, sign: i64) -> Vec<StockDelta> {
    let mut by_product: BTreeMap<&str, (String, i64)> = BTreeMap::new();
    for line in lines.iter().filter(|line| line.quantity > 0) {
        let entry = by_product
            .entry(line.doc_id.as_str())
            .or_insert_with(|| (line.name.clone(), 0));
        entry.1 += line.quantity;
    }
    by_product
        .into_iter()
        .map(|(product_id, (product_name, quantity))| StockDelta {
            inventory_id: inventory_id.to_string(),
            product_id: product_id.to_string(),
            product_name,
            delta: sign * quantity,
        })
        .collect()
}

// =============================================================================
// History Record
// =============================================================================

/// Immutable ledger entry keyed by op id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub op_id: String,
    pub kind: OperationKind,
    pub business_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_inventory_id: Option<String>,
    #[serde(default)]
    pub lines: Vec<LineItem>,
    #[serde(default)]
    pub totals: CartTotals,
    #[serde(default)]
    pub rates: ExchangeRates,
    /// Sales keep the full form, notes included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    /// Stock changes this record applied; refunds replay them inverted.
    #[serde(default)]
    pub deltas: Vec<StockDelta>,
    /// Catalog audit payload (product create/edit/delete).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    fn base(op_id: &str, kind: OperationKind, user_id: Option<&str>, now: DateTime<Utc>) -> Self {
        HistoryRecord {
            op_id: op_id.to_string(),
            kind,
            business_id: business_id(kind, op_id),
            created_at: now,
            user_id: user_id.map(str::to_string),
            inventory_id: None,
            destination_inventory_id: None,
            lines: Vec::new(),
            totals: CartTotals::default(),
            rates: ExchangeRates::default(),
            customer: None,
            payment_method: None,
            deltas: Vec::new(),
            details: None,
            refunded: false,
            refunded_at: None,
        }
    }

    /// Audit entry for a catalog change.
    pub fn product_audit(
        op_id: &str,
        kind: OperationKind,
        product: &Product,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        HistoryRecord {
            details: serde_json::to_value(product).ok(),
            ..HistoryRecord::base(op_id, kind, user_id, now)
        }
    }
}

// =============================================================================
// Customer Directory Record
// =============================================================================

/// Customer directory entry, merged by normalized national id.
///
/// Never carries notes or the payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    pub national_id: String,
    pub name: String,
    pub phone: String,
    pub address: String,
}

impl CustomerRecord {
    /// Directory entry for a form, if it has a usable national id.
    pub fn from_form(form: &CustomerForm) -> Option<Self> {
        let national_id = normalize_national_id(&form.id);
        if national_id.is_empty() {
            return None;
        }
        Some(CustomerRecord {
            national_id,
            name: form.name.trim().to_string(),
            phone: form.phone.trim().to_string(),
            address: form.address.trim().to_string(),
        })
    }
}

// =============================================================================
// Commit Plan
// =============================================================================

/// Everything one atomic ledger transaction writes.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitPlan {
    pub op_id: String,
    pub kind: OperationKind,
    pub deltas: Vec<StockDelta>,
    pub record: HistoryRecord,
    pub customer: Option<CustomerRecord>,
}

/// Ledger outcome. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// A record with this op id already exists; nothing was written.
    AlreadyApplied,
}

/// Inputs shared by every plan builder.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub op_id: &'a str,
    pub rates: ExchangeRates,
    pub user_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

fn require_lines(tab: &Tab) -> CoreResult<Vec<LineItem>> {
    let lines: Vec<LineItem> = tab
        .cart
        .iter()
        .filter(|line| line.quantity > 0)
        .cloned()
        .collect();
    if lines.is_empty() {
        return Err(CoreError::EmptyCart);
    }
    Ok(lines)
}

fn require_inventory(inventory_id: Option<&str>) -> CoreResult<&str> {
    match inventory_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(CoreError::NoInventorySelected),
    }
}

fn snapshot_lines(lines: &[LineItem], rates: ExchangeRates) -> Vec<LineItem> {
    lines
        .iter()
        .cloned()
        .map(|mut line| {
            line.recompute(rates);
            line
        })
        .collect()
}

/// Local checks for a sale, run before anything touches the store.
pub fn validate_sale(tab: &Tab, inventory_id: Option<&str>) -> CoreResult<()> {
    require_lines(tab)?;
    require_inventory(inventory_id)?;
    if tab
        .payment_method
        .as_deref()
        .map_or(true, |m| m.trim().is_empty())
    {
        return Err(CoreError::NoPaymentMethod);
    }
    Ok(())
}

/// Local checks for a purchase.
pub fn validate_purchase(tab: &Tab, inventory_id: Option<&str>) -> CoreResult<()> {
    require_lines(tab)?;
    require_inventory(inventory_id)?;
    Ok(())
}

/// Local checks for a transfer.
pub fn validate_transfer(
    tab: &Tab,
    from_inventory: Option<&str>,
    to_inventory: Option<&str>,
) -> CoreResult<()> {
    require_lines(tab)?;
    let from = require_inventory(from_inventory)?;
    let to = require_inventory(to_inventory)?;
    if from == to {
        return Err(CoreError::SameInventoryTransfer);
    }
    Ok(())
}

/// A sale without a national id needs an explicit confirmation.
pub fn require_customer(tab: &Tab, confirm_without_customer: bool) -> CoreResult<()> {
    let identified = tab
        .customer
        .as_ref()
        .map_or(false, |c| !normalize_national_id(&c.id).is_empty());
    if !identified && !confirm_without_customer {
        return Err(CoreError::CustomerConfirmationRequired);
    }
    Ok(())
}

/// Fails on the first line asking for more than `stock_of` reports.
///
/// ## Example
/// ```rust
/// use tienda_core::commit::check_stock;
/// use tienda_core::currency::ExchangeRates;
/// use tienda_core::types::LineItem;
///
/// let lines = vec![LineItem::new("P1", "P1", 2, 5.0, ExchangeRates::default())];
/// let err = check_stock(&lines, |_| 1).unwrap_err();
/// assert_eq!(err.to_string(), "Stock insuficiente para \"P1\". Solo quedan 1.");
/// ```
pub fn check_stock<F>(lines: &[LineItem], stock_of: F) -> CoreResult<()>
where
    F: Fn(&str) -> i64,
{
    for line in lines.iter().filter(|line| line.quantity > 0) {
        let available = stock_of(&line.doc_id).max(0);
        if line.quantity > available {
            return Err(CoreError::InsufficientStock {
                name: line.name.clone(),
                available,
                requested: line.quantity,
            });
        }
    }
    Ok(())
}

/// Builds a sale plan.
///
/// Without a national id the sale needs `confirm_without_customer`; the
/// customer directory is then left alone.
pub fn plan_sale(
    ctx: PlanContext<'_>,
    tab: &Tab,
    inventory_id: Option<&str>,
    confirm_without_customer: bool,
) -> CoreResult<CommitPlan> {
    validate_sale(tab, inventory_id)?;
    let lines = require_lines(tab)?;
    let inventory_id = require_inventory(inventory_id)?;

    require_customer(tab, confirm_without_customer)?;
    let customer = tab.customer.as_ref().and_then(CustomerRecord::from_form);

    let deltas = deltas_for(&lines, inventory_id, -1);
    let lines = snapshot_lines(&lines, ctx.rates);
    let record = HistoryRecord {
        inventory_id: Some(inventory_id.to_string()),
        totals: CartTotals::from_lines(&lines, ctx.rates),
        rates: ctx.rates,
        lines,
        customer: tab.customer.clone(),
        payment_method: tab.payment_method.clone(),
        deltas: deltas.clone(),
        ..HistoryRecord::base(ctx.op_id, OperationKind::Sale, ctx.user_id, ctx.now)
    };

    Ok(CommitPlan {
        op_id: ctx.op_id.to_string(),
        kind: OperationKind::Sale,
        deltas,
        record,
        customer,
    })
}

/// Builds a purchase plan (stock comes in).
pub fn plan_purchase(
    ctx: PlanContext<'_>,
    tab: &Tab,
    inventory_id: Option<&str>,
) -> CoreResult<CommitPlan> {
    let lines = require_lines(tab)?;
    let inventory_id = require_inventory(inventory_id)?;

    let deltas = deltas_for(&lines, inventory_id, 1);
    let lines = snapshot_lines(&lines, ctx.rates);
    let record = HistoryRecord {
        inventory_id: Some(inventory_id.to_string()),
        totals: CartTotals::from_lines(&lines, ctx.rates),
        rates: ctx.rates,
        lines,
        deltas: deltas.clone(),
        ..HistoryRecord::base(ctx.op_id, OperationKind::Purchase, ctx.user_id, ctx.now)
    };

    Ok(CommitPlan {
        op_id: ctx.op_id.to_string(),
        kind: OperationKind::Purchase,
        deltas,
        record,
        customer: None,
    })
}

/// Builds a transfer plan between two distinct inventories.
pub fn plan_transfer(
    ctx: PlanContext<'_>,
    tab: &Tab,
    from_inventory: Option<&str>,
    to_inventory: Option<&str>,
) -> CoreResult<CommitPlan> {
    let lines = require_lines(tab)?;
    let from = require_inventory(from_inventory)?;
    let to = require_inventory(to_inventory)?;
    if from == to {
        return Err(CoreError::SameInventoryTransfer);
    }

    let mut deltas = deltas_for(&lines, from, -1);
    deltas.extend(deltas_for(&lines, to, 1));
    let lines = snapshot_lines(&lines, ctx.rates);
    let record = HistoryRecord {
        inventory_id: Some(from.to_string()),
        destination_inventory_id: Some(to.to_string()),
        totals: CartTotals::from_lines(&lines, ctx.rates),
        rates: ctx.rates,
        lines,
        deltas: deltas.clone(),
        ..HistoryRecord::base(ctx.op_id, OperationKind::Transfer, ctx.user_id, ctx.now)
    };

    Ok(CommitPlan {
        op_id: ctx.op_id.to_string(),
        kind: OperationKind::Transfer,
        deltas,
        record,
        customer: None,
    })
}

// =============================================================================
// Drift
// =============================================================================

/// Cached and remote stock disagree for a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDrift {
    pub product_id: String,
    pub product_name: String,
    pub cached: i64,
    pub remote: i64,
}

impl fmt::Display for StockDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: local {}, servidor {}",
            self.product_name, self.cached, self.remote
        )
    }
}

/// Lines whose cached stock differs from the remote read.
pub fn detect_drift<C, R>(lines: &[LineItem], cached: C, remote: R) -> Vec<StockDrift>
where
    C: Fn(&str) -> i64,
    R: Fn(&str) -> i64,
{
    lines
        .iter()
        .filter_map(|line| {
            let cached = cached(&line.doc_id);
            let remote = remote(&line.doc_id);
            (cached != remote).then(|| StockDrift {
                product_id: line.doc_id.clone(),
                product_name: line.name.clone(),
                cached,
                remote,
            })
        })
        .collect()
}

// =============================================================================
// Tab Fingerprint
// =============================================================================

/// Content hash of what a confirm would write for `tab`. Cached amounts are
/// left out; they follow from the principal and the rates on the plan.
pub fn tab_fingerprint(tab: &Tab, inventory_id: &str, destination: Option<&str>) -> String {
    let lines: Vec<(&str, i64, f64, bool)> = tab
        .cart
        .iter()
        .filter(|line| line.quantity > 0)
        .map(|line| {
            (
                line.doc_id.as_str(),
                line.quantity,
                line.principal,
                line.custom_adjusted,
            )
        })
        .collect();
    fingerprint(&(
        lines,
        &tab.customer,
        &tab.payment_method,
        inventory_id,
        destination,
    ))
}

// =============================================================================
// Unit Tests
// =============================================================================
