//! # Currency Conversion Engine
//!
//! Converts a USD principal into the amounts a cashier actually collects in a
//! dual-currency (USD / Bolívar) store.
//!
//! ## The Two Rates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  USD principal ──(× paralelo)──► exact Bs ──(ceil, ceil to 10)──► Bs    │
//! │                                      │                                  │
//! │                                      └──(÷ bcv)──► adjusted USD         │
//! │                                                     │                   │
//! │                                     floor ◄─────────┴────► remainder×bcv│
//! │                                     usd_int                bs_decimals  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The parallel rate prices the goods; the BCV rate converts the Bs figure
//! back to the "adjusted USD" shown for mixed payments ("pay $11 and 4 Bs").
//!
//! ## Rounding Contract
//! - Bs is always rounded UP, first to the unit, then to the next multiple of 10.
//! - Every field is derived from the USD principal, never from another
//!   field's rounded value.
//! - Cart totals add the rounded per-line values; the cart-level USD sum is
//!   never converted on its own.
//!
//! ## Usage
//! ```rust
//! use tienda_core::currency::calculate_amounts;
//!
//! let amounts = calculate_amounts(10.0, 36.0, 40.0);
//! assert_eq!(amounts.bs, 400);
//! assert_eq!(amounts.usd_int, 11);
//! assert_eq!(amounts.bs_decimals, 4);
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::LineItem;

// =============================================================================
// Exchange Rates
// =============================================================================

/// The two independently configured exchange rates (Bs per USD).
///
/// Sourced from the singleton settings document. Zero or invalid values
/// disable conversion: amounts pass through with zero Bs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExchangeRates {
    /// Official central bank rate, used to compute adjusted USD.
    pub bcv: f64,
    /// Parallel market rate, used to price goods in Bs.
    pub paralelo: f64,
}

impl ExchangeRates {
    /// Creates a rate pair.
    #[inline]
    pub const fn new(bcv: f64, paralelo: f64) -> Self {
        ExchangeRates { bcv, paralelo }
    }

    /// Both rates are finite and strictly positive.
    #[inline]
    pub fn is_valid(&self) -> bool {
        valid_rate(self.bcv) && valid_rate(self.paralelo)
    }

    /// Converts a principal with these rates.
    #[inline]
    pub fn amounts(&self, amount_usd: f64) -> MoneyAmounts {
        calculate_amounts(amount_usd, self.bcv, self.paralelo)
    }
}

fn valid_rate(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

// =============================================================================
// Money Amounts
// =============================================================================

/// Derived, never stored as a source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MoneyAmounts {
    /// Bolívares to collect, a multiple of 10.
    pub bs: i64,
    /// Bs amount expressed back in USD through the BCV rate.
    pub usd_adjusted: f64,
    /// Whole-dollar part of `usd_adjusted`.
    pub usd_int: i64,
    /// Remainder of `usd_adjusted` expressed in Bs (rounded up).
    pub bs_decimals: i64,
}

impl MoneyAmounts {
    /// Conversion disabled: the principal passes through untouched.
    #[inline]
    pub const fn passthrough(amount_usd: f64) -> Self {
        MoneyAmounts {
            bs: 0,
            usd_adjusted: amount_usd,
            usd_int: 0,
            bs_decimals: 0,
        }
    }
}

/// Converts a USD principal into Bs and adjusted USD.
///
/// ## Algorithm
/// 1. `exact_bs = amount_usd × paralelo`
/// 2. `bs_ceil = ceil(exact_bs)`
/// 3. `bs = ceil(bs_ceil / 10) × 10`
/// 4. `usd_adjusted = exact_bs / bcv`
/// 5. `usd_int = floor(usd_adjusted)`, `bs_decimals = ceil((usd_adjusted - usd_int) × bcv)`
///
/// Any non-finite or non-positive input returns
/// [`MoneyAmounts::passthrough`].
///
/// ## Example
/// ```rust
/// use tienda_core::currency::{calculate_amounts, MoneyAmounts};
///
/// // Rates not configured yet
/// assert_eq!(calculate_amounts(5.0, 0.0, 40.0), MoneyAmounts::passthrough(5.0));
/// ```
pub fn calculate_amounts(amount_usd: f64, bcv_rate: f64, paralelo_rate: f64) -> MoneyAmounts {
    if !valid_rate(amount_usd) || !valid_rate(bcv_rate) || !valid_rate(paralelo_rate) {
        return MoneyAmounts::passthrough(amount_usd);
    }

    let exact_bs = amount_usd * paralelo_rate;
    let bs_ceil = exact_bs.ceil();
    let bs = (bs_ceil / 10.0).ceil() * 10.0;

    let usd_adjusted = exact_bs / bcv_rate;
    let usd_int = usd_adjusted.floor();
    let bs_decimals = ((usd_adjusted - usd_int) * bcv_rate).ceil();

    MoneyAmounts {
        bs: bs as i64,
        usd_adjusted,
        usd_int: usd_int as i64,
        bs_decimals: bs_decimals as i64,
    }
}

/// Splits an adjusted USD figure into whole dollars plus a Bs remainder.
///
/// Used for cart totals, where the adjusted figure is a sum of line values.
pub fn split_adjusted(usd_adjusted: f64, bcv_rate: f64) -> (i64, i64) {
    if !valid_rate(usd_adjusted) || !valid_rate(bcv_rate) {
        return (0, 0);
    }
    let usd_int = usd_adjusted.floor();
    let bs_decimals = ((usd_adjusted - usd_int) * bcv_rate).ceil();
    (usd_int as i64, bs_decimals as i64)
}

// =============================================================================
// Cart Totals
// =============================================================================

/// Totals for a cart, summed line by line.
///
/// ## Why Per-Line Sums?
/// ```text
/// Line A: $0.26 × 40 = 10.4 Bs → 20 Bs
/// Line B: $0.26 × 40 = 10.4 Bs → 20 Bs
///                                ─────
/// Collected at the till:         40 Bs   ✅ (sum of rounded lines)
/// Converting $0.52 once:         30 Bs   ❌ (not what the cashier charges)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    /// Number of distinct lines.
    pub line_count: usize,
    /// Units across all lines.
    pub total_quantity: i64,
    /// Σ principal × quantity.
    pub usd: f64,
    /// Σ line Bs × quantity.
    pub bs: i64,
    /// Σ line adjusted USD × quantity.
    pub usd_adjusted: f64,
    /// Whole-dollar part of the adjusted total.
    pub usd_int: i64,
    /// Bs remainder of the adjusted total.
    pub bs_decimals: i64,
}

impl CartTotals {
    /// Computes totals from line items, recomputing each line's amounts from
    /// its principal (or its verbatim adjusted figure).
    pub fn from_lines(lines: &[LineItem], rates: ExchangeRates) -> Self {
        let mut totals = CartTotals {
            line_count: lines.len(),
            ..CartTotals::default()
        };

        for line in lines {
            let unit = line.amounts(rates);
            totals.total_quantity += line.quantity;
            totals.usd += line.principal * line.quantity as f64;
            totals.bs += unit.bs * line.quantity;
            totals.usd_adjusted += unit.usd_adjusted * line.quantity as f64;
        }

        if rates.is_valid() {
            let (usd_int, bs_decimals) = split_adjusted(totals.usd_adjusted, rates.bcv);
            totals.usd_int = usd_int;
            totals.bs_decimals = bs_decimals;
        }

        totals
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
