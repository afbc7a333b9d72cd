use crate::fixedpoint::Micros;
use crate::MarkMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// The two capital sleeves a share can belong to.
///
/// `Base` shares follow the ordinary rebalance plan; `Dislocation` shares
/// were added by the overlay during a dislocation episode and are protected
/// from sells while the episode is in ADD/HOLD.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleeveKind {
    Base,
    Dislocation,
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// One aggregated lot per symbol.  `qty` is a whole-share count (>= 0);
/// `avg_price` is the volume-weighted average entry price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub symbol: String,
    pub qty: i64,
    pub avg_price: Micros,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

/// The portfolio: cash plus whole-share holdings, one lot per symbol.
///
/// Mutated only by the engine applying a tick's fills and cash events;
/// callers observe immutable snapshots between ticks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: Micros,
    pub holdings: BTreeMap<String, Lot>,
}

impl Portfolio {
    pub fn new(cash: Micros) -> Self {
        Self {
            cash,
            holdings: BTreeMap::new(),
        }
    }

    /// Share count held for `symbol` (0 if absent).
    pub fn qty(&self, symbol: &str) -> i64 {
        self.holdings.get(symbol).map(|l| l.qty).unwrap_or(0)
    }

    /// Market value of all holdings at the given marks.  Symbols without a
    /// mark contribute zero (they are also flagged upstream by the feature
    /// stage).
    pub fn market_value(&self, marks: &MarkMap) -> Micros {
        self.holdings
            .iter()
            .map(|(sym, lot)| {
                marks
                    .get(sym)
                    .and_then(|px| px.checked_mul_qty(lot.qty))
                    .unwrap_or(Micros::ZERO)
            })
            .sum()
    }

    /// Apply a buy fill: debit cash, fold the shares into the symbol's lot
    /// at a volume-weighted average price.
    pub fn apply_buy(&mut self, symbol: &str, qty: i64, price: Micros, at: DateTime<Utc>) {
        debug_assert!(qty > 0, "buy qty must be positive");
        let notional = price.checked_mul_qty(qty).unwrap_or(Micros::ZERO);
        self.cash -= notional;

        match self.holdings.get_mut(symbol) {
            Some(lot) => {
                let old_cost = lot.avg_price.checked_mul_qty(lot.qty).unwrap_or(Micros::ZERO);
                let new_qty = lot.qty + qty;
                lot.avg_price = Micros::new((old_cost + notional).raw() / new_qty.max(1));
                lot.qty = new_qty;
            }
            None => {
                self.holdings.insert(
                    symbol.to_string(),
                    Lot {
                        symbol: symbol.to_string(),
                        qty,
                        avg_price: price,
                        opened_at: Some(at),
                    },
                );
            }
        }
    }

    /// Apply a sell fill: credit cash, reduce the lot, drop it at zero.
    ///
    /// The fill is clamped to the held quantity; the planner never emits a
    /// sell beyond it, so a clamp firing indicates an upstream defect that
    /// the invariant reconciler will surface.
    pub fn apply_sell(&mut self, symbol: &str, qty: i64, price: Micros) {
        debug_assert!(qty > 0, "sell qty must be positive");
        let held = self.qty(symbol);
        let fill_qty = qty.min(held);
        if fill_qty == 0 {
            return;
        }
        let notional = price.checked_mul_qty(fill_qty).unwrap_or(Micros::ZERO);
        self.cash += notional;

        if let Some(lot) = self.holdings.get_mut(symbol) {
            lot.qty -= fill_qty;
            if lot.qty == 0 {
                self.holdings.remove(symbol);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cash events
// ---------------------------------------------------------------------------

/// The taxonomy of cash movements within one tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashEventKind {
    Infusion,
    BuyDebit,
    SellCredit,
    OptOpenDebit,
    OptCloseCredit,
    OptExpire,
    ReintegrateTransfer,
}

/// One signed cash movement, appended to the tick ledger.
///
/// The cash-conservation invariant requires that the sum of `amount` over a
/// tick's events equals the tick's cash delta exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashEvent {
    pub kind: CashEventKind,
    /// Signed amount: credits positive, debits negative.
    pub amount: Micros,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleeve: Option<SleeveKind>,
}

impl CashEvent {
    pub fn new(kind: CashEventKind, amount: Micros, reason: impl Into<String>) -> Self {
        Self {
            kind,
            amount,
            reason: reason.into(),
            symbol: None,
            sleeve: None,
        }
    }

    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn in_sleeve(mut self, sleeve: SleeveKind) -> Self {
        self.sleeve = Some(sleeve);
        self
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// A whole-share order produced by the rebalance or overlay planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: Side,
    /// Positive whole-share quantity.
    pub qty: i64,
    pub est_notional: Micros,
    pub sleeve: SleeveKind,
    pub thesis: String,
    pub invalidation: String,
    pub confidence: f64,
}

impl Order {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        qty: i64,
        est_notional: Micros,
        sleeve: SleeveKind,
    ) -> Self {
        debug_assert!(qty > 0, "Order.qty must be > 0");
        Self {
            symbol: symbol.into(),
            side,
            qty,
            est_notional,
            sleeve,
            thesis: String::new(),
            invalidation: String::new(),
            confidence: 0.5,
        }
    }

    pub fn with_thesis(mut self, thesis: impl Into<String>) -> Self {
        self.thesis = thesis.into();
        self
    }

    pub fn with_invalidation(mut self, invalidation: impl Into<String>) -> Self {
        self.invalidation = invalidation.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
