//! Rebalance planning: holdings vs. executed target weights.

use rbd_config::RebalanceConfig;
use rbd_features::QuoteMap;
use rbd_portfolio::{Flag, Micros, Order, Portfolio, Side, SleeveIndex, SleeveKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FLAG_SELL_PROTECTION_APPLIED: &str = "SELL_PROTECTION_APPLIED";
pub const FLAG_INSUFFICIENT_CASH: &str = "REBALANCE_INSUFFICIENT_CASH";
pub const FLAG_MAX_NOTIONAL_CAPPED: &str = "MAX_NOTIONAL_TRADED_CAPPED";
pub const FLAG_MIN_TRADE_SKIPPED: &str = "MIN_TRADE_NOTIONAL_SKIPPED";

/// Tagged planner outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    /// Orders generated as demanded.
    Ok,
    /// Orders generated, but some buys were reduced or dropped.
    Partial,
    /// Drift below thresholds and no regime change; nothing to do.
    SkippedNoDrift,
    /// Drift gate passed but every delta was zero.
    SkippedNoChanges,
    /// Drift demanded action but no order could be generated.
    Unexecutable,
}

impl PlanStatus {
    pub fn is_blocking(self) -> bool {
        self == PlanStatus::Unexecutable
    }
}

/// Inputs to one rebalance planning run.
pub struct RebalanceInputs<'a> {
    pub portfolio: &'a Portfolio,
    pub sleeves: &'a SleeveIndex,
    /// Executed symbol → normalised target weight.
    pub executed_weights: &'a BTreeMap<String, f64>,
    pub quotes: &'a QuoteMap,
    /// Executed (proxy) symbol → universal parent, for grouping.
    pub reverse_proxies: &'a BTreeMap<String, String>,
    pub nav: Micros,
    pub core_budget: Micros,
    /// ADD/HOLD sell protection toggle from the lifecycle controls.
    pub sell_protected: bool,
    pub regime_changed: bool,
    /// Regime confidence, copied onto emitted orders.
    pub confidence: f64,
    pub cfg: &'a RebalanceConfig,
    pub max_notional_traded_pct_per_run: f64,
}

/// Drift bookkeeping surfaced in the tick diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebalanceDiagnostics {
    pub current_invested_pct: f64,
    pub target_invested_pct: f64,
    pub portfolio_drift: f64,
    pub max_position_drift: f64,
    pub regime_changed: bool,
    pub sells_notional: Micros,
    pub buys_notional: Micros,
    pub est_cash_after: Micros,
}

/// The plan: ordered sells-then-buys plus status, flags, diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub status: PlanStatus,
    pub orders: Vec<Order>,
    pub flags: Vec<Flag>,
    pub diagnostics: RebalanceDiagnostics,
}

struct PositionDiff {
    symbol: String,
    parent: String,
    price: Micros,
    current_qty: i64,
    target_qty: i64,
}

/// Produce the tick's rebalance plan.
///
/// Holdings are grouped by universal parent (proxies reverse-mapped); the
/// tradable vehicle for a parent is its executed target symbol, so a held
/// sibling proxy that is no longer the executed vehicle is consolidated
/// (sold) and the cash redeployed through the buy side.
///
/// Order of operations follows the contract: all sells are planned first,
/// estimated proceeds widen the buy budget, buys are clamped to available
/// cash, and the final list is sells-then-buys with same-symbol churn
/// netted out.
pub fn plan_rebalance(inputs: &RebalanceInputs<'_>) -> RebalancePlan {
    let cfg = inputs.cfg;
    let mut flags: Vec<Flag> = Vec::new();

    let diffs = build_diffs(inputs);

    // ── Drift gate ──
    // Target invested value uses the whole-share target quantities, not the
    // raw weight notionals: floor rounding must not register as permanent
    // drift.
    let nav = inputs.nav;
    let invested = inputs.portfolio.market_value(inputs.quotes);
    let current_invested_pct = ratio(invested, nav);
    let target_invested_pct = ratio(
        diffs
            .iter()
            .map(|d| d.price.checked_mul_qty(d.target_qty).unwrap_or(Micros::ZERO))
            .sum(),
        nav,
    );
    let portfolio_drift = (current_invested_pct - target_invested_pct).abs();

    let mut max_position_drift = 0.0_f64;
    for d in &diffs {
        let current_value = d.price.checked_mul_qty(d.current_qty).unwrap_or(Micros::ZERO);
        let target_value = d.price.checked_mul_qty(d.target_qty).unwrap_or(Micros::ZERO);
        let drift = (ratio(current_value, nav) - ratio(target_value, nav)).abs();
        max_position_drift = max_position_drift.max(drift);
    }

    let regime_forced = cfg.always_rebalance_on_regime_change && inputs.regime_changed;
    let drift_demands = portfolio_drift >= cfg.portfolio_drift_threshold
        || max_position_drift >= cfg.position_drift_threshold;

    let diagnostics = |sells, buys, cash_after| RebalanceDiagnostics {
        current_invested_pct,
        target_invested_pct,
        portfolio_drift,
        max_position_drift,
        regime_changed: inputs.regime_changed,
        sells_notional: sells,
        buys_notional: buys,
        est_cash_after: cash_after,
    };

    if !cfg.enabled || (!drift_demands && !regime_forced) {
        return RebalancePlan {
            status: PlanStatus::SkippedNoDrift,
            orders: Vec::new(),
            flags,
            diagnostics: diagnostics(Micros::ZERO, Micros::ZERO, inputs.portfolio.cash),
        };
    }

    if diffs.iter().all(|d| d.current_qty == d.target_qty) {
        return RebalancePlan {
            status: PlanStatus::SkippedNoChanges,
            orders: Vec::new(),
            flags,
            diagnostics: diagnostics(Micros::ZERO, Micros::ZERO, inputs.portfolio.cash),
        };
    }

    let min_trade = Micros::from_dollars(cfg.min_trade_notional_usd);
    let max_traded = nav.mul_f64(inputs.max_notional_traded_pct_per_run);
    let mut traded_notional = Micros::ZERO;

    // ── Sells ──
    let mut sells: Vec<Order> = Vec::new();
    let mut sells_notional = Micros::ZERO;
    let mut any_reduction = false;

    for d in diffs.iter().filter(|d| d.target_qty < d.current_qty) {
        let mut delta = d.current_qty - d.target_qty;

        if delta <= cfg.rebalance_dust_shares_threshold {
            continue;
        }

        if inputs.sell_protected {
            let sellable = inputs.sleeves.base_qty(&d.symbol).min(d.current_qty);
            let blocked = (delta - sellable).max(0);
            if blocked > 0 {
                flags.push(
                    Flag::warn(
                        FLAG_SELL_PROTECTION_APPLIED,
                        format!("{}: dislocation sleeve protected from sells", d.symbol),
                    )
                    .observed(format!("blocked_qty={blocked}")),
                );
                delta -= blocked;
                any_reduction = true;
            }
        }

        if delta <= 0 {
            continue;
        }
        let notional = match d.price.checked_mul_qty(delta) {
            Some(n) => n,
            None => continue,
        };
        if notional < min_trade {
            flags.push(
                Flag::info(
                    FLAG_MIN_TRADE_SKIPPED,
                    format!("{}: sell below minimum trade notional", d.symbol),
                )
                .observed(format!("notional={notional}")),
            );
            continue;
        }

        sells_notional += notional;
        traded_notional += notional;
        sells.push(
            Order::new(d.symbol.clone(), Side::Sell, delta, notional, SleeveKind::Base)
                .with_thesis(format!("reduce {} toward target weight", d.parent))
                .with_invalidation("position drift re-widens beyond threshold".to_string())
                .with_confidence(inputs.confidence),
        );
    }

    // ── Buys ──
    let mut cash_avail = inputs.portfolio.cash + sells_notional;
    let mut buys: Vec<Order> = Vec::new();
    let mut buys_notional = Micros::ZERO;

    for d in diffs.iter().filter(|d| d.target_qty > d.current_qty) {
        let mut delta = d.target_qty - d.current_qty;
        let mut notional = match d.price.checked_mul_qty(delta) {
            Some(n) => n,
            None => continue,
        };

        if notional < min_trade {
            flags.push(
                Flag::info(
                    FLAG_MIN_TRADE_SKIPPED,
                    format!("{}: buy below minimum trade notional", d.symbol),
                )
                .observed(format!("notional={notional}")),
            );
            continue;
        }

        if notional > cash_avail {
            delta = cash_avail.whole_units(d.price);
            if delta == 0 {
                flags.push(
                    Flag::warn(
                        FLAG_INSUFFICIENT_CASH,
                        format!("{}: no cash left for buy", d.symbol),
                    )
                    .observed(format!("cash_avail={cash_avail}")),
                );
                any_reduction = true;
                continue;
            }
            notional = d.price.checked_mul_qty(delta).unwrap_or(Micros::ZERO);
            any_reduction = true;
        }

        if traded_notional + notional > max_traded {
            flags.push(
                Flag::warn(
                    FLAG_MAX_NOTIONAL_CAPPED,
                    format!("{}: per-run traded-notional cap reached", d.symbol),
                )
                .observed(format!("cap={max_traded}")),
            );
            any_reduction = true;
            continue;
        }

        cash_avail -= notional;
        buys_notional += notional;
        traded_notional += notional;
        buys.push(
            Order::new(d.symbol.clone(), Side::Buy, delta, notional, SleeveKind::Base)
                .with_thesis(format!("build {} toward target weight", d.parent))
                .with_invalidation("regime flips or momentum decays".to_string())
                .with_confidence(inputs.confidence),
        );
    }

    let orders = net_orders(sells, buys);

    let status = if orders.is_empty() {
        PlanStatus::Unexecutable
    } else if any_reduction {
        PlanStatus::Partial
    } else {
        PlanStatus::Ok
    };

    RebalancePlan {
        status,
        orders,
        flags,
        diagnostics: diagnostics(sells_notional, buys_notional, cash_avail),
    }
}

/// Diff rows: one per executed target symbol plus one per held stray.
fn build_diffs(inputs: &RebalanceInputs<'_>) -> Vec<PositionDiff> {
    let parent_of = |symbol: &str| -> String {
        inputs
            .reverse_proxies
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string())
    };

    let mut diffs: Vec<PositionDiff> = Vec::new();

    for (symbol, weight) in inputs.executed_weights {
        let Some(price) = inputs.quotes.get(symbol).copied().filter(|p| p.is_positive()) else {
            continue;
        };
        let target_notional = inputs.core_budget.mul_f64(*weight);
        diffs.push(PositionDiff {
            symbol: symbol.clone(),
            parent: parent_of(symbol),
            price,
            current_qty: inputs.portfolio.qty(symbol),
            target_qty: target_notional.whole_units(price),
        });
    }

    // Held symbols with no executed target this tick unwind to zero.
    for (symbol, lot) in &inputs.portfolio.holdings {
        if inputs.executed_weights.contains_key(symbol) {
            continue;
        }
        let Some(price) = inputs.quotes.get(symbol).copied().filter(|p| p.is_positive()) else {
            continue;
        };
        diffs.push(PositionDiff {
            symbol: symbol.clone(),
            parent: parent_of(symbol),
            price,
            current_qty: lot.qty,
            target_qty: 0,
        });
    }

    diffs
}

/// Net same-symbol same-sleeve churn; sells stay ahead of buys.
fn net_orders(sells: Vec<Order>, buys: Vec<Order>) -> Vec<Order> {
    let mut net: BTreeMap<(String, SleeveKind), i64> = BTreeMap::new();
    let mut meta: BTreeMap<(String, SleeveKind), Order> = BTreeMap::new();

    for o in sells.into_iter().chain(buys.into_iter()) {
        let key = (o.symbol.clone(), o.sleeve);
        let signed = match o.side {
            Side::Buy => o.qty,
            Side::Sell => -o.qty,
        };
        *net.entry(key.clone()).or_insert(0) += signed;
        meta.entry(key).or_insert(o);
    }

    let mut out_sells: Vec<Order> = Vec::new();
    let mut out_buys: Vec<Order> = Vec::new();

    for (key, qty) in net {
        if qty == 0 {
            continue;
        }
        let template = &meta[&key];
        let abs_qty = qty.abs();
        let est_notional = template
            .est_notional
            .mul_f64(abs_qty as f64 / template.qty.max(1) as f64);
        let order = Order {
            symbol: key.0.clone(),
            side: if qty > 0 { Side::Buy } else { Side::Sell },
            qty: abs_qty,
            est_notional,
            sleeve: key.1,
            thesis: template.thesis.clone(),
            invalidation: template.invalidation.clone(),
            confidence: template.confidence,
        };
        if qty > 0 {
            out_buys.push(order);
        } else {
            out_sells.push(order);
        }
    }

    out_sells.into_iter().chain(out_buys).collect()
}

fn ratio(numerator: Micros, denominator: Micros) -> f64 {
    if denominator.is_positive() {
        numerator.to_dollars() / denominator.to_dollars()
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
