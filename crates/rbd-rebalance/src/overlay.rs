//! Overlay budget planning and whole-share allocation.
//!
//! The overlay adds opportunistic exposure during the ADD phase of a
//! dislocation episode.  The budget walks through a fixed ladder of gates
//! (phase, exposure caps, cash floor, pacing, min-budget policy, min-lot —
//! in that order) and the surviving budget is allocated to whole shares by
//! largest remainder.

use rbd_config::OverlayMinBudgetPolicy;
use rbd_dislocation::Phase;
use rbd_features::QuoteMap;
use rbd_portfolio::{Flag, Micros, Order, Side, SleeveKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FLAG_OVERLAY_DISABLED: &str = "OVERLAY_DISABLED_NOT_IN_ADD_PHASE";
pub const FLAG_OVERLAY_MIN_BUDGET: &str = "OVERLAY_SKIPPED_MIN_BUDGET";
pub const FLAG_OVERLAY_UNDER_MIN_LOT: &str = "OVERLAY_UNDER_MIN_LOT";
pub const FLAG_OVERLAY_PACING_LIMIT: &str = "OVERLAY_PACING_LIMIT";

/// Inputs to one overlay planning run.
pub struct OverlayInputs<'a> {
    pub phase: Phase,
    pub engaged: bool,
    /// 0-based add-week index since the trigger.
    pub add_week_index: i64,
    /// Cumulative overlay cash already deployed this episode.
    pub overlay_deployed: Micros,
    /// `overlay_extra_exposure_pct` of the current severity tier.
    pub severity_overlay_pct: f64,
    pub nav: Micros,
    pub cash: Micros,
    pub min_cash_floor: Micros,
    /// Current invested market value.
    pub current_invested: Micros,
    /// The regime policy's base exposure cap.
    pub exposure_cap: f64,
    pub max_total_exposure_cap: f64,
    pub overlay_min_budget: Micros,
    pub min_budget_policy: OverlayMinBudgetPolicy,
    /// Overlay targets: executed symbol → weight.
    pub targets: &'a BTreeMap<String, f64>,
    pub quotes: &'a QuoteMap,
    pub add_weeks: i64,
    /// Regime confidence, copied onto emitted orders.
    pub confidence: f64,
}

/// The planned overlay: budget bookkeeping plus whole-share buy orders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlayPlan {
    pub nominal: Micros,
    pub remaining_capacity: Micros,
    pub available_cash: Micros,
    pub budget: Micros,
    pub orders: Vec<Order>,
    pub flags: Vec<Flag>,
}

impl OverlayPlan {
    fn disabled(flag: Flag) -> Self {
        Self {
            nominal: Micros::ZERO,
            remaining_capacity: Micros::ZERO,
            available_cash: Micros::ZERO,
            budget: Micros::ZERO,
            orders: Vec::new(),
            flags: vec![flag],
        }
    }

    pub fn spent(&self) -> Micros {
        self.orders.iter().map(|o| o.est_notional).sum()
    }
}

/// Plan the tick's overlay budget and buys.
pub fn plan_overlay(inputs: &OverlayInputs<'_>) -> OverlayPlan {
    // ── Phase gate ──
    if inputs.phase != Phase::Add || !inputs.engaged {
        return OverlayPlan::disabled(
            Flag::info(
                FLAG_OVERLAY_DISABLED,
                "overlay buys only run during an engaged ADD phase",
            )
            .observed(format!("phase={:?} engaged={}", inputs.phase, inputs.engaged)),
        );
    }

    let mut flags: Vec<Flag> = Vec::new();

    let available_cash = (inputs.cash - inputs.min_cash_floor).max(Micros::ZERO);
    let nominal = inputs.nav.mul_f64(inputs.severity_overlay_pct);

    let allowed_invested = inputs
        .nav
        .mul_f64(inputs.max_total_exposure_cap.min(inputs.exposure_cap));
    let remaining_capacity = (allowed_invested - inputs.current_invested).max(Micros::ZERO);

    let mut budget = nominal.min(remaining_capacity).min(available_cash);

    // ── ADD-phase pacing: cumulative deployment ≤ (k+1)/W_add of nominal ──
    if inputs.add_weeks > 0 {
        let frac = ((inputs.add_week_index + 1) as f64 / inputs.add_weeks as f64).min(1.0);
        let cumulative_cap = nominal.mul_f64(frac);
        let headroom = (cumulative_cap - inputs.overlay_deployed).max(Micros::ZERO);
        if budget > headroom {
            flags.push(
                Flag::info(FLAG_OVERLAY_PACING_LIMIT, "overlay budget paced over the add window")
                    .observed(format!(
                        "week={} cap={} deployed={}",
                        inputs.add_week_index, cumulative_cap, inputs.overlay_deployed
                    )),
            );
            budget = headroom;
        }
    }

    // ── Min-budget policy (checked before min-lot) ──
    if budget.is_positive() && budget < inputs.overlay_min_budget {
        match inputs.min_budget_policy {
            OverlayMinBudgetPolicy::Gate => {
                flags.push(
                    Flag::warn(FLAG_OVERLAY_MIN_BUDGET, "overlay budget below minimum; gated")
                        .observed(format!("budget={budget}")),
                );
                budget = Micros::ZERO;
            }
            OverlayMinBudgetPolicy::Warn => {
                flags.push(
                    Flag::info(FLAG_OVERLAY_MIN_BUDGET, "overlay budget below minimum; kept")
                        .observed(format!("budget={budget}")),
                );
            }
        }
    }

    // ── Min-lot: the budget must afford the cheapest overlay symbol ──
    if budget.is_positive() {
        let cheapest = inputs
            .targets
            .keys()
            .filter_map(|sym| inputs.quotes.get(sym).copied().filter(|p| p.is_positive()))
            .min();
        match cheapest {
            Some(px) if budget >= px => {}
            _ => {
                flags.push(
                    Flag::warn(FLAG_OVERLAY_UNDER_MIN_LOT, "overlay budget under the cheapest lot")
                        .observed(format!("budget={budget}")),
                );
                budget = Micros::ZERO;
            }
        }
    }

    let orders = if budget.is_positive() {
        allocate_whole_shares(budget, inputs.targets, inputs.quotes, inputs.confidence)
    } else {
        Vec::new()
    };

    OverlayPlan {
        nominal,
        remaining_capacity,
        available_cash,
        budget,
        orders,
        flags,
    }
}

/// Largest-remainder whole-share allocation.
///
/// Integer shares from each symbol's desired notional first; the leftover
/// is then handed out one share at a time to the symbol with the greatest
/// fractional remainder whose price still fits, until no symbol qualifies.
fn allocate_whole_shares(
    budget: Micros,
    targets: &BTreeMap<String, f64>,
    quotes: &QuoteMap,
    confidence: f64,
) -> Vec<Order> {
    struct Alloc {
        symbol: String,
        price: Micros,
        shares: i64,
        remainder: f64,
    }

    let mut allocs: Vec<Alloc> = Vec::new();
    let mut leftover = budget;

    for (symbol, weight) in targets {
        let Some(price) = quotes.get(symbol).copied().filter(|p| p.is_positive()) else {
            continue;
        };
        let desired = budget.mul_f64(*weight);
        let shares = desired.whole_units(price);
        let spent = price.checked_mul_qty(shares).unwrap_or(Micros::ZERO);
        leftover -= spent;
        let remainder = desired.to_dollars() / price.to_dollars() - shares as f64;
        allocs.push(Alloc {
            symbol: symbol.clone(),
            price,
            shares,
            remainder,
        });
    }

    // Hand out the leftover by largest remainder (symbol order as the
    // deterministic tie-break, via stable max selection).
    loop {
        let candidate = allocs
            .iter_mut()
            .filter(|a| a.price <= leftover)
            .max_by(|a, b| {
                a.remainder
                    .partial_cmp(&b.remainder)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.symbol.cmp(&a.symbol))
            });
        match candidate {
            Some(a) => {
                a.shares += 1;
                a.remainder -= 1.0;
                leftover -= a.price;
            }
            None => break,
        }
    }

    allocs
        .into_iter()
        .filter(|a| a.shares > 0)
        .map(|a| {
            let notional = a.price.checked_mul_qty(a.shares).unwrap_or(Micros::ZERO);
            Order::new(a.symbol, Side::Buy, a.shares, notional, SleeveKind::Dislocation)
                .with_thesis("add dislocation exposure into drawdown".to_string())
                .with_invalidation("episode exits or anchor breaches failsafe".to_string())
                .with_confidence(confidence)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
