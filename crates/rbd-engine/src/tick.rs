//! The per-tick decision pipeline.

use crate::invariants::{reconcile_invariants, InvariantChecks, InvariantReport};
use crate::state::EngineState;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rbd_allocator::{
    allocate_targets, map_targets, reverse_proxy_map, ExecutedTargets, MappingDiagnostics,
    ProxyMap,
};
use rbd_config::BotConfig;
use rbd_dislocation::{
    score_severity, step_lifecycle, DislocationSeverity, LifecycleInputs, Phase, PhaseControls,
    PhaseTransition, FLAG_EARLY_EXIT, FLAG_TIER_FORCED,
};
use rbd_features::{compute_features, FeatureSet, HistoryMap, QuoteMap};
use rbd_options::{arbitrate_options, vol_proxy_for_tier, OptionAction, OptionInputs, OptionSleeves};
use rbd_portfolio::{
    partition_capital, CapitalBudgets, CashEvent, CashEventKind, Flag, Micros, Order, Side,
    SleeveKind,
};
use rbd_rebalance::{
    plan_overlay, plan_rebalance, OverlayInputs, PlanStatus, RebalanceDiagnostics,
    RebalanceInputs, FLAG_INSUFFICIENT_CASH,
};
use rbd_regime::{
    confidence_bucket, derive_policy, derive_regimes, regime_key_value, ExposurePolicy,
    RegimeSnapshot,
};
use serde::Serialize;
use std::collections::BTreeMap;

const SECONDS_PER_WEEK: i64 = 604_800;

/// Deterministic week index of a timestamp (epoch weeks).
pub fn epoch_week(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(SECONDS_PER_WEEK)
}

/// Optional per-tick overrides for scripted scenarios.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioEvents {
    pub cash_infusion_usd: Option<f64>,
    pub forced_tier: Option<u8>,
    /// Symbol → forced long-lookback return.
    pub forced_returns: BTreeMap<String, f64>,
}

/// Inputs to one tick.
pub struct TickInputs<'a> {
    pub as_of: DateTime<Utc>,
    pub quotes: QuoteMap,
    pub history: HistoryMap,
    /// Allocation candidates, in order.  Proxies are not candidates.
    pub universe: Vec<String>,
    pub proxy_map: ProxyMap,
    pub prior_regimes: Option<RegimeSnapshot>,
    pub scenario: Option<ScenarioEvents>,
    pub config: &'a BotConfig,
}

/// The tick's diagnostics block.
#[derive(Clone, Debug, Serialize)]
pub struct TickDiagnostics {
    pub regimes: RegimeSnapshot,
    pub policy: ExposurePolicy,
    pub budgets: CapitalBudgets,
    pub mapping: MappingDiagnostics,
    pub severity: DislocationSeverity,
    pub phase: Phase,
    pub controls: PhaseControls,
    pub lifecycle_transitions: Vec<PhaseTransition>,
    pub rebalance: RebalanceDiagnostics,
    pub rebalance_status: PlanStatus,
    pub overlay_budget: Micros,
    pub option_actions: Vec<OptionAction>,
    pub flags: Vec<Flag>,
}

/// One tick's output.
#[derive(Clone, Debug, Serialize)]
pub struct TickResult {
    pub orders: Vec<Order>,
    pub cash_events: Vec<CashEvent>,
    pub diagnostics: TickDiagnostics,
    pub invariants: InvariantReport,
}

/// Run one tick: `(prior_state, inputs) → (next_state, TickResult)`.
///
/// Pure and atomic: business errors surface as flags and statuses; an `Err`
/// is structural (malformed inputs) and discards all computed state.
pub fn run_tick(prior: &EngineState, inputs: &TickInputs<'_>) -> Result<(EngineState, TickResult)> {
    let cfg = inputs.config;
    let now = inputs.as_of;
    let now_week = epoch_week(now);

    let mut state = prior.clone();
    let mut flags: Vec<Flag> = Vec::new();
    let mut cash_events: Vec<CashEvent> = Vec::new();
    let cash_before = state.portfolio.cash;

    // ── 1. Reconcile sleeves ──
    flags.extend(state.sleeves.reconcile(&state.portfolio, now));

    // ── 2. Infusions ──
    let mut infused = Micros::ZERO;
    if let Some(scenario) = &inputs.scenario {
        if let Some(usd) = scenario.cash_infusion_usd {
            let amount = Micros::from_dollars(usd);
            if amount.is_positive() {
                state.portfolio.cash += amount;
                infused = amount;
                cash_events.push(CashEvent::new(
                    CashEventKind::Infusion,
                    amount,
                    "scheduled cash infusion",
                ));
            }
        }
    }

    // ── 3. NAV & budgets ──
    let split_sum = cfg.capital.core_pct + cfg.capital.reserve_pct;
    if (split_sum - 1.0).abs() > 1e-9 {
        flags.push(
            Flag::warn(
                "CONFIG_CAPITAL_SPLIT",
                "core_pct + reserve_pct does not sum to 1; reserve takes the remainder",
            )
            .observed(format!("sum={split_sum}")),
        );
    }

    let prior_vol_proxy = vol_proxy_for_tier(state.lifecycle.current_tier);
    let options_mark_pre =
        total_option_mark(&state.option_sleeves, &inputs.quotes, prior_vol_proxy, now_week);
    let holdings_value = state.portfolio.market_value(&inputs.quotes);
    let nav_post = state.portfolio.cash + holdings_value + options_mark_pre;
    let nav_pre = nav_post - infused;
    let budgets = partition_capital(nav_pre, nav_post, cfg.capital.core_pct, cfg.min_cash_pct);

    // ── 4. Features, regimes, targets ──
    let mut feature_universe = inputs.universe.clone();
    for extra in [&cfg.dislocation.anchor_symbol, &cfg.rates_anchor_symbol] {
        if !feature_universe.contains(extra) {
            feature_universe.push(extra.clone());
        }
    }
    let mut features: FeatureSet =
        compute_features(&feature_universe, &inputs.history, &inputs.quotes);
    flags.append(&mut features.flags);

    if let Some(scenario) = &inputs.scenario {
        for (symbol, ret) in &scenario.forced_returns {
            if let Some(f) = features.features.get_mut(symbol) {
                f.ret_long = Some(*ret);
                flags.push(
                    Flag::info("SCENARIO_FORCED_RETURN", format!("{symbol}: return override"))
                        .observed(format!("ret_long={ret}")),
                );
            }
        }
    }

    let regimes = derive_regimes(
        features.feature(&cfg.dislocation.anchor_symbol),
        features.feature(&cfg.rates_anchor_symbol),
    );
    let policy = derive_policy(&regimes);

    let allocation = allocate_targets(
        &inputs.universe,
        &features,
        &regimes,
        &cfg.asset_classes,
        cfg.max_positions,
        cfg.max_position_pct,
    )
    .context("target allocation failed on structural input")?;

    // ── 5. Map universal targets to executable symbols ──
    let executed = map_targets(
        &allocation.weights,
        &inputs.quotes,
        &inputs.proxy_map,
        budgets.core_budget,
    );

    // ── 6. Severity ──
    let anchor_closes = anchor_series(
        &inputs.history,
        &inputs.quotes,
        &cfg.dislocation.anchor_symbol,
    );
    let mut severity = score_severity(&anchor_closes, &cfg.dislocation);
    if let Some(tier) = inputs.scenario.as_ref().and_then(|s| s.forced_tier) {
        severity = severity.with_forced_tier(tier, &cfg.dislocation);
        flags.push(
            Flag::info(FLAG_TIER_FORCED, "severity tier forced by scenario override")
                .observed(format!("tier={tier}")),
        );
    }

    // ── 7. Lifecycle ──
    let anchor_price = inputs
        .quotes
        .get(&cfg.dislocation.anchor_symbol)
        .copied()
        .or_else(|| anchor_closes.last().map(|c| Micros::from_dollars(*c)))
        .unwrap_or(Micros::ZERO);

    let lifecycle_outcome = step_lifecycle(
        &state.lifecycle,
        &LifecycleInputs {
            now,
            severity: &severity,
            regimes: &regimes,
            anchor_price,
            cfg: &cfg.dislocation,
        },
    );
    flags.extend(lifecycle_outcome.flags.clone());
    let rising_edge = lifecycle_outcome
        .transitions
        .iter()
        .any(|t| t.from == Phase::Inactive && t.to == Phase::Add);
    let early_exit = lifecycle_outcome
        .flags
        .iter()
        .any(|f| f.code == FLAG_EARLY_EXIT);
    state.lifecycle = lifecycle_outcome.state.clone();

    if lifecycle_outcome.transfer_due {
        for (symbol, qty) in state.sleeves.transfer_dislocation_to_base(now) {
            cash_events.push(
                CashEvent::new(
                    CashEventKind::ReintegrateTransfer,
                    Micros::ZERO,
                    format!("moved {qty} shares dislocation→base"),
                )
                .for_symbol(symbol)
                .in_sleeve(SleeveKind::Base),
            );
        }
    }

    // ── 8. Rebalance plan ──
    let regime_changed = detect_regime_change(
        inputs.prior_regimes.as_ref(),
        &regimes,
        &cfg.rebalance.regime_change_keys,
    );
    let reverse_proxies = reverse_proxy_map(&inputs.proxy_map);
    let plan = plan_rebalance(&RebalanceInputs {
        portfolio: &state.portfolio,
        sleeves: &state.sleeves,
        executed_weights: &executed.weights,
        quotes: &inputs.quotes,
        reverse_proxies: &reverse_proxies,
        nav: budgets.nav_post_infusion,
        core_budget: budgets.core_budget,
        sell_protected: lifecycle_outcome.controls.sell_protected,
        regime_changed,
        confidence: regimes.equity.confidence,
        cfg: &cfg.rebalance,
        max_notional_traded_pct_per_run: cfg.max_notional_traded_pct_per_run,
    });
    flags.extend(plan.flags.clone());

    let mut orders: Vec<Order> = Vec::new();

    // ── 9. Apply sells ──
    for order in plan.orders.iter().filter(|o| o.side == Side::Sell) {
        let Some(price) = inputs.quotes.get(&order.symbol).copied() else {
            continue;
        };
        state.portfolio.apply_sell(&order.symbol, order.qty, price);
        state.sleeves.record_sell(
            &order.symbol,
            order.qty,
            !lifecycle_outcome.controls.sell_protected,
            now,
        );
        cash_events.push(
            CashEvent::new(
                CashEventKind::SellCredit,
                order.est_notional,
                "rebalance sell",
            )
            .for_symbol(order.symbol.clone())
            .in_sleeve(order.sleeve),
        );
        orders.push(order.clone());
    }

    // ── 10. Overlay buys ──
    let invested_after_sells = state.portfolio.market_value(&inputs.quotes);
    let overlay = plan_overlay(&OverlayInputs {
        phase: state.lifecycle.phase,
        engaged: lifecycle_outcome.engaged,
        add_week_index: state.lifecycle.add_week_index(now),
        overlay_deployed: state.lifecycle.overlay_deployed,
        severity_overlay_pct: severity.overlay_extra_exposure_pct,
        nav: budgets.nav_post_infusion,
        cash: state.portfolio.cash,
        min_cash_floor: budgets.min_cash_floor,
        current_invested: invested_after_sells,
        exposure_cap: policy.base_exposure_cap,
        max_total_exposure_cap: cfg.dislocation.max_total_exposure_cap_pct,
        overlay_min_budget: Micros::from_dollars(cfg.dislocation.overlay_min_budget_usd),
        min_budget_policy: cfg.dislocation.overlay_min_budget_policy,
        targets: &executed.weights,
        quotes: &inputs.quotes,
        add_weeks: cfg.dislocation.duration_weeks_add,
        confidence: regimes.equity.confidence,
    });
    flags.extend(overlay.flags.clone());

    for order in &overlay.orders {
        let Some(price) = inputs.quotes.get(&order.symbol).copied() else {
            continue;
        };
        state.portfolio.apply_buy(&order.symbol, order.qty, price, now);
        state
            .sleeves
            .record_buy(&order.symbol, order.qty, SleeveKind::Dislocation, now);
        cash_events.push(
            CashEvent::new(CashEventKind::BuyDebit, -order.est_notional, "overlay buy")
                .for_symbol(order.symbol.clone())
                .in_sleeve(SleeveKind::Dislocation),
        );
        orders.push(order.clone());
    }
    state.lifecycle.overlay_deployed += overlay.spent();

    // ── 11. Apply base buys (re-clamped to remaining cash) ──
    for order in plan.orders.iter().filter(|o| o.side == Side::Buy) {
        let Some(price) = inputs.quotes.get(&order.symbol).copied() else {
            continue;
        };
        let mut qty = order.qty;
        let mut notional = order.est_notional;
        if notional > state.portfolio.cash {
            qty = state.portfolio.cash.whole_units(price);
            if qty == 0 {
                flags.push(
                    Flag::warn(
                        FLAG_INSUFFICIENT_CASH,
                        format!("{}: buy dropped after overlay spend", order.symbol),
                    )
                    .observed(format!("cash={}", state.portfolio.cash)),
                );
                continue;
            }
            notional = price.checked_mul_qty(qty).unwrap_or(Micros::ZERO);
        }
        state.portfolio.apply_buy(&order.symbol, qty, price, now);
        state
            .sleeves
            .record_buy(&order.symbol, qty, SleeveKind::Base, now);
        cash_events.push(
            CashEvent::new(CashEventKind::BuyDebit, -notional, "rebalance buy")
                .for_symbol(order.symbol.clone())
                .in_sleeve(SleeveKind::Base),
        );
        let mut applied = order.clone();
        applied.qty = qty;
        applied.est_notional = notional;
        orders.push(applied);
    }

    // ── 12. Option arbitration ──
    let (growth_symbol, growth_price) =
        growth_underlying(&executed, &inputs.quotes, &cfg.dislocation.anchor_symbol, anchor_price);
    let option_outcome = arbitrate_options(
        &state.option_sleeves,
        &OptionInputs {
            now,
            now_week,
            phase: state.lifecycle.phase,
            rising_edge,
            early_exit,
            regimes: &regimes,
            severity_tier: state.lifecycle.current_tier,
            anchor_symbol: &cfg.dislocation.anchor_symbol,
            anchor_price,
            growth_symbol: &growth_symbol,
            growth_price,
            nav: budgets.nav_post_infusion,
            reserve_budget: budgets.reserve_budget,
            insurance_cfg: &cfg.insurance,
            growth_cfg: &cfg.growth,
            insurance_mode: cfg.insurance_reserve_mode,
        },
    );
    state.option_sleeves = option_outcome.sleeves.clone();
    for event in &option_outcome.cash_events {
        state.portfolio.cash += event.amount;
    }
    cash_events.extend(option_outcome.cash_events.clone());
    flags.extend(option_outcome.flags.clone());

    // ── 13. Invariants ──
    let end_vol_proxy = vol_proxy_for_tier(state.lifecycle.current_tier);
    let options_mark_after =
        total_option_mark(&state.option_sleeves, &inputs.quotes, end_vol_proxy, now_week);
    let nav_after =
        state.portfolio.cash + state.portfolio.market_value(&inputs.quotes) + options_mark_after;
    let invariants = reconcile_invariants(&InvariantChecks {
        cash_before,
        portfolio: &state.portfolio,
        sleeves: &state.sleeves,
        option_sleeves: &state.option_sleeves,
        cash_events: &cash_events,
        orders: &orders,
        budgets: &budgets,
        nav_after,
        options_mark_reported: options_mark_after,
        options_mark_recomputed: total_option_mark(
            &state.option_sleeves,
            &inputs.quotes,
            end_vol_proxy,
            now_week,
        ),
    });

    let result = TickResult {
        orders,
        cash_events,
        diagnostics: TickDiagnostics {
            regimes,
            policy,
            budgets,
            mapping: executed.diagnostics.clone(),
            severity,
            phase: state.lifecycle.phase,
            controls: lifecycle_outcome.controls,
            lifecycle_transitions: lifecycle_outcome.transitions.clone(),
            rebalance: plan.diagnostics.clone(),
            rebalance_status: plan.status,
            overlay_budget: overlay.budget,
            option_actions: option_outcome.actions.clone(),
            flags,
        },
        invariants,
    };

    Ok((state, result))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The anchor's close series in dollars, with the live quote appended when
/// it extends the history.
fn anchor_series(history: &HistoryMap, quotes: &QuoteMap, anchor: &str) -> Vec<f64> {
    let mut closes: Vec<f64> = history
        .get(anchor)
        .map(|bars| bars.iter().map(|b| b.close.to_dollars()).collect())
        .unwrap_or_default();
    if let Some(quote) = quotes.get(anchor) {
        let q = quote.to_dollars();
        if closes.last().map(|last| (*last - q).abs() > 1e-9).unwrap_or(true) {
            closes.push(q);
        }
    }
    closes
}

/// Any configured regime key toggling, or an equity-confidence bucket
/// change, counts as a regime change.  The first tick (no prior snapshot)
/// never does.
fn detect_regime_change(
    prior: Option<&RegimeSnapshot>,
    current: &RegimeSnapshot,
    keys: &[String],
) -> bool {
    let Some(prior) = prior else {
        return false;
    };
    for key in keys {
        if regime_key_value(prior, key) != regime_key_value(current, key) {
            return true;
        }
    }
    confidence_bucket(prior.equity.confidence) != confidence_bucket(current.equity.confidence)
}

/// Growth CALL underlying: the highest-weight executed target (anchor as
/// the fallback).
fn growth_underlying(
    executed: &ExecutedTargets,
    quotes: &QuoteMap,
    anchor: &str,
    anchor_price: Micros,
) -> (String, Micros) {
    let top = executed
        .weights
        .iter()
        .max_by(|a, b| {
            a.1.partial_cmp(b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(a.0))
        })
        .map(|(s, _)| s.clone());

    match top {
        Some(symbol) => {
            let price = quotes.get(&symbol).copied().unwrap_or(Micros::ZERO);
            if price.is_positive() {
                (symbol, price)
            } else {
                (anchor.to_string(), anchor_price)
            }
        }
        None => (anchor.to_string(), anchor_price),
    }
}

/// Σ marks of open option positions, underlying prices resolved from
/// quotes (strike as the stale-quote fallback).
fn total_option_mark(
    sleeves: &OptionSleeves,
    quotes: &QuoteMap,
    vol_proxy: f64,
    now_week: i64,
) -> Micros {
    let mut total = Micros::ZERO;
    for position in [&sleeves.insurance.position, &sleeves.growth.position]
        .into_iter()
        .flatten()
    {
        let price = quotes
            .get(&position.underlying)
            .copied()
            .unwrap_or(position.strike);
        total += position.mark(price, vol_proxy, now_week);
    }
    total
}

// ---------------------------------------------------------------------------
// Tests (unit-level; end-to-end scenarios live in rbd-testkit)
// ---------------------------------------------------------------------------
