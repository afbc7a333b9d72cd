//! Scenario 5 — sell protection during ADD.
//!
//! Holdings `{QQQM: base=1, dislocation=2}` at the start of an ADD
//! episode; the rebalance wants to sell 2 shares.  Expected: the sell is
//! reduced to the single base share, the blocked remainder is flagged
//! with `blocked_qty=1`, and the sleeve invariant holds.

use chrono::{Duration, TimeZone, Utc};
use rbd_config::BotConfig;
use rbd_dislocation::{LifecycleState, Phase};
use rbd_engine::{run_tick, EngineState, ScenarioEvents, TickInputs};
use rbd_features::{HistoryBar, HistoryMap, QuoteMap};
use rbd_portfolio::{Micros, Side, SleeveKind};
use rbd_rebalance::FLAG_SELL_PROTECTION_APPLIED;
use rbd_testkit::fixtures::ramp;
use std::collections::BTreeMap;

fn as_of() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 21, 0, 0).unwrap()
}

fn weekly_bars(closes: &[f64], end: chrono::NaiveDate) -> Vec<HistoryBar> {
    let n = closes.len() as i64;
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            HistoryBar::new(
                end - Duration::weeks(n - 1 - i as i64),
                Micros::from_dollars(*c),
            )
        })
        .collect()
}

/// Mid-ADD engine state: 1 base + 2 dislocation QQQM shares.
fn seeded_state() -> EngineState {
    let cfg = BotConfig::default();
    let mut state = EngineState::bootstrap(&cfg);
    let opened = as_of() - Duration::weeks(1);

    state.portfolio.cash = Micros::from_whole_dollars(200);
    state
        .portfolio
        .apply_buy("QQQM", 3, Micros::from_dollars(160.0), opened);
    // apply_buy debited cash; restore the scenario's literal cash level.
    state.portfolio.cash = Micros::from_whole_dollars(200);

    state
        .sleeves
        .record_buy("QQQM", 1, SleeveKind::Base, opened);
    state
        .sleeves
        .record_buy("QQQM", 2, SleeveKind::Dislocation, opened);

    state.lifecycle = LifecycleState {
        phase: Phase::Add,
        triggered_at: Some(opened),
        add_until: Some(opened + Duration::weeks(3)),
        hold_until: Some(opened + Duration::weeks(13)),
        entry_anchor_price: Some(Micros::from_dollars(100.0)),
        trough_anchor_price: Some(Micros::from_dollars(95.0)),
        current_tier: 2,
        last_tier_change_at: Some(opened),
        ..LifecycleState::default()
    };

    state
}

fn tick_inputs(cfg: &BotConfig) -> TickInputs<'_> {
    let end = as_of().date_naive();
    let mut history = HistoryMap::new();
    // SPY strong, QQQM weak: capped weights make the QQQM target 1 share.
    history.insert("SPY".to_string(), weekly_bars(&ramp(100.0, 0.13, 26), end));
    history.insert("QQQM".to_string(), weekly_bars(&ramp(160.0, 0.07, 26), end));

    let mut quotes = QuoteMap::new();
    quotes.insert("SPY".to_string(), Micros::from_dollars(100.0));
    quotes.insert("QQQM".to_string(), Micros::from_dollars(160.0));

    TickInputs {
        as_of: as_of(),
        quotes,
        history,
        universe: vec!["SPY".to_string(), "QQQM".to_string()],
        proxy_map: BTreeMap::new(),
        prior_regimes: None,
        // Keep the episode engaged so ADD persists through this tick.
        scenario: Some(ScenarioEvents {
            forced_tier: Some(2),
            ..ScenarioEvents::default()
        }),
        config: cfg,
    }
}

#[test]
fn add_phase_sell_is_capped_at_the_base_sleeve() {
    let cfg = BotConfig::default();
    let state = seeded_state();
    let inputs = tick_inputs(&cfg);

    let (next, result) = run_tick(&state, &inputs).unwrap();

    assert!(result.invariants.ok, "{:?}", result.invariants.violations);
    assert_eq!(result.diagnostics.phase, Phase::Add);
    assert!(result.diagnostics.controls.sell_protected);

    // The sell was reduced from 2 to the 1 base share.
    let sell = result
        .orders
        .iter()
        .find(|o| o.symbol == "QQQM" && o.side == Side::Sell)
        .expect("QQQM sell");
    assert_eq!(sell.qty, 1);

    let flag = result
        .diagnostics
        .flags
        .iter()
        .find(|f| f.code == FLAG_SELL_PROTECTION_APPLIED)
        .expect("sell-protection flag");
    assert_eq!(flag.observed.as_deref(), Some("blocked_qty=1"));

    // Dislocation shares untouched; sleeve sums still reconcile.
    assert_eq!(next.sleeves.dislocation_qty("QQQM"), 2);
    assert_eq!(next.sleeves.base_qty("QQQM"), 0);
    assert_eq!(next.portfolio.qty("QQQM"), 2);
}

#[test]
fn without_protection_the_full_delta_sells() {
    let cfg = BotConfig::default();
    let mut state = seeded_state();
    // Same book, but no episode: INACTIVE means no protection.
    state.lifecycle = LifecycleState::default();

    let mut inputs = tick_inputs(&cfg);
    inputs.scenario = None;

    let (next, result) = run_tick(&state, &inputs).unwrap();

    assert!(result.invariants.ok);
    let sell = result
        .orders
        .iter()
        .find(|o| o.symbol == "QQQM" && o.side == Side::Sell)
        .expect("QQQM sell");
    assert_eq!(sell.qty, 2, "both excess shares sell without protection");
    assert_eq!(next.portfolio.qty("QQQM"), 1);
    assert_eq!(next.sleeves.dislocation_qty("QQQM"), 1);
    assert!(result
        .diagnostics
        .flags
        .iter()
        .all(|f| f.code != FLAG_SELL_PROTECTION_APPLIED));
}
