//! Scenario 6 — deep-drawdown failsafe.
//!
//! An episode entered at anchor 100 sees the anchor crash to 68 (inside
//! the 30% failsafe).  Expected: the phase jumps straight to REINTEGRATE
//! regardless of the time windows, the cooldown is set, and the insurance
//! PUT closes with an `OPT_CLOSE_CREDIT` equal to its current mark.

use chrono::{Duration, TimeZone, Utc};
use rbd_config::BotConfig;
use rbd_dislocation::{LifecycleState, Phase};
use rbd_engine::{epoch_week, run_tick, EngineState, TickInputs};
use rbd_features::{HistoryBar, HistoryMap, QuoteMap};
use rbd_options::{OptionKind, OptionPosition, SleeveState};
use rbd_portfolio::{CashEventKind, Micros, SleeveKind};
use std::collections::BTreeMap;

fn as_of() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 21, 0, 0).unwrap()
}

fn put_position(opened_weeks_ago: i64) -> OptionPosition {
    let opened_week = epoch_week(as_of()) - opened_weeks_ago;
    OptionPosition {
        kind: OptionKind::Put,
        underlying: "SPY".to_string(),
        strike: Micros::from_dollars(100.0),
        expiry_week: opened_week + 16,
        contracts: 2,
        premium_per_share: Micros::from_dollars(0.60),
        opened_week,
        open_at: as_of() - Duration::weeks(opened_weeks_ago),
    }
}

fn seeded_state() -> EngineState {
    let cfg = BotConfig::default();
    let opened = as_of() - Duration::weeks(2);
    let mut state = EngineState::bootstrap(&cfg);

    state.portfolio.cash = Micros::from_whole_dollars(500);
    state
        .portfolio
        .apply_buy("SPY", 4, Micros::from_dollars(95.0), opened);
    state.portfolio.cash = Micros::from_whole_dollars(500);
    state.sleeves.record_buy("SPY", 2, SleeveKind::Base, opened);
    state
        .sleeves
        .record_buy("SPY", 2, SleeveKind::Dislocation, opened);

    state.lifecycle = LifecycleState {
        phase: Phase::Add,
        triggered_at: Some(opened),
        add_until: Some(opened + Duration::weeks(3)),
        hold_until: Some(opened + Duration::weeks(13)),
        entry_anchor_price: Some(Micros::from_dollars(100.0)),
        trough_anchor_price: Some(Micros::from_dollars(88.0)),
        current_tier: 2,
        last_tier_change_at: Some(opened),
        ..LifecycleState::default()
    };

    state.option_sleeves.insurance.state = SleeveState::Deployed;
    state.option_sleeves.insurance.position = Some(put_position(2));
    state.option_sleeves.insurance_opened_this_episode = true;

    state
}

fn crash_inputs(cfg: &BotConfig) -> TickInputs<'_> {
    let end = as_of().date_naive();
    // 100-level plateau, then a violent three-week slide to 68.
    let mut closes: Vec<f64> = vec![100.0; 23];
    closes.extend([88.0, 76.0, 68.0]);
    let bars: Vec<HistoryBar> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            HistoryBar::new(
                end - Duration::weeks(25 - i as i64),
                Micros::from_dollars(*c),
            )
        })
        .collect();

    let mut history = HistoryMap::new();
    history.insert("SPY".to_string(), bars);
    let mut quotes = QuoteMap::new();
    quotes.insert("SPY".to_string(), Micros::from_dollars(68.0));

    TickInputs {
        as_of: as_of(),
        quotes,
        history,
        universe: vec!["SPY".to_string()],
        proxy_map: BTreeMap::new(),
        prior_regimes: None,
        scenario: None,
        config: cfg,
    }
}

#[test]
fn failsafe_breach_jumps_to_reintegrate_and_closes_insurance() {
    let cfg = BotConfig::default();
    let state = seeded_state();
    let position = state.option_sleeves.insurance.position.clone().unwrap();
    let inputs = crash_inputs(&cfg);

    let (next, result) = run_tick(&state, &inputs).unwrap();

    assert!(result.invariants.ok, "{:?}", result.invariants.violations);

    // 68 <= 100 × (1 − 0.3): immediate REINTEGRATE with cooldown.
    assert_eq!(result.diagnostics.phase, Phase::Reintegrate);
    assert_eq!(
        next.lifecycle.cooldown_until,
        Some(as_of() + Duration::weeks(2))
    );
    assert!(result
        .diagnostics
        .lifecycle_transitions
        .iter()
        .any(|t| t.from == Phase::Add && t.to == Phase::Reintegrate));

    // Dislocation shares transferred on the same tick.
    assert_eq!(next.sleeves.total_dislocation_qty(), 0);
    assert!(result
        .cash_events
        .iter()
        .any(|e| e.kind == CashEventKind::ReintegrateTransfer));

    // Insurance closed at its current model mark (deep ITM, tier 3 vol).
    assert!(!next.option_sleeves.insurance.is_deployed());
    let close = result
        .cash_events
        .iter()
        .find(|e| e.kind == CashEventKind::OptCloseCredit)
        .expect("insurance close credit");
    let expected_mark = position.mark(
        Micros::from_dollars(68.0),
        rbd_options::vol_proxy_for_tier(next.lifecycle.current_tier),
        epoch_week(as_of()),
    );
    assert_eq!(close.amount, expected_mark);
    assert!(close.amount.is_positive(), "deep ITM put has value");
}

#[test]
fn shallow_drawdown_does_not_trip_the_failsafe() {
    let cfg = BotConfig::default();
    let state = seeded_state();

    // A mild slide to 90: above the 70 failsafe line and nowhere near the
    // risk_off confidence trip wire.
    let end = as_of().date_naive();
    let mut closes: Vec<f64> = vec![100.0; 23];
    closes.extend([95.0, 92.0, 90.0]);
    let bars: Vec<HistoryBar> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            HistoryBar::new(
                end - Duration::weeks(25 - i as i64),
                Micros::from_dollars(*c),
            )
        })
        .collect();
    let mut inputs = crash_inputs(&cfg);
    inputs.history.insert("SPY".to_string(), bars);
    inputs
        .quotes
        .insert("SPY".to_string(), Micros::from_dollars(90.0));

    let (next, result) = run_tick(&state, &inputs).unwrap();

    assert!(result.invariants.ok);
    assert_ne!(result.diagnostics.phase, Phase::Reintegrate);
    assert!(next.option_sleeves.insurance.is_deployed());
}
