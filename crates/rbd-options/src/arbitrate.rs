//! The insurance/growth arbitrator.
//!
//! Decision order within a tick (insurance has priority for the reserve):
//! 1. Expiries (either sleeve, `ttm <= 0`) close at zero proceeds.
//! 2. A deployed growth CALL closes whenever its window condition fails
//!    (anything but calm risk-on with insurance inactive).
//! 3. The insurance PUT closes when the episode is over (lifecycle back to
//!    INACTIVE) or the early exit fired; it opens exactly once per episode
//!    on the rising-edge tick.
//! 4. The growth CALL may open only when risk_on ∧ lifecycle INACTIVE ∧
//!    insurance INACTIVE.
//!
//! Every open fits inside the remaining reserve or is skipped; the sleeve
//! never overdrafts.

use crate::types::{
    vol_proxy_for_tier, OptionKind, OptionPosition, OptionSleeves, SleeveState,
    CONTRACT_MULTIPLIER, KAPPA_GROWTH, KAPPA_INSURANCE,
};
use chrono::{DateTime, Utc};
use rbd_config::{InsuranceReserveMode, OptionSleeveConfig};
use rbd_dislocation::Phase;
use rbd_portfolio::{CashEvent, CashEventKind, Flag, Micros};
use rbd_regime::{EquityLabel, RegimeSnapshot};
use serde::{Deserialize, Serialize};

pub const FLAG_CONTRACTS_ROUND_TO_ZERO: &str = "CONTRACTS_ROUND_TO_ZERO";
pub const FLAG_RESERVE_EXCEEDED: &str = "OPTION_RESERVE_EXCEEDED";

/// Which sleeve an action touched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionSleeveId {
    Insurance,
    Growth,
}

/// What happened.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionActionKind {
    Open,
    Close,
    Expire,
}

/// One option action taken this tick, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionAction {
    pub sleeve: OptionSleeveId,
    pub kind: OptionActionKind,
    pub underlying: String,
    pub contracts: i64,
    /// Signed cash impact (debit negative, credit positive).
    pub cash_impact: Micros,
}

/// Inputs to one arbitration run.
pub struct OptionInputs<'a> {
    pub now: DateTime<Utc>,
    /// Deterministic week index of `now` (epoch weeks).
    pub now_week: i64,
    /// Lifecycle phase after this tick's transition.
    pub phase: Phase,
    /// True when the lifecycle entered ADD this tick (rising edge).
    pub rising_edge: bool,
    /// True when the lifecycle early-exited this tick.
    pub early_exit: bool,
    pub regimes: &'a RegimeSnapshot,
    pub severity_tier: u8,
    /// Anchor symbol + price: the insurance underlying.
    pub anchor_symbol: &'a str,
    pub anchor_price: Micros,
    /// Growth underlying (highest-weight executed target, anchor fallback).
    pub growth_symbol: &'a str,
    pub growth_price: Micros,
    pub nav: Micros,
    pub reserve_budget: Micros,
    pub insurance_cfg: &'a OptionSleeveConfig,
    pub growth_cfg: &'a OptionSleeveConfig,
    pub insurance_mode: InsuranceReserveMode,
}

/// The arbitration result: the next sleeves, the cash events, the actions.
#[derive(Clone, Debug, PartialEq)]
pub struct OptionOutcome {
    pub sleeves: OptionSleeves,
    pub actions: Vec<OptionAction>,
    pub cash_events: Vec<CashEvent>,
    pub flags: Vec<Flag>,
}

/// Arbitrate both sleeves for one tick.
pub fn arbitrate_options(sleeves: &OptionSleeves, inputs: &OptionInputs<'_>) -> OptionOutcome {
    let mut next = sleeves.clone();
    let mut actions: Vec<OptionAction> = Vec::new();
    let mut cash_events: Vec<CashEvent> = Vec::new();
    let mut flags: Vec<Flag> = Vec::new();

    let vol_proxy = vol_proxy_for_tier(inputs.severity_tier);

    // ── 1. Expiries ──
    expire_if_due(
        &mut next,
        OptionSleeveId::Insurance,
        inputs.now_week,
        &mut actions,
        &mut cash_events,
    );
    expire_if_due(
        &mut next,
        OptionSleeveId::Growth,
        inputs.now_week,
        &mut actions,
        &mut cash_events,
    );

    // ── 2. Growth close when its window condition fails ──
    let growth_window_open = inputs.regimes.equity.label == EquityLabel::RiskOn
        && inputs.phase == Phase::Inactive
        && !next.insurance.is_deployed();
    if next.growth.is_deployed() && !growth_window_open {
        close_sleeve(
            &mut next,
            OptionSleeveId::Growth,
            inputs.growth_price,
            vol_proxy,
            inputs.now_week,
            &mut actions,
            &mut cash_events,
        );
    }

    // ── 3. Insurance ──
    if next.insurance.is_deployed() {
        let episode_over = inputs.phase == Phase::Inactive;
        if episode_over || inputs.early_exit {
            close_sleeve(
                &mut next,
                OptionSleeveId::Insurance,
                inputs.anchor_price,
                vol_proxy,
                inputs.now_week,
                &mut actions,
                &mut cash_events,
            );
        }
    } else if inputs.rising_edge && !next.insurance_opened_this_episode {
        open_insurance(&mut next, inputs, vol_proxy, &mut actions, &mut cash_events, &mut flags);
    }

    // The once-per-episode latch releases when the lifecycle is INACTIVE.
    if inputs.phase == Phase::Inactive {
        next.insurance_opened_this_episode = false;
    }

    // ── 4. Growth open ──
    let growth_window_open_now = inputs.regimes.equity.label == EquityLabel::RiskOn
        && inputs.phase == Phase::Inactive
        && next.insurance.state == SleeveState::Inactive;
    if growth_window_open_now && next.growth.state == SleeveState::Inactive {
        open_growth(&mut next, inputs, vol_proxy, &mut actions, &mut cash_events, &mut flags);
    }

    OptionOutcome {
        sleeves: next,
        actions,
        cash_events,
        flags,
    }
}

fn sleeve_mut<'a>(sleeves: &'a mut OptionSleeves, id: OptionSleeveId) -> &'a mut crate::types::OptionSleeve {
    match id {
        OptionSleeveId::Insurance => &mut sleeves.insurance,
        OptionSleeveId::Growth => &mut sleeves.growth,
    }
}

fn expire_if_due(
    sleeves: &mut OptionSleeves,
    id: OptionSleeveId,
    now_week: i64,
    actions: &mut Vec<OptionAction>,
    cash_events: &mut Vec<CashEvent>,
) {
    let sleeve = sleeve_mut(sleeves, id);
    let Some(position) = sleeve.position.clone() else {
        return;
    };
    if position.ttm_weeks(now_week) > 0 {
        return;
    }

    sleeve.state = SleeveState::Inactive;
    sleeve.position = None;
    actions.push(OptionAction {
        sleeve: id,
        kind: OptionActionKind::Expire,
        underlying: position.underlying.clone(),
        contracts: position.contracts,
        cash_impact: Micros::ZERO,
    });
    cash_events.push(
        CashEvent::new(
            CashEventKind::OptExpire,
            Micros::ZERO,
            format!("{:?} expired worthless", position.kind),
        )
        .for_symbol(position.underlying),
    );
}

fn close_sleeve(
    sleeves: &mut OptionSleeves,
    id: OptionSleeveId,
    underlying_price: Micros,
    vol_proxy: f64,
    now_week: i64,
    actions: &mut Vec<OptionAction>,
    cash_events: &mut Vec<CashEvent>,
) {
    let sleeve = sleeve_mut(sleeves, id);
    let Some(position) = sleeve.position.clone() else {
        sleeve.state = SleeveState::Inactive;
        return;
    };

    let proceeds = position.mark(underlying_price, vol_proxy, now_week);

    sleeve.state = SleeveState::Inactive;
    sleeve.position = None;
    actions.push(OptionAction {
        sleeve: id,
        kind: OptionActionKind::Close,
        underlying: position.underlying.clone(),
        contracts: position.contracts,
        cash_impact: proceeds,
    });
    cash_events.push(
        CashEvent::new(
            CashEventKind::OptCloseCredit,
            proceeds,
            format!("close {:?} at mark", position.kind),
        )
        .for_symbol(position.underlying),
    );
}

fn open_insurance(
    sleeves: &mut OptionSleeves,
    inputs: &OptionInputs<'_>,
    vol_proxy: f64,
    actions: &mut Vec<OptionAction>,
    cash_events: &mut Vec<CashEvent>,
    flags: &mut Vec<Flag>,
) {
    let reserve_remaining = (inputs.reserve_budget - sleeves.reserve_used()).max(Micros::ZERO);

    let budget = match inputs.insurance_mode {
        InsuranceReserveMode::Light => inputs
            .nav
            .mul_f64(0.02)
            .min(inputs.reserve_budget.mul_f64(0.05))
            .min(Micros::from_whole_dollars(200))
            .min(reserve_remaining),
        InsuranceReserveMode::Full => {
            reserve_remaining.min(inputs.reserve_budget.mul_f64(inputs.insurance_cfg.spend_pct))
        }
    };

    open_position(
        sleeves,
        OptionSleeveId::Insurance,
        OptionKind::Put,
        inputs.anchor_symbol,
        inputs.anchor_price,
        KAPPA_INSURANCE,
        budget,
        reserve_remaining,
        inputs.insurance_cfg,
        inputs,
        vol_proxy,
        actions,
        cash_events,
        flags,
    );
    if sleeves.insurance.is_deployed() {
        sleeves.insurance_opened_this_episode = true;
    }
}

fn open_growth(
    sleeves: &mut OptionSleeves,
    inputs: &OptionInputs<'_>,
    vol_proxy: f64,
    actions: &mut Vec<OptionAction>,
    cash_events: &mut Vec<CashEvent>,
    flags: &mut Vec<Flag>,
) {
    let reserve_remaining = (inputs.reserve_budget - sleeves.reserve_used()).max(Micros::ZERO);
    let budget = reserve_remaining.min(inputs.reserve_budget.mul_f64(inputs.growth_cfg.spend_pct));

    open_position(
        sleeves,
        OptionSleeveId::Growth,
        OptionKind::Call,
        inputs.growth_symbol,
        inputs.growth_price,
        KAPPA_GROWTH,
        budget,
        reserve_remaining,
        inputs.growth_cfg,
        inputs,
        vol_proxy,
        actions,
        cash_events,
        flags,
    );
}

#[allow(clippy::too_many_arguments)]
fn open_position(
    sleeves: &mut OptionSleeves,
    id: OptionSleeveId,
    kind: OptionKind,
    underlying: &str,
    price: Micros,
    kappa: f64,
    budget: Micros,
    reserve_remaining: Micros,
    sleeve_cfg: &OptionSleeveConfig,
    inputs: &OptionInputs<'_>,
    vol_proxy: f64,
    actions: &mut Vec<OptionAction>,
    cash_events: &mut Vec<CashEvent>,
    flags: &mut Vec<Flag>,
) {
    if !price.is_positive() {
        return;
    }

    let premium_per_share = price.mul_f64(kappa * vol_proxy);
    let per_contract = premium_per_share
        .checked_mul_qty(CONTRACT_MULTIPLIER)
        .unwrap_or(Micros::MAX);
    let contracts = budget.whole_units(per_contract);

    if contracts < 1 {
        flags.push(
            Flag::warn(
                FLAG_CONTRACTS_ROUND_TO_ZERO,
                format!("{underlying}: budget fits no whole contract"),
            )
            .observed(format!("budget={budget} per_contract={per_contract}")),
        );
        return;
    }

    let position = OptionPosition {
        kind,
        underlying: underlying.to_string(),
        strike: price,
        expiry_week: inputs.now_week + tenor_weeks(sleeve_cfg),
        contracts,
        premium_per_share,
        opened_week: inputs.now_week,
        open_at: inputs.now,
    };

    let cost = position.cost();
    if cost > reserve_remaining {
        flags.push(
            Flag::error(
                FLAG_RESERVE_EXCEEDED,
                format!("{underlying}: premium would overdraft the reserve"),
            )
            .observed(format!("cost={cost} remaining={reserve_remaining}")),
        );
        return;
    }

    cash_events.push(
        CashEvent::new(CashEventKind::OptOpenDebit, -cost, format!("open {kind:?}"))
            .for_symbol(underlying.to_string()),
    );
    actions.push(OptionAction {
        sleeve: id,
        kind: OptionActionKind::Open,
        underlying: underlying.to_string(),
        contracts,
        cash_impact: -cost,
    });

    let sleeve = sleeve_mut(sleeves, id);
    sleeve.state = SleeveState::Deployed;
    sleeve.position = Some(position);
}

/// Tenor: the midpoint of the configured month band, four weeks per month.
fn tenor_weeks(cfg: &OptionSleeveConfig) -> i64 {
    (cfg.min_months + cfg.max_months) / 2 * 4
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
