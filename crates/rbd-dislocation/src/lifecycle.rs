//! Sleeve lifecycle state machine.
//!
//! # States and controls
//!
//! | Phase        | allow_add | sell_protected | allow_reintegration | active |
//! |--------------|-----------|----------------|---------------------|--------|
//! | INACTIVE     | no        | no             | no                  | no     |
//! | ADD          | yes       | yes            | no                  | yes    |
//! | HOLD         | no        | yes            | no                  | yes    |
//! | REINTEGRATE  | no        | no             | yes                 | yes    |
//!
//! # Transitions (per tick)
//!
//! - INACTIVE + engaged (rising edge) → ADD; deadlines and anchor prices
//!   recorded.
//! - ADD → HOLD when the add window elapses or engagement drops.
//! - HOLD → REINTEGRATE when the hold window elapses.
//! - REINTEGRATE → INACTIVE after two REINTEGRATE ticks; the sleeve's
//!   dislocation shares transfer to base on the *first* REINTEGRATE tick
//!   (`transfer_due`).
//! - Early exit from ADD/HOLD (confident risk_off, or the anchor breaching
//!   the deep-drawdown failsafe) jumps straight to REINTEGRATE and starts
//!   the cooldown.
//! - Re-entry from REINTEGRATE is forbidden: an engagement signal there is
//!   flagged and ignored until INACTIVE is reached.
//!
//! Tier tracking applies hysteresis (a decrease within `tier_hysteresis_pct`
//! of the previous tier's threshold is held) and a minimum dwell between
//! tier changes.
//!
//! All logic is pure deterministic — no IO, no clock, no randomness.

use crate::severity::DislocationSeverity;
use chrono::{DateTime, Duration, Utc};
use rbd_config::DislocationConfig;
use rbd_portfolio::{Flag, Micros};
use rbd_regime::{EquityLabel, RegimeSnapshot};
use serde::{Deserialize, Serialize};

pub const FLAG_DISLOCATION_STATE_INVARIANT: &str = "DISLOCATION_STATE_INVARIANT";
pub const FLAG_DISLOCATION_TRIGGER_IGNORED: &str = "DISLOCATION_TRIGGER_IGNORED";
pub const FLAG_EARLY_EXIT: &str = "DISLOCATION_EARLY_EXIT";

// ---------------------------------------------------------------------------
// Phase & controls
// ---------------------------------------------------------------------------

/// Lifecycle phase.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    #[serde(rename = "INACTIVE")]
    Inactive,
    #[serde(rename = "ADD")]
    Add,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "REINTEGRATE")]
    Reintegrate,
}

/// The controls each phase implies, consumed by the rebalance and overlay
/// planners.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseControls {
    pub allow_add: bool,
    pub sell_protected: bool,
    pub allow_reintegration: bool,
    pub active: bool,
}

/// Pure derived-controls function.
pub const fn derived_controls(phase: Phase) -> PhaseControls {
    match phase {
        Phase::Inactive => PhaseControls {
            allow_add: false,
            sell_protected: false,
            allow_reintegration: false,
            active: false,
        },
        Phase::Add => PhaseControls {
            allow_add: true,
            sell_protected: true,
            allow_reintegration: false,
            active: true,
        },
        Phase::Hold => PhaseControls {
            allow_add: false,
            sell_protected: true,
            allow_reintegration: false,
            active: true,
        },
        Phase::Reintegrate => PhaseControls {
            allow_add: false,
            sell_protected: false,
            allow_reintegration: true,
            active: true,
        },
    }
}

/// The canonical `(phase, controls)` table the derived function is asserted
/// against every tick.
const CONTROLS_TABLE: [(Phase, PhaseControls); 4] = [
    (Phase::Inactive, derived_controls(Phase::Inactive)),
    (Phase::Add, derived_controls(Phase::Add)),
    (Phase::Hold, derived_controls(Phase::Hold)),
    (Phase::Reintegrate, derived_controls(Phase::Reintegrate)),
];

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Long-lived lifecycle state, persisted between ticks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleState {
    pub phase: Phase,
    pub triggered_at: Option<DateTime<Utc>>,
    pub add_until: Option<DateTime<Utc>>,
    pub hold_until: Option<DateTime<Utc>>,
    /// Ticks spent in REINTEGRATE (1 on the transfer tick).
    pub reintegrate_ticks: u32,
    pub entry_anchor_price: Option<Micros>,
    pub trough_anchor_price: Option<Micros>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub current_tier: u8,
    pub last_tier_change_at: Option<DateTime<Utc>>,
    /// Cumulative overlay cash deployed this episode (pacing input).
    pub overlay_deployed: Micros,
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(until) if now < until)
    }

    /// 0-based add-week index since the trigger (pacing input).
    pub fn add_week_index(&self, now: DateTime<Utc>) -> i64 {
        match self.triggered_at {
            Some(t0) => ((now - t0).num_days() / 7).max(0),
            None => 0,
        }
    }

    fn reset_episode(&mut self) {
        self.triggered_at = None;
        self.add_until = None;
        self.hold_until = None;
        self.reintegrate_ticks = 0;
        self.entry_anchor_price = None;
        self.trough_anchor_price = None;
        self.overlay_deployed = Micros::ZERO;
    }
}

// ---------------------------------------------------------------------------
// Step inputs & outcome
// ---------------------------------------------------------------------------

/// Inputs to one lifecycle step.
pub struct LifecycleInputs<'a> {
    pub now: DateTime<Utc>,
    pub severity: &'a DislocationSeverity,
    pub regimes: &'a RegimeSnapshot,
    pub anchor_price: Micros,
    pub cfg: &'a DislocationConfig,
}

/// One recorded transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
}

/// The result of stepping the machine.
#[derive(Clone, Debug, PartialEq)]
pub struct LifecycleOutcome {
    pub state: LifecycleState,
    pub controls: PhaseControls,
    /// Effective engagement after hysteresis, dwell, and cooldown.
    pub engaged: bool,
    /// True on the first REINTEGRATE tick: the engine must atomically move
    /// dislocation shares to base before planning sells.
    pub transfer_due: bool,
    pub transitions: Vec<PhaseTransition>,
    pub flags: Vec<Flag>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Advance the lifecycle by one tick.
pub fn step_lifecycle(state: &LifecycleState, inputs: &LifecycleInputs<'_>) -> LifecycleOutcome {
    let cfg = inputs.cfg;
    let now = inputs.now;
    let mut next = state.clone();
    let mut flags: Vec<Flag> = Vec::new();
    let mut transitions: Vec<PhaseTransition> = Vec::new();
    let mut transfer_due = false;

    // ── 1. Effective tier: hysteresis on decreases, dwell on any change ──
    let mut tier = inputs.severity.tier;

    if tier < state.current_tier {
        let prev_threshold = cfg
            .tiers
            .iter()
            .find(|t| t.tier == state.current_tier)
            .map(|t| t.threshold)
            .unwrap_or(0.0);
        if inputs.severity.metrics.peak_dd >= prev_threshold - cfg.tier_hysteresis_pct {
            tier = state.current_tier;
        }
    }

    if tier != state.current_tier {
        if let Some(last) = state.last_tier_change_at {
            if now < last + Duration::weeks(cfg.min_weeks_between_tier_changes) {
                tier = state.current_tier;
            }
        }
    }

    if tier != state.current_tier {
        next.current_tier = tier;
        next.last_tier_change_at = Some(now);
    }

    let tier_engaged = tier >= cfg.min_active_tier;
    let engaged = cfg.enabled && tier_engaged && !state.in_cooldown(now);

    if tier_engaged && state.in_cooldown(now) {
        flags.push(
            Flag::info(
                FLAG_DISLOCATION_TRIGGER_IGNORED,
                "engagement signal during cooldown ignored",
            )
            .observed(format!("tier={tier}")),
        );
    }

    // ── 2. Trough tracking during an episode ──
    if state.phase != Phase::Inactive {
        next.trough_anchor_price = Some(match state.trough_anchor_price {
            Some(trough) => trough.min(inputs.anchor_price),
            None => inputs.anchor_price,
        });
    }

    // ── 3. Early exit from ADD/HOLD ──
    let early_exit_reason = early_exit_reason(state, inputs);
    if matches!(state.phase, Phase::Add | Phase::Hold) {
        if let Some(reason) = early_exit_reason {
            next.phase = Phase::Reintegrate;
            next.reintegrate_ticks = 1;
            next.cooldown_until = Some(now + Duration::weeks(cfg.cooldown_weeks));
            transfer_due = true;
            transitions.push(PhaseTransition {
                from: state.phase,
                to: Phase::Reintegrate,
                reason: reason.clone(),
            });
            flags.push(Flag::warn(FLAG_EARLY_EXIT, reason));
            return finish(next, engaged, transfer_due, transitions, flags);
        }
    }

    // ── 4. Normal transitions ──
    match state.phase {
        Phase::Inactive => {
            if engaged {
                next.phase = Phase::Add;
                next.triggered_at = Some(now);
                next.add_until = Some(now + Duration::weeks(cfg.duration_weeks_add));
                next.hold_until =
                    Some(now + Duration::weeks(cfg.duration_weeks_add + cfg.duration_weeks_hold));
                next.entry_anchor_price = Some(inputs.anchor_price);
                next.trough_anchor_price = Some(inputs.anchor_price);
                next.reintegrate_ticks = 0;
                next.overlay_deployed = Micros::ZERO;
                transitions.push(PhaseTransition {
                    from: Phase::Inactive,
                    to: Phase::Add,
                    reason: format!("rising edge at tier {tier}"),
                });
            }
        }
        Phase::Add => {
            // Deadlines are exclusive: the tick landing exactly on the
            // deadline already belongs to the next phase.
            let window_elapsed = matches!(state.add_until, Some(until) if now >= until);
            if window_elapsed || !engaged {
                next.phase = Phase::Hold;
                transitions.push(PhaseTransition {
                    from: Phase::Add,
                    to: Phase::Hold,
                    reason: if window_elapsed {
                        "add window elapsed".to_string()
                    } else {
                        "engagement dropped".to_string()
                    },
                });
            }
        }
        Phase::Hold => {
            if matches!(state.hold_until, Some(until) if now >= until) {
                next.phase = Phase::Reintegrate;
                next.reintegrate_ticks = 1;
                transfer_due = true;
                transitions.push(PhaseTransition {
                    from: Phase::Hold,
                    to: Phase::Reintegrate,
                    reason: "hold window elapsed".to_string(),
                });
            }
        }
        Phase::Reintegrate => {
            if tier_engaged {
                flags.push(
                    Flag::info(
                        FLAG_DISLOCATION_TRIGGER_IGNORED,
                        "re-entry from REINTEGRATE is forbidden until INACTIVE",
                    )
                    .observed(format!("tier={tier}")),
                );
            }
            if state.reintegrate_ticks >= 2 {
                next.phase = Phase::Inactive;
                next.reset_episode();
                transitions.push(PhaseTransition {
                    from: Phase::Reintegrate,
                    to: Phase::Inactive,
                    reason: "reintegration complete".to_string(),
                });
            } else {
                next.reintegrate_ticks = state.reintegrate_ticks + 1;
            }
        }
    }

    finish(next, engaged, transfer_due, transitions, flags)
}

fn early_exit_reason(state: &LifecycleState, inputs: &LifecycleInputs<'_>) -> Option<String> {
    let cfg = inputs.cfg;

    let equity = &inputs.regimes.equity;
    if equity.label == EquityLabel::RiskOff
        && equity.confidence >= cfg.early_exit.risk_off_confidence_threshold
    {
        return Some(format!(
            "confident risk_off (confidence {:.2})",
            equity.confidence
        ));
    }

    if let Some(entry) = state.entry_anchor_price {
        let failsafe = entry.mul_f64(1.0 - cfg.early_exit.deep_drawdown_failsafe_pct);
        if inputs.anchor_price <= failsafe {
            return Some(format!(
                "deep drawdown failsafe: anchor {} <= {}",
                inputs.anchor_price, failsafe
            ));
        }
    }

    None
}

/// Assemble the outcome, asserting the derived controls against the table.
fn finish(
    state: LifecycleState,
    engaged: bool,
    transfer_due: bool,
    transitions: Vec<PhaseTransition>,
    mut flags: Vec<Flag>,
) -> LifecycleOutcome {
    let controls = derived_controls(state.phase);

    let table_controls = CONTROLS_TABLE
        .iter()
        .find(|(p, _)| *p == state.phase)
        .map(|(_, c)| *c);
    match table_controls {
        Some(expected) if expected == controls => {}
        _ => {
            flags.push(
                Flag::warn(
                    FLAG_DISLOCATION_STATE_INVARIANT,
                    "derived controls disagree with the transition table; using derived",
                )
                .observed(format!("phase={:?}", state.phase)),
            );
        }
    }

    LifecycleOutcome {
        state,
        controls,
        engaged,
        transfer_due,
        transitions,
        flags,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
