//! The engine's long-lived state.

use rbd_config::BotConfig;
use rbd_dislocation::LifecycleState;
use rbd_options::OptionSleeves;
use rbd_portfolio::{Micros, Portfolio, SleeveIndex};
use serde::{Deserialize, Serialize};

/// Everything the engine owns between ticks.
///
/// Passed in and returned explicitly; callers persist it.  Observers read
/// immutable snapshots — the engine never mutates a prior state in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    pub portfolio: Portfolio,
    pub sleeves: SleeveIndex,
    pub lifecycle: LifecycleState,
    pub option_sleeves: OptionSleeves,
}

impl EngineState {
    /// Fresh state at bootstrap: starting capital in cash, no holdings.
    pub fn bootstrap(cfg: &BotConfig) -> Self {
        Self {
            portfolio: Portfolio::new(Micros::from_dollars(cfg.starting_capital_usd)),
            sleeves: SleeveIndex::new(),
            lifecycle: LifecycleState::new(),
            option_sleeves: OptionSleeves::new(),
        }
    }
}
