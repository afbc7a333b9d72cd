//! Regime snapshot derivation.

use rbd_features::{Feature, PctileBucket};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Equity regime label.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquityLabel {
    RiskOn,
    Neutral,
    RiskOff,
}

/// How close the equity regime sits to a label boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionRisk {
    Low,
    Elevated,
    High,
}

/// Volatility regime label.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolLabel {
    Low,
    Rising,
    Stressed,
}

/// Rates regime label (derived from a duration anchor).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatesLabel {
    Restrictive,
    Neutral,
    Accommodative,
}

/// Direction of the rates regime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatesStance {
    Rising,
    Steady,
    Falling,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquityRegime {
    pub label: EquityLabel,
    /// In `[0.2, 1.0]`; damped to <= 0.4 when a percentile bucket is unknown.
    pub confidence: f64,
    pub transition_risk: TransitionRisk,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatesRegime {
    pub label: RatesLabel,
    pub stance: RatesStance,
}

/// The tick's regime snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub equity: EquityRegime,
    pub vol_label: VolLabel,
    pub rates: RatesRegime,
    /// Typed extension map; no ad-hoc inline fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

/// Equity-confidence bucket with boundaries at 0.35 and 0.6; a bucket
/// change counts as a regime change for the rebalance gate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
    Low,
    Mid,
    High,
}

pub fn confidence_bucket(confidence: f64) -> ConfidenceBucket {
    if confidence < 0.35 {
        ConfidenceBucket::Low
    } else if confidence < 0.6 {
        ConfidenceBucket::Mid
    } else {
        ConfidenceBucket::High
    }
}

const RISK_ON_RET: f64 = 0.03;
const RISK_OFF_RET: f64 = -0.02;

/// Derive the tick's regimes from the equity anchor (SPY-like) and the
/// rates anchor (long-duration bond ETF) features.
///
/// A missing anchor degrades to `neutral` at the confidence floor instead
/// of failing the tick; the feature stage has already flagged the cause.
pub fn derive_regimes(anchor: Option<&Feature>, rates_anchor: Option<&Feature>) -> RegimeSnapshot {
    let equity = match anchor {
        Some(f) => derive_equity(f),
        None => EquityRegime {
            label: EquityLabel::Neutral,
            confidence: 0.2,
            transition_risk: TransitionRisk::High,
        },
    };

    let vol_label = match anchor {
        Some(f) => match f.vol_pctile_bucket {
            PctileBucket::High => VolLabel::Stressed,
            PctileBucket::Mid => VolLabel::Rising,
            PctileBucket::Low | PctileBucket::Unknown => VolLabel::Low,
        },
        None => VolLabel::Low,
    };

    let rates = match rates_anchor {
        Some(f) => derive_rates(f),
        None => RatesRegime {
            label: RatesLabel::Neutral,
            stance: RatesStance::Steady,
        },
    };

    RegimeSnapshot {
        equity,
        vol_label,
        rates,
        extras: BTreeMap::new(),
    }
}

fn anchor_ret_long(f: &Feature) -> f64 {
    f.ret_long
        .or_else(|| f.extras.get("full_span_ret").copied())
        .unwrap_or(0.0)
}

fn derive_equity(f: &Feature) -> EquityRegime {
    let ret60 = anchor_ret_long(f);
    let vol_high = f.vol_pctile_bucket == PctileBucket::High;

    // Confidence slopes are asymmetric: risk_on conviction builds quickly
    // with momentum, while risk_off confidence rises slowly so the
    // early-exit trip wire (confidence >= 0.7) marks only severe
    // deterioration (ret60 below roughly -0.19), not every ordinary
    // drawdown the overlay is designed to buy into.
    let (label, raw_confidence) = if ret60 > RISK_ON_RET && f.above_slow_ma() {
        (
            EquityLabel::RiskOn,
            0.5 + 10.0 * (ret60 - RISK_ON_RET),
        )
    } else if ret60 < RISK_OFF_RET || vol_high {
        let momentum_conf = 0.5 + 1.2 * (RISK_OFF_RET - ret60);
        // When the vol bucket alone forces risk_off the momentum term can be
        // weak; floor it so the label is not half-hearted.
        let conf = if vol_high && ret60 >= RISK_OFF_RET {
            momentum_conf.max(0.8)
        } else {
            momentum_conf
        };
        (EquityLabel::RiskOff, conf)
    } else {
        (EquityLabel::Neutral, 0.5)
    };

    let bucket_unknown = f.ret_long_pctile_bucket == PctileBucket::Unknown
        || f.vol_pctile_bucket == PctileBucket::Unknown;

    let mut confidence = raw_confidence.clamp(0.2, 1.0);
    if bucket_unknown {
        confidence = confidence.min(0.4);
    }

    // Distance to the nearest label boundary drives transition risk.
    let dist = (ret60 - RISK_ON_RET).abs().min((ret60 - RISK_OFF_RET).abs());
    let transition_risk = if dist < 0.01 {
        TransitionRisk::High
    } else if dist < 0.03 {
        TransitionRisk::Elevated
    } else {
        TransitionRisk::Low
    };

    EquityRegime {
        label,
        confidence,
        transition_risk,
    }
}

/// A long-duration bond anchor selling off means yields are rising
/// (restrictive); rallying means accommodation.
fn derive_rates(f: &Feature) -> RatesRegime {
    let ret60 = anchor_ret_long(f);
    let label = if ret60 < -0.02 {
        RatesLabel::Restrictive
    } else if ret60 > 0.02 {
        RatesLabel::Accommodative
    } else {
        RatesLabel::Neutral
    };

    let ret20 = f.ret_med.unwrap_or(0.0);
    let stance = if ret20 < -0.01 {
        RatesStance::Rising
    } else if ret20 > 0.01 {
        RatesStance::Falling
    } else {
        RatesStance::Steady
    };

    RatesRegime { label, stance }
}

/// Resolve a configured regime-change key (e.g. `"equity.label"`) to a
/// comparable string value.  Unknown keys resolve to an empty string so a
/// typo'd config key never fabricates a regime change.
pub fn regime_key_value(snapshot: &RegimeSnapshot, key: &str) -> String {
    match key {
        "equity.label" => format!("{:?}", snapshot.equity.label),
        "equity.transition_risk" => format!("{:?}", snapshot.equity.transition_risk),
        "vol_label" => format!("{:?}", snapshot.vol_label),
        "rates.label" => format!("{:?}", snapshot.rates.label),
        "rates.stance" => format!("{:?}", snapshot.rates.stance),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
