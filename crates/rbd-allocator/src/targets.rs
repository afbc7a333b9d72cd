//! Universal target allocation: momentum × regime tilt.

use crate::classify::classify_symbol;
use rbd_config::AssetClass;
use rbd_features::{Feature, FeatureSet};
use rbd_regime::{
    confidence_bucket, ConfidenceBucket, EquityLabel, RatesLabel, RatesStance, RegimeSnapshot,
    TransitionRisk, VolLabel,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors produced during target allocation.
#[derive(Clone, Debug, PartialEq)]
pub enum AllocationError {
    /// `max_positions` is zero; no portfolio can be formed.
    ZeroMaxPositions,
    /// A momentum or tilt value is NaN or infinite.
    InvalidScore { symbol: String },
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroMaxPositions => write!(f, "max_positions must be > 0"),
            Self::InvalidScore { symbol } => {
                write!(f, "invalid (NaN/inf) score for symbol '{symbol}'")
            }
        }
    }
}

impl std::error::Error for AllocationError {}

// ─── Candidates & decision ───────────────────────────────────────────────────

/// A candidate with its momentum, tilt, and final score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub momentum: f64,
    pub tilt: f64,
    pub score: f64,
}

/// Why a candidate was excluded from the final allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MaxPositionsReached,
    NoFeatures,
}

/// A candidate that was considered but not allocated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub symbol: String,
    pub reason: RejectionReason,
}

/// The output of one allocation run.
///
/// `weights`: universal symbol → target weight in [0, max_position_pct].
/// Weights sum to 1 unless the position cap binds every selected symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetAllocation {
    pub weights: BTreeMap<String, f64>,
    pub scored: Vec<ScoredCandidate>,
    pub rejected: Vec<RejectedCandidate>,
}

impl TargetAllocation {
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

// ─── Allocation ──────────────────────────────────────────────────────────────

/// Run target allocation against the universe.
///
/// # Algorithm
///
/// 1. Score every symbol with features: `momentum × tilt(asset_class, regimes)`.
///    Momentum is the long-lookback return (full-span fallback for short
///    histories); symbols the feature stage excluded are rejected here.
/// 2. Select the top `max_positions` by score (ties broken by symbol so the
///    result is deterministic).
/// 3. Weights = `max(0, score) / Σ max(0, score)`; if no score is positive,
///    equal weights among the selected.
/// 4. Clip weights at `max_position_pct` and redistribute the excess
///    proportionally over uncapped symbols until stable (waterfall).
pub fn allocate_targets(
    universe: &[String],
    features: &FeatureSet,
    regimes: &RegimeSnapshot,
    class_overrides: &BTreeMap<String, AssetClass>,
    max_positions: usize,
    max_position_pct: f64,
) -> Result<TargetAllocation, AllocationError> {
    if max_positions == 0 {
        return Err(AllocationError::ZeroMaxPositions);
    }

    let mut scored: Vec<ScoredCandidate> = Vec::new();
    let mut rejected: Vec<RejectedCandidate> = Vec::new();

    for symbol in universe {
        let Some(feature) = features.feature(symbol) else {
            rejected.push(RejectedCandidate {
                symbol: symbol.clone(),
                reason: RejectionReason::NoFeatures,
            });
            continue;
        };

        let asset_class = classify_symbol(symbol, class_overrides);
        let momentum = momentum_of(feature);
        let tilt = tilt_multiplier(asset_class, regimes);
        let score = momentum * tilt;

        if !score.is_finite() {
            return Err(AllocationError::InvalidScore {
                symbol: symbol.clone(),
            });
        }

        scored.push(ScoredCandidate {
            symbol: symbol.clone(),
            asset_class,
            momentum,
            tilt,
            score,
        });
    }

    // Top-N by score, symbol as deterministic tie-break.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    for c in scored.iter().skip(max_positions) {
        rejected.push(RejectedCandidate {
            symbol: c.symbol.clone(),
            reason: RejectionReason::MaxPositionsReached,
        });
    }
    let selected: Vec<&ScoredCandidate> = scored.iter().take(max_positions).collect();

    let mut weights: BTreeMap<String, f64> = BTreeMap::new();
    let positive_sum: f64 = selected.iter().map(|c| c.score.max(0.0)).sum();

    if positive_sum > 0.0 {
        for c in &selected {
            weights.insert(c.symbol.clone(), c.score.max(0.0) / positive_sum);
        }
        weights.retain(|_, w| *w > 0.0);
    } else if !selected.is_empty() {
        let equal = 1.0 / selected.len() as f64;
        for c in &selected {
            weights.insert(c.symbol.clone(), equal);
        }
    }

    apply_position_cap(&mut weights, max_position_pct);

    Ok(TargetAllocation {
        weights,
        scored,
        rejected,
    })
}

/// Long-lookback return, falling back to the full-span return when the
/// history was shorter than the window.
fn momentum_of(feature: &Feature) -> f64 {
    feature
        .ret_long
        .or_else(|| feature.extras.get("full_span_ret").copied())
        .unwrap_or(0.0)
}

/// The regime tilt table.  Multipliers compose multiplicatively.
fn tilt_multiplier(asset_class: AssetClass, regimes: &RegimeSnapshot) -> f64 {
    let equity = &regimes.equity;
    let low_confidence = confidence_bucket(equity.confidence) == ConfidenceBucket::Low;
    let mut tilt = 1.0;

    match asset_class {
        AssetClass::EquityLarge | AssetClass::EquityGrowth | AssetClass::EquitySmall => {
            if equity.label == EquityLabel::RiskOn {
                tilt *= 1.2;
            }
            if equity.label == EquityLabel::RiskOff {
                tilt *= 0.8;
            }
            if low_confidence {
                tilt *= 0.9;
            }
            if equity.transition_risk == TransitionRisk::High {
                tilt *= 0.9;
            }
        }
        AssetClass::DurationLong => {
            if equity.label == EquityLabel::RiskOff {
                tilt *= 1.1;
            }
            if regimes.rates.label == RatesLabel::Restrictive
                || regimes.rates.stance == RatesStance::Rising
            {
                tilt *= 0.85;
            }
            if regimes.rates.stance == RatesStance::Falling {
                tilt *= 1.1;
            }
        }
        AssetClass::DurationShort => {
            if regimes.rates.label == RatesLabel::Restrictive {
                tilt *= 1.05;
            }
        }
        AssetClass::Gold => {
            if regimes.vol_label == VolLabel::Stressed {
                tilt *= 1.1;
            }
            if equity.label == EquityLabel::RiskOff {
                tilt *= 1.1;
            }
        }
    }

    tilt
}

/// Clip weights at `cap` and redistribute the excess proportionally over
/// uncapped symbols, repeating until nothing is above the cap.  When every
/// symbol is capped the residual mass is left unallocated (it stays in
/// cash).
fn apply_position_cap(weights: &mut BTreeMap<String, f64>, cap: f64) {
    if cap <= 0.0 || weights.is_empty() {
        return;
    }
    const EPS: f64 = 1e-12;

    loop {
        let mut excess = 0.0;
        let mut uncapped_sum = 0.0;
        for w in weights.values_mut() {
            if *w > cap + EPS {
                excess += *w - cap;
                *w = cap;
            } else if *w < cap - EPS {
                uncapped_sum += *w;
            }
        }
        if excess <= EPS || uncapped_sum <= EPS {
            break;
        }
        let scale = excess / uncapped_sum;
        for w in weights.values_mut() {
            if *w < cap - EPS {
                *w += *w * scale;
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rbd_features::{compute_features, HistoryBar, HistoryMap, QuoteMap};
    use rbd_portfolio::Micros;
    use rbd_regime::derive_regimes;

    fn weekly_series(closes: &[f64]) -> Vec<HistoryBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                HistoryBar::new(
                    chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                        + chrono::Duration::weeks(i as i64),
                    Micros::from_dollars(*c),
                )
            })
            .collect()
    }

    /// 14 weekly bars ending at `base * (1 + total_ret)` with mild noise so
    /// histories are never flat.
    fn trending(base: f64, total_ret: f64) -> Vec<f64> {
        (0..14)
            .map(|i| base * (1.0 + total_ret * i as f64 / 13.0) + (i % 4) as f64 * 0.07)
            .collect()
    }

    fn fixture(symbols: &[(&str, f64, f64)]) -> (Vec<String>, FeatureSet, RegimeSnapshot) {
        let mut history = HistoryMap::new();
        let mut quotes = QuoteMap::new();
        let universe: Vec<String> = symbols.iter().map(|(s, _, _)| s.to_string()).collect();
        for (sym, base, ret) in symbols {
            let closes = trending(*base, *ret);
            quotes.insert(sym.to_string(), Micros::from_dollars(*closes.last().unwrap()));
            history.insert(sym.to_string(), weekly_series(&closes));
        }
        let features = compute_features(&universe, &history, &quotes);
        let regimes = derive_regimes(features.feature("SPY"), features.feature("TLT"));
        (universe, features, regimes)
    }

    #[test]
    fn zero_max_positions_is_an_error() {
        let (u, f, r) = fixture(&[("SPY", 100.0, 0.05)]);
        let err =
            allocate_targets(&u, &f, &r, &BTreeMap::new(), 0, 0.35).unwrap_err();
        assert_eq!(err, AllocationError::ZeroMaxPositions);
    }

    #[test]
    fn weights_are_normalised_over_positive_scores() {
        let (u, f, r) = fixture(&[
            ("SPY", 100.0, 0.06),
            ("QQQ", 110.0, 0.12),
            ("TLT", 85.0, -0.04),
        ]);
        let alloc = allocate_targets(&u, &f, &r, &BTreeMap::new(), 4, 1.0).unwrap();

        // TLT's negative score contributes no weight.
        assert!(!alloc.weights.contains_key("TLT"));
        let sum: f64 = alloc.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum={sum}");
        assert!(alloc.weights["QQQ"] > alloc.weights["SPY"]);
    }

    #[test]
    fn all_non_positive_scores_fall_back_to_equal_weights() {
        let (u, f, r) = fixture(&[
            ("SPY", 100.0, -0.03),
            ("QQQ", 110.0, -0.05),
            ("TLT", 85.0, -0.04),
        ]);
        let alloc = allocate_targets(&u, &f, &r, &BTreeMap::new(), 4, 1.0).unwrap();

        assert_eq!(alloc.weights.len(), 3);
        for w in alloc.weights.values() {
            assert!((w - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn max_positions_truncates_lowest_scores() {
        let (u, f, r) = fixture(&[
            ("SPY", 100.0, 0.05),
            ("QQQ", 110.0, 0.12),
            ("IWM", 60.0, 0.02),
            ("TLT", 85.0, 0.01),
        ]);
        let alloc = allocate_targets(&u, &f, &r, &BTreeMap::new(), 2, 1.0).unwrap();

        assert_eq!(alloc.weights.len(), 2);
        assert!(alloc.weights.contains_key("QQQ"));
        assert!(alloc.weights.contains_key("SPY"));
        assert!(alloc
            .rejected
            .iter()
            .any(|c| c.symbol == "IWM" && c.reason == RejectionReason::MaxPositionsReached));
    }

    #[test]
    fn position_cap_waterfall_redistributes_excess() {
        let mut weights: BTreeMap<String, f64> = BTreeMap::new();
        weights.insert("A".to_string(), 0.5);
        weights.insert("B".to_string(), 0.3);
        weights.insert("C".to_string(), 0.2);

        apply_position_cap(&mut weights, 0.35);

        assert!((weights["A"] - 0.35).abs() < 1e-9);
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum={sum}");
        assert!(weights["B"] <= 0.35 + 1e-9);
        assert!(weights["B"] > 0.3);
    }

    #[test]
    fn cap_binding_everywhere_leaves_residual_in_cash() {
        let mut weights: BTreeMap<String, f64> = BTreeMap::new();
        weights.insert("A".to_string(), 0.6);
        weights.insert("B".to_string(), 0.4);

        apply_position_cap(&mut weights, 0.35);

        assert!((weights["A"] - 0.35).abs() < 1e-9);
        assert!((weights["B"] - 0.35).abs() < 1e-9);
        let sum: f64 = weights.values().sum();
        assert!(sum < 1.0);
    }

    #[test]
    fn symbols_without_features_are_rejected_not_fatal() {
        let (mut u, f, r) = fixture(&[("SPY", 100.0, 0.05)]);
        u.push("GHOST".to_string());
        let alloc = allocate_targets(&u, &f, &r, &BTreeMap::new(), 4, 1.0).unwrap();
        assert!(alloc
            .rejected
            .iter()
            .any(|c| c.symbol == "GHOST" && c.reason == RejectionReason::NoFeatures));
        assert!(alloc.weights.contains_key("SPY"));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let (u, f, r) = fixture(&[
            ("SPY", 100.0, 0.06),
            ("QQQ", 110.0, 0.12),
            ("TLT", 85.0, -0.04),
        ]);
        let a = allocate_targets(&u, &f, &r, &BTreeMap::new(), 4, 0.35).unwrap();
        let b = allocate_targets(&u, &f, &r, &BTreeMap::new(), 4, 0.35).unwrap();
        assert_eq!(a, b);
    }
}
