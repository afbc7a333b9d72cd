//! Feature computation over quotes + history.

use crate::quality::{
    quote_duplication_flags, FLAG_FLAT_HISTORY, FLAG_INSUFFICIENT_HISTORY,
    FLAG_INSUFFICIENT_SAMPLES, FLAG_PERCENTILE_UNRELIABLE, MIN_UNIQUE_CLOSES,
};
use crate::types::{BarInterval, Feature, HistoryBar, LookbackWindows, PctileBucket};
use crate::{HistoryMap, QuoteMap};
use rbd_portfolio::{Flag, Micros};
use std::collections::{BTreeMap, BTreeSet};

/// Per-symbol features plus the stage's data-quality flags.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSet {
    pub features: BTreeMap<String, Feature>,
    pub flags: Vec<Flag>,
}

impl FeatureSet {
    pub fn feature(&self, symbol: &str) -> Option<&Feature> {
        self.features.get(symbol)
    }
}

/// Compute a [`Feature`] for every symbol in `universe`.
///
/// Error-level data-quality issues (no usable history, flat history) skip
/// the symbol entirely; warn-level issues (windows degraded by short
/// history) retain the symbol with the affected fields set to `None`.
///
/// Deterministic: iteration follows universe order; percentile ranks are a
/// pure function of the cross-section.
pub fn compute_features(universe: &[String], history: &HistoryMap, quotes: &QuoteMap) -> FeatureSet {
    let mut features: BTreeMap<String, Feature> = BTreeMap::new();
    let mut flags: Vec<Flag> = quote_duplication_flags(quotes);

    for symbol in universe {
        let series = history.get(symbol).map(Vec::as_slice).unwrap_or(&[]);

        let price = match quotes.get(symbol).copied() {
            Some(px) if px.is_positive() => px,
            _ => match series.last() {
                Some(bar) => bar.close,
                None => {
                    flags.push(
                        Flag::error(
                            FLAG_INSUFFICIENT_HISTORY,
                            format!("{symbol}: no quote and no history"),
                        )
                        .observed("samples=0".to_string()),
                    );
                    continue;
                }
            },
        };

        if series.len() < 2 {
            flags.push(
                Flag::error(
                    FLAG_INSUFFICIENT_HISTORY,
                    format!("{symbol}: history too short for any feature"),
                )
                .observed(format!("samples={}", series.len())),
            );
            continue;
        }

        let unique_closes = count_unique_closes(series);
        if unique_closes < MIN_UNIQUE_CLOSES {
            flags.push(
                Flag::error(
                    FLAG_FLAT_HISTORY,
                    format!("{symbol}: history has too few unique closes"),
                )
                .observed(format!("unique_closes={unique_closes}")),
            );
            continue;
        }

        let interval = detect_interval(series);
        let windows = LookbackWindows::for_interval(interval);

        let closes: Vec<f64> = series.iter().map(|b| b.close.to_dollars()).collect();
        let n = closes.len();

        let ret_short = trailing_return(&closes, windows.ret_short);
        let ret_med = trailing_return(&closes, windows.ret_med);
        let ret_long = trailing_return(&closes, windows.ret_long);
        let vol = realized_vol(&closes, windows.ret_med);
        let mdd = Some(peak_drawdown(
            &closes[n.saturating_sub(windows.ret_long + 1)..],
        ));
        let ma_fast = moving_average(&closes, windows.ma_fast);
        let ma_slow = moving_average(&closes, windows.ma_slow);

        let mut degraded: Vec<&str> = Vec::new();
        if ret_short.is_none() {
            degraded.push("ret_short");
        }
        if ret_med.is_none() {
            degraded.push("ret_med");
        }
        if ret_long.is_none() {
            degraded.push("ret_long");
        }
        if vol.is_none() {
            degraded.push("vol");
        }
        if ma_fast.is_none() {
            degraded.push("ma_fast");
        }
        if ma_slow.is_none() {
            degraded.push("ma_slow");
        }
        if !degraded.is_empty() {
            flags.push(
                Flag::warn(
                    FLAG_INSUFFICIENT_SAMPLES,
                    format!("{symbol}: history shorter than some windows"),
                )
                .observed(format!("samples={n} missing={}", degraded.join(","))),
            );
        }

        let mut extras = BTreeMap::new();
        // Full-span return: the allocator's momentum fallback when the long
        // window is not covered.
        extras.insert(
            "full_span_ret".to_string(),
            (closes[n - 1] - closes[0]) / closes[0],
        );

        features.insert(
            symbol.clone(),
            Feature {
                symbol: symbol.clone(),
                price,
                bar_interval: interval,
                ret_short,
                ret_med,
                ret_long,
                vol,
                mdd,
                ma_fast,
                ma_slow,
                ret_long_pctile_bucket: PctileBucket::Unknown,
                vol_pctile_bucket: PctileBucket::Unknown,
                history_samples: n,
                history_unique_closes: unique_closes,
                extras,
            },
        );
    }

    assign_percentile_buckets(&mut features, &mut flags);

    FeatureSet { features, flags }
}

// ---------------------------------------------------------------------------
// Series math
// ---------------------------------------------------------------------------

/// Median inter-sample gap >= 5 days ⇒ weekly bars.
pub fn detect_interval(series: &[HistoryBar]) -> BarInterval {
    let mut gaps: Vec<i64> = series
        .windows(2)
        .map(|w| (w[1].date - w[0].date).num_days())
        .collect();
    if gaps.is_empty() {
        return BarInterval::Daily;
    }
    gaps.sort_unstable();
    let median = gaps[gaps.len() / 2];
    if median >= 5 {
        BarInterval::Weekly
    } else {
        BarInterval::Daily
    }
}

/// Return over the last `window` bars; `None` when the series does not
/// cover `window + 1` samples or the reference close is non-positive.
fn trailing_return(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let first = closes[closes.len() - 1 - window];
    let last = closes[closes.len() - 1];
    if first <= 0.0 {
        return None;
    }
    Some((last - first) / first)
}

/// Population standard deviation of one-bar returns over the last `window`
/// bars.
fn realized_vol(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let tail = &closes[closes.len() - 1 - window..];
    let rets: Vec<f64> = tail
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if rets.is_empty() {
        return None;
    }
    let mean = rets.iter().sum::<f64>() / rets.len() as f64;
    let var = rets.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / rets.len() as f64;
    Some(var.sqrt())
}

/// Peak drawdown `(running_max − close) / running_max`, maximised over the
/// slice.
pub fn peak_drawdown(closes: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut mdd = 0.0;
    for &px in closes {
        if px > peak {
            peak = px;
        }
        if peak > 0.0 {
            let dd = (peak - px) / peak;
            if dd > mdd {
                mdd = dd;
            }
        }
    }
    mdd
}

fn moving_average(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window || window == 0 {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

fn count_unique_closes(series: &[HistoryBar]) -> usize {
    let set: BTreeSet<Micros> = series.iter().map(|b| b.close).collect();
    set.len()
}

// ---------------------------------------------------------------------------
// Cross-sectional percentiles
// ---------------------------------------------------------------------------

/// Rank each symbol's long return and vol across the cross-section and
/// bucket them.  With fewer than two eligible symbols the buckets stay
/// `Unknown` and a `PERCENTILE_UNRELIABLE` flag is emitted.
fn assign_percentile_buckets(features: &mut BTreeMap<String, Feature>, flags: &mut Vec<Flag>) {
    let eligible: Vec<String> = features
        .iter()
        .filter(|(_, f)| f.history_samples >= 2)
        .map(|(s, _)| s.clone())
        .collect();

    if eligible.len() < 2 {
        flags.push(
            Flag::warn(
                FLAG_PERCENTILE_UNRELIABLE,
                "fewer than 2 symbols with usable history; percentile buckets unknown",
            )
            .observed(format!("eligible={}", eligible.len())),
        );
        return;
    }

    let ret_values: BTreeMap<String, f64> = eligible
        .iter()
        .filter_map(|s| features[s].ret_long.map(|v| (s.clone(), v)))
        .collect();
    let vol_values: BTreeMap<String, f64> = eligible
        .iter()
        .filter_map(|s| features[s].vol.map(|v| (s.clone(), v)))
        .collect();

    for symbol in &eligible {
        if let Some(f) = features.get_mut(symbol) {
            if let Some(rank) = cross_sectional_rank(&ret_values, symbol) {
                f.ret_long_pctile_bucket = PctileBucket::from_rank(rank);
            }
            if let Some(rank) = cross_sectional_rank(&vol_values, symbol) {
                f.vol_pctile_bucket = PctileBucket::from_rank(rank);
            }
        }
    }
}

/// `#{values strictly below} / (n − 1)`; `None` when the symbol has no
/// value or fewer than two symbols carry one.
fn cross_sectional_rank(values: &BTreeMap<String, f64>, symbol: &str) -> Option<f64> {
    let x = *values.get(symbol)?;
    let n = values.len();
    if n < 2 {
        return None;
    }
    let below = values.values().filter(|v| **v < x).count();
    Some(below as f64 / (n - 1) as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(offset_days: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset_days)
    }

    fn weekly_series(closes: &[f64]) -> Vec<HistoryBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| HistoryBar::new(d(i as i64 * 7), Micros::from_dollars(*c)))
            .collect()
    }

    fn daily_series(closes: &[f64]) -> Vec<HistoryBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| HistoryBar::new(d(i as i64), Micros::from_dollars(*c)))
            .collect()
    }

    fn single(symbol: &str, series: Vec<HistoryBar>, quote: f64) -> (Vec<String>, HistoryMap, QuoteMap) {
        let universe = vec![symbol.to_string()];
        let mut history = HistoryMap::new();
        history.insert(symbol.to_string(), series);
        let mut quotes = QuoteMap::new();
        quotes.insert(symbol.to_string(), Micros::from_dollars(quote));
        (universe, history, quotes)
    }

    // --- interval detection ---

    #[test]
    fn weekly_gap_detected() {
        let s = weekly_series(&[100.0, 101.0, 102.0]);
        assert_eq!(detect_interval(&s), BarInterval::Weekly);
    }

    #[test]
    fn daily_gap_detected() {
        let s = daily_series(&[100.0, 101.0, 102.0]);
        assert_eq!(detect_interval(&s), BarInterval::Daily);
    }

    // --- math primitives ---

    #[test]
    fn trailing_return_over_window() {
        let closes = [100.0, 105.0, 110.0];
        assert_eq!(trailing_return(&closes, 2), Some(0.1));
        assert_eq!(trailing_return(&closes, 3), None);
    }

    #[test]
    fn peak_drawdown_of_v_shape() {
        let dd = peak_drawdown(&[100.0, 80.0, 90.0]);
        assert!((dd - 0.2).abs() < 1e-12);
    }

    #[test]
    fn peak_drawdown_of_monotonic_rise_is_zero() {
        assert_eq!(peak_drawdown(&[100.0, 110.0, 120.0]), 0.0);
    }

    // --- flags & skipping ---

    #[test]
    fn missing_history_skips_symbol_with_error() {
        let universe = vec!["SPY".to_string()];
        let set = compute_features(&universe, &HistoryMap::new(), &QuoteMap::new());
        assert!(set.features.is_empty());
        assert!(set
            .flags
            .iter()
            .any(|f| f.code == FLAG_INSUFFICIENT_HISTORY));
    }

    #[test]
    fn flat_history_skips_symbol_with_error() {
        let (u, h, q) = single("SPY", weekly_series(&[100.0, 100.0, 100.0, 100.0, 100.0, 100.0]), 100.0);
        let set = compute_features(&u, &h, &q);
        assert!(set.features.is_empty());
        assert!(set.flags.iter().any(|f| f.code == FLAG_FLAT_HISTORY));
    }

    #[test]
    fn short_history_retained_with_warn() {
        let (u, h, q) = single("SPY", weekly_series(&[100.0, 101.0, 99.0, 102.0, 103.0]), 103.0);
        let set = compute_features(&u, &h, &q);
        let f = set.feature("SPY").unwrap();
        // 5 samples: ret_short(1) and ret_med(4) covered, ret_long(12) not.
        assert!(f.ret_short.is_some());
        assert!(f.ret_med.is_some());
        assert!(f.ret_long.is_none());
        assert!(set
            .flags
            .iter()
            .any(|f| f.code == FLAG_INSUFFICIENT_SAMPLES));
        assert!(f.extras.contains_key("full_span_ret"));
    }

    #[test]
    fn percentile_unreliable_with_single_symbol() {
        let (u, h, q) = single(
            "SPY",
            weekly_series(&[100.0, 101.0, 99.0, 102.0, 103.0, 104.0]),
            104.0,
        );
        let set = compute_features(&u, &h, &q);
        assert!(set
            .flags
            .iter()
            .any(|f| f.code == FLAG_PERCENTILE_UNRELIABLE));
        assert_eq!(
            set.feature("SPY").unwrap().ret_long_pctile_bucket,
            PctileBucket::Unknown
        );
    }

    // --- full path across a cross-section ---

    #[test]
    fn buckets_rank_the_cross_section() {
        let mut history = HistoryMap::new();
        let mut quotes = QuoteMap::new();
        let universe: Vec<String> = ["LOW", "MID", "HIGH"].iter().map(|s| s.to_string()).collect();

        // 13 weekly bars so ret_long(12) is covered; distinct long returns.
        let bases: &[(&str, f64)] = &[("LOW", -0.10), ("MID", 0.02), ("HIGH", 0.15)];
        for (sym, total_ret) in bases {
            let closes: Vec<f64> = (0..13)
                .map(|i| 100.0 * (1.0 + total_ret * i as f64 / 12.0) + (i % 3) as f64 * 0.1)
                .collect();
            history.insert(sym.to_string(), weekly_series(&closes));
            quotes.insert(sym.to_string(), Micros::from_dollars(*closes.last().unwrap()));
        }

        let set = compute_features(&universe, &history, &quotes);
        assert_eq!(
            set.feature("LOW").unwrap().ret_long_pctile_bucket,
            PctileBucket::Low
        );
        assert_eq!(
            set.feature("MID").unwrap().ret_long_pctile_bucket,
            PctileBucket::Mid
        );
        assert_eq!(
            set.feature("HIGH").unwrap().ret_long_pctile_bucket,
            PctileBucket::High
        );
    }

    #[test]
    fn deterministic_given_identical_inputs() {
        let (u, h, q) = single(
            "SPY",
            weekly_series(&[100.0, 101.0, 99.0, 102.0, 103.0, 104.0, 102.5]),
            102.5,
        );
        let a = compute_features(&u, &h, &q);
        let b = compute_features(&u, &h, &q);
        assert_eq!(a, b);
    }
}
