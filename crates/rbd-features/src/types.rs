use chrono::NaiveDate;
use rbd_portfolio::Micros;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One close-price sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBar {
    pub date: NaiveDate,
    pub close: Micros,
}

impl HistoryBar {
    pub fn new(date: NaiveDate, close: Micros) -> Self {
        Self { date, close }
    }
}

/// Bar cadence, detected from the median inter-sample gap.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarInterval {
    Daily,
    Weekly,
}

/// Window constants for one bar interval, in bars.
///
/// Daily: short/med/long returns over 5/20/60 bars, moving averages over
/// 50/200.  Weekly: 1/4/12 and 10/40.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LookbackWindows {
    pub ret_short: usize,
    pub ret_med: usize,
    pub ret_long: usize,
    pub ma_fast: usize,
    pub ma_slow: usize,
}

impl LookbackWindows {
    pub const DAILY: LookbackWindows = LookbackWindows {
        ret_short: 5,
        ret_med: 20,
        ret_long: 60,
        ma_fast: 50,
        ma_slow: 200,
    };

    pub const WEEKLY: LookbackWindows = LookbackWindows {
        ret_short: 1,
        ret_med: 4,
        ret_long: 12,
        ma_fast: 10,
        ma_slow: 40,
    };

    pub fn for_interval(interval: BarInterval) -> Self {
        match interval {
            BarInterval::Daily => Self::DAILY,
            BarInterval::Weekly => Self::WEEKLY,
        }
    }
}

/// Cross-sectional percentile bucket.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PctileBucket {
    Low,
    Mid,
    High,
    Unknown,
}

impl PctileBucket {
    /// `< 0.33 → low`, `> 0.66 → high`, else `mid`.
    pub fn from_rank(rank: f64) -> Self {
        if rank < 0.33 {
            PctileBucket::Low
        } else if rank > 0.66 {
            PctileBucket::High
        } else {
            PctileBucket::Mid
        }
    }
}

/// Immutable per-symbol feature snapshot.
///
/// Return/vol/MA fields are `None` when the history could not support the
/// window (the symbol is then retained with an `INSUFFICIENT_SAMPLES` warn,
/// or skipped entirely with an `INSUFFICIENT_HISTORY_FOR_FEATURES` error —
/// see `compute_features`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub symbol: String,
    pub price: Micros,
    pub bar_interval: BarInterval,
    /// Return over the short lookback (5 daily / 1 weekly bars).
    pub ret_short: Option<f64>,
    /// Return over the medium lookback (20 daily / 4 weekly bars).
    pub ret_med: Option<f64>,
    /// Return over the long lookback (60 daily / 12 weekly bars).
    pub ret_long: Option<f64>,
    /// Realised volatility of one-bar returns over the medium lookback.
    pub vol: Option<f64>,
    /// Peak drawdown over the long lookback.
    pub mdd: Option<f64>,
    /// Moving average over the fast window (50 daily / 10 weekly bars).
    pub ma_fast: Option<f64>,
    /// Moving average over the slow window (200 daily / 40 weekly bars).
    pub ma_slow: Option<f64>,
    pub ret_long_pctile_bucket: PctileBucket,
    pub vol_pctile_bucket: PctileBucket,
    pub history_samples: usize,
    pub history_unique_closes: usize,
    /// Typed extension map; no ad-hoc inline fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, f64>,
}

impl Feature {
    /// True when price sits above the slow moving average.
    pub fn above_slow_ma(&self) -> bool {
        match self.ma_slow {
            Some(ma) => self.price.to_dollars() > ma,
            None => false,
        }
    }
}
