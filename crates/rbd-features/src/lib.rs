//! rbd-features
//!
//! Price & feature computation: normalises per-symbol close-price history
//! and the current quote into an immutable [`Feature`] snapshot per symbol,
//! plus data-quality flags.
//!
//! - Bar interval (daily vs. weekly) is detected from the median
//!   inter-sample gap; window constants follow the interval.
//! - Percentile buckets are cross-sectional across the universe.
//! - Deterministic: identical inputs produce bit-identical output.
//!
//! This crate does **not** fetch data, read clocks, or score dislocations
//! (see `rbd-dislocation` for the anchor drawdown scorer).

mod compute;
mod quality;
mod types;

pub use compute::{compute_features, FeatureSet};
pub use quality::{
    quote_duplication_flags, FLAG_DUPLICATE_QUOTES, FLAG_FLAT_HISTORY,
    FLAG_INSUFFICIENT_HISTORY, FLAG_INSUFFICIENT_SAMPLES, FLAG_PERCENTILE_UNRELIABLE,
};
pub use types::{BarInterval, Feature, HistoryBar, LookbackWindows, PctileBucket};

use rbd_portfolio::Micros;
use std::collections::BTreeMap;

/// Symbol → ordered close-price history.
pub type HistoryMap = BTreeMap<String, Vec<HistoryBar>>;

/// Symbol → current quote.
pub type QuoteMap = BTreeMap<String, Micros>;
