//! Multi-week scenario driver.
//!
//! Holds per-symbol close series and the evolving engine state; each
//! `tick` builds the history/quotes snapshot from the series, runs the pure
//! tick, and feeds the mutated state into the next week.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rbd_allocator::ProxyMap;
use rbd_config::BotConfig;
use rbd_engine::{run_tick, EngineState, ScenarioEvents, TickInputs, TickResult};
use rbd_features::{HistoryBar, HistoryMap, QuoteMap};
use rbd_portfolio::Micros;
use rbd_regime::RegimeSnapshot;
use std::collections::BTreeMap;

/// Monday of the first bar in every driver-built series.
const SERIES_START: (i32, u32, u32) = (2024, 7, 1);

/// Weekly tick harness.
pub struct WeekDriver {
    pub cfg: BotConfig,
    pub state: EngineState,
    pub prior_regimes: Option<RegimeSnapshot>,
    pub universe: Vec<String>,
    pub proxy_map: ProxyMap,
    series: BTreeMap<String, Vec<f64>>,
    start: NaiveDate,
}

impl WeekDriver {
    pub fn new(cfg: BotConfig, universe: &[&str], series: BTreeMap<String, Vec<f64>>) -> Self {
        let state = EngineState::bootstrap(&cfg);
        Self {
            cfg,
            state,
            prior_regimes: None,
            universe: universe.iter().map(|s| s.to_string()).collect(),
            proxy_map: ProxyMap::new(),
            series,
            start: NaiveDate::from_ymd_opt(SERIES_START.0, SERIES_START.1, SERIES_START.2)
                .expect("valid start date"),
        }
    }

    /// Start from pre-dated history bars (e.g. loaded from a CSV fixture);
    /// the driver's clock follows the latest bar date.
    pub fn from_history(cfg: BotConfig, universe: &[&str], history: &HistoryMap) -> Self {
        let mut start = None;
        let mut series = BTreeMap::new();
        for (symbol, bars) in history {
            if let Some(first) = bars.first() {
                start = Some(match start {
                    Some(s) if s <= first.date => s,
                    _ => first.date,
                });
            }
            series.insert(
                symbol.clone(),
                bars.iter().map(|b| b.close.to_dollars()).collect(),
            );
        }
        let mut driver = Self::new(cfg, universe, series);
        if let Some(start) = start {
            driver.start = start;
        }
        driver
    }

    /// Append one weekly close per symbol.
    pub fn push_week(&mut self, closes: &[(&str, f64)]) {
        for (symbol, close) in closes {
            self.series
                .entry(symbol.to_string())
                .or_default()
                .push(*close);
        }
    }

    fn longest(&self) -> usize {
        self.series.values().map(Vec::len).max().unwrap_or(0)
    }

    /// The tick timestamp: the latest bar's Monday at 21:00 UTC.
    pub fn as_of(&self) -> DateTime<Utc> {
        let weeks = self.longest().saturating_sub(1) as i64;
        let date = self.start + chrono::Duration::weeks(weeks);
        Utc.from_utc_datetime(&date.and_hms_opt(21, 0, 0).expect("valid time"))
    }

    pub fn quotes(&self) -> QuoteMap {
        self.series
            .iter()
            .filter_map(|(symbol, closes)| {
                closes
                    .last()
                    .map(|c| (symbol.clone(), Micros::from_dollars(*c)))
            })
            .collect()
    }

    pub fn history(&self) -> HistoryMap {
        self.series
            .iter()
            .map(|(symbol, closes)| {
                let bars = closes
                    .iter()
                    .enumerate()
                    .map(|(i, close)| {
                        HistoryBar::new(
                            self.start + chrono::Duration::weeks(i as i64),
                            Micros::from_dollars(*close),
                        )
                    })
                    .collect();
                (symbol.clone(), bars)
            })
            .collect()
    }

    pub fn tick(&mut self) -> TickResult {
        self.tick_with(None)
    }

    /// Run one tick; the mutated state becomes next week's prior state.
    pub fn tick_with(&mut self, scenario: Option<ScenarioEvents>) -> TickResult {
        let inputs = TickInputs {
            as_of: self.as_of(),
            quotes: self.quotes(),
            history: self.history(),
            universe: self.universe.clone(),
            proxy_map: self.proxy_map.clone(),
            prior_regimes: self.prior_regimes.clone(),
            scenario,
            config: &self.cfg,
        };

        let (next, result) = run_tick(&self.state, &inputs).expect("tick must not fail");
        self.state = next;
        self.prior_regimes = Some(result.diagnostics.regimes.clone());
        result
    }
}
