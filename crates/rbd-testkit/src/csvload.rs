//! CSV close-series fixture loader (`symbol,date,close`).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rbd_features::{HistoryBar, HistoryMap};
use rbd_portfolio::Micros;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct Row {
    symbol: String,
    date: NaiveDate,
    close: f64,
}

/// Load a `symbol,date,close` CSV into per-symbol ordered bar series.
///
/// Rows are sorted by date within each symbol, so fixture files need not
/// be pre-sorted.
pub fn load_close_series(path: impl AsRef<Path>) -> Result<HistoryMap> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("open close-series csv {:?}", path.as_ref()))?;

    let mut history = HistoryMap::new();
    for (i, row) in reader.deserialize::<Row>().enumerate() {
        let row = row.with_context(|| format!("parse csv row {}", i + 1))?;
        history
            .entry(row.symbol)
            .or_default()
            .push(HistoryBar::new(row.date, Micros::from_dollars(row.close)));
    }

    for bars in history.values_mut() {
        bars.sort_by_key(|b| b.date);
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_sorts_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closes.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "symbol,date,close").unwrap();
        writeln!(f, "SPY,2024-07-15,101.5").unwrap();
        writeln!(f, "SPY,2024-07-01,100.0").unwrap();
        writeln!(f, "SPY,2024-07-08,99.0").unwrap();
        writeln!(f, "QQQ,2024-07-01,440.0").unwrap();

        let history = load_close_series(&path).unwrap();
        let spy = &history["SPY"];
        assert_eq!(spy.len(), 3);
        assert!(spy[0].date < spy[1].date && spy[1].date < spy[2].date);
        assert_eq!(spy[0].close, Micros::from_dollars(100.0));
        assert_eq!(history["QQQ"].len(), 1);
    }

    #[test]
    fn missing_file_is_a_context_error() {
        let err = load_close_series("/nonexistent/closes.csv").unwrap_err();
        assert!(format!("{err:#}").contains("open close-series csv"));
    }
}
