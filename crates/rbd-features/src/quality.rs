//! Data-quality flags for the feature stage.
//!
//! Flag codes are stable strings consumed by diagnostics and tests; the
//! error-level codes (`INSUFFICIENT_HISTORY_FOR_FEATURES`, `FLAT_HISTORY`)
//! cause the symbol to be excluded from allocation, warn-level codes retain
//! the symbol.

use crate::QuoteMap;
use rbd_portfolio::{Flag, Micros};
use std::collections::BTreeMap;

pub const FLAG_INSUFFICIENT_HISTORY: &str = "INSUFFICIENT_HISTORY_FOR_FEATURES";
pub const FLAG_FLAT_HISTORY: &str = "FLAT_HISTORY";
pub const FLAG_INSUFFICIENT_SAMPLES: &str = "INSUFFICIENT_SAMPLES";
pub const FLAG_DUPLICATE_QUOTES: &str = "DUPLICATE_QUOTES";
pub const FLAG_PERCENTILE_UNRELIABLE: &str = "PERCENTILE_UNRELIABLE";

/// Minimum unique closes below which a history is considered flat.
pub const MIN_UNIQUE_CLOSES: usize = 5;

/// Flag any quote price shared by three or more symbols.
///
/// An identical price across many symbols is the signature of a stuck or
/// misrouted feed, not a market coincidence.
pub fn quote_duplication_flags(quotes: &QuoteMap) -> Vec<Flag> {
    let mut by_price: BTreeMap<Micros, Vec<&str>> = BTreeMap::new();
    for (sym, px) in quotes {
        by_price.entry(*px).or_default().push(sym.as_str());
    }

    by_price
        .into_iter()
        .filter(|(_, syms)| syms.len() >= 3)
        .map(|(px, syms)| {
            Flag::warn(
                FLAG_DUPLICATE_QUOTES,
                format!("{} symbols share one quote price", syms.len()),
            )
            .observed(format!("price={} symbols={}", px, syms.join(",")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, i64)]) -> QuoteMap {
        pairs
            .iter()
            .map(|(s, d)| (s.to_string(), Micros::from_whole_dollars(*d)))
            .collect()
    }

    #[test]
    fn no_flag_for_distinct_quotes() {
        let flags = quote_duplication_flags(&q(&[("SPY", 100), ("QQQ", 110), ("TLT", 85)]));
        assert!(flags.is_empty());
    }

    #[test]
    fn pairs_are_tolerated() {
        let flags = quote_duplication_flags(&q(&[("SPY", 100), ("VOO", 100), ("TLT", 85)]));
        assert!(flags.is_empty());
    }

    #[test]
    fn three_way_duplicate_is_flagged() {
        let flags =
            quote_duplication_flags(&q(&[("SPY", 100), ("VOO", 100), ("IVV", 100), ("TLT", 85)]));
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].code, FLAG_DUPLICATE_QUOTES);
        assert!(flags[0].observed.as_ref().unwrap().contains("IVV,SPY,VOO"));
    }
}
