//! rbd-portfolio
//!
//! Money representation, portfolio data model, and capital partitioning:
//! - `Micros` fixed-point money (1e-6, i64)
//! - Whole-share `Portfolio` with one aggregated lot per symbol
//! - `SleeveIndex` side-index (base vs. dislocation shares) with
//!   start-of-tick reconciliation
//! - Cash events, orders, and flag records shared by the whole pipeline
//! - NAV computation and the core/reserve capital partition
//!
//! Pure deterministic logic — no IO, no clock reads, no broker wiring.

mod capital;
mod fixedpoint;
mod flags;
mod sleeves;
mod types;

pub use capital::{partition_capital, total_nav, CapitalBudgets};
pub use fixedpoint::{Micros, MICROS_SCALE};
pub use flags::{Flag, FlagLevel};
pub use sleeves::{SellSplit, SleeveEntry, SleeveIndex};
pub use types::{CashEvent, CashEventKind, Lot, Order, Portfolio, Side, SleeveKind};

use std::collections::BTreeMap;

/// Canonical mark map type (symbol -> price).
pub type MarkMap = BTreeMap<String, Micros>;

/// Helper to build a MarkMap with minimal boilerplate.
pub fn marks<I, S>(items: I) -> MarkMap
where
    I: IntoIterator<Item = (S, Micros)>,
    S: Into<String>,
{
    let mut m = MarkMap::new();
    for (sym, px) in items {
        m.insert(sym.into(), px);
    }
    m
}
