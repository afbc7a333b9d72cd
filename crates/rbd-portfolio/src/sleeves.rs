//! Sleeve side-index.
//!
//! The `SleeveIndex` partitions each symbol's share count into `base_qty`
//! (ordinary rebalance shares) and `dislocation_qty` (overlay shares added
//! during a dislocation episode).  It is a side-index of the portfolio, not
//! an owner: the invariant for every symbol present in holdings is
//!
//! ```text
//! base_qty + dislocation_qty == Portfolio.holdings[symbol].qty
//! ```
//!
//! Reconciliation re-establishes the invariant at tick start; any
//! adjustment is flagged rather than silently applied.

use crate::flags::Flag;
use crate::types::Portfolio;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FLAG_SLEEVE_RECONCILED: &str = "SLEEVE_INDEX_RECONCILED";

/// Per-symbol sleeve quantities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleeveEntry {
    pub base_qty: i64,
    pub dislocation_qty: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SleeveEntry {
    pub fn total(&self) -> i64 {
        self.base_qty + self.dislocation_qty
    }
}

/// How a sell debit was split across sleeves.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SellSplit {
    pub from_base: i64,
    pub from_dislocation: i64,
}

/// Symbol → sleeve quantities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleeveIndex {
    pub entries: BTreeMap<String, SleeveEntry>,
}

impl SleeveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, symbol: &str) -> SleeveEntry {
        self.entries.get(symbol).cloned().unwrap_or_default()
    }

    pub fn base_qty(&self, symbol: &str) -> i64 {
        self.entries.get(symbol).map(|e| e.base_qty).unwrap_or(0)
    }

    pub fn dislocation_qty(&self, symbol: &str) -> i64 {
        self.entries
            .get(symbol)
            .map(|e| e.dislocation_qty)
            .unwrap_or(0)
    }

    /// Symbols currently carrying dislocation shares (the sell-protected set
    /// during ADD/HOLD).
    pub fn protected_symbols(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.dislocation_qty > 0)
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// Total dislocation shares across all symbols.
    pub fn total_dislocation_qty(&self) -> i64 {
        self.entries.values().map(|e| e.dislocation_qty).sum()
    }

    /// Re-establish `base + dislocation == holdings.qty` for every symbol.
    ///
    /// - Symbols held but unknown to the index are adopted as base shares.
    /// - A surplus or shortfall is absorbed into `base_qty`; if holdings
    ///   shrank below `dislocation_qty`, the dislocation sleeve is clamped
    ///   down to the held quantity.
    /// - Index entries for symbols no longer held are removed.
    ///
    /// Every adjustment emits a `SLEEVE_INDEX_RECONCILED` warning so an
    /// out-of-band drift (manual fill, restore from an older snapshot) is
    /// visible to the operator instead of silently patched.
    pub fn reconcile(&mut self, portfolio: &Portfolio, now: DateTime<Utc>) -> Vec<Flag> {
        let mut flags = Vec::new();

        for (symbol, lot) in &portfolio.holdings {
            let entry = self.entries.entry(symbol.clone()).or_default();
            let indexed = entry.total();
            if indexed != lot.qty {
                let clamped_dislocation = entry.dislocation_qty.min(lot.qty);
                let new_base = lot.qty - clamped_dislocation;
                flags.push(
                    Flag::warn(
                        FLAG_SLEEVE_RECONCILED,
                        format!("sleeve index drifted for {symbol}; absorbed into base"),
                    )
                    .observed(format!(
                        "held={} indexed={} base={}->{} dislocation={}->{}",
                        lot.qty,
                        indexed,
                        entry.base_qty,
                        new_base,
                        entry.dislocation_qty,
                        clamped_dislocation
                    )),
                );
                entry.base_qty = new_base;
                entry.dislocation_qty = clamped_dislocation;
                entry.updated_at = Some(now);
            }
        }

        let held: Vec<String> = self
            .entries
            .keys()
            .filter(|s| portfolio.qty(s) == 0)
            .cloned()
            .collect();
        for symbol in held {
            let entry = self.entries.remove(&symbol).unwrap_or_default();
            if entry.total() != 0 {
                flags.push(
                    Flag::warn(
                        FLAG_SLEEVE_RECONCILED,
                        format!("sleeve index entry for unheld {symbol} dropped"),
                    )
                    .observed(format!(
                        "base={} dislocation={}",
                        entry.base_qty, entry.dislocation_qty
                    )),
                );
            }
        }

        flags
    }

    /// Credit bought shares to the given sleeve.
    pub fn record_buy(
        &mut self,
        symbol: &str,
        qty: i64,
        sleeve: crate::types::SleeveKind,
        now: DateTime<Utc>,
    ) {
        debug_assert!(qty > 0);
        let entry = self.entries.entry(symbol.to_string()).or_default();
        match sleeve {
            crate::types::SleeveKind::Base => entry.base_qty += qty,
            crate::types::SleeveKind::Dislocation => entry.dislocation_qty += qty,
        }
        entry.updated_at = Some(now);
    }

    /// Debit sold shares: base first, then dislocation when permitted.
    ///
    /// When `allow_dislocation` is false (sell protection active) the debit
    /// stops at the base sleeve; the caller is responsible for having sized
    /// the sell accordingly.
    pub fn record_sell(
        &mut self,
        symbol: &str,
        qty: i64,
        allow_dislocation: bool,
        now: DateTime<Utc>,
    ) -> SellSplit {
        debug_assert!(qty > 0);
        let entry = self.entries.entry(symbol.to_string()).or_default();

        let from_base = qty.min(entry.base_qty);
        let remainder = qty - from_base;
        let from_dislocation = if allow_dislocation {
            remainder.min(entry.dislocation_qty)
        } else {
            0
        };

        entry.base_qty -= from_base;
        entry.dislocation_qty -= from_dislocation;
        entry.updated_at = Some(now);
        if entry.total() == 0 {
            self.entries.remove(symbol);
        }

        SellSplit {
            from_base,
            from_dislocation,
        }
    }

    /// Atomically move every dislocation share into the base sleeve.
    ///
    /// Returns the per-symbol quantities moved (empty when nothing was in
    /// the dislocation sleeve).  Called on the first REINTEGRATE tick.
    pub fn transfer_dislocation_to_base(&mut self, now: DateTime<Utc>) -> Vec<(String, i64)> {
        let mut moved = Vec::new();
        for (symbol, entry) in self.entries.iter_mut() {
            if entry.dislocation_qty > 0 {
                moved.push((symbol.clone(), entry.dislocation_qty));
                entry.base_qty += entry.dislocation_qty;
                entry.dislocation_qty = 0;
                entry.updated_at = Some(now);
            }
        }
        moved
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
