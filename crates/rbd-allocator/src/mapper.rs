//! Universal-target → executed-symbol mapping.
//!
//! Small accounts cannot always afford one share of the universal symbol a
//! weight points at.  Each `(universal, weight)` pair resolves to:
//! 1. itself (`direct`) when one share fits inside `weight × budget`,
//! 2. the first proxy (in priority order) whose share price fits (`proxy`),
//! 3. nothing — `unmapped` (no usable price) or `too_expensive` (priced but
//!    over the allocation); the weight is dropped from the executed target.
//!
//! Executed weights are re-normalised to sum to 1; the diagnostics record
//! both raw and normalised sums so weight preservation is auditable.

use rbd_features::QuoteMap;
use rbd_portfolio::Micros;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Universal symbol → ordered proxy candidates.
pub type ProxyMap = BTreeMap<String, Vec<String>>;

/// How a universal symbol was resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapReason {
    Direct,
    Proxy,
    Unmapped,
    TooExpensive,
}

/// Mapping record for one universal symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolMapping {
    pub universal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<String>,
    pub reason: MapReason,
    pub universal_weight: f64,
    /// `weight × budget` — the cash this weight commands.
    pub allocation: Micros,
    /// Price of the executed symbol, when one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_price: Option<Micros>,
}

/// Mapping diagnostics: weight-sum bookkeeping for the invariant
/// `Σ executed_raw + unmapped ≈ Σ universal`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingDiagnostics {
    pub universal_sum: f64,
    pub proxy_sum: f64,
    pub executed_sum_raw: f64,
    pub executed_sum_normalised: f64,
    pub unmapped_weight: f64,
    pub ratio_preserved: bool,
}

/// The executed target set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTargets {
    /// Executed symbol → normalised weight (sums to 1 unless empty).
    pub weights: BTreeMap<String, f64>,
    /// Executed symbol → raw (pre-normalisation) weight.
    pub raw_weights: BTreeMap<String, f64>,
    pub mappings: Vec<SymbolMapping>,
    pub diagnostics: MappingDiagnostics,
}

impl ExecutedTargets {
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Resolve every `(universal, weight)` against quotes and the proxy table.
///
/// `budget` is the cash pool the weights partition (the core budget).
/// Iteration order follows the weight map (BTreeMap), so output is
/// deterministic.
pub fn map_targets(
    targets: &BTreeMap<String, f64>,
    quotes: &QuoteMap,
    proxy_map: &ProxyMap,
    budget: Micros,
) -> ExecutedTargets {
    let mut mappings: Vec<SymbolMapping> = Vec::new();
    let mut raw_weights: BTreeMap<String, f64> = BTreeMap::new();
    let mut proxy_sum = 0.0;
    let mut unmapped_weight = 0.0;

    for (universal, weight) in targets {
        let allocation = budget.mul_f64(*weight);
        let price = quotes.get(universal).copied().filter(|p| p.is_positive());

        // 1. Direct: one share of the universal fits the allocation.
        if let Some(px) = price {
            if allocation >= px {
                *raw_weights.entry(universal.clone()).or_insert(0.0) += weight;
                mappings.push(SymbolMapping {
                    universal: universal.clone(),
                    executed: Some(universal.clone()),
                    reason: MapReason::Direct,
                    universal_weight: *weight,
                    allocation,
                    executed_price: Some(px),
                });
                continue;
            }
        }

        // 2. Proxies in priority order: first whose single share fits.
        let proxies = proxy_map.get(universal).map(Vec::as_slice).unwrap_or(&[]);
        let hit = proxies.iter().find_map(|proxy| {
            quotes
                .get(proxy)
                .copied()
                .filter(|p| p.is_positive() && *p <= allocation)
                .map(|p| (proxy.clone(), p))
        });

        if let Some((proxy, px)) = hit {
            *raw_weights.entry(proxy.clone()).or_insert(0.0) += weight;
            proxy_sum += weight;
            mappings.push(SymbolMapping {
                universal: universal.clone(),
                executed: Some(proxy),
                reason: MapReason::Proxy,
                universal_weight: *weight,
                allocation,
                executed_price: Some(px),
            });
            continue;
        }

        // 3. Dropped: distinguish "no price anywhere" from "priced but
        //    unaffordable".
        let reason = if price.is_none() && proxies.iter().all(|p| !quotes.contains_key(p)) {
            MapReason::Unmapped
        } else {
            MapReason::TooExpensive
        };
        unmapped_weight += weight;
        mappings.push(SymbolMapping {
            universal: universal.clone(),
            executed: None,
            reason,
            universal_weight: *weight,
            allocation,
            executed_price: price,
        });
    }

    let universal_sum: f64 = targets.values().sum();
    let executed_sum_raw: f64 = raw_weights.values().sum();

    let mut weights = raw_weights.clone();
    if executed_sum_raw > 0.0 {
        for w in weights.values_mut() {
            *w /= executed_sum_raw;
        }
    }
    let executed_sum_normalised: f64 = weights.values().sum();

    let ratio_preserved = (executed_sum_raw + unmapped_weight - universal_sum).abs() <= 1e-6;

    ExecutedTargets {
        weights,
        raw_weights,
        mappings,
        diagnostics: MappingDiagnostics {
            universal_sum,
            proxy_sum,
            executed_sum_raw,
            executed_sum_normalised,
            unmapped_weight,
            ratio_preserved,
        },
    }
}

/// Invert the proxy table: executed symbol → universal parent.
///
/// Universe symbols map to themselves implicitly; the rebalance engine uses
/// this to aggregate held proxies back onto their parents.
pub fn reverse_proxy_map(proxy_map: &ProxyMap) -> BTreeMap<String, String> {
    let mut reverse = BTreeMap::new();
    for (universal, proxies) in proxy_map {
        for proxy in proxies {
            reverse.insert(proxy.clone(), universal.clone());
        }
    }
    reverse
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
