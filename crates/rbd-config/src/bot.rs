//! The typed bot configuration.
//!
//! Every field is enumerated with its documented default; `BotConfig` can be
//! built from an empty JSON object.  Section structs mirror the YAML layout
//! (`capital:`, `rebalance:`, `dislocation:`, `insurance:`, `growth:`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Asset-class buckets used by the regime tilt table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    EquityLarge,
    EquityGrowth,
    EquitySmall,
    DurationLong,
    DurationShort,
    Gold,
}

/// Overlay minimum-budget policy: `gate` zeroes a sub-minimum budget,
/// `warn` keeps it and emits an info flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMinBudgetPolicy {
    Gate,
    Warn,
}

/// Insurance budget mode: `light` caps the spend at small fractions of NAV
/// and reserve; `full` spends `insurance.spend_pct` of the remaining reserve.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsuranceReserveMode {
    Light,
    Full,
}

/// One severity tier: engaged when `peak_dd >= threshold`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    pub tier: u8,
    pub threshold: f64,
    pub overlay_extra_exposure_pct: f64,
}

/// Fast/slow drawdown escalation thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub fast_tier2: f64,
    pub fast_tier3: f64,
    pub slow_tier2: f64,
    pub slow_tier3: f64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            fast_tier2: 0.07,
            fast_tier3: 0.12,
            slow_tier2: 0.12,
            slow_tier3: 0.20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    pub core_pct: f64,
    pub reserve_pct: f64,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            core_pct: 0.7,
            reserve_pct: 0.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    pub enabled: bool,
    pub portfolio_drift_threshold: f64,
    pub position_drift_threshold: f64,
    pub min_trade_notional_usd: f64,
    pub rebalance_dust_shares_threshold: i64,
    pub always_rebalance_on_regime_change: bool,
    pub regime_change_keys: Vec<String>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            portfolio_drift_threshold: 0.05,
            position_drift_threshold: 0.05,
            min_trade_notional_usd: 25.0,
            rebalance_dust_shares_threshold: 0,
            always_rebalance_on_regime_change: true,
            regime_change_keys: vec!["equity.label".to_string()],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyExitConfig {
    pub risk_off_confidence_threshold: f64,
    pub deep_drawdown_failsafe_pct: f64,
}

impl Default for EarlyExitConfig {
    fn default() -> Self {
        Self {
            risk_off_confidence_threshold: 0.7,
            deep_drawdown_failsafe_pct: 0.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DislocationConfig {
    pub enabled: bool,
    pub anchor_symbol: String,
    pub min_active_tier: u8,
    pub fast_window_weeks: usize,
    pub slow_window_weeks: usize,
    pub peak_lookback_weeks: usize,
    pub tiers: Vec<TierSpec>,
    pub escalation: EscalationConfig,
    pub duration_weeks_add: i64,
    pub duration_weeks_hold: i64,
    pub cooldown_weeks: i64,
    pub overlay_min_budget_usd: f64,
    pub overlay_min_budget_policy: OverlayMinBudgetPolicy,
    pub max_total_exposure_cap_pct: f64,
    pub tier_hysteresis_pct: f64,
    pub min_weeks_between_tier_changes: i64,
    pub early_exit: EarlyExitConfig,
}

impl Default for DislocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anchor_symbol: "SPY".to_string(),
            min_active_tier: 2,
            fast_window_weeks: 1,
            slow_window_weeks: 4,
            peak_lookback_weeks: 26,
            tiers: vec![
                TierSpec {
                    tier: 0,
                    threshold: 0.0,
                    overlay_extra_exposure_pct: 0.0,
                },
                TierSpec {
                    tier: 1,
                    threshold: 0.10,
                    overlay_extra_exposure_pct: 0.15,
                },
                TierSpec {
                    tier: 2,
                    threshold: 0.20,
                    overlay_extra_exposure_pct: 0.30,
                },
                TierSpec {
                    tier: 3,
                    threshold: 0.30,
                    overlay_extra_exposure_pct: 0.40,
                },
            ],
            escalation: EscalationConfig::default(),
            duration_weeks_add: 3,
            duration_weeks_hold: 10,
            cooldown_weeks: 2,
            overlay_min_budget_usd: 200.0,
            overlay_min_budget_policy: OverlayMinBudgetPolicy::Gate,
            max_total_exposure_cap_pct: 0.7,
            tier_hysteresis_pct: 0.02,
            min_weeks_between_tier_changes: 1,
            early_exit: EarlyExitConfig::default(),
        }
    }
}

/// Shared shape for the insurance and growth option sleeves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionSleeveConfig {
    pub spend_pct: f64,
    pub min_months: i64,
    pub max_months: i64,
}

impl OptionSleeveConfig {
    fn insurance_default() -> Self {
        Self {
            spend_pct: 0.85,
            min_months: 3,
            max_months: 6,
        }
    }

    fn growth_default() -> Self {
        Self {
            spend_pct: 0.2,
            min_months: 3,
            max_months: 6,
        }
    }
}

impl Default for OptionSleeveConfig {
    fn default() -> Self {
        Self::insurance_default()
    }
}

/// The complete bot configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub env: String,
    pub account_id: String,
    pub starting_capital_usd: f64,
    pub capital: CapitalConfig,
    pub max_positions: usize,
    pub max_position_pct: f64,
    pub min_cash_pct: f64,
    pub max_notional_traded_pct_per_run: f64,
    pub rebalance: RebalanceConfig,
    pub dislocation: DislocationConfig,
    pub insurance: OptionSleeveConfig,
    pub growth: OptionSleeveConfig,
    pub insurance_reserve_mode: InsuranceReserveMode,
    pub rates_anchor_symbol: String,
    /// Symbol → asset-class overrides; symbols absent here fall back to the
    /// built-in classification table.
    pub asset_classes: BTreeMap<String, AssetClass>,
    pub ledger_hash_chain: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            env: "paper".to_string(),
            account_id: "default".to_string(),
            starting_capital_usd: 2000.0,
            capital: CapitalConfig::default(),
            max_positions: 4,
            max_position_pct: 0.35,
            min_cash_pct: 0.0,
            max_notional_traded_pct_per_run: 1.0,
            rebalance: RebalanceConfig::default(),
            dislocation: DislocationConfig::default(),
            insurance: OptionSleeveConfig::insurance_default(),
            growth: OptionSleeveConfig::growth_default(),
            insurance_reserve_mode: InsuranceReserveMode::Light,
            rates_anchor_symbol: "TLT".to_string(),
            asset_classes: BTreeMap::new(),
            ledger_hash_chain: true,
        }
    }
}

impl BotConfig {
    /// Deserialise from merged layered JSON; absent fields take defaults.
    pub fn from_value(v: Value) -> Result<Self> {
        serde_json::from_value(v).context("deserialize BotConfig failed")
    }

    /// Tier spec for a given tier number, if configured.
    pub fn tier(&self, tier: u8) -> Option<&TierSpec> {
        self.dislocation.tiers.iter().find(|t| t.tier == tier)
    }

    /// Sleeve-store key: `"{env}:{account_id}"`.
    pub fn store_key(&self) -> String {
        format!("{}:{}", self.env, self.account_id)
    }
}
