use chrono::{DateTime, Utc};
use rbd_portfolio::Micros;
use serde::{Deserialize, Serialize};

/// Shares per contract.
pub const CONTRACT_MULTIPLIER: i64 = 100;

/// Premium model κ for the insurance PUT.
pub const KAPPA_INSURANCE: f64 = 0.005;

/// Premium model κ for the growth CALL.
pub const KAPPA_GROWTH: f64 = 0.02;

/// Volatility proxy by severity tier.
pub fn vol_proxy_for_tier(tier: u8) -> f64 {
    match tier {
        0 | 1 => 1.0,
        2 => 1.2,
        _ => 1.5,
    }
}

/// PUT or CALL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionKind {
    Put,
    Call,
}

/// One open option position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionPosition {
    pub kind: OptionKind,
    pub underlying: String,
    pub strike: Micros,
    /// Tick-unit (week) index of expiry.
    pub expiry_week: i64,
    pub contracts: i64,
    pub premium_per_share: Micros,
    pub opened_week: i64,
    pub open_at: DateTime<Utc>,
}

impl OptionPosition {
    /// Premium paid: `contracts × premium_per_share × 100`.
    pub fn cost(&self) -> Micros {
        self.premium_per_share
            .checked_mul_qty(self.contracts * CONTRACT_MULTIPLIER)
            .unwrap_or(Micros::ZERO)
    }

    /// Time to expiry in weeks (may be negative once expired).
    pub fn ttm_weeks(&self, now_week: i64) -> i64 {
        self.expiry_week - now_week
    }

    /// Mark-to-market.
    ///
    /// On the opening tick the mark is cost.  Afterwards
    /// `mark = intrinsic + extrinsic`, where the extrinsic component decays
    /// with time-to-maturity: `premium × vol_proxy × ttm / max(ttm + 8, 8)`.
    pub fn mark(&self, underlying_price: Micros, vol_proxy: f64, now_week: i64) -> Micros {
        if now_week == self.opened_week {
            return self.cost();
        }
        let ttm = self.ttm_weeks(now_week).max(0);

        let intrinsic_ps = match self.kind {
            OptionKind::Put => (self.strike - underlying_price).max(Micros::ZERO),
            OptionKind::Call => (underlying_price - self.strike).max(Micros::ZERO),
        };
        let decay = ttm as f64 / (ttm + 8).max(8) as f64;
        let extrinsic_ps = self.premium_per_share.mul_f64(vol_proxy * decay);

        (intrinsic_ps + extrinsic_ps)
            .checked_mul_qty(self.contracts * CONTRACT_MULTIPLIER)
            .unwrap_or(Micros::ZERO)
    }
}

/// Sleeve deployment state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SleeveState {
    #[default]
    Inactive,
    Deployed,
    Unwinding,
}

/// One option sleeve (insurance or growth); at most one position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSleeve {
    pub state: SleeveState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<OptionPosition>,
}

impl OptionSleeve {
    pub fn is_deployed(&self) -> bool {
        self.state == SleeveState::Deployed && self.position.is_some()
    }
}

/// Both sleeves, persisted between ticks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionSleeves {
    pub insurance: OptionSleeve,
    pub growth: OptionSleeve,
    /// Latched on the rising-edge open; reset when the lifecycle returns to
    /// INACTIVE.  Guarantees at most one insurance open per episode.
    pub insurance_opened_this_episode: bool,
}

impl OptionSleeves {
    pub fn new() -> Self {
        Self::default()
    }

    /// Premium capital currently tied up: Σ open-position cost.
    pub fn reserve_used(&self) -> Micros {
        let mut used = Micros::ZERO;
        if let Some(p) = &self.insurance.position {
            used += p.cost();
        }
        if let Some(p) = &self.growth.position {
            used += p.cost();
        }
        used
    }

    /// Σ marks of open positions.
    pub fn total_mark(
        &self,
        insurance_underlying_price: Micros,
        growth_underlying_price: Micros,
        vol_proxy: f64,
        now_week: i64,
    ) -> Micros {
        let mut total = Micros::ZERO;
        if let Some(p) = &self.insurance.position {
            total += p.mark(insurance_underlying_price, vol_proxy, now_week);
        }
        if let Some(p) = &self.growth.position {
            total += p.mark(growth_underlying_price, vol_proxy, now_week);
        }
        total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
