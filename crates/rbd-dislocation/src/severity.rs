//! Tiered dislocation severity from anchor drawdowns.

use rbd_config::DislocationConfig;
use serde::{Deserialize, Serialize};

pub const FLAG_TIER_FORCED: &str = "SEVERITY_TIER_FORCED";

/// The three drawdown views of the anchor series.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownMetrics {
    /// `(max − current) / max` over the peak lookback window.
    pub peak_dd: f64,
    /// Drop over the fast window (one bar by default).
    pub fast_dd: f64,
    /// Drop over the slow window.
    pub slow_dd: f64,
}

/// The scored severity for one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DislocationSeverity {
    /// 0..3.
    pub tier: u8,
    pub name: String,
    pub overlay_extra_exposure_pct: f64,
    pub metrics: DrawdownMetrics,
    /// `tier >= min_active_tier`.
    pub tier_engaged: bool,
}

impl DislocationSeverity {
    /// A zero severity (used when the anchor has no usable history).
    pub fn calm(cfg: &DislocationConfig) -> Self {
        build(0, DrawdownMetrics::default(), cfg)
    }

    /// Replace the tier (scenario `forced_tier` override), re-deriving the
    /// name, overlay percentage, and engagement.
    pub fn with_forced_tier(&self, tier: u8, cfg: &DislocationConfig) -> Self {
        build(tier.min(3), self.metrics, cfg)
    }
}

fn tier_name(tier: u8) -> &'static str {
    match tier {
        0 => "none",
        1 => "mild",
        2 => "significant",
        _ => "severe",
    }
}

fn build(tier: u8, metrics: DrawdownMetrics, cfg: &DislocationConfig) -> DislocationSeverity {
    let overlay_extra_exposure_pct = cfg
        .tiers
        .iter()
        .find(|t| t.tier == tier)
        .map(|t| t.overlay_extra_exposure_pct)
        .unwrap_or(0.0);

    DislocationSeverity {
        tier,
        name: tier_name(tier).to_string(),
        overlay_extra_exposure_pct,
        metrics,
        tier_engaged: tier >= cfg.min_active_tier,
    }
}

/// Score the anchor series.
///
/// `anchor_closes` is the ordered close series (oldest first); only the
/// last `peak_lookback_weeks` bars participate.  The base tier is the
/// largest configured tier whose threshold the peak drawdown reaches; fast
/// and slow drops escalate the tier to at least 2 or 3 at their own
/// thresholds.
pub fn score_severity(anchor_closes: &[f64], cfg: &DislocationConfig) -> DislocationSeverity {
    if anchor_closes.len() < 2 {
        return DislocationSeverity::calm(cfg);
    }

    let start = anchor_closes.len().saturating_sub(cfg.peak_lookback_weeks);
    let window = &anchor_closes[start..];
    let current = window[window.len() - 1];

    let peak = window.iter().copied().fold(f64::MIN, f64::max);
    let peak_dd = if peak > 0.0 {
        ((peak - current) / peak).max(0.0)
    } else {
        0.0
    };

    let fast_dd = window_drop(window, cfg.fast_window_weeks);
    let slow_dd = window_drop(window, cfg.slow_window_weeks);

    let metrics = DrawdownMetrics {
        peak_dd,
        fast_dd,
        slow_dd,
    };

    // Base tier: the deepest threshold reached by the peak drawdown.
    let mut tier = cfg
        .tiers
        .iter()
        .filter(|t| peak_dd >= t.threshold)
        .map(|t| t.tier)
        .max()
        .unwrap_or(0);

    // Escalations: a sharp fast or slow drop engages higher tiers even
    // before the peak drawdown catches up.
    let esc = &cfg.escalation;
    if fast_dd >= esc.fast_tier3 {
        tier = tier.max(3);
    } else if fast_dd >= esc.fast_tier2 {
        tier = tier.max(2);
    }
    if slow_dd >= esc.slow_tier3 {
        tier = tier.max(3);
    } else if slow_dd >= esc.slow_tier2 {
        tier = tier.max(2);
    }

    build(tier, metrics, cfg)
}

/// Drop over the trailing `window` bars, floored at zero (a rally is not a
/// negative drawdown).
fn window_drop(closes: &[f64], window: usize) -> f64 {
    if window == 0 || closes.len() < window + 1 {
        return 0.0;
    }
    let reference = closes[closes.len() - 1 - window];
    let current = closes[closes.len() - 1];
    if reference <= 0.0 {
        return 0.0;
    }
    ((reference - current) / reference).max(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
