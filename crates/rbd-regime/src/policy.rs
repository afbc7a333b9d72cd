//! Base-exposure cap policy.

use crate::snapshot::{RegimeSnapshot, VolLabel};
use serde::{Deserialize, Serialize};

/// The exposure cap the allocator and overlay planner must respect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExposurePolicy {
    /// Fraction of NAV that may be invested (0, 1].
    pub base_exposure_cap: f64,
    /// Diagnostics-only tag naming the rule that set the cap.
    pub policy_reason: String,
}

/// Confidence ladder: `< 0.35 → 0.35`, `< 0.6 → 0.6`, else `1.0`; clamped
/// to `0.35` whenever the vol regime is stressed.
pub fn derive_policy(snapshot: &RegimeSnapshot) -> ExposurePolicy {
    let confidence = snapshot.equity.confidence;

    let (cap, reason) = if confidence < 0.35 {
        (0.35, "low_confidence")
    } else if confidence < 0.6 {
        (0.6, "mid_confidence")
    } else {
        (1.0, "full_confidence")
    };

    if snapshot.vol_label == VolLabel::Stressed && cap > 0.35 {
        return ExposurePolicy {
            base_exposure_cap: 0.35,
            policy_reason: "vol_stressed_clamp".to_string(),
        };
    }

    ExposurePolicy {
        base_exposure_cap: cap,
        policy_reason: reason.to_string(),
    }
}
