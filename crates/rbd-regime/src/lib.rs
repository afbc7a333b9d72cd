//! rbd-regime
//!
//! Regime & policy derivation: maps the anchor symbols' features to a
//! [`RegimeSnapshot`] (equity label + confidence, vol label, rates label)
//! and a base-exposure cap [`ExposurePolicy`].
//!
//! Pure deterministic logic over feature snapshots; no IO.

mod policy;
mod snapshot;

pub use policy::{derive_policy, ExposurePolicy};
pub use snapshot::{
    confidence_bucket, derive_regimes, regime_key_value, ConfidenceBucket, EquityLabel,
    EquityRegime, RatesLabel, RatesRegime, RatesStance, RegimeSnapshot, TransitionRisk, VolLabel,
};
