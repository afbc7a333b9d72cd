//! Deterministic weekly close-series builders.

/// Linear ramp ending exactly at `end`, sized so the 12-bar trailing
/// return is `m / (1 − m)`: `closes[i] = end × (1 + m × (i − (n−1)) / 12)`.
///
/// Momentum over the long (12-bar) weekly window is then identical for any
/// two ramps with the same `m`, regardless of `end`.
pub fn ramp(end: f64, m: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| end * (1.0 + m * (i as f64 - (n as f64 - 1.0)) / 12.0))
        .collect()
}

/// Deterministic pseudo-noisy series around `base` (±`amp`), at least
/// seven distinct values so the flat-history gate never fires.
pub fn wiggle(base: f64, amp: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| base + amp * (((i * 7) % 13) as f64 - 6.0) / 6.0)
        .collect()
}
