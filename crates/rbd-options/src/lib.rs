//! rbd-options
//!
//! The option-sleeve arbitrator: one insurance PUT and one growth CALL,
//! mutually exclusive, drawing premium only from the reserve pool.
//!
//! - Insurance opens exactly once per dislocation episode, on the
//!   rising-edge tick, and unwinds when the episode ends (or early-exits).
//! - Growth opens only in calm risk-on conditions with insurance inactive.
//! - The premium model is deterministic (price × κ × vol-proxy), not a real
//!   option pricer; positions are marked at cost on their opening tick and
//!   at intrinsic + decaying extrinsic afterwards.
//!
//! Pure deterministic logic; reserve accounting only — no broker wiring.

mod arbitrate;
mod types;

pub use arbitrate::{
    arbitrate_options, OptionAction, OptionActionKind, OptionInputs, OptionOutcome,
    OptionSleeveId, FLAG_CONTRACTS_ROUND_TO_ZERO, FLAG_RESERVE_EXCEEDED,
};
pub use types::{
    vol_proxy_for_tier, OptionKind, OptionPosition, OptionSleeve, OptionSleeves, SleeveState,
    CONTRACT_MULTIPLIER, KAPPA_GROWTH, KAPPA_INSURANCE,
};
