//! rbd-rebalance
//!
//! The two whole-share planners:
//! - [`plan_rebalance`] (C8) — diffs current holdings against executed
//!   target weights and produces an ordered SELL-then-BUY plan honouring
//!   sell protection, dust/min-trade filters, and cash feasibility.
//! - [`plan_overlay`] (C9) — the opportunistic dislocation buy budget
//!   (cap, cash floor, min-budget policy, min-lot, ADD-phase pacing) and
//!   its largest-remainder whole-share allocation.
//!
//! Both return tagged results (`PlanStatus`) with structured flags instead
//! of raising; callers branch explicitly.

mod engine;
mod overlay;

pub use engine::{
    plan_rebalance, PlanStatus, RebalanceDiagnostics, RebalanceInputs, RebalancePlan,
    FLAG_INSUFFICIENT_CASH, FLAG_MAX_NOTIONAL_CAPPED, FLAG_SELL_PROTECTION_APPLIED,
};
pub use overlay::{
    plan_overlay, OverlayInputs, OverlayPlan, FLAG_OVERLAY_DISABLED, FLAG_OVERLAY_MIN_BUDGET,
    FLAG_OVERLAY_PACING_LIMIT, FLAG_OVERLAY_UNDER_MIN_LOT,
};
