//! rbd-engine
//!
//! The deterministic decision pipeline, executed once per rebalance tick.
//!
//! One tick is a pure function `(prior EngineState, TickInputs) →
//! (next EngineState, TickResult)`; the caller persists the state between
//! ticks (no hidden globals).  The in-tick ordering is contractual:
//!
//! 1. reconcile sleeves → 2. apply infusions → 3. NAV & budgets →
//! 4. regimes & targets → 5. map → 6. severity → 7. lifecycle →
//! 8. rebalance → 9. apply sells → 10. overlay buys → 11. apply buys →
//! 12. option arbitration → 13. reconcile invariants.
//!
//! Business errors never cross the tick boundary; they surface as flags,
//! tagged plan statuses, and the invariant report.

mod invariants;
mod state;
mod store;
mod tick;

pub use invariants::{reconcile_invariants, InvariantChecks, InvariantReport, InvariantViolation};
pub use state::EngineState;
pub use store::StateStore;
pub use tick::{
    epoch_week, run_tick, ScenarioEvents, TickDiagnostics, TickInputs, TickResult,
};
