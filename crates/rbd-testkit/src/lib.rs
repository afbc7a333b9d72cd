//! rbd-testkit
//!
//! Deterministic fixtures and a multi-week harness for end-to-end scenario
//! tests:
//! - [`fixtures`] — weekly close-series builders (ramps, crashes, pseudo
//!   noise) with no RNG anywhere,
//! - [`WeekDriver`] — feeds each tick's mutated state into the next, the
//!   way the production loop does,
//! - [`load_close_series`] — `symbol,date,close` CSV fixture loader.
//!
//! The six seeded end-to-end scenarios live under `tests/scenario_*.rs`.

mod csvload;
mod driver;
pub mod fixtures;

pub use csvload::load_close_series;
pub use driver::WeekDriver;
