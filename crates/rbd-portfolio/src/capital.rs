//! Capital partitioning.
//!
//! NAV is split into two disjoint pools every tick:
//! - the **core** pool funds equity ETF buys,
//! - the **reserve** pool funds option premium.
//!
//! The split percentages come from config and must sum to 1.  A per-tick
//! cash floor is derived alongside.  Infusions are applied by the engine
//! before this partition runs; both the pre- and post-infusion NAV are
//! reported for auditability.

use crate::fixedpoint::Micros;
use crate::types::Portfolio;
use crate::MarkMap;
use serde::{Deserialize, Serialize};

/// The tick's capital budgets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalBudgets {
    pub nav_pre_infusion: Micros,
    pub nav_post_infusion: Micros,
    pub core_budget: Micros,
    pub reserve_budget: Micros,
    pub min_cash_floor: Micros,
}

/// `NAV = cash + Σ qty × mark + Σ option marks`.
pub fn total_nav(portfolio: &Portfolio, marks: &MarkMap, options_mark: Micros) -> Micros {
    portfolio.cash + portfolio.market_value(marks) + options_mark
}

/// Split `nav` into core/reserve budgets and derive the cash floor.
///
/// `core_pct + reserve_pct` is expected to equal 1; the reserve budget is
/// computed as the exact remainder (`nav - core`) so the two pools always
/// partition NAV to the micro even when the f64 percentages round
/// differently.
pub fn partition_capital(
    nav_pre_infusion: Micros,
    nav_post_infusion: Micros,
    core_pct: f64,
    min_cash_pct: f64,
) -> CapitalBudgets {
    let core_budget = nav_post_infusion.mul_f64(core_pct);
    let reserve_budget = nav_post_infusion - core_budget;
    let min_cash_floor = nav_post_infusion.mul_f64(min_cash_pct).max(Micros::ZERO);

    CapitalBudgets {
        nav_pre_infusion,
        nav_post_infusion,
        core_budget,
        reserve_budget,
        min_cash_floor,
    }
}
