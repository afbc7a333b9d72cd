//! Post-trade invariant reconciliation.
//!
//! Violations mark the tick, they never roll it back: the engine is
//! deterministic given inputs, so a silent repair would erase the signal
//! the operator needs.

use rbd_options::OptionSleeves;
use rbd_portfolio::{CapitalBudgets, CashEvent, Micros, Order, Portfolio, SleeveIndex, SleeveKind, Side};
use serde::{Deserialize, Serialize};

/// Cash-conservation tolerance: one cent.
const CASH_EPSILON: Micros = Micros::new(10_000);

/// Reserve-wall tolerance: 1e-6 dollars.
const RESERVE_EPSILON: Micros = Micros::new(1);

/// One violated invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub code: String,
    pub detail: String,
}

/// The tick's invariant verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub ok: bool,
    pub violations: Vec<InvariantViolation>,
}

/// Everything the reconciler inspects.
pub struct InvariantChecks<'a> {
    pub cash_before: Micros,
    pub portfolio: &'a Portfolio,
    pub sleeves: &'a SleeveIndex,
    pub option_sleeves: &'a OptionSleeves,
    pub cash_events: &'a [CashEvent],
    pub orders: &'a [Order],
    pub budgets: &'a CapitalBudgets,
    pub nav_after: Micros,
    /// Σ option marks reported in the diagnostics.
    pub options_mark_reported: Micros,
    /// Σ option marks recomputed independently.
    pub options_mark_recomputed: Micros,
}

/// Run every check; collect violations.
pub fn reconcile_invariants(checks: &InvariantChecks<'_>) -> InvariantReport {
    let mut violations: Vec<InvariantViolation> = Vec::new();
    let mut push = |code: &str, detail: String| {
        violations.push(InvariantViolation {
            code: code.to_string(),
            detail,
        });
    };

    // Cash conservation: prior cash + Σ signed amounts == post cash.
    let event_sum: Micros = checks.cash_events.iter().map(|e| e.amount).sum();
    let expected_cash = checks.cash_before + event_sum;
    let delta = (checks.portfolio.cash - expected_cash).abs();
    if delta > CASH_EPSILON {
        push(
            "UNEXPLAINED_CASH_DELTA",
            format!(
                "cash {} != prior {} + events {} (delta {})",
                checks.portfolio.cash, checks.cash_before, event_sum, delta
            ),
        );
    }

    // NAV sanity.
    if checks.nav_after.is_negative() {
        push("NAV_NEGATIVE", format!("nav {}", checks.nav_after));
    }

    // Options market value agreement.
    let mark_delta = (checks.options_mark_reported - checks.options_mark_recomputed).abs();
    if mark_delta > CASH_EPSILON {
        push(
            "OPTIONS_MARK_MISMATCH",
            format!(
                "reported {} vs recomputed {}",
                checks.options_mark_reported, checks.options_mark_recomputed
            ),
        );
    }

    // Reserve wall.
    let reserve_used = checks.option_sleeves.reserve_used();
    if reserve_used > checks.budgets.reserve_budget + RESERVE_EPSILON {
        push(
            "RESERVE_WALL_BREACHED",
            format!(
                "reserve used {} > budget {}",
                reserve_used, checks.budgets.reserve_budget
            ),
        );
    }

    // Core wall: Σ ETF buy notionals within the core budget.
    let buy_notional: Micros = checks
        .orders
        .iter()
        .filter(|o| o.side == Side::Buy && o.sleeve == SleeveKind::Base)
        .map(|o| o.est_notional)
        .sum();
    if buy_notional > checks.budgets.core_budget + RESERVE_EPSILON {
        push(
            "CORE_WALL_BREACHED",
            format!(
                "base buys {} > core budget {}",
                buy_notional, checks.budgets.core_budget
            ),
        );
    }

    // Whole shares.
    for o in checks.orders {
        if o.qty <= 0 {
            push(
                "NON_POSITIVE_ORDER_QTY",
                format!("{} {:?} qty {}", o.symbol, o.side, o.qty),
            );
        }
    }

    // Sleeve integrity: base + dislocation == held, every symbol.
    for (symbol, lot) in &checks.portfolio.holdings {
        let entry = checks.sleeves.entry(symbol);
        if entry.total() != lot.qty {
            push(
                "SLEEVE_SUM_MISMATCH",
                format!(
                    "{symbol}: base {} + dislocation {} != held {}",
                    entry.base_qty, entry.dislocation_qty, lot.qty
                ),
            );
        }
    }
    for (symbol, entry) in &checks.sleeves.entries {
        if checks.portfolio.qty(symbol) == 0 && entry.total() != 0 {
            push(
                "SLEEVE_SUM_MISMATCH",
                format!("{symbol}: sleeve entry without holdings"),
            );
        }
    }

    InvariantReport {
        ok: violations.is_empty(),
        violations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rbd_portfolio::{partition_capital, CashEventKind};

    fn budgets(nav: i64) -> CapitalBudgets {
        let nav = Micros::from_whole_dollars(nav);
        partition_capital(nav, nav, 0.7, 0.0)
    }

    fn base_checks<'a>(
        portfolio: &'a Portfolio,
        sleeves: &'a SleeveIndex,
        options: &'a OptionSleeves,
        events: &'a [CashEvent],
        orders: &'a [Order],
        budgets: &'a CapitalBudgets,
        cash_before: Micros,
    ) -> InvariantChecks<'a> {
        InvariantChecks {
            cash_before,
            portfolio,
            sleeves,
            option_sleeves: options,
            cash_events: events,
            orders,
            budgets,
            nav_after: Micros::from_whole_dollars(2000),
            options_mark_reported: Micros::ZERO,
            options_mark_recomputed: Micros::ZERO,
        }
    }

    #[test]
    fn clean_tick_passes() {
        let mut portfolio = Portfolio::new(Micros::from_whole_dollars(2000));
        let t = Utc.with_ymd_and_hms(2025, 1, 6, 21, 0, 0).unwrap();
        portfolio.apply_buy("SPY", 4, Micros::from_whole_dollars(100), t);
        let mut sleeves = SleeveIndex::new();
        sleeves.record_buy("SPY", 4, SleeveKind::Base, t);
        let options = OptionSleeves::new();
        let events = vec![CashEvent::new(
            CashEventKind::BuyDebit,
            -Micros::from_whole_dollars(400),
            "buy SPY",
        )];
        let orders: Vec<Order> = Vec::new();
        let b = budgets(2000);

        let report = reconcile_invariants(&base_checks(
            &portfolio,
            &sleeves,
            &options,
            &events,
            &orders,
            &b,
            Micros::from_whole_dollars(2000),
        ));
        assert!(report.ok, "violations: {:?}", report.violations);
    }

    #[test]
    fn unexplained_cash_delta_is_caught() {
        let portfolio = Portfolio::new(Micros::from_whole_dollars(1999));
        let sleeves = SleeveIndex::new();
        let options = OptionSleeves::new();
        let events: Vec<CashEvent> = Vec::new();
        let orders: Vec<Order> = Vec::new();
        let b = budgets(2000);

        let report = reconcile_invariants(&base_checks(
            &portfolio,
            &sleeves,
            &options,
            &events,
            &orders,
            &b,
            Micros::from_whole_dollars(2000),
        ));
        assert!(!report.ok);
        assert_eq!(report.violations[0].code, "UNEXPLAINED_CASH_DELTA");
    }

    #[test]
    fn one_cent_rounding_is_tolerated() {
        let portfolio = Portfolio::new(Micros::new(2_000_000_000 + 9_000));
        let sleeves = SleeveIndex::new();
        let options = OptionSleeves::new();
        let events: Vec<CashEvent> = Vec::new();
        let orders: Vec<Order> = Vec::new();
        let b = budgets(2000);

        let report = reconcile_invariants(&base_checks(
            &portfolio,
            &sleeves,
            &options,
            &events,
            &orders,
            &b,
            Micros::from_whole_dollars(2000),
        ));
        assert!(report.ok);
    }

    #[test]
    fn sleeve_mismatch_is_caught() {
        let mut portfolio = Portfolio::new(Micros::from_whole_dollars(2000));
        let t = Utc.with_ymd_and_hms(2025, 1, 6, 21, 0, 0).unwrap();
        portfolio.apply_buy("SPY", 4, Micros::from_whole_dollars(100), t);
        let mut sleeves = SleeveIndex::new();
        sleeves.record_buy("SPY", 3, SleeveKind::Base, t); // off by one
        let options = OptionSleeves::new();
        let events = vec![CashEvent::new(
            CashEventKind::BuyDebit,
            -Micros::from_whole_dollars(400),
            "buy SPY",
        )];
        let orders: Vec<Order> = Vec::new();
        let b = budgets(2000);

        let report = reconcile_invariants(&base_checks(
            &portfolio,
            &sleeves,
            &options,
            &events,
            &orders,
            &b,
            Micros::from_whole_dollars(2000),
        ));
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "SLEEVE_SUM_MISMATCH"));
    }

    #[test]
    fn core_wall_breach_is_caught() {
        let portfolio = Portfolio::new(Micros::from_whole_dollars(2000));
        let sleeves = SleeveIndex::new();
        let options = OptionSleeves::new();
        let events: Vec<CashEvent> = Vec::new();
        let orders = vec![Order::new(
            "SPY",
            Side::Buy,
            20,
            Micros::from_whole_dollars(2000),
            SleeveKind::Base,
        )];
        let b = budgets(2000); // core budget 1400

        let mut checks = base_checks(
            &portfolio,
            &sleeves,
            &options,
            &events,
            &orders,
            &b,
            Micros::from_whole_dollars(2000),
        );
        checks.cash_before = portfolio.cash;
        let report = reconcile_invariants(&checks);
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "CORE_WALL_BREACHED"));
    }

    #[test]
    fn options_mark_disagreement_is_caught() {
        let portfolio = Portfolio::new(Micros::from_whole_dollars(2000));
        let sleeves = SleeveIndex::new();
        let options = OptionSleeves::new();
        let events: Vec<CashEvent> = Vec::new();
        let orders: Vec<Order> = Vec::new();
        let b = budgets(2000);

        let mut checks = base_checks(
            &portfolio,
            &sleeves,
            &options,
            &events,
            &orders,
            &b,
            Micros::from_whole_dollars(2000),
        );
        checks.options_mark_reported = Micros::from_whole_dollars(50);
        let report = reconcile_invariants(&checks);
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "OPTIONS_MARK_MISMATCH"));
    }
}
