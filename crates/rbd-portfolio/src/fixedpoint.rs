//! Fixed-point money type.
//!
//! # Motivation
//!
//! All money amounts in this system use a 1e-6 (micros) fixed-point
//! representation stored as `i64`.  Using raw `i64` for money is error-prone:
//! it allows accidental arithmetic with unrelated integers (share counts,
//! week indices, tier numbers) without any compile-time signal.
//!
//! `Micros` wraps the raw `i64` so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Mixing `Micros` with unrelated `i64` values in arithmetic.
//!
//! # Scale
//!
//! 1 USD = 1_000_000 Micros.  All monetary values (cash, budgets, prices,
//! notionals, option premium) use this scale.  Non-monetary quantities
//! (share counts, contract counts, tick/week counters) remain plain
//! `i64`/`u64`.  Dimensionless ratios (weights, returns, drawdowns) are
//! `f64` and cross into `Micros` only through [`Micros::mul_f64`].
//!
//! # Arithmetic
//!
//! - `Add`, `Sub`, `Neg`, `AddAssign`, `SubAssign` are implemented for
//!   `Micros op Micros`; these panic on overflow in debug builds and wrap in
//!   release (matching Rust's standard integer semantics).
//! - `saturating_add` / `saturating_sub` — clamp at `i64::MAX` / `i64::MIN`.
//! - `checked_mul_qty(qty: i64) -> Option<Micros>` — per-unit price times an
//!   integer share quantity with overflow detection.
//! - `whole_units(price) -> i64` — floor division of a budget by a per-unit
//!   price; the whole-share primitive used throughout the planners.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Price/cash scale: micros (1e-6).
pub const MICROS_SCALE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Micros newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-6 scale (micros).
///
/// 1 USD = `Micros(1_000_000)`.
///
/// # Construction
///
/// Use [`Micros::new`] for explicit construction from a raw micros integer,
/// or [`Micros::from_dollars`] at the input boundary where quotes arrive as
/// decimal dollar values.  There is intentionally no `From<i64>`
/// implementation — callers must be deliberate about when a raw integer
/// represents a monetary amount.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micros(i64);

impl Micros {
    /// Zero monetary amount.
    pub const ZERO: Micros = Micros(0);

    /// One dollar.
    pub const ONE_DOLLAR: Micros = Micros(MICROS_SCALE);

    /// Maximum representable value.
    pub const MAX: Micros = Micros(i64::MAX);

    /// Construct a `Micros` from a raw `i64` at 1e-6 scale.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Construct from whole dollars.
    #[inline]
    pub const fn from_whole_dollars(dollars: i64) -> Self {
        Micros(dollars * MICROS_SCALE)
    }

    /// Construct from a decimal dollar amount, rounding half away from zero.
    ///
    /// Used only at the input boundary (quotes, config amounts); interior
    /// arithmetic never round-trips through `f64` dollars.
    #[inline]
    pub fn from_dollars(dollars: f64) -> Self {
        Micros((dollars * MICROS_SCALE as f64).round() as i64)
    }

    /// Extract the underlying raw `i64`.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Decimal dollar view, for diagnostics and weight arithmetic.
    #[inline]
    pub fn to_dollars(self) -> f64 {
        self.0 as f64 / MICROS_SCALE as f64
    }

    /// Saturating addition — clamps at [`Micros::MAX`] on overflow.
    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction — clamps at `i64::MIN` on underflow.
    #[inline]
    pub fn saturating_sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }

    /// Absolute value.  `Micros::new(i64::MIN).abs()` saturates to MAX.
    #[inline]
    pub fn abs(self) -> Micros {
        Micros(self.0.saturating_abs())
    }

    /// `true` if this amount is non-negative.
    #[inline]
    pub fn is_non_negative(self) -> bool {
        self.0 >= 0
    }

    /// `true` if this amount is strictly negative.
    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `true` if this amount is strictly positive.
    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Multiply a per-unit price by an integer share quantity.
    ///
    /// Returns `None` if the multiplication overflows `i64`.  Callers MUST
    /// handle `None` explicitly; overflow in a trade value calculation is a
    /// structural error, not a routine saturation.
    #[inline]
    pub fn checked_mul_qty(self, qty: i64) -> Option<Micros> {
        self.0.checked_mul(qty).map(Micros)
    }

    /// Scale by a dimensionless `f64` factor (weights, percentages),
    /// rounding to the nearest micro.
    ///
    /// The factor must be finite; a non-finite factor yields zero so that a
    /// corrupted upstream ratio cannot mint or destroy unbounded cash.
    #[inline]
    pub fn mul_f64(self, factor: f64) -> Micros {
        if !factor.is_finite() {
            return Micros::ZERO;
        }
        Micros((self.0 as f64 * factor).round() as i64)
    }

    /// How many whole units at `price` this amount can pay for.
    ///
    /// Floor division; zero when `price` is non-positive (an unpriced symbol
    /// can never be afforded).
    #[inline]
    pub fn whole_units(self, price: Micros) -> i64 {
        if price.0 <= 0 || self.0 <= 0 {
            return 0;
        }
        self.0 / price.0
    }

    /// Smaller of two amounts.
    #[inline]
    pub fn min(self, rhs: Micros) -> Micros {
        if self.0 <= rhs.0 {
            self
        } else {
            rhs
        }
    }

    /// Larger of two amounts.
    #[inline]
    pub fn max(self, rhs: Micros) -> Micros {
        if self.0 >= rhs.0 {
            self
        } else {
            rhs
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Micros)
// ---------------------------------------------------------------------------

impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    #[inline]
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Micros {
    fn sum<I: Iterator<Item = Micros>>(iter: I) -> Micros {
        iter.fold(Micros::ZERO, |acc, m| acc + m)
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl std::fmt::Display for Micros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dollars = self.0 / MICROS_SCALE;
        let frac = (self.0 % MICROS_SCALE).abs();
        // When |value| < $1 and value is negative, dollars truncates to 0,
        // losing the sign.  Emit "-0" explicitly in that case.
        if self.0 < 0 && dollars == 0 {
            write!(f, "-{dollars}.{frac:06}")
        } else {
            write!(f, "{dollars}.{frac:06}")
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_additive_identity() {
        let a = Micros::new(42_000_000);
        assert_eq!(a + Micros::ZERO, a);
        assert_eq!(Micros::ZERO + a, a);
    }

    #[test]
    fn from_dollars_rounds_to_nearest_micro() {
        assert_eq!(Micros::from_dollars(1.5), Micros::new(1_500_000));
        assert_eq!(Micros::from_dollars(0.0000015), Micros::new(2));
        assert_eq!(Micros::from_dollars(-2.75), Micros::new(-2_750_000));
    }

    #[test]
    fn to_dollars_roundtrip() {
        let m = Micros::from_whole_dollars(1234);
        assert!((m.to_dollars() - 1234.0).abs() < 1e-9);
    }

    #[test]
    fn whole_units_floor_division() {
        let budget = Micros::from_whole_dollars(1000);
        let price = Micros::from_whole_dollars(333);
        assert_eq!(budget.whole_units(price), 3);
    }

    #[test]
    fn whole_units_zero_for_unpriced_symbol() {
        let budget = Micros::from_whole_dollars(1000);
        assert_eq!(budget.whole_units(Micros::ZERO), 0);
        assert_eq!(budget.whole_units(Micros::new(-1)), 0);
    }

    #[test]
    fn whole_units_zero_for_empty_budget() {
        assert_eq!(Micros::ZERO.whole_units(Micros::ONE_DOLLAR), 0);
    }

    #[test]
    fn mul_f64_scales_and_rounds() {
        let nav = Micros::from_whole_dollars(2000);
        assert_eq!(nav.mul_f64(0.7), Micros::from_whole_dollars(1400));
        assert_eq!(nav.mul_f64(0.0), Micros::ZERO);
    }

    #[test]
    fn mul_f64_non_finite_factor_yields_zero() {
        let nav = Micros::from_whole_dollars(2000);
        assert_eq!(nav.mul_f64(f64::NAN), Micros::ZERO);
        assert_eq!(nav.mul_f64(f64::INFINITY), Micros::ZERO);
    }

    #[test]
    fn checked_mul_qty_normal() {
        let price = Micros::from_whole_dollars(100);
        assert_eq!(
            price.checked_mul_qty(10),
            Some(Micros::from_whole_dollars(1000))
        );
    }

    #[test]
    fn checked_mul_qty_overflow_returns_none() {
        assert_eq!(Micros::MAX.checked_mul_qty(2), None);
    }

    #[test]
    fn min_max() {
        let a = Micros::new(1);
        let b = Micros::new(2);
        assert_eq!(a.min(b), a);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn sum_over_iterator() {
        let total: Micros = [Micros::new(1), Micros::new(2), Micros::new(3)]
            .into_iter()
            .sum();
        assert_eq!(total, Micros::new(6));
    }

    #[test]
    fn display_formats_with_six_decimal_places() {
        assert_eq!(format!("{}", Micros::new(1_500_000)), "1.500000");
        assert_eq!(format!("{}", Micros::new(-2_750_000)), "-2.750000");
        assert_eq!(format!("{}", Micros::new(-500)), "-0.000500");
    }

    #[test]
    fn serde_is_transparent() {
        let m = Micros::new(123_456);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "123456");
        let back: Micros = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
