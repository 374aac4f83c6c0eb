//! Fixed-point money and rate types.
//!
//! Monetary values are integer micro-dollars, rates are 1e18-scaled integers
//! and percentages are basis points, so chained percentage operations never
//! accumulate floating-point drift. `f64` only appears at the edges (config
//! parsing, log formatting, graph edge weights).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// 1.0 in `Ratio` units
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// 100% in basis points
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Micro-dollars per dollar
pub const USD_SCALE: i128 = 1_000_000;

// ============================================
// BASIS POINTS
// ============================================

/// Hundredths of a percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bps(pub u32);

impl Bps {
    pub const ZERO: Bps = Bps(0);
    pub const MAX: Bps = Bps(BPS_DENOMINATOR);

    /// 0.3 (%) -> 30 bps, rounded to the nearest basis point
    pub fn from_percent(percent: f64) -> Self {
        Bps((percent * 100.0).round().max(0.0) as u32)
    }

    /// 0.003 -> 30 bps
    pub fn from_fraction(fraction: f64) -> Self {
        Self::from_percent(fraction * 100.0)
    }

    pub fn as_percent(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn as_ratio(self) -> Ratio {
        Ratio(self.0 as u128 * (WAD / BPS_DENOMINATOR as u128))
    }

    /// `amount × bps / 10_000`, rounded down
    pub fn of_u128(self, amount: u128) -> u128 {
        amount / BPS_DENOMINATOR as u128 * self.0 as u128
            + amount % BPS_DENOMINATOR as u128 * self.0 as u128 / BPS_DENOMINATOR as u128
    }

    /// `10_000 - self`, saturating
    pub fn complement(self) -> Bps {
        Bps(BPS_DENOMINATOR.saturating_sub(self.0))
    }

    pub fn saturating_add(self, other: Bps) -> Bps {
        Bps(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

// ============================================
// RATIO (1e18 fixed point)
// ============================================

/// Non-negative exchange rate or multiplier scaled by 1e18
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ratio(pub u128);

impl Ratio {
    pub const ZERO: Ratio = Ratio(0);
    pub const ONE: Ratio = Ratio(WAD);

    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Ratio::ZERO;
        }
        Ratio((value * WAD as f64).round() as u128)
    }

    /// `numerator / denominator` without going through floats
    pub fn from_fraction(numerator: u128, denominator: u128) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        mul_div(numerator, WAD, denominator).map(Ratio)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / WAD as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_mul(self, other: Ratio) -> Option<Ratio> {
        mul_div(self.0, other.0, WAD).map(Ratio)
    }

    pub fn checked_div(self, other: Ratio) -> Option<Ratio> {
        if other.0 == 0 {
            return None;
        }
        mul_div(self.0, WAD, other.0).map(Ratio)
    }

    pub fn saturating_sub(self, other: Ratio) -> Ratio {
        Ratio(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Ratio) -> Ratio {
        Ratio(self.0.saturating_add(other.0))
    }

    /// Graph edge weight, `-ln(rate)`
    pub fn neg_ln(self) -> f64 {
        -self.to_f64().ln()
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.to_f64())
    }
}

// ============================================
// USD (micro-dollar minor units)
// ============================================

/// Signed dollar amount held in micro-dollars
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Usd(pub i128);

impl Usd {
    pub const ZERO: Usd = Usd(0);

    pub fn from_dollars(dollars: f64) -> Self {
        Usd((dollars * USD_SCALE as f64).round() as i128)
    }

    pub fn from_whole(dollars: i64) -> Self {
        Usd(dollars as i128 * USD_SCALE)
    }

    pub fn as_dollars(self) -> f64 {
        self.0 as f64 / USD_SCALE as f64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn abs(self) -> Usd {
        Usd(self.0.abs())
    }

    pub fn max(self, other: Usd) -> Usd {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Usd) -> Usd {
        if self <= other { self } else { other }
    }

    /// `self × bps / 10_000`, truncated toward zero
    pub fn mul_bps(self, bps: Bps) -> Usd {
        Usd(self.0 * bps.0 as i128 / BPS_DENOMINATOR as i128)
    }

    /// `self × ratio`, truncated toward zero
    pub fn mul_ratio(self, ratio: Ratio) -> Usd {
        let magnitude = mul_div(self.0.unsigned_abs(), ratio.0, WAD).unwrap_or(u128::MAX);
        let magnitude = magnitude.min(i128::MAX as u128) as i128;
        if self.0 < 0 { Usd(-magnitude) } else { Usd(magnitude) }
    }

    /// `self / other` as a ratio; `None` for a non-positive divisor or negative numerator
    pub fn ratio_to(self, other: Usd) -> Option<Ratio> {
        if other.0 <= 0 || self.0 < 0 {
            return None;
        }
        Ratio::from_fraction(self.0 as u128, other.0 as u128)
    }

    /// `self / other` in basis points, signed
    pub fn bps_of(self, other: Usd) -> i64 {
        if other.0 == 0 {
            return 0;
        }
        (self.0 * BPS_DENOMINATOR as i128 / other.0) as i64
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let cents = (abs + 5_000) / 10_000;
        write!(f, "{}${}.{:02}", sign, cents / 100, cents % 100)
    }
}

impl Add for Usd {
    type Output = Usd;
    fn add(self, rhs: Usd) -> Usd {
        Usd(self.0 + rhs.0)
    }
}

impl Sub for Usd {
    type Output = Usd;
    fn sub(self, rhs: Usd) -> Usd {
        Usd(self.0 - rhs.0)
    }
}

impl Neg for Usd {
    type Output = Usd;
    fn neg(self) -> Usd {
        Usd(-self.0)
    }
}

impl AddAssign for Usd {
    fn add_assign(&mut self, rhs: Usd) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Usd {
    fn sub_assign(&mut self, rhs: Usd) {
        self.0 -= rhs.0;
    }
}

impl Sum for Usd {
    fn sum<I: Iterator<Item = Usd>>(iter: I) -> Usd {
        iter.fold(Usd::ZERO, |acc, x| acc + x)
    }
}

// ============================================
// HELPERS
// ============================================

/// `a × b / denominator` without intermediate overflow for realistic inputs.
/// Returns `None` on a zero denominator or when the result exceeds u128.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    if let Some(product) = a.checked_mul(b) {
        return Some(product / denominator);
    }
    let wide = alloy_primitives::U256::from(a) * alloy_primitives::U256::from(b)
        / alloy_primitives::U256::from(denominator);
    u128::try_from(wide).ok()
}

/// Whole-token value of a raw on-chain amount, as a ratio (`raw / 10^decimals`)
pub fn normalize_amount(raw: u128, decimals: u8) -> Option<Ratio> {
    let scale = 10u128.checked_pow(decimals as u32)?;
    Ratio::from_fraction(raw, scale)
}

/// Raw on-chain amount for a whole-token quantity expressed as a ratio
pub fn denormalize_amount(whole: Ratio, decimals: u8) -> Option<u128> {
    let scale = 10u128.checked_pow(decimals as u32)?;
    mul_div(whole.0, scale, WAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_bps_round_trip() {
        for &pct in &[0.0, 0.01, 0.05, 0.3, 1.0, 2.5, 12.34, 99.99, 100.0] {
            let bps = Bps::from_percent(pct);
            let back = bps.as_percent();
            assert!(
                (back - pct).abs() <= 0.01 + 1e-9,
                "{}% -> {} -> {}%",
                pct,
                bps,
                back
            );
        }
        // Sub-bps precision is lost but stays within one unit
        let bps = Bps::from_percent(0.123);
        assert!((bps.as_percent() - 0.123).abs() <= 0.01);
    }

    #[test]
    fn test_bps_of_u128_no_overflow() {
        assert_eq!(Bps(30).of_u128(1_000_000), 3_000);
        assert_eq!(Bps(5).of_u128(u128::MAX), u128::MAX / 2_000);
        assert_eq!(Bps(10_000).of_u128(777), 777);
    }

    #[test]
    fn test_ratio_chain() {
        let a = Ratio::ONE;
        let b = Ratio::ONE;
        let c = Ratio::from_fraction(102, 100).unwrap();
        let product = a.checked_mul(b).and_then(|p| p.checked_mul(c)).unwrap();
        assert_eq!(product, c);
        assert!((c.neg_ln() + 1.02f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_usd_math_and_display() {
        let input = Usd::from_whole(500);
        assert_eq!(input.mul_bps(Bps(5)), Usd::from_dollars(0.25));
        assert_eq!(input.mul_ratio(Ratio::from_fraction(102, 100).unwrap()), Usd::from_whole(510));
        assert_eq!(format!("{}", Usd::from_dollars(7.004)), "$7.00");
        assert_eq!(format!("{}", Usd::from_dollars(-1.5)), "-$1.50");
        assert_eq!(Usd::from_whole(7).bps_of(Usd::from_whole(500)), 140);
    }

    #[test]
    fn test_normalization() {
        // 1234.5 USDC with 6 decimals
        let whole = normalize_amount(1_234_500_000, 6).unwrap();
        assert_eq!(whole, Ratio::from_fraction(12_345, 10).unwrap());
        assert_eq!(denormalize_amount(whole, 6), Some(1_234_500_000));
        assert_eq!(denormalize_amount(Ratio::ONE, 18), Some(WAD));
    }

    #[test]
    fn test_mul_div_wide() {
        let big = u128::MAX / 3;
        assert_eq!(mul_div(big, WAD, WAD), Some(big));
        assert_eq!(mul_div(1, 1, 0), None);
    }
}
