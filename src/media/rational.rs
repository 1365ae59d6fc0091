//! Exact rational time values
//!
//! Timestamps and durations flow through the pipeline as rationals rather
//! than floats, so that thousands of frames at a non-integer frame rate
//! accumulate no drift.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// A rational number `num / den`, always stored normalized: `den > 0` and
/// `gcd(num, den) == 1`. Arithmetic widens to i128 internally, so pipeline
/// scale values (millisecond numerators, sample-rate denominators) never
/// overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    num: i64,
    den: i64,
}

pub const ZERO: Rational = Rational { num: 0, den: 1 };

fn gcd(mut a: i128, mut b: i128) -> i128 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

fn reduce(num: i128, den: i128) -> Rational {
    debug_assert!(den != 0, "rational with zero denominator");
    let sign = if den < 0 { -1 } else { 1 };
    let g = gcd(num, den);
    Rational {
        num: (sign * num / g) as i64,
        den: (sign * den / g) as i64,
    }
}

impl Rational {
    pub const ZERO: Rational = ZERO;

    pub fn new(num: i64, den: i64) -> Self {
        reduce(num as i128, den as i128)
    }

    pub fn from_int(value: i64) -> Self {
        Rational { num: value, den: 1 }
    }

    /// Milliseconds expressed in seconds, e.g. `from_millis(500) == 1/2`.
    pub fn from_millis(ms: i64) -> Self {
        Rational::new(ms, 1000)
    }

    pub fn numerator(&self) -> i64 {
        self.num
    }

    pub fn denominator(&self) -> i64 {
        self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Multiplicative inverse. Panics on zero, which would be a malformed
    /// frame rate long before it reaches time arithmetic.
    pub fn inverse(&self) -> Self {
        assert!(self.num != 0, "inverse of zero");
        reduce(self.den as i128, self.num as i128)
    }

    pub fn mul_int(&self, factor: i64) -> Self {
        reduce(self.num as i128 * factor as i128, self.den as i128)
    }

    /// Smallest integer >= self.
    pub fn ceil(&self) -> i64 {
        let (n, d) = (self.num as i128, self.den as i128);
        let q = n.div_euclid(d);
        let r = n.rem_euclid(d);
        (if r == 0 { q } else { q + 1 }) as i64
    }

    /// Largest integer <= self.
    pub fn floor(&self) -> i64 {
        (self.num as i128).div_euclid(self.den as i128) as i64
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        reduce(
            self.num as i128 * rhs.den as i128 + rhs.num as i128 * self.den as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Sub for Rational {
    type Output = Rational;

    fn sub(self, rhs: Rational) -> Rational {
        reduce(
            self.num as i128 * rhs.den as i128 - rhs.num as i128 * self.den as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Mul for Rational {
    type Output = Rational;

    fn mul(self, rhs: Rational) -> Rational {
        reduce(
            self.num as i128 * rhs.num as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Div for Rational {
    type Output = Rational;

    fn div(self, rhs: Rational) -> Rational {
        assert!(rhs.num != 0, "division by zero rational");
        reduce(
            self.num as i128 * rhs.den as i128,
            self.den as i128 * rhs.num as i128,
        )
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Rational) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Rational) -> Ordering {
        // Denominators are positive, so cross multiplication preserves order.
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(Rational::new(2, 4), Rational::new(1, 2));
        assert_eq!(Rational::new(-2, -4), Rational::new(1, 2));
        assert_eq!(Rational::new(2, -4), Rational::new(-1, 2));
        assert_eq!(Rational::new(0, 7), Rational::ZERO);
    }

    #[test]
    fn test_arithmetic() {
        let a = Rational::new(1, 3);
        let b = Rational::new(1, 4);
        assert_eq!(a + b, Rational::new(7, 12));
        assert_eq!(a - b, Rational::new(1, 12));
        assert_eq!(a * b, Rational::new(1, 12));
        assert_eq!(a / b, Rational::new(4, 3));
    }

    #[test]
    fn test_ordering() {
        assert!(Rational::new(1, 3) > Rational::new(1, 4));
        assert!(Rational::new(-1, 3) < Rational::ZERO);
        assert_eq!(Rational::new(30, 1).inverse(), Rational::new(1, 30));
    }

    #[test]
    fn test_ceil_floor() {
        assert_eq!(Rational::new(4, 3).ceil(), 2);
        assert_eq!(Rational::new(4, 3).floor(), 1);
        assert_eq!(Rational::new(4, 2).ceil(), 2);
        assert_eq!(Rational::new(-4, 3).ceil(), -1);
        assert_eq!(Rational::new(-4, 3).floor(), -2);
    }

    #[test]
    fn test_no_drift_at_odd_frame_rates() {
        // 10_000 frames at 29.97 fps (30000/1001) sum to an exact duration.
        let dur = Rational::new(30000, 1001).inverse();
        let mut t = Rational::ZERO;
        for _ in 0..10_000 {
            t = t + dur;
        }
        assert_eq!(t, Rational::new(10_000 * 1001, 30000));
    }
}
