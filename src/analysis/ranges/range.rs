//! The numeric range record.
//!
//! A [`Range`] describes every value a definition may produce at runtime with two
//! independent pieces of information:
//!
//! - optional int32 bounds `lower..=upper` that hold for every non-NaN value, where a
//!   missing bound means "unbounded in that direction" (possibly infinite),
//! - a magnitude exponent `e` saying `|x| < 2^(e+1)` for every finite value, with two
//!   sentinels above the finite exponents admitting infinities and NaN.
//!
//! ```text
//!   max_exponent   meaning
//!   0..=1023       finite, |x| < 2^(e+1)
//!   1024           may also be +/-Infinity
//!   u16::MAX       may also be NaN
//! ```
//!
//! Ranges are kept normalized: both bounds present implies finite and not NaN, a small
//! exponent implies bounds, and bounds imply the smallest exponent that covers them.
//!
//! # Examples
//!
//! ```rust
//! use jitmir::Range;
//!
//! let byte = Range::int32(0, 255);
//! assert_eq!(byte.max_exponent(), 7);
//! assert!(byte.contains(255.0));
//! assert!(!byte.contains(0.5));
//!
//! let joined = byte.union(&Range::int32(-1, -1));
//! assert_eq!((joined.lower(), joined.upper()), (Some(-1), Some(255)));
//! assert!(byte.intersect(&Range::int32(300, 400)).is_none());
//! ```

use std::fmt;

use crate::mir::{Constant, MirType};

/// Largest exponent of an int32 magnitude (`|INT32_MIN| = 2^31`).
pub const MAX_INT32_EXPONENT: u16 = 31;
/// Largest exponent at which every integer is exactly representable as a double.
pub const MAX_TRUNCATABLE_EXPONENT: u16 = 53;
/// Largest exponent of a finite double.
pub const MAX_FINITE_EXPONENT: u16 = 1023;
/// Exponent sentinel admitting infinities.
pub const INCLUDES_INFINITY: u16 = MAX_FINITE_EXPONENT + 1;
/// Exponent sentinel admitting infinities and NaN.
pub const INCLUDES_INFINITY_AND_NAN: u16 = u16::MAX;

/// Inferred set of runtime values of a numeric or boolean definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    lower: Option<i32>,
    upper: Option<i32>,
    has_fraction: bool,
    max_exponent: u16,
}

fn floor_log2(value: u64) -> u16 {
    (63 - (value | 1).leading_zeros()) as u16
}

fn exponent_of(value: f64) -> u16 {
    if value.is_nan() {
        return INCLUDES_INFINITY_AND_NAN;
    }
    if value.is_infinite() {
        return INCLUDES_INFINITY;
    }
    let biased = ((value.to_bits() >> 52) & 0x7ff) as i32;
    (biased - 1023).max(0) as u16
}

impl Range {
    /// Creates a normalized range.
    ///
    /// Inputs describing an empty set (bounds crossing each other or excluded by the
    /// exponent) yield [`Range::unknown`], which is always a sound answer.
    #[must_use]
    pub fn new(
        lower: Option<i32>,
        upper: Option<i32>,
        has_fraction: bool,
        max_exponent: u16,
    ) -> Range {
        Range::checked(lower, upper, has_fraction, max_exponent).unwrap_or_else(Range::unknown)
    }

    /// Creates a range from 64-bit bounds, dropping or saturating bounds outside int32.
    ///
    /// A lower bound above `i32::MAX` becomes `i32::MAX` and one below `i32::MIN` is
    /// dropped; upper bounds are handled symmetrically.
    #[must_use]
    pub fn from_i64(
        lower: Option<i64>,
        upper: Option<i64>,
        has_fraction: bool,
        max_exponent: u16,
    ) -> Range {
        let lower = lower.and_then(|l| {
            if l > i64::from(i32::MAX) {
                Some(i32::MAX)
            } else {
                i32::try_from(l).ok()
            }
        });
        let upper = upper.and_then(|u| {
            if u < i64::from(i32::MIN) {
                Some(i32::MIN)
            } else {
                i32::try_from(u).ok()
            }
        });
        Range::new(lower, upper, has_fraction, max_exponent)
    }

    /// Normalizes the fields, returning `None` if they describe no value at all.
    pub(crate) fn checked(
        mut lower: Option<i32>,
        mut upper: Option<i32>,
        mut has_fraction: bool,
        mut max_exponent: u16,
    ) -> Option<Range> {
        // A small exponent bounds the magnitude tightly enough to imply int32 bounds.
        let implied_limit = if has_fraction {
            (max_exponent < 30).then(|| 1i32 << (max_exponent + 1))
        } else {
            (max_exponent < MAX_INT32_EXPONENT).then(|| (1i32 << (max_exponent + 1)) - 1)
        };
        if let Some(limit) = implied_limit {
            lower = Some(lower.map_or(-limit, |l| l.max(-limit)));
            upper = Some(upper.map_or(limit, |u| u.min(limit)));
        }

        if let (Some(l), Some(u)) = (lower, upper) {
            if l > u {
                return None;
            }
            let magnitude = i64::from(l).unsigned_abs().max(i64::from(u).unsigned_abs());
            max_exponent = max_exponent.min(floor_log2(magnitude));
            if l == u {
                has_fraction = false;
            }
        }

        Some(Range {
            lower,
            upper,
            has_fraction,
            max_exponent,
        })
    }

    /// The range admitting every number, infinities and NaN included.
    #[must_use]
    pub const fn unknown() -> Range {
        Range {
            lower: None,
            upper: None,
            has_fraction: true,
            max_exponent: INCLUDES_INFINITY_AND_NAN,
        }
    }

    /// The integers `lower..=upper`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `lower > upper`.
    #[must_use]
    pub fn int32(lower: i32, upper: i32) -> Range {
        debug_assert!(lower <= upper, "empty int32 range [{lower}, {upper}]");
        Range::new(Some(lower), Some(upper), false, MAX_INT32_EXPONENT)
    }

    /// Every int32 value.
    #[must_use]
    pub fn int32_full() -> Range {
        Range::int32(i32::MIN, i32::MAX)
    }

    /// The exact constant `value`.
    #[must_use]
    pub fn constant(value: i32) -> Range {
        Range::int32(value, value)
    }

    /// The range containing exactly the double `value` (plus its integer neighbours when
    /// it has a fractional part).
    #[must_use]
    pub fn from_f64(value: f64) -> Range {
        if value.is_nan() {
            return Range {
                lower: None,
                upper: None,
                has_fraction: false,
                max_exponent: INCLUDES_INFINITY_AND_NAN,
            };
        }
        if value.is_infinite() {
            return if value > 0.0 {
                Range::new(Some(i32::MAX), None, false, INCLUDES_INFINITY)
            } else {
                Range::new(None, Some(i32::MIN), false, INCLUDES_INFINITY)
            };
        }
        let lower = value.floor();
        let upper = value.ceil();
        let to_i64 = |v: f64| {
            if v > i64::MAX as f64 {
                i64::MAX
            } else if v < i64::MIN as f64 {
                i64::MIN
            } else {
                v as i64
            }
        };
        Range::from_i64(
            Some(to_i64(lower)),
            Some(to_i64(upper)),
            value.fract() != 0.0,
            exponent_of(value),
        )
    }

    /// Range of a constant, or `None` for constants without a numeric range.
    #[must_use]
    pub fn from_constant(value: &Constant) -> Option<Range> {
        match *value {
            Constant::Int32(v) => Some(Range::constant(v)),
            Constant::Boolean(b) => Some(Range::constant(i32::from(b))),
            Constant::Double(d) => Some(Range::from_f64(d)),
            Constant::Undefined => None,
        }
    }

    /// The widest range a definition of type `ty` may have, or `None` if the type carries
    /// no range.
    #[must_use]
    pub fn for_type(ty: MirType) -> Option<Range> {
        match ty {
            MirType::Int32 => Some(Range::int32_full()),
            MirType::Boolean => Some(Range::int32(0, 1)),
            MirType::Double => Some(Range::unknown()),
            MirType::None | MirType::Value | MirType::Object => None,
        }
    }

    /// Lower int32 bound of every non-NaN value.
    #[must_use]
    pub const fn lower(&self) -> Option<i32> {
        self.lower
    }

    /// Upper int32 bound of every non-NaN value.
    #[must_use]
    pub const fn upper(&self) -> Option<i32> {
        self.upper
    }

    /// Returns `true` if some value may have a fractional part.
    #[must_use]
    pub const fn has_fraction(&self) -> bool {
        self.has_fraction
    }

    /// Magnitude exponent, see the module documentation.
    #[must_use]
    pub const fn max_exponent(&self) -> u16 {
        self.max_exponent
    }

    /// Number of significant integer bits of the magnitude.
    #[must_use]
    pub const fn num_bits(&self) -> u32 {
        self.max_exponent as u32 + 1
    }

    /// Both bounds present.
    #[must_use]
    pub const fn has_int32_bounds(&self) -> bool {
        self.lower.is_some() && self.upper.is_some()
    }

    /// Returns `true` if every value is an int32.
    #[must_use]
    pub const fn is_int32(&self) -> bool {
        self.has_int32_bounds() && !self.has_fraction
    }

    /// The single value of the range, if there is exactly one.
    #[must_use]
    pub fn constant_value(&self) -> Option<i32> {
        match (self.lower, self.upper) {
            (Some(l), Some(u)) if l == u => Some(l),
            _ => None,
        }
    }

    /// Returns `true` if NaN may occur.
    #[must_use]
    pub const fn can_be_nan(&self) -> bool {
        self.max_exponent == INCLUDES_INFINITY_AND_NAN
    }

    /// Returns `true` if an infinity or NaN may occur.
    #[must_use]
    pub const fn can_be_infinite_or_nan(&self) -> bool {
        self.max_exponent >= INCLUDES_INFINITY
    }

    /// Returns `true` if zero may occur.
    #[must_use]
    pub fn can_be_zero(&self) -> bool {
        self.lower.is_none_or(|l| l <= 0) && self.upper.is_none_or(|u| u >= 0)
    }

    /// Returns `true` if every value is finite and at least zero.
    #[must_use]
    pub fn is_finite_non_negative(&self) -> bool {
        self.lower.is_some_and(|l| l >= 0) && self.upper.is_some()
    }

    /// Returns `true` if every value is finite and below zero.
    #[must_use]
    pub fn is_finite_negative(&self) -> bool {
        self.upper.is_some_and(|u| u < 0) && self.lower.is_some()
    }

    /// Returns `true` if representing a value of this range as an int32 may lose
    /// information.
    #[must_use]
    pub const fn can_have_rounding_errors(&self) -> bool {
        self.has_fraction || self.max_exponent >= MAX_TRUNCATABLE_EXPONENT
    }

    /// Returns `true` if `value` belongs to the range.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.can_be_nan();
        }
        if value.is_infinite() {
            let unbounded = if value > 0.0 {
                self.upper.is_none()
            } else {
                self.lower.is_none()
            };
            return self.can_be_infinite_or_nan() && unbounded;
        }
        if self.lower.is_some_and(|l| value < f64::from(l))
            || self.upper.is_some_and(|u| value > f64::from(u))
        {
            return false;
        }
        if !self.has_fraction && value.fract() != 0.0 {
            return false;
        }
        if self.max_exponent <= MAX_FINITE_EXPONENT {
            let limit = 2f64.powi(i32::from(self.max_exponent) + 1);
            if value.abs() >= limit {
                return false;
            }
        }
        true
    }

    /// Smallest range containing both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Range) -> Range {
        let lower = self.lower.zip(other.lower).map(|(a, b)| a.min(b));
        let upper = self.upper.zip(other.upper).map(|(a, b)| a.max(b));
        Range::new(
            lower,
            upper,
            self.has_fraction || other.has_fraction,
            self.max_exponent.max(other.max_exponent),
        )
    }

    /// Values in both ranges, or `None` if the ranges are disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let lower = match (self.lower, other.lower) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let upper = match (self.upper, other.upper) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Range::checked(
            lower,
            upper,
            self.has_fraction && other.has_fraction,
            self.max_exponent.min(other.max_exponent),
        )
    }

    /// Range of `ToInt32(x)` for every `x` in this range.
    ///
    /// Without both bounds the conversion may wrap around, so the result is every int32.
    #[must_use]
    pub fn wrap_to_int32(&self) -> Range {
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => Range::int32(l, u),
            _ => Range::int32_full(),
        }
    }
}

impl Default for Range {
    fn default() -> Self {
        Range::unknown()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lower {
            Some(l) => write!(f, "[{l}, ")?,
            None => f.write_str("[-inf, ")?,
        }
        match self.upper {
            Some(u) => write!(f, "{u}]")?,
            None => f.write_str("+inf]")?,
        }
        if self.has_fraction {
            f.write_str(" (fractional)")?;
        }
        match self.max_exponent {
            INCLUDES_INFINITY_AND_NAN => f.write_str(" (nan)"),
            INCLUDES_INFINITY => f.write_str(" (inf)"),
            e if !self.has_int32_bounds() => write!(f, " (< pow(2, {}))", u32::from(e) + 1),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_normalizes_exponent() {
        assert_eq!(Range::int32(0, 0).max_exponent(), 0);
        assert_eq!(Range::int32(0, 1).max_exponent(), 0);
        assert_eq!(Range::int32(-4, 3).max_exponent(), 2);
        assert_eq!(Range::int32_full().max_exponent(), MAX_INT32_EXPONENT);
        assert!(Range::int32_full().is_int32());
    }

    #[test]
    fn test_bounds_imply_finite() {
        let r = Range::new(Some(-3), Some(7), true, INCLUDES_INFINITY_AND_NAN);
        assert!(!r.can_be_nan());
        assert!(!r.contains(f64::NAN));
        assert!(!r.contains(f64::INFINITY));
        assert!(r.contains(6.5));
        assert_eq!(r.max_exponent(), 2);
    }

    #[test]
    fn test_small_exponent_implies_bounds() {
        let r = Range::new(Some(5), None, false, 2);
        assert_eq!((r.lower(), r.upper()), (Some(5), Some(7)));

        let frac = Range::new(None, None, true, 0);
        assert_eq!((frac.lower(), frac.upper()), (Some(-2), Some(2)));
        assert!(frac.contains(1.75));
        assert!(!frac.contains(2.0));
    }

    #[test]
    fn test_single_value_has_no_fraction() {
        let r = Range::new(Some(4), Some(4), true, MAX_FINITE_EXPONENT);
        assert!(!r.has_fraction());
        assert_eq!(r.constant_value(), Some(4));
    }

    #[test]
    fn test_from_i64_saturates() {
        let above = Range::from_i64(Some(i64::from(i32::MAX) + 10), None, false, 40);
        assert_eq!(above.lower(), Some(i32::MAX));
        assert_eq!(above.upper(), None);

        let below = Range::from_i64(Some(i64::from(i32::MIN) - 1), Some(0), false, 40);
        assert_eq!(below.lower(), None);
        assert_eq!(below.upper(), Some(0));

        let wide = Range::from_i64(Some(-1), Some(1 << 40), false, 40);
        assert_eq!((wide.lower(), wide.upper()), (Some(-1), None));
        assert!(wide.contains((1u64 << 40) as f64 - 1.0));
    }

    #[test]
    fn test_from_f64() {
        let half = Range::from_f64(2.5);
        assert_eq!((half.lower(), half.upper()), (Some(2), Some(3)));
        assert!(half.has_fraction());
        assert!(half.contains(2.5));

        let nan = Range::from_f64(f64::NAN);
        assert!(nan.contains(f64::NAN));
        assert!(nan.can_be_nan());

        let inf = Range::from_f64(f64::NEG_INFINITY);
        assert!(inf.contains(f64::NEG_INFINITY));
        assert!(!inf.contains(f64::INFINITY));
        assert!(!inf.contains(f64::NAN));

        let big = Range::from_f64(1e300);
        assert!(big.contains(1e300));
        assert!(!big.can_be_infinite_or_nan());
    }

    #[test]
    fn test_union_and_intersect() {
        let a = Range::int32(1, 1);
        let b = Range::int32(2, 2);
        let u = a.union(&b);
        assert_eq!((u.lower(), u.upper()), (Some(1), Some(2)));
        assert!(!u.has_fraction());

        let open = Range::new(Some(0), None, true, INCLUDES_INFINITY_AND_NAN);
        let both = open.intersect(&Range::int32(-5, 10)).unwrap();
        assert_eq!(both, Range::int32(0, 10));
        assert!(open.union(&Range::int32(-5, 10)).lower() == Some(-5));

        assert_eq!(Range::int32(0, 3).intersect(&Range::int32(4, 9)), None);
    }

    #[test]
    fn test_contains_respects_every_component() {
        let r = Range::int32(-1, 10);
        assert!(r.contains(-1.0));
        assert!(r.contains(10.0));
        assert!(!r.contains(11.0));
        assert!(!r.contains(0.5));

        let unknown = Range::unknown();
        for v in [f64::NAN, f64::INFINITY, -0.0, 1e308, f64::MIN_POSITIVE] {
            assert!(unknown.contains(v), "{v}");
        }
    }

    #[test]
    fn test_wrap_to_int32() {
        let frac = Range::new(Some(-2), Some(3), true, MAX_FINITE_EXPONENT);
        assert_eq!(frac.wrap_to_int32(), Range::int32(-2, 3));
        assert_eq!(Range::unknown().wrap_to_int32(), Range::int32_full());
    }

    #[test]
    fn test_rounding_errors() {
        assert!(!Range::int32_full().can_have_rounding_errors());
        assert!(Range::new(Some(0), Some(1), true, 0).can_have_rounding_errors());
        assert!(Range::new(None, None, false, MAX_TRUNCATABLE_EXPONENT).can_have_rounding_errors());
        assert!(!Range::new(None, None, false, 52).can_have_rounding_errors());
    }

    #[test]
    fn test_display() {
        assert_eq!(Range::int32(0, 10).to_string(), "[0, 10]");
        assert_eq!(Range::unknown().to_string(), "[-inf, +inf] (fractional) (nan)");
        assert_eq!(
            Range::new(Some(0), None, false, 40).to_string(),
            "[0, +inf] (< pow(2, 41))"
        );
    }
}
