//! Per-operation range rules.
//!
//! [`infer`] computes the range of one definition from the ranges of its operands. Phis
//! are merged by the propagation driver because they need to know which predecessors are
//! reachable; every other operation is handled here with one arm per [`MirOp`].
//!
//! All bound arithmetic is carried out in `i64` so that int32 overflow shows up as a bound
//! outside int32, which [`Range::from_i64`] then drops.

use crate::{
    analysis::ranges::range::{
        Range, INCLUDES_INFINITY, INCLUDES_INFINITY_AND_NAN, MAX_FINITE_EXPONENT,
        MAX_INT32_EXPONENT,
    },
    mir::{CompareOp, MirOp, MirType},
};

fn lo(r: &Range) -> Option<i64> {
    r.lower().map(i64::from)
}

fn hi(r: &Range) -> Option<i64> {
    r.upper().map(i64::from)
}

fn both(a: Option<i64>, b: Option<i64>, f: impl Fn(i64, i64) -> i64) -> Option<i64> {
    Some(f(a?, b?))
}

fn additive_exponent(a: &Range, b: &Range) -> u16 {
    let mut e = a.max_exponent().max(b.max_exponent());
    if e <= MAX_FINITE_EXPONENT {
        e += 1;
    }
    // Infinity - Infinity is NaN.
    if a.can_be_infinite_or_nan() && b.can_be_infinite_or_nan() {
        e = INCLUDES_INFINITY_AND_NAN;
    }
    e
}

fn add(a: &Range, b: &Range) -> Range {
    Range::from_i64(
        both(lo(a), lo(b), |x, y| x + y),
        both(hi(a), hi(b), |x, y| x + y),
        a.has_fraction() || b.has_fraction(),
        additive_exponent(a, b),
    )
}

fn sub(a: &Range, b: &Range) -> Range {
    Range::from_i64(
        both(lo(a), hi(b), |x, y| x - y),
        both(hi(a), lo(b), |x, y| x - y),
        a.has_fraction() || b.has_fraction(),
        additive_exponent(a, b),
    )
}

fn mul(a: &Range, b: &Range) -> Range {
    let fraction = a.has_fraction() || b.has_fraction();
    let exponent = if !a.can_be_infinite_or_nan() && !b.can_be_infinite_or_nan() {
        let bits = a.num_bits() + b.num_bits() - 1;
        if bits > u32::from(MAX_FINITE_EXPONENT) {
            INCLUDES_INFINITY
        } else {
            bits as u16
        }
    } else if !a.can_be_nan()
        && !b.can_be_nan()
        && !(a.can_be_zero() && b.can_be_infinite_or_nan())
        && !(b.can_be_zero() && a.can_be_infinite_or_nan())
    {
        INCLUDES_INFINITY
    } else {
        INCLUDES_INFINITY_AND_NAN
    };

    match (lo(a), hi(a), lo(b), hi(b)) {
        (Some(al), Some(ah), Some(bl), Some(bh)) => {
            let corners = [al * bl, al * bh, ah * bl, ah * bh];
            let min = corners.iter().copied().min();
            let max = corners.iter().copied().max();
            Range::from_i64(min, max, fraction, exponent)
        }
        _ => Range::new(None, None, fraction, exponent),
    }
}

fn div(a: &Range, b: &Range) -> Option<Range> {
    if !a.has_int32_bounds() || !b.has_int32_bounds() {
        return None;
    }
    // Dividing by at least one never moves a non-negative value away from zero.
    if a.lower()? >= 0 && b.lower()? >= 1 {
        return Some(Range::new(Some(0), a.upper(), true, a.max_exponent()));
    }
    None
}

fn modulo(a: &Range, b: &Range) -> Option<Range> {
    let (al, ah, bl, bh) = (lo(a)?, hi(a)?, lo(b)?, hi(b)?);
    if bl <= 0 && bh >= 0 {
        return None;
    }
    let mut rhs_bound = bl.abs().max(bh.abs());
    if !a.has_fraction() && !b.has_fraction() {
        rhs_bound -= 1;
    }
    let lhs_bound = al.abs().max(ah.abs());
    let bound = lhs_bound.min(rhs_bound);
    let lower = if al >= 0 { 0 } else { -bound };
    let upper = if ah <= 0 { 0 } else { bound };
    Some(Range::from_i64(
        Some(lower),
        Some(upper),
        a.has_fraction() || b.has_fraction(),
        a.max_exponent().min(b.max_exponent()),
    ))
}

/// Bounds of the ToInt32 image of `r`.
fn int32_bounds(r: &Range) -> (i32, i32) {
    let w = r.wrap_to_int32();
    (w.lower().unwrap_or(i32::MIN), w.upper().unwrap_or(i32::MAX))
}

fn bit_and(a: &Range, b: &Range) -> Range {
    let (al, ah) = int32_bounds(a);
    let (bl, bh) = int32_bounds(b);
    if al < 0 && bl < 0 {
        return Range::int32(i32::MIN, ah.max(bh));
    }
    // At most one side is negative; a negative mask keeps the other side's bits.
    let mut upper = ah.min(bh);
    if al < 0 {
        upper = bh;
    }
    if bl < 0 {
        upper = ah;
    }
    Range::int32(0, upper)
}

fn leading_ones_floor(lower: i32) -> i32 {
    let ones = (!lower).leading_zeros();
    !((u32::MAX.checked_shr(ones).unwrap_or(0)) as i32)
}

fn bit_or(a: &Range, b: &Range) -> Range {
    let (al, ah) = int32_bounds(a);
    let (bl, bh) = int32_bounds(b);
    if al == ah {
        match al {
            0 => return Range::int32(bl, bh),
            -1 => return Range::constant(-1),
            _ => {}
        }
    }
    if bl == bh {
        match bl {
            0 => return Range::int32(al, ah),
            -1 => return Range::constant(-1),
            _ => {}
        }
    }

    let mut lower = i32::MIN;
    let mut upper = i32::MAX;
    if al >= 0 && bl >= 0 {
        lower = al.max(bl);
        let zeros = ah.leading_zeros().min(bh.leading_zeros());
        upper = u32::MAX.checked_shr(zeros).unwrap_or(0) as i32;
    } else {
        if ah < 0 {
            lower = lower.max(leading_ones_floor(al));
            upper = -1;
        }
        if bh < 0 {
            lower = lower.max(leading_ones_floor(bl));
            upper = -1;
        }
    }
    Range::int32(lower, upper)
}

fn bit_xor(a: &Range, b: &Range) -> Range {
    let (mut al, mut ah) = int32_bounds(a);
    let (mut bl, mut bh) = int32_bounds(b);
    if al == 0 && ah == 0 {
        return Range::int32(bl, bh);
    }
    if bl == 0 && bh == 0 {
        return Range::int32(al, ah);
    }

    // Flip entirely negative operands; flip the result back if exactly one was flipped.
    let mut invert = false;
    if ah < 0 {
        (al, ah) = (!ah, !al);
        invert = !invert;
    }
    if bh < 0 {
        (bl, bh) = (!bh, !bl);
        invert = !invert;
    }

    let mut lower = i32::MIN;
    let mut upper = i32::MAX;
    if al >= 0 && bl >= 0 {
        lower = 0;
        let fill = |v: i32| u32::MAX.checked_shr(v.leading_zeros()).unwrap_or(0) as i32;
        upper = (bh | fill(ah)).min(ah | fill(bh));
    }
    if invert {
        (lower, upper) = (!upper, !lower);
    }
    Range::int32(lower, upper)
}

fn shift_amounts(r: &Range) -> (u32, u32) {
    let (l, h) = int32_bounds(r);
    if i64::from(h) - i64::from(l) >= 31 {
        return (0, 31);
    }
    let (l, h) = ((l & 31) as u32, (h & 31) as u32);
    if l > h {
        (0, 31)
    } else {
        (l, h)
    }
}

fn lsh(a: &Range, b: &Range) -> Range {
    let (al, ah) = int32_bounds(a);
    match int32_bounds(b) {
        (s, t) if s == t => {
            let shift = (s & 31) as u32;
            let lower = i64::from(al) << shift;
            let upper = i64::from(ah) << shift;
            match (i32::try_from(lower), i32::try_from(upper)) {
                (Ok(l), Ok(u)) => Range::int32(l, u),
                _ => Range::int32_full(),
            }
        }
        _ => Range::int32_full(),
    }
}

fn rsh(a: &Range, b: &Range) -> Range {
    let (al, ah) = int32_bounds(a);
    let (s, t) = shift_amounts(b);
    let lower = if al < 0 { al >> s } else { al >> t };
    let upper = if ah >= 0 { ah >> s } else { ah >> t };
    Range::int32(lower, upper)
}

fn uint32(lower: u32, upper: u32) -> Range {
    Range::from_i64(
        Some(i64::from(lower)),
        Some(i64::from(upper)),
        false,
        MAX_INT32_EXPONENT,
    )
}

fn ursh(a: &Range, b: &Range) -> Range {
    let (al, ah) = int32_bounds(a);
    let non_negative = al >= 0;
    let negative = ah < 0;
    match int32_bounds(b) {
        (s, t) if s == t => {
            let shift = (s & 31) as u32;
            // Same-signed inputs map monotonically onto uint32.
            if non_negative || negative {
                uint32((al as u32) >> shift, (ah as u32) >> shift)
            } else {
                uint32(0, u32::MAX >> shift)
            }
        }
        _ => uint32(0, if non_negative { ah as u32 } else { u32::MAX }),
    }
}

fn abs(a: &Range) -> Range {
    let lower = match (lo(a), hi(a)) {
        (Some(l), _) if l >= 0 => l,
        (_, Some(u)) if u <= 0 => -u,
        _ => 0,
    };
    let upper = both(lo(a), hi(a), |l, u| l.abs().max(u.abs()));
    Range::from_i64(Some(lower), upper, a.has_fraction(), a.max_exponent())
}

fn min_max(a: &Range, b: &Range, is_min: bool) -> Option<Range> {
    if a.can_be_nan() || b.can_be_nan() {
        return None;
    }
    let fraction = a.has_fraction() || b.has_fraction();
    let exponent = a.max_exponent().max(b.max_exponent());
    // A missing bound stands for an infinity: it wins for the side it extends.
    let (lower, upper) = if is_min {
        (
            both(lo(a), lo(b), i64::min),
            match (hi(a), hi(b)) {
                (Some(x), Some(y)) => Some(x.min(y)),
                (x, y) => x.or(y),
            },
        )
    } else {
        (
            match (lo(a), lo(b)) {
                (Some(x), Some(y)) => Some(x.max(y)),
                (x, y) => x.or(y),
            },
            both(hi(a), hi(b), i64::max),
        )
    };
    Some(Range::from_i64(lower, upper, fraction, exponent))
}

fn round(a: &Range) -> Range {
    let mut exponent = a.max_exponent();
    if a.has_fraction() && !a.has_int32_bounds() && exponent < MAX_FINITE_EXPONENT {
        exponent += 1;
    }
    Range::new(a.lower(), a.upper(), false, exponent)
}

fn sqrt(a: &Range) -> Option<Range> {
    if !a.has_int32_bounds() || a.lower()? < 0 {
        return None;
    }
    Some(Range::new(Some(0), a.upper(), true, a.max_exponent()))
}

/// Evaluates `lhs op rhs` from the operand ranges alone, if the ranges decide it.
///
/// NaN operands make every relation false except `!=`, so folding to `true` requires both
/// ranges to exclude NaN, while folding to `false` does not.
#[must_use]
pub fn fold_compare(op: CompareOp, lhs: &Range, rhs: &Range) -> Option<bool> {
    let no_nan = !lhs.can_be_nan() && !rhs.can_be_nan();
    let lt = matches!((lhs.upper(), rhs.lower()), (Some(a), Some(b)) if a < b);
    let le = matches!((lhs.upper(), rhs.lower()), (Some(a), Some(b)) if a <= b);
    let gt = matches!((lhs.lower(), rhs.upper()), (Some(a), Some(b)) if a > b);
    let ge = matches!((lhs.lower(), rhs.upper()), (Some(a), Some(b)) if a >= b);
    let same = matches!(
        (lhs.constant_value(), rhs.constant_value()),
        (Some(a), Some(b)) if a == b
    );

    let (holds, fails) = match op {
        CompareOp::Lt => (lt, ge),
        CompareOp::Le => (le, gt),
        CompareOp::Gt => (gt, le),
        CompareOp::Ge => (ge, lt),
        CompareOp::Eq => (same, lt || gt),
        CompareOp::Ne => return if lt || gt { Some(true) } else if same { Some(false) } else { None },
    };
    if holds && no_nan {
        Some(true)
    } else if fails {
        Some(false)
    } else {
        None
    }
}

fn raw_range(op: &MirOp, ty: MirType, inputs: &[Range]) -> Option<Range> {
    let a = inputs.first();
    let b = inputs.get(1);
    match op {
        MirOp::Constant(c) => Range::from_constant(c),
        MirOp::Parameter(_) | MirOp::OsrValue(_) | MirOp::LoadElement => Range::for_type(ty),

        MirOp::Add => Some(add(a?, b?)),
        MirOp::Sub => Some(sub(a?, b?)),
        MirOp::Mul => Some(mul(a?, b?)),
        MirOp::Div => div(a?, b?),
        MirOp::Mod => modulo(a?, b?),

        MirOp::BitAnd => Some(bit_and(a?, b?)),
        MirOp::BitOr => Some(bit_or(a?, b?)),
        MirOp::BitXor => Some(bit_xor(a?, b?)),
        MirOp::BitNot => {
            let (l, h) = int32_bounds(a?);
            Some(Range::int32(!h, !l))
        }
        MirOp::Lsh => Some(lsh(a?, b?)),
        MirOp::Rsh => Some(rsh(a?, b?)),
        MirOp::Ursh => Some(ursh(a?, b?)),

        MirOp::Abs => Some(abs(a?)),
        MirOp::Min => min_max(a?, b?, true),
        MirOp::Max => min_max(a?, b?, false),
        MirOp::Floor | MirOp::Ceil => Some(round(a?)),
        MirOp::Sqrt => sqrt(a?),

        MirOp::ToDouble => a.copied(),
        MirOp::ToInt32 => {
            let clamped = a?.intersect(&Range::int32_full())?;
            Some(Range::new(clamped.lower(), clamped.upper(), false, clamped.max_exponent()))
        }
        MirOp::TruncateToInt32 => Some(a?.wrap_to_int32()),

        MirOp::Compare(cmp) => Some(match fold_compare(*cmp, a?, b?) {
            Some(value) => Range::constant(i32::from(value)),
            None => Range::int32(0, 1),
        }),
        MirOp::Not => Some(Range::int32(0, 1)),

        MirOp::ArrayLength => Some(Range::int32(0, i32::MAX)),
        MirOp::BoundsCheck => {
            let index = a?;
            if inputs.len() > 2 {
                // A guarded check may pass without looking at its index.
                Some(*index)
            } else {
                index.intersect(&Range::int32(0, i32::MAX - 1))
            }
        }
        MirOp::Beta(constraint) => a?.intersect(constraint),

        MirOp::BoundsCheckLower { .. }
        | MirOp::Phi
        | MirOp::AssertRange(_)
        | MirOp::Goto(_)
        | MirOp::Test { .. }
        | MirOp::Return => None,
    }
}

/// Computes the range of a definition performing `op` with result type `ty` on operands
/// whose ranges are `inputs`.
///
/// Returns `None` when the result type carries no range. When no rule applies the result
/// is the widest range of `ty`.
///
/// Int32 results are wrapped rather than clamped to int32, even for definitions that bail
/// out on overflow today: truncation may later let them wrap, and ranges computed from
/// them must stay valid when it does.
#[must_use]
pub fn infer(op: &MirOp, ty: MirType, truncated: bool, inputs: &[Range]) -> Option<Range> {
    let base = Range::for_type(ty)?;
    let raw = raw_range(op, ty, inputs).unwrap_or(base);
    Some(if truncated || ty == MirType::Int32 {
        raw.wrap_to_int32()
    } else {
        raw.intersect(&base).unwrap_or(base)
    })
}
