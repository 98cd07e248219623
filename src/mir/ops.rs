//! The closed set of MIR operations.
//!
//! Every definition in a graph carries one [`MirOp`]. Passes dispatch on it with `match`,
//! so each analysis rule lives next to the other rules for the same pass instead of being
//! spread over an operation hierarchy.

use std::fmt;

use strum::IntoStaticStr;

use crate::{analysis::Range, mir::BlockId};

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    /// A 32-bit integer.
    Int32(i32),
    /// A double.
    Double(f64),
    /// A boolean.
    Boolean(bool),
    /// The undefined value, used to seed uninitialized slots.
    Undefined,
}

impl Constant {
    /// Numeric value of this constant; `undefined` converts to NaN.
    #[must_use]
    pub fn to_number(self) -> f64 {
        match self {
            Constant::Int32(v) => f64::from(v),
            Constant::Double(v) => v,
            Constant::Boolean(b) => f64::from(u8::from(b)),
            Constant::Undefined => f64::NAN,
        }
    }

    /// Truthiness of this constant as seen by a conditional branch.
    #[must_use]
    pub fn to_boolean(self) -> bool {
        match self {
            Constant::Int32(v) => v != 0,
            Constant::Double(v) => v != 0.0 && !v.is_nan(),
            Constant::Boolean(b) => b,
            Constant::Undefined => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int32(v) => write!(f, "{v}"),
            Constant::Double(v) => write!(f, "{v:?}"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Undefined => f.write_str("undefined"),
        }
    }
}

/// Relational operator of a [`MirOp::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl CompareOp {
    /// The operator that holds exactly when `self` does not, for operands that are never NaN.
    #[must_use]
    pub const fn negate(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
        }
    }

    /// The operator to use when the two operands trade places: `a < b` is `b > a`.
    #[must_use]
    pub const fn swap(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
        }
    }

    /// Evaluates the comparison on two numbers. Every relation involving NaN is false
    /// except `!=`.
    #[must_use]
    pub fn evaluate(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }

    /// Source-level spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// Operation performed by a definition.
///
/// Arithmetic operations are specialized by the definition's [`MirType`](crate::MirType):
/// an `Int32` add bails out when the mathematical result leaves the int32 range unless the
/// definition is truncated, in which case it wraps. A `Double` add follows IEEE semantics.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MirOp {
    /// A constant value.
    Constant(Constant),
    /// The n-th incoming argument.
    Parameter(u32),
    /// The n-th slot value handed over when entering through the OSR block.
    OsrValue(u32),

    /// `lhs + rhs`
    Add,
    /// `lhs - rhs`
    Sub,
    /// `lhs * rhs`
    Mul,
    /// `lhs / rhs`
    Div,
    /// `lhs % rhs` with the sign of `lhs`.
    Mod,
    /// `lhs & rhs` on ToInt32 operands.
    BitAnd,
    /// `lhs | rhs` on ToInt32 operands.
    BitOr,
    /// `lhs ^ rhs` on ToInt32 operands.
    BitXor,
    /// `~operand`
    BitNot,
    /// `lhs << (rhs & 31)`
    Lsh,
    /// `lhs >> (rhs & 31)`
    Rsh,
    /// `lhs >>> (rhs & 31)`, producing an unsigned 32-bit result.
    Ursh,

    /// `|operand|`
    Abs,
    /// Smaller of two numbers; NaN if either is NaN.
    Min,
    /// Larger of two numbers; NaN if either is NaN.
    Max,
    /// Round toward negative infinity.
    Floor,
    /// Round toward positive infinity.
    Ceil,
    /// Square root.
    Sqrt,

    /// Reinterpret an int32 as a double.
    ToDouble,
    /// Convert to int32, bailing out unless the value is exactly representable.
    ToInt32,
    /// Convert to int32 with modular wrapping; NaN and infinities become 0.
    TruncateToInt32,

    /// Numeric comparison producing a boolean.
    Compare(CompareOp),
    /// Boolean negation of the operand's truthiness.
    Not,

    /// Length of an array object.
    ArrayLength,
    /// Load `array[index]`; the index must already be checked.
    LoadElement,
    /// Checks `0 <= index < length` and produces `index`.
    ///
    /// Operands are `[index, length]`, optionally followed by a boolean guard; when the
    /// guard is present and false the check passes without looking at the index.
    BoundsCheck,
    /// Checks `index >= minimum`; operands are `[index]` plus an optional guard.
    BoundsCheckLower {
        /// Smallest accepted index.
        minimum: i32,
    },

    /// SSA merge; operand `i` flows in from predecessor `i`.
    Phi,
    /// Transient refinement of its operand, valid in the block holding it.
    Beta(Range),
    /// Checks at runtime that the operand lies in the given range.
    AssertRange(Range),

    /// Unconditional jump.
    Goto(BlockId),
    /// Conditional branch on the truthiness of its operand.
    Test {
        /// Successor taken when the condition is truthy.
        if_true: BlockId,
        /// Successor taken otherwise.
        if_false: BlockId,
    },
    /// Function return of its operand.
    Return,
}

impl MirOp {
    /// Short lowercase name of the operation.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Returns `true` for block terminators.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(self, MirOp::Goto(_) | MirOp::Test { .. } | MirOp::Return)
    }

    /// Returns `true` for phis.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self, MirOp::Phi)
    }

    /// Returns `true` for beta nodes.
    #[must_use]
    pub const fn is_beta(&self) -> bool {
        matches!(self, MirOp::Beta(_))
    }

    /// Returns `true` for operations that may fail at runtime and therefore must stay even
    /// when their result is unused.
    #[must_use]
    pub const fn is_guard(&self) -> bool {
        matches!(
            self,
            MirOp::BoundsCheck
                | MirOp::BoundsCheckLower { .. }
                | MirOp::AssertRange(_)
                | MirOp::ToInt32
        )
    }

    /// Control-flow successors of a terminator, in branch order.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> {
        let pair = match *self {
            MirOp::Goto(target) => [Some(target), None],
            MirOp::Test { if_true, if_false } => [Some(if_true), Some(if_false)],
            _ => [None, None],
        };
        pair.into_iter().flatten()
    }

    /// Redirects every successor edge to `from` towards `to`. Returns `true` if an edge
    /// was rewritten.
    pub fn replace_successor(&mut self, from: BlockId, to: BlockId) -> bool {
        let mut changed = false;
        match self {
            MirOp::Goto(target) if *target == from => {
                *target = to;
                changed = true;
            }
            MirOp::Test { if_true, if_false } => {
                if *if_true == from {
                    *if_true = to;
                    changed = true;
                }
                if *if_false == from {
                    *if_false = to;
                    changed = true;
                }
            }
            _ => {}
        }
        changed
    }
}

impl fmt::Display for MirOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirOp::Constant(c) => write!(f, "constant {c}"),
            MirOp::Parameter(n) => write!(f, "parameter {n}"),
            MirOp::OsrValue(n) => write!(f, "osr_value {n}"),
            MirOp::Compare(op) => write!(f, "compare {}", op.symbol()),
            MirOp::BoundsCheckLower { minimum } => write!(f, "bounds_check_lower {minimum}"),
            MirOp::Beta(range) => write!(f, "beta {range}"),
            MirOp::AssertRange(range) => write!(f, "assert_range {range}"),
            MirOp::Goto(target) => write!(f, "goto {target}"),
            MirOp::Test { if_true, if_false } => write!(f, "test {if_true} {if_false}"),
            other => f.write_str(other.name()),
        }
    }
}
