//! Symbolic bounds: linear sums over SSA definitions.
//!
//! Loop analysis describes the values an induction variable can take in terms of other
//! definitions, e.g. `length - 1`. A [`LinearSum`] is that expression; a
//! [`SymbolicBound`] pairs it with the region of the graph where it holds.

use std::fmt;

use crate::mir::{BlockId, DefId, Graph, MirOp, MirType};

/// Recursion limit when peeling nested additions.
const MAX_LINEAR_DEPTH: u32 = 20;

/// One `scale * term` component of a [`LinearSum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinearTerm {
    /// The definition being scaled.
    pub term: DefId,
    /// Its coefficient; never zero inside a sum.
    pub scale: i32,
}

/// `constant + Σ scale_i * term_i` over int32 definitions.
///
/// Every mutation is checked: an operation that would overflow int32 returns `false` and
/// leaves the sum unusable, and callers abandon the optimization that needed it.
///
/// # Examples
///
/// ```rust
/// use jitmir::analysis::LinearSum;
/// use jitmir::mir::DefId;
///
/// let n = DefId::new(3);
/// let mut sum = LinearSum::from_constant(-1);
/// assert!(sum.add_term(n, 1));
/// assert_eq!(sum.to_string(), "#3 - 1");
/// assert!(!sum.add_constant(i32::MIN));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LinearSum {
    terms: Vec<LinearTerm>,
    constant: i32,
}

impl LinearSum {
    /// The empty sum, equal to zero.
    #[must_use]
    pub fn new() -> Self {
        LinearSum::default()
    }

    /// A sum with no terms.
    #[must_use]
    pub fn from_constant(constant: i32) -> Self {
        LinearSum {
            terms: Vec::new(),
            constant,
        }
    }

    /// The terms, in insertion order.
    #[must_use]
    pub fn terms(&self) -> &[LinearTerm] {
        &self.terms
    }

    /// The constant part.
    #[must_use]
    pub const fn constant(&self) -> i32 {
        self.constant
    }

    /// The value of the sum if it has no terms.
    #[must_use]
    pub fn as_constant(&self) -> Option<i32> {
        self.terms.is_empty().then_some(self.constant)
    }

    /// Adds `scale * term`, merging with an existing term for the same definition.
    pub fn add_term(&mut self, term: DefId, scale: i32) -> bool {
        if scale == 0 {
            return true;
        }
        if let Some(pos) = self.terms.iter().position(|t| t.term == term) {
            let Some(merged) = self.terms[pos].scale.checked_add(scale) else {
                return false;
            };
            if merged == 0 {
                self.terms.remove(pos);
            } else {
                self.terms[pos].scale = merged;
            }
            return true;
        }
        self.terms.push(LinearTerm { term, scale });
        true
    }

    /// Adds a constant.
    pub fn add_constant(&mut self, constant: i32) -> bool {
        match self.constant.checked_add(constant) {
            Some(c) => {
                self.constant = c;
                true
            }
            None => false,
        }
    }

    /// Adds `scale * other`.
    pub fn add_sum(&mut self, other: &LinearSum, scale: i32) -> bool {
        for t in &other.terms {
            let Some(s) = t.scale.checked_mul(scale) else {
                return false;
            };
            if !self.add_term(t.term, s) {
                return false;
            }
        }
        other
            .constant
            .checked_mul(scale)
            .is_some_and(|c| self.add_constant(c))
    }

    /// Multiplies every coefficient and the constant by `scale`.
    pub fn multiply(&mut self, scale: i32) -> bool {
        if scale == 0 {
            *self = LinearSum::new();
            return true;
        }
        for t in &mut self.terms {
            match t.scale.checked_mul(scale) {
                Some(s) => t.scale = s,
                None => return false,
            }
        }
        match self.constant.checked_mul(scale) {
            Some(c) => {
                self.constant = c;
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for LinearSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for t in &self.terms {
            let magnitude = t.scale.unsigned_abs();
            match (first, t.scale < 0) {
                (true, true) => f.write_str("-")?,
                (true, false) => {}
                (false, true) => f.write_str(" - ")?,
                (false, false) => f.write_str(" + ")?,
            }
            if magnitude != 1 {
                write!(f, "{magnitude}*")?;
            }
            write!(f, "{}", t.term)?;
            first = false;
        }
        if first {
            return write!(f, "{}", self.constant);
        }
        match self.constant {
            0 => Ok(()),
            c if c < 0 => write!(f, " - {}", c.unsigned_abs()),
            c => write!(f, " + {c}"),
        }
    }
}

/// Where a [`SymbolicBound`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundValidity {
    /// At every point where the bounded definition is available.
    Everywhere,
    /// Only in blocks dominated by `continue_block`, the successor through which the loop
    /// test keeps iterating.
    LoopLocal {
        /// The terminator whose outcome establishes the bound.
        test: DefId,
        /// Successor of the test that stays in the loop.
        continue_block: BlockId,
    },
}

/// A symbolic lower or upper bound on a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicBound {
    /// The bounding expression.
    pub sum: LinearSum,
    /// The region where it holds.
    pub validity: BoundValidity,
}

impl SymbolicBound {
    /// Returns `true` if the bound can be relied on inside `block`. Loop-local bounds need
    /// the dominator tree.
    #[must_use]
    pub fn is_valid_at(&self, graph: &Graph, block: BlockId) -> bool {
        match self.validity {
            BoundValidity::Everywhere => true,
            BoundValidity::LoopLocal { continue_block, .. } => graph.dominates(continue_block, block),
        }
    }
}

impl fmt::Display for SymbolicBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.validity {
            BoundValidity::Everywhere => write!(f, "{}", self.sum),
            BoundValidity::LoopLocal { continue_block, .. } => {
                write!(f, "{} (in {continue_block})", self.sum)
            }
        }
    }
}

/// Symbolic bounds recorded for one definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolicBounds {
    /// Lower bound, if known.
    pub lower: Option<SymbolicBound>,
    /// Upper bound, if known.
    pub upper: Option<SymbolicBound>,
}

/// Upper bound on the number of times a loop's backedge executes, written as a linear sum
/// over definitions available before the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopIterationBound {
    /// The loop header.
    pub header: BlockId,
    /// The test whose continue branch every iteration passes.
    pub test: DefId,
    /// Upper bound on the number of backedges taken.
    pub bound: LinearSum,
    /// `phi - initial` for the induction variable that bounds the loop: the number of
    /// iterations completed so far, scaled by the step.
    pub current_iteration: LinearSum,
}

/// A definition split into `term + constant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SimpleLinearSum {
    pub term: Option<DefId>,
    pub constant: i32,
}

impl SimpleLinearSum {
    fn of(term: DefId) -> Self {
        SimpleLinearSum {
            term: Some(term),
            constant: 0,
        }
    }
}

/// Looks through beta nodes to the definition they refine.
pub(crate) fn skip_betas(graph: &Graph, mut def: DefId) -> DefId {
    while graph.def(def).op().is_beta() {
        def = graph.def(def).operand(0);
    }
    def
}

/// Splits `def` into a single term plus a constant by peeling additions and subtractions
/// of int32 constants. Only non-truncated int32 arithmetic is peeled: those operations bail
/// out instead of wrapping, so the decomposition is exact.
pub(crate) fn extract_linear_sum(graph: &Graph, def: DefId) -> SimpleLinearSum {
    extract_at_depth(graph, def, 0)
}

fn extract_at_depth(graph: &Graph, def: DefId, depth: u32) -> SimpleLinearSum {
    let def = skip_betas(graph, def);
    let d = graph.def(def);
    if d.ty() != MirType::Int32 || depth > MAX_LINEAR_DEPTH {
        return SimpleLinearSum::of(def);
    }
    if let MirOp::Constant(c) = d.op() {
        if let crate::mir::Constant::Int32(v) = c {
            return SimpleLinearSum {
                term: None,
                constant: *v,
            };
        }
        return SimpleLinearSum::of(def);
    }
    let is_add = matches!(d.op(), MirOp::Add);
    if !(is_add || matches!(d.op(), MirOp::Sub)) || d.is_truncated() {
        return SimpleLinearSum::of(def);
    }
    let (lhs, rhs) = (d.operand(0), d.operand(1));
    if graph.def(lhs).ty() != MirType::Int32 || graph.def(rhs).ty() != MirType::Int32 {
        return SimpleLinearSum::of(def);
    }

    let l = extract_at_depth(graph, lhs, depth + 1);
    let r = extract_at_depth(graph, rhs, depth + 1);
    if l.term.is_some() && r.term.is_some() {
        return SimpleLinearSum::of(def);
    }
    if is_add {
        return match l.constant.checked_add(r.constant) {
            Some(constant) => SimpleLinearSum {
                term: l.term.or(r.term),
                constant,
            },
            None => SimpleLinearSum::of(def),
        };
    }
    // Only `sum - n`; `n - sum` negates the term.
    match (l.term, l.constant.checked_sub(r.constant)) {
        (Some(term), Some(constant)) => SimpleLinearSum {
            term: Some(term),
            constant,
        },
        _ => SimpleLinearSum::of(def),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn test_add_term_merges_and_cancels() {
        let a = DefId::new(1);
        let b = DefId::new(2);
        let mut sum = LinearSum::new();
        assert!(sum.add_term(a, 2));
        assert!(sum.add_term(b, -1));
        assert!(sum.add_term(a, -2));
        assert_eq!(sum.terms(), &[LinearTerm { term: b, scale: -1 }]);
        assert!(sum.add_constant(4));
        assert_eq!(sum.to_string(), "-#2 + 4");
    }

    #[test]
    fn test_overflow_is_reported() {
        let a = DefId::new(1);
        let mut sum = LinearSum::from_constant(i32::MAX);
        assert!(!sum.add_constant(1));
        let mut scaled = LinearSum::new();
        assert!(scaled.add_term(a, i32::MAX));
        assert!(!scaled.multiply(2));
        let mut other = LinearSum::from_constant(1);
        assert!(!other.add_sum(&LinearSum::from_constant(i32::MAX), 1));
    }

    #[test]
    fn test_multiply_and_add_sum() {
        let a = DefId::new(1);
        let b = DefId::new(2);
        let mut bound = LinearSum::from_constant(1);
        assert!(bound.add_term(a, 1));
        assert!(bound.add_term(b, -1));
        assert!(bound.multiply(3));
        let mut limit = LinearSum::new();
        assert!(limit.add_term(b, 1));
        assert!(limit.add_sum(&bound, 1));
        assert!(limit.add_constant(-3));
        // b + 3*(a - b + 1) - 3 = 3a - 2b
        assert_eq!(limit.to_string(), "3*#1 - 2*#2");
        assert_eq!(LinearSum::from_constant(-7).as_constant(), Some(-7));
    }

    #[test]
    fn test_extract_linear_sum() -> Result<()> {
        let mut g = Graph::new();
        let entry = g.new_entry_block(0)?;
        let x = g.parameter(entry, 0, MirType::Int32)?;
        let five = g.constant_i32(entry, 5)?;
        let two = g.constant_i32(entry, 2)?;
        let plus = g.binary(entry, MirOp::Add, five, x, MirType::Int32)?;
        let minus = g.binary(entry, MirOp::Sub, plus, two, MirType::Int32)?;
        let flipped = g.binary(entry, MirOp::Sub, two, x, MirType::Int32)?;
        let both = g.binary(entry, MirOp::Add, x, minus, MirType::Int32)?;
        let double = g.binary(entry, MirOp::Add, x, two, MirType::Double)?;
        g.ret(entry, both)?;

        let sum = extract_linear_sum(&g, minus);
        assert_eq!(sum.term, Some(x));
        assert_eq!(sum.constant, 3);
        assert_eq!(extract_linear_sum(&g, five).term, None);
        assert_eq!(extract_linear_sum(&g, flipped), SimpleLinearSum::of(flipped));
        assert_eq!(extract_linear_sum(&g, both), SimpleLinearSum::of(both));
        assert_eq!(extract_linear_sum(&g, double), SimpleLinearSum::of(double));
        Ok(())
    }
}
