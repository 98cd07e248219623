//! Range analysis.
//!
//! Infers for every numeric or boolean definition a [`Range`] of the values it can hold at
//! runtime and uses the result to optimize the graph. One run performs, in order:
//!
//! 1. beta insertion below conditional branches ([`RangeAnalysis::add_beta_nodes`])
//! 2. propagation in reverse postorder, including loop iteration bounds and bounds check
//!    hoisting ([`RangeAnalysis::analyze`])
//! 3. truncation of arithmetic whose result is only observed as an int32
//!    ([`RangeAnalysis::truncate`])
//! 4. beta removal ([`RangeAnalysis::remove_beta_nodes`])
//! 5. rewriting of tests that can only go one way ([`RangeAnalysis::prepare_for_uce`])
//! 6. optionally, runtime assertions of the inferred ranges
//!    ([`RangeAnalysis::add_range_assertions`])
//!
//! Every step is best effort. A pattern that does not match skips its optimization; only
//! arena exhaustion is reported as an error.
//!
//! # Examples
//!
//! ```rust
//! use jitmir::{analysis::RangeAnalysis, CompareOp, Graph, MirType, OptimizationConfig};
//!
//! let mut graph = Graph::new();
//! let entry = graph.new_entry_block(0)?;
//! let x = graph.parameter(entry, 0, MirType::Int32)?;
//! let ten = graph.constant_i32(entry, 10)?;
//! let cond = graph.compare(entry, CompareOp::Lt, x, ten)?;
//! let small = graph.new_block(Some(entry))?;
//! let large = graph.new_block(Some(entry))?;
//! graph.test(entry, cond, small, large)?;
//! let seven = graph.constant_i32(small, 7)?;
//! let masked = graph.binary(small, jitmir::mir::MirOp::BitAnd, x, seven, MirType::Int32)?;
//! graph.ret(small, masked)?;
//! graph.ret(large, x)?;
//!
//! let stats = RangeAnalysis::new(&mut graph, OptimizationConfig::default()).run()?;
//! assert_eq!(stats.betas_inserted, 2);
//! let range = graph.def(masked).range().unwrap();
//! assert_eq!((range.lower(), range.upper()), (Some(0), Some(7)));
//! # Ok::<(), jitmir::Error>(())
//! ```

mod assertions;
mod beta;
mod loops;
mod range;
mod rules;
mod symbolic;
mod truncation;

use std::collections::HashMap;

pub use range::{
    Range, INCLUDES_INFINITY, INCLUDES_INFINITY_AND_NAN, MAX_FINITE_EXPONENT,
    MAX_INT32_EXPONENT, MAX_TRUNCATABLE_EXPONENT,
};
pub use rules::{fold_compare, infer};
pub use symbolic::{
    BoundValidity, LinearSum, LinearTerm, LoopIterationBound, SymbolicBound, SymbolicBounds,
};
pub use truncation::TruncateKind;

use crate::{
    analysis::dominators::build_dominator_tree,
    config::OptimizationConfig,
    mir::{BlockId, Constant, DefId, Graph, MirOp, MirType},
    Result,
};

/// Counters describing what one range analysis run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeAnalysisStats {
    /// Beta nodes inserted below branches.
    pub betas_inserted: usize,
    /// Loops for which an iteration bound was found.
    pub loops_bounded: usize,
    /// Bounds checks moved out of loops.
    pub bounds_checks_hoisted: usize,
    /// Blocks found to be never executed.
    pub blocks_unreachable: usize,
    /// Tests whose condition was replaced by a constant for UCE.
    pub tests_folded: usize,
    /// Definitions flagged to wrap their result to int32 instead of bailing out.
    pub truncated: usize,
    /// Definitions retyped to int32 that still bail out on a non-int32 result, along with
    /// retyped constants and phis.
    pub retyped_int32: usize,
    /// Conversions inserted on operands of truncated definitions.
    pub conversions_inserted: usize,
    /// Conversions made redundant by truncation and removed.
    pub conversions_removed: usize,
    /// Range assertions inserted.
    pub assertions_inserted: usize,
}

/// Range analysis over one graph.
///
/// Holds the results that do not live on the graph itself: loop iteration bounds and the
/// symbolic bounds of induction variables. Both are recomputed by every
/// [`analyze`](RangeAnalysis::analyze).
#[derive(Debug)]
pub struct RangeAnalysis<'g> {
    graph: &'g mut Graph,
    config: OptimizationConfig,
    loop_bounds: Vec<LoopIterationBound>,
    symbolic: HashMap<DefId, SymbolicBounds>,
    stats: RangeAnalysisStats,
}

impl<'g> RangeAnalysis<'g> {
    /// Prepares an analysis of `graph`.
    pub fn new(graph: &'g mut Graph, config: OptimizationConfig) -> Self {
        RangeAnalysis {
            graph,
            config,
            loop_bounds: Vec::new(),
            symbolic: HashMap::new(),
            stats: RangeAnalysisStats::default(),
        }
    }

    /// The analysed graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Counters accumulated so far.
    #[must_use]
    pub const fn stats(&self) -> &RangeAnalysisStats {
        &self.stats
    }

    /// Iteration bounds found by the last [`analyze`](RangeAnalysis::analyze).
    #[must_use]
    pub fn loop_iteration_bounds(&self) -> &[LoopIterationBound] {
        &self.loop_bounds
    }

    /// Symbolic bounds of a loop header phi, if any were derived.
    #[must_use]
    pub fn symbolic_bounds(&self, def: DefId) -> Option<&SymbolicBounds> {
        self.symbolic.get(&def)
    }

    /// Inserts beta nodes below every conditional branch on a numeric comparison.
    ///
    /// Requires the dominator tree.
    pub fn add_beta_nodes(&mut self) -> Result<()> {
        self.stats.betas_inserted += beta::add_beta_nodes(self.graph)?;
        Ok(())
    }

    /// Replaces every beta node by its operand.
    pub fn remove_beta_nodes(&mut self) -> Result<()> {
        beta::remove_beta_nodes(self.graph)?;
        Ok(())
    }

    /// Computes the range of every definition in reverse postorder.
    ///
    /// Loop headers are analysed for iteration bounds before their instructions, and
    /// bounds checks on induction variables are hoisted when the bounds allow it. A test
    /// whose condition range decides the outcome marks its never-taken successor
    /// unreachable when that successor has no other predecessor, unless the condition is
    /// only decided through beta nodes. Such a successor would carry constraints that
    /// contradict the dominating branches; its ranges widen instead and it stays reachable.
    pub fn analyze(&mut self) -> Result<()> {
        self.loop_bounds.clear();
        self.symbolic.clear();
        for block in self.graph.block_ids().collect::<Vec<_>>() {
            for def in self.graph.definitions(block).collect::<Vec<_>>() {
                self.graph.def_mut(def).range = None;
            }
        }

        for block in self.graph.reverse_postorder() {
            if self.graph.block(block).is_unreachable() {
                continue;
            }
            for phi in self.graph.block(block).phis().to_vec() {
                let range = self.phi_range(phi);
                self.graph.def_mut(phi).range = range;
            }
            if self.graph.block(block).is_loop_header() {
                self.analyze_loop(block)?;
            }
            for ins in self.graph.block(block).instructions().to_vec() {
                if !self.graph.contains_def(ins) {
                    continue;
                }
                self.compute_range(ins);
                if matches!(self.graph.def(ins).op(), MirOp::Test { .. }) {
                    self.fold_test(ins);
                }
            }
        }

        log::debug!(
            "range analysis: {} loops bounded, {} checks hoisted, {} blocks unreachable",
            self.stats.loops_bounded,
            self.stats.bounds_checks_hoisted,
            self.stats.blocks_unreachable
        );
        Ok(())
    }

    /// Current range of `def`, falling back to the widest range of its type.
    pub(crate) fn operand_range(&self, def: DefId) -> Range {
        let d = self.graph.def(def);
        d.range()
            .copied()
            .or_else(|| Range::for_type(d.ty()))
            .unwrap_or_else(Range::unknown)
    }

    /// Union of the operands flowing in from reachable predecessors.
    fn phi_range(&self, phi: DefId) -> Option<Range> {
        let graph = &*self.graph;
        let d = graph.def(phi);
        if !d.ty().has_range() {
            return None;
        }
        let preds = graph.block(d.block()).predecessors();
        let mut merged: Option<Range> = None;
        for (i, &operand) in d.operands().iter().enumerate() {
            let dead_edge = preds.get(i).is_some_and(|&p| graph.block(p).is_unreachable());
            if dead_edge || graph.block(graph.def(operand).block()).is_unreachable() {
                continue;
            }
            let r = self.operand_range(operand);
            merged = Some(merged.map_or(r, |m| m.union(&r)));
        }
        merged.or_else(|| Range::for_type(d.ty()))
    }

    pub(crate) fn compute_range(&mut self, def: DefId) {
        let d = self.graph.def(def);
        let inputs: Vec<Range> = d.operands().iter().map(|&o| self.operand_range(o)).collect();
        let range = rules::infer(d.op(), d.ty(), d.is_truncated(), &inputs);
        self.graph.def_mut(def).range = range;
    }

    fn fold_test(&mut self, test: DefId) {
        let graph = &*self.graph;
        let MirOp::Test { if_true, if_false } = *graph.def(test).op() else {
            return;
        };
        if if_true == if_false {
            return;
        }
        let cond = graph.def(test).operand(0);
        let Some(range) = graph.def(cond).range() else {
            return;
        };
        if reads_beta(graph, cond) {
            return;
        }
        let taken = if range.constant_value() == Some(0) {
            false
        } else if !range.can_be_zero() && !range.can_be_nan() {
            true
        } else {
            return;
        };
        let dead = if taken { if_false } else { if_true };
        let d = graph.block(dead);
        if d.predecessors().len() != 1 || d.is_unreachable() {
            return;
        }
        log::trace!("{test} never branches to {dead}");
        self.graph.set_unreachable(dead);
        self.stats.blocks_unreachable += 1;
    }

    /// Replaces the condition of every test leading to an unreachable block with the
    /// boolean constant that avoids it, so that unreachable code elimination can remove
    /// the block. Returns `true` if a test was rewritten.
    pub fn prepare_for_uce(&mut self) -> Result<bool> {
        let mut changed = false;
        for block in self.graph.block_ids().collect::<Vec<BlockId>>() {
            let b = self.graph.block(block);
            if !b.is_unreachable() {
                continue;
            }
            let [pred] = *b.predecessors() else {
                continue;
            };
            let Some(test) = self.graph.block(pred).terminator() else {
                continue;
            };
            let MirOp::Test { if_false, .. } = *self.graph.def(test).op() else {
                continue;
            };
            let value = block == if_false;
            let constant = self.graph.insert_before_terminator(
                pred,
                MirOp::Constant(Constant::Boolean(value)),
                MirType::Boolean,
                Vec::new(),
            )?;
            self.compute_range(constant);
            self.graph.replace_operand(test, 0, constant)?;
            log::trace!("{test} in {pred} now tests {value}");
            self.stats.tests_folded += 1;
            changed = true;
        }
        Ok(changed)
    }

    /// Runs every step in order, building the dominator tree first if it is missing.
    pub fn run(&mut self) -> Result<RangeAnalysisStats> {
        if !self.graph.has_dominator_tree() {
            build_dominator_tree(self.graph)?;
        }
        self.add_beta_nodes()?;
        self.analyze()?;
        self.truncate()?;
        self.remove_beta_nodes()?;
        self.prepare_for_uce()?;
        if self.config.insert_range_assertions {
            self.add_range_assertions()?;
        }
        Ok(self.stats)
    }
}

/// Returns `true` if `cond` compares a beta node, looking through `Not`.
fn reads_beta(graph: &Graph, cond: DefId) -> bool {
    let d = graph.def(cond);
    match d.op() {
        MirOp::Not => reads_beta(graph, d.operand(0)),
        MirOp::Compare(_) => d.operands().iter().any(|&o| graph.def(o).op().is_beta()),
        op => op.is_beta(),
    }
}
