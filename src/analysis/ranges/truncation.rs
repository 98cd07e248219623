//! Truncation: committing arithmetic to int32 semantics.
//!
//! `(a + b) | 0` only ever observes the sum modulo 2^32. When the range of `a + b` shows
//! that the double computation is exact, the addition can be carried out as a wrapping
//! int32 operation instead. The pass decides the [`TruncateKind`] of every candidate in a
//! read-only fixpoint and only then rewrites the graph.

use std::collections::HashMap;

use strum::IntoStaticStr;

use crate::{
    analysis::ranges::RangeAnalysis,
    mir::{Constant, Consumer, DefFlags, DefId, Definition, MirOp, MirType},
    Result,
};

/// How far a definition may be truncated, ordered from least to most permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoStaticStr)]
pub enum TruncateKind {
    /// The exact value is observed.
    NoTruncate,
    /// An int32 result is wanted, but the definition must still bail out when the exact
    /// value is not an int32, because a bailout could observe it.
    TruncateAfterBailouts,
    /// The value only feeds truncated arithmetic, which wraps anyway.
    IndirectTruncate,
    /// Only the value modulo 2^32 is observed.
    Truncate,
}

fn is_candidate(d: &Definition) -> bool {
    if !d.ty().is_numeric() {
        return false;
    }
    match d.op() {
        MirOp::Add
        | MirOp::Sub
        | MirOp::Mul
        | MirOp::Div
        | MirOp::Mod
        | MirOp::Phi
        | MirOp::Beta(_) => true,
        MirOp::Constant(Constant::Double(v)) => {
            v.fract() == 0.0 && *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX)
        }
        _ => false,
    }
}

/// Whether the double computation of `d` is exact, so that wrapping its result agrees
/// with wrapping the mathematical value.
fn is_exact(d: &Definition) -> bool {
    if d.ty() == MirType::Int32 && matches!(d.op(), MirOp::Div | MirOp::Mod) {
        return true;
    }
    d.range().is_some_and(|r| !r.can_have_rounding_errors())
}

/// The kind a consumer performing `op`, itself truncated as `own`, asks of its operands.
fn operand_kind(op: &MirOp, own: TruncateKind) -> TruncateKind {
    match op {
        MirOp::BitAnd
        | MirOp::BitOr
        | MirOp::BitXor
        | MirOp::BitNot
        | MirOp::Lsh
        | MirOp::Rsh
        | MirOp::Ursh
        | MirOp::TruncateToInt32 => TruncateKind::Truncate,
        MirOp::Add | MirOp::Sub | MirOp::Mul => own.min(TruncateKind::IndirectTruncate),
        MirOp::Div | MirOp::Mod => own.min(TruncateKind::TruncateAfterBailouts),
        MirOp::Phi | MirOp::Beta(_) => own,
        _ => TruncateKind::NoTruncate,
    }
}

impl RangeAnalysis<'_> {
    /// Truncates every definition whose exact value is never observed.
    pub fn truncate(&mut self) -> Result<()> {
        let decided = self.decide_truncation();
        if decided.is_empty() {
            return Ok(());
        }
        self.apply_truncation(&decided)?;
        log::debug!(
            "truncated {} definitions, retyped {}, {} conversions inserted, {} removed",
            self.stats.truncated,
            self.stats.retyped_int32,
            self.stats.conversions_inserted,
            self.stats.conversions_removed
        );
        Ok(())
    }

    /// Optimistic fixpoint: every eligible candidate starts at [`TruncateKind::Truncate`]
    /// and is lowered to what its consumers accept until nothing changes.
    fn decide_truncation(&self) -> Vec<(DefId, TruncateKind)> {
        let graph = &*self.graph;
        let mut order = Vec::new();
        for block in graph.postorder() {
            let b = graph.block(block);
            if b.is_unreachable() {
                continue;
            }
            order.extend(b.instructions().iter().rev().copied());
            order.extend(b.phis().iter().rev().copied());
        }

        let mut kinds: HashMap<DefId, TruncateKind> = order
            .iter()
            .copied()
            .filter(|&d| is_candidate(graph.def(d)) && is_exact(graph.def(d)))
            .map(|d| (d, TruncateKind::Truncate))
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for def in &order {
                let Some(&current) = kinds.get(def) else {
                    continue;
                };
                let requested = self.requested_kind(*def, &kinds);
                if requested < current {
                    kinds.insert(*def, requested);
                    changed = true;
                }
            }
        }

        let mut decided: Vec<(DefId, TruncateKind)> = kinds
            .into_iter()
            .filter(|&(_, k)| k > TruncateKind::NoTruncate)
            .collect();
        decided.sort_unstable();
        decided
    }

    /// The most permissive kind all uses of `def` accept.
    fn requested_kind(&self, def: DefId, kinds: &HashMap<DefId, TruncateKind>) -> TruncateKind {
        let graph = &*self.graph;
        let d = graph.def(def);
        let mut kind = if d.flags().contains(DefFlags::GUARD) {
            TruncateKind::TruncateAfterBailouts
        } else {
            TruncateKind::Truncate
        };
        let already_int32 = d.range().is_some_and(|r| r.is_int32());
        for u in d.uses() {
            let accepted = match u.consumer {
                Consumer::Definition(c) => {
                    let own = kinds.get(&c).copied().unwrap_or(TruncateKind::NoTruncate);
                    operand_kind(graph.def(c).op(), own)
                }
                // A bailout resumes with the captured value, which must then be exact.
                Consumer::ResumePoint(rp) => {
                    let block = graph.resume_point(rp).block();
                    if self.config.is_asmjs_like_mode
                        || already_int32
                        || graph.block(block).is_unreachable()
                    {
                        TruncateKind::Truncate
                    } else {
                        TruncateKind::TruncateAfterBailouts
                    }
                }
            };
            kind = kind.min(accepted);
            if kind == TruncateKind::NoTruncate {
                break;
            }
        }
        kind
    }

    fn apply_truncation(&mut self, decided: &[(DefId, TruncateKind)]) -> Result<()> {
        // Types first, so that operands truncated themselves need no conversion.
        for &(def, kind) in decided {
            let d = self.graph.def_mut(def);
            if let MirOp::Constant(Constant::Double(v)) = d.op {
                // Integral and within int32, checked by `is_candidate`.
                d.op = MirOp::Constant(Constant::Int32(v as i32));
                self.stats.retyped_int32 += 1;
            } else if kind >= TruncateKind::IndirectTruncate && !d.is_phi() && !d.op.is_beta() {
                d.flags |= DefFlags::TRUNCATED;
                self.stats.truncated += 1;
            } else {
                self.stats.retyped_int32 += 1;
            }
            d.ty = MirType::Int32;
            d.range = d.range.map(|r| r.wrap_to_int32());
            log::trace!("{def}: {} truncated ({})", d.op, <&str>::from(kind));
        }

        for &(def, kind) in decided {
            let requested = operand_kind(self.graph.def(def).op(), kind);
            for i in 0..self.graph.def(def).operands().len() {
                let input = self.graph.def(def).operand(i);
                if self.graph.def(input).ty() == MirType::Int32 {
                    continue;
                }
                let replacement = self.int32_input(def, i, input, requested)?;
                self.graph.replace_operand(def, i, replacement)?;
            }
        }

        for &(def, _) in decided {
            let conversions: Vec<DefId> = self
                .graph
                .def(def)
                .uses()
                .iter()
                .filter_map(|u| match u.consumer {
                    Consumer::Definition(c)
                        if matches!(self.graph.def(c).op(), MirOp::ToInt32 | MirOp::TruncateToInt32) =>
                    {
                        Some(c)
                    }
                    _ => None,
                })
                .collect();
            for conversion in conversions {
                if !self.graph.contains_def(conversion) {
                    continue;
                }
                self.graph.replace_all_uses_with(conversion, def)?;
                self.graph.discard(conversion);
                self.stats.conversions_removed += 1;
            }
        }
        Ok(())
    }

    /// An int32 version of operand `index` of `def`, reusing the input of a `ToDouble` or
    /// inserting a conversion right before the place the operand is read.
    fn int32_input(
        &mut self,
        def: DefId,
        index: usize,
        input: DefId,
        requested: TruncateKind,
    ) -> Result<DefId> {
        let i = self.graph.def(input);
        if matches!(i.op(), MirOp::ToDouble) && self.graph.def(i.operand(0)).ty() == MirType::Int32 {
            return Ok(i.operand(0));
        }

        let op = if requested == TruncateKind::TruncateAfterBailouts {
            MirOp::ToInt32
        } else {
            MirOp::TruncateToInt32
        };
        let d = self.graph.def(def);
        let block = d.block();
        let conversion = if d.is_phi() {
            let pred = self.graph.block(block).predecessors()[index];
            self.graph
                .insert_before_terminator(pred, op, MirType::Int32, vec![input])?
        } else {
            let position = self
                .graph
                .block(block)
                .instructions()
                .iter()
                .position(|&x| x == def)
                .unwrap_or(0);
            self.graph
                .insert_at(block, position, op, MirType::Int32, vec![input])?
        };
        self.compute_range(conversion);
        self.stats.conversions_inserted += 1;
        Ok(conversion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{build_dominator_tree, RangeAnalysisStats},
        config::OptimizationConfig,
        mir::{verify_graph, Graph},
        test::{
            interp::{run, Outcome, Value},
            XorShift64,
        },
    };

    fn analyse(graph: &mut Graph, config: OptimizationConfig) -> Result<RangeAnalysisStats> {
        build_dominator_tree(graph)?;
        let mut analysis = RangeAnalysis::new(graph, config);
        analysis.add_beta_nodes()?;
        analysis.analyze()?;
        analysis.truncate()?;
        analysis.remove_beta_nodes()?;
        Ok(*analysis.stats())
    }

    // return (double(a) + double(b)) | 0
    fn double_sum_or_zero() -> Result<(Graph, DefId)> {
        let mut g = Graph::new();
        let entry = g.new_entry_block(0)?;
        let a = g.parameter(entry, 0, MirType::Int32)?;
        let b = g.parameter(entry, 1, MirType::Int32)?;
        let x = g.unary(entry, MirOp::ToDouble, a, MirType::Double)?;
        let y = g.unary(entry, MirOp::ToDouble, b, MirType::Double)?;
        let sum = g.binary(entry, MirOp::Add, x, y, MirType::Double)?;
        let zero = g.constant_i32(entry, 0)?;
        let result = g.binary(entry, MirOp::BitOr, sum, zero, MirType::Int32)?;
        g.ret(entry, result)?;
        Ok((g, sum))
    }

    #[test]
    fn test_kinds_are_ordered() {
        assert!(TruncateKind::NoTruncate < TruncateKind::TruncateAfterBailouts);
        assert!(TruncateKind::IndirectTruncate < TruncateKind::Truncate);
        assert_eq!(
            operand_kind(&MirOp::Add, TruncateKind::Truncate),
            TruncateKind::IndirectTruncate
        );
        assert_eq!(
            operand_kind(&MirOp::Mod, TruncateKind::Truncate),
            TruncateKind::TruncateAfterBailouts
        );
        assert_eq!(
            operand_kind(&MirOp::Return, TruncateKind::Truncate),
            TruncateKind::NoTruncate
        );
    }

    #[test]
    fn test_bitwise_consumer_truncates_double_add() -> Result<()> {
        let (original, _) = double_sum_or_zero()?;
        let (mut g, sum) = double_sum_or_zero()?;
        analyse(&mut g, OptimizationConfig::default())?;

        let d = g.def(sum);
        assert_eq!(d.ty(), MirType::Int32);
        assert!(d.is_truncated());
        // The int32 inputs are read directly.
        for &operand in d.operands() {
            assert!(matches!(g.def(operand).op(), MirOp::Parameter(_)));
        }
        verify_graph(&g)?;

        let mut rng = XorShift64::new(0x7e57);
        let edges = [i32::MIN, -1, 0, 1, i32::MAX];
        for _ in 0..200 {
            let a = if rng.chance(1, 3) { *rng.pick(&edges) } else { rng.range_i32(i32::MIN, i32::MAX) };
            let b = if rng.chance(1, 3) { *rng.pick(&edges) } else { rng.range_i32(i32::MIN, i32::MAX) };
            let args = [Value::Number(f64::from(a)), Value::Number(f64::from(b))];
            let before = run(&original, &args);
            let after = run(&g, &args);
            assert!(before.same_as(&after), "{a} + {b}: {before:?} vs {after:?}");
        }
        Ok(())
    }

    #[test]
    fn test_returned_value_is_not_truncated() -> Result<()> {
        let mut g = Graph::new();
        let entry = g.new_entry_block(0)?;
        let a = g.parameter(entry, 0, MirType::Int32)?;
        let x = g.unary(entry, MirOp::ToDouble, a, MirType::Double)?;
        let sum = g.binary(entry, MirOp::Add, x, x, MirType::Double)?;
        let zero = g.constant_i32(entry, 0)?;
        let masked = g.binary(entry, MirOp::BitOr, sum, zero, MirType::Int32)?;
        let both = g.binary(entry, MirOp::Add, sum, masked, MirType::Double)?;
        g.ret(entry, both)?;

        analyse(&mut g, OptimizationConfig::default())?;
        assert_eq!(g.def(sum).ty(), MirType::Double);
        assert!(!g.def(sum).is_truncated());
        Ok(())
    }

    #[test]
    fn test_resume_point_capture_keeps_bailouts() -> Result<()> {
        let build = || -> Result<(Graph, DefId)> {
            let mut g = Graph::new();
            let entry = g.new_entry_block(1)?;
            let a = g.parameter(entry, 0, MirType::Int32)?;
            let x = g.unary(entry, MirOp::ToDouble, a, MirType::Double)?;
            let sum = g.binary(entry, MirOp::Add, x, x, MirType::Double)?;
            g.set_slot(entry, 0, sum);
            // The next block's entry resume point captures `sum`.
            let next = g.new_block(Some(entry))?;
            g.goto(entry, next)?;
            let zero = g.constant_i32(next, 0)?;
            let masked = g.binary(next, MirOp::BitOr, sum, zero, MirType::Int32)?;
            g.ret(next, masked)?;
            Ok((g, sum))
        };

        let (mut g, sum) = build()?;
        let stats = analyse(&mut g, OptimizationConfig::default())?;
        assert_eq!(g.def(sum).ty(), MirType::Int32);
        assert!(!g.def(sum).is_truncated());
        // Retyped only: the flip to int32 keeps the bailout.
        assert_eq!(stats.truncated, 0);
        assert!(stats.retyped_int32 > 0);
        let args = [Value::Number(f64::from(i32::MAX))];
        assert!(matches!(run(&g, &args), Outcome::Bailout(_)));

        let (mut g, sum) = build()?;
        let stats = analyse(&mut g, OptimizationConfig::default().with_asmjs_like_mode(true))?;
        assert!(g.def(sum).is_truncated());
        assert!(stats.truncated > 0);
        assert_eq!(stats.retyped_int32, 0);
        assert!(matches!(run(&g, &args), Outcome::Returned(Value::Number(v)) if v == -2.0));
        Ok(())
    }

    #[test]
    fn test_conversion_inserted_for_double_operand() -> Result<()> {
        let mut g = Graph::new();
        let entry = g.new_entry_block(0)?;
        let a = g.parameter(entry, 0, MirType::Int32)?;
        let x = g.unary(entry, MirOp::ToDouble, a, MirType::Double)?;
        let floored = g.unary(entry, MirOp::Floor, x, MirType::Double)?;
        let sum = g.binary(entry, MirOp::Add, floored, x, MirType::Double)?;
        let masked = g.unary(entry, MirOp::TruncateToInt32, sum, MirType::Int32)?;
        let zero = g.constant_i32(entry, 0)?;
        let result = g.binary(entry, MirOp::BitXor, masked, zero, MirType::Int32)?;
        g.ret(entry, result)?;

        build_dominator_tree(&mut g)?;
        let mut analysis = RangeAnalysis::new(&mut g, OptimizationConfig::default());
        analysis.analyze()?;
        analysis.truncate()?;
        let stats = *analysis.stats();
        assert_eq!(stats.conversions_inserted, 1);
        assert_eq!(stats.conversions_removed, 1);

        assert!(!g.contains_def(masked));
        assert_eq!(g.def(result).operand(0), sum);
        let converted = g.def(sum).operand(0);
        assert_eq!(g.def(converted).op(), &MirOp::TruncateToInt32);
        assert_eq!(g.def(converted).operand(0), floored);
        assert_eq!(g.def(sum).operand(1), a);
        verify_graph(&g)?;
        Ok(())
    }
}
