//! Loop iteration bounds and bounds check hoisting.
//!
//! A loop that keeps running while `i + c < n`, with `i = phi(init, i + k)` and `n` defined
//! before the loop, takes its backedge at most `n - c - init` times. That bound is a
//! [`LinearSum`] over definitions available in the preheader, and every induction variable
//! of the header gets symbolic bounds from it. A bounds check on such a variable can then
//! be replaced by two checks in the preheader, one per bound.

use crate::{
    analysis::ranges::{
        beta::dominating_test,
        range::{Range, MAX_INT32_EXPONENT},
        symbolic::{
            extract_linear_sum, skip_betas, BoundValidity, LinearSum, LoopIterationBound,
            SymbolicBound, SymbolicBounds,
        },
        RangeAnalysis,
    },
    mir::{BlockId, CompareOp, Constant, DefFlags, DefId, Graph, MirOp, MirType},
    utils::BitSet,
    Result,
};

/// The induction variable bounding a loop, normalized so that the loop continues while
/// `phi + offset <op> limit`.
#[derive(Debug, Clone)]
struct Induction {
    header: BlockId,
    phi: DefId,
    init: DefId,
    step: i32,
    op: CompareOp,
    offset: i32,
    /// `None` stands for the constant zero.
    limit: Option<DefId>,
    test: DefId,
    continue_block: BlockId,
}

/// The loop body: blocks reaching the backedge without passing the header. `None` if a
/// body block escapes the header's dominance, as in irreducible control flow.
fn loop_blocks(graph: &Graph, header: BlockId, backedge: BlockId) -> Option<BitSet> {
    let mut body = BitSet::new(graph.block_capacity());
    body.insert(header.index());
    body.insert(backedge.index());
    let mut stack = vec![backedge];
    while let Some(block) = stack.pop() {
        if !graph.dominates(header, block) {
            return None;
        }
        for &pred in graph.block(block).predecessors() {
            if body.insert(pred.index()) {
                stack.push(pred);
            }
        }
    }
    Some(body)
}

fn in_loop(graph: &Graph, body: &BitSet, def: DefId) -> bool {
    body.contains(graph.def(def).block().index())
}

/// `term + constant` of `def` as a [`LinearSum`].
fn linear_sum_of(graph: &Graph, def: DefId) -> Option<LinearSum> {
    let simple = extract_linear_sum(graph, def);
    let mut sum = LinearSum::from_constant(simple.constant);
    if let Some(term) = simple.term {
        sum.add_term(term, 1).then_some(())?;
    }
    Some(sum)
}

/// `i = phi(init, i + k)` with `init` defined outside the loop: returns `(init, k)`.
fn induction_step(graph: &Graph, body: &BitSet, phi: DefId) -> Option<(DefId, i32)> {
    let d = graph.def(phi);
    if !d.is_phi() || d.operands().len() != 2 || d.ty() != MirType::Int32 {
        return None;
    }
    let init = d.operand(0);
    if in_loop(graph, body, init) || graph.def(init).ty() != MirType::Int32 {
        return None;
    }
    let modified = extract_linear_sum(graph, d.operand(1));
    if modified.term != Some(phi) || modified.constant == 0 {
        return None;
    }
    Some((init, modified.constant))
}

impl RangeAnalysis<'_> {
    /// Looks for an iteration bound of the loop headed by `header` and, when one is found,
    /// derives symbolic bounds for the header phis and hoists bounds checks.
    pub(super) fn analyze_loop(&mut self, header: BlockId) -> Result<()> {
        let graph = &*self.graph;
        let h = graph.block(header);
        if h.loop_type_changed() {
            log::trace!("{header}: phi types changed, not analysing");
            return Ok(());
        }
        let Some(backedge) = h.backedge() else {
            return Ok(());
        };
        if backedge == header {
            return Ok(());
        }
        let Some(body) = loop_blocks(graph, header, backedge) else {
            log::trace!("{header}: loop body not dominated by its header");
            return Ok(());
        };

        // Any test on the dominator chain of the backedge with an exit branch runs on every
        // iteration.
        let mut induction = None;
        let mut block = backedge;
        while block != header {
            if let Some((test, continue_is_true)) = dominating_test(graph, block) {
                induction = self.match_induction(header, &body, test, block, continue_is_true);
                if induction.is_some() {
                    break;
                }
            }
            match graph.block(block).immediate_dominator() {
                Some(idom) if idom != block => block = idom,
                _ => break,
            }
        }
        let Some(induction) = induction else {
            return Ok(());
        };
        let Some(bound) = self.iteration_bound(&induction) else {
            return Ok(());
        };
        log::debug!("{header}: at most {} iterations", bound.bound);
        self.stats.loops_bounded += 1;

        let mut steps = Vec::new();
        for phi in self.graph.block(header).phis().to_vec() {
            if let Some(step) = self.analyze_loop_phi(&body, &bound, &induction, phi) {
                steps.push((phi, step));
            }
        }
        self.loop_bounds.push(bound);

        self.hoist_bounds_checks(header, backedge, &body, &induction, &steps)
    }

    /// Matches `test` against the induction pattern. `continue_block` is the successor
    /// that stays in the loop.
    fn match_induction(
        &self,
        header: BlockId,
        body: &BitSet,
        test: DefId,
        continue_block: BlockId,
        continue_is_true: bool,
    ) -> Option<Induction> {
        let graph = &*self.graph;
        let MirOp::Test { if_true, if_false } = *graph.def(test).op() else {
            return None;
        };
        let exit = if continue_is_true { if_false } else { if_true };
        if body.contains(exit.index()) {
            return None;
        }
        let condition = graph.def(graph.def(test).operand(0));
        let MirOp::Compare(op) = *condition.op() else {
            return None;
        };
        let (lhs, rhs) = (condition.operand(0), condition.operand(1));
        if graph.def(lhs).ty() != MirType::Int32 || graph.def(rhs).ty() != MirType::Int32 {
            return None;
        }
        let mut op = if continue_is_true { op } else { op.negate() };

        let l = extract_linear_sum(graph, lhs);
        let r = extract_linear_sum(graph, rhs);
        let mut offset = l.constant.checked_sub(r.constant)?;
        let (mut term, mut limit) = (l.term, r.term);
        if limit.is_some_and(|d| in_loop(graph, body, d)) {
            if term.is_some_and(|d| in_loop(graph, body, d)) {
                return None;
            }
            std::mem::swap(&mut term, &mut limit);
            offset = offset.checked_neg()?;
            op = op.swap();
        }

        let phi = term?;
        if graph.def(phi).block() != header {
            return None;
        }
        let (init, step) = induction_step(graph, body, phi)?;

        // The increment must only run once the test let the iteration continue, so that
        // the test bounds the value it increments.
        let write = skip_betas(graph, graph.def(phi).operand(1));
        let w = graph.def(write);
        if !matches!(w.op(), MirOp::Add | MirOp::Sub)
            || w.is_truncated()
            || !in_loop(graph, body, write)
            || !graph.dominates(continue_block, w.block())
        {
            return None;
        }

        let upward = matches!(op, CompareOp::Lt | CompareOp::Le);
        let downward = matches!(op, CompareOp::Gt | CompareOp::Ge);
        if !((upward && step > 0) || (downward && step < 0)) {
            return None;
        }
        Some(Induction {
            header,
            phi,
            init,
            step,
            op,
            offset,
            limit,
            test,
            continue_block,
        })
    }

    /// Range of the limit, with a missing limit read as zero.
    fn limit_range(&self, induction: &Induction) -> Range {
        induction
            .limit
            .map_or_else(|| Range::constant(0), |d| self.operand_range(d))
    }

    /// Inside the loop the phi stays at or below (upward) or at or above (downward) this
    /// value; `delta` turns the strict comparisons into inclusive ones.
    fn last_value(&self, induction: &Induction) -> Option<(i64, i64)> {
        let delta = i64::from(matches!(induction.op, CompareOp::Lt | CompareOp::Gt));
        let limit = self.limit_range(induction);
        let offset = i64::from(induction.offset);
        if induction.step > 0 {
            Some((i64::from(limit.upper()?) - offset - delta, delta))
        } else {
            Some((i64::from(limit.lower()?) - offset + delta, delta))
        }
    }

    /// Builds the iteration bound and refines the numeric range of the bounding phi.
    fn iteration_bound(&mut self, induction: &Induction) -> Option<LoopIterationBound> {
        let graph = &*self.graph;
        let (last, delta) = self.last_value(induction)?;
        // One more step past the last value must still be an int32, otherwise the
        // increment could overflow and the bound would not hold.
        let after_exit = last + i64::from(induction.step);
        let after_exit = i32::try_from(after_exit).ok()?;
        let delta = i32::try_from(delta).ok()?;

        let init = linear_sum_of(graph, induction.init)?;
        let mut limit = LinearSum::new();
        if let Some(d) = induction.limit {
            limit.add_term(d, 1).then_some(())?;
        }
        let mut phi = LinearSum::new();
        phi.add_term(induction.phi, 1).then_some(())?;

        // Upward: limit - offset - delta - init + 1 iterations.
        // Downward: init - limit + offset - delta + 1 iterations.
        let (mut bound, mut current) = (LinearSum::new(), LinearSum::new());
        let ok = if induction.step > 0 {
            bound.add_sum(&limit, 1)
                && bound.add_sum(&init, -1)
                && bound.add_constant(induction.offset.checked_neg()?)
                && bound.add_constant(1 - delta)
                && current.add_sum(&phi, 1)
                && current.add_sum(&init, -1)
        } else {
            bound.add_sum(&init, 1)
                && bound.add_sum(&limit, -1)
                && bound.add_constant(induction.offset)
                && bound.add_constant(1 - delta)
                && current.add_sum(&init, 1)
                && current.add_sum(&phi, -1)
        };
        if !ok {
            return None;
        }

        let init_range = self.operand_range(induction.init);
        let (lower, upper) = if induction.step > 0 {
            (init_range.lower(), init_range.upper().map(|u| u.max(after_exit)))
        } else {
            (init_range.lower().map(|l| l.min(after_exit)), init_range.upper())
        };
        let refined = Range::new(lower, upper, false, MAX_INT32_EXPONENT);
        let current_range = self.operand_range(induction.phi);
        if let Some(range) = current_range.intersect(&refined) {
            self.graph.def_mut(induction.phi).range = Some(range);
        }

        Some(LoopIterationBound {
            header: induction.header,
            test: induction.test,
            bound,
            current_iteration: current,
        })
    }

    /// Gives the header phi `phi = phi(init, phi + k)` symbolic bounds: `init` on one side
    /// everywhere, and its value on the last iteration on the other side wherever the loop
    /// test is known to have passed. Returns the step.
    fn analyze_loop_phi(
        &mut self,
        body: &BitSet,
        bound: &LoopIterationBound,
        induction: &Induction,
        phi: DefId,
    ) -> Option<i32> {
        let graph = &*self.graph;
        let (init, step) = induction_step(graph, body, phi)?;
        let initial = linear_sum_of(graph, init)?;

        // Points dominated by the test run only if the backedge is taken once more, so the
        // phi has moved at most `bound - 1` times there.
        let mut last = bound.bound.clone();
        let ok = last.multiply(step) && last.add_sum(&initial, 1) && last.add_constant(step.checked_neg()?);
        if !ok {
            return None;
        }

        let everywhere = SymbolicBound {
            sum: initial,
            validity: BoundValidity::Everywhere,
        };
        let loop_local = SymbolicBound {
            sum: last,
            validity: BoundValidity::LoopLocal {
                test: induction.test,
                continue_block: induction.continue_block,
            },
        };
        let bounds = if step > 0 {
            SymbolicBounds {
                lower: Some(everywhere),
                upper: Some(loop_local),
            }
        } else {
            SymbolicBounds {
                lower: Some(loop_local),
                upper: Some(everywhere),
            }
        };
        if let (Some(lower), Some(upper)) = (&bounds.lower, &bounds.upper) {
            log::trace!("{phi}: symbolic bounds [{lower}, {upper}]");
        }
        self.symbolic.insert(phi, bounds);
        Some(step)
    }

    /// Moves bounds checks on induction variables into the preheader.
    ///
    /// A check is hoisted only when the hoisted pair rejects exactly the executions the
    /// original would have rejected on some iteration: the bounding test sits in the
    /// header and is the loop's only exit, the check runs on every iteration, and the
    /// index moves by one per iteration. The hoisted checks are guarded by the loop entry
    /// condition, so a loop that never runs checks nothing.
    fn hoist_bounds_checks(
        &mut self,
        header: BlockId,
        backedge: BlockId,
        body: &BitSet,
        induction: &Induction,
        steps: &[(DefId, i32)],
    ) -> Result<()> {
        let graph = &*self.graph;
        let test_block = graph.def(induction.test).block();
        let unit_step = |phi: DefId| steps.iter().any(|&(p, s)| p == phi && s.unsigned_abs() == 1);
        if test_block != header || !unit_step(induction.phi) {
            return Ok(());
        }
        let Some(preheader) = graph.block(header).loop_predecessor() else {
            return Ok(());
        };
        let enters_directly = graph
            .block(preheader)
            .terminator()
            .is_some_and(|t| matches!(graph.def(t).op(), MirOp::Goto(_)));
        if !enters_directly || body.contains(preheader.index()) {
            return Ok(());
        }

        let blocks: Vec<BlockId> = graph
            .reverse_postorder()
            .into_iter()
            .filter(|b| body.contains(b.index()))
            .collect();
        let exits = graph.def(induction.test).op().successors().collect::<Vec<_>>();
        let exit_ok =
            |b: BlockId, s: BlockId| body.contains(s.index()) || (b == test_block && exits.contains(&s));
        if !blocks.iter().all(|&b| graph.successors(b).all(|s| exit_ok(b, s))) {
            log::trace!("{header}: loop has more than one exit, not hoisting");
            return Ok(());
        }

        let mut guard = None;
        for block in blocks {
            if !self.graph.dominates(block, backedge) {
                continue;
            }
            for ins in self.graph.block(block).instructions().to_vec() {
                if !matches!(self.graph.def(ins).op(), MirOp::BoundsCheck) {
                    continue;
                }
                self.try_hoist(preheader, body, induction, steps, ins, &mut guard)?;
            }
        }
        Ok(())
    }

    fn try_hoist(
        &mut self,
        preheader: BlockId,
        body: &BitSet,
        induction: &Induction,
        steps: &[(DefId, i32)],
        check: DefId,
        guard: &mut Option<DefId>,
    ) -> Result<bool> {
        let graph = &*self.graph;
        let c = graph.def(check);
        if c.operands().len() != 2 {
            return Ok(false);
        }
        let block = c.block();
        let index = extract_linear_sum(graph, c.operand(0));
        let Some(term) = index.term else {
            return Ok(false);
        };
        if !steps.iter().any(|&(p, s)| p == term && s.unsigned_abs() == 1) {
            return Ok(false);
        }
        let Some(SymbolicBounds {
            lower: Some(lower),
            upper: Some(upper),
        }) = self.symbolic.get(&term)
        else {
            return Ok(false);
        };
        if !lower.is_valid_at(graph, block) || !upper.is_valid_at(graph, block) {
            return Ok(false);
        }

        let length = skip_betas(graph, c.operand(1));
        let length_constant = match graph.def(length).op() {
            MirOp::Constant(Constant::Int32(n)) => Some(*n),
            _ if in_loop(graph, body, length) => return Ok(false),
            _ => None,
        };

        let (mut lower_sum, mut upper_sum) = (lower.sum.clone(), upper.sum.clone());
        if !lower_sum.add_constant(index.constant) || !upper_sum.add_constant(index.constant) {
            return Ok(false);
        }
        let mut entry_sum = linear_sum_of(graph, induction.init).unwrap_or_default();
        if !entry_sum.add_constant(induction.offset) {
            return Ok(false);
        }
        if ![&lower_sum, &upper_sum, &entry_sum]
            .into_iter()
            .all(|s| self.materializes_exactly(s))
        {
            log::trace!("{check}: hoisted bounds could overflow");
            return Ok(false);
        }

        let original_index = c.operand(0);
        let before = self.graph.block(preheader).instructions().len() - 1;
        let guard = match *guard {
            Some(g) => g,
            None => {
                let first = self.materialize(preheader, &entry_sum)?;
                let limit = match induction.limit {
                    Some(d) => d,
                    None => self.insert_i32(preheader, 0)?,
                };
                let g = self.graph.insert_before_terminator(
                    preheader,
                    MirOp::Compare(induction.op),
                    MirType::Boolean,
                    vec![first, limit],
                )?;
                *guard = Some(g);
                g
            }
        };
        let low = self.materialize(preheader, &lower_sum)?;
        let high = self.materialize(preheader, &upper_sum)?;
        let length = match length_constant {
            Some(n) if in_loop(self.graph, body, length) => self.insert_i32(preheader, n)?,
            _ => length,
        };
        let lower_check = self.graph.insert_before_terminator(
            preheader,
            MirOp::BoundsCheckLower { minimum: 0 },
            MirType::Int32,
            vec![low, guard],
        )?;
        let upper_check = self.graph.insert_before_terminator(
            preheader,
            MirOp::BoundsCheck,
            MirType::Int32,
            vec![high, length, guard],
        )?;
        self.graph.def_mut(lower_check).flags |= DefFlags::HOISTED;
        self.graph.def_mut(upper_check).flags |= DefFlags::HOISTED;

        let inserted: Vec<DefId> = {
            let instrs = self.graph.block(preheader).instructions();
            instrs[before..instrs.len() - 1].to_vec()
        };
        for def in inserted {
            self.compute_range(def);
        }

        self.graph.replace_all_uses_with(check, original_index)?;
        self.graph.discard(check);
        log::debug!("hoisted {check} to {preheader} as [{lower_sum}, {upper_sum}]");
        self.stats.bounds_checks_hoisted += 1;
        Ok(true)
    }

    /// Returns `true` if evaluating `sum` the way [`materialize`](Self::materialize) does
    /// cannot overflow an intermediate int32 result.
    fn materializes_exactly(&self, sum: &LinearSum) -> bool {
        let fits = |lo: i64, hi: i64| lo >= i64::from(i32::MIN) && hi <= i64::from(i32::MAX);
        let (mut lo, mut hi) = (0i64, 0i64);
        for t in sum.terms() {
            if self.graph.def(t.term).ty() != MirType::Int32 {
                return false;
            }
            let r = self.operand_range(t.term);
            let (Some(l), Some(u)) = (r.lower(), r.upper()) else {
                return false;
            };
            let scale = i64::from(t.scale);
            let (a, b) = (i64::from(l) * scale, i64::from(u) * scale);
            let (tl, th) = (a.min(b), a.max(b));
            lo += tl;
            hi += th;
            if !fits(tl, th) || !fits(lo, hi) {
                return false;
            }
        }
        let c = i64::from(sum.constant());
        fits(lo + c, hi + c)
    }

    fn insert_i32(&mut self, block: BlockId, value: i32) -> Result<DefId> {
        self.graph.insert_before_terminator(
            block,
            MirOp::Constant(Constant::Int32(value)),
            MirType::Int32,
            Vec::new(),
        )
    }

    fn insert_arith(&mut self, block: BlockId, op: MirOp, lhs: DefId, rhs: DefId) -> Result<DefId> {
        self.graph
            .insert_before_terminator(block, op, MirType::Int32, vec![lhs, rhs])
    }

    /// Emits int32 arithmetic computing `sum` at the end of `block`.
    fn materialize(&mut self, block: BlockId, sum: &LinearSum) -> Result<DefId> {
        let mut value: Option<DefId> = None;
        for t in sum.terms().to_vec() {
            value = Some(match (value, t.scale) {
                (None, 1) => t.term,
                (Some(acc), 1) => self.insert_arith(block, MirOp::Add, acc, t.term)?,
                (acc, -1) => {
                    let lhs = match acc {
                        Some(acc) => acc,
                        None => self.insert_i32(block, 0)?,
                    };
                    self.insert_arith(block, MirOp::Sub, lhs, t.term)?
                }
                (acc, scale) => {
                    let factor = self.insert_i32(block, scale)?;
                    let scaled = self.insert_arith(block, MirOp::Mul, t.term, factor)?;
                    match acc {
                        Some(acc) => self.insert_arith(block, MirOp::Add, acc, scaled)?,
                        None => scaled,
                    }
                }
            });
        }
        match (value, sum.constant()) {
            (None, c) => self.insert_i32(block, c),
            (Some(v), 0) => Ok(v),
            (Some(v), c) => {
                let k = self.insert_i32(block, c)?;
                self.insert_arith(block, MirOp::Add, v, k)
            }
        }
    }
}
