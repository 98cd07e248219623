//! Passes unreachable code elimination hands off to after removing blocks.
//!
//! Phi elimination and value numbering are collaborators with their own implementations
//! elsewhere in a full compiler. They are trait objects here so that an embedder can plug
//! in its own; [`RedundantPhiElimination`] is the built-in phi eliminator.

use crate::{
    mir::{BlockId, Constant, Consumer, DefId, Graph, MirOp, MirType},
    Result,
};

/// Whether resume points count as readers of a phi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum Observability {
    /// A phi captured by a resume point is kept alive by it.
    Conservative,
    /// A phi read only by resume points is dead; the resume points see `undefined`
    /// instead.
    Aggressive,
}

/// Removes phis that no longer merge distinct values.
pub trait PhiEliminator {
    /// Eliminates phis in `graph`. Returns `true` if any phi was removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if a use list could not grow.
    fn eliminate_phis(&mut self, graph: &mut Graph, observability: Observability)
        -> Result<bool>;
}

/// Merges congruent computations. Run after unreachable code elimination removed blocks,
/// since a removed block may have been the only thing keeping two values apart.
pub trait ValueNumberer {
    /// Runs value numbering on `graph`. Returns `true` if the graph changed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if the graph could not be updated.
    fn run(&mut self, graph: &mut Graph) -> Result<bool>;
}

/// Built-in [`PhiEliminator`].
///
/// A phi whose operands are the phi itself or one other value is replaced by that value
/// everywhere, resume points included:
///
/// ```text
/// p = phi(v, v)      =>  p replaced by v
/// p = phi(v, p)      =>  p replaced by v
/// p = phi(v, w)      =>  kept
/// ```
///
/// A phi nothing reads is discarded. Under [`Observability::Aggressive`] a phi read only
/// by resume points is discarded as well.
#[derive(Debug, Default)]
pub struct RedundantPhiElimination {
    removed: usize,
}

fn phis_of(graph: &Graph) -> Vec<DefId> {
    graph
        .block_ids()
        .flat_map(|b| graph.block(b).phis().to_vec())
        .collect()
}

impl RedundantPhiElimination {
    /// Creates a new eliminator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Phis removed over the lifetime of this eliminator.
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.removed
    }

    /// The value `phi` can be replaced by, if it is redundant.
    fn redundant_source(graph: &Graph, phi: DefId) -> Option<DefId> {
        let source = graph.def(phi).operand_if_redundant()?;
        // Replacing `phi` by a value computed from it would make that value read itself.
        if graph.def(source).operands().contains(&phi) {
            return None;
        }
        Some(source)
    }

    fn is_unobserved(graph: &Graph, phi: DefId, observability: Observability) -> bool {
        let uses = graph.def(phi).uses();
        match observability {
            Observability::Conservative => uses.is_empty(),
            Observability::Aggressive => uses
                .iter()
                .all(|u| matches!(u.consumer, Consumer::ResumePoint(_))),
        }
    }

    fn optimized_out(
        graph: &mut Graph,
        cache: &mut Option<DefId>,
        entry: BlockId,
    ) -> Result<DefId> {
        if let Some(value) = *cache {
            return Ok(value);
        }
        let value = graph.insert_at(
            entry,
            0,
            MirOp::Constant(Constant::Undefined),
            MirType::Value,
            vec![],
        )?;
        *cache = Some(value);
        Ok(value)
    }
}

impl PhiEliminator for RedundantPhiElimination {
    fn eliminate_phis(
        &mut self,
        graph: &mut Graph,
        observability: Observability,
    ) -> Result<bool> {
        let mut changed = false;
        let mut undefined = None;
        loop {
            let mut progressed = false;
            for phi in phis_of(graph) {
                // An earlier removal in this round may have taken it along.
                if !graph.contains_def(phi) {
                    continue;
                }
                if let Some(source) = Self::redundant_source(graph, phi) {
                    log::trace!("{phi} is redundant, replacing by {source}");
                    graph.replace_all_uses_with(phi, source)?;
                } else if Self::is_unobserved(graph, phi, observability) {
                    if graph.def(phi).has_uses() {
                        let Some(entry) = graph.entry_block() else {
                            continue;
                        };
                        let value = Self::optimized_out(graph, &mut undefined, entry)?;
                        graph.replace_all_uses_with(phi, value)?;
                    }
                    log::trace!("{phi} is unobserved, removing");
                } else {
                    continue;
                }
                graph.discard(phi);
                self.removed += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::verify_graph;

    // entry: test true, left, right; the join merges `v` and `w` in slot 0 and returns
    // either `phi + v` or the constant `w`.
    fn diamond(returns_phi: bool) -> Result<(Graph, DefId, DefId, DefId)> {
        let mut g = Graph::new();
        let entry = g.new_entry_block(1)?;
        let v = g.constant_i32(entry, 42)?;
        let w = g.constant_i32(entry, 7)?;
        g.set_slot(entry, 0, v);
        let cond = g.constant_bool(entry, true)?;
        let left = g.new_block(Some(entry))?;
        let right = g.new_block(Some(entry))?;
        g.test(entry, cond, left, right)?;
        g.set_slot(right, 0, w);
        let join = g.new_block(Some(left))?;
        g.goto(left, join)?;
        g.goto(right, join)?;
        g.add_predecessor(join, right)?;
        let phi = g.slot(join, 0);
        let result = if returns_phi {
            g.binary(join, MirOp::Add, phi, v, MirType::Int32)?
        } else {
            w
        };
        g.ret(join, result)?;
        assert!(g.def(phi).is_phi());
        Ok((g, phi, v, result))
    }

    #[test]
    fn test_trivial_phi_all_same() -> Result<()> {
        let (mut g, phi, v, sum) = diamond(true)?;
        // Make both operands `v`, as if the right value had been proven equal.
        g.replace_operand(phi, 1, v)?;
        let mut eliminator = RedundantPhiElimination::new();
        assert!(eliminator.eliminate_phis(&mut g, Observability::Conservative)?);
        assert!(!g.contains_def(phi));
        assert_eq!(g.def(sum).operands(), &[v, v]);
        assert_eq!(eliminator.removed(), 1);
        verify_graph(&g)?;
        Ok(())
    }

    #[test]
    fn test_loop_carried_phi_kept() -> Result<()> {
        let mut l = crate::test::counted_loop(4)?;
        let mut eliminator = RedundantPhiElimination::new();
        assert!(!eliminator.eliminate_phis(&mut l.graph, Observability::Aggressive)?);
        assert!(l.graph.contains_def(l.index));
        Ok(())
    }

    #[test]
    fn test_redundant_loop_phi_replaced_in_resume_points() -> Result<()> {
        let mut g = Graph::new();
        let entry = g.new_entry_block(1)?;
        let v = g.constant_i32(entry, 1)?;
        g.set_slot(entry, 0, v);
        let header = g.new_pending_loop_header(entry)?;
        g.goto(entry, header)?;
        // The body keeps the slot unchanged, so the header phi is phi(v, v).
        let body = g.new_block(Some(header))?;
        let exit = g.new_block(Some(header))?;
        let cond = g.constant_bool(header, false)?;
        g.test(header, cond, body, exit)?;
        g.goto(body, header)?;
        g.set_backedge(header, body)?;
        let zero = g.constant_i32(exit, 0)?;
        g.ret(exit, zero)?;

        let [phi] = g.block(header).phis()[..] else {
            panic!("expected one header phi");
        };
        let mut eliminator = RedundantPhiElimination::new();
        assert!(eliminator.eliminate_phis(&mut g, Observability::Conservative)?);
        assert!(!g.contains_def(phi));
        let rp = g.block(exit).entry_resume_point().unwrap();
        assert_eq!(g.resume_point(rp).operands(), &[v]);
        verify_graph(&g)?;
        Ok(())
    }

    #[test]
    fn test_phi_read_only_by_resume_points() -> Result<()> {
        let (mut g, phi, _, _) = diamond(false)?;
        let mut eliminator = RedundantPhiElimination::new();
        assert!(!eliminator.eliminate_phis(&mut g, Observability::Conservative)?);
        assert!(g.contains_def(phi));

        assert!(eliminator.eliminate_phis(&mut g, Observability::Aggressive)?);
        assert!(!g.contains_def(phi));
        let join = g.block_ids().last().unwrap();
        let rp = g.block(join).entry_resume_point().unwrap();
        let captured = g.resume_point(rp).operands()[0];
        assert_eq!(*g.def(captured).op(), MirOp::Constant(Constant::Undefined));
        verify_graph(&g)?;
        Ok(())
    }
}
