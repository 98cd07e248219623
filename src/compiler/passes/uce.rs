//! Unreachable code elimination.
//!
//! Removes every block the primary entry cannot reach, treating branches on constant
//! conditions as unconditional jumps.
//!
//! # Algorithm
//!
//! 1. Depth-first walk from the entry block, marking visited blocks. A `Test` whose
//!    condition is a constant is recorded and only its taken successor is followed.
//! 2. If the graph has an OSR entry, every successor of the OSR block must have been
//!    reached from the primary entry. Otherwise the OSR entry leads into code the walk
//!    did not see, and the pass gives up without changing anything.
//! 3. When every block was reached, only the marks are cleared.
//! 4. Otherwise recorded tests become `Goto`s, dead blocks are unlinked from the
//!    predecessor lists (and phis) of their surviving successors and freed, surviving
//!    blocks are renumbered and the dominator tree is rebuilt.
//! 5. Phis left with a single distinct operand are handed to the phi eliminator, then the
//!    value numberer runs if one is installed.
//!
//! ```text
//! entry: test false, A, B          entry: goto B
//! A:     goto J               =>   B:     goto J
//! B:     goto J                    J:     return b
//! J:     p = phi(a, b)
//!        return p
//! ```

use crate::{
    analysis::{build_dominator_tree, clear_dominator_tree},
    compiler::{
        pass::MirPass,
        phis::{Observability, PhiEliminator, RedundantPhiElimination, ValueNumberer},
    },
    config::OptimizationConfig,
    mir::{BlockId, Graph, MirOp},
    Result,
};

/// Counters describing one unreachable code elimination run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UceStats {
    /// Blocks removed from the graph.
    pub blocks_removed: usize,
    /// Constant tests rewritten into jumps.
    pub tests_folded: usize,
    /// Whether the phi eliminator removed anything afterwards.
    pub phis_eliminated: bool,
    /// Whether the run gave up because of the OSR entry.
    pub aborted_for_osr: bool,
}

/// Unreachable code elimination pass.
pub struct UnreachableCodeElimination {
    phi_eliminator: Box<dyn PhiEliminator>,
    value_numberer: Option<Box<dyn ValueNumberer>>,
    stats: UceStats,
}

impl Default for UnreachableCodeElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UnreachableCodeElimination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnreachableCodeElimination")
            .field("has_value_numberer", &self.value_numberer.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// The successor a `Test` on a constant condition always takes.
fn constant_branch_target(graph: &Graph, block: BlockId) -> Option<BlockId> {
    let term = graph.block(block).terminator()?;
    let def = graph.def(term);
    let MirOp::Test { if_true, if_false } = *def.op() else {
        return None;
    };
    match *graph.def(def.operand(0)).op() {
        MirOp::Constant(c) => Some(if c.to_boolean() { if_true } else { if_false }),
        _ => None,
    }
}

impl UnreachableCodeElimination {
    /// Creates the pass with the built-in [`RedundantPhiElimination`] and no value
    /// numberer.
    #[must_use]
    pub fn new() -> Self {
        UnreachableCodeElimination {
            phi_eliminator: Box::new(RedundantPhiElimination::new()),
            value_numberer: None,
            stats: UceStats::default(),
        }
    }

    /// Replaces the phi eliminator run after blocks are removed.
    #[must_use]
    pub fn with_phi_eliminator(mut self, eliminator: Box<dyn PhiEliminator>) -> Self {
        self.phi_eliminator = eliminator;
        self
    }

    /// Installs a value numberer run after blocks are removed.
    #[must_use]
    pub fn with_value_numberer(mut self, numberer: Box<dyn ValueNumberer>) -> Self {
        self.value_numberer = Some(numberer);
        self
    }

    /// Counters of the last run.
    #[must_use]
    pub const fn stats(&self) -> UceStats {
        self.stats
    }

    /// Marks every block reachable from the entry. Returns the number marked and the
    /// constant tests met on the way, with their taken successor.
    fn mark_reachable(graph: &mut Graph, entry: BlockId) -> (usize, Vec<(BlockId, BlockId)>) {
        let mut folded = Vec::new();
        let mut worklist = vec![entry];
        graph.set_marked(entry, true);
        let mut marked = 1;
        while let Some(block) = worklist.pop() {
            let successors: Vec<BlockId> = match constant_branch_target(graph, block) {
                Some(taken) => {
                    folded.push((block, taken));
                    vec![taken]
                }
                None => graph.successors(block).collect(),
            };
            for succ in successors {
                if !graph.block(succ).is_marked() {
                    graph.set_marked(succ, true);
                    marked += 1;
                    worklist.push(succ);
                }
            }
        }
        (marked, folded)
    }

    /// Replaces the constant test ending `block` by a jump to `taken`. Returns the
    /// surviving blocks that lost `block` as predecessor.
    fn fold_test(graph: &mut Graph, block: BlockId, taken: BlockId) -> Result<Vec<BlockId>> {
        let untaken: Vec<BlockId> = graph.successors(block).filter(|&s| s != taken).collect();
        graph.discard_terminator(block);
        graph.goto(block, taken)?;
        let mut unlinked = Vec::new();
        for succ in untaken {
            // Dead successors go away with their whole block.
            if graph.block(succ).is_marked() {
                graph.remove_predecessor(succ, block);
                unlinked.push(succ);
            }
        }
        log::trace!("{block}: constant test folded into goto {taken}");
        Ok(unlinked)
    }

    /// Runs the elimination and returns its counters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if an arena could not grow.
    pub fn eliminate(&mut self, graph: &mut Graph) -> Result<UceStats> {
        self.stats = UceStats::default();
        let Some(entry) = graph.entry_block() else {
            return Ok(self.stats);
        };

        graph.unmark_blocks();
        let (mut marked, folded) = Self::mark_reachable(graph, entry);

        if let Some(osr) = graph.osr_block() {
            if graph.successors(osr).any(|s| !graph.block(s).is_marked()) {
                log::debug!("OSR entry {osr} reaches blocks the entry does not, keeping all");
                graph.unmark_blocks();
                self.stats.aborted_for_osr = true;
                return Ok(self.stats);
            }
            if !graph.block(osr).is_marked() {
                graph.set_marked(osr, true);
                marked += 1;
            }
        }

        if marked == graph.num_blocks() {
            graph.unmark_blocks();
            return Ok(self.stats);
        }

        let mut touched = Vec::new();
        for &(block, taken) in &folded {
            touched.extend(Self::fold_test(graph, block, taken)?);
        }
        self.stats.tests_folded = folded.len();

        let dead: Vec<BlockId> = graph
            .block_ids()
            .filter(|&b| !graph.block(b).is_marked())
            .collect();
        for &block in &dead {
            let successors: Vec<BlockId> = graph.successors(block).collect();
            for succ in successors {
                if graph.block(succ).is_marked() {
                    graph.remove_predecessor(succ, block);
                    touched.push(succ);
                }
            }
        }
        graph.discard_blocks(&dead);
        self.stats.blocks_removed = dead.len();
        log::debug!(
            "removed {} unreachable blocks, folded {} tests",
            dead.len(),
            folded.len()
        );

        graph.renumber_blocks();
        graph.unmark_blocks();
        clear_dominator_tree(graph);
        build_dominator_tree(graph)?;

        let redundant_phi = touched.iter().any(|&block| {
            graph
                .block(block)
                .phis()
                .iter()
                .any(|&phi| graph.def(phi).operand_if_redundant().is_some())
        });
        if redundant_phi {
            self.stats.phis_eliminated = self
                .phi_eliminator
                .eliminate_phis(graph, Observability::Conservative)?;
        }
        if let Some(numberer) = self.value_numberer.as_mut() {
            numberer.run(graph)?;
        }
        Ok(self.stats)
    }
}

impl MirPass for UnreachableCodeElimination {
    fn name(&self) -> &'static str {
        "unreachable-code-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes blocks unreachable from the entry, folding constant branches"
    }

    fn run(&mut self, graph: &mut Graph, _config: &OptimizationConfig) -> Result<bool> {
        let stats = self.eliminate(graph)?;
        Ok(stats.blocks_removed > 0 || stats.tests_folded > 0)
    }
}
