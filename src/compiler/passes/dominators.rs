//! Dominator tree construction as a pipeline pass.

use crate::{
    analysis::{build_dominator_tree, clear_dominator_tree},
    compiler::pass::MirPass,
    config::OptimizationConfig,
    mir::Graph,
    Result,
};

/// Rebuilds the dominator tree from scratch.
#[derive(Debug, Default)]
pub struct DominatorTreePass;

impl DominatorTreePass {
    /// Creates a new dominator tree pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MirPass for DominatorTreePass {
    fn name(&self) -> &'static str {
        "dominator-tree"
    }

    fn description(&self) -> &'static str {
        "Computes immediate dominators and the pre-order dominator indices"
    }

    fn run(&mut self, graph: &mut Graph, _config: &OptimizationConfig) -> Result<bool> {
        clear_dominator_tree(graph);
        build_dominator_tree(graph)?;
        Ok(false)
    }
}
