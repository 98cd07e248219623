//! Range analysis as a pipeline pass.

use crate::{
    analysis::{RangeAnalysis, RangeAnalysisStats},
    compiler::pass::MirPass,
    config::OptimizationConfig,
    mir::Graph,
    Result,
};

/// Runs [`RangeAnalysis`] with the pipeline's configuration and keeps its counters.
#[derive(Debug, Default)]
pub struct RangeAnalysisPass {
    stats: RangeAnalysisStats,
}

impl RangeAnalysisPass {
    /// Creates a new range analysis pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of the last run.
    #[must_use]
    pub const fn stats(&self) -> RangeAnalysisStats {
        self.stats
    }
}

impl MirPass for RangeAnalysisPass {
    fn name(&self) -> &'static str {
        "range-analysis"
    }

    fn description(&self) -> &'static str {
        "Infers value ranges, hoists bounds checks and truncates integer arithmetic"
    }

    fn run(&mut self, graph: &mut Graph, config: &OptimizationConfig) -> Result<bool> {
        self.stats = RangeAnalysis::new(graph, *config).run()?;
        let s = &self.stats;
        Ok(s.bounds_checks_hoisted > 0
            || s.tests_folded > 0
            || s.truncated > 0
            || s.retyped_int32 > 0
            || s.conversions_inserted > 0
            || s.conversions_removed > 0
            || s.assertions_inserted > 0)
    }
}
