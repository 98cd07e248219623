//! The optimization pipeline for one function.
//!
//! [`Pipeline`] runs the built-in passes in a fixed order:
//!
//! 1. dominator tree
//! 2. unreachable code elimination
//! 3. range analysis
//! 4. unreachable code elimination again, when range analysis folded a test
//!
//! Cancellation is cooperative. The orchestrator sets a shared flag; the pipeline looks
//! at it before each pass and stops with [`Error::Cancelled`], leaving the graph as the
//! last completed pass produced it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    analysis::RangeAnalysisStats,
    compiler::{
        pass::MirPass,
        passes::{DominatorTreePass, RangeAnalysisPass, UceStats, UnreachableCodeElimination},
        phis::{PhiEliminator, ValueNumberer},
    },
    config::OptimizationConfig,
    mir::Graph,
    Error, Result,
};

/// What one pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Names of the passes that ran, in order.
    pub passes: Vec<&'static str>,
    /// Counters of the range analysis run.
    pub range_analysis: RangeAnalysisStats,
    /// Counters of each unreachable code elimination run.
    pub uce: Vec<UceStats>,
    /// Whether any pass changed the graph.
    pub changed: bool,
}

impl PipelineReport {
    /// Blocks removed over all unreachable code elimination runs.
    #[must_use]
    pub fn blocks_removed(&self) -> usize {
        self.uce.iter().map(|s| s.blocks_removed).sum()
    }
}

/// Runs the middle-end passes over one function's graph.
///
/// A pipeline holds no state shared with other pipelines, so independent functions can
/// be compiled concurrently, each with its own `Pipeline` and [`Graph`].
///
/// # Examples
///
/// ```rust
/// use std::sync::{atomic::AtomicBool, Arc};
///
/// use jitmir::{Graph, OptimizationConfig, Pipeline};
///
/// let mut graph = Graph::new();
/// let entry = graph.new_entry_block(0)?;
/// let never = graph.constant_bool(entry, false)?;
/// let dead = graph.new_block(Some(entry))?;
/// let live = graph.new_block(Some(entry))?;
/// graph.test(entry, never, dead, live)?;
/// let one = graph.constant_i32(dead, 1)?;
/// graph.ret(dead, one)?;
/// let two = graph.constant_i32(live, 2)?;
/// graph.ret(live, two)?;
///
/// let cancel = Arc::new(AtomicBool::new(false));
/// let report = Pipeline::new(OptimizationConfig::default())
///     .with_cancellation(cancel)
///     .run(&mut graph)?;
/// assert_eq!(report.blocks_removed(), 1);
/// assert_eq!(graph.num_blocks(), 2);
/// # Ok::<(), jitmir::Error>(())
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: OptimizationConfig,
    cancel: Option<Arc<AtomicBool>>,
    uce: UnreachableCodeElimination,
}

/// Runs `pass` unless cancellation was requested.
fn execute(
    cancel: Option<&AtomicBool>,
    config: &OptimizationConfig,
    pass: &mut dyn MirPass,
    graph: &mut Graph,
    report: &mut PipelineReport,
) -> Result<bool> {
    if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
        log::debug!("cancelled before {}", pass.name());
        return Err(Error::Cancelled);
    }
    log::debug!("running {}: {}", pass.name(), pass.description());
    let changed = pass.run(graph, config)?;
    report.passes.push(pass.name());
    report.changed |= changed;
    Ok(changed)
}

impl Pipeline {
    /// Creates a pipeline using `config` for every pass.
    #[must_use]
    pub fn new(config: OptimizationConfig) -> Self {
        Pipeline {
            config,
            cancel: None,
            uce: UnreachableCodeElimination::new(),
        }
    }

    /// Observes `flag` between passes and stops with [`Error::Cancelled`] once it is set.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Replaces the phi eliminator unreachable code elimination hands off to.
    #[must_use]
    pub fn with_phi_eliminator(mut self, eliminator: Box<dyn PhiEliminator>) -> Self {
        self.uce = self.uce.with_phi_eliminator(eliminator);
        self
    }

    /// Installs a value numberer run after unreachable code elimination removed blocks.
    #[must_use]
    pub fn with_value_numberer(mut self, numberer: Box<dyn ValueNumberer>) -> Self {
        self.uce = self.uce.with_value_numberer(numberer);
        self
    }

    /// The configuration every pass receives.
    #[must_use]
    pub const fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Runs the pipeline on `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the cancellation flag was set before a pass, and
    /// [`Error::OutOfMemory`] if an arena could not grow. Either way the caller should
    /// fall back to a non-optimizing tier for this function.
    pub fn run(&mut self, graph: &mut Graph) -> Result<PipelineReport> {
        let cancel = self.cancel.as_deref();
        let config = &self.config;
        let mut report = PipelineReport::default();

        execute(cancel, config, &mut DominatorTreePass::new(), graph, &mut report)?;

        execute(cancel, config, &mut self.uce, graph, &mut report)?;
        report.uce.push(self.uce.stats());

        let mut ranges = RangeAnalysisPass::new();
        execute(cancel, config, &mut ranges, graph, &mut report)?;
        report.range_analysis = ranges.stats();

        if report.range_analysis.tests_folded > 0 {
            execute(cancel, config, &mut self.uce, graph, &mut report)?;
            report.uce.push(self.uce.stats());
        }

        log::debug!(
            "pipeline done: {} passes, {} blocks removed",
            report.passes.len(),
            report.blocks_removed()
        );
        Ok(report)
    }
}
