//! The pass trait shared by every transformation the pipeline runs.

use crate::{config::OptimizationConfig, mir::Graph, Result};

/// A transformation over one function's graph.
///
/// Passes run to completion on a graph they own exclusively; the pipeline only looks at
/// cancellation between two passes. A pass must therefore leave the graph coherent when it
/// returns, whether it succeeded or not.
///
/// # Examples
///
/// ```rust
/// use jitmir::{compiler::MirPass, Graph, OptimizationConfig, Result};
///
/// struct CountBlocks(usize);
///
/// impl MirPass for CountBlocks {
///     fn name(&self) -> &'static str {
///         "count-blocks"
///     }
///
///     fn description(&self) -> &'static str {
///         "Counts live blocks without changing anything"
///     }
///
///     fn run(&mut self, graph: &mut Graph, _config: &OptimizationConfig) -> Result<bool> {
///         self.0 = graph.num_blocks();
///         Ok(false)
///     }
/// }
/// ```
pub trait MirPass {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Human-readable description of what the pass does.
    fn description(&self) -> &'static str;

    /// Runs the pass on `graph`.
    ///
    /// Returns `true` if the graph changed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if an arena could not grow. Heuristic
    /// failures are not errors; the pass skips the optimization instead.
    fn run(&mut self, graph: &mut Graph, config: &OptimizationConfig) -> Result<bool>;
}
