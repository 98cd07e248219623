use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, covering every failure the optimization pipeline can report.
///
/// Only two kinds of failure ever reach the orchestrator from a correct pipeline run:
/// arena exhaustion ([`Error::OutOfMemory`]) and cooperative cancellation
/// ([`Error::Cancelled`]). Both mean the function should be executed by a
/// non-optimizing tier instead.
///
/// Heuristic steps (loop bound inference, bounds check hoisting, beta insertion,
/// truncation eligibility) never fail: when their pattern does not match they skip the
/// optimization. Contract violations by callers (discarding a definition that still has
/// uses, closing a block twice) are programming errors and are caught by assertions.
///
/// # Examples
///
/// ```rust
/// use jitmir::{Error, Graph, OptimizationConfig, Pipeline};
///
/// let mut graph = Graph::new();
/// let entry = graph.new_entry_block(0)?;
/// let value = graph.constant_i32(entry, 1)?;
/// graph.ret(entry, value)?;
///
/// match Pipeline::new(OptimizationConfig::default()).run(&mut graph) {
///     Ok(report) => println!("removed {} blocks", report.blocks_removed()),
///     Err(Error::Cancelled) => println!("compilation abandoned"),
///     Err(e) => eprintln!("falling back to baseline: {e}"),
/// }
/// # Ok::<(), jitmir::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An arena could not grow.
    ///
    /// Raised when reserving space for a new block, definition or resume point fails.
    /// The whole pipeline for this function is aborted.
    #[error("Out of memory while growing the MIR arena")]
    OutOfMemory,

    /// The orchestrator requested cancellation.
    ///
    /// The flag is only observed between passes, so the graph is in the consistent state
    /// left by the last completed pass.
    #[error("Compilation was cancelled")]
    Cancelled,

    /// The graph violates one of its structural invariants.
    ///
    /// Only produced by [`crate::mir::verify_graph`], which callers run as a self-check.
    /// The error includes the source location where the violation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the broken invariant
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}
