//! # jitmir Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the middle-end. Import it to build a graph and run the pipeline over it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all jitmir operations
pub use crate::Error;

/// The result type used throughout jitmir
pub use crate::Result;

/// Configuration consumed at pipeline entry
pub use crate::OptimizationConfig;

// ================================================================================================
// Graph
// ================================================================================================

/// The graph of one function and its identifiers
pub use crate::mir::{BlockId, DefId, Graph, ResumePointId};

/// Blocks, definitions and their uses
pub use crate::mir::{BasicBlock, BlockKind, Consumer, Definition, Use};

/// Instruction kinds, constants and value types
pub use crate::mir::{CompareOp, Constant, MirOp, MirType};

/// Structural self-check of a graph
pub use crate::mir::verify_graph;

// ================================================================================================
// Analyses
// ================================================================================================

/// Dominator tree construction
pub use crate::analysis::{build_dominator_tree, clear_dominator_tree};

/// Range analysis and its results
pub use crate::analysis::{Range, RangeAnalysis, RangeAnalysisStats};

// ================================================================================================
// Passes and Pipeline
// ================================================================================================

/// The pass trait and the built-in passes
pub use crate::compiler::{
    DominatorTreePass, MirPass, RangeAnalysisPass, UnreachableCodeElimination,
};

/// Collaborators of unreachable code elimination
pub use crate::compiler::{Observability, PhiEliminator, RedundantPhiElimination, ValueNumberer};

/// The pipeline and its report
pub use crate::compiler::{Pipeline, PipelineReport};
