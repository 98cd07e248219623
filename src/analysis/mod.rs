//! Analyses over the MIR graph.
//!
//! # Architecture
//!
//! - [`dominators`] - dominator tree construction and dominance queries
//! - [`ranges`] - range analysis and the optimizations driven by it
//!
//! The dominator tree is a prerequisite of range analysis: beta nodes are only placed
//! where a branch dominates its uses, and loop analysis walks the immediate dominator
//! chain of each loop header.
//!
//! # Usage
//!
//! ```rust
//! use jitmir::{
//!     analysis::{build_dominator_tree, RangeAnalysis},
//!     Graph, MirType, OptimizationConfig,
//! };
//!
//! let mut graph = Graph::new();
//! let entry = graph.new_entry_block(0)?;
//! let one = graph.constant_i32(entry, 1)?;
//! let two = graph.constant_i32(entry, 2)?;
//! let sum = graph.binary(entry, jitmir::mir::MirOp::Add, one, two, MirType::Int32)?;
//! graph.ret(entry, sum)?;
//!
//! build_dominator_tree(&mut graph)?;
//! RangeAnalysis::new(&mut graph, OptimizationConfig::default()).run()?;
//! assert_eq!(graph.def(sum).range().and_then(|r| r.constant_value()), Some(3));
//! # Ok::<(), jitmir::Error>(())
//! ```

pub mod dominators;
pub mod ranges;

pub use dominators::{build_dominator_tree, clear_dominator_tree};
pub use ranges::{
    BoundValidity, LinearSum, LinearTerm, LoopIterationBound, Range, RangeAnalysis,
    RangeAnalysisStats, SymbolicBound, SymbolicBounds, TruncateKind,
};
