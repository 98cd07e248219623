//! Passes over the MIR graph and the pipeline that runs them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Pipeline                    Fixed pass order, one function      │
//! │    ├─ DominatorTreePass       (idoms, pre-order indices)         │
//! │    ├─ UnreachableCode…        (constant branches, dead blocks)   │
//! │    ├─ RangeAnalysisPass       (ranges, hoisting, truncation)     │
//! │    └─ UnreachableCode…        (only if a test was folded)        │
//! │    Cancellation flag checked before every pass                   │
//! │                                                                  │
//! │  MirPass trait               Interface for all passes            │
//! │    ├─ name() / description()                                     │
//! │    └─ run(graph, config) -> changed                              │
//! │                                                                  │
//! │  External collaborators      Called by UCE after removal         │
//! │    ├─ PhiEliminator           (built-in: RedundantPhiElimination)│
//! │    └─ ValueNumberer           (optional)                         │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod pass;
mod passes;
mod phis;
mod pipeline;

pub use pass::MirPass;
pub use passes::{DominatorTreePass, RangeAnalysisPass, UceStats, UnreachableCodeElimination};
pub use phis::{Observability, PhiEliminator, RedundantPhiElimination, ValueNumberer};
pub use pipeline::{Pipeline, PipelineReport};
