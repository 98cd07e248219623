//! Built-in passes.

mod dominators;
mod ranges;
mod uce;

pub use dominators::DominatorTreePass;
pub use ranges::RangeAnalysisPass;
pub use uce::{UceStats, UnreachableCodeElimination};
