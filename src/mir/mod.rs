//! Mid-level IR: the graph store and its construction API.
//!
//! A function body is a [`Graph`] of [`BasicBlock`]s in SSA form. Every value is a
//! [`Definition`] performing one [`MirOp`]; phis merge values at control-flow joins, one
//! operand per predecessor. The graph owns all nodes in arenas and hands out
//! [`BlockId`]/[`DefId`] handles.
//!
//! # Key Components
//!
//! - [`Graph`] - arenas, roots and block orders
//! - [`BasicBlock`] - phis, instructions, predecessors and dominator tree fields
//! - [`Definition`] - operation, type, operands, use list and inferred [`Range`](crate::Range)
//! - [`MirOp`] - the closed set of operations
//! - [`verify_graph`] - structural self-check

mod block;
mod builder;
mod definition;
mod graph;
mod ids;
mod ops;
mod types;
mod verify;

pub use block::{BasicBlock, BlockKind};
pub use builder::BackedgeStatus;
pub use definition::{Consumer, DefFlags, Definition, ResumePoint, Use};
pub use graph::Graph;
pub use ids::{BlockId, DefId, ResumePointId};
pub use ops::{CompareOp, Constant, MirOp};
pub use types::MirType;
pub use verify::verify_graph;
