// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # jitmir
//!
//! The optimizing middle-end of a method JIT. A front-end lowers one function into a
//! [`Graph`]: basic blocks of SSA definitions, phis at block entries, and resume points
//! recording the interpreter state needed to bail out of optimized code. The middle-end
//! then improves that graph before it is handed to code generation.
//!
//! ## Features
//!
//! - **SSA graph store** - arena-backed blocks, definitions and resume points with use lists
//!   kept in sync by every mutation
//! - **Dominator tree** - iterative construction with preorder numbering for constant time
//!   dominance queries
//! - **Range analysis** - integer bounds, a fractional part flag, float
//!   exponents, beta nodes below branches, symbolic loop iteration bounds
//! - **Bounds check hoisting** - loop-invariant checks covering every iteration are moved
//!   into the loop preheader
//! - **Truncation** - double arithmetic only observed as int32 is rewritten to int32
//!   arithmetic
//! - **Unreachable code elimination** - blocks behind constant tests are removed and phis
//!   repaired
//!
//! ## Architecture
//!
//! - [`mir`] - the graph, its builder API and a structural verifier
//! - [`analysis`] - dominator tree and range analysis
//! - [`compiler`] - passes and the [`Pipeline`] that sequences them
//! - [`config`] - the immutable [`OptimizationConfig`]
//! - [`utils`] - bit sets and graph traversal helpers
//!
//! ## Quick Start
//!
//! ```rust
//! use jitmir::prelude::*;
//!
//! // for (i = 0; i < n; i++) sum += a[i];
//! let mut graph = Graph::new();
//! let entry = graph.new_entry_block(2)?;
//! let array = graph.parameter(entry, 0, MirType::Object)?;
//! let n = graph.array_length(entry, array)?;
//! let zero = graph.constant_i32(entry, 0)?;
//! graph.set_slot(entry, 0, zero);
//! graph.set_slot(entry, 1, zero);
//!
//! let header = graph.new_pending_loop_header(entry)?;
//! graph.goto(entry, header)?;
//! let i = graph.slot(header, 0);
//! let sum = graph.slot(header, 1);
//! let cond = graph.compare(header, CompareOp::Lt, i, n)?;
//! let body = graph.new_block(Some(header))?;
//! let exit = graph.new_block(Some(header))?;
//! graph.test(header, cond, body, exit)?;
//!
//! let checked = graph.bounds_check(body, i, n)?;
//! let element = graph.load_element(body, array, checked, MirType::Int32)?;
//! let next_sum = graph.binary(body, MirOp::Add, sum, element, MirType::Int32)?;
//! let one = graph.constant_i32(body, 1)?;
//! let next_i = graph.binary(body, MirOp::Add, i, one, MirType::Int32)?;
//! graph.set_slot(body, 0, next_i);
//! graph.set_slot(body, 1, next_sum);
//! graph.goto(body, header)?;
//! graph.set_backedge(header, body)?;
//! graph.ret(exit, sum)?;
//!
//! let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
//! assert_eq!(report.range_analysis.bounds_checks_hoisted, 1);
//! verify_graph(&graph)?;
//! # Ok::<(), jitmir::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result`]. Only arena exhaustion and cancellation are
//! reported by a pipeline run; optimizations whose preconditions do not hold are skipped
//! rather than failed. See [`Error`] for details.
//!
//! ## Logging
//!
//! Passes report what they do through the [`log`](https://docs.rs/log) facade: one `debug`
//! line per pass and `trace` lines per rewrite. Install any logger, such as `env_logger`,
//! to see them.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use jitmir::prelude::*;
///
/// let mut graph = Graph::new();
/// let entry = graph.new_entry_block(0)?;
/// let value = graph.constant_i32(entry, 5)?;
/// graph.ret(entry, value)?;
/// let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
/// assert!(!report.changed);
/// # Ok::<(), jitmir::Error>(())
/// ```
pub mod prelude;

/// The MIR graph: blocks, definitions, resume points and the builder API.
///
/// Blocks and definitions live in arenas owned by [`Graph`] and are referred to by the
/// copyable ids [`mir::BlockId`] and [`mir::DefId`]. Every mutation keeps operand lists,
/// use lists, predecessor lists and phi operand order consistent;
/// [`mir::verify_graph`] checks that this holds.
///
/// # Examples
///
/// ```rust
/// use jitmir::{mir::MirOp, Graph, MirType};
///
/// let mut graph = Graph::new();
/// let entry = graph.new_entry_block(0)?;
/// let x = graph.parameter(entry, 0, MirType::Int32)?;
/// let doubled = graph.binary(entry, MirOp::Add, x, x, MirType::Int32)?;
/// graph.ret(entry, doubled)?;
///
/// assert_eq!(graph.def(x).uses().len(), 2);
/// jitmir::mir::verify_graph(&graph)?;
/// # Ok::<(), jitmir::Error>(())
/// ```
pub mod mir;

/// Analyses over the MIR graph: dominators and range analysis.
pub mod analysis;

/// Passes and the pipeline that runs them.
pub mod compiler;

/// Pipeline configuration.
pub mod config;

/// Bit sets and traversal helpers shared by the analyses.
pub mod utils;

/// `jitmir` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust
/// use jitmir::{Graph, Result};
///
/// fn single_block() -> Result<Graph> {
///     let mut graph = Graph::new();
///     let entry = graph.new_entry_block(0)?;
///     let value = graph.constant_i32(entry, 0)?;
///     graph.ret(entry, value)?;
///     Ok(graph)
/// }
/// # single_block().unwrap();
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `jitmir` Error type
///
/// Covers arena exhaustion, cancellation and structural verification failures.
pub use error::Error;

/// The graph of one function.
pub use mir::Graph;

/// Value types, comparison operators and instruction kinds.
pub use mir::{CompareOp, MirType};

/// Immutable pipeline configuration.
pub use config::OptimizationConfig;

/// The optimization pipeline and its report.
pub use compiler::{Pipeline, PipelineReport};

/// Range analysis and the ranges it infers.
pub use analysis::{Range, RangeAnalysis, RangeAnalysisStats};
