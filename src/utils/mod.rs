//! Shared data structures and graph algorithms.

mod bitset;
pub mod traversal;

pub use bitset::BitSet;
