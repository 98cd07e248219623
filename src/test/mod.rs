//! Shared fixtures for the unit tests: a deterministic random source, graph factories and a
//! reference interpreter used to check that optimizations preserve behaviour.

pub(crate) mod interp;

pub use graphs::*;
pub use rng::XorShift64;
