//! Fuzzing engines for jitdiff.
//!
//! The differential engine mutates seeds with semantics-preserving
//! JIT-provoking transforms and flags stdout divergence; its two sisters
//! (warmup mutation and generation) keep the corpus alive and hunt for
//! crashes. The hybrid driver interleaves all three by weight.

pub mod corpus;
pub mod differential;
pub mod events;
pub mod generative;
pub mod hybrid;
pub mod mutation_engine;
#[cfg(test)]
pub(crate) mod testing;

pub use corpus::Corpus;
pub use differential::{DifferentialEngine, DIFFERENTIAL_TAINT};
pub use events::{EventSink, LogSink, Miscompilation, Origin};
pub use generative::GenerativeEngine;
pub use hybrid::HybridDriver;
pub use mutation_engine::MutationEngine;
