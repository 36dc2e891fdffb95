//! Mutation framework and mutators for the differential fuzzer.
//!
//! Two sampling shapes (per-instruction, per-outmost-subroutine) underpin
//! a family of JIT-provoking transforms, plus the checksum instrumentation
//! that gives every program a stable observable output.

pub mod checksum;
pub mod framework;
pub mod mutator;
pub mod preserving;
pub mod warmup;

pub use checksum::{ChecksumInstrumentor, Policy, CHECKSUM_SEED};
pub use mutator::{Mutator, MutatorStats};
pub use preserving::{
    DeoptCallMutator, NeutralLoopMutator, SingleRunWrapMutator, WarmupCallMutator,
};
pub use warmup::{
    FunctionWrapMutator, LoopedCallDeoptMutator, LoopedCallMutator,
    LoopedCallRecompileMutator, SubroutineWarmupMutator,
};
