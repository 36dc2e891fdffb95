//! Intermediate language for the differential fuzzer.
//!
//! Programs are flat instruction sequences with strictly nested blocks.
//! The IL is designed to be:
//! - Mutation-friendly: rewrites splice instruction ranges, never edit in place
//! - Liftable: deterministic translation to JavaScript source
//! - Analyzable: context, dead-code and def-use sweeps are single passes

pub mod analysis;
pub mod builder;
pub mod codegen;
pub mod instruction;
pub mod program;
pub mod validation;

pub use analysis::{may_recurse, Context, ContextAnalyzer, DeadCodeAnalyzer, DefUseAnalyzer};
pub use builder::ProgramBuilder;
pub use instruction::{
    BinaryOperator, Comparator, Instruction, Opcode, UnaryOperator, Variable,
};
pub use program::{BlockGroup, Contributors, Program};
pub use validation::validate_program;
