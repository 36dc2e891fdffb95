//! Execution runtime for the differential fuzzer.
//!
//! This crate owns everything between an IL program and an `Execution`
//! record: lifting to JavaScript inside the fixed wire preamble, handing
//! the script to an external engine binary, and caching results per
//! program identity.

pub mod cache;
pub mod lifter;
pub mod runner;

pub use cache::ExecutionCache;
pub use lifter::{lift, lift_body, PREAMBLE_FOOTER, PREAMBLE_HEADER};
pub use runner::{CommandRunner, Runner};
