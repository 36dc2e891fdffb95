//! Core type definitions shared across the fuzzer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a program instance.
///
/// Every construction of a program allocates a fresh id, so two programs
/// with identical instructions are still distinct objects. The execution
/// cache and the mutant-is-distinct invariant both key on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramId(pub Uuid);

impl ProgramId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProgramId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a program execution terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Exit status 0.
    Succeeded,
    /// Non-zero exit status (uncaught exception, engine-level error).
    Failed(i32),
    /// Terminated by a signal.
    Crashed(i32),
    /// Killed after exceeding the wall-clock budget.
    TimedOut,
}

impl Outcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    pub fn is_crashed(&self) -> bool {
        matches!(self, Outcome::Crashed(_))
    }
}

/// The record of one execution against the engine runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub outcome: Outcome,
    pub stdout: String,
    pub stderr: String,
    pub exec_time: Duration,
}

impl Execution {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_succeeded()
    }
}

/// Opaque tag describing why a program is being executed. Runners may use
/// it to adjust evaluation behavior; the subprocess runner only logs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    Fuzzing,
    DeterminismCheck,
    Diagnostic,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Fuzzing => write!(f, "fuzzing"),
            Purpose::DeterminismCheck => write!(f, "determinism-check"),
            Purpose::Diagnostic => write!(f, "diagnostic"),
        }
    }
}
