//! Test doubles shared by the engine tests.

use crate::events::{EventSink, Miscompilation};
use jitdiff_core::{Execution, Outcome, Purpose, Result};
use jitdiff_ir::Program;
use jitdiff_runtime::Runner;
use parking_lot::Mutex;
use std::time::Duration;

/// A runner that replays canned executions; the last one repeats once the
/// script is exhausted.
pub(crate) struct MockRunner {
    responses: Vec<Execution>,
    calls: usize,
}

fn execution(outcome: Outcome, stdout: &str) -> Execution {
    Execution {
        outcome,
        stdout: stdout.to_string(),
        stderr: String::new(),
        exec_time: Duration::from_millis(3),
    }
}

impl MockRunner {
    pub fn succeeding(stdouts: Vec<String>) -> Self {
        Self {
            responses: stdouts
                .iter()
                .map(|s| execution(Outcome::Succeeded, s))
                .collect(),
            calls: 0,
        }
    }

    pub fn constant(stdout: &str) -> Self {
        Self::succeeding(vec![stdout.to_string()])
    }

    pub fn failing(code: i32) -> Self {
        Self {
            responses: vec![execution(Outcome::Failed(code), "")],
            calls: 0,
        }
    }

    pub fn timing_out() -> Self {
        Self {
            responses: vec![execution(Outcome::TimedOut, "")],
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Runner for MockRunner {
    fn run(&mut self, _script: &str, _purpose: Purpose) -> Result<Execution> {
        let index = self.calls.min(self.responses.len() - 1);
        self.calls += 1;
        Ok(self.responses[index].clone())
    }
}

/// Collects reported events.
#[derive(Default)]
pub(crate) struct CollectingSink {
    miscompilations: Mutex<Vec<String>>,
    crashes: Mutex<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn miscompilations(&self) -> usize {
        self.miscompilations.lock().len()
    }

    #[allow(dead_code)]
    pub fn crashes(&self) -> usize {
        *self.crashes.lock()
    }
}

impl EventSink for CollectingSink {
    fn miscompilation(&self, report: &Miscompilation) {
        self.miscompilations.lock().push(report.mutant_stdout.clone());
    }

    fn crash(&self, _program: &Program, _execution: &Execution) {
        *self.crashes.lock() += 1;
    }
}
