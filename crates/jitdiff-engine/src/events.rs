//! Event reporting for miscompilations and crashes.

use jitdiff_core::Execution;
use jitdiff_ir::Program;
use jitdiff_runtime::lift;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Where a finding originated. Reserved for future corpus exchange; all
/// locally found miscompilations carry `Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    Local,
}

/// A succeeded mutant whose stdout diverged from the referee.
pub struct Miscompilation {
    pub mutant: Program,
    pub mutant_stdout: String,
    pub seed: Program,
    pub seed_stdout: String,
    pub origin: Origin,
    pub exec_time: Duration,
}

pub trait EventSink: Send + Sync {
    fn miscompilation(&self, report: &Miscompilation);

    fn crash(&self, program: &Program, execution: &Execution);
}

/// Logs findings and optionally persists them as script + metadata pairs.
pub struct LogSink {
    output_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct MiscompilationMetadata<'a> {
    mutant_stdout: &'a str,
    seed_stdout: &'a str,
    origin: Origin,
    exec_time_ms: u128,
    contributors: Vec<&'a str>,
}

impl LogSink {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }

    fn persist(&self, report: &Miscompilation) -> std::io::Result<()> {
        let Some(base) = &self.output_dir else {
            return Ok(());
        };
        let dir = base.join(format!("miscompilation-{}", report.mutant.id()));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("mutant.js"), lift(&report.mutant))?;
        std::fs::write(dir.join("seed.js"), lift(&report.seed))?;
        let metadata = MiscompilationMetadata {
            mutant_stdout: &report.mutant_stdout,
            seed_stdout: &report.seed_stdout,
            origin: report.origin,
            exec_time_ms: report.exec_time.as_millis(),
            contributors: report.mutant.contributors().names().collect(),
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(dir.join("report.json"), json)?;
        Ok(())
    }
}

impl EventSink for LogSink {
    fn miscompilation(&self, report: &Miscompilation) {
        error!(
            event = "miscompilation",
            mutant = %report.mutant.id(),
            seed = %report.seed.id(),
            contributors = ?report.mutant.contributors().names().collect::<Vec<_>>(),
            "mutant stdout diverged from referee"
        );
        if let Err(e) = self.persist(report) {
            warn!("failed to persist miscompilation artifacts: {}", e);
        }
    }

    fn crash(&self, program: &Program, execution: &Execution) {
        info!(
            event = "crash",
            program = %program.id(),
            outcome = ?execution.outcome,
            "engine crashed on mutant"
        );
    }
}
