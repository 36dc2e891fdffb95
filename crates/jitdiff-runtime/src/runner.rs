//! Execution of lifted programs against an external engine binary.

use jitdiff_core::{Error, Execution, Outcome, Purpose, Result, RunnerConfig};
use std::io::Read;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Executes a script and reports the outcome. Implementations must be
/// deterministic for identical input in the absence of engine bugs.
pub trait Runner {
    fn run(&mut self, script: &str, purpose: Purpose) -> Result<Execution>;
}

/// Runs scripts by handing a temp file to an engine subprocess.
pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn wait_with_timeout(&self, child: &mut Child, deadline: Instant) -> Result<Outcome> {
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| Error::Runner(format!("wait failed: {}", e)))?
            {
                return Ok(classify_exit(&status));
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    warn!("failed to kill timed-out engine: {}", e);
                }
                let _ = child.wait();
                return Ok(Outcome::TimedOut);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(unix)]
fn classify_exit(status: &std::process::ExitStatus) -> Outcome {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(0) => Outcome::Succeeded,
        Some(code) => Outcome::Failed(code),
        None => Outcome::Crashed(status.signal().unwrap_or(0)),
    }
}

#[cfg(not(unix))]
fn classify_exit(status: &std::process::ExitStatus) -> Outcome {
    match status.code() {
        Some(0) => Outcome::Succeeded,
        Some(code) => Outcome::Failed(code),
        None => Outcome::Crashed(0),
    }
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

impl Runner for CommandRunner {
    #[instrument(skip(self, script), fields(bytes = script.len()))]
    fn run(&mut self, script: &str, purpose: Purpose) -> Result<Execution> {
        let mut file = tempfile::Builder::new()
            .prefix("jitdiff-")
            .suffix(".js")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        let start = Instant::now();
        let mut child = Command::new(&self.config.engine_path)
            .args(&self.config.engine_args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Runner(format!(
                    "failed to spawn {}: {}",
                    self.config.engine_path, e
                ))
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = start + Duration::from_millis(self.config.timeout_ms);
        let outcome = self.wait_with_timeout(&mut child, deadline)?;
        let exec_time = start.elapsed();

        let stdout = stdout
            .join()
            .map_err(|_| Error::Runner("stdout reader panicked".to_string()))?;
        let stderr = stderr
            .join()
            .map_err(|_| Error::Runner("stderr reader panicked".to_string()))?;

        debug!(?outcome, ?exec_time, "execution finished");
        Ok(Execution {
            outcome,
            stdout,
            stderr,
            exec_time,
        })
    }
}
