//! Fuzzing worker: N independent hybrid loops against one engine binary.

mod telemetry;

use anyhow::{Context, Result};
use jitdiff_core::WorkerConfig;
use jitdiff_engine::{Corpus, HybridDriver, LogSink};
use jitdiff_runtime::CommandRunner;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    telemetry::init_telemetry()?;

    info!("Starting jitdiff worker");
    info!("Engine: {}", config.runner.engine_path);

    let corpus = Arc::new(Corpus::new());
    if let Some(dir) = &config.corpus_dir {
        let loaded = corpus
            .load_dir(std::path::Path::new(dir))
            .with_context(|| format!("loading corpus from {}", dir))?;
        info!("Loaded {} corpus programs", loaded);
    }

    let events = Arc::new(LogSink::new(config.output_dir.clone().map(PathBuf::from)));
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for i in 0..config.num_workers.max(1) {
        let config = config.clone();
        let corpus = corpus.clone();
        let events = events.clone();
        let shutdown = shutdown.clone();
        let handle = tokio::task::spawn_blocking(move || {
            info!("Worker {} started", i);
            if let Err(e) = run_worker_loop(i, config, corpus, events, shutdown) {
                error!("Worker {} failed: {}", i, e);
            }
        });
        handles.push(handle);
    }

    shutdown_signal().await;
    info!("Shutting down worker");
    shutdown.store(true, Ordering::SeqCst);

    // Wait for loops to finish their current round (with timeout).
    let join_all = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    tokio::select! {
        _ = join_all => {
            info!("All fuzzing loops stopped");
        }
        _ = tokio::time::sleep(Duration::from_secs(30)) => {
            warn!("Shutdown timeout reached");
        }
    }

    if let Some(dir) = &config.corpus_dir {
        match corpus.save_dir(std::path::Path::new(dir)) {
            Ok(saved) => info!("Saved {} corpus programs", saved),
            Err(e) => warn!("Failed to save corpus: {}", e),
        }
    }

    Ok(())
}

fn load_config() -> Result<WorkerConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path))?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(WorkerConfig::default()),
    }
}

fn run_worker_loop(
    worker_id: usize,
    config: WorkerConfig,
    corpus: Arc<Corpus>,
    events: Arc<LogSink>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(worker_id as u64));
    let mut runner = CommandRunner::new(config.runner.clone());
    let mut driver = HybridDriver::new(&config);

    let mut rounds: u64 = 0;
    // The loop is not cancellable mid-round; the flag is honored between
    // rounds.
    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = driver.fuzz_one(&corpus, &mut runner, &mut rng, events.as_ref()) {
            error!("Worker {} round failed: {}", worker_id, e);
            return Err(e.into());
        }
        rounds += 1;
        if rounds % 100 == 0 {
            info!(
                worker_id,
                rounds,
                corpus_size = corpus.len(),
                "fuzzing progress"
            );
        }
    }
    info!("Worker {} stopped after {} rounds", worker_id, rounds);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
