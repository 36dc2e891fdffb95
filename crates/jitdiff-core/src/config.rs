//! Configuration types for the fuzzer.

use serde::{Deserialize, Serialize};

/// Outer-loop parameters for the fuzzing engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Consecutive mutations derived from one seed per differential round
    pub num_consecutive_mutations: usize,
    /// Fresh programs built per generative round
    pub num_consecutive_generations: usize,
    /// Mutator retries before falling back to a simpler transform
    pub max_mutation_attempts: usize,
    /// Executions required to pass the determinism gate
    pub determinism_runs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_consecutive_mutations: 5,
            num_consecutive_generations: 5,
            max_mutation_attempts: 10,
            determinism_runs: 3,
        }
    }
}

/// Parameters of the JIT-provoking transforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitConfig {
    /// Trip count high enough to trigger on-stack replacement in current engines
    pub max_loop_trip_count: u64,
    /// Instructions per freshly generated neutral code block
    pub small_code_block_size: usize,
    /// Runtime cap on checksum updates attributed to a single subroutine key
    pub max_updates_per_subroutine: u32,
    /// Probability of emitting a checksum update after an instruction
    pub checksum_insertion_prob: f64,
    /// Distinct sites a single mutator application may rewrite
    pub max_simultaneous_mutations: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            max_loop_trip_count: 921,
            small_code_block_size: 10,
            max_updates_per_subroutine: 50,
            checksum_insertion_prob: 0.2,
            max_simultaneous_mutations: 7,
        }
    }
}

/// Relative weights for the hybrid driver's engine choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub weight_mutation: u32,
    pub weight_generation: u32,
    pub weight_differential: u32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            weight_mutation: 6,
            weight_generation: 2,
            weight_differential: 2,
        }
    }
}

/// How to invoke the target engine binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Path to the engine binary (d8, jsc, ...)
    pub engine_path: String,
    /// Arguments passed before the script path
    pub engine_args: Vec<String>,
    /// Wall-clock budget per execution (milliseconds)
    pub timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            engine_path: "d8".to_string(),
            engine_args: Vec::new(),
            timeout_ms: 2000,
        }
    }
}

/// Aggregate configuration for a fuzzing worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Independent fuzzing loops to run in parallel
    pub num_workers: usize,
    /// Base PRNG seed; worker i uses seed + i
    pub seed: u64,
    /// Directory of bincode-serialized seed programs, if any
    pub corpus_dir: Option<String>,
    /// Directory for miscompilation artifacts, if any
    pub output_dir: Option<String>,
    pub engine: EngineConfig,
    pub jit: JitConfig,
    pub hybrid: HybridConfig,
    pub runner: RunnerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            seed: 0,
            corpus_dir: None,
            output_dir: None,
            engine: EngineConfig::default(),
            jit: JitConfig::default(),
            hybrid: HybridConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}
