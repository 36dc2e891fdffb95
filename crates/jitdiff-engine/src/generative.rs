//! The generative engine.
//!
//! Builds small fresh programs from templates and keeps the ones the
//! engine executes successfully, seeding the corpus for the two mutation
//! engines.

use crate::corpus::Corpus;
use jitdiff_core::{EngineConfig, JitConfig, Purpose, Result};
use jitdiff_ir::codegen;
use jitdiff_runtime::{lift, Runner};
use rand_chacha::ChaCha8Rng;
use tracing::{instrument, trace};

pub struct GenerativeEngine {
    config: EngineConfig,
    jit: JitConfig,
}

impl GenerativeEngine {
    pub fn new(config: EngineConfig, jit: JitConfig) -> Self {
        Self { config, jit }
    }

    #[instrument(skip(self, corpus, runner, rng), fields(budget = self.config.num_consecutive_generations))]
    pub fn fuzz_one(
        &mut self,
        corpus: &Corpus,
        runner: &mut dyn Runner,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        for _ in 0..self.config.num_consecutive_generations {
            let program = codegen::seed_program(rng, self.jit.small_code_block_size);
            let execution = runner.run(&lift(&program), Purpose::Fuzzing)?;
            if execution.succeeded() {
                corpus.add(program);
            } else {
                trace!(outcome = ?execution.outcome, "discarding generated program");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRunner;
    use rand::SeedableRng;

    #[test]
    fn test_successful_programs_enter_the_corpus() {
        let config = EngineConfig::default();
        let n = config.num_consecutive_generations;
        let mut engine = GenerativeEngine::new(config, JitConfig::default());
        let corpus = Corpus::new();
        let mut runner = MockRunner::constant("Checksum: 11206928\n");
        let mut rng = ChaCha8Rng::seed_from_u64(13);

        engine.fuzz_one(&corpus, &mut runner, &mut rng).unwrap();
        assert_eq!(corpus.len(), n);
        assert_eq!(runner.calls(), n);
    }

    #[test]
    fn test_failing_programs_are_discarded() {
        let mut engine = GenerativeEngine::new(EngineConfig::default(), JitConfig::default());
        let corpus = Corpus::new();
        let mut runner = MockRunner::failing(1);
        let mut rng = ChaCha8Rng::seed_from_u64(13);

        engine.fuzz_one(&corpus, &mut runner, &mut rng).unwrap();
        assert_eq!(corpus.len(), 0);
    }
}
