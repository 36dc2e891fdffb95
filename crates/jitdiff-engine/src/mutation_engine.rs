//! The warmup mutation engine.
//!
//! Sister of the differential engine: it drives the non-preserving warmup
//! mutators and hunts for crashes rather than output divergence. Unlike
//! the differential engine it walks the seed forward whenever a mutant
//! executes successfully.

use crate::corpus::Corpus;
use crate::events::EventSink;
use jitdiff_core::{EngineConfig, JitConfig, Purpose, Result};
use jitdiff_ir::Program;
use jitdiff_mutation::{
    LoopedCallDeoptMutator, LoopedCallMutator, LoopedCallRecompileMutator, Mutator,
    SubroutineWarmupMutator,
};
use jitdiff_runtime::{lift, Runner};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{instrument, trace};

pub struct MutationEngine {
    mutators: Vec<Arc<dyn Mutator>>,
    config: EngineConfig,
}

impl MutationEngine {
    pub fn new(config: EngineConfig, jit: JitConfig) -> Self {
        let mutators: Vec<Arc<dyn Mutator>> = vec![
            Arc::new(SubroutineWarmupMutator::new(jit.clone())),
            Arc::new(LoopedCallMutator::new(jit.clone())),
            Arc::new(LoopedCallDeoptMutator::new(jit.clone())),
            Arc::new(LoopedCallRecompileMutator::new(jit)),
        ];
        Self { mutators, config }
    }

    #[instrument(skip(self, corpus, runner, rng, events), fields(corpus_size = corpus.len()))]
    pub fn fuzz_one(
        &mut self,
        corpus: &Corpus,
        runner: &mut dyn Runner,
        rng: &mut ChaCha8Rng,
        events: &dyn EventSink,
    ) -> Result<()> {
        let Some(seed) = corpus.sample(rng) else {
            trace!("corpus is empty");
            return Ok(());
        };
        let mut current: Program = seed.as_ref().clone();

        for _ in 0..self.config.num_consecutive_mutations {
            let Some((mutant, _)) = self.generate_mutant(&current, rng) else {
                continue;
            };
            let execution = runner.run(&lift(&mutant), Purpose::Fuzzing)?;
            if execution.outcome.is_crashed() {
                events.crash(&mutant, &execution);
            } else if execution.succeeded() {
                // Walk forward: the next iteration mutates the mutant.
                current = mutant;
            }
        }
        Ok(())
    }

    fn generate_mutant(
        &self,
        seed: &Program,
        rng: &mut ChaCha8Rng,
    ) -> Option<(Program, Arc<dyn Mutator>)> {
        let attempts = self.config.max_mutation_attempts.max(1);
        for _ in 0..attempts {
            let mutator = &self.mutators[rng.gen_range(0..self.mutators.len())];
            match mutator.mutate(seed, rng) {
                Some(mutant) => {
                    mutator
                        .stats()
                        .record_success(mutant.len() as i64 - seed.len() as i64);
                    return Some((mutant, mutator.clone()));
                }
                None => mutator.failed_to_generate(),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CollectingSink, MockRunner};
    use jitdiff_ir::{BinaryOperator, ProgramBuilder};
    use rand::SeedableRng;

    fn corpus_with_call_seed() -> Corpus {
        let mut b = ProgramBuilder::new();
        let f = b.build_plain_function(1, |b, params| {
            let one = b.load_int(1);
            let sum = b.binary(params[0], BinaryOperator::Add, one);
            b.do_return(Some(sum));
        });
        let arg = b.load_int(5);
        b.call_function(f, &[arg]);
        let corpus = Corpus::new();
        corpus.add(b.finalize());
        corpus
    }

    #[test]
    fn test_round_executes_consecutive_mutants() {
        let config = EngineConfig::default();
        let n = config.num_consecutive_mutations;
        let mut engine = MutationEngine::new(config, JitConfig::default());
        let corpus = corpus_with_call_seed();
        let sink = CollectingSink::new();
        let mut runner = MockRunner::constant("Checksum: 11206928\n");
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        engine
            .fuzz_one(&corpus, &mut runner, &mut rng, &sink)
            .unwrap();
        assert!(runner.calls() > 0);
        assert!(runner.calls() <= n);
        assert_eq!(sink.miscompilations(), 0);
    }

    #[test]
    fn test_empty_corpus_is_a_noop() {
        let mut engine = MutationEngine::new(EngineConfig::default(), JitConfig::default());
        let corpus = Corpus::new();
        let sink = CollectingSink::new();
        let mut runner = MockRunner::constant("");
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        engine
            .fuzz_one(&corpus, &mut runner, &mut rng, &sink)
            .unwrap();
        assert_eq!(runner.calls(), 0);
    }
}
