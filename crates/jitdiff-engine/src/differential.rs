//! The differential fuzzing engine.
//!
//! One round: pick a seed free of this engine's own taint, instrument it
//! with the checksum pass, gate on determinism, record the seed's stdout
//! as referee, then derive a fixed number of consecutive mutants from the
//! same instrumented seed and compare each mutant's stdout against the
//! referee. Divergence on a succeeded mutant is a candidate
//! miscompilation; failures and timeouts are ignored by the oracle.

use crate::corpus::Corpus;
use crate::events::{EventSink, Miscompilation, Origin};
use jitdiff_core::{EngineConfig, Error, Execution, JitConfig, Purpose, Result};
use jitdiff_ir::{may_recurse, Program};
use jitdiff_mutation::{
    ChecksumInstrumentor, DeoptCallMutator, FunctionWrapMutator, Mutator, NeutralLoopMutator,
    Policy, SingleRunWrapMutator, WarmupCallMutator,
};
use jitdiff_runtime::{lift, ExecutionCache, Runner};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Contributor names whose presence in a seed excludes it from another
/// differential round, preventing recursive amplification.
pub const DIFFERENTIAL_TAINT: [&str; 5] = [
    NeutralLoopMutator::NAME,
    SingleRunWrapMutator::NAME,
    WarmupCallMutator::NAME,
    DeoptCallMutator::NAME,
    FunctionWrapMutator::NAME,
];

const SEED_SAMPLE_ATTEMPTS: usize = 16;

pub struct DifferentialEngine {
    mutators: Vec<Arc<dyn Mutator>>,
    fallback: Arc<dyn Mutator>,
    checksum: ChecksumInstrumentor,
    config: EngineConfig,
    cache: ExecutionCache,
}

impl DifferentialEngine {
    pub fn new(config: EngineConfig, jit: JitConfig) -> Self {
        let mutators: Vec<Arc<dyn Mutator>> = vec![
            Arc::new(NeutralLoopMutator::new(jit.clone())),
            Arc::new(SingleRunWrapMutator::new(jit.clone())),
            Arc::new(WarmupCallMutator::new(jit.clone())),
            Arc::new(DeoptCallMutator::new(jit.clone())),
        ];
        Self {
            mutators,
            fallback: Arc::new(FunctionWrapMutator::new(jit.clone())),
            checksum: ChecksumInstrumentor::new(Policy::Modest, jit),
            config,
            cache: ExecutionCache::new(),
        }
    }

    pub fn mutators(&self) -> &[Arc<dyn Mutator>] {
        &self.mutators
    }

    /// Runs one fuzzing round. Recoverable conditions (no clean seed, a
    /// non-deterministic or diverging seed) end the round early; errors
    /// indicate runner trouble or broken engine invariants.
    #[instrument(skip(self, corpus, runner, rng, events), fields(corpus_size = corpus.len()))]
    pub fn fuzz_one(
        &mut self,
        corpus: &Corpus,
        runner: &mut dyn Runner,
        rng: &mut ChaCha8Rng,
        events: &dyn EventSink,
    ) -> Result<()> {
        let Some(seed) =
            corpus.sample_excluding(rng, &DIFFERENTIAL_TAINT, SEED_SAMPLE_ATTEMPTS)
        else {
            trace!("no taint-free seed available");
            return Ok(());
        };

        // Failure to instrument is a bug in this fuzzer, not the target.
        let prepared = self.checksum.preprocess(&seed, rng)?;

        if may_recurse(&prepared) {
            debug!(seed = %seed.id(), "seed may recurse unboundedly, skipping");
            return Ok(());
        }

        let Some(referee) = self.determinism_gate(&prepared, runner)? else {
            return Ok(());
        };
        self.cache.insert(prepared.id(), referee.clone());

        for iteration in 0..self.config.num_consecutive_mutations {
            let Some((mutant, mutator)) = self.generate_mutant(&prepared, rng) else {
                continue;
            };
            let mutant = self.checksum.postprocess(mutant);
            if mutant.id() == prepared.id() {
                return Err(Error::Invariant(
                    "mutant is the same object as its seed".to_string(),
                ));
            }
            debug_assert!(mutant.contributors().is_superset_of(prepared.contributors()));
            mutator
                .stats()
                .record_success(mutant.len() as i64 - prepared.len() as i64);

            let execution = runner.run(&lift(&mutant), Purpose::Fuzzing)?;
            if execution.succeeded() {
                if execution.stdout != referee.stdout {
                    info!(
                        iteration,
                        mutator = mutator.name(),
                        "stdout divergence, reporting miscompilation"
                    );
                    events.miscompilation(&Miscompilation {
                        mutant,
                        mutant_stdout: execution.stdout,
                        seed: prepared.clone(),
                        seed_stdout: referee.stdout.clone(),
                        origin: Origin::Local,
                        exec_time: execution.exec_time,
                    });
                }
            } else if execution.outcome.is_crashed() {
                events.crash(&mutant, &execution);
            } else {
                // Runtime failures and timeouts are not miscompilations
                // under this oracle.
                trace!(outcome = ?execution.outcome, "ignoring failed mutant");
            }
        }

        self.cache.remove(prepared.id());
        Ok(())
    }

    /// Executes the instrumented seed repeatedly; all runs must succeed
    /// with byte-identical stdout. Returns the referee execution.
    #[instrument(skip(self, prepared, runner), fields(program = %prepared.id()))]
    fn determinism_gate(
        &mut self,
        prepared: &Program,
        runner: &mut dyn Runner,
    ) -> Result<Option<Execution>> {
        let script = lift(prepared);
        let runs = self.config.determinism_runs.max(1);
        let mut referee: Option<Execution> = None;
        for _ in 0..runs {
            let execution = runner.run(&script, Purpose::DeterminismCheck)?;
            if !execution.succeeded() {
                debug!(outcome = ?execution.outcome, "seed rejected by determinism gate");
                return Ok(None);
            }
            if let Some(previous) = &referee {
                if previous.stdout != execution.stdout {
                    warn!(
                        first = %previous.stdout.escape_debug(),
                        second = %execution.stdout.escape_debug(),
                        first_stderr = %previous.stderr.escape_debug(),
                        second_stderr = %execution.stderr.escape_debug(),
                        "non-deterministic seed"
                    );
                    return Ok(None);
                }
            }
            referee = Some(execution);
        }
        Ok(referee)
    }

    /// Samples mutators with retries; the final attempt falls back to the
    /// function-wrap transform.
    fn generate_mutant(
        &self,
        prepared: &Program,
        rng: &mut ChaCha8Rng,
    ) -> Option<(Program, Arc<dyn Mutator>)> {
        let attempts = self.config.max_mutation_attempts.max(1);
        for attempt in 0..attempts {
            let mutator = if attempt + 1 == attempts {
                &self.fallback
            } else {
                &self.mutators[rng.gen_range(0..self.mutators.len())]
            };
            match mutator.mutate(prepared, rng) {
                Some(mutant) => return Some((mutant, mutator.clone())),
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
    use jitdiff_ir::{BinaryOperator, Instruction, Opcode, ProgramBuilder, Variable};
    use rand::SeedableRng;

    fn configs() -> (EngineConfig, JitConfig) {
        (EngineConfig::default(), JitConfig::default())
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    /// function f(x) { return x + 1 }  f(1)  -- plenty of mutation sites.
    fn corpus_with_seed() -> Corpus {
        let mut b = ProgramBuilder::new();
        let f = b.build_plain_function(1, |b, params| {
            let one = b.load_int(1);
            let sum = b.binary(params[0], BinaryOperator::Add, one);
            b.do_return(Some(sum));
        });
        let arg = b.load_int(1);
        let result = b.call_function(f, &[arg]);
        let print = b.load_builtin("print");
        b.call_function(print, &[result]);

        let corpus = Corpus::new();
        corpus.add(b.finalize());
        corpus
    }

    #[test]
    fn test_round_reports_divergent_mutants() {
        let (engine_config, jit) = configs();
        let n = engine_config.num_consecutive_mutations;
        let runs = engine_config.determinism_runs;
        let mut engine = DifferentialEngine::new(engine_config, jit);
        let corpus = corpus_with_seed();
        let sink = CollectingSink::new();

        // Deterministic seed, then every mutant diverges.
        let mut outputs = vec!["2\nChecksum: 11206928\n".to_string(); runs];
        outputs.extend(vec!["2\nChecksum: 99\n".to_string(); n]);
        let mut runner = MockRunner::succeeding(outputs);

        engine
            .fuzz_one(&corpus, &mut runner, &mut rng(), &sink)
            .unwrap();

        // Every generated mutant executed after the gate runs, and every
        // one of them diverged.
        assert!(runner.calls() > runs);
        assert!(runner.calls() <= runs + n);
        assert_eq!(sink.miscompilations(), runner.calls() - runs);
    }

    #[test]
    fn test_round_accepts_matching_mutants() {
        let (engine_config, jit) = configs();
        let mut engine = DifferentialEngine::new(engine_config, jit);
        let corpus = corpus_with_seed();
        let sink = CollectingSink::new();
        let mut runner = MockRunner::constant("2\nChecksum: 11206928\n");

        engine
            .fuzz_one(&corpus, &mut runner, &mut rng(), &sink)
            .unwrap();
        assert_eq!(sink.miscompilations(), 0);
    }

    #[test]
    fn test_nondeterministic_seed_ends_the_round() {
        let (engine_config, jit) = configs();
        let mut engine = DifferentialEngine::new(engine_config, jit);
        let corpus = corpus_with_seed();
        let sink = CollectingSink::new();
        let mut runner = MockRunner::succeeding(vec![
            "2\nChecksum: 11206928\n".to_string(),
            "3\nChecksum: 11206928\n".to_string(),
        ]);

        engine
            .fuzz_one(&corpus, &mut runner, &mut rng(), &sink)
            .unwrap();
        // The gate stops at the first mismatch; no mutants execute.
        assert_eq!(runner.calls(), 2);
        assert_eq!(sink.miscompilations(), 0);
    }

    #[test]
    fn test_recursive_seed_is_rejected_before_execution() {
        let (engine_config, jit) = configs();
        let mut engine = DifferentialEngine::new(engine_config, jit);
        let sink = CollectingSink::new();

        // function v0() { v0(); }
        let corpus = Corpus::new();
        corpus.add(Program::new(vec![
            Instruction::new(Opcode::BeginPlainFunction).with_outputs(vec![Variable(0)]),
            Instruction::new(Opcode::CallFunction { guarded: false })
                .with_inputs(vec![Variable(0)])
                .with_outputs(vec![Variable(1)]),
            Instruction::new(Opcode::EndPlainFunction),
        ]));

        let mut runner = MockRunner::constant("Checksum: 11206928\n");
        engine
            .fuzz_one(&corpus, &mut runner, &mut rng(), &sink)
            .unwrap();
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn test_tainted_seed_is_never_picked() {
        let (engine_config, jit) = configs();
        let mut engine = DifferentialEngine::new(engine_config, jit);
        let sink = CollectingSink::new();

        let corpus = Corpus::new();
        let mut b = ProgramBuilder::new();
        b.load_int(1);
        b.add_contributor(NeutralLoopMutator::NAME);
        corpus.add(b.finalize());

        let mut runner = MockRunner::constant("Checksum: 11206928\n");
        engine
            .fuzz_one(&corpus, &mut runner, &mut rng(), &sink)
            .unwrap();
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn test_hanging_seed_is_rejected() {
        let (engine_config, jit) = configs();
        let mut engine = DifferentialEngine::new(engine_config, jit);
        let corpus = corpus_with_seed();
        let sink = CollectingSink::new();
        let mut runner = MockRunner::timing_out();

        engine
            .fuzz_one(&corpus, &mut runner, &mut rng(), &sink)
            .unwrap();
        // The gate stops after the first timed-out execution.
        assert_eq!(runner.calls(), 1);
        assert_eq!(sink.miscompilations(), 0);
    }

    #[test]
    fn test_failed_seed_is_rejected() {
        let (engine_config, jit) = configs();
        let mut engine = DifferentialEngine::new(engine_config, jit);
        let corpus = corpus_with_seed();
        let sink = CollectingSink::new();
        let mut runner = MockRunner::failing(7);

        engine
            .fuzz_one(&corpus, &mut runner, &mut rng(), &sink)
            .unwrap();
        assert_eq!(runner.calls(), 1);
        assert_eq!(sink.miscompilations(), 0);
    }
}
