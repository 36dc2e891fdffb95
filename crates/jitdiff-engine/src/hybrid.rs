//! Weighted interleave of the three engines.

use crate::corpus::Corpus;
use crate::differential::DifferentialEngine;
use crate::events::EventSink;
use crate::generative::GenerativeEngine;
use crate::mutation_engine::MutationEngine;
use jitdiff_core::{HybridConfig, Result, WorkerConfig};
use jitdiff_runtime::Runner;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{instrument, trace};

/// One round draws a child engine by weight and delegates. The driver
/// holds no inter-engine state.
pub struct HybridDriver {
    mutation: MutationEngine,
    generative: GenerativeEngine,
    differential: DifferentialEngine,
    weights: HybridConfig,
}

impl HybridDriver {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            mutation: MutationEngine::new(config.engine.clone(), config.jit.clone()),
            generative: GenerativeEngine::new(config.engine.clone(), config.jit.clone()),
            differential: DifferentialEngine::new(config.engine.clone(), config.jit.clone()),
            weights: config.hybrid.clone(),
        }
    }

    #[instrument(skip_all)]
    pub fn fuzz_one(
        &mut self,
        corpus: &Corpus,
        runner: &mut dyn Runner,
        rng: &mut ChaCha8Rng,
        events: &dyn EventSink,
    ) -> Result<()> {
        let mutation = self.weights.weight_mutation;
        let generation = self.weights.weight_generation;
        let total = (mutation + generation + self.weights.weight_differential).max(1);

        let pick = rng.gen_range(0..total);
        if pick < mutation {
            trace!("round: mutation engine");
            self.mutation.fuzz_one(corpus, runner, rng, events)
        } else if pick < mutation + generation {
            trace!("round: generative engine");
            self.generative.fuzz_one(corpus, runner, rng)
        } else {
            trace!("round: differential engine");
            self.differential.fuzz_one(corpus, runner, rng, events)
        }
    }
}
