//! Warmup mutators.
//!
//! These transforms force JIT compilation by repeating real work, so they
//! do not preserve observable output (except for the function-wrap
//! fallback). A sister engine drives them; the differential engine only
//! falls back to them when every preserving mutator fails to generate.

use crate::framework::{mutate_instructions, mutate_subroutines};
use crate::mutator::{Mutator, MutatorStats};
use crate::preserving::{argument_kinds, emit_divergent, emit_matching};
use jitdiff_core::JitConfig;
use jitdiff_ir::analysis::DefUseAnalyzer;
use jitdiff_ir::{Comparator, Instruction, Opcode, Program, ProgramBuilder, Variable};
use rand_chacha::ChaCha8Rng;

fn is_plain_call(instr: &Instruction) -> bool {
    matches!(instr.op, Opcode::CallFunction { guarded: false }) && instr.num_outputs() == 1
}

/// Replays a call instruction, rebinding its output through a slot
/// declared ahead of the insertion point.
fn emit_looped_call(
    b: &mut ProgramBuilder,
    instr: &Instruction,
    trip_count: u64,
) -> Variable {
    let result = b.load_undefined();
    b.hide(result);
    b.build_repeat_loop(trip_count, |b, _| {
        let outs = b.replicate(instr);
        b.reassign(result, outs[0]);
    });
    b.map_variable(instr.outputs[0], result);
    result
}

/// Prepends a bare warmup loop of fresh code to a top-level subroutine
/// body. No try/catch shields the loop, so semantics may change.
pub struct SubroutineWarmupMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl SubroutineWarmupMutator {
    pub const NAME: &'static str = "subroutine_warmup";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for SubroutineWarmupMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stats(&self) -> &MutatorStats {
        &self.stats
    }

    fn mutate(&self, seed: &Program, rng: &mut ChaCha8Rng) -> Option<Program> {
        let trip_count = self.config.max_loop_trip_count;
        let block_size = self.config.small_code_block_size;
        mutate_subroutines(
            seed,
            rng,
            1,
            Self::NAME,
            |_, _, point| point.allows_jit_insertion(),
            |view, b, rng| {
                for (j, instr) in view.instructions.iter().enumerate() {
                    b.adopt(instr);
                    if j == 0 && view.mutable[0] {
                        b.build_repeat_loop(trip_count, |b, _| {
                            b.build_prefix(rng, block_size);
                        });
                    }
                }
            },
        )
    }
}

/// Wraps an existing call in a warmup loop, executing it repeatedly.
pub struct LoopedCallMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl LoopedCallMutator {
    pub const NAME: &'static str = "looped_call";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for LoopedCallMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stats(&self) -> &MutatorStats {
        &self.stats
    }

    fn mutate(&self, seed: &Program, rng: &mut ChaCha8Rng) -> Option<Program> {
        let trip_count = self.config.max_loop_trip_count;
        mutate_instructions(
            seed,
            rng,
            self.config.max_simultaneous_mutations,
            Self::NAME,
            |_, instr, point| is_plain_call(instr) && point.allows_jit_insertion(),
            |instr, b, _| {
                emit_looped_call(b, instr, trip_count);
            },
        )
    }
}

/// Warmup loop plus a follow-up call with type-divergent arguments.
pub struct LoopedCallDeoptMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl LoopedCallDeoptMutator {
    pub const NAME: &'static str = "looped_call_deopt";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for LoopedCallDeoptMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stats(&self) -> &MutatorStats {
        &self.stats
    }

    fn mutate(&self, seed: &Program, rng: &mut ChaCha8Rng) -> Option<Program> {
        let trip_count = self.config.max_loop_trip_count;
        let defuse = DefUseAnalyzer::from_program(seed);
        let kinds_of = |instr: &Instruction| argument_kinds(seed, &defuse, instr);
        mutate_instructions(
            seed,
            rng,
            1,
            Self::NAME,
            |_, instr, point| is_plain_call(instr) && point.allows_jit_insertion(),
            |instr, b, rng| {
                emit_looped_call(b, instr, trip_count);
                let callee = b.lookup(instr.inputs[0]);
                let args: Vec<Variable> = kinds_of(instr)
                    .into_iter()
                    .map(|k| emit_divergent(b, rng, k))
                    .collect();
                b.call_function_guarded(callee, &args);
            },
        )
    }
}

/// Warmup loop, de-optimizing call, then a second warmup loop with
/// matching argument types to force recompilation.
pub struct LoopedCallRecompileMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl LoopedCallRecompileMutator {
    pub const NAME: &'static str = "looped_call_recompile";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for LoopedCallRecompileMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stats(&self) -> &MutatorStats {
        &self.stats
    }

    fn mutate(&self, seed: &Program, rng: &mut ChaCha8Rng) -> Option<Program> {
        let trip_count = self.config.max_loop_trip_count;
        let defuse = DefUseAnalyzer::from_program(seed);
        let kinds_of = |instr: &Instruction| argument_kinds(seed, &defuse, instr);
        mutate_instructions(
            seed,
            rng,
            1,
            Self::NAME,
            |_, instr, point| is_plain_call(instr) && point.allows_jit_insertion(),
            |instr, b, rng| {
                emit_looped_call(b, instr, trip_count);
                let kinds = kinds_of(instr);
                let callee = b.lookup(instr.inputs[0]);
                let args: Vec<Variable> = kinds
                    .iter()
                    .map(|&k| emit_divergent(b, rng, k))
                    .collect();
                b.call_function_guarded(callee, &args);
                b.build_repeat_loop(trip_count, |b, _| {
                    let callee = b.lookup(instr.inputs[0]);
                    let args: Vec<Variable> = kinds
                        .iter()
                        .map(|&k| emit_matching(b, rng, k))
                        .collect();
                    b.call_function_guarded(callee, &args);
                });
            },
        )
    }
}

/// Fallback transform: move the whole program into a plain function and
/// invoke it exactly once from inside a hot loop of fresh code. Same
/// contract as neutral-loop insertion, but applicable to any non-empty
/// program.
pub struct FunctionWrapMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl FunctionWrapMutator {
    pub const NAME: &'static str = "function_wrap";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for FunctionWrapMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stats(&self) -> &MutatorStats {
        &self.stats
    }

    fn is_preserving(&self) -> bool {
        true
    }

    fn mutate(&self, seed: &Program, rng: &mut ChaCha8Rng) -> Option<Program> {
        if seed.is_empty() {
            return None;
        }
        let trip_count = self.config.max_loop_trip_count;
        let block_size = self.config.small_code_block_size;

        let mut b = ProgramBuilder::new();
        b.set_contributors(seed.contributors().clone());
        b.add_contributor(Self::NAME);
        let body = b.build_plain_function(0, |b, _| {
            b.append(seed);
        });
        b.build_repeat_loop(trip_count, |b, i| {
            b.build_prefix(rng, block_size);
            let zero = b.load_int(0);
            let first_iteration = b.compare(i, Comparator::StrictEqual, zero);
            b.build_if(first_iteration, |b| {
                b.call_function(body, &[]);
            });
        });
        Some(b.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitdiff_ir::BinaryOperator;
    use rand::SeedableRng;

    fn config() -> JitConfig {
        JitConfig::default()
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn called_function_seed() -> Program {
        let mut b = ProgramBuilder::new();
        let f = b.build_plain_function(1, |b, params| {
            let one = b.load_int(1);
            let sum = b.binary(params[0], BinaryOperator::Add, one);
            b.do_return(Some(sum));
        });
        let arg = b.load_int(5);
        b.call_function(f, &[arg]);
        b.finalize()
    }

    #[test]
    fn test_subroutine_warmup_prepends_loop() {
        let seed = called_function_seed();
        let m = SubroutineWarmupMutator::new(config());
        let mutant = m.mutate(&seed, &mut rng()).unwrap();

        let head = mutant.iter().position(|i| i.op.is_subroutine_begin()).unwrap();
        assert!(matches!(mutant[head + 1].op, Opcode::BeginRepeatLoop(n) if n == 921));
        // Bare loop, no try/catch shield.
        assert!(!mutant.iter().any(|i| i.op == Opcode::BeginTry));
    }

    #[test]
    fn test_looped_call_replays_the_call() {
        let seed = called_function_seed();
        let m = LoopedCallMutator::new(config());
        let mutant = m.mutate(&seed, &mut rng()).unwrap();

        let loop_head = mutant
            .iter()
            .position(|i| matches!(i.op, Opcode::BeginRepeatLoop(_)))
            .unwrap();
        let loop_end = mutant.find_block_end(loop_head);
        let body = &mutant.instructions()[loop_head..=loop_end];
        assert!(body.iter().any(|i| i.op.is_call()));
        assert!(body.iter().any(|i| i.op == Opcode::Reassign));
    }

    #[test]
    fn test_looped_call_deopt_appends_divergent_call() {
        let seed = called_function_seed();
        let m = LoopedCallDeoptMutator::new(config());
        let mutant = m.mutate(&seed, &mut rng()).unwrap();

        assert!(mutant
            .iter()
            .any(|i| matches!(&i.op, Opcode::LoadString(s) if s == "deopt")));
        assert!(mutant.iter().any(|i| i.op.is_guarded()));
    }

    #[test]
    fn test_looped_call_recompile_adds_second_loop() {
        let seed = called_function_seed();
        let m = LoopedCallRecompileMutator::new(config());
        let mutant = m.mutate(&seed, &mut rng()).unwrap();

        let loops = mutant
            .iter()
            .filter(|i| matches!(i.op, Opcode::BeginRepeatLoop(_)))
            .count();
        assert_eq!(loops, 2);
    }

    #[test]
    fn test_mutators_need_call_sites() {
        let mut b = ProgramBuilder::new();
        let a = b.load_int(1);
        let c = b.load_int(2);
        b.binary(a, BinaryOperator::Add, c);
        let seed = b.finalize();

        assert!(LoopedCallMutator::new(config())
            .mutate(&seed, &mut rng())
            .is_none());
        assert!(LoopedCallDeoptMutator::new(config())
            .mutate(&seed, &mut rng())
            .is_none());
    }

    #[test]
    fn test_function_wrap_always_applies() {
        let mut b = ProgramBuilder::new();
        let a = b.load_int(1);
        let print = b.load_builtin("print");
        b.call_function(print, &[a]);
        let seed = b.finalize();

        let m = FunctionWrapMutator::new(config());
        let mutant = m.mutate(&seed, &mut rng()).unwrap();

        assert!(mutant[0].op.is_plain_or_arrow_function_begin());
        // The wrapped body is invoked exactly once, on the first
        // iteration.
        assert!(mutant
            .iter()
            .any(|i| matches!(i.op, Opcode::Compare(Comparator::StrictEqual))));
        assert!(mutant.contributors().contains(FunctionWrapMutator::NAME));
        assert!(m.mutate(&Program::new(vec![]), &mut rng()).is_none());
    }
}
