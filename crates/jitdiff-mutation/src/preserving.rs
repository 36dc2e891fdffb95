//! Semantics-preserving JIT-provoking mutators.
//!
//! All four transforms leave the observable output of the program
//! unchanged when interpreted, so any stdout divergence between seed and
//! mutant is attributable to JIT miscompilation. Common veto: insertion
//! points must be plain statement positions outside loops, code strings,
//! object literals and dead code.

use crate::framework::{mutate_subroutines, program_points, Point};
use crate::mutator::{Mutator, MutatorStats};
use jitdiff_core::JitConfig;
use jitdiff_ir::analysis::{Context, DefUseAnalyzer};
use jitdiff_ir::{
    BlockGroup, Comparator, Instruction, Opcode, Program, ProgramBuilder, UnaryOperator,
    Variable,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Coarse value classification used to echo or diverge from a call's
/// argument types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgKind {
    Int,
    Float,
    Bool,
    Str,
    Array,
    Object,
    Nullish,
    Other,
}

pub(crate) fn classify_argument(
    program: &Program,
    defuse: &DefUseAnalyzer,
    arg: Variable,
) -> ArgKind {
    let Some(def) = defuse.definition_of(arg) else {
        return ArgKind::Other;
    };
    match &program[def].op {
        Opcode::LoadInt(_) => ArgKind::Int,
        Opcode::LoadFloat(_) => ArgKind::Float,
        Opcode::LoadBool(_) => ArgKind::Bool,
        Opcode::LoadString(_) => ArgKind::Str,
        Opcode::CreateArray | Opcode::CreateIntArray(_) => ArgKind::Array,
        Opcode::CreateObject | Opcode::BeginObjectLiteral => ArgKind::Object,
        Opcode::LoadNull | Opcode::LoadUndefined => ArgKind::Nullish,
        _ => ArgKind::Other,
    }
}

/// Emits a fresh value of the same kind, so the JIT sees the shape it
/// will specialize on.
pub(crate) fn emit_matching(
    b: &mut ProgramBuilder,
    rng: &mut ChaCha8Rng,
    kind: ArgKind,
) -> Variable {
    match kind {
        ArgKind::Int | ArgKind::Other => b.load_int(rng.gen_range(-1000..1000)),
        ArgKind::Float => b.load_float(rng.gen_range(-100.0..100.0)),
        ArgKind::Bool => b.load_bool(rng.gen()),
        ArgKind::Str => b.load_string("warmup"),
        ArgKind::Array => b.create_int_array((0..3).map(|_| rng.gen_range(0..100)).collect()),
        ArgKind::Object => b.create_object(),
        ArgKind::Nullish => b.load_undefined(),
    }
}

/// Emits a fresh value of a deliberately different kind, to invalidate
/// the type feedback collected so far.
pub(crate) fn emit_divergent(
    b: &mut ProgramBuilder,
    rng: &mut ChaCha8Rng,
    kind: ArgKind,
) -> Variable {
    match kind {
        ArgKind::Int => b.load_string("deopt"),
        ArgKind::Float => b.load_bool(rng.gen()),
        ArgKind::Bool => b.load_string("deopt"),
        ArgKind::Str => b.load_int(rng.gen_range(-1000..1000)),
        ArgKind::Array | ArgKind::Object => b.load_int(rng.gen_range(-1000..1000)),
        ArgKind::Nullish | ArgKind::Other => b.load_string("deopt"),
    }
}

pub(crate) fn argument_kinds(
    program: &Program,
    defuse: &DefUseAnalyzer,
    call: &Instruction,
) -> Vec<ArgKind> {
    call.inputs[1..]
        .iter()
        .map(|&arg| classify_argument(program, defuse, arg))
        .collect()
}

/// Inserts a fresh, side-effect-free bounded loop wrapped in try/catch
/// into a subroutine body, triggering on-stack replacement compilation of
/// the enclosing subroutine without altering visible state.
pub struct NeutralLoopMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl NeutralLoopMutator {
    pub const NAME: &'static str = "neutral_loop";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for NeutralLoopMutator {
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
        let trip_count = self.config.max_loop_trip_count;
        let block_size = self.config.small_code_block_size;
        mutate_subroutines(
            seed,
            rng,
            1,
            Self::NAME,
            |_, _, point| point.allows_jit_insertion(),
            |view, b, rng| {
                let positions = view.mutable_positions();
                let insert_after = positions
                    .get(rng.gen_range(0..positions.len().max(1)))
                    .copied();
                for (j, instr) in view.instructions.iter().enumerate() {
                    b.adopt(instr);
                    if insert_after == Some(j) {
                        b.build_try_catch(
                            |b| {
                                b.build_repeat_loop(trip_count, |b, _| {
                                    b.build_prefix(rng, block_size);
                                });
                            },
                            |_, _| {},
                        );
                    }
                }
            },
        )
    }
}

/// Wraps a single interior instruction so it executes exactly once from
/// inside a hot loop, rebinding its output through a saved slot.
pub struct SingleRunWrapMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl SingleRunWrapMutator {
    pub const NAME: &'static str = "single_run_wrap";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }

    fn wrappable(instr: &Instruction, point: &Point) -> bool {
        let op = &instr.op;
        point.allows_jit_insertion()
            && !op.is_jump()
            && !op.is_block_start()
            && !op.is_block_end()
            && !op.is_call()
            && !op.is_named_variable_op()
            && !op.is_configure_op()
            && !matches!(
                op,
                Opcode::Await | Opcode::LoadBuiltin(_) | Opcode::LoadChecksumContainer
            )
            && instr.num_outputs() <= 1
    }
}

impl Mutator for SingleRunWrapMutator {
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
        let trip_count = self.config.max_loop_trip_count;
        let block_size = self.config.small_code_block_size;
        mutate_subroutines(
            seed,
            rng,
            1,
            Self::NAME,
            |_, instr, point| Self::wrappable(instr, point),
            |view, b, rng| {
                let candidates: Vec<usize> = (1..view.instructions.len().saturating_sub(1))
                    .filter(|&j| Self::wrappable(&view.instructions[j], &view.at[j]))
                    .collect();
                if candidates.is_empty() {
                    for instr in view.instructions {
                        b.adopt(instr);
                    }
                    return;
                }
                let target = candidates[rng.gen_range(0..candidates.len())];

                for (j, instr) in view.instructions.iter().enumerate() {
                    if j != target {
                        b.adopt(instr);
                        continue;
                    }

                    let flag = b.load_bool(false);
                    b.hide(flag);
                    let saved = b.load_null();
                    b.hide(saved);
                    b.build_try_catch_finally(
                        |b| {
                            b.build_repeat_loop(trip_count, |b, _| {
                                b.build_prefix(rng, block_size);
                                let pending = b.unary(UnaryOperator::LogicalNot, flag);
                                b.build_if(pending, |b| {
                                    let outs = b.replicate(instr);
                                    if let Some(&tmp) = outs.first() {
                                        b.reassign(saved, tmp);
                                    }
                                    let done = b.load_bool(true);
                                    b.reassign(flag, done);
                                });
                            });
                        },
                        |_, _| {},
                        |b| {
                            let pending = b.unary(UnaryOperator::LogicalNot, flag);
                            b.build_if(pending, |b| {
                                // The flag flips before the re-execution so
                                // a throwing retry cannot run the
                                // instruction twice.
                                let done = b.load_bool(true);
                                b.reassign(flag, done);
                                let outs = b.replicate(instr);
                                if let Some(&tmp) = outs.first() {
                                    b.reassign(saved, tmp);
                                }
                            });
                        },
                    );
                    if let Some(out) = instr.output() {
                        b.map_variable(out, saved);
                    }
                }
            },
        )
    }
}

/// A function definition plus the call the pre-call mutators anchor on.
struct PreCallSite {
    group: BlockGroup,
    call_index: usize,
    /// Innermost repeat loop enclosing the call: `(loop head, trip count)`.
    enclosing_loop: Option<(usize, u64)>,
}

fn pre_call_sites(seed: &Program, require_loop: bool) -> Vec<PreCallSite> {
    let points = program_points(seed);
    let repeat_loops: Vec<(BlockGroup, u64)> = seed
        .find_all_block_groups()
        .into_iter()
        .filter_map(|g| match seed[g.head].op {
            Opcode::BeginRepeatLoop(n) => Some((g, n)),
            _ => None,
        })
        .collect();

    let mut sites = Vec::new();
    for group in seed.find_all_subroutines() {
        let head = &seed[group.head];
        if !head.op.is_plain_or_arrow_function_begin() {
            continue;
        }
        let Some(func) = head.output() else { continue };
        if !points.at[group.head].allows_jit_insertion() {
            continue;
        }

        // First direct call of the function value after its definition.
        let call_index = seed.iter().enumerate().position(|(i, instr)| {
            i > group.tail
                && matches!(instr.op, Opcode::CallFunction { .. })
                && instr.inputs.first() == Some(&func)
        });
        let Some(call_index) = call_index else { continue };

        let enclosing_loop = repeat_loops
            .iter()
            .filter(|(g, _)| g.head < call_index && call_index < g.tail)
            .max_by_key(|(g, _)| g.head)
            .map(|(g, n)| (g.head, *n));

        // The call site obeys the common veto either way; only the loop
        // requirement differs between the two pre-call mutators.
        let call_point = &points.at[call_index];
        if !call_point.current.contains(Context::JAVASCRIPT)
            || call_point.current.contains(Context::OBJECT_LITERAL)
            || call_point.aggregate.contains(Context::CODE_STRING)
            || call_point.dead
        {
            continue;
        }
        if require_loop {
            if enclosing_loop.is_none() {
                continue;
            }
        } else if call_point.aggregate.contains(Context::LOOP) {
            continue;
        }

        sites.push(PreCallSite {
            group,
            call_index,
            enclosing_loop,
        });
    }
    sites
}

/// Emits the guard flag, adopts the function head and attaches the
/// `if (flag) { ...fresh code...; return null }` prologue. Returns the
/// flag variable.
fn emit_guard_prologue(
    b: &mut ProgramBuilder,
    rng: &mut ChaCha8Rng,
    head: &Instruction,
    block_size: usize,
) -> Variable {
    let flag = b.load_bool(false);
    b.hide(flag);
    b.adopt(head);
    b.build_if(flag, |b| {
        b.build_prefix(rng, block_size);
        let null = b.load_null();
        b.do_return(Some(null));
    });
    flag
}

/// Injects a warmup loop before a function's first call. The loop calls
/// the function with freshly built arguments of the same shapes, so the
/// JIT specializes on them, while the guard flag routes every warmup call
/// through the inert prologue.
pub struct WarmupCallMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl WarmupCallMutator {
    pub const NAME: &'static str = "warmup_call";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for WarmupCallMutator {
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
        let sites = pre_call_sites(seed, false);
        if sites.is_empty() {
            return None;
        }
        let site = &sites[rng.gen_range(0..sites.len())];
        let defuse = DefUseAnalyzer::from_program(seed);
        let kinds = argument_kinds(seed, &defuse, &seed[site.call_index]);
        let func = seed[site.group.head].output().expect("site has a value");
        let trip_count = self.config.max_loop_trip_count;
        let block_size = self.config.small_code_block_size;

        let mut b = ProgramBuilder::new();
        b.set_contributors(seed.contributors().clone());
        b.add_contributor(Self::NAME);
        b.adopting(|b| {
            let mut flag = None;
            for (i, instr) in seed.iter().enumerate() {
                if i == site.group.head {
                    flag = Some(emit_guard_prologue(b, rng, instr, block_size));
                    continue;
                }
                if i == site.call_index {
                    let flag = flag.expect("prologue precedes the call");
                    let on = b.load_bool(true);
                    b.reassign(flag, on);
                    b.build_try_catch_finally(
                        |b| {
                            b.build_repeat_loop(trip_count, |b, _| {
                                b.build_prefix(rng, block_size);
                                let args: Vec<Variable> =
                                    kinds.iter().map(|&k| emit_matching(b, rng, k)).collect();
                                let f = b.lookup(func);
                                b.call_function(f, &args);
                            });
                        },
                        |_, _| {},
                        |b| {
                            let off = b.load_bool(false);
                            b.reassign(flag, off);
                        },
                    );
                }
                b.adopt(instr);
            }
        });
        Some(b.finalize())
    }
}

/// The inverse of the warmup pre-call: for a function already called
/// inside a hot loop, inject a call with type-divergent arguments once
/// the loop counter passes the midpoint, de-optimizing the compiled code
/// path so the following normal call may trigger recompilation.
pub struct DeoptCallMutator {
    config: JitConfig,
    stats: MutatorStats,
}

impl DeoptCallMutator {
    pub const NAME: &'static str = "deopt_call";

    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: MutatorStats::new(),
        }
    }
}

impl Mutator for DeoptCallMutator {
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
        let sites = pre_call_sites(seed, true);
        if sites.is_empty() {
            return None;
        }
        let site = &sites[rng.gen_range(0..sites.len())];
        let (loop_head, trip_count) = site.enclosing_loop.expect("loop sites only");
        let counter = seed[loop_head].output().expect("repeat loops define a counter");
        let defuse = DefUseAnalyzer::from_program(seed);
        let kinds = argument_kinds(seed, &defuse, &seed[site.call_index]);
        let func = seed[site.group.head].output().expect("site has a value");
        let block_size = self.config.small_code_block_size;

        let mut b = ProgramBuilder::new();
        b.set_contributors(seed.contributors().clone());
        b.add_contributor(Self::NAME);
        b.adopting(|b| {
            let mut flag = None;
            for (i, instr) in seed.iter().enumerate() {
                if i == site.group.head {
                    flag = Some(emit_guard_prologue(b, rng, instr, block_size));
                    continue;
                }
                if i == site.call_index {
                    let flag = flag.expect("prologue precedes the call");
                    let midpoint = b.load_int((trip_count / 2) as i64);
                    let ctr = b.lookup(counter);
                    let past_midpoint =
                        b.compare(ctr, Comparator::GreaterOrEqual, midpoint);
                    b.build_if(past_midpoint, |b| {
                        let on = b.load_bool(true);
                        b.reassign(flag, on);
                        b.build_try_catch_finally(
                            |b| {
                                let args: Vec<Variable> =
                                    kinds.iter().map(|&k| emit_divergent(b, rng, k)).collect();
                                let f = b.lookup(func);
                                b.call_function(f, &args);
                            },
                            |_, _| {},
                            |b| {
                                let off = b.load_bool(false);
                                b.reassign(flag, off);
                            },
                        );
                    });
                }
                b.adopt(instr);
            }
        });
        Some(b.finalize())
    }
}
