//! Sampling helpers shared by the concrete mutators.
//!
//! Two shapes exist: per-instruction mutation and per-outmost-subroutine
//! mutation. Both sweep the program once to collect candidate sites (with
//! fresh analyzers), sample at most `max_sites` of them uniformly, then
//! re-emit the program, interleaving adoption of unchanged instructions
//! with the mutation callback at chosen sites. Both return `None` iff no
//! candidate exists.

use jitdiff_ir::analysis::{Context, ContextAnalyzer, DeadCodeAnalyzer};
use jitdiff_ir::{BlockGroup, Instruction, Program, ProgramBuilder};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

/// Analyzer state at a single program point.
#[derive(Debug, Clone, Copy)]
pub struct Point {
    pub current: Context,
    pub aggregate: Context,
    pub dead: bool,
}

impl Point {
    /// Common insertion veto of the JIT-provoking mutators: statements may
    /// go here, no surrounding loop or code string, not behind a jump.
    pub fn allows_jit_insertion(&self) -> bool {
        self.current.contains(Context::JAVASCRIPT)
            && !self.aggregate.contains(Context::LOOP)
            && !self.aggregate.contains(Context::CODE_STRING)
            && !self.current.contains(Context::OBJECT_LITERAL)
            && !self.dead
    }
}

/// Per-instruction analyzer states: `at[i]` is the state in front of
/// instruction `i`, `after[i]` behind it.
pub struct ProgramPoints {
    pub at: Vec<Point>,
    pub after: Vec<Point>,
}

pub fn program_points(program: &Program) -> ProgramPoints {
    let mut ctx = ContextAnalyzer::new();
    let mut dead = DeadCodeAnalyzer::new();
    let mut at = Vec::with_capacity(program.len());
    let mut after = Vec::with_capacity(program.len());
    for instr in program.iter() {
        at.push(Point {
            current: ctx.current(),
            aggregate: ctx.aggregate(),
            dead: dead.is_dead(),
        });
        ctx.analyze(instr);
        dead.analyze(instr);
        after.push(Point {
            current: ctx.current(),
            aggregate: ctx.aggregate(),
            dead: dead.is_dead(),
        });
    }
    ProgramPoints { at, after }
}

fn sample_indices(rng: &mut ChaCha8Rng, count: usize, max: usize) -> HashSet<usize> {
    let take = max.min(count).max(1);
    rand::seq::index::sample(rng, count, take).into_iter().collect()
}

/// Per-instruction mutation: candidates are single instructions for which
/// `can_mutate` holds; `mutate` consumes the instruction and emits zero or
/// more replacements.
pub fn mutate_instructions(
    seed: &Program,
    rng: &mut ChaCha8Rng,
    max_sites: usize,
    mutator_name: &str,
    mut can_mutate: impl FnMut(usize, &Instruction, &Point) -> bool,
    mut mutate: impl FnMut(&Instruction, &mut ProgramBuilder, &mut ChaCha8Rng),
) -> Option<Program> {
    let points = program_points(seed);
    let candidates: Vec<usize> = seed
        .iter()
        .enumerate()
        .filter(|(i, instr)| can_mutate(*i, instr, &points.at[*i]))
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let chosen = sample_indices(rng, candidates.len(), max_sites);
    let chosen: HashSet<usize> = chosen.into_iter().map(|c| candidates[c]).collect();

    let mut b = ProgramBuilder::new();
    b.set_contributors(seed.contributors().clone());
    b.add_contributor(mutator_name);
    b.adopting(|b| {
        for (i, instr) in seed.iter().enumerate() {
            if chosen.contains(&i) {
                mutate(instr, b, rng);
            } else {
                b.adopt(instr);
            }
        }
    });
    Some(b.finalize())
}

/// A subroutine selected for mutation: the group's instructions plus a
/// mask telling at which interior positions code may be inserted.
pub struct SubroutineView<'a> {
    /// Absolute index of the group head in the seed program.
    pub head: usize,
    /// The group instructions, head and tail included.
    pub instructions: &'a [Instruction],
    /// `mutable[i]` allows insertion *after* `instructions[i]`.
    pub mutable: Vec<bool>,
    /// Analyzer state in front of each instruction.
    pub at: Vec<Point>,
}

impl SubroutineView<'_> {
    pub fn mutable_positions(&self) -> Vec<usize> {
        self.mutable
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Per-outmost-subroutine mutation: candidates are outermost subroutine
/// groups whose interior contains at least one instruction for which
/// `can_mutate` holds. `mutate` re-emits the whole group.
pub fn mutate_subroutines(
    seed: &Program,
    rng: &mut ChaCha8Rng,
    max_sites: usize,
    mutator_name: &str,
    mut can_mutate: impl FnMut(usize, &Instruction, &Point) -> bool,
    mut mutate: impl FnMut(&SubroutineView, &mut ProgramBuilder, &mut ChaCha8Rng),
) -> Option<Program> {
    let points = program_points(seed);
    let groups: Vec<BlockGroup> = seed.find_outermost_subroutines();
    let candidates: Vec<&BlockGroup> = groups
        .iter()
        .filter(|g| {
            g.interior_range()
                .any(|i| can_mutate(i, &seed[i], &points.at[i]))
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let chosen = sample_indices(rng, candidates.len(), max_sites);
    let chosen: Vec<&BlockGroup> = chosen.into_iter().map(|c| candidates[c]).collect();

    let mut b = ProgramBuilder::new();
    b.set_contributors(seed.contributors().clone());
    b.add_contributor(mutator_name);
    b.adopting(|b| {
        let mut i = 0;
        while i < seed.len() {
            if let Some(group) = chosen.iter().find(|g| g.head == i) {
                let slice = &seed.instructions()[group.head..=group.tail];
                let mutable: Vec<bool> = (group.head..=group.tail)
                    .map(|abs| abs < group.tail && points.after[abs].allows_jit_insertion())
                    .collect();
                let at: Vec<Point> = (group.head..=group.tail)
                    .map(|abs| points.at[abs])
                    .collect();
                let view = SubroutineView {
                    head: group.head,
                    instructions: slice,
                    mutable,
                    at,
                };
                mutate(&view, b, rng);
                i = group.tail + 1;
            } else {
                b.adopt(&seed[i]);
                i += 1;
            }
        }
    });
    Some(b.finalize())
}
