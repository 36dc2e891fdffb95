//! Static analyzers over IL programs.
//!
//! All analyzers are value-owning state machines rebuilt per program;
//! mutation passes construct fresh instances at the start of every walk.

use crate::instruction::{Instruction, Opcode, Variable};
use crate::program::Program;
use std::collections::{HashMap, HashSet};
use std::ops::BitOr;

/// Bitset describing the syntactic surroundings of a program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context(u16);

impl Context {
    pub const EMPTY: Context = Context(0);
    pub const JAVASCRIPT: Context = Context(1 << 0);
    pub const LOOP: Context = Context(1 << 1);
    pub const SUBROUTINE: Context = Context(1 << 2);
    pub const GENERATOR: Context = Context(1 << 3);
    pub const ASYNC: Context = Context(1 << 4);
    pub const CLASS_DEFINITION: Context = Context(1 << 5);
    pub const OBJECT_LITERAL: Context = Context(1 << 6);
    pub const CODE_STRING: Context = Context(1 << 7);
    pub const METHOD: Context = Context(1 << 8);

    pub fn contains(&self, other: Context) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(&self, other: Context) -> Context {
        Context(self.0 | other.0)
    }
}

impl BitOr for Context {
    type Output = Context;

    fn bitor(self, rhs: Context) -> Context {
        self.union(rhs)
    }
}

/// Tracks the current and aggregate context while sweeping a program.
///
/// The current context is restored on block exit; the aggregate context is
/// the monotonic union over all enclosing blocks. Query before `analyze`
/// for the context *at* an instruction, after it for the context of an
/// insertion point behind it.
pub struct ContextAnalyzer {
    stack: Vec<Context>,
}

impl ContextAnalyzer {
    pub fn new() -> Self {
        Self {
            stack: vec![Context::JAVASCRIPT],
        }
    }

    pub fn analyze(&mut self, instr: &Instruction) {
        let op = &instr.op;
        if op.is_block_end() && self.stack.len() > 1 {
            self.stack.pop();
        }
        if op.is_block_start() {
            let outer = self.current();
            self.stack.push(Self::context_opened(op, outer));
        }
    }

    pub fn current(&self) -> Context {
        *self.stack.last().expect("context stack is never empty")
    }

    pub fn aggregate(&self) -> Context {
        self.stack
            .iter()
            .fold(Context::EMPTY, |acc, &ctx| acc | ctx)
    }

    fn context_opened(op: &Opcode, outer: Context) -> Context {
        match op {
            Opcode::BeginPlainFunction
            | Opcode::BeginArrowFunction
            | Opcode::BeginConstructor => Context::JAVASCRIPT | Context::SUBROUTINE,
            Opcode::BeginGeneratorFunction => {
                Context::JAVASCRIPT | Context::SUBROUTINE | Context::GENERATOR
            }
            Opcode::BeginAsyncFunction => {
                Context::JAVASCRIPT | Context::SUBROUTINE | Context::ASYNC
            }
            Opcode::BeginClassConstructor
            | Opcode::BeginClassMethod(_)
            | Opcode::BeginClassGetter(_)
            | Opcode::BeginClassSetter(_)
            | Opcode::BeginClassStaticInitializer
            | Opcode::BeginObjectLiteralMethod(_)
            | Opcode::BeginObjectLiteralComputedMethod
            | Opcode::BeginObjectLiteralGetter(_)
            | Opcode::BeginObjectLiteralSetter(_) => {
                Context::JAVASCRIPT | Context::SUBROUTINE | Context::METHOD
            }
            Opcode::BeginRepeatLoop(_) | Opcode::BeginWhileLoop => outer | Context::LOOP,
            Opcode::BeginObjectLiteral => Context::OBJECT_LITERAL,
            Opcode::BeginClassDefinition => Context::CLASS_DEFINITION,
            Opcode::BeginCodeString => Context::JAVASCRIPT | Context::CODE_STRING,
            // if/else/try/catch/finally keep the surrounding context
            _ => outer,
        }
    }
}

impl Default for ContextAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks whether the sweep cursor sits behind an unconditional jump
/// within the current block. Nested blocks opened in dead code stay dead.
pub struct DeadCodeAnalyzer {
    stack: Vec<bool>,
}

impl DeadCodeAnalyzer {
    pub fn new() -> Self {
        Self { stack: vec![false] }
    }

    pub fn analyze(&mut self, instr: &Instruction) {
        let op = &instr.op;
        if op.is_block_end() && self.stack.len() > 1 {
            self.stack.pop();
        }
        if op.is_block_start() {
            let dead = self.is_dead();
            self.stack.push(dead);
        } else if op.is_jump() {
            *self.stack.last_mut().expect("dead-code stack is never empty") = true;
        }
    }

    pub fn is_dead(&self) -> bool {
        *self.stack.last().expect("dead-code stack is never empty")
    }
}

impl Default for DeadCodeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps variable definitions to the instructions consuming them.
pub struct DefUseAnalyzer {
    def_site: HashMap<Variable, usize>,
    uses: HashMap<usize, Vec<usize>>,
}

impl DefUseAnalyzer {
    pub fn from_program(program: &Program) -> Self {
        let mut def_site = HashMap::new();
        let mut uses: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, instr) in program.iter().enumerate() {
            for &input in &instr.inputs {
                if let Some(&def) = def_site.get(&input) {
                    uses.entry(def).or_default().push(i);
                }
            }
            for &output in &instr.outputs {
                def_site.insert(output, i);
            }
        }
        Self { def_site, uses }
    }

    pub fn definition_of(&self, v: Variable) -> Option<usize> {
        self.def_site.get(&v).copied()
    }

    pub fn uses_of(&self, def_index: usize) -> &[usize] {
        self.uses.get(&def_index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether the value defined at `def_index` is ever passed as an
    /// argument to a call (rather than being the callee itself). Such
    /// values flow higher-order and their invocation counts become
    /// engine-dependent.
    pub fn is_passed_to_call(&self, program: &Program, def_index: usize) -> bool {
        let defined: HashSet<Variable> =
            program[def_index].outputs.iter().copied().collect();
        self.uses_of(def_index).iter().any(|&u| {
            let instr = &program[u];
            instr.op.is_call()
                && !matches!(instr.op, Opcode::Eval)
                && instr.inputs[1..].iter().any(|v| defined.contains(v))
        })
    }
}

/// Heuristic detection of potentially unbounded recursion.
///
/// For every subroutine, the body is scanned linearly with nested
/// subroutines skipped; a self-invocation encountered before any return at
/// the subroutine's own level flags the program. Over-approximating by
/// design; used only as a determinism pre-filter.
pub fn may_recurse(program: &Program) -> bool {
    let defuse = DefUseAnalyzer::from_program(program);

    for group in program.find_all_subroutines() {
        let head = &program[group.head];
        let func_var = if head.op.is_function_begin() {
            head.output()
        } else {
            None
        };

        // Script-level names the subroutine value is bound to.
        let mut bound_names: HashSet<&str> = HashSet::new();
        if let Some(v) = func_var {
            for instr in program.iter() {
                match &instr.op {
                    Opcode::DefineNamedVariable(name) | Opcode::StoreNamedVariable(name)
                        if instr.inputs.first() == Some(&v) =>
                    {
                        bound_names.insert(name);
                    }
                    _ => {}
                }
            }
        }

        let member_name: Option<&str> = match &head.op {
            Opcode::BeginClassMethod(n) | Opcode::BeginObjectLiteralMethod(n) => Some(n),
            _ => None,
        };
        let accessor_name: Option<(&str, bool)> = match &head.op {
            Opcode::BeginClassGetter(n) | Opcode::BeginObjectLiteralGetter(n) => {
                Some((n.as_str(), true))
            }
            Opcode::BeginClassSetter(n) | Opcode::BeginObjectLiteralSetter(n) => {
                Some((n.as_str(), false))
            }
            _ => None,
        };

        let mut i = group.head + 1;
        while i < group.tail {
            let instr = &program[i];
            if instr.op.is_subroutine_begin() {
                i = program.find_block_end(i) + 1;
                continue;
            }
            match &instr.op {
                Opcode::Return => break,
                Opcode::CallFunction { .. } | Opcode::Construct { .. } => {
                    let callee = instr.input(0);
                    if func_var == Some(callee) {
                        return true;
                    }
                    if let Some(def) = defuse.definition_of(callee) {
                        if let Opcode::LoadNamedVariable(name) = &program[def].op {
                            if bound_names.contains(name.as_str()) {
                                return true;
                            }
                        }
                    }
                }
                Opcode::CallMethod { name, .. } => {
                    if member_name == Some(name.as_str()) {
                        return true;
                    }
                }
                Opcode::GetProperty(name) => {
                    if accessor_name == Some((name.as_str(), true)) {
                        return true;
                    }
                }
                Opcode::SetProperty(name) => {
                    if accessor_name == Some((name.as_str(), false)) {
                        return true;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;

    #[test]
    fn test_context_tracking_in_function_and_loop() {
        let mut b = ProgramBuilder::new();
        b.build_repeat_loop(10, |b, _| {
            b.build_plain_function(0, |b, _| {
                b.nop();
            });
        });
        let program = b.finalize();

        let mut ctx = ContextAnalyzer::new();
        let mut at_nop = None;
        for instr in program.iter() {
            if matches!(instr.op, Opcode::Nop) {
                at_nop = Some((ctx.current(), ctx.aggregate()));
            }
            ctx.analyze(instr);
        }
        let (current, aggregate) = at_nop.unwrap();
        // The function body resets the loop bit; the aggregate keeps it.
        assert!(current.contains(Context::JAVASCRIPT | Context::SUBROUTINE));
        assert!(!current.contains(Context::LOOP));
        assert!(aggregate.contains(Context::LOOP));
        // Back at top level after the sweep.
        assert_eq!(ctx.current(), Context::JAVASCRIPT);
    }

    #[test]
    fn test_object_literal_suppresses_javascript() {
        let program = Program::new(vec![
            Instruction::new(Opcode::BeginObjectLiteral).with_outputs(vec![Variable(0)]),
            Instruction::new(Opcode::Nop),
            Instruction::new(Opcode::EndObjectLiteral),
        ]);
        let mut ctx = ContextAnalyzer::new();
        ctx.analyze(&program[0]);
        assert!(!ctx.current().contains(Context::JAVASCRIPT));
        assert!(ctx.current().contains(Context::OBJECT_LITERAL));
    }

    #[test]
    fn test_dead_code_after_return() {
        let mut b = ProgramBuilder::new();
        b.build_plain_function(0, |b, _| {
            b.do_return(None);
            b.nop();
        });
        b.nop();
        let program = b.finalize();

        let mut dead = DeadCodeAnalyzer::new();
        let mut states = Vec::new();
        for instr in program.iter() {
            states.push(dead.is_dead());
            dead.analyze(instr);
        }
        // begin, return, nop (dead), end (still inside the dead block),
        // trailing nop (live again)
        assert_eq!(states, vec![false, false, true, true, false]);
    }

    #[test]
    fn test_def_use_higher_order_detection() {
        let mut b = ProgramBuilder::new();
        let f = b.build_plain_function(0, |b, _| {
            b.do_return(None);
        });
        let g = b.build_plain_function(1, |b, _| {
            b.do_return(None);
        });
        b.call_function(g, &[f]);
        let program = b.finalize();

        let defuse = DefUseAnalyzer::from_program(&program);
        let f_def = defuse.definition_of(f).unwrap();
        let g_def = defuse.definition_of(g).unwrap();
        assert!(defuse.is_passed_to_call(&program, f_def));
        assert!(!defuse.is_passed_to_call(&program, g_def));
    }

    #[test]
    fn test_recursion_by_value_is_flagged() {
        // function v0() { v0(); }
        let program = Program::new(vec![
            Instruction::new(Opcode::BeginPlainFunction).with_outputs(vec![Variable(0)]),
            Instruction::new(Opcode::CallFunction { guarded: false })
                .with_inputs(vec![Variable(0)])
                .with_outputs(vec![Variable(1)]),
            Instruction::new(Opcode::EndPlainFunction),
        ]);
        assert!(may_recurse(&program));
    }

    #[test]
    fn test_return_before_call_is_not_flagged() {
        let program = Program::new(vec![
            Instruction::new(Opcode::BeginPlainFunction).with_outputs(vec![Variable(0)]),
            Instruction::new(Opcode::Return),
            Instruction::new(Opcode::CallFunction { guarded: false })
                .with_inputs(vec![Variable(0)])
                .with_outputs(vec![Variable(1)]),
            Instruction::new(Opcode::EndPlainFunction),
        ]);
        assert!(!may_recurse(&program));
    }

    #[test]
    fn test_recursion_by_bound_name_is_flagged() {
        let program = Program::new(vec![
            Instruction::new(Opcode::BeginPlainFunction).with_outputs(vec![Variable(0)]),
            Instruction::new(Opcode::LoadNamedVariable("fib".to_string()))
                .with_outputs(vec![Variable(1)]),
            Instruction::new(Opcode::CallFunction { guarded: false })
                .with_inputs(vec![Variable(1)])
                .with_outputs(vec![Variable(2)]),
            Instruction::new(Opcode::EndPlainFunction),
            Instruction::new(Opcode::DefineNamedVariable("fib".to_string()))
                .with_inputs(vec![Variable(0)]),
        ]);
        assert!(may_recurse(&program));
    }

    #[test]
    fn test_nested_subroutines_are_skipped() {
        // function v0() { v1 = () => { v0(); }; }  -- the self-call sits
        // inside a nested subroutine that is never invoked, so neither the
        // outer scan (which skips the nested body) nor the nested scan
        // (whose own value is not called) flags it.
        let program = Program::new(vec![
            Instruction::new(Opcode::BeginPlainFunction).with_outputs(vec![Variable(0)]),
            Instruction::new(Opcode::BeginArrowFunction).with_outputs(vec![Variable(1)]),
            Instruction::new(Opcode::CallFunction { guarded: false })
                .with_inputs(vec![Variable(0)])
                .with_outputs(vec![Variable(2)]),
            Instruction::new(Opcode::EndArrowFunction),
            Instruction::new(Opcode::EndPlainFunction),
        ]);
        assert!(!may_recurse(&program));
    }
}
