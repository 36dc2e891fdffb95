//! Program construction DSL.
//!
//! Mutators never edit a program in place; they re-emit it through a
//! builder, interleaving adopted instructions with freshly built ones.
//! Adoption scopes translate the source program's variables into builder
//! variables through an explicit remap table, and block helpers hand the
//! builder back to the body callback as an explicit parameter.

use crate::codegen;
use crate::instruction::{
    BinaryOperator, Comparator, Instruction, Opcode, UnaryOperator, Variable,
};
use crate::program::{Contributors, Program};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};

pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
    num_variables: u16,
    hidden: HashSet<Variable>,
    scopes: Vec<HashMap<Variable, Variable>>,
    contributors: Contributors,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            num_variables: 0,
            hidden: HashSet::new(),
            scopes: Vec::new(),
            contributors: Contributors::new(),
        }
    }

    pub fn num_instructions(&self) -> usize {
        self.instructions.len()
    }

    fn next_variable(&mut self) -> Variable {
        assert!(self.num_variables < u16::MAX, "variable space exhausted");
        let v = Variable(self.num_variables);
        self.num_variables += 1;
        v
    }

    fn emit(&mut self, op: Opcode, inputs: Vec<Variable>, num_outputs: usize) -> Vec<Variable> {
        let outputs: Vec<Variable> = (0..num_outputs).map(|_| self.next_variable()).collect();
        self.instructions.push(
            Instruction::new(op)
                .with_inputs(inputs)
                .with_outputs(outputs.clone()),
        );
        outputs
    }

    fn emit1(&mut self, op: Opcode, inputs: Vec<Variable>) -> Variable {
        self.emit(op, inputs, 1)[0]
    }

    fn emit0(&mut self, op: Opcode, inputs: Vec<Variable>) {
        self.emit(op, inputs, 0);
    }

    // ---- Adoption ----------------------------------------------------

    /// Runs `f` inside a fresh adoption scope. Variables of instructions
    /// adopted within the scope are remapped to builder variables.
    pub fn adopting<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    /// Resolves a source-program variable through the active scopes.
    pub fn lookup(&self, v: Variable) -> Variable {
        for scope in self.scopes.iter().rev() {
            if let Some(&mapped) = scope.get(&v) {
                return mapped;
            }
        }
        v
    }

    /// Overrides the mapping for a source variable in the innermost scope.
    /// Later adopted uses of `from` will refer to `to`.
    pub fn map_variable(&mut self, from: Variable, to: Variable) {
        let scope = self
            .scopes
            .last_mut()
            .expect("map_variable requires an adoption scope");
        scope.insert(from, to);
    }

    /// Re-emits an instruction, translating inputs and allocating fresh
    /// outputs that later adopted instructions will resolve to.
    pub fn adopt(&mut self, instr: &Instruction) {
        let inputs: Vec<Variable> = instr.inputs.iter().map(|&v| self.lookup(v)).collect();
        let mut outputs = Vec::with_capacity(instr.outputs.len());
        for &out in &instr.outputs {
            let fresh = self.next_variable();
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(out, fresh);
            }
            outputs.push(fresh);
        }
        self.instructions.push(
            Instruction::new(instr.op.clone())
                .with_inputs(inputs)
                .with_outputs(outputs),
        );
    }

    /// Like `adopt`, but the fresh outputs are not recorded in the scope.
    /// Used to duplicate an instruction whose original outputs must keep
    /// resolving elsewhere. Returns the duplicate's outputs.
    pub fn replicate(&mut self, instr: &Instruction) -> Vec<Variable> {
        let inputs: Vec<Variable> = instr.inputs.iter().map(|&v| self.lookup(v)).collect();
        let outputs: Vec<Variable> = (0..instr.outputs.len())
            .map(|_| self.next_variable())
            .collect();
        self.instructions.push(
            Instruction::new(instr.op.clone())
                .with_inputs(inputs)
                .with_outputs(outputs.clone()),
        );
        outputs
    }

    /// Splices an entire program in at the current position.
    pub fn append(&mut self, program: &Program) {
        self.adopting(|b| {
            for instr in program.iter() {
                b.adopt(instr);
            }
        });
    }

    // ---- Variable visibility -----------------------------------------

    /// Excludes a variable from random reuse by generated code.
    pub fn hide(&mut self, v: Variable) {
        self.hidden.insert(v);
    }

    pub fn is_hidden(&self, v: Variable) -> bool {
        self.hidden.contains(&v)
    }

    // ---- Literals and loads ------------------------------------------

    pub fn load_int(&mut self, value: i64) -> Variable {
        self.emit1(Opcode::LoadInt(value), vec![])
    }

    pub fn load_float(&mut self, value: f64) -> Variable {
        self.emit1(Opcode::LoadFloat(value), vec![])
    }

    pub fn load_bool(&mut self, value: bool) -> Variable {
        self.emit1(Opcode::LoadBool(value), vec![])
    }

    pub fn load_string(&mut self, value: &str) -> Variable {
        self.emit1(Opcode::LoadString(value.to_string()), vec![])
    }

    pub fn load_null(&mut self) -> Variable {
        self.emit1(Opcode::LoadNull, vec![])
    }

    pub fn load_undefined(&mut self) -> Variable {
        self.emit1(Opcode::LoadUndefined, vec![])
    }

    pub fn load_builtin(&mut self, name: &str) -> Variable {
        self.emit1(Opcode::LoadBuiltin(name.to_string()), vec![])
    }

    pub fn load_checksum_container(&mut self) -> Variable {
        self.emit1(Opcode::LoadChecksumContainer, vec![])
    }

    pub fn load_named_variable(&mut self, name: &str) -> Variable {
        self.emit1(Opcode::LoadNamedVariable(name.to_string()), vec![])
    }

    pub fn store_named_variable(&mut self, name: &str, value: Variable) {
        self.emit0(Opcode::StoreNamedVariable(name.to_string()), vec![value]);
    }

    pub fn define_named_variable(&mut self, name: &str, value: Variable) {
        self.emit0(Opcode::DefineNamedVariable(name.to_string()), vec![value]);
    }

    // ---- Objects and arrays ------------------------------------------

    pub fn create_object(&mut self) -> Variable {
        self.emit1(Opcode::CreateObject, vec![])
    }

    pub fn create_array(&mut self, elements: &[Variable]) -> Variable {
        self.emit1(Opcode::CreateArray, elements.to_vec())
    }

    pub fn create_int_array(&mut self, values: Vec<i64>) -> Variable {
        self.emit1(Opcode::CreateIntArray(values), vec![])
    }

    pub fn get_property(&mut self, object: Variable, name: &str) -> Variable {
        self.emit1(Opcode::GetProperty(name.to_string()), vec![object])
    }

    pub fn set_property(&mut self, object: Variable, name: &str, value: Variable) {
        self.emit0(Opcode::SetProperty(name.to_string()), vec![object, value]);
    }

    pub fn get_element(&mut self, array: Variable, index: i64) -> Variable {
        self.emit1(Opcode::GetElement(index), vec![array])
    }

    pub fn set_element(&mut self, array: Variable, index: i64, value: Variable) {
        self.emit0(Opcode::SetElement(index), vec![array, value]);
    }

    pub fn update_element(
        &mut self,
        array: Variable,
        index: i64,
        op: BinaryOperator,
        rhs: Variable,
    ) {
        self.emit0(Opcode::UpdateElement(index, op), vec![array, rhs]);
    }

    pub fn get_computed_property(&mut self, object: Variable, key: Variable) -> Variable {
        self.emit1(Opcode::GetComputedProperty, vec![object, key])
    }

    pub fn set_computed_property(&mut self, object: Variable, key: Variable, value: Variable) {
        self.emit0(Opcode::SetComputedProperty, vec![object, key, value]);
    }

    pub fn configure_property(&mut self, object: Variable, name: &str, value: Variable) {
        self.emit0(Opcode::ConfigureProperty(name.to_string()), vec![object, value]);
    }

    pub fn configure_element(&mut self, object: Variable, index: i64, value: Variable) {
        self.emit0(Opcode::ConfigureElement(index), vec![object, value]);
    }

    // ---- Expressions -------------------------------------------------

    pub fn binary(&mut self, lhs: Variable, op: BinaryOperator, rhs: Variable) -> Variable {
        self.emit1(Opcode::BinaryOp(op), vec![lhs, rhs])
    }

    pub fn unary(&mut self, op: UnaryOperator, operand: Variable) -> Variable {
        self.emit1(Opcode::UnaryOp(op), vec![operand])
    }

    pub fn compare(&mut self, lhs: Variable, op: Comparator, rhs: Variable) -> Variable {
        self.emit1(Opcode::Compare(op), vec![lhs, rhs])
    }

    pub fn update(&mut self, target: Variable, op: BinaryOperator, rhs: Variable) {
        self.emit0(Opcode::Update(op), vec![target, rhs]);
    }

    pub fn reassign(&mut self, target: Variable, value: Variable) {
        self.emit0(Opcode::Reassign, vec![target, value]);
    }

    // ---- Calls and control transfer ----------------------------------

    pub fn call_function(&mut self, function: Variable, args: &[Variable]) -> Variable {
        let mut inputs = vec![function];
        inputs.extend_from_slice(args);
        self.emit1(Opcode::CallFunction { guarded: false }, inputs)
    }

    pub fn call_function_guarded(&mut self, function: Variable, args: &[Variable]) -> Variable {
        let mut inputs = vec![function];
        inputs.extend_from_slice(args);
        self.emit1(Opcode::CallFunction { guarded: true }, inputs)
    }

    pub fn call_method(&mut self, object: Variable, name: &str, args: &[Variable]) -> Variable {
        let mut inputs = vec![object];
        inputs.extend_from_slice(args);
        self.emit1(
            Opcode::CallMethod { name: name.to_string(), guarded: false },
            inputs,
        )
    }

    pub fn construct(&mut self, constructor: Variable, args: &[Variable]) -> Variable {
        let mut inputs = vec![constructor];
        inputs.extend_from_slice(args);
        self.emit1(Opcode::Construct { guarded: false }, inputs)
    }

    pub fn do_return(&mut self, value: Option<Variable>) {
        let inputs = value.map(|v| vec![v]).unwrap_or_default();
        self.emit0(Opcode::Return, inputs);
    }

    pub fn throw(&mut self, value: Variable) {
        self.emit0(Opcode::ThrowException, vec![value]);
    }

    pub fn await_value(&mut self, promise: Variable) -> Variable {
        self.emit1(Opcode::Await, vec![promise])
    }

    pub fn eval(&mut self, code: Variable) {
        self.emit0(Opcode::Eval, vec![code]);
    }

    pub fn nop(&mut self) {
        self.emit0(Opcode::Nop, vec![]);
    }

    // ---- Structured control flow -------------------------------------

    pub fn build_if(&mut self, cond: Variable, then_body: impl FnOnce(&mut Self)) {
        self.emit0(Opcode::BeginIf, vec![cond]);
        then_body(self);
        self.emit0(Opcode::EndIf, vec![]);
    }

    pub fn build_if_else(
        &mut self,
        cond: Variable,
        then_body: impl FnOnce(&mut Self),
        else_body: impl FnOnce(&mut Self),
    ) {
        self.emit0(Opcode::BeginIf, vec![cond]);
        then_body(self);
        self.emit0(Opcode::BeginElse, vec![]);
        else_body(self);
        self.emit0(Opcode::EndIf, vec![]);
    }

    pub fn build_try_catch(
        &mut self,
        try_body: impl FnOnce(&mut Self),
        catch_body: impl FnOnce(&mut Self, Variable),
    ) {
        self.emit0(Opcode::BeginTry, vec![]);
        try_body(self);
        let exception = self.emit1(Opcode::BeginCatch, vec![]);
        catch_body(self, exception);
        self.emit0(Opcode::EndTryCatchFinally, vec![]);
    }

    pub fn build_try_finally(
        &mut self,
        try_body: impl FnOnce(&mut Self),
        finally_body: impl FnOnce(&mut Self),
    ) {
        self.emit0(Opcode::BeginTry, vec![]);
        try_body(self);
        self.emit0(Opcode::BeginFinally, vec![]);
        finally_body(self);
        self.emit0(Opcode::EndTryCatchFinally, vec![]);
    }

    pub fn build_try_catch_finally(
        &mut self,
        try_body: impl FnOnce(&mut Self),
        catch_body: impl FnOnce(&mut Self, Variable),
        finally_body: impl FnOnce(&mut Self),
    ) {
        self.emit0(Opcode::BeginTry, vec![]);
        try_body(self);
        let exception = self.emit1(Opcode::BeginCatch, vec![]);
        catch_body(self, exception);
        self.emit0(Opcode::BeginFinally, vec![]);
        finally_body(self);
        self.emit0(Opcode::EndTryCatchFinally, vec![]);
    }

    /// `for (let i = 0; i < iterations; i++) { body(i) }`
    pub fn build_repeat_loop(
        &mut self,
        iterations: u64,
        body: impl FnOnce(&mut Self, Variable),
    ) {
        let counter = self.emit1(Opcode::BeginRepeatLoop(iterations), vec![]);
        body(self, counter);
        self.emit0(Opcode::EndRepeatLoop, vec![]);
    }

    pub fn build_while_loop(&mut self, cond: Variable, body: impl FnOnce(&mut Self)) {
        self.emit0(Opcode::BeginWhileLoop, vec![cond]);
        body(self);
        self.emit0(Opcode::EndWhileLoop, vec![]);
    }

    pub fn build_plain_function(
        &mut self,
        num_params: usize,
        body: impl FnOnce(&mut Self, &[Variable]),
    ) -> Variable {
        let outputs = self.emit(Opcode::BeginPlainFunction, vec![], 1 + num_params);
        let function = outputs[0];
        let params = outputs[1..].to_vec();
        body(self, &params);
        self.emit0(Opcode::EndPlainFunction, vec![]);
        function
    }

    pub fn build_arrow_function(
        &mut self,
        num_params: usize,
        body: impl FnOnce(&mut Self, &[Variable]),
    ) -> Variable {
        let outputs = self.emit(Opcode::BeginArrowFunction, vec![], 1 + num_params);
        let function = outputs[0];
        let params = outputs[1..].to_vec();
        body(self, &params);
        self.emit0(Opcode::EndArrowFunction, vec![]);
        function
    }

    // ---- Random code -------------------------------------------------

    /// Emits `count` random literal values and returns them.
    pub fn build_values(&mut self, rng: &mut ChaCha8Rng, count: usize) -> Vec<Variable> {
        codegen::build_values(self, rng, count)
    }

    /// Emits a fresh neutral code block of roughly `size` instructions.
    /// The block only touches variables it defines itself.
    pub fn build_prefix(&mut self, rng: &mut ChaCha8Rng, size: usize) {
        codegen::neutral_block(self, rng, size);
    }

    // ---- Finalization ------------------------------------------------

    pub fn set_contributors(&mut self, contributors: Contributors) {
        self.contributors = contributors;
    }

    pub fn add_contributor(&mut self, name: &str) {
        self.contributors.add(name);
    }

    pub fn finalize(self) -> Program {
        Program::with_contributors(self.instructions, self.contributors)
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_build_simple_program() {
        let mut b = ProgramBuilder::new();
        let a = b.load_int(1);
        let c = b.load_int(2);
        let sum = b.binary(a, BinaryOperator::Add, c);
        let print = b.load_builtin("print");
        b.call_function(print, &[sum]);
        let program = b.finalize();

        assert_eq!(program.len(), 5);
        assert_eq!(program[2].inputs, vec![a, c]);
        assert!(program[4].op.is_call());
    }

    #[test]
    fn test_adoption_remaps_variables() {
        let mut b = ProgramBuilder::new();
        let x = b.load_int(7);
        let source = {
            let mut s = ProgramBuilder::new();
            let a = s.load_int(1);
            let c = s.load_int(2);
            s.binary(a, BinaryOperator::Mul, c);
            s.finalize()
        };
        b.append(&source);
        let program = b.finalize();

        assert_eq!(program.len(), 4);
        // Adopted variables must not collide with pre-existing ones.
        assert_eq!(x, Variable(0));
        assert_eq!(program[3].inputs, vec![Variable(1), Variable(2)]);
        assert_eq!(program[3].outputs, vec![Variable(3)]);
    }

    #[test]
    fn test_map_variable_rebinds_later_uses() {
        let source = {
            let mut s = ProgramBuilder::new();
            let a = s.load_int(1);
            let print = s.load_builtin("print");
            s.call_function(print, &[a]);
            s.finalize()
        };

        let mut b = ProgramBuilder::new();
        let replacement = b.load_int(99);
        b.adopting(|b| {
            b.adopt(&source[0]);
            // Rebind the literal's output; the call should consume the
            // replacement instead.
            b.map_variable(source[0].outputs[0], replacement);
            b.adopt(&source[1]);
            b.adopt(&source[2]);
        });
        let program = b.finalize();
        let call = &program[3];
        assert_eq!(call.inputs[1], replacement);
    }

    #[test]
    fn test_block_builders_balance() {
        let mut b = ProgramBuilder::new();
        let cond = b.load_bool(true);
        b.build_if_else(
            cond,
            |b| {
                b.nop();
            },
            |b| {
                b.nop();
            },
        );
        b.build_repeat_loop(10, |b, i| {
            let one = b.load_int(1);
            b.binary(i, BinaryOperator::Add, one);
        });
        let program = b.finalize();

        let starts = program.iter().filter(|i| i.op.is_block_group_start()).count();
        let ends = program.iter().filter(|i| i.op.is_block_group_end()).count();
        assert_eq!(starts, ends);
        assert_eq!(program.find_all_block_groups().len(), 2);
    }

    #[test]
    fn test_build_plain_function() {
        let mut b = ProgramBuilder::new();
        let f = b.build_plain_function(2, |b, params| {
            let sum = b.binary(params[0], BinaryOperator::Add, params[1]);
            b.do_return(Some(sum));
        });
        let one = b.load_int(1);
        let two = b.load_int(2);
        b.call_function(f, &[one, two]);
        let program = b.finalize();

        assert!(program[0].op.is_plain_or_arrow_function_begin());
        assert_eq!(program[0].outputs.len(), 3);
        assert_eq!(program[0].parameters().len(), 2);
    }

    #[test]
    fn test_build_prefix_is_self_contained() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut b = ProgramBuilder::new();
        b.load_int(5);
        let before = b.num_instructions();
        b.build_prefix(&mut rng, 10);
        let program = b.finalize();
        assert!(program.len() > before);

        // Neutral code may only reference variables it defined itself.
        let mut defined: std::collections::HashSet<Variable> =
            std::collections::HashSet::new();
        for instr in program.iter().skip(before) {
            for input in &instr.inputs {
                assert!(defined.contains(input), "external dependency: {}", input);
            }
            for output in &instr.outputs {
                defined.insert(*output);
            }
        }
    }
}
