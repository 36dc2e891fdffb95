//! Instruction set for the program IL.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Variable identifier, scoped to a single program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variable(pub u16);

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Binary operators available to expressions and checksum updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    Xor,
    LogicOr,
    LogicAnd,
    LShift,
    RShift,
    UnsignedRShift,
}

impl BinaryOperator {
    pub fn token(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::Xor => "^",
            BinaryOperator::LogicOr => "||",
            BinaryOperator::LogicAnd => "&&",
            BinaryOperator::LShift => "<<",
            BinaryOperator::RShift => ">>",
            BinaryOperator::UnsignedRShift => ">>>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    LogicalNot,
    BitwiseNot,
    Minus,
}

impl UnaryOperator {
    pub fn token(&self) -> &'static str {
        match self {
            UnaryOperator::LogicalNot => "!",
            UnaryOperator::BitwiseNot => "~",
            UnaryOperator::Minus => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Equal,
    StrictEqual,
    NotEqual,
    StrictNotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl Comparator {
    pub fn token(&self) -> &'static str {
        match self {
            Comparator::Equal => "==",
            Comparator::StrictEqual => "===",
            Comparator::NotEqual => "!=",
            Comparator::StrictNotEqual => "!==",
            Comparator::LessThan => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterOrEqual => ">=",
        }
    }
}

/// IL opcode. Attribute payloads (literals, names, trip counts, guard
/// flags) live directly in the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    Nop,

    // Literals and loads
    LoadInt(i64),
    LoadFloat(f64),
    LoadBool(bool),
    LoadString(String),
    LoadNull,
    LoadUndefined,
    LoadBuiltin(String),
    /// Binds the checksum container defined by the wire preamble.
    LoadChecksumContainer,

    // Named variables (script-level bindings, distinct from IL variables)
    LoadNamedVariable(String),
    StoreNamedVariable(String),
    DefineNamedVariable(String),

    // Objects and arrays
    CreateObject,
    CreateArray,
    CreateIntArray(Vec<i64>),
    GetProperty(String),
    SetProperty(String),
    GetElement(i64),
    SetElement(i64),
    /// `array[index] op= rhs`
    UpdateElement(i64, BinaryOperator),
    GetComputedProperty,
    SetComputedProperty,
    ConfigureProperty(String),
    ConfigureElement(i64),

    // Expressions
    BinaryOp(BinaryOperator),
    UnaryOp(UnaryOperator),
    Compare(Comparator),
    /// `inputs[0] op= inputs[1]`
    Update(BinaryOperator),
    /// `inputs[0] = inputs[1]`
    Reassign,

    // Calls
    CallFunction { guarded: bool },
    CallMethod { name: String, guarded: bool },
    Construct { guarded: bool },

    // Control transfer
    Return,
    ThrowException,
    LoopBreak,
    LoopContinue,
    Await,
    /// Evaluates the code string in `inputs[0]`.
    Eval,

    // Subroutine definitions. `outputs[0]` is the subroutine value visible
    // outside the block (absent for object-literal and class members);
    // remaining outputs are parameters visible inside.
    BeginPlainFunction,
    EndPlainFunction,
    BeginArrowFunction,
    EndArrowFunction,
    BeginGeneratorFunction,
    EndGeneratorFunction,
    BeginAsyncFunction,
    EndAsyncFunction,
    BeginConstructor,
    EndConstructor,

    // Class definitions
    BeginClassDefinition,
    EndClassDefinition,
    BeginClassConstructor,
    EndClassConstructor,
    BeginClassMethod(String),
    EndClassMethod,
    BeginClassGetter(String),
    EndClassGetter,
    BeginClassSetter(String),
    EndClassSetter,
    BeginClassStaticInitializer,
    EndClassStaticInitializer,

    // Object literals
    BeginObjectLiteral,
    EndObjectLiteral,
    ObjectLiteralProperty(String),
    BeginObjectLiteralMethod(String),
    EndObjectLiteralMethod,
    BeginObjectLiteralComputedMethod,
    EndObjectLiteralComputedMethod,
    BeginObjectLiteralGetter(String),
    EndObjectLiteralGetter,
    BeginObjectLiteralSetter(String),
    EndObjectLiteralSetter,

    // Structured control flow
    BeginIf,
    BeginElse,
    EndIf,
    /// `for (let i = 0; i < n; i++)`; the output is the counter.
    BeginRepeatLoop(u64),
    EndRepeatLoop,
    BeginWhileLoop,
    EndWhileLoop,
    BeginTry,
    BeginCatch,
    BeginFinally,
    EndTryCatchFinally,
    BeginCodeString,
    EndCodeString,
}

impl Opcode {
    /// Returns true if this opcode opens a block. `BeginElse`, `BeginCatch`
    /// and `BeginFinally` both close the preceding block and open a new one.
    pub fn is_block_start(&self) -> bool {
        matches!(
            self,
            Opcode::BeginPlainFunction
                | Opcode::BeginArrowFunction
                | Opcode::BeginGeneratorFunction
                | Opcode::BeginAsyncFunction
                | Opcode::BeginConstructor
                | Opcode::BeginClassDefinition
                | Opcode::BeginClassConstructor
                | Opcode::BeginClassMethod(_)
                | Opcode::BeginClassGetter(_)
                | Opcode::BeginClassSetter(_)
                | Opcode::BeginClassStaticInitializer
                | Opcode::BeginObjectLiteral
                | Opcode::BeginObjectLiteralMethod(_)
                | Opcode::BeginObjectLiteralComputedMethod
                | Opcode::BeginObjectLiteralGetter(_)
                | Opcode::BeginObjectLiteralSetter(_)
                | Opcode::BeginIf
                | Opcode::BeginElse
                | Opcode::BeginRepeatLoop(_)
                | Opcode::BeginWhileLoop
                | Opcode::BeginTry
                | Opcode::BeginCatch
                | Opcode::BeginFinally
                | Opcode::BeginCodeString
        )
    }

    pub fn is_block_end(&self) -> bool {
        matches!(
            self,
            Opcode::EndPlainFunction
                | Opcode::EndArrowFunction
                | Opcode::EndGeneratorFunction
                | Opcode::EndAsyncFunction
                | Opcode::EndConstructor
                | Opcode::EndClassDefinition
                | Opcode::EndClassConstructor
                | Opcode::EndClassMethod
                | Opcode::EndClassGetter
                | Opcode::EndClassSetter
                | Opcode::EndClassStaticInitializer
                | Opcode::EndObjectLiteral
                | Opcode::EndObjectLiteralMethod
                | Opcode::EndObjectLiteralComputedMethod
                | Opcode::EndObjectLiteralGetter
                | Opcode::EndObjectLiteralSetter
                | Opcode::BeginElse
                | Opcode::EndIf
                | Opcode::EndRepeatLoop
                | Opcode::EndWhileLoop
                | Opcode::BeginCatch
                | Opcode::BeginFinally
                | Opcode::EndTryCatchFinally
                | Opcode::EndCodeString
        )
    }

    /// A block-group start opens a group; interior boundaries do not.
    pub fn is_block_group_start(&self) -> bool {
        self.is_block_start() && !self.is_block_end()
    }

    pub fn is_block_group_end(&self) -> bool {
        self.is_block_end() && !self.is_block_start()
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Opcode::CallFunction { .. }
                | Opcode::CallMethod { .. }
                | Opcode::Construct { .. }
                | Opcode::Eval
        )
    }

    /// Unconditional control transfer out of the current block.
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::ThrowException | Opcode::LoopBreak | Opcode::LoopContinue
        )
    }

    pub fn is_guarded(&self) -> bool {
        matches!(
            self,
            Opcode::CallFunction { guarded: true }
                | Opcode::CallMethod { guarded: true, .. }
                | Opcode::Construct { guarded: true }
        )
    }

    /// Opens any kind of subroutine body (function, method, accessor, ...).
    pub fn is_subroutine_begin(&self) -> bool {
        matches!(
            self,
            Opcode::BeginPlainFunction
                | Opcode::BeginArrowFunction
                | Opcode::BeginGeneratorFunction
                | Opcode::BeginAsyncFunction
                | Opcode::BeginConstructor
                | Opcode::BeginClassConstructor
                | Opcode::BeginClassMethod(_)
                | Opcode::BeginClassGetter(_)
                | Opcode::BeginClassSetter(_)
                | Opcode::BeginClassStaticInitializer
                | Opcode::BeginObjectLiteralMethod(_)
                | Opcode::BeginObjectLiteralComputedMethod
                | Opcode::BeginObjectLiteralGetter(_)
                | Opcode::BeginObjectLiteralSetter(_)
        )
    }

    /// Subroutines that produce a first-class function value.
    pub fn is_function_begin(&self) -> bool {
        matches!(
            self,
            Opcode::BeginPlainFunction
                | Opcode::BeginArrowFunction
                | Opcode::BeginGeneratorFunction
                | Opcode::BeginAsyncFunction
                | Opcode::BeginConstructor
        )
    }

    pub fn is_plain_or_arrow_function_begin(&self) -> bool {
        matches!(self, Opcode::BeginPlainFunction | Opcode::BeginArrowFunction)
    }

    pub fn is_getter_or_setter_begin(&self) -> bool {
        matches!(
            self,
            Opcode::BeginClassGetter(_)
                | Opcode::BeginClassSetter(_)
                | Opcode::BeginObjectLiteralGetter(_)
                | Opcode::BeginObjectLiteralSetter(_)
        )
    }

    pub fn is_loop_begin(&self) -> bool {
        matches!(self, Opcode::BeginRepeatLoop(_) | Opcode::BeginWhileLoop)
    }

    pub fn is_named_variable_op(&self) -> bool {
        matches!(
            self,
            Opcode::LoadNamedVariable(_)
                | Opcode::StoreNamedVariable(_)
                | Opcode::DefineNamedVariable(_)
        )
    }

    pub fn is_configure_op(&self) -> bool {
        matches!(self, Opcode::ConfigureProperty(_) | Opcode::ConfigureElement(_))
    }
}

/// A single instruction: opcode plus ordered input and output operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
}

impl Instruction {
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<Variable>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<Variable>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn input(&self, index: usize) -> Variable {
        self.inputs[index]
    }

    /// The single visible output, if any.
    pub fn output(&self) -> Option<Variable> {
        self.outputs.first().copied()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Parameters of a subroutine definition (outputs past the value slot).
    pub fn parameters(&self) -> &[Variable] {
        if self.op.is_function_begin() && !self.outputs.is_empty() {
            &self.outputs[1..]
        } else if self.op.is_subroutine_begin() {
            &self.outputs[..]
        } else {
            &[]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_predicates() {
        assert!(Opcode::BeginPlainFunction.is_block_start());
        assert!(Opcode::EndPlainFunction.is_block_end());
        assert!(!Opcode::LoadNull.is_block_start());

        // Interior boundaries are both end and start, and neither group
        // start nor group end.
        assert!(Opcode::BeginElse.is_block_start());
        assert!(Opcode::BeginElse.is_block_end());
        assert!(!Opcode::BeginElse.is_block_group_start());
        assert!(!Opcode::BeginElse.is_block_group_end());
        assert!(Opcode::BeginCatch.is_block_end());
        assert!(Opcode::BeginFinally.is_block_start());
    }

    #[test]
    fn test_call_and_jump_predicates() {
        assert!(Opcode::CallFunction { guarded: false }.is_call());
        assert!(Opcode::Eval.is_call());
        assert!(!Opcode::CallFunction { guarded: false }.is_guarded());
        assert!(Opcode::CallMethod { name: "m".to_string(), guarded: true }.is_guarded());

        assert!(Opcode::Return.is_jump());
        assert!(Opcode::LoopBreak.is_jump());
        assert!(!Opcode::Nop.is_jump());
    }

    #[test]
    fn test_subroutine_families() {
        assert!(Opcode::BeginArrowFunction.is_subroutine_begin());
        assert!(Opcode::BeginClassGetter("g".to_string()).is_subroutine_begin());
        assert!(!Opcode::BeginIf.is_subroutine_begin());

        assert!(Opcode::BeginPlainFunction.is_plain_or_arrow_function_begin());
        assert!(!Opcode::BeginGeneratorFunction.is_plain_or_arrow_function_begin());
        assert!(Opcode::BeginObjectLiteralSetter("s".to_string()).is_getter_or_setter_begin());
    }

    #[test]
    fn test_instruction_operands() {
        let instr = Instruction::new(Opcode::BinaryOp(BinaryOperator::Add))
            .with_inputs(vec![Variable(0), Variable(1)])
            .with_outputs(vec![Variable(2)]);
        assert_eq!(instr.input(1), Variable(1));
        assert_eq!(instr.output(), Some(Variable(2)));

        let func = Instruction::new(Opcode::BeginPlainFunction)
            .with_outputs(vec![Variable(3), Variable(4), Variable(5)]);
        assert_eq!(func.parameters(), &[Variable(4), Variable(5)]);
    }
}
