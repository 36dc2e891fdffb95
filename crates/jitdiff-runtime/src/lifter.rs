//! Lifting from IL to JavaScript source.
//!
//! Every program is wrapped in a fixed outer frame that resolves a print
//! fallback, defines the checksum container and prints it on every exit
//! path. The frame's names are fixed string literals shared with the
//! checksum instrumentation; no template strings appear in the suffix for
//! engine compatibility.

use jitdiff_ir::{Instruction, Opcode, Program, Variable};
use std::collections::HashSet;
use std::fmt::Write;

pub const PREAMBLE_HEADER: &str = "(function(__compat_global__){\n  const __compat_out__ = ((__compat_global__)['console'] && (__compat_global__)['console'].log) || (__compat_global__)['print'];\n  const __compat_checksum__ = [0xAB0110, {}];\n  try {\n";

pub const PREAMBLE_FOOTER: &str = "  } finally {\n    __compat_out__(\"Checksum: \" + __compat_checksum__[0]);\n  }\n})(globalThis || global);\n";

/// Lifts a program to a complete executable script, preamble included.
pub fn lift(program: &Program) -> String {
    let mut script = String::with_capacity(PREAMBLE_HEADER.len() + program.len() * 24);
    script.push_str(PREAMBLE_HEADER);
    script.push_str(&lift_body(program));
    script.push_str(PREAMBLE_FOOTER);
    script
}

/// Lifts only the program body, without the outer frame.
pub fn lift_body(program: &Program) -> String {
    Lifter::new(program).lift()
}

struct Lifter<'a> {
    program: &'a Program,
    reassigned: HashSet<Variable>,
    out: String,
    depth: usize,
}

fn v(var: Variable) -> String {
    format!("v{}", var.0)
}

fn escape_string(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn float_literal(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        format!("{:?}", value)
    }
}

impl<'a> Lifter<'a> {
    fn new(program: &'a Program) -> Self {
        // Variables written by Reassign or Update need `let`.
        let reassigned: HashSet<Variable> = program
            .iter()
            .filter(|i| matches!(i.op, Opcode::Reassign | Opcode::Update(_)))
            .filter_map(|i| i.inputs.first().copied())
            .collect();
        Self {
            program,
            reassigned,
            out: String::new(),
            depth: 0,
        }
    }

    fn lift(mut self) -> String {
        for instr in self.program.iter() {
            self.lift_instruction(instr);
        }
        self.out
    }

    fn line(&mut self, text: &str) {
        self.out.push_str("    ");
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// `const vN = expr;`, or `let` when the variable is reassigned later.
    fn decl(&mut self, output: Variable, expr: &str) {
        let keyword = if self.reassigned.contains(&output) {
            "let"
        } else {
            "const"
        };
        let text = format!("{} {} = {};", keyword, v(output), expr);
        self.line(&text);
    }

    fn params(outputs: &[Variable]) -> String {
        outputs
            .iter()
            .map(|&p| v(p))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn args(inputs: &[Variable]) -> String {
        Self::params(inputs)
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.depth += 1;
    }

    fn boundary(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
        self.depth += 1;
    }

    fn close(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    fn lift_instruction(&mut self, instr: &Instruction) {
        let inp = &instr.inputs;
        match &instr.op {
            Opcode::Nop => {}

            Opcode::LoadInt(value) => self.decl(instr.outputs[0], &value.to_string()),
            Opcode::LoadFloat(value) => self.decl(instr.outputs[0], &float_literal(*value)),
            Opcode::LoadBool(value) => self.decl(instr.outputs[0], &value.to_string()),
            Opcode::LoadString(value) => {
                self.decl(instr.outputs[0], &format!("\"{}\"", escape_string(value)))
            }
            Opcode::LoadNull => self.decl(instr.outputs[0], "null"),
            Opcode::LoadUndefined => self.decl(instr.outputs[0], "undefined"),
            Opcode::LoadBuiltin(name) => {
                let expr = if name == "print" { "__compat_out__" } else { name };
                self.decl(instr.outputs[0], expr);
            }
            Opcode::LoadChecksumContainer => {
                self.decl(instr.outputs[0], "__compat_checksum__")
            }

            Opcode::LoadNamedVariable(name) => self.decl(instr.outputs[0], name),
            Opcode::StoreNamedVariable(name) => {
                let text = format!("{} = {};", name, v(inp[0]));
                self.line(&text);
            }
            Opcode::DefineNamedVariable(name) => {
                let text = format!("var {} = {};", name, v(inp[0]));
                self.line(&text);
            }

            Opcode::CreateObject => self.decl(instr.outputs[0], "{}"),
            Opcode::CreateArray => {
                self.decl(instr.outputs[0], &format!("[{}]", Self::args(inp)))
            }
            Opcode::CreateIntArray(values) => {
                let elements = values
                    .iter()
                    .map(|x| x.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.decl(instr.outputs[0], &format!("[{}]", elements));
            }
            Opcode::GetProperty(name) => {
                self.decl(instr.outputs[0], &format!("{}.{}", v(inp[0]), name))
            }
            Opcode::SetProperty(name) => {
                let text = format!("{}.{} = {};", v(inp[0]), name, v(inp[1]));
                self.line(&text);
            }
            Opcode::GetElement(index) => {
                self.decl(instr.outputs[0], &format!("{}[{}]", v(inp[0]), index))
            }
            Opcode::SetElement(index) => {
                let text = format!("{}[{}] = {};", v(inp[0]), index, v(inp[1]));
                self.line(&text);
            }
            Opcode::UpdateElement(index, op) => {
                let text = format!("{}[{}] {}= {};", v(inp[0]), index, op.token(), v(inp[1]));
                self.line(&text);
            }
            Opcode::GetComputedProperty => {
                self.decl(instr.outputs[0], &format!("{}[{}]", v(inp[0]), v(inp[1])))
            }
            Opcode::SetComputedProperty => {
                let text = format!("{}[{}] = {};", v(inp[0]), v(inp[1]), v(inp[2]));
                self.line(&text);
            }
            Opcode::ConfigureProperty(name) => {
                let text = format!(
                    "Object.defineProperty({}, \"{}\", {{ value: {}, configurable: true }});",
                    v(inp[0]),
                    name,
                    v(inp[1])
                );
                self.line(&text);
            }
            Opcode::ConfigureElement(index) => {
                let text = format!(
                    "Object.defineProperty({}, {}, {{ value: {}, configurable: true }});",
                    v(inp[0]),
                    index,
                    v(inp[1])
                );
                self.line(&text);
            }

            Opcode::BinaryOp(op) => self.decl(
                instr.outputs[0],
                &format!("{} {} {}", v(inp[0]), op.token(), v(inp[1])),
            ),
            Opcode::UnaryOp(op) => {
                self.decl(instr.outputs[0], &format!("{}{}", op.token(), v(inp[0])))
            }
            Opcode::Compare(op) => self.decl(
                instr.outputs[0],
                &format!("{} {} {}", v(inp[0]), op.token(), v(inp[1])),
            ),
            Opcode::Update(op) => {
                let text = format!("{} {}= {};", v(inp[0]), op.token(), v(inp[1]));
                self.line(&text);
            }
            Opcode::Reassign => {
                let text = format!("{} = {};", v(inp[0]), v(inp[1]));
                self.line(&text);
            }

            Opcode::CallFunction { guarded } => {
                let call = format!("{}({})", v(inp[0]), Self::args(&inp[1..]));
                self.lift_call(instr, call, *guarded);
            }
            Opcode::CallMethod { name, guarded } => {
                let call = format!("{}.{}({})", v(inp[0]), name, Self::args(&inp[1..]));
                self.lift_call(instr, call, *guarded);
            }
            Opcode::Construct { guarded } => {
                let call = format!("new {}({})", v(inp[0]), Self::args(&inp[1..]));
                self.lift_call(instr, call, *guarded);
            }

            Opcode::Return => {
                if let Some(&value) = inp.first() {
                    let text = format!("return {};", v(value));
                    self.line(&text);
                } else {
                    self.line("return;");
                }
            }
            Opcode::ThrowException => {
                let text = format!("throw {};", v(inp[0]));
                self.line(&text);
            }
            Opcode::LoopBreak => self.line("break;"),
            Opcode::LoopContinue => self.line("continue;"),
            Opcode::Await => {
                self.decl(instr.outputs[0], &format!("await {}", v(inp[0])))
            }
            Opcode::Eval => {
                let text = format!("eval({});", v(inp[0]));
                self.line(&text);
            }

            Opcode::BeginPlainFunction | Opcode::BeginConstructor => {
                let text = format!(
                    "function {}({}) {{",
                    v(instr.outputs[0]),
                    Self::params(&instr.outputs[1..])
                );
                self.open(&text);
            }
            Opcode::EndPlainFunction | Opcode::EndConstructor => self.close("}"),
            Opcode::BeginArrowFunction => {
                let text = format!(
                    "const {} = ({}) => {{",
                    v(instr.outputs[0]),
                    Self::params(&instr.outputs[1..])
                );
                self.open(&text);
            }
            Opcode::EndArrowFunction => self.close("};"),
            Opcode::BeginGeneratorFunction => {
                let text = format!(
                    "function* {}({}) {{",
                    v(instr.outputs[0]),
                    Self::params(&instr.outputs[1..])
                );
                self.open(&text);
            }
            Opcode::EndGeneratorFunction => self.close("}"),
            Opcode::BeginAsyncFunction => {
                let text = format!(
                    "async function {}({}) {{",
                    v(instr.outputs[0]),
                    Self::params(&instr.outputs[1..])
                );
                self.open(&text);
            }
            Opcode::EndAsyncFunction => self.close("}"),

            Opcode::BeginClassDefinition => {
                let text = format!("const {} = class {{", v(instr.outputs[0]));
                self.open(&text);
            }
            Opcode::EndClassDefinition => self.close("};"),
            Opcode::BeginClassConstructor => {
                let text = format!("constructor({}) {{", Self::params(&instr.outputs));
                self.open(&text);
            }
            Opcode::EndClassConstructor => self.close("}"),
            Opcode::BeginClassMethod(name) => {
                let text = format!("{}({}) {{", name, Self::params(&instr.outputs));
                self.open(&text);
            }
            Opcode::EndClassMethod => self.close("}"),
            Opcode::BeginClassGetter(name) => {
                let text = format!("get {}() {{", name);
                self.open(&text);
            }
            Opcode::EndClassGetter => self.close("}"),
            Opcode::BeginClassSetter(name) => {
                let text = format!("set {}({}) {{", name, Self::params(&instr.outputs));
                self.open(&text);
            }
            Opcode::EndClassSetter => self.close("}"),
            Opcode::BeginClassStaticInitializer => self.open("static {"),
            Opcode::EndClassStaticInitializer => self.close("}"),

            Opcode::BeginObjectLiteral => {
                let text = format!("const {} = {{", v(instr.outputs[0]));
                self.open(&text);
            }
            Opcode::EndObjectLiteral => self.close("};"),
            Opcode::ObjectLiteralProperty(name) => {
                let text = format!("{}: {},", name, v(inp[0]));
                self.line(&text);
            }
            Opcode::BeginObjectLiteralMethod(name) => {
                let text = format!("{}({}) {{", name, Self::params(&instr.outputs));
                self.open(&text);
            }
            Opcode::EndObjectLiteralMethod => self.close("},"),
            Opcode::BeginObjectLiteralComputedMethod => {
                let text = format!("[{}]({}) {{", v(inp[0]), Self::params(&instr.outputs));
                self.open(&text);
            }
            Opcode::EndObjectLiteralComputedMethod => self.close("},"),
            Opcode::BeginObjectLiteralGetter(name) => {
                let text = format!("get {}() {{", name);
                self.open(&text);
            }
            Opcode::EndObjectLiteralGetter => self.close("},"),
            Opcode::BeginObjectLiteralSetter(name) => {
                let text = format!("set {}({}) {{", name, Self::params(&instr.outputs));
                self.open(&text);
            }
            Opcode::EndObjectLiteralSetter => self.close("},"),

            Opcode::BeginIf => {
                let text = format!("if ({}) {{", v(inp[0]));
                self.open(&text);
            }
            Opcode::BeginElse => self.boundary("} else {"),
            Opcode::EndIf => self.close("}"),
            Opcode::BeginRepeatLoop(iterations) => {
                let counter = v(instr.outputs[0]);
                let text = format!(
                    "for (let {c} = 0; {c} < {n}; {c}++) {{",
                    c = counter,
                    n = iterations
                );
                self.open(&text);
            }
            Opcode::EndRepeatLoop => self.close("}"),
            Opcode::BeginWhileLoop => {
                let text = format!("while ({}) {{", v(inp[0]));
                self.open(&text);
            }
            Opcode::EndWhileLoop => self.close("}"),
            Opcode::BeginTry => self.open("try {"),
            Opcode::BeginCatch => {
                let text = format!("}} catch ({}) {{", v(instr.outputs[0]));
                self.boundary(&text);
            }
            Opcode::BeginFinally => self.boundary("} finally {"),
            Opcode::EndTryCatchFinally => self.close("}"),
            Opcode::BeginCodeString => {
                let text = format!("const {} = `", v(instr.outputs[0]));
                self.open(&text);
            }
            Opcode::EndCodeString => self.close("`;"),
        }
    }

    fn lift_call(&mut self, instr: &Instruction, call: String, guarded: bool) {
        match (instr.output(), guarded) {
            (Some(out), false) => self.decl(out, &call),
            (Some(out), true) => {
                let mut text = String::new();
                let _ = write!(text, "let {o}; try {{ {o} = {c}; }} catch (e) {{}}", o = v(out), c = call);
                self.line(&text);
            }
            (None, false) => {
                let text = format!("{};", call);
                self.line(&text);
            }
            (None, true) => {
                let text = format!("try {{ {}; }} catch (e) {{}}", call);
                self.line(&text);
            }
        }
    }
}
