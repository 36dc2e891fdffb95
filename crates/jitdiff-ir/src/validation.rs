//! Validation for IL programs.

use crate::program::Program;
use jitdiff_core::{Error, Result};
use std::collections::HashSet;

/// Validate that a program is structurally well-formed: blocks balance,
/// interior boundaries sit inside a matching group, and instruction inputs
/// only reference variables defined earlier.
pub fn validate_program(program: &Program) -> Result<()> {
    let mut depth: i64 = 0;
    let mut defined: HashSet<crate::instruction::Variable> = HashSet::new();

    for (i, instr) in program.iter().enumerate() {
        let op = &instr.op;
        if op.is_block_end() {
            depth -= 1;
            if depth < 0 {
                return Err(Error::Validation(format!(
                    "unmatched block end at instruction {}",
                    i
                )));
            }
        }
        if op.is_block_start() {
            depth += 1;
        }

        for input in &instr.inputs {
            if !defined.contains(input) {
                return Err(Error::Validation(format!(
                    "instruction {} reads undefined variable {}",
                    i, input
                )));
            }
        }
        for output in &instr.outputs {
            if !defined.insert(*output) {
                return Err(Error::Validation(format!(
                    "instruction {} redefines variable {}",
                    i, output
                )));
            }
        }
    }

    if depth != 0 {
        return Err(Error::Validation(format!(
            "{} unterminated block(s) at end of program",
            depth
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::instruction::{Instruction, Opcode, Variable};

    #[test]
    fn test_validate_built_program() {
        let mut b = ProgramBuilder::new();
        let cond = b.load_bool(false);
        b.build_if(cond, |b| {
            b.nop();
        });
        assert!(validate_program(&b.finalize()).is_ok());
    }

    #[test]
    fn test_validate_unterminated_block() {
        let program = Program::new(vec![Instruction::new(Opcode::BeginTry)]);
        assert!(validate_program(&program).is_err());
    }

    #[test]
    fn test_validate_undefined_variable() {
        let program = Program::new(vec![Instruction::new(Opcode::Return)
            .with_inputs(vec![Variable(3)])]);
        assert!(validate_program(&program).is_err());
    }
}
