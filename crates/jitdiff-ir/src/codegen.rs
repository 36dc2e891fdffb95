//! Generation of small, self-contained code fragments.
//!
//! Neutral blocks have no data dependency on the surrounding program and
//! no observable side effect; they exist purely to give the JIT something
//! to chew on.

use crate::builder::ProgramBuilder;
use crate::instruction::{BinaryOperator, Comparator, UnaryOperator, Variable};
use crate::program::Program;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const BINARY_OPS: [BinaryOperator; 8] = [
    BinaryOperator::Add,
    BinaryOperator::Sub,
    BinaryOperator::Mul,
    BinaryOperator::BitAnd,
    BinaryOperator::BitOr,
    BinaryOperator::Xor,
    BinaryOperator::LShift,
    BinaryOperator::RShift,
];

const COMPARATORS: [Comparator; 4] = [
    Comparator::StrictEqual,
    Comparator::LessThan,
    Comparator::GreaterThan,
    Comparator::NotEqual,
];

/// Emits `count` random literals.
pub fn build_values(b: &mut ProgramBuilder, rng: &mut ChaCha8Rng, count: usize) -> Vec<Variable> {
    (0..count)
        .map(|_| match rng.gen_range(0..4) {
            0 => b.load_int(rng.gen_range(-0x8000..0x8000)),
            1 => b.load_float(rng.gen_range(-100.0..100.0)),
            2 => b.load_bool(rng.gen()),
            _ => b.load_int(rng.gen_range(0..256)),
        })
        .collect()
}

/// Emits a neutral block of roughly `size` instructions that only touches
/// variables it defines itself.
pub fn neutral_block(b: &mut ProgramBuilder, rng: &mut ChaCha8Rng, size: usize) {
    let mut pool = build_values(b, rng, 2);
    let mut remaining = size.saturating_sub(pool.len());

    while remaining > 0 {
        remaining -= 1;
        match rng.gen_range(0..6) {
            0 => {
                let v = b.load_int(rng.gen_range(-0x8000..0x8000));
                pool.push(v);
            }
            1 => {
                let lhs = pool[rng.gen_range(0..pool.len())];
                let rhs = pool[rng.gen_range(0..pool.len())];
                let op = BINARY_OPS[rng.gen_range(0..BINARY_OPS.len())];
                pool.push(b.binary(lhs, op, rhs));
            }
            2 => {
                let lhs = pool[rng.gen_range(0..pool.len())];
                let rhs = pool[rng.gen_range(0..pool.len())];
                let op = COMPARATORS[rng.gen_range(0..COMPARATORS.len())];
                pool.push(b.compare(lhs, op, rhs));
            }
            3 => {
                if rng.gen() {
                    let v = pool[rng.gen_range(0..pool.len())];
                    pool.push(b.unary(UnaryOperator::BitwiseNot, v));
                } else {
                    let target = pool[rng.gen_range(0..pool.len())];
                    let rhs = pool[rng.gen_range(0..pool.len())];
                    let op = BINARY_OPS[rng.gen_range(0..BINARY_OPS.len())];
                    b.update(target, op, rhs);
                }
            }
            4 => {
                let a = pool[rng.gen_range(0..pool.len())];
                let c = pool[rng.gen_range(0..pool.len())];
                let array = b.create_array(&[a, c]);
                pool.push(b.get_element(array, rng.gen_range(0..2)));
            }
            _ => {
                let values: Vec<i64> = (0..rng.gen_range(2..5))
                    .map(|_| rng.gen_range(0..1000))
                    .collect();
                let array = b.create_int_array(values);
                pool.push(b.get_element(array, 0));
            }
        }
    }
}

/// A free-standing neutral program of roughly `size` instructions.
pub fn small_program(rng: &mut ChaCha8Rng, size: usize) -> Program {
    let mut b = ProgramBuilder::new();
    neutral_block(&mut b, rng, size);
    b.finalize()
}

/// A fresh program exercising arithmetic inside a small function that is
/// called a few times. Used by the generative engine to seed the corpus.
pub fn seed_program(rng: &mut ChaCha8Rng, size: usize) -> Program {
    let mut b = ProgramBuilder::new();
    let f = b.build_plain_function(2, |b, params| {
        let op = BINARY_OPS[rng.gen_range(0..BINARY_OPS.len())];
        let mixed = b.binary(params[0], op, params[1]);
        neutral_block(b, rng, size / 2);
        b.do_return(Some(mixed));
    });
    let calls = rng.gen_range(1..4);
    let mut last = None;
    for _ in 0..calls {
        let a = b.load_int(rng.gen_range(-1000..1000));
        let c = b.load_int(rng.gen_range(-1000..1000));
        last = Some(b.call_function(f, &[a, c]));
    }
    if let Some(result) = last {
        let print = b.load_builtin("print");
        b.call_function(print, &[result]);
    }
    b.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_small_program_is_reproducible() {
        let a = small_program(&mut ChaCha8Rng::seed_from_u64(7), 10);
        let b = small_program(&mut ChaCha8Rng::seed_from_u64(7), 10);
        assert_eq!(a.instructions(), b.instructions());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_neutral_block_has_no_side_effects() {
        let program = small_program(&mut ChaCha8Rng::seed_from_u64(11), 30);
        for instr in program.iter() {
            assert!(!instr.op.is_call());
            assert!(!instr.op.is_named_variable_op());
            assert!(!matches!(instr.op, crate::instruction::Opcode::LoadBuiltin(_)));
        }
    }

    #[test]
    fn test_seed_program_prints() {
        let program = seed_program(&mut ChaCha8Rng::seed_from_u64(3), 10);
        assert!(program
            .iter()
            .any(|i| matches!(&i.op, crate::instruction::Opcode::LoadBuiltin(n) if n == "print")));
        assert!(program.iter().any(|i| i.op.is_call()));
    }
}
