//! Program structure and exact block discovery.

use crate::instruction::Instruction;
use jitdiff_core::ProgramId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Index;

/// The set of mutator identities that participated in producing a program.
/// Used to prevent self-feedback loops and to bias seed sampling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributors(BTreeSet<String>);

impl Contributors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str) {
        self.0.insert(name.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn contains_any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.contains(n))
    }

    pub fn union(&mut self, other: &Contributors) {
        for name in &other.0 {
            self.0.insert(name.clone());
        }
    }

    pub fn is_superset_of(&self, other: &Contributors) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

/// A `(head, tail)` block pair plus any interior boundaries at the same
/// nesting level (else arms, catch and finally clauses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGroup {
    pub head: usize,
    pub tail: usize,
    pub interior: Vec<usize>,
}

impl BlockGroup {
    /// Indices strictly inside the group, boundaries excluded.
    pub fn interior_range(&self) -> std::ops::Range<usize> {
        self.head + 1..self.tail
    }

    pub fn len(&self) -> usize {
        self.tail - self.head + 1
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.head + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.head && index <= self.tail
    }
}

/// An immutable ordered sequence of instructions plus provenance metadata.
///
/// Every construction allocates a fresh `ProgramId`; mutation never updates
/// a program in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    id: ProgramId,
    instructions: Vec<Instruction>,
    contributors: Contributors,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            id: ProgramId::new(),
            instructions,
            contributors: Contributors::new(),
        }
    }

    pub fn with_contributors(instructions: Vec<Instruction>, contributors: Contributors) -> Self {
        Self {
            id: ProgramId::new(),
            instructions,
            contributors,
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn contributors(&self) -> &Contributors {
        &self.contributors
    }

    pub fn contributors_mut(&mut self) -> &mut Contributors {
        &mut self.contributors
    }

    /// Index of the matching group end for the block group starting at
    /// `head`. Interior boundaries (else/catch/finally) are skipped.
    ///
    /// Panics if `head` is not a block group start; nesting is strict, so
    /// a well-formed program always has a matching end.
    pub fn find_block_end(&self, head: usize) -> usize {
        assert!(
            self.instructions[head].op.is_block_group_start(),
            "find_block_end called on non-block instruction at {}",
            head
        );
        let mut depth = 1usize;
        for i in head + 1..self.instructions.len() {
            let op = &self.instructions[i].op;
            if op.is_block_end() {
                depth -= 1;
            }
            if depth == 0 && !op.is_block_start() {
                return i;
            }
            if op.is_block_start() {
                depth += 1;
            }
        }
        panic!("unterminated block starting at {}", head);
    }

    /// All block groups in the program, in order of their head instruction.
    pub fn find_all_block_groups(&self) -> Vec<BlockGroup> {
        let mut groups = Vec::new();
        for (i, instr) in self.instructions.iter().enumerate() {
            if !instr.op.is_block_group_start() {
                continue;
            }
            let tail = self.find_block_end(i);
            let mut interior = Vec::new();
            let mut depth = 1usize;
            for j in i + 1..tail {
                let op = &self.instructions[j].op;
                if op.is_block_end() {
                    depth -= 1;
                }
                if depth == 0 && op.is_block_start() {
                    // An interior boundary of this group.
                    interior.push(j);
                }
                if op.is_block_start() {
                    depth += 1;
                }
            }
            groups.push(BlockGroup { head: i, tail, interior });
        }
        groups
    }

    /// All subroutine block groups, at any nesting depth.
    pub fn find_all_subroutines(&self) -> Vec<BlockGroup> {
        self.find_all_block_groups()
            .into_iter()
            .filter(|g| self.instructions[g.head].op.is_subroutine_begin())
            .collect()
    }

    /// Subroutine groups not nested inside another subroutine.
    pub fn find_outermost_subroutines(&self) -> Vec<BlockGroup> {
        let all = self.find_all_subroutines();
        let mut outermost: Vec<BlockGroup> = Vec::new();
        for group in all {
            if outermost.iter().all(|o| !o.contains(group.head)) {
                outermost.push(group);
            }
        }
        outermost
    }

    /// Serialize the program to bytes.
    pub fn to_bytes(&self) -> jitdiff_core::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a program from bytes. The program receives a fresh id:
    /// identity is a property of the in-memory object, not the encoding.
    pub fn from_bytes(bytes: &[u8]) -> jitdiff_core::Result<Self> {
        let mut program: Program = bincode::deserialize(bytes)?;
        program.id = ProgramId::new();
        Ok(program)
    }
}

impl Index<usize> for Program {
    type Output = Instruction;

    fn index(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }
}
