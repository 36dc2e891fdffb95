//! Per-program execution cache.

use jitdiff_core::{Execution, ProgramId};
use std::collections::HashMap;

/// Caches execution records by program identity. Owned by an engine;
/// entries are discarded together with the program that produced them.
#[derive(Debug, Default)]
pub struct ExecutionCache {
    entries: HashMap<ProgramId, Execution>,
}

impl ExecutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ProgramId) -> Option<&Execution> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: ProgramId, execution: Execution) {
        self.entries.insert(id, execution);
    }

    pub fn remove(&mut self, id: ProgramId) -> Option<Execution> {
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
