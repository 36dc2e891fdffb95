//! The mutator interface.

use jitdiff_ir::Program;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Per-mutator statistics. Plain atomics so mutators can be shared across
/// workers.
#[derive(Debug, Default)]
pub struct MutatorStats {
    failed_to_generate: AtomicU64,
    succeeded: AtomicU64,
    added_instructions: AtomicI64,
}

impl MutatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self) {
        self.failed_to_generate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, added_instructions: i64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.added_instructions
            .fetch_add(added_instructions, Ordering::Relaxed);
    }

    pub fn failures(&self) -> u64 {
        self.failed_to_generate.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn total_added_instructions(&self) -> i64 {
        self.added_instructions.load(Ordering::Relaxed)
    }
}

/// A program transformation with a stable identity.
///
/// `mutate` returns `None` iff no candidate site exists. A returned
/// program is always a new object whose contributor set is the seed's
/// plus this mutator's name.
pub trait Mutator: Send + Sync {
    fn name(&self) -> &'static str;

    fn stats(&self) -> &MutatorStats;

    fn mutate(&self, seed: &Program, rng: &mut ChaCha8Rng) -> Option<Program>;

    /// Whether the transformation preserves the observable output of the
    /// program when interpreted. Differential comparison is only sound
    /// for preserving mutators.
    fn is_preserving(&self) -> bool {
        false
    }

    fn failed_to_generate(&self) {
        self.stats().record_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate() {
        let stats = MutatorStats::new();
        stats.record_failure();
        stats.record_failure();
        stats.record_success(12);
        stats.record_success(-3);
        assert_eq!(stats.failures(), 2);
        assert_eq!(stats.successes(), 2);
        assert_eq!(stats.total_added_instructions(), 9);
    }
}
