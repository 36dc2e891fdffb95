//! Shared program corpus.

use jitdiff_core::Result;
use jitdiff_ir::Program;
use parking_lot::RwLock;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A shared pool of seed programs. Samples are drawn atomically; workers
/// never observe a partially added program.
#[derive(Default)]
pub struct Corpus {
    programs: RwLock<Vec<Arc<Program>>>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.programs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.read().is_empty()
    }

    pub fn add(&self, program: Program) {
        self.programs.write().push(Arc::new(program));
    }

    /// Draws one program uniformly.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> Option<Arc<Program>> {
        let programs = self.programs.read();
        if programs.is_empty() {
            return None;
        }
        Some(programs[rng.gen_range(0..programs.len())].clone())
    }

    /// Draws a program whose contributor set lists none of `excluded`.
    /// Gives up after `max_attempts` draws.
    pub fn sample_excluding(
        &self,
        rng: &mut ChaCha8Rng,
        excluded: &[&str],
        max_attempts: usize,
    ) -> Option<Arc<Program>> {
        for _ in 0..max_attempts {
            let candidate = self.sample(rng)?;
            if !candidate.contributors().contains_any(excluded) {
                return Some(candidate);
            }
        }
        None
    }

    /// Loads every `.bin` program from a directory.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match Program::from_bytes(&bytes) {
                Ok(program) => {
                    self.add(program);
                    loaded += 1;
                }
                Err(e) => warn!("skipping corrupt corpus entry {:?}: {}", path, e),
            }
        }
        debug!(loaded, "corpus loaded");
        Ok(loaded)
    }

    /// Writes every program to a directory as `<id>.bin`.
    pub fn save_dir(&self, dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(dir)?;
        let programs = self.programs.read();
        for program in programs.iter() {
            let bytes = program.to_bytes()?;
            std::fs::write(dir.join(format!("{}.bin", program.id())), bytes)?;
        }
        Ok(programs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitdiff_ir::ProgramBuilder;
    use rand::SeedableRng;

    fn program_with_contributor(name: Option<&str>) -> Program {
        let mut b = ProgramBuilder::new();
        b.load_int(1);
        if let Some(name) = name {
            b.add_contributor(name);
        }
        b.finalize()
    }

    #[test]
    fn test_sample_excluding_skips_tainted_seeds() {
        let corpus = Corpus::new();
        corpus.add(program_with_contributor(Some("neutral_loop")));
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        assert!(corpus
            .sample_excluding(&mut rng, &["neutral_loop"], 10)
            .is_none());

        corpus.add(program_with_contributor(None));
        let clean = corpus
            .sample_excluding(&mut rng, &["neutral_loop"], 100)
            .unwrap();
        assert!(!clean.contributors().contains("neutral_loop"));
    }

    #[test]
    fn test_empty_corpus_samples_nothing() {
        let corpus = Corpus::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(corpus.sample(&mut rng).is_none());
    }

    #[test]
    fn test_directory_round_trip() {
        let corpus = Corpus::new();
        corpus.add(program_with_contributor(Some("checksum_ops")));
        corpus.add(program_with_contributor(None));

        let dir = std::env::temp_dir().join(format!("jitdiff-corpus-{}", std::process::id()));
        corpus.save_dir(&dir).unwrap();

        let restored = Corpus::new();
        let loaded = restored.load_dir(&dir).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(restored.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
