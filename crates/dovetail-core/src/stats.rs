//! Fact store statistics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Running counters kept by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreCounters {
    pub asserted: u64,
    pub duplicates_rejected: u64,
    pub retracted: u64,
    pub modified: u64,
    pub reclaimed: u64,
    pub gc_runs: u64,
    pub alpha_matches: u64,
    pub match_retractions: u64,
    pub evaluation_errors: u64,
    pub guard_rejections: u64,
}

/// Snapshot of the store's state and lifetime counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactStoreStats {
    pub live_facts: usize,
    pub garbage_facts: usize,
    pub templates: usize,
    pub patterns: usize,
    pub pattern_nodes: usize,
    pub hash_capacity: usize,
    pub hash_resizes: u64,
    pub atoms: usize,
    pub next_index: u64,
    pub asserted: u64,
    pub duplicates_rejected: u64,
    pub retracted: u64,
    pub modified: u64,
    pub reclaimed: u64,
    pub gc_runs: u64,
    pub alpha_matches: u64,
    pub match_retractions: u64,
    pub evaluation_errors: u64,
    pub guard_rejections: u64,
}

impl FactStoreStats {
    /// Share of asserts that were rejected as duplicates, in percent
    pub fn duplicate_rate(&self) -> f64 {
        let attempts = self.asserted + self.duplicates_rejected;
        if attempts == 0 {
            return 0.0;
        }
        self.duplicates_rejected as f64 / attempts as f64 * 100.0
    }

    /// Live facts per hash bucket
    pub fn hash_load_factor(&self) -> f64 {
        if self.hash_capacity == 0 {
            return 0.0;
        }
        self.live_facts as f64 / self.hash_capacity as f64
    }
}

impl fmt::Display for FactStoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Fact Store Statistics ===")?;
        writeln!(f)?;
        writeln!(f, "Facts:")?;
        writeln!(f, "  Live: {}", self.live_facts)?;
        writeln!(f, "  Awaiting reclamation: {}", self.garbage_facts)?;
        writeln!(f, "  Next index: f-{}", self.next_index)?;
        writeln!(f, "  Asserted: {}", self.asserted)?;
        writeln!(f, "  Duplicates rejected: {} ({:.1}%)", self.duplicates_rejected, self.duplicate_rate())?;
        writeln!(f, "  Retracted: {}", self.retracted)?;
        writeln!(f, "  Modified: {}", self.modified)?;
        writeln!(f, "  Reclaimed: {} in {} collections", self.reclaimed, self.gc_runs)?;
        writeln!(f)?;
        writeln!(f, "Hash index:")?;
        writeln!(f, "  Buckets: {}", self.hash_capacity)?;
        writeln!(f, "  Load factor: {:.3}", self.hash_load_factor())?;
        writeln!(f, "  Resizes: {}", self.hash_resizes)?;
        writeln!(f)?;
        writeln!(f, "Pattern network:")?;
        writeln!(f, "  Templates: {}", self.templates)?;
        writeln!(f, "  Patterns: {}", self.patterns)?;
        writeln!(f, "  Nodes: {}", self.pattern_nodes)?;
        writeln!(f, "  Alpha matches: {}", self.alpha_matches)?;
        writeln!(f, "  Match retractions: {}", self.match_retractions)?;
        writeln!(f, "  Evaluation errors: {}", self.evaluation_errors)?;
        writeln!(f, "  Reentrant calls refused: {}", self.guard_rejections)?;
        write!(f, "  Atoms: {}", self.atoms)
    }
}
