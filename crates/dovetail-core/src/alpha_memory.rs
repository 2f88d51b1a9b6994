//! Alpha memories: the join network that records pattern matches
//!
//! ```text
//! Fact → Pattern tree → AlphaMatch → Alpha memory (per pattern entry)
//!                                        ↓
//!                             matches kept until the fact is retracted
//! ```
//!
//! `AlphaMemoryNetwork` is the default `JoinNetwork` of a fact store. It keeps every
//! match per pattern entry, so callers can ask which facts currently satisfy a
//! pattern and where its multifield elements landed.

use crate::error::{EvalError, fatal_invariant};
use crate::fact_store::FactHandle;
use crate::pattern::{AlphaMatch, JoinNetwork, MatchHandle, MultifieldMarker, PatternEntryId};
use dovetail_types::FactId;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

/// One recorded match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaMatchRecord {
    pub handle: MatchHandle,
    pub fact: FactHandle,
    pub index: FactId,
    pub entry: PatternEntryId,
    pub markers: Vec<MultifieldMarker>,
}

/// Matches of one pattern entry
#[derive(Debug, Clone)]
pub struct AlphaMemory {
    pub entry: PatternEntryId,
    /// Ordered by handle, which is the order matches arrived in
    matches: BTreeMap<MatchHandle, AlphaMatchRecord>,
    /// Number of times this memory has been read
    pub access_count: u64,
    pub facts_added: u64,
    pub facts_removed: u64,
}

impl AlphaMemory {
    pub fn new(entry: PatternEntryId) -> Self {
        Self { entry, matches: BTreeMap::new(), access_count: 0, facts_added: 0, facts_removed: 0 }
    }

    fn add(&mut self, record: AlphaMatchRecord) {
        self.facts_added += 1;
        self.matches.insert(record.handle, record);
    }

    fn remove(&mut self, handle: MatchHandle) -> Option<AlphaMatchRecord> {
        let removed = self.matches.remove(&handle);
        if removed.is_some() {
            self.facts_removed += 1;
        }
        removed
    }

    /// Current matches in arrival order (increments the access counter)
    pub fn get_matches(&mut self) -> impl Iterator<Item = &AlphaMatchRecord> {
        self.access_count += 1;
        self.matches.values()
    }

    pub fn matches(&self) -> impl Iterator<Item = &AlphaMatchRecord> {
        self.matches.values()
    }

    pub fn count(&self) -> usize {
        self.matches.len()
    }

    pub fn get_stats(&self) -> AlphaMemoryStats {
        AlphaMemoryStats {
            entry: self.entry,
            matching_facts_count: self.matches.len(),
            access_count: self.access_count,
            facts_added: self.facts_added,
            facts_removed: self.facts_removed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaMemoryStats {
    pub entry: PatternEntryId,
    pub matching_facts_count: usize,
    pub access_count: u64,
    pub facts_added: u64,
    pub facts_removed: u64,
}

/// Join network keeping one alpha memory per pattern entry
#[derive(Debug, Default)]
pub struct AlphaMemoryNetwork {
    memories: HashMap<PatternEntryId, AlphaMemory>,
    /// Which memory holds each live match
    owners: HashMap<MatchHandle, PatternEntryId>,
    next_handle: u64,
    total_matches_found: u64,
    total_matches_retracted: u64,
    retraction_calls: u64,
}

impl AlphaMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self, entry: PatternEntryId) -> Option<&AlphaMemory> {
        self.memories.get(&entry)
    }

    pub fn memory_mut(&mut self, entry: PatternEntryId) -> Option<&mut AlphaMemory> {
        self.memories.get_mut(&entry)
    }

    pub fn match_count(&self, entry: PatternEntryId) -> usize {
        self.memories.get(&entry).map_or(0, AlphaMemory::count)
    }

    /// Indices of the facts currently matching `entry`, one per match
    pub fn matching_indices(&self, entry: PatternEntryId) -> Vec<FactId> {
        self.memories
            .get(&entry)
            .map(|memory| memory.matches().map(|record| record.index).collect())
            .unwrap_or_default()
    }

    /// Matches recorded for one fact across every memory
    pub fn matches_for_fact(&self, fact: FactHandle) -> Vec<&AlphaMatchRecord> {
        let mut records: Vec<_> = self
            .memories
            .values()
            .flat_map(AlphaMemory::matches)
            .filter(|record| record.fact == fact)
            .collect();
        records.sort_by_key(|record| record.handle);
        records
    }

    pub fn live_matches(&self) -> usize {
        self.owners.len()
    }

    pub fn total_matches_found(&self) -> u64 {
        self.total_matches_found
    }

    pub fn total_matches_retracted(&self) -> u64 {
        self.total_matches_retracted
    }

    /// Number of `retract_all_matches` calls received
    pub fn retraction_calls(&self) -> u64 {
        self.retraction_calls
    }

    pub fn get_stats(&self) -> Vec<AlphaMemoryStats> {
        let mut stats: Vec<_> = self.memories.values().map(AlphaMemory::get_stats).collect();
        stats.sort_by_key(|stats| stats.entry);
        stats
    }
}

impl JoinNetwork for AlphaMemoryNetwork {
    fn push_alpha_match(&mut self, alpha_match: AlphaMatch<'_>) -> MatchHandle {
        self.next_handle += 1;
        let handle = MatchHandle(self.next_handle);
        self.total_matches_found += 1;
        self.owners.insert(handle, alpha_match.entry);
        self.memories
            .entry(alpha_match.entry)
            .or_insert_with(|| AlphaMemory::new(alpha_match.entry))
            .add(AlphaMatchRecord {
                handle,
                fact: alpha_match.fact,
                index: alpha_match.index,
                entry: alpha_match.entry,
                markers: alpha_match.markers.to_vec(),
            });
        handle
    }

    #[instrument(level = "debug", skip(self, matches), fields(matches = matches.len()))]
    fn retract_all_matches(&mut self, fact: FactHandle, matches: &[MatchHandle]) -> Result<(), EvalError> {
        self.retraction_calls += 1;
        for handle in matches {
            let Some(entry) = self.owners.remove(handle) else {
                fatal_invariant("alpha_memory", format!("retracting unknown match {handle:?} of {fact}"));
            };
            let removed = self.memories.get_mut(&entry).and_then(|memory| memory.remove(*handle));
            match removed {
                Some(record) if record.fact == fact => self.total_matches_retracted += 1,
                _ => fatal_invariant("alpha_memory", format!("match {handle:?} is not owned by {fact}")),
            }
        }
        debug!(%fact, "Retracted alpha matches");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dovetail_types::FactValue;

    fn push(network: &mut AlphaMemoryNetwork, fact: FactHandle, index: FactId, entry: u32) -> MatchHandle {
        let values = [FactValue::Integer(1)];
        network.push_alpha_match(AlphaMatch {
            fact,
            index,
            entry: PatternEntryId(entry),
            values: &values,
            markers: &[],
        })
    }

    #[test]
    fn test_records_and_retracts() {
        let mut network = AlphaMemoryNetwork::new();
        let a = FactHandle::new(0, 0);
        let b = FactHandle::new(1, 0);
        let a1 = push(&mut network, a, 1, 0);
        let a2 = push(&mut network, a, 1, 1);
        push(&mut network, b, 2, 0);

        assert_eq!(network.matching_indices(PatternEntryId(0)), vec![1, 2]);
        assert_eq!(network.matches_for_fact(a).len(), 2);

        network.retract_all_matches(a, &[a1, a2]).unwrap();
        assert_eq!(network.matching_indices(PatternEntryId(0)), vec![2]);
        assert_eq!(network.match_count(PatternEntryId(1)), 0);
        assert_eq!(network.live_matches(), 1);
        assert_eq!(network.total_matches_retracted(), 2);

        let stats = network.get_stats();
        assert_eq!(stats[0].facts_added, 2);
        assert_eq!(stats[0].facts_removed, 1);
    }

    #[test]
    #[should_panic(expected = "internal consistency error")]
    fn test_foreign_match_is_fatal() {
        let mut network = AlphaMemoryNetwork::new();
        let owned = push(&mut network, FactHandle::new(0, 0), 1, 0);
        let _ = network.retract_all_matches(FactHandle::new(5, 0), &[owned]);
    }
}
