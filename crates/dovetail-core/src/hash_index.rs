//! Content hash index over asserted facts
//!
//! Chained buckets keyed by a 64-bit content hash (template + values). The table
//! starts at a configurable floor, doubles plus one whenever the live count exceeds
//! the bucket count and drops back to the floor once it is empty.

use crate::fact_store::FactHandle;
use crate::template::TemplateId;
use dovetail_types::FactValue;
use std::hash::{BuildHasher, Hash, Hasher};
use tracing::debug;

/// One indexed fact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub hash: u64,
    pub fact: FactHandle,
}

#[derive(Debug)]
pub struct FactHashIndex {
    buckets: Vec<Vec<HashEntry>>,
    count: usize,
    floor: usize,
    resizes: u64,
    hasher: ahash::RandomState,
}

impl FactHashIndex {
    /// Create an index with `floor` buckets (rounded up to an odd number)
    pub fn new(floor: usize) -> Self {
        let floor = floor.max(1) | 1;
        Self {
            buckets: vec![Vec::new(); floor],
            count: 0,
            floor,
            resizes: 0,
            // fixed seeds keep hashes stable across runs
            hasher: ahash::RandomState::with_seeds(
                0x243f_6a88_85a3_08d3,
                0x1319_8a2e_0370_7344,
                0xa409_3822_299f_31d0,
                0x082e_fa98_ec4e_6c89,
            ),
        }
    }

    /// Hash of a fact's content
    pub fn content_hash(&self, template: TemplateId, values: &[FactValue]) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        template.hash(&mut hasher);
        values.len().hash(&mut hasher);
        for value in values {
            value.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// First fact with this hash accepted by `is_match`
    pub fn find(&self, hash: u64, mut is_match: impl FnMut(FactHandle) -> bool) -> Option<FactHandle> {
        self.buckets[self.bucket_of(hash)]
            .iter()
            .filter(|entry| entry.hash == hash)
            .map(|entry| entry.fact)
            .find(|&fact| is_match(fact))
    }

    pub fn insert(&mut self, hash: u64, fact: FactHandle) {
        self.count += 1;
        if self.count > self.buckets.len() {
            let grown = self.buckets.len() * 2 + 1;
            self.rebuild(grown);
        }
        let bucket = self.bucket_of(hash);
        self.buckets[bucket].push(HashEntry { hash, fact });
    }

    /// Remove the entry for `fact`; returns whether it was present
    pub fn remove(&mut self, hash: u64, fact: FactHandle) -> bool {
        let bucket = self.bucket_of(hash);
        let entries = &mut self.buckets[bucket];
        let Some(position) = entries.iter().position(|entry| entry.fact == fact) else {
            return false;
        };
        entries.remove(position);
        self.count -= 1;

        if self.count == 0 && self.buckets.len() != self.floor {
            self.buckets = vec![Vec::new(); self.floor];
            debug!(capacity = self.floor, "Hash index emptied, shrinking to floor");
        }
        true
    }

    fn rebuild(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); capacity]);
        for entry in old.into_iter().flatten() {
            let bucket = self.bucket_of(entry.hash);
            self.buckets[bucket].push(entry);
        }
        self.resizes += 1;
        debug!(capacity, facts = self.count, "Resized fact hash index");
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current bucket count
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn resize_count(&self) -> u64 {
        self.resizes
    }

    /// Largest chain, useful when judging the hash quality
    pub fn longest_chain(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn handle(n: u32) -> FactHandle {
        FactHandle::new(n, 0)
    }

    #[test]
    fn test_floor_rounded_to_odd() {
        assert_eq!(FactHashIndex::new(16).capacity(), 17);
        assert_eq!(FactHashIndex::new(0).capacity(), 1);
        assert_eq!(FactHashIndex::new(16231).capacity(), 16231);
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = FactHashIndex::new(7);
        let b = FactHashIndex::new(101);
        let values = vec![FactValue::Integer(1), FactValue::symbol("x")];
        assert_eq!(a.content_hash(TemplateId(0), &values), b.content_hash(TemplateId(0), &values));
        assert_ne!(a.content_hash(TemplateId(0), &values), a.content_hash(TemplateId(1), &values));
    }

    #[test]
    fn test_find_and_remove() {
        let mut index = FactHashIndex::new(7);
        index.insert(42, handle(1));
        index.insert(42, handle(2));
        index.insert(43, handle(3));

        assert_eq!(index.find(42, |_| true), Some(handle(1)));
        assert_eq!(index.find(42, |h| h == handle(2)), Some(handle(2)));
        assert_eq!(index.find(44, |_| true), None);

        assert!(index.remove(42, handle(1)));
        assert!(!index.remove(42, handle(1)));
        assert_eq!(index.find(42, |_| true), Some(handle(2)));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_growth_and_shrink() {
        let mut index = FactHashIndex::new(3);
        for n in 0..4 {
            index.insert(u64::from(n) * 7919, handle(n));
        }
        assert_eq!(index.capacity(), 7);
        assert_eq!(index.resize_count(), 1);
        for n in 0..4 {
            assert_eq!(index.find(u64::from(n) * 7919, |_| true), Some(handle(n)));
        }

        for n in 0..4 {
            assert!(index.remove(u64::from(n) * 7919, handle(n)));
        }
        assert!(index.is_empty());
        assert_eq!(index.capacity(), 3);
    }

    proptest! {
        #[test]
        fn prop_index_agrees_with_model(ops in prop::collection::vec((any::<bool>(), 0u32..24, 0u64..6), 0..200)) {
            let mut index = FactHashIndex::new(3);
            let mut model: HashMap<u32, u64> = HashMap::new();
            for (insert, slot, hash) in ops {
                match model.get(&slot).copied() {
                    Some(stored) if !insert => {
                        prop_assert!(index.remove(stored, handle(slot)));
                        model.remove(&slot);
                    }
                    None if insert => {
                        index.insert(hash, handle(slot));
                        model.insert(slot, hash);
                    }
                    _ => {}
                }
                prop_assert_eq!(index.len(), model.len());
                prop_assert!(index.len() <= index.capacity());
                if model.is_empty() {
                    prop_assert_eq!(index.capacity(), 3);
                }
            }
            for (slot, hash) in model {
                prop_assert_eq!(index.find(hash, |fact| fact == handle(slot)), Some(handle(slot)));
            }
        }
    }
}
