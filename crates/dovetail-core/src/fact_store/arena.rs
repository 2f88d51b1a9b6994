//! Generational arena holding every fact the store knows about
//!
//! Slots are reused after a fact is reclaimed; the generation stored in the handle
//! makes stale handles detectable instead of aliasing the new occupant.

use super::fact::Fact;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle to a fact: arena slot plus the generation it was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactHandle {
    slot: u32,
    generation: u32,
}

impl FactHandle {
    pub(crate) const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Fact-handle {}.{}>", self.slot, self.generation)
    }
}

#[derive(Debug)]
struct ArenaEntry {
    generation: u32,
    fact: Option<Fact>,
}

#[derive(Debug, Default)]
pub(crate) struct FactArena {
    entries: Vec<ArenaEntry>,
    free: Vec<u32>,
    live: usize,
}

impl FactArena {
    pub fn insert(&mut self, fact: Fact) -> FactHandle {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.entries[slot as usize];
            entry.fact = Some(fact);
            return FactHandle::new(slot, entry.generation);
        }

        let slot = self.entries.len() as u32;
        self.entries.push(ArenaEntry { generation: 0, fact: Some(fact) });
        FactHandle::new(slot, 0)
    }

    pub fn get(&self, handle: FactHandle) -> Option<&Fact> {
        self.entries
            .get(handle.slot as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.fact.as_ref())
    }

    pub fn get_mut(&mut self, handle: FactHandle) -> Option<&mut Fact> {
        self.entries
            .get_mut(handle.slot as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.fact.as_mut())
    }

    /// Free the slot; every outstanding handle to it becomes stale
    pub fn remove(&mut self, handle: FactHandle) -> Option<Fact> {
        let entry = self
            .entries
            .get_mut(handle.slot as usize)
            .filter(|entry| entry.generation == handle.generation)?;
        let fact = entry.fact.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.live -= 1;
        Some(fact)
    }

    pub fn len(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Deftemplate, TemplateId};
    use std::sync::Arc;

    fn fact() -> Fact {
        Fact::new(TemplateId(0), Arc::new(Deftemplate::implied("thing")), Vec::new())
    }

    #[test]
    fn test_stale_handles_are_rejected() {
        let mut arena = FactArena::default();
        let first = arena.insert(fact());
        assert!(arena.get(first).is_some());
        assert!(arena.remove(first).is_some());
        assert!(arena.get(first).is_none());
        assert!(arena.remove(first).is_none());

        let second = arena.insert(fact());
        assert_eq!(second.slot(), first.slot());
        assert_ne!(second.generation(), first.generation());
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(FactHandle::new(4, 2).to_string(), "<Fact-handle 4.2>");
    }
}
