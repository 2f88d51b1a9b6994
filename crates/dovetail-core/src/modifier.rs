//! Staged modification of an asserted template fact
//!
//! `FactModifier` pins its fact (busy count +1) from creation until `commit` or
//! `abort`, so the fact stays readable even if something retracts it meanwhile.
//! Only values that differ from the fact's current content are recorded; a
//! commit with nothing recorded leaves the fact untouched.

use crate::error::{FactStoreError, ModifyError, PutSlotError};
use crate::fact_store::{FactHandle, FactStore};
use dovetail_types::FactValue;
use tracing::debug;

#[derive(Debug)]
pub struct FactModifier {
    fact: FactHandle,
    changes: Vec<(usize, FactValue)>,
}

impl FactModifier {
    pub fn new(store: &mut FactStore, fact: FactHandle) -> Result<Self, ModifyError> {
        let current = store.get(fact).ok_or(ModifyError::UnknownFact(fact))?;
        if current.is_garbage() {
            return Err(ModifyError::FactRetracted(fact));
        }
        if current.index() == 0 {
            return Err(ModifyError::NotAsserted(fact));
        }
        if current.template().is_implied() {
            return Err(ModifyError::ImpliedTemplate(current.template().name().to_string()));
        }
        store.retain(fact).map_err(|_| ModifyError::UnknownFact(fact))?;
        Ok(Self { fact, changes: Vec::new() })
    }

    pub fn fact(&self) -> FactHandle {
        self.fact
    }

    /// Record a new value for `slot`. Writing the fact's current value back
    /// cancels an earlier change to that slot.
    pub fn put_slot(&mut self, store: &FactStore, slot: &str, value: FactValue) -> Result<&mut Self, ModifyError> {
        let current = store.get(self.fact).ok_or(ModifyError::UnknownFact(self.fact))?;
        let template = current.template();
        let position = template.slot_position(slot).ok_or_else(|| PutSlotError::SlotNotFound {
            template: template.name().to_string(),
            slot: slot.to_string(),
        })?;
        template.slots()[position].check(&value)?;

        self.changes.retain(|(staged, _)| *staged != position);
        if current.value(position) != Some(&value) {
            self.changes.push((position, value));
        }
        Ok(self)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Apply the recorded changes through `FactStore::modify` and unpin the fact
    pub fn commit(self, store: &mut FactStore) -> Result<FactHandle, ModifyError> {
        self.unpin(store)?;
        if self.changes.is_empty() {
            debug!(fact = %self.fact, "Fact modifier committed without changes");
            return Ok(self.fact);
        }
        store.modify(self.fact, &self.changes)
    }

    /// Unpin the fact without changing it
    pub fn abort(self, store: &mut FactStore) -> Result<(), ModifyError> {
        self.unpin(store)
    }

    fn unpin(&self, store: &mut FactStore) -> Result<(), ModifyError> {
        store.release(self.fact).map_err(|err| match err {
            FactStoreError::UnknownFact(fact) => ModifyError::UnknownFact(fact),
            _ => ModifyError::UnknownFact(self.fact),
        })
    }
}
