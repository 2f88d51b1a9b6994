//! Hooks invoked around assert, retract and modify
//!
//! Listeners run in descending priority. "Before" hooks fire while the store's
//! reentrancy guard is held, so they can read the store but any assert, retract or
//! modify they attempt is refused. "After" hooks run once the guard is released.

use super::FactStore;
use super::arena::FactHandle;
use crate::error::FactStoreError;
use std::cell::RefCell;
use std::rc::Rc;

/// Callbacks around fact base changes; every method defaults to doing nothing
pub trait FactListener {
    fn before_assert(&mut self, _store: &mut FactStore, _fact: FactHandle) {}

    fn after_assert(&mut self, _store: &mut FactStore, _fact: FactHandle) {}

    fn before_retract(&mut self, _store: &mut FactStore, _fact: FactHandle) {}

    fn after_retract(&mut self, _store: &mut FactStore, _fact: FactHandle) {}

    /// `old` is still asserted when this runs
    fn before_modify(&mut self, _store: &mut FactStore, _old: FactHandle) {}

    /// `new` may be an existing fact when the modification produced a duplicate
    fn after_modify(&mut self, _store: &mut FactStore, _old: FactHandle, _new: FactHandle) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FactEvent {
    BeforeAssert(FactHandle),
    AfterAssert(FactHandle),
    BeforeRetract(FactHandle),
    AfterRetract(FactHandle),
    BeforeModify(FactHandle),
    AfterModify(FactHandle, FactHandle),
}

impl FactEvent {
    pub fn dispatch(self, listener: &mut dyn FactListener, store: &mut FactStore) {
        match self {
            FactEvent::BeforeAssert(fact) => listener.before_assert(store, fact),
            FactEvent::AfterAssert(fact) => listener.after_assert(store, fact),
            FactEvent::BeforeRetract(fact) => listener.before_retract(store, fact),
            FactEvent::AfterRetract(fact) => listener.after_retract(store, fact),
            FactEvent::BeforeModify(old) => listener.before_modify(store, old),
            FactEvent::AfterModify(old, new) => listener.after_modify(store, old, new),
        }
    }
}

pub(crate) type SharedListener = Rc<RefCell<dyn FactListener>>;

struct RegisteredListener {
    name: String,
    priority: i32,
    listener: SharedListener,
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Vec<RegisteredListener>,
}

impl ListenerRegistry {
    pub fn add(&mut self, name: &str, priority: i32, listener: SharedListener) -> Result<(), FactStoreError> {
        if self.listeners.iter().any(|existing| existing.name == name) {
            return Err(FactStoreError::DuplicateListener(name.to_string()));
        }
        // stable: equal priorities keep registration order
        let position = self.listeners.partition_point(|existing| existing.priority >= priority);
        self.listeners.insert(position, RegisteredListener { name: name.to_string(), priority, listener });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|existing| existing.name != name);
        self.listeners.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.listeners.iter().map(|existing| existing.name.as_str()).collect()
    }

    /// Listeners in dispatch order; registration changes made while dispatching
    /// take effect from the next event
    pub fn snapshot(&self) -> Vec<SharedListener> {
        self.listeners.iter().map(|existing| Rc::clone(&existing.listener)).collect()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
