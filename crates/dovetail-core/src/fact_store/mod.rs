//! The fact base: ownership, identity and lifecycle of facts
//!
//! ## Lifecycle
//!
//! ```text
//! create ──► unattached (index 0) ──assert──► asserted ──retract──► garbage ──gc──► freed
//!                 │                              │  ▲
//!                 └──────discard────────► freed  └──┘ modify (same index, same position)
//! ```
//!
//! Facts live in a generational arena and are addressed by `FactHandle`. Asserted
//! facts are threaded through a global list and a per-template list, indexed by
//! content hash, and matched against their template's pattern tree. Retracted
//! facts stay readable until their busy count drains and a collection runs.
//!
//! A single reentrancy guard covers the window from the "before" listeners through
//! pattern matching (or match retraction). Assert, retract and modify calls made
//! inside that window are refused with an error instead of corrupting the walk.

mod arena;
mod fact;
mod listeners;
mod lists;

pub use arena::FactHandle;
pub use fact::Fact;
pub use listeners::FactListener;
pub use lists::ListPosition;

use crate::alpha_memory::AlphaMemoryNetwork;
use crate::atoms::AtomTable;
use crate::config::FactBaseConfig;
use crate::error::{
    AssertError, DovetailResult, FactStoreError, ModifyError, PatternError, PutSlotError, RetractError,
    TemplateError, fatal_invariant,
};
use crate::halt::HaltFlag;
use crate::hash_index::FactHashIndex;
use crate::pattern::{
    AlphaNetwork, FactMatcher, JoinNetwork, MatchHandle, MatchMode, MatchOutcome, Pattern, PatternEntryId,
};
use crate::stats::{FactStoreStats, StoreCounters};
use crate::template::{Deftemplate, TemplateId, TemplateRegistry};
use arena::FactArena;
use dovetail_types::{FactId, FactValue};
use listeners::{FactEvent, ListenerRegistry};
use lists::{FactList, global_links, template_links};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of a successful assert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asserted {
    /// The fact was attached
    New(FactHandle),
    /// Duplicates are disallowed and an identical fact already exists; the
    /// submitted fact was discarded
    Duplicate(FactHandle),
}

impl Asserted {
    /// The fact now representing the content
    pub fn handle(self) -> FactHandle {
        match self {
            Asserted::New(handle) | Asserted::Duplicate(handle) => handle,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Asserted::New(_))
    }
}

/// Where a detached fact used to sit, plus whether the join network complained
struct Detached {
    global_prev: Option<FactHandle>,
    template_prev: Option<FactHandle>,
    network_error: bool,
}

pub struct FactStore {
    config: FactBaseConfig,
    templates: TemplateRegistry,
    atoms: AtomTable,
    arena: FactArena,
    global: FactList,
    template_lists: HashMap<TemplateId, FactList>,
    hash_index: FactHashIndex,
    alpha: AlphaNetwork,
    network: Box<dyn JoinNetwork>,
    listeners: ListenerRegistry,
    garbage: Vec<FactHandle>,
    next_index: FactId,
    join_operation_in_progress: bool,
    evaluation_error: bool,
    halt: HaltFlag,
    counters: StoreCounters,
}

impl Default for FactStore {
    fn default() -> Self {
        Self::with_config(FactBaseConfig::default())
    }
}

impl fmt::Debug for FactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactStore")
            .field("facts", &self.global.len)
            .field("garbage", &self.garbage.len())
            .field("allocated", &self.arena.len())
            .field("templates", &self.templates.len())
            .field("patterns", &self.alpha.pattern_count())
            .field("next_index", &self.next_index)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl FactStore {
    /// Create a store feeding matches into `network`
    pub fn new(config: FactBaseConfig, network: Box<dyn JoinNetwork>) -> Self {
        info!(
            allow_duplicates = config.allow_duplicates,
            hash_floor = config.effective_hash_floor(),
            gc_threshold = config.gc_threshold,
            "Creating fact store"
        );
        Self {
            hash_index: FactHashIndex::new(config.effective_hash_floor()),
            alpha: AlphaNetwork::new(config.selector_threshold),
            config,
            templates: TemplateRegistry::new(),
            atoms: AtomTable::new(),
            arena: FactArena::default(),
            global: FactList::default(),
            template_lists: HashMap::new(),
            network,
            listeners: ListenerRegistry::default(),
            garbage: Vec::new(),
            next_index: 1,
            join_operation_in_progress: false,
            evaluation_error: false,
            halt: HaltFlag::new(),
            counters: StoreCounters::default(),
        }
    }

    /// Create a store recording matches in an `AlphaMemoryNetwork`
    pub fn with_config(config: FactBaseConfig) -> Self {
        Self::new(config, Box::new(AlphaMemoryNetwork::new()))
    }

    // ---------------------------------------------------------------------------------------------
    // Templates
    // ---------------------------------------------------------------------------------------------

    pub fn define_template(&mut self, template: Deftemplate) -> Result<TemplateId, TemplateError> {
        self.templates.define(template)
    }

    /// Remove a template no fact, builder or pattern refers to
    pub fn undefine_template(&mut self, name: &str) -> Result<(), TemplateError> {
        let id = self.templates.find(name);
        self.templates.undefine(name)?;
        if let Some(id) = id {
            self.template_lists.remove(&id);
        }
        Ok(())
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.templates
    }

    // ---------------------------------------------------------------------------------------------
    // Unattached facts
    // ---------------------------------------------------------------------------------------------

    /// Allocate an unattached fact with every slot at its default.
    ///
    /// Slots without a default start as `nil` (or an empty multifield) and are
    /// expected to be filled with `put_slot` before asserting.
    pub fn create_fact(&mut self, template: &str) -> Result<FactHandle, FactStoreError> {
        let (id, template) = self
            .templates
            .by_name(template)
            .map(|(id, template)| (id, Arc::clone(template)))
            .ok_or_else(|| FactStoreError::UnknownTemplate(template.to_string()))?;

        let values = template
            .slots()
            .iter()
            .map(|slot| {
                slot.default_value().unwrap_or_else(|| {
                    if slot.is_multi() { FactValue::empty_multifield() } else { FactValue::symbol("nil") }
                })
            })
            .collect();
        Ok(self.create_fact_with_values(id, template, values))
    }

    /// Allocate an unattached ordered fact, e.g. `(color red blue)`
    pub fn create_ordered_fact(
        &mut self,
        relation: &str,
        values: Vec<FactValue>,
    ) -> Result<FactHandle, FactStoreError> {
        let id = self.templates.implied_template(relation)?;
        let Some(template) = self.templates.get(id).map(Arc::clone) else {
            fatal_invariant("fact_store", format!("implied template {relation} vanished"));
        };
        Ok(self.create_fact_with_values(id, template, vec![FactValue::Multifield(values)]))
    }

    pub(crate) fn create_fact_with_values(
        &mut self,
        id: TemplateId,
        template: Arc<Deftemplate>,
        values: Vec<FactValue>,
    ) -> FactHandle {
        if values.len() != template.arity() {
            fatal_invariant(
                "fact_store",
                format!("{} values for template {} of arity {}", values.len(), template.name(), template.arity()),
            );
        }
        self.templates.increment_busy(id);
        self.arena.insert(Fact::new(id, template, values))
    }

    fn unattached_mut(&mut self, handle: FactHandle) -> Result<&mut Fact, FactStoreError> {
        let fact = self.arena.get_mut(handle).ok_or(FactStoreError::UnknownFact(handle))?;
        if fact.index != 0 || fact.garbage {
            return Err(FactStoreError::FactAttached(handle));
        }
        Ok(fact)
    }

    /// Set a slot of an unattached fact, validating it against the slot's constraints
    pub fn put_slot(&mut self, handle: FactHandle, slot: &str, value: FactValue) -> Result<(), FactStoreError> {
        let fact = self.unattached_mut(handle)?;
        let position = fact.template.slot_position(slot).ok_or_else(|| PutSlotError::SlotNotFound {
            template: fact.template.name().to_string(),
            slot: slot.to_string(),
        })?;
        fact.template.slots()[position].check(&value)?;
        fact.values[position] = value;
        Ok(())
    }

    pub fn put_slot_at(&mut self, handle: FactHandle, position: usize, value: FactValue) -> Result<(), FactStoreError> {
        let fact = self.unattached_mut(handle)?;
        let arity = fact.template.arity();
        let definition = fact.template.slot(position).ok_or(FactStoreError::SlotOutOfRange { position, arity })?;
        definition.check(&value)?;
        fact.values[position] = value;
        Ok(())
    }

    /// Free a fact that was created but never asserted
    pub fn discard_fact(&mut self, handle: FactHandle) -> Result<(), FactStoreError> {
        self.unattached_mut(handle)?;
        self.free(handle);
        Ok(())
    }

    /// Drop a fact's storage; facts that were ever asserted give back their atoms
    fn free(&mut self, handle: FactHandle) {
        let Some(fact) = self.arena.remove(handle) else {
            fatal_invariant("fact_store", format!("freeing missing fact {handle}"));
        };
        if fact.index != 0 {
            for value in &fact.values {
                self.atoms.deinstall(value);
            }
        }
        self.templates.decrement_busy(fact.template_id);
    }

    // ---------------------------------------------------------------------------------------------
    // Assert
    // ---------------------------------------------------------------------------------------------

    /// Assert at the tail of the fact list
    pub fn assert_fact(&mut self, handle: FactHandle) -> Result<Asserted, AssertError> {
        self.assert_at(handle, ListPosition::Tail)
    }

    /// Attach an unattached fact and match it against its template's patterns.
    ///
    /// Asserting a fact that is already asserted returns it unchanged. With
    /// duplicates disallowed, a fact whose content matches an asserted fact is
    /// discarded and the existing fact is returned as `Asserted::Duplicate`.
    #[instrument(level = "debug", skip(self))]
    pub fn assert_at(&mut self, handle: FactHandle, position: ListPosition) -> Result<Asserted, AssertError> {
        let fact = self.arena.get(handle).ok_or(AssertError::UnknownFact(handle))?;
        if fact.garbage {
            return Err(AssertError::FactRetracted(handle));
        }
        if fact.index != 0 {
            return Ok(Asserted::New(handle));
        }
        let template = fact.template_id;
        if self.join_operation_in_progress {
            self.refuse("assert");
            return Err(AssertError::CouldNotAssert);
        }
        let global_prev = match position {
            ListPosition::Tail => self.global.tail,
            ListPosition::Head => None,
            ListPosition::After(prev) if self.is_asserted(prev) => Some(prev),
            ListPosition::After(prev) => return Err(AssertError::UnknownFact(prev)),
        };

        let hash = self.content_hash(handle);
        if let Some(existing) = self.find_duplicate(handle, hash) {
            self.free(handle);
            self.counters.duplicates_rejected += 1;
            debug!(%existing, "Identical fact already asserted");
            return Ok(Asserted::Duplicate(existing));
        }

        let template_prev = self.template_lists.get(&template).and_then(|list| list.tail);
        let index = self.attach(handle, None, hash, global_prev, template_prev);
        self.counters.asserted += 1;

        self.join_operation_in_progress = true;
        self.notify(FactEvent::BeforeAssert(handle));
        let outcome = self.match_fact(handle, MatchMode::Assert);
        self.join_operation_in_progress = false;
        self.notify(FactEvent::AfterAssert(handle));

        debug!(index, matches = outcome.matches.len(), "Asserted fact");
        self.maybe_collect_garbage();
        if outcome.evaluation_error {
            return Err(AssertError::RuleNetwork { fact: handle, index });
        }
        Ok(Asserted::New(handle))
    }

    /// Create, fill and assert an ordered fact in one call
    pub fn assert_ordered(&mut self, relation: &str, values: Vec<FactValue>) -> DovetailResult<Asserted> {
        let handle = self.create_ordered_fact(relation, values)?;
        match self.assert_fact(handle) {
            Ok(asserted) => Ok(asserted),
            Err(err) => {
                if self.arena.get(handle).is_some_and(|fact| fact.index == 0) {
                    self.free(handle);
                }
                Err(err.into())
            }
        }
    }

    fn content_hash(&self, handle: FactHandle) -> u64 {
        match self.arena.get(handle) {
            Some(fact) => self.hash_index.content_hash(fact.template_id, &fact.values),
            None => fatal_invariant("fact_store", format!("hashing missing fact {handle}")),
        }
    }

    fn find_duplicate(&self, handle: FactHandle, hash: u64) -> Option<FactHandle> {
        if self.config.allow_duplicates {
            return None;
        }
        let fact = self.arena.get(handle)?;
        self.hash_index.find(hash, |candidate| {
            candidate != handle
                && self
                    .arena
                    .get(candidate)
                    .is_some_and(|other| other.template_id == fact.template_id && other.values == fact.values)
        })
    }

    /// Give the fact its index, index it, link it in and install its values
    fn attach(
        &mut self,
        handle: FactHandle,
        reuse: Option<FactId>,
        hash: u64,
        global_prev: Option<FactHandle>,
        template_prev: Option<FactHandle>,
    ) -> FactId {
        let Some(fact) = self.arena.get_mut(handle) else {
            fatal_invariant("fact_store", format!("attaching missing fact {handle}"));
        };
        let index = match reuse {
            Some(index) if fact.index == 0 || fact.index == index => index,
            Some(index) => fatal_invariant(
                "fact_store",
                format!("reusing index f-{index} on fact already numbered f-{}", fact.index),
            ),
            None => {
                let index = self.next_index;
                self.next_index += 1;
                index
            }
        };
        fact.index = index;
        fact.hash = hash;
        fact.busy_count += 1;
        for value in &mut fact.values {
            self.atoms.install(value);
        }
        let template = fact.template_id;

        self.hash_index.insert(hash, handle);
        self.global.link_after(&mut self.arena, global_links, global_prev, handle);
        self.template_lists
            .entry(template)
            .or_default()
            .link_after(&mut self.arena, template_links, template_prev, handle);
        index
    }

    fn match_fact(&mut self, handle: FactHandle, mode: MatchMode) -> MatchOutcome {
        let Some(fact) = self.arena.get(handle) else {
            fatal_invariant("fact_store", format!("matching missing fact {handle}"));
        };
        let Some(tree) = self.alpha.tree(fact.template_id) else {
            return MatchOutcome::default();
        };
        let outcome = FactMatcher::new(tree, handle, fact, self.network.as_mut(), &self.halt, mode).run();

        if let Some(fact) = self.arena.get_mut(handle) {
            fact.matches.extend_from_slice(&outcome.matches);
        }
        self.counters.alpha_matches += outcome.matches.len() as u64;
        if outcome.evaluation_error {
            self.evaluation_error = true;
            self.counters.evaluation_errors += 1;
        }
        if outcome.halted {
            debug!(%handle, "Pattern matching halted early");
        }
        outcome
    }

    // ---------------------------------------------------------------------------------------------
    // Retract
    // ---------------------------------------------------------------------------------------------

    /// Detach an asserted fact and withdraw its matches.
    ///
    /// The fact stays readable as garbage until its busy count drains and a
    /// collection runs. Retracting garbage is a no-op.
    #[instrument(level = "debug", skip(self))]
    pub fn retract(&mut self, handle: FactHandle) -> Result<(), RetractError> {
        let fact = self.arena.get(handle).ok_or(RetractError::UnknownFact(handle))?;
        if fact.garbage {
            return Ok(());
        }
        if fact.index == 0 {
            return Err(RetractError::NotAsserted(handle));
        }
        let index = fact.index;
        if self.join_operation_in_progress {
            self.refuse("retract");
            return Err(RetractError::CouldNotRetract);
        }

        self.join_operation_in_progress = true;
        self.notify(FactEvent::BeforeRetract(handle));
        let detached = self.detach(handle);
        self.join_operation_in_progress = false;
        self.notify(FactEvent::AfterRetract(handle));

        debug!(index, "Retracted fact");
        self.maybe_collect_garbage();
        if detached.network_error {
            return Err(RetractError::RuleNetwork { fact: handle, index });
        }
        Ok(())
    }

    /// Retract every asserted fact, oldest first
    pub fn retract_all(&mut self) -> Result<usize, RetractError> {
        let mut retracted = 0;
        while let Some(head) = self.global.head {
            self.retract(head)?;
            retracted += 1;
        }
        Ok(retracted)
    }

    /// Retract everything and collect what can be freed.
    ///
    /// Numbering restarts at f-1 only when no retracted fact is still held, so an
    /// index never names a pinned fact and a live one at the same time.
    pub fn clear(&mut self) -> Result<usize, RetractError> {
        let retracted = self.retract_all()?;
        self.collect_garbage();
        if self.garbage.is_empty() {
            self.next_index = 1;
        }
        info!(retracted, held = self.garbage.len(), next_index = self.next_index, "Cleared fact store");
        Ok(retracted)
    }

    fn detach(&mut self, handle: FactHandle) -> Detached {
        let (hash, template) = match self.arena.get(handle) {
            Some(fact) => (fact.hash, fact.template_id),
            None => fatal_invariant("fact_store", format!("detaching missing fact {handle}")),
        };
        if !self.hash_index.remove(hash, handle) {
            fatal_invariant("fact_store", format!("asserted fact {handle} missing from hash index"));
        }
        let global_prev = self.global.unlink(&mut self.arena, global_links, handle);
        let template_prev = match self.template_lists.get_mut(&template) {
            Some(list) => list.unlink(&mut self.arena, template_links, handle),
            None => fatal_invariant("fact_store", format!("no fact list for {template}")),
        };

        let Some(fact) = self.arena.get_mut(handle) else {
            fatal_invariant("fact_store", format!("detaching missing fact {handle}"));
        };
        let matches = std::mem::take(&mut fact.matches);
        let index = fact.index;
        fact.garbage = true;
        match fact.busy_count.checked_sub(1) {
            Some(busy) => fact.busy_count = busy,
            None => fatal_invariant("fact_store", format!("busy count underflow on f-{index}")),
        }
        self.garbage.push(handle);
        self.counters.retracted += 1;

        let mut network_error = false;
        if !matches.is_empty() {
            self.counters.match_retractions += matches.len() as u64;
            if let Err(err) = self.network.retract_all_matches(handle, &matches) {
                error!(fact = index, error = %err, "Join network failed while retracting matches");
                self.evaluation_error = true;
                self.counters.evaluation_errors += 1;
                network_error = true;
            }
        }
        Detached { global_prev, template_prev, network_error }
    }

    // ---------------------------------------------------------------------------------------------
    // Modify and duplicate
    // ---------------------------------------------------------------------------------------------

    /// Validate `changes` against an asserted fact; returns the patched values
    /// and whether anything actually differs
    fn patched_values(
        &self,
        handle: FactHandle,
        changes: &[(usize, FactValue)],
    ) -> Result<(Vec<FactValue>, bool), ModifyError> {
        let fact = self.arena.get(handle).ok_or(ModifyError::UnknownFact(handle))?;
        if fact.garbage {
            return Err(ModifyError::FactRetracted(handle));
        }
        if fact.index == 0 {
            return Err(ModifyError::NotAsserted(handle));
        }

        let arity = fact.template.arity();
        let mut values = fact.values.clone();
        for (position, value) in changes {
            let definition =
                fact.template.slot(*position).ok_or(ModifyError::SlotOutOfRange { position: *position, arity })?;
            definition.check(value)?;
            values[*position] = value.clone();
        }
        let changed = values != fact.values;
        Ok((values, changed))
    }

    /// Replace slot values of an asserted fact in one step.
    ///
    /// The replacement keeps the original index and list positions. Modify
    /// listeners fire; assert and retract listeners do not. When no value actually
    /// changes the original fact is returned and nothing is observable. When the
    /// new content duplicates another fact (and duplicates are disallowed) the old
    /// fact is retracted and the existing one returned.
    #[instrument(level = "debug", skip(self, changes), fields(changes = changes.len()))]
    pub fn modify(&mut self, handle: FactHandle, changes: &[(usize, FactValue)]) -> Result<FactHandle, ModifyError> {
        let (values, changed) = self.patched_values(handle, changes)?;
        if !changed {
            return Ok(handle);
        }
        if self.join_operation_in_progress {
            self.refuse("modify");
            return Err(ModifyError::CouldNotModify);
        }

        let (template_id, template, index) = match self.arena.get(handle) {
            Some(fact) => (fact.template_id, Arc::clone(&fact.template), fact.index),
            None => fatal_invariant("fact_store", format!("modifying missing fact {handle}")),
        };
        let replacement = self.create_fact_with_values(template_id, template, values);
        let hash = self.content_hash(replacement);
        let duplicate = self.find_duplicate(replacement, hash);

        self.join_operation_in_progress = true;
        self.notify(FactEvent::BeforeModify(handle));
        let detached = self.detach(handle);
        let (result, match_error) = match duplicate {
            Some(existing) => {
                self.free(replacement);
                self.counters.duplicates_rejected += 1;
                (existing, false)
            }
            None => {
                self.attach(replacement, Some(index), hash, detached.global_prev, detached.template_prev);
                let outcome = self.match_fact(replacement, MatchMode::Assert);
                (replacement, outcome.evaluation_error)
            }
        };
        self.join_operation_in_progress = false;
        self.counters.modified += 1;
        self.notify(FactEvent::AfterModify(handle, result));

        debug!(index, duplicate = duplicate.is_some(), "Modified fact");
        self.maybe_collect_garbage();
        if detached.network_error || match_error {
            return Err(ModifyError::RuleNetwork { fact: result, index });
        }
        Ok(result)
    }

    /// Assert a patched copy of an asserted fact, leaving the original in place
    #[instrument(level = "debug", skip(self, changes), fields(changes = changes.len()))]
    pub fn duplicate(&mut self, handle: FactHandle, changes: &[(usize, FactValue)]) -> Result<Asserted, ModifyError> {
        let (values, _) = self.patched_values(handle, changes)?;
        if self.join_operation_in_progress {
            self.refuse("duplicate");
            return Err(ModifyError::CouldNotModify);
        }
        let (template_id, template) = match self.arena.get(handle) {
            Some(fact) => (fact.template_id, Arc::clone(&fact.template)),
            None => fatal_invariant("fact_store", format!("duplicating missing fact {handle}")),
        };
        let copy = self.create_fact_with_values(template_id, template, values);
        self.assert_fact(copy).map_err(|err| match err {
            AssertError::RuleNetwork { fact, index } => ModifyError::RuleNetwork { fact, index },
            AssertError::CouldNotAssert | AssertError::UnknownFact(_) | AssertError::FactRetracted(_) => {
                ModifyError::CouldNotModify
            }
        })
    }

    // ---------------------------------------------------------------------------------------------
    // Busy counts and garbage collection
    // ---------------------------------------------------------------------------------------------

    /// Keep a fact's storage alive (even after retraction) until `release`
    pub fn retain(&mut self, handle: FactHandle) -> Result<(), FactStoreError> {
        let fact = self.arena.get_mut(handle).ok_or(FactStoreError::UnknownFact(handle))?;
        fact.busy_count += 1;
        Ok(())
    }

    pub fn release(&mut self, handle: FactHandle) -> Result<(), FactStoreError> {
        let fact = self.arena.get_mut(handle).ok_or(FactStoreError::UnknownFact(handle))?;
        match fact.busy_count.checked_sub(1) {
            Some(busy) => fact.busy_count = busy,
            None => fatal_invariant("fact_store", format!("release without retain on {handle}")),
        }
        Ok(())
    }

    /// `retain` plus one installation of every atom in the fact's values
    pub fn install(&mut self, handle: FactHandle) -> Result<(), FactStoreError> {
        let fact = self.arena.get_mut(handle).ok_or(FactStoreError::UnknownFact(handle))?;
        fact.busy_count += 1;
        for value in &mut fact.values {
            self.atoms.install(value);
        }
        Ok(())
    }

    pub fn deinstall(&mut self, handle: FactHandle) -> Result<(), FactStoreError> {
        let fact = self.arena.get_mut(handle).ok_or(FactStoreError::UnknownFact(handle))?;
        match fact.busy_count.checked_sub(1) {
            Some(busy) => fact.busy_count = busy,
            None => fatal_invariant("fact_store", format!("deinstall without install on {handle}")),
        }
        for value in &fact.values {
            self.atoms.deinstall(value);
        }
        Ok(())
    }

    /// Free retracted facts nobody holds any more; returns how many were freed.
    ///
    /// Does nothing while an assert, retract or modify is in progress.
    pub fn collect_garbage(&mut self) -> usize {
        if self.join_operation_in_progress {
            return 0;
        }
        let pending = std::mem::take(&mut self.garbage);
        let mut reclaimed = 0;
        for handle in pending {
            match self.arena.get(handle) {
                Some(fact) if fact.busy_count == 0 => {
                    self.free(handle);
                    reclaimed += 1;
                }
                Some(_) => self.garbage.push(handle),
                None => fatal_invariant("fact_store", format!("garbage list holds freed fact {handle}")),
            }
        }
        let atoms = self.atoms.sweep();
        self.counters.reclaimed += reclaimed as u64;
        self.counters.gc_runs += 1;
        debug!(reclaimed, pending = self.garbage.len(), atoms, "Collected garbage");
        reclaimed
    }

    fn maybe_collect_garbage(&mut self) {
        let threshold = self.config.gc_threshold;
        if threshold > 0 && self.garbage.len() >= threshold {
            self.collect_garbage();
        }
    }

    pub fn garbage_count(&self) -> usize {
        self.garbage.len()
    }

    // ---------------------------------------------------------------------------------------------
    // Patterns
    // ---------------------------------------------------------------------------------------------

    /// Compile a pattern into its template's tree.
    ///
    /// With incremental reset enabled, facts already asserted are replayed
    /// through the new parts of the tree right away.
    pub fn add_pattern(&mut self, pattern: &Pattern, label: &str) -> Result<PatternEntryId, PatternError> {
        let template = self
            .templates
            .get(pattern.template)
            .map(Arc::clone)
            .ok_or(PatternError::UnknownTemplate(pattern.template))?;
        let entry = self.alpha.add_pattern(&template, pattern, label)?;
        if self.config.incremental_reset {
            self.incremental_reset(pattern.template);
        }
        Ok(entry)
    }

    /// Remove a pattern entry and prune the nodes only it used
    pub fn remove_pattern(&mut self, entry: PatternEntryId) -> Result<(), PatternError> {
        self.alpha.remove_pattern(entry).map(|_| ())
    }

    /// Replay existing facts through every pattern added since the last replay;
    /// returns the number of matches produced
    pub fn replay_new_patterns(&mut self) -> usize {
        self.alpha
            .templates_needing_replay()
            .into_iter()
            .map(|template| self.incremental_reset(template))
            .sum()
    }

    /// Replay the template's facts into entries added since the last reset.
    ///
    /// A halt leaves the tree uninitialized so the next `replay_new_patterns`
    /// resumes with the facts not yet replayed; matches already delivered to the
    /// interrupted fact are withdrawn first.
    fn incremental_reset(&mut self, template: TemplateId) -> usize {
        let facts = self.template_handles(template);
        let previous = std::mem::replace(&mut self.join_operation_in_progress, true);
        let mut produced = 0;
        let mut complete = true;
        for &handle in &facts {
            if self.alpha.tree(template).is_some_and(|tree| tree.is_replayed(handle)) {
                continue;
            }
            let outcome = self.match_fact(handle, MatchMode::IncrementalReset);
            if outcome.halted {
                self.withdraw_matches(handle, &outcome.matches);
                complete = false;
                warn!(%template, "Incremental reset halted; the remaining facts wait for the next replay");
                break;
            }
            produced += outcome.matches.len();
            if let Some(tree) = self.alpha.tree_mut(template) {
                tree.record_replayed(handle);
            }
        }
        self.join_operation_in_progress = previous;

        if complete {
            if let Some(tree) = self.alpha.tree_mut(template) {
                tree.mark_initialized();
            }
        }
        debug!(%template, facts = facts.len(), matches = produced, complete, "Incremental reset");
        produced
    }

    fn withdraw_matches(&mut self, handle: FactHandle, matches: &[MatchHandle]) {
        if matches.is_empty() {
            return;
        }
        if let Some(fact) = self.arena.get_mut(handle) {
            fact.matches.retain(|recorded| !matches.contains(recorded));
        }
        self.counters.match_retractions += matches.len() as u64;
        if let Err(err) = self.network.retract_all_matches(handle, matches) {
            error!(%handle, error = %err, "Join network failed while withdrawing replayed matches");
            self.evaluation_error = true;
            self.counters.evaluation_errors += 1;
        }
    }

    pub fn alpha_network(&self) -> &AlphaNetwork {
        &self.alpha
    }

    pub fn network(&self) -> &dyn JoinNetwork {
        self.network.as_ref()
    }

    /// The join network, if it is a `T`
    pub fn network_as<T: JoinNetwork>(&self) -> Option<&T> {
        self.network.as_any().downcast_ref()
    }

    pub fn network_as_mut<T: JoinNetwork>(&mut self) -> Option<&mut T> {
        self.network.as_any_mut().downcast_mut()
    }

    /// The default recording join network, if this store uses it
    pub fn alpha_memory(&self) -> Option<&AlphaMemoryNetwork> {
        self.network_as()
    }

    // ---------------------------------------------------------------------------------------------
    // Lookup and iteration
    // ---------------------------------------------------------------------------------------------

    pub fn get(&self, handle: FactHandle) -> Option<&Fact> {
        self.arena.get(handle)
    }

    pub fn is_asserted(&self, handle: FactHandle) -> bool {
        self.arena.get(handle).is_some_and(Fact::is_asserted)
    }

    pub fn slot_value(&self, handle: FactHandle, slot: &str) -> Option<&FactValue> {
        self.arena.get(handle)?.slot_value(slot)
    }

    /// Find an asserted fact by index (linear in the number of facts)
    pub fn fact_by_index(&self, index: FactId) -> Option<FactHandle> {
        self.facts().find(|(_, fact)| fact.index == index).map(|(handle, _)| handle)
    }

    pub fn fact_count(&self) -> usize {
        self.global.len
    }

    pub fn template_fact_count(&self, template: TemplateId) -> usize {
        self.template_lists.get(&template).map_or(0, |list| list.len)
    }

    /// Next asserted fact after `prev` (the first one for `None`)
    pub fn next_fact(&self, prev: Option<FactHandle>) -> Option<FactHandle> {
        match prev {
            None => self.global.head,
            Some(handle) => self.arena.get(handle).filter(|fact| !fact.garbage)?.global.next,
        }
    }

    /// Like `next_fact`, skipping facts whose template is not visible from the
    /// current module
    pub fn next_fact_in_scope(&self, prev: Option<FactHandle>) -> Option<FactHandle> {
        let mut cursor = prev;
        loop {
            let handle = self.next_fact(cursor)?;
            if self.arena.get(handle).is_some_and(|fact| self.templates.is_visible(fact.template_id)) {
                return Some(handle);
            }
            cursor = Some(handle);
        }
    }

    pub fn next_fact_in_template(&self, template: TemplateId, prev: Option<FactHandle>) -> Option<FactHandle> {
        match prev {
            None => self.template_lists.get(&template)?.head,
            Some(handle) => self.arena.get(handle).filter(|fact| !fact.garbage)?.in_template.next,
        }
    }

    /// Asserted facts in list order
    pub fn facts(&self) -> impl Iterator<Item = (FactHandle, &Fact)> {
        std::iter::successors(self.global.head, move |&handle| self.arena.get(handle)?.global.next)
            .filter_map(move |handle| self.arena.get(handle).map(|fact| (handle, fact)))
    }

    /// Asserted facts of one template in list order
    pub fn template_facts(&self, template: TemplateId) -> impl Iterator<Item = (FactHandle, &Fact)> {
        let head = self.template_lists.get(&template).and_then(|list| list.head);
        std::iter::successors(head, move |&handle| self.arena.get(handle)?.in_template.next)
            .filter_map(move |handle| self.arena.get(handle).map(|fact| (handle, fact)))
    }

    pub(crate) fn template_handles(&self, template: TemplateId) -> Vec<FactHandle> {
        self.template_facts(template).map(|(handle, _)| handle).collect()
    }

    // ---------------------------------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------------------------------

    /// Register a listener; higher priorities run first
    pub fn add_listener(
        &mut self,
        name: &str,
        priority: i32,
        listener: impl FactListener + 'static,
    ) -> Result<(), FactStoreError> {
        self.listeners.add(name, priority, Rc::new(RefCell::new(listener)))
    }

    pub fn remove_listener(&mut self, name: &str) -> bool {
        self.listeners.remove(name)
    }

    fn notify(&mut self, event: FactEvent) {
        if self.listeners.is_empty() {
            return;
        }
        for listener in self.listeners.snapshot() {
            // a listener already running further up the stack misses nested events
            let Ok(mut active) = listener.try_borrow_mut() else {
                continue;
            };
            event.dispatch(&mut *active, self);
        }
    }

    fn refuse(&mut self, operation: &str) {
        self.counters.guard_rejections += 1;
        warn!(operation, "Refused reentrant change while a match or retraction is in progress");
    }

    // ---------------------------------------------------------------------------------------------
    // Settings, flags and statistics
    // ---------------------------------------------------------------------------------------------

    pub fn config(&self) -> &FactBaseConfig {
        &self.config
    }

    /// Change the duplicate policy; returns the previous one
    pub fn set_allow_duplicates(&mut self, allow: bool) -> bool {
        std::mem::replace(&mut self.config.allow_duplicates, allow)
    }

    pub fn allow_duplicates(&self) -> bool {
        self.config.allow_duplicates
    }

    /// Whether an assert, retract or modify is currently matching or unwinding
    pub fn is_join_operation_in_progress(&self) -> bool {
        self.join_operation_in_progress
    }

    /// Set once any pattern test or join network call failed; stays set until cleared
    pub fn evaluation_error(&self) -> bool {
        self.evaluation_error
    }

    pub fn clear_evaluation_error(&mut self) {
        self.evaluation_error = false;
    }

    pub fn halt_flag(&self) -> &HaltFlag {
        &self.halt
    }

    pub fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    pub fn atoms_mut(&mut self) -> &mut AtomTable {
        &mut self.atoms
    }

    pub fn hash_index(&self) -> &FactHashIndex {
        &self.hash_index
    }

    /// Index the next asserted fact will receive
    pub fn next_index(&self) -> FactId {
        self.next_index
    }

    pub fn stats(&self) -> FactStoreStats {
        let counters = self.counters;
        FactStoreStats {
            live_facts: self.global.len,
            garbage_facts: self.garbage.len(),
            templates: self.templates.len(),
            patterns: self.alpha.pattern_count(),
            pattern_nodes: self.alpha.node_count(),
            hash_capacity: self.hash_index.capacity(),
            hash_resizes: self.hash_index.resize_count(),
            atoms: self.atoms.len(),
            next_index: self.next_index,
            asserted: counters.asserted,
            duplicates_rejected: counters.duplicates_rejected,
            retracted: counters.retracted,
            modified: counters.modified,
            reclaimed: counters.reclaimed,
            gc_runs: counters.gc_runs,
            alpha_matches: counters.alpha_matches,
            match_retractions: counters.match_retractions,
            evaluation_errors: counters.evaluation_errors,
            guard_rejections: counters.guard_rejections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::SlotDefinition;

    fn store() -> (FactStore, TemplateId) {
        let mut store = FactStore::default();
        let id = store
            .define_template(
                Deftemplate::new("point")
                    .with_slot(SlotDefinition::single("x"))
                    .with_slot(SlotDefinition::single("y")),
            )
            .unwrap();
        (store, id)
    }

    fn point(store: &mut FactStore, x: i64, y: i64) -> FactHandle {
        let handle = store.create_fact("point").unwrap();
        store.put_slot(handle, "x", FactValue::Integer(x)).unwrap();
        store.put_slot(handle, "y", FactValue::Integer(y)).unwrap();
        handle
    }

    fn indices(store: &FactStore) -> Vec<FactId> {
        store.facts().map(|(_, fact)| fact.index()).collect()
    }

    #[test]
    fn test_create_uses_defaults() {
        let (mut store, _) = store();
        let handle = store.create_fact("point").unwrap();
        assert_eq!(store.slot_value(handle, "x"), Some(&FactValue::symbol("nil")));
        assert_eq!(store.get(handle).map(Fact::index), Some(0));
        assert!(matches!(store.create_fact("nope"), Err(FactStoreError::UnknownTemplate(_))));
    }

    #[test]
    fn test_put_slot_rejects_attached_facts() {
        let (mut store, _) = store();
        let handle = point(&mut store, 1, 2);
        store.assert_fact(handle).unwrap();
        assert_eq!(
            store.put_slot(handle, "x", FactValue::Integer(3)),
            Err(FactStoreError::FactAttached(handle))
        );
        assert!(matches!(
            store.put_slot_at(handle, 9, FactValue::Integer(3)),
            Err(FactStoreError::FactAttached(_))
        ));
    }

    #[test]
    fn test_assert_positions() {
        let (mut store, _) = store();
        let a = point(&mut store, 1, 1);
        let b = point(&mut store, 2, 2);
        let c = point(&mut store, 3, 3);
        let d = point(&mut store, 4, 4);
        store.assert_fact(a).unwrap();
        store.assert_at(b, ListPosition::Head).unwrap();
        store.assert_at(c, ListPosition::After(a)).unwrap();
        store.assert_fact(d).unwrap();
        assert_eq!(indices(&store), vec![2, 1, 3, 4]);

        let e = point(&mut store, 5, 5);
        let stale = FactHandle::new(99, 0);
        assert_eq!(store.assert_at(e, ListPosition::After(stale)), Err(AssertError::UnknownFact(stale)));
    }

    #[test]
    fn test_assert_twice_returns_same_fact() {
        let (mut store, _) = store();
        let handle = point(&mut store, 1, 2);
        assert_eq!(store.assert_fact(handle), Ok(Asserted::New(handle)));
        assert_eq!(store.assert_fact(handle), Ok(Asserted::New(handle)));
        assert_eq!(store.fact_count(), 1);
        assert_eq!(store.next_index(), 2);
    }

    #[test]
    fn test_retract_states() {
        let (mut store, _) = store();
        let handle = point(&mut store, 1, 2);
        assert_eq!(store.retract(handle), Err(RetractError::NotAsserted(handle)));
        store.assert_fact(handle).unwrap();
        store.retain(handle).unwrap();
        store.retract(handle).unwrap();
        // retracting garbage is a no-op
        assert_eq!(store.retract(handle), Ok(()));
        assert_eq!(store.assert_fact(handle), Err(AssertError::FactRetracted(handle)));
        assert!(store.get(handle).unwrap().is_garbage());
        assert_eq!(store.next_fact(Some(handle)), None);
    }

    #[test]
    fn test_garbage_reclaimed_once_released() {
        let (mut store, template) = store();
        let handle = point(&mut store, 1, 2);
        store.assert_fact(handle).unwrap();
        store.retain(handle).unwrap();
        store.retract(handle).unwrap();

        assert_eq!(store.collect_garbage(), 0);
        assert_eq!(store.garbage_count(), 1);
        assert_eq!(store.templates().busy_count(template), 1);

        store.release(handle).unwrap();
        assert_eq!(store.collect_garbage(), 1);
        assert!(store.get(handle).is_none());
        assert_eq!(store.templates().busy_count(template), 0);
        assert!(matches!(store.retain(handle), Err(FactStoreError::UnknownFact(_))));
    }

    #[test]
    fn test_automatic_collection_at_threshold() {
        let mut store = FactStore::with_config(FactBaseConfig { gc_threshold: 2, ..FactBaseConfig::default() });
        store.define_template(Deftemplate::new("n").with_slot(SlotDefinition::single("v"))).unwrap();
        let mut handles = Vec::new();
        for v in 0..2 {
            let handle = store.create_fact("n").unwrap();
            store.put_slot(handle, "v", FactValue::Integer(v)).unwrap();
            store.assert_fact(handle).unwrap();
            handles.push(handle);
        }
        store.retract(handles[0]).unwrap();
        assert_eq!(store.garbage_count(), 1);
        store.retract(handles[1]).unwrap();
        assert_eq!(store.garbage_count(), 0);
        assert_eq!(store.stats().reclaimed, 2);
    }

    #[test]
    fn test_modify_preserves_index_and_position() {
        let (mut store, _) = store();
        let handles: Vec<_> = (1..=3).map(|n| point(&mut store, n, n)).collect();
        for handle in &handles {
            store.assert_fact(*handle).unwrap();
        }

        let modified = store.modify(handles[1], &[(0, FactValue::Integer(20))]).unwrap();
        assert_ne!(modified, handles[1]);
        assert_eq!(indices(&store), vec![1, 2, 3]);
        assert_eq!(store.slot_value(modified, "x"), Some(&FactValue::Integer(20)));
        assert_eq!(store.slot_value(modified, "y"), Some(&FactValue::Integer(2)));
        assert!(store.get(handles[1]).unwrap().is_garbage());
        assert_eq!(store.next_index(), 4);
    }

    #[test]
    fn test_modify_keeps_list_positions_that_differ_from_index_order() {
        let (mut store, id) = store();
        let [a, b, c, d] = [1, 2, 3, 4].map(|n| point(&mut store, n, n));
        store.assert_fact(a).unwrap();
        store.assert_at(b, ListPosition::Head).unwrap();
        store.assert_fact(c).unwrap();
        store.assert_at(d, ListPosition::After(b)).unwrap();
        let in_template = |store: &FactStore| -> Vec<FactId> {
            store.template_facts(id).map(|(_, fact)| fact.index()).collect()
        };
        assert_eq!(indices(&store), vec![2, 4, 1, 3]);
        assert_eq!(in_template(&store), vec![1, 2, 3, 4]);

        let a = store.modify(a, &[(0, FactValue::Integer(10))]).unwrap();
        assert_eq!(indices(&store), vec![2, 4, 1, 3]);
        assert_eq!(in_template(&store), vec![1, 2, 3, 4]);
        assert_eq!(store.next_fact(Some(a)).map(|next| store.get(next).unwrap().index()), Some(3));

        // the global head and the template tail keep their places too
        store.modify(b, &[(1, FactValue::Integer(20))]).unwrap();
        store.modify(d, &[(1, FactValue::Integer(40))]).unwrap();
        assert_eq!(indices(&store), vec![2, 4, 1, 3]);
        assert_eq!(in_template(&store), vec![1, 2, 3, 4]);
        assert_eq!(store.next_index(), 5);
    }

    #[test]
    fn test_modify_without_change_is_invisible() {
        let (mut store, _) = store();
        let handle = point(&mut store, 1, 2);
        store.assert_fact(handle).unwrap();
        assert_eq!(store.modify(handle, &[]), Ok(handle));
        assert_eq!(store.modify(handle, &[(0, FactValue::Integer(1))]), Ok(handle));
        assert_eq!(store.garbage_count(), 0);
        assert_eq!(store.stats().modified, 0);
    }

    #[test]
    fn test_modify_validation_leaves_fact_untouched() {
        let (mut store, _) = store();
        let handle = point(&mut store, 1, 2);
        store.assert_fact(handle).unwrap();
        assert_eq!(
            store.modify(handle, &[(5, FactValue::Integer(1))]),
            Err(ModifyError::SlotOutOfRange { position: 5, arity: 2 })
        );
        assert!(matches!(
            store.modify(handle, &[(0, FactValue::multifield(vec![]))]),
            Err(ModifyError::PutSlot(PutSlotError::CardinalityViolation { .. }))
        ));
        assert!(store.is_asserted(handle));
    }

    #[test]
    fn test_modify_into_duplicate() {
        let (mut store, _) = store();
        let a = point(&mut store, 1, 1);
        let b = point(&mut store, 2, 2);
        store.assert_fact(a).unwrap();
        store.assert_fact(b).unwrap();

        let result = store.modify(b, &[(0, FactValue::Integer(1)), (1, FactValue::Integer(1))]).unwrap();
        assert_eq!(result, a);
        assert_eq!(store.fact_count(), 1);
        assert!(!store.is_asserted(b));
    }

    #[test]
    fn test_duplicate_copies_fact() {
        let (mut store, _) = store();
        let a = point(&mut store, 1, 1);
        store.assert_fact(a).unwrap();

        assert_eq!(store.duplicate(a, &[]), Ok(Asserted::Duplicate(a)));
        let copy = store.duplicate(a, &[(1, FactValue::Integer(9))]).unwrap();
        assert!(copy.is_new());
        assert_eq!(store.fact_count(), 2);
        assert_eq!(store.get(copy.handle()).map(Fact::index), Some(2));
        assert!(store.is_asserted(a));
    }

    #[test]
    fn test_discard_unattached() {
        let (mut store, template) = store();
        let handle = store.create_fact("point").unwrap();
        assert_eq!(store.templates().busy_count(template), 1);
        store.discard_fact(handle).unwrap();
        assert_eq!(store.templates().busy_count(template), 0);
        assert!(store.get(handle).is_none());
    }

    #[test]
    fn test_ordered_facts() {
        let mut store = FactStore::default();
        let asserted = store
            .assert_ordered("color", vec![FactValue::symbol("red"), FactValue::symbol("blue")])
            .unwrap();
        let fact = store.get(asserted.handle()).unwrap();
        assert_eq!(fact.to_string(), "(color red blue)");
        assert!(fact.template().is_implied());

        let again = store.assert_ordered("color", vec![FactValue::symbol("red"), FactValue::symbol("blue")]);
        assert_eq!(again, Ok(Asserted::Duplicate(asserted.handle())));
    }

    #[test]
    fn test_atoms_installed_until_reclaimed() {
        let mut store = FactStore::default();
        let handle = store.assert_ordered("tag", vec![FactValue::symbol("shared")]).unwrap().handle();
        let shared = FactValue::symbol("shared");
        assert_eq!(store.atoms().install_count(&shared), 1);

        store.retain(handle).unwrap();
        store.retract(handle).unwrap();
        assert_eq!(store.collect_garbage(), 0);
        // retracted but still held: the fact's atoms stay installed
        assert_eq!(store.atoms().install_count(&shared), 1);

        store.release(handle).unwrap();
        assert_eq!(store.collect_garbage(), 1);
        assert_eq!(store.atoms().install_count(&shared), 0);
        assert_eq!(store.atoms().len(), 0);
    }

    #[test]
    fn test_clear_restarts_numbering() {
        let (mut store, _) = store();
        for n in 0..3 {
            let handle = point(&mut store, n, n);
            store.assert_fact(handle).unwrap();
        }
        assert_eq!(store.clear(), Ok(3));
        assert_eq!(store.fact_count(), 0);
        assert_eq!(store.garbage_count(), 0);
        assert_eq!(store.next_index(), 1);
    }

    #[test]
    fn test_clear_keeps_numbering_while_facts_are_held() {
        let (mut store, _) = store();
        let held = point(&mut store, 1, 1);
        store.assert_fact(held).unwrap();
        store.retain(held).unwrap();
        let other = point(&mut store, 2, 2);
        store.assert_fact(other).unwrap();

        assert_eq!(store.clear(), Ok(2));
        assert_eq!(store.garbage_count(), 1);
        assert_eq!(store.next_index(), 3);

        let fresh = point(&mut store, 3, 3);
        store.assert_fact(fresh).unwrap();
        assert_ne!(store.get(fresh).unwrap().index(), store.get(held).unwrap().index());

        store.release(held).unwrap();
        store.clear().unwrap();
        assert_eq!(store.next_index(), 1);
    }

    #[test]
    fn test_set_allow_duplicates_returns_previous() {
        let (mut store, _) = store();
        assert!(!store.set_allow_duplicates(true));
        let a = point(&mut store, 1, 1);
        let b = point(&mut store, 1, 1);
        store.assert_fact(a).unwrap();
        assert_eq!(store.assert_fact(b), Ok(Asserted::New(b)));
        assert!(store.set_allow_duplicates(false));
        assert_eq!(store.fact_count(), 2);
    }

    #[test]
    fn test_iteration_by_template_and_scope() {
        let mut store = FactStore::default();
        store.templates_mut().define_module("HIDDEN", &[]).unwrap();
        store
            .define_template(Deftemplate::new("secret").in_module("HIDDEN").with_slot(SlotDefinition::single("v")))
            .unwrap();
        let visible = store.assert_ordered("seen", vec![]).unwrap().handle();
        let secret = store.create_fact("secret").unwrap();
        store.assert_fact(secret).unwrap();
        let last = store.assert_ordered("seen", vec![FactValue::Integer(1)]).unwrap().handle();

        assert_eq!(store.next_fact(None), Some(visible));
        assert_eq!(store.next_fact(Some(visible)), Some(secret));
        assert_eq!(store.next_fact_in_scope(Some(visible)), Some(last));

        let seen = store.templates().find("seen").unwrap();
        assert_eq!(store.next_fact_in_template(seen, Some(visible)), Some(last));
        assert_eq!(store.template_fact_count(seen), 2);
        assert_eq!(store.fact_by_index(3), Some(last));
    }
}
