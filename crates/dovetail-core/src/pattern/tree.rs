//! Discrimination tree for one template
//!
//! Each pattern becomes a path of nodes, one per slot element, in slot order.
//! Paths share a prefix while their nodes test the same field the same way. When
//! enough siblings test one field against different constants they are grouped
//! under a selector node that dispatches on the field value with a single lookup.

use super::{FieldTest, Pattern, PatternElement, PatternEntryId};
use crate::error::{PatternError, fatal_invariant};
use crate::fact_store::FactHandle;
use crate::template::Deftemplate;
use dovetail_types::FactValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Tests exactly one field
    Single,
    /// Binds a span of zero or more fields of a multifield slot
    Multifield,
}

/// Field count required of a multifield slot, checked by the slot's first node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotLength {
    Exact(usize),
    AtLeast(usize),
}

impl SlotLength {
    pub fn accepts(self, len: usize) -> bool {
        match self {
            SlotLength::Exact(n) => len == n,
            SlotLength::AtLeast(n) => len >= n,
        }
    }
}

/// Which field a node looks at and how it sits within its slot pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeShape {
    pub kind: NodeKind,
    pub slot: usize,
    /// Element index within the slot pattern
    pub element: usize,
    pub multi_slot: bool,
    /// Single-field elements following this one in the slot
    pub leave_fields: usize,
    /// Multifield elements following this one in the slot
    pub multis_after: usize,
    pub length_check: Option<SlotLength>,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeTest {
    Field(FieldTest),
    Selector(HashMap<FactValue, NodeId>),
}

#[derive(Debug, Clone)]
pub(crate) struct PatternNode {
    pub shape: NodeShape,
    pub test: NodeTest,
    /// Pattern entries terminating here
    pub entries: Vec<PatternEntryId>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Reached through a selector, which already performed the test
    pub selected: bool,
    pub initialized: bool,
}

impl PatternNode {
    fn new(shape: NodeShape, test: NodeTest, parent: Option<NodeId>, selected: bool) -> Self {
        Self {
            shape,
            test,
            entries: Vec::new(),
            parent,
            children: Vec::new(),
            selected,
            initialized: false,
        }
    }

    pub fn is_selector(&self) -> bool {
        matches!(self.test, NodeTest::Selector(_))
    }
}

/// A terminal pattern entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternEntry {
    pub id: PatternEntryId,
    pub label: String,
    /// Existing facts have already been replayed through it
    pub initialized: bool,
    pub(crate) node: Option<NodeId>,
}

#[derive(Debug)]
pub struct PatternTree {
    template: Arc<Deftemplate>,
    nodes: Vec<Option<PatternNode>>,
    free: Vec<u32>,
    root_children: Vec<NodeId>,
    /// Entries of patterns that constrain no slot at all
    root_entries: Vec<PatternEntryId>,
    entries: BTreeMap<PatternEntryId, PatternEntry>,
    selector_threshold: usize,
    /// Facts an interrupted reset already replayed
    replayed: HashSet<FactHandle>,
}

impl PatternTree {
    pub(crate) fn new(template: Arc<Deftemplate>, selector_threshold: usize) -> Self {
        Self {
            template,
            nodes: Vec::new(),
            free: Vec::new(),
            root_children: Vec::new(),
            root_entries: Vec::new(),
            entries: BTreeMap::new(),
            selector_threshold,
            replayed: HashSet::new(),
        }
    }

    pub fn template(&self) -> &Deftemplate {
        &self.template
    }

    // ---------------------------------------------------------------------------------------------
    // Compilation
    // ---------------------------------------------------------------------------------------------

    fn compile(&self, pattern: &Pattern) -> Result<Vec<(NodeShape, FieldTest)>, PatternError> {
        let mut slots: Vec<_> = pattern.slots.iter().collect();
        slots.sort_by_key(|slot| slot.slot);

        let arity = self.template.arity();
        let mut path = Vec::new();
        let mut previous = None;
        for slot_pattern in slots {
            let Some(definition) = self.template.slot(slot_pattern.slot) else {
                return Err(PatternError::SlotOutOfRange { position: slot_pattern.slot, arity });
            };
            if previous == Some(slot_pattern.slot) {
                return Err(PatternError::DuplicateSlot { slot: definition.name.clone() });
            }
            previous = Some(slot_pattern.slot);

            let elements = &slot_pattern.elements;
            if !definition.is_multi() {
                let [PatternElement::Single(test)] = elements.as_slice() else {
                    return Err(PatternError::SingleSlotShape {
                        slot: definition.name.clone(),
                        elements: elements.len(),
                    });
                };
                let shape = NodeShape {
                    kind: NodeKind::Single,
                    slot: slot_pattern.slot,
                    element: 0,
                    multi_slot: false,
                    leave_fields: 0,
                    multis_after: 0,
                    length_check: None,
                };
                path.push((shape, test.clone()));
                continue;
            }

            if elements.is_empty() {
                return Err(PatternError::EmptySlotPattern { slot: definition.name.clone() });
            }
            let singles = elements.iter().filter(|element| !element.is_multi()).count();
            let length = if singles == elements.len() {
                SlotLength::Exact(singles)
            } else {
                SlotLength::AtLeast(singles)
            };

            for (position, element) in elements.iter().enumerate() {
                let rest = &elements[position + 1..];
                let multis_after = rest.iter().filter(|element| element.is_multi()).count();
                let shape = NodeShape {
                    kind: if element.is_multi() { NodeKind::Multifield } else { NodeKind::Single },
                    slot: slot_pattern.slot,
                    element: position,
                    multi_slot: true,
                    leave_fields: rest.len() - multis_after,
                    multis_after,
                    length_check: (position == 0).then_some(length),
                };
                path.push((shape, element.test().clone()));
            }
        }
        Ok(path)
    }

    // ---------------------------------------------------------------------------------------------
    // Adding and removing patterns
    // ---------------------------------------------------------------------------------------------

    /// Compile `pattern` into the tree, terminating at a new entry
    pub(crate) fn add(&mut self, entry: PatternEntryId, label: &str, pattern: &Pattern) -> Result<(), PatternError> {
        let path = self.compile(pattern)?;

        let mut parent = None;
        for (shape, test) in path {
            parent = Some(self.find_or_insert(parent, shape, test));
        }

        match parent {
            Some(node) => self.node_mut(node).entries.push(entry),
            None => self.root_entries.push(entry),
        }
        self.entries.insert(
            entry,
            PatternEntry { id: entry, label: label.to_string(), initialized: false, node: parent },
        );

        // the new path must be visited by the next incremental reset
        let mut cursor = parent;
        while let Some(id) = cursor {
            let node = self.node_mut(id);
            node.initialized = false;
            cursor = node.parent;
        }
        Ok(())
    }

    fn find_or_insert(&mut self, parent: Option<NodeId>, shape: NodeShape, test: FieldTest) -> NodeId {
        let siblings = self.children_of(parent).clone();
        let constant = match (&test, shape.kind) {
            (FieldTest::Constant(value), NodeKind::Single) => Some(value.clone()),
            _ => None,
        };

        if let Some(value) = &constant {
            let selector = siblings.iter().copied().find(|&id| {
                let node = self.node(id);
                node.is_selector() && node.shape == shape
            });
            if let Some(selector) = selector {
                if let NodeTest::Selector(table) = &self.node(selector).test {
                    if let Some(&child) = table.get(value) {
                        return child;
                    }
                }
                let child = self.alloc(PatternNode::new(shape, NodeTest::Field(test), Some(selector), true));
                let node = self.node_mut(selector);
                node.children.push(child);
                if let NodeTest::Selector(table) = &mut node.test {
                    table.insert(value.clone(), child);
                }
                return child;
            }
        }

        let existing = siblings.iter().copied().find(|&id| {
            let node = self.node(id);
            node.shape == shape && matches!(&node.test, NodeTest::Field(existing) if *existing == test)
        });
        if let Some(existing) = existing {
            return existing;
        }

        let id = self.alloc(PatternNode::new(shape, NodeTest::Field(test), parent, false));
        self.children_of_mut(parent).push(id);
        if constant.is_some() {
            self.group_constants(parent, shape);
        }
        id
    }

    /// Move constant tests on one field under a selector once there are enough of them
    fn group_constants(&mut self, parent: Option<NodeId>, shape: NodeShape) {
        let constants: Vec<(NodeId, FactValue, bool)> = self
            .children_of(parent)
            .iter()
            .filter_map(|&id| {
                let node = self.node(id);
                match &node.test {
                    NodeTest::Field(FieldTest::Constant(value)) if node.shape == shape => {
                        Some((id, value.clone(), node.initialized))
                    }
                    _ => None,
                }
            })
            .collect();
        if constants.len() < self.selector_threshold {
            return;
        }

        let selector = self.alloc(PatternNode::new(shape, NodeTest::Selector(HashMap::new()), parent, false));
        let mut table = HashMap::with_capacity(constants.len());
        for (id, value, _) in &constants {
            let node = self.node_mut(*id);
            node.parent = Some(selector);
            node.selected = true;
            table.insert(value.clone(), *id);
        }

        let grouped: HashSet<NodeId> = constants.iter().map(|(id, _, _)| *id).collect();
        let node = self.node_mut(selector);
        node.children = constants.iter().map(|(id, _, _)| *id).collect();
        node.test = NodeTest::Selector(table);
        node.initialized = constants.iter().all(|(_, _, initialized)| *initialized);

        let children = self.children_of_mut(parent);
        if let Some(first) = children.iter().position(|id| grouped.contains(id)) {
            children[first] = selector;
        }
        children.retain(|id| !grouped.contains(id));

        debug!(
            template = self.template.name(),
            slot = shape.slot,
            element = shape.element,
            grouped = grouped.len(),
            "Grouped constant tests under a selector node"
        );
    }

    /// Detach an entry and prune the nodes that no longer lead anywhere
    pub(crate) fn remove(&mut self, entry: PatternEntryId) -> Result<(), PatternError> {
        let info = self.entries.remove(&entry).ok_or(PatternError::UnknownEntry(entry))?;
        let Some(node) = info.node else {
            self.root_entries.retain(|existing| *existing != entry);
            return Ok(());
        };
        self.node_mut(node).entries.retain(|existing| *existing != entry);

        let mut cursor = Some(node);
        while let Some(id) = cursor {
            let node = self.node(id);
            if !node.entries.is_empty() || !node.children.is_empty() {
                break;
            }
            let parent = node.parent;
            match parent {
                Some(parent) => {
                    let parent = self.node_mut(parent);
                    parent.children.retain(|child| *child != id);
                    if let NodeTest::Selector(table) = &mut parent.test {
                        table.retain(|_, child| *child != id);
                    }
                }
                None => self.root_children.retain(|child| *child != id),
            }
            self.release(id);
            cursor = parent;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Node storage
    // ---------------------------------------------------------------------------------------------

    fn alloc(&mut self, node: PatternNode) -> NodeId {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = Some(node);
            return NodeId(slot);
        }
        self.nodes.push(Some(node));
        NodeId(self.nodes.len() as u32 - 1)
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0 as usize] = None;
        self.free.push(id.0);
    }

    pub(crate) fn node(&self, id: NodeId) -> &PatternNode {
        match self.nodes.get(id.0 as usize).and_then(Option::as_ref) {
            Some(node) => node,
            None => fatal_invariant("pattern_tree", format!("dangling node reference {id:?}")),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut PatternNode {
        match self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(node) => node,
            None => fatal_invariant("pattern_tree", format!("dangling node reference {id:?}")),
        }
    }

    fn children_of(&self, parent: Option<NodeId>) -> &Vec<NodeId> {
        match parent {
            Some(id) => &self.node(id).children,
            None => &self.root_children,
        }
    }

    fn children_of_mut(&mut self, parent: Option<NodeId>) -> &mut Vec<NodeId> {
        match parent {
            Some(id) => &mut self.node_mut(id).children,
            None => &mut self.root_children,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Queries used by the matcher and by diagnostics
    // ---------------------------------------------------------------------------------------------

    pub(crate) fn root_children(&self) -> &[NodeId] {
        &self.root_children
    }

    pub(crate) fn root_entries(&self) -> &[PatternEntryId] {
        &self.root_entries
    }

    pub fn entry(&self, id: PatternEntryId) -> Option<&PatternEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PatternEntry> {
        self.entries.values()
    }

    /// Labels of every entry at or below `id`
    pub(crate) fn reachable_labels(&self, id: NodeId) -> Vec<String> {
        let mut labels = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            labels.extend(node.entries.iter().filter_map(|entry| self.entry(*entry)).map(|e| e.label.clone()));
            stack.extend(node.children.iter().copied());
        }
        labels.sort();
        labels
    }

    /// Flag everything as replayed after an incremental reset
    pub(crate) fn mark_initialized(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.initialized = true;
        }
        for entry in self.entries.values_mut() {
            entry.initialized = true;
        }
        self.replayed.clear();
    }

    pub(crate) fn record_replayed(&mut self, fact: FactHandle) {
        self.replayed.insert(fact);
    }

    pub(crate) fn is_replayed(&self, fact: FactHandle) -> bool {
        self.replayed.contains(&fact)
    }

    pub fn needs_replay(&self) -> bool {
        self.entries.values().any(|entry| !entry.initialized)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn selector_count(&self) -> usize {
        self.nodes.iter().flatten().filter(|node| node.is_selector()).count()
    }

    /// Nodes directly under the root, selectors included
    pub fn root_width(&self) -> usize {
        self.root_children.len()
    }
}
