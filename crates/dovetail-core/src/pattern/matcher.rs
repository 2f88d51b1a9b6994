//! Drives one fact through a pattern tree
//!
//! The walk is depth first. A multifield node tries every admissible span length,
//! widest first, and each choice shifts the positions of the elements after it in
//! the same slot. Markers for the spans chosen along the current path are handed
//! to the join network with every match.

use super::tree::{NodeId, NodeKind, NodeTest, PatternNode, PatternTree};
use super::{AlphaMatch, FieldView, JoinNetwork, MatchHandle, MultifieldMarker, PatternEntryId};
use crate::error::EvalError;
use crate::fact_store::{Fact, FactHandle};
use crate::halt::HaltFlag;
use dovetail_types::{FactId, FactValue};
use tracing::{error, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchMode {
    /// Every node is visited; only replayed entries receive matches
    Assert,
    /// Only nodes and entries added since the last reset are visited
    IncrementalReset,
}

#[derive(Debug, Default)]
pub(crate) struct MatchOutcome {
    pub matches: Vec<MatchHandle>,
    pub evaluation_error: bool,
    pub halted: bool,
}

pub(crate) struct FactMatcher<'a> {
    tree: &'a PatternTree,
    fact: FactHandle,
    index: FactId,
    values: &'a [FactValue],
    network: &'a mut dyn JoinNetwork,
    halt: &'a HaltFlag,
    mode: MatchMode,
    markers: Vec<MultifieldMarker>,
    outcome: MatchOutcome,
}

impl<'a> FactMatcher<'a> {
    pub fn new(
        tree: &'a PatternTree,
        handle: FactHandle,
        fact: &'a Fact,
        network: &'a mut dyn JoinNetwork,
        halt: &'a HaltFlag,
        mode: MatchMode,
    ) -> Self {
        Self {
            tree,
            fact: handle,
            index: fact.index,
            values: &fact.values,
            network,
            halt,
            mode,
            markers: Vec::new(),
            outcome: MatchOutcome::default(),
        }
    }

    pub fn run(mut self) -> MatchOutcome {
        let tree = self.tree;
        if self.halted() {
            return self.outcome;
        }
        self.emit(tree.root_entries());
        for &child in tree.root_children() {
            self.visit(child, None, 0, false);
        }
        trace!(fact = self.index, matches = self.outcome.matches.len(), "Matched fact against pattern tree");
        self.outcome
    }

    fn halted(&mut self) -> bool {
        if self.halt.is_halted() {
            self.outcome.halted = true;
        }
        self.outcome.halted
    }

    /// `offset` is the shift of element positions caused by earlier spans in `slot`
    fn visit(&mut self, id: NodeId, slot: Option<usize>, offset: isize, dispatched: bool) {
        if self.halted() {
            return;
        }
        let tree = self.tree;
        let node = tree.node(id);
        if self.mode == MatchMode::IncrementalReset && node.initialized {
            return;
        }

        let offset = if slot == Some(node.shape.slot) { offset } else { 0 };
        let Some(field) = self.values.get(node.shape.slot) else {
            return;
        };
        if !dispatched {
            if let Some(length) = node.shape.length_check {
                if !length.accepts(field.field_count()) {
                    return;
                }
            }
        }

        match node.shape.kind {
            NodeKind::Single => self.visit_single(id, node, field, offset, dispatched),
            NodeKind::Multifield => self.visit_multifield(id, node, field, offset),
        }
    }

    fn visit_single(&mut self, id: NodeId, node: &'a PatternNode, field: &'a FactValue, offset: isize, dispatched: bool) {
        let slot = node.shape.slot;
        let position = node.shape.element as isize + offset;
        let value = if node.shape.multi_slot {
            let member = usize::try_from(position)
                .ok()
                .and_then(|position| field.as_multifield()?.get(position));
            match member {
                Some(member) => member,
                None => return,
            }
        } else {
            field
        };

        match &node.test {
            NodeTest::Selector(table) => {
                if let Some(&child) = table.get(value) {
                    self.visit(child, Some(slot), offset, true);
                }
                return;
            }
            NodeTest::Field(test) if !dispatched => match test.evaluate(FieldView::Single(value)) {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    self.report(id, node, position, &err);
                    return;
                }
            },
            NodeTest::Field(_) => {}
        }

        self.emit(&node.entries);
        for &child in &node.children {
            self.visit(child, Some(slot), offset, false);
        }
    }

    fn visit_multifield(&mut self, id: NodeId, node: &'a PatternNode, field: &'a FactValue, offset: isize) {
        let Some(members) = field.as_multifield() else {
            return;
        };
        let Ok(start) = usize::try_from(node.shape.element as isize + offset) else {
            return;
        };
        let Some(widest) = members
            .len()
            .checked_sub(start)
            .and_then(|remaining| remaining.checked_sub(node.shape.leave_fields))
        else {
            return;
        };
        // the last multifield in a slot takes whatever the single fields leave over
        let narrowest = if node.shape.multis_after == 0 { widest } else { 0 };

        for len in (narrowest..=widest).rev() {
            if self.halted() {
                return;
            }
            let span = &members[start..start + len];
            if let NodeTest::Field(test) = &node.test {
                match test.evaluate(FieldView::Span(span)) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        self.report(id, node, start as isize, &err);
                        continue;
                    }
                }
            }

            self.markers.push(MultifieldMarker {
                slot: node.shape.slot,
                element: node.shape.element,
                start,
                len,
            });
            let shifted = offset + len as isize - 1;
            self.emit(&node.entries);
            for &child in &node.children {
                self.visit(child, Some(node.shape.slot), shifted, false);
            }
            self.markers.pop();
        }
    }

    fn emit(&mut self, entries: &[PatternEntryId]) {
        for &entry in entries {
            // an entry receives matches from asserts only once existing facts were replayed into it
            let initialized = self.tree.entry(entry).is_some_and(|entry| entry.initialized);
            if initialized == (self.mode == MatchMode::IncrementalReset) {
                continue;
            }
            let handle = self.network.push_alpha_match(AlphaMatch {
                fact: self.fact,
                index: self.index,
                entry,
                values: self.values,
                markers: &self.markers,
            });
            self.outcome.matches.push(handle);
        }
    }

    fn report(&mut self, id: NodeId, node: &PatternNode, position: isize, err: &EvalError) {
        let slot = self
            .tree
            .template()
            .slot(node.shape.slot)
            .map_or("?", |slot| slot.name.as_str());
        let patterns = self.tree.reachable_labels(id);
        error!(
            fact = self.index,
            slot,
            field = position,
            ?patterns,
            error = %err,
            "Pattern test failed while matching fact"
        );
        self.outcome.evaluation_error = true;
    }
}
