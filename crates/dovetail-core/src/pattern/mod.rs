//! Alpha network: per-template discrimination trees over slot values
//!
//! A `Pattern` constrains some slots of one template. Patterns are compiled into
//! the template's `PatternTree`, sharing nodes with earlier patterns wherever the
//! tests coincide. Every fact asserted for the template is driven through its tree;
//! each pattern entry reached produces an `AlphaMatch` for the `JoinNetwork`.

mod matcher;
mod network;
mod tree;

pub(crate) use matcher::{FactMatcher, MatchMode, MatchOutcome};
pub use network::AlphaNetwork;
pub use tree::{NodeId, NodeKind, PatternEntry, PatternTree, SlotLength};

use crate::error::EvalError;
use crate::fact_store::FactHandle;
use crate::template::TemplateId;
use dovetail_types::{FactId, FactValue};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

// -------------------------------------------------------------------------------------------------
// Pattern definitions
// -------------------------------------------------------------------------------------------------

/// What a field test looks at: one field, or the span bound by a multifield element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldView<'a> {
    Single(&'a FactValue),
    Span(&'a [FactValue]),
}

impl<'a> FieldView<'a> {
    pub fn as_single(&self) -> Option<&'a FactValue> {
        match self {
            FieldView::Single(value) => Some(value),
            FieldView::Span(_) => None,
        }
    }

    pub fn as_span(&self) -> Option<&'a [FactValue]> {
        match self {
            FieldView::Single(_) => None,
            FieldView::Span(span) => Some(span),
        }
    }
}

type PredicateFn = dyn Fn(FieldView<'_>) -> Result<bool, EvalError> + Send + Sync;

/// A labelled test expression evaluated against a field
///
/// Two predicates are the same test only when they share the closure, so nodes
/// are shared between patterns that clone one `Predicate`.
#[derive(Clone)]
pub struct Predicate {
    label: String,
    test: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new(
        label: impl Into<String>,
        test: impl Fn(FieldView<'_>) -> Result<bool, EvalError> + Send + Sync + 'static,
    ) -> Self {
        Self { label: label.into(), test: Arc::new(test) }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn evaluate(&self, view: FieldView<'_>) -> Result<bool, EvalError> {
        (self.test)(view)
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && Arc::ptr_eq(&self.test, &other.test)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldTest {
    /// Matches anything (a bare variable or wildcard)
    Any,
    Constant(FactValue),
    NotConstant(FactValue),
    Expression(Predicate),
}

impl FieldTest {
    pub fn evaluate(&self, view: FieldView<'_>) -> Result<bool, EvalError> {
        match self {
            FieldTest::Any => Ok(true),
            FieldTest::Constant(expected) => Ok(Self::equals(expected, view)),
            FieldTest::NotConstant(expected) => Ok(!Self::equals(expected, view)),
            FieldTest::Expression(predicate) => predicate.evaluate(view),
        }
    }

    fn equals(expected: &FactValue, view: FieldView<'_>) -> bool {
        match view {
            FieldView::Single(value) => value == expected,
            FieldView::Span(span) => expected.as_multifield() == Some(span),
        }
    }
}

/// One element of a slot constraint
#[derive(Debug, Clone, PartialEq)]
pub enum PatternElement {
    /// Exactly one field
    Single(FieldTest),
    /// Zero or more consecutive fields of a multifield slot
    Multi(FieldTest),
}

impl PatternElement {
    pub fn test(&self) -> &FieldTest {
        match self {
            PatternElement::Single(test) | PatternElement::Multi(test) => test,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, PatternElement::Multi(_))
    }
}

/// Constraint on one slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPattern {
    pub slot: usize,
    pub elements: Vec<PatternElement>,
}

impl SlotPattern {
    /// A single-field test, for single slots
    pub fn single(slot: usize, test: FieldTest) -> Self {
        Self { slot, elements: vec![PatternElement::Single(test)] }
    }

    /// A sequence of elements, for multifield slots
    pub fn sequence(slot: usize, elements: Vec<PatternElement>) -> Self {
        Self { slot, elements }
    }
}

/// Constraints on the slots of one template
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub template: TemplateId,
    pub slots: Vec<SlotPattern>,
}

impl Pattern {
    pub fn new(template: TemplateId) -> Self {
        Self { template, slots: Vec::new() }
    }

    pub fn slot(mut self, slot: SlotPattern) -> Self {
        self.slots.push(slot);
        self
    }
}

// -------------------------------------------------------------------------------------------------
// Matches and the join network seam
// -------------------------------------------------------------------------------------------------

/// Identifier of a terminal pattern entry, unique across all trees of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternEntryId(pub(crate) u32);

impl fmt::Display for PatternEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern#{}", self.0)
    }
}

/// Opaque handle the join network hands back for every alpha match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchHandle(pub u64);

/// Where a multifield element landed: `len` fields starting at `start` of slot `slot`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultifieldMarker {
    pub slot: usize,
    /// Index of the element within the slot pattern
    pub element: usize,
    pub start: usize,
    pub len: usize,
}

/// A fact reaching a pattern entry
#[derive(Debug, Clone, Copy)]
pub struct AlphaMatch<'a> {
    pub fact: FactHandle,
    pub index: FactId,
    pub entry: PatternEntryId,
    pub values: &'a [FactValue],
    /// Multifield bindings along the path, in slot order
    pub markers: &'a [MultifieldMarker],
}

/// Downstream consumer of alpha matches
pub trait JoinNetwork: Any {
    /// Record a match and return the handle the fact keeps for later retraction
    fn push_alpha_match(&mut self, alpha_match: AlphaMatch<'_>) -> MatchHandle;

    /// Drop every match of a retracted fact
    fn retract_all_matches(&mut self, fact: FactHandle, matches: &[MatchHandle]) -> Result<(), EvalError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Join network that only hands out handles, for stores without rules attached
#[derive(Debug, Default)]
pub struct NullJoinNetwork {
    next: u64,
}

impl JoinNetwork for NullJoinNetwork {
    fn push_alpha_match(&mut self, _alpha_match: AlphaMatch<'_>) -> MatchHandle {
        self.next += 1;
        MatchHandle(self.next)
    }

    fn retract_all_matches(&mut self, _fact: FactHandle, _matches: &[MatchHandle]) -> Result<(), EvalError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
