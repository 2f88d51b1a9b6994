use super::arena::FactHandle;
use crate::pattern::MatchHandle;
use crate::template::{Deftemplate, TemplateId};
use dovetail_types::{FactId, FactValue};
use std::fmt;
use std::sync::Arc;

/// Neighbours of a fact in one of the store's ordered lists
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Links {
    pub prev: Option<FactHandle>,
    pub next: Option<FactHandle>,
}

/// A fact instance: a template plus one value per slot.
///
/// Index 0 marks a fact that was created but never asserted. Once asserted the
/// content never changes in place; modification builds a replacement fact.
#[derive(Debug)]
pub struct Fact {
    pub(crate) index: FactId,
    pub(crate) template_id: TemplateId,
    pub(crate) template: Arc<Deftemplate>,
    pub(crate) values: Vec<FactValue>,
    pub(crate) hash: u64,
    pub(crate) busy_count: usize,
    pub(crate) garbage: bool,
    pub(crate) global: Links,
    pub(crate) in_template: Links,
    pub(crate) matches: Vec<MatchHandle>,
}

impl Fact {
    pub(crate) fn new(template_id: TemplateId, template: Arc<Deftemplate>, values: Vec<FactValue>) -> Self {
        Self {
            index: 0,
            template_id,
            template,
            values,
            hash: 0,
            busy_count: 0,
            garbage: false,
            global: Links::default(),
            in_template: Links::default(),
            matches: Vec::new(),
        }
    }

    /// Assertion index, 0 if the fact was never asserted
    pub fn index(&self) -> FactId {
        self.index
    }

    pub fn template_id(&self) -> TemplateId {
        self.template_id
    }

    pub fn template(&self) -> &Deftemplate {
        &self.template
    }

    pub fn values(&self) -> &[FactValue] {
        &self.values
    }

    pub fn value(&self, position: usize) -> Option<&FactValue> {
        self.values.get(position)
    }

    pub fn slot_value(&self, name: &str) -> Option<&FactValue> {
        self.template.slot_position(name).and_then(|position| self.values.get(position))
    }

    /// Content hash, valid while the fact is asserted
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    pub fn busy_count(&self) -> usize {
        self.busy_count
    }

    /// Retracted and waiting for reclamation
    pub fn is_garbage(&self) -> bool {
        self.garbage
    }

    pub fn is_asserted(&self) -> bool {
        self.index != 0 && !self.garbage
    }

    /// Pattern-network matches currently recorded for the fact
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// JSON form: `{"template", "index", "slots": {name: value}}`; ordered facts
    /// carry their fields as an array under `"fields"` instead of `"slots"`
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert("template".into(), self.template.name().into());
        object.insert("index".into(), self.index.into());
        if self.template.is_implied() {
            let fields = self.values.first().map_or(serde_json::Value::Array(Vec::new()), serde_json::Value::from);
            object.insert("fields".into(), fields);
        } else {
            let slots = self
                .template
                .slots()
                .iter()
                .zip(&self.values)
                .map(|(slot, value)| (slot.name.clone(), serde_json::Value::from(value)))
                .collect();
            object.insert("slots".into(), serde_json::Value::Object(slots));
        }
        serde_json::Value::Object(object)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.template.name())?;
        if self.template.is_implied() {
            if let Some(members) = self.values.first().and_then(FactValue::as_multifield) {
                for member in members {
                    write!(f, " {member}")?;
                }
            }
        } else {
            for (slot, value) in self.template.slots().iter().zip(&self.values) {
                match value.as_multifield() {
                    Some(members) => {
                        write!(f, " ({}", slot.name)?;
                        for member in members {
                            write!(f, " {member}")?;
                        }
                        write!(f, ")")?;
                    }
                    None => write!(f, " ({} {value})", slot.name)?,
                }
            }
        }
        write!(f, ")")
    }
}
