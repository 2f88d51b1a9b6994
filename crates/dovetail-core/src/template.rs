//! Deftemplates: the schemas describing fact slots
//!
//! The registry owns every template and hands out `Arc<Deftemplate>` to facts,
//! builders and pattern trees. A template cannot be undefined while its busy count
//! is non-zero or while anything else still shares the `Arc`.

use crate::error::{PutSlotError, TemplateError, fatal_invariant};
use dovetail_types::{FactValue, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name of the module every template lives in unless told otherwise
pub const MAIN_MODULE: &str = "MAIN";

/// Name of the single multifield slot of an implied (ordered) template
pub const IMPLIED_SLOT: &str = "implied";

/// Identifier of a template inside one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub(crate) u32);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template#{}", self.0)
    }
}

/// Whether a slot holds exactly one field or a multifield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotCardinality {
    Single,
    Multi,
}

/// Constraints checked whenever a value is written into a slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintDescriptor {
    /// Allowed value types; `None` allows every type
    pub allowed_types: Option<Vec<ValueType>>,
    /// Allowed values; `None` allows every value
    pub allowed_values: Option<Vec<FactValue>>,
    /// Inclusive numeric range, open on either side
    pub range: Option<(Option<f64>, Option<f64>)>,
    /// Minimum member count of a multifield slot
    pub min_cardinality: usize,
    /// Maximum member count of a multifield slot
    pub max_cardinality: Option<usize>,
}

impl ConstraintDescriptor {
    pub fn types(mut self, types: &[ValueType]) -> Self {
        self.allowed_types = Some(types.to_vec());
        self
    }

    pub fn values(mut self, values: Vec<FactValue>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn cardinality(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_cardinality = min;
        self.max_cardinality = max;
        self
    }

    fn check_member(&self, slot: &str, value: &FactValue) -> Result<(), PutSlotError> {
        if let Some(types) = &self.allowed_types {
            if !types.contains(&value.value_type()) {
                return Err(PutSlotError::TypeViolation {
                    slot: slot.to_string(),
                    found: value.value_type(),
                });
            }
        }

        if let Some(values) = &self.allowed_values {
            if !values.contains(value) {
                return Err(PutSlotError::AllowedValuesViolation {
                    slot: slot.to_string(),
                    value: value.to_string(),
                });
            }
        }

        if let (Some((min, max)), Some(number)) = (self.range, value.as_f64()) {
            let below = min.is_some_and(|min| number < min);
            let above = max.is_some_and(|max| number > max);
            if below || above {
                return Err(PutSlotError::RangeViolation {
                    slot: slot.to_string(),
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Smallest value satisfying the type, value and range constraints
    fn derived_member(&self) -> FactValue {
        if let Some(first) = self.allowed_values.as_ref().and_then(|values| values.first()) {
            return first.clone();
        }

        let preferred = match &self.allowed_types {
            None => ValueType::Symbol,
            Some(types) if types.contains(&ValueType::Symbol) => ValueType::Symbol,
            Some(types) => types.first().copied().unwrap_or(ValueType::Symbol),
        };
        let minimum = self.range.and_then(|(min, _)| min);

        match preferred {
            ValueType::String => FactValue::string(""),
            #[allow(clippy::cast_possible_truncation)]
            ValueType::Integer => FactValue::Integer(minimum.map_or(0, |min| min.ceil() as i64)),
            ValueType::Float => FactValue::Float(minimum.unwrap_or(0.0)),
            ValueType::Symbol | ValueType::Multifield => FactValue::symbol("nil"),
        }
    }
}

/// The producer of a value for a slot the caller left unset
#[derive(Clone, Default)]
pub enum DefaultSpec {
    /// Type-appropriate default derived from the constraints
    #[default]
    Derived,
    /// A fixed value
    Static(FactValue),
    /// Evaluated each time a default is needed
    Dynamic(Arc<dyn Fn() -> FactValue + Send + Sync>),
    /// No default: the slot must be set explicitly
    None,
}

impl fmt::Debug for DefaultSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultSpec::Derived => write!(f, "Derived"),
            DefaultSpec::Static(value) => write!(f, "Static({value})"),
            DefaultSpec::Dynamic(_) => write!(f, "Dynamic(<fn>)"),
            DefaultSpec::None => write!(f, "None"),
        }
    }
}

/// A named field of a template
#[derive(Debug, Clone)]
pub struct SlotDefinition {
    pub name: String,
    pub cardinality: SlotCardinality,
    pub constraints: ConstraintDescriptor,
    pub default: DefaultSpec,
}

impl SlotDefinition {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality: SlotCardinality::Single,
            constraints: ConstraintDescriptor::default(),
            default: DefaultSpec::Derived,
        }
    }

    pub fn multi(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality: SlotCardinality::Multi,
            constraints: ConstraintDescriptor::default(),
            default: DefaultSpec::Derived,
        }
    }

    pub fn with_constraints(mut self, constraints: ConstraintDescriptor) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_default(mut self, default: DefaultSpec) -> Self {
        self.default = default;
        self
    }

    pub fn is_multi(&self) -> bool {
        self.cardinality == SlotCardinality::Multi
    }

    /// Validate a value against this slot's cardinality and constraints
    pub fn check(&self, value: &FactValue) -> Result<(), PutSlotError> {
        match (self.cardinality, value.as_multifield()) {
            (SlotCardinality::Single, Some(_)) => Err(PutSlotError::CardinalityViolation {
                slot: self.name.clone(),
                expected: "a single field value".to_string(),
            }),
            (SlotCardinality::Single, None) => self.constraints.check_member(&self.name, value),
            (SlotCardinality::Multi, None) => Err(PutSlotError::CardinalityViolation {
                slot: self.name.clone(),
                expected: "a multifield value".to_string(),
            }),
            (SlotCardinality::Multi, Some(members)) => {
                let too_short = members.len() < self.constraints.min_cardinality;
                let too_long = self.constraints.max_cardinality.is_some_and(|max| members.len() > max);
                if too_short || too_long {
                    let upper = self
                        .constraints
                        .max_cardinality
                        .map_or_else(|| "any number of".to_string(), |max| max.to_string());
                    return Err(PutSlotError::CardinalityViolation {
                        slot: self.name.clone(),
                        expected: format!(
                            "between {} and {} fields",
                            self.constraints.min_cardinality, upper
                        ),
                    });
                }
                members.iter().try_for_each(|member| self.constraints.check_member(&self.name, member))
            }
        }
    }

    /// Value used when the slot is left unset, `None` when the slot is required
    pub fn default_value(&self) -> Option<FactValue> {
        match &self.default {
            DefaultSpec::Static(value) => Some(value.clone()),
            DefaultSpec::Dynamic(producer) => Some(producer()),
            DefaultSpec::None => None,
            DefaultSpec::Derived => Some(match self.cardinality {
                SlotCardinality::Single => self.constraints.derived_member(),
                SlotCardinality::Multi => FactValue::Multifield(vec![
                    self.constraints.derived_member();
                    self.constraints.min_cardinality
                ]),
            }),
        }
    }
}

/// A fact schema: ordered slots plus the module it belongs to
#[derive(Debug, Clone)]
pub struct Deftemplate {
    name: String,
    module: String,
    slots: Vec<SlotDefinition>,
    implied: bool,
}

impl Deftemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), module: MAIN_MODULE.to_string(), slots: Vec::new(), implied: false }
    }

    /// Schema of an ordered fact: one implicit multifield slot
    pub fn implied(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: MAIN_MODULE.to_string(),
            slots: vec![SlotDefinition::multi(IMPLIED_SLOT)],
            implied: true,
        }
    }

    pub fn with_slot(mut self, slot: SlotDefinition) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn is_implied(&self) -> bool {
        self.implied
    }

    pub fn slots(&self) -> &[SlotDefinition] {
        &self.slots
    }

    pub fn slot(&self, position: usize) -> Option<&SlotDefinition> {
        self.slots.get(position)
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }

    fn validate(&self) -> Result<(), TemplateError> {
        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.name.as_str()) {
                return Err(TemplateError::DuplicateSlot {
                    template: self.name.clone(),
                    slot: slot.name.clone(),
                });
            }
            if let DefaultSpec::Static(value) = &slot.default {
                slot.check(value).map_err(|source| TemplateError::InvalidDefault {
                    template: self.name.clone(),
                    slot: slot.name.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TemplateEntry {
    template: Arc<Deftemplate>,
    busy: usize,
}

/// Registry of every template known to a fact store
#[derive(Debug)]
pub struct TemplateRegistry {
    entries: Vec<Option<TemplateEntry>>,
    by_name: HashMap<String, TemplateId>,
    /// module -> modules it imports
    modules: HashMap<String, HashSet<String>>,
    current_module: String,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    pub fn new() -> Self {
        let mut modules = HashMap::new();
        modules.insert(MAIN_MODULE.to_string(), HashSet::new());
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            modules,
            current_module: MAIN_MODULE.to_string(),
        }
    }

    /// Register a template and return its identifier
    pub fn define(&mut self, template: Deftemplate) -> Result<TemplateId, TemplateError> {
        if self.by_name.contains_key(template.name()) {
            return Err(TemplateError::DuplicateTemplate(template.name().to_string()));
        }
        if !self.modules.contains_key(template.module()) {
            return Err(TemplateError::UnknownModule(template.module().to_string()));
        }
        template.validate()?;

        let id = TemplateId(self.entries.len() as u32);
        debug!(template = template.name(), %id, slots = template.arity(), "Defined template");
        self.by_name.insert(template.name().to_string(), id);
        self.entries.push(Some(TemplateEntry { template: Arc::new(template), busy: 0 }));
        Ok(id)
    }

    /// Remove a template that nothing references any more
    pub fn undefine(&mut self, name: &str) -> Result<(), TemplateError> {
        let id = self.find(name).ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;
        let Some(entry) = self.entries.get_mut(id.0 as usize).and_then(Option::take) else {
            fatal_invariant("template_registry", format!("name index points at empty {id}"));
        };

        let shared = Arc::strong_count(&entry.template) - 1;
        if entry.busy > 0 || shared > 0 {
            let busy = entry.busy + shared;
            self.entries[id.0 as usize] = Some(entry);
            return Err(TemplateError::TemplateInUse { name: name.to_string(), busy });
        }

        self.by_name.remove(name);
        debug!(template = name, "Undefined template");
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<TemplateId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: TemplateId) -> Option<&Arc<Deftemplate>> {
        self.entries.get(id.0 as usize).and_then(Option::as_ref).map(|entry| &entry.template)
    }

    pub fn by_name(&self, name: &str) -> Option<(TemplateId, &Arc<Deftemplate>)> {
        let id = self.find(name)?;
        self.get(id).map(|template| (id, template))
    }

    pub fn slot_position(&self, id: TemplateId, slot: &str) -> Option<usize> {
        self.get(id)?.slot_position(slot)
    }

    /// Default for an unset slot; `None` when the slot is required or unknown
    pub fn default_value(&self, id: TemplateId, position: usize) -> Option<FactValue> {
        self.get(id)?.slot(position)?.default_value()
    }

    /// Template of ordered facts with the given relation name, created on first use
    pub fn implied_template(&mut self, relation: &str) -> Result<TemplateId, TemplateError> {
        match self.by_name(relation) {
            Some((id, template)) if template.is_implied() => Ok(id),
            Some(_) => Err(TemplateError::DuplicateTemplate(relation.to_string())),
            None => {
                let module = self.current_module.clone();
                self.define(Deftemplate::implied(relation).in_module(module))
            }
        }
    }

    pub fn increment_busy(&mut self, id: TemplateId) {
        match self.entries.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(entry) => entry.busy += 1,
            None => fatal_invariant("template_registry", format!("busy count on missing {id}")),
        }
    }

    pub fn decrement_busy(&mut self, id: TemplateId) {
        match self.entries.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(entry) if entry.busy > 0 => entry.busy -= 1,
            Some(_) => fatal_invariant("template_registry", format!("busy count underflow on {id}")),
            None => fatal_invariant("template_registry", format!("busy count on missing {id}")),
        }
    }

    pub fn busy_count(&self, id: TemplateId) -> usize {
        self.entries.get(id.0 as usize).and_then(Option::as_ref).map_or(0, |entry| entry.busy)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TemplateId, &Arc<Deftemplate>)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.as_ref().map(|entry| (TemplateId(i as u32), &entry.template)))
    }

    // ---------------------------------------------------------------------------------------------
    // Modules and scope
    // ---------------------------------------------------------------------------------------------

    /// Declare a module importing the given (already defined) modules
    pub fn define_module(&mut self, name: &str, imports: &[&str]) -> Result<(), TemplateError> {
        if let Some(missing) = imports.iter().find(|import| !self.modules.contains_key(**import)) {
            return Err(TemplateError::UnknownModule((*missing).to_string()));
        }
        let imports = imports.iter().map(|import| (*import).to_string()).collect();
        self.modules.insert(name.to_string(), imports);
        Ok(())
    }

    pub fn set_current_module(&mut self, name: &str) -> Result<String, TemplateError> {
        if !self.modules.contains_key(name) {
            return Err(TemplateError::UnknownModule(name.to_string()));
        }
        Ok(std::mem::replace(&mut self.current_module, name.to_string()))
    }

    pub fn current_module(&self) -> &str {
        &self.current_module
    }

    /// Whether facts of the template are in scope from the current module
    pub fn is_visible(&self, id: TemplateId) -> bool {
        let Some(template) = self.get(id) else {
            return false;
        };
        template.module() == self.current_module
            || self
                .modules
                .get(&self.current_module)
                .is_some_and(|imports| imports.contains(template.module()))
    }
}
