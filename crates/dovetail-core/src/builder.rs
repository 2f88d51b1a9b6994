//! Staged construction of template facts
//!
//! A `FactBuilder` collects slot values for one template, validating each as it
//! arrives, and asserts the finished fact on `commit`. The builder can be reused:
//! every commit or abort leaves it empty and ready for the next fact.

use crate::error::{BuilderError, PutSlotError};
use crate::fact_store::{Asserted, FactStore};
use crate::template::{Deftemplate, TemplateId};
use dovetail_types::FactValue;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct FactBuilder {
    template_id: TemplateId,
    template: Arc<Deftemplate>,
    staged: Vec<Option<FactValue>>,
}

impl FactBuilder {
    /// Start building facts of `template`; implied templates are rejected
    pub fn new(store: &FactStore, template: &str) -> Result<Self, BuilderError> {
        let (template_id, definition) = store
            .templates()
            .by_name(template)
            .ok_or_else(|| BuilderError::UnknownTemplate(template.to_string()))?;
        if definition.is_implied() {
            return Err(BuilderError::ImpliedTemplate(template.to_string()));
        }
        Ok(Self {
            template_id,
            staged: vec![None; definition.arity()],
            template: Arc::clone(definition),
        })
    }

    pub fn template(&self) -> &Deftemplate {
        &self.template
    }

    /// Stage a slot value. Later calls for the same slot replace earlier ones.
    pub fn put_slot(&mut self, slot: &str, value: FactValue) -> Result<&mut Self, BuilderError> {
        let position = self.template.slot_position(slot).ok_or_else(|| PutSlotError::SlotNotFound {
            template: self.template.name().to_string(),
            slot: slot.to_string(),
        })?;
        self.template.slots()[position].check(&value)?;
        self.staged[position] = Some(value);
        Ok(self)
    }

    pub fn is_set(&self, slot: &str) -> bool {
        self.template
            .slot_position(slot)
            .is_some_and(|position| self.staged[position].is_some())
    }

    /// Fill unset slots from their defaults and assert the fact.
    ///
    /// Staged values are kept when the commit is refused or a required slot is
    /// missing, and cleared otherwise.
    pub fn commit(&mut self, store: &mut FactStore) -> Result<Asserted, BuilderError> {
        if store.is_join_operation_in_progress() {
            return Err(BuilderError::CouldNotAssert);
        }
        let current = store
            .templates()
            .get(self.template_id)
            .is_some_and(|template| Arc::ptr_eq(template, &self.template));
        if !current {
            self.reset();
            return Err(BuilderError::UnknownTemplate(self.template.name().to_string()));
        }

        let mut values = Vec::with_capacity(self.staged.len());
        for (definition, staged) in self.template.slots().iter().zip(&self.staged) {
            let value = match staged {
                Some(value) => value.clone(),
                None => definition.default_value().ok_or_else(|| BuilderError::SlotRequired {
                    template: self.template.name().to_string(),
                    slot: definition.name.clone(),
                })?,
            };
            values.push(value);
        }

        let handle = store.create_fact_with_values(self.template_id, Arc::clone(&self.template), values);
        self.reset();
        let asserted = store.assert_fact(handle)?;
        debug!(template = self.template.name(), new = asserted.is_new(), "Committed fact builder");
        Ok(asserted)
    }

    /// Drop the staged values
    pub fn abort(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.staged.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ConstraintDescriptor, DefaultSpec, SlotDefinition};
    use dovetail_types::ValueType;

    fn store() -> FactStore {
        let mut store = FactStore::default();
        store
            .define_template(
                Deftemplate::new("order")
                    .with_slot(SlotDefinition::single("id").with_default(DefaultSpec::None))
                    .with_slot(
                        SlotDefinition::single("qty")
                            .with_constraints(ConstraintDescriptor::default().types(&[ValueType::Integer])),
                    )
                    .with_slot(SlotDefinition::multi("items")),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_commit_fills_defaults_and_resets() {
        let mut store = store();
        let mut builder = FactBuilder::new(&store, "order").unwrap();
        builder.put_slot("id", FactValue::Integer(7)).unwrap();
        assert!(builder.is_set("id"));

        let handle = builder.commit(&mut store).unwrap().handle();
        assert_eq!(store.slot_value(handle, "qty"), Some(&FactValue::Integer(0)));
        assert_eq!(store.slot_value(handle, "items"), Some(&FactValue::empty_multifield()));
        assert!(!builder.is_set("id"));

        builder.put_slot("id", FactValue::Integer(8)).unwrap();
        let second = builder.commit(&mut store).unwrap();
        assert!(second.is_new());
        assert_eq!(store.fact_count(), 2);
    }

    #[test]
    fn test_required_slot() {
        let mut store = store();
        let mut builder = FactBuilder::new(&store, "order").unwrap();
        assert_eq!(
            builder.commit(&mut store),
            Err(BuilderError::SlotRequired { template: "order".into(), slot: "id".into() })
        );
        assert_eq!(store.fact_count(), 0);
    }

    #[test]
    fn test_put_slot_validation() {
        let store = store();
        let mut builder = FactBuilder::new(&store, "order").unwrap();
        assert!(matches!(
            builder.put_slot("missing", FactValue::Integer(1)),
            Err(BuilderError::PutSlot(PutSlotError::SlotNotFound { .. }))
        ));
        assert!(matches!(
            builder.put_slot("qty", FactValue::symbol("many")),
            Err(BuilderError::PutSlot(PutSlotError::TypeViolation { .. }))
        ));
        assert!(matches!(
            builder.put_slot("items", FactValue::Integer(1)),
            Err(BuilderError::PutSlot(PutSlotError::CardinalityViolation { .. }))
        ));
    }

    #[test]
    fn test_rejects_unknown_and_implied_templates() {
        let mut store = store();
        store.assert_ordered("color", vec![FactValue::symbol("red")]).unwrap();
        assert_eq!(
            FactBuilder::new(&store, "nope").unwrap_err(),
            BuilderError::UnknownTemplate("nope".into())
        );
        assert_eq!(
            FactBuilder::new(&store, "color").unwrap_err(),
            BuilderError::ImpliedTemplate("color".into())
        );
    }

    #[test]
    fn test_abort_discards_staged_values() {
        let mut store = store();
        let mut builder = FactBuilder::new(&store, "order").unwrap();
        builder.put_slot("id", FactValue::Integer(1)).unwrap();
        builder.abort();
        assert!(matches!(builder.commit(&mut store), Err(BuilderError::SlotRequired { .. })));
    }
}
