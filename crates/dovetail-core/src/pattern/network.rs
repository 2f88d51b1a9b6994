use super::tree::PatternTree;
use super::{Pattern, PatternEntryId};
use crate::error::PatternError;
use crate::template::{Deftemplate, TemplateId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Every pattern tree of a store, one per template with patterns
#[derive(Debug)]
pub struct AlphaNetwork {
    trees: HashMap<TemplateId, PatternTree>,
    entry_templates: HashMap<PatternEntryId, TemplateId>,
    next_entry: u32,
    selector_threshold: usize,
}

impl AlphaNetwork {
    pub fn new(selector_threshold: usize) -> Self {
        Self {
            trees: HashMap::new(),
            entry_templates: HashMap::new(),
            next_entry: 0,
            selector_threshold,
        }
    }

    pub(crate) fn add_pattern(
        &mut self,
        template: &Arc<Deftemplate>,
        pattern: &Pattern,
        label: &str,
    ) -> Result<PatternEntryId, PatternError> {
        let entry = PatternEntryId(self.next_entry);
        let threshold = self.selector_threshold;
        let tree = self
            .trees
            .entry(pattern.template)
            .or_insert_with(|| PatternTree::new(Arc::clone(template), threshold));

        if let Err(err) = tree.add(entry, label, pattern) {
            if tree.is_empty() {
                self.trees.remove(&pattern.template);
            }
            return Err(err);
        }

        self.next_entry += 1;
        self.entry_templates.insert(entry, pattern.template);
        info!(%entry, label, template = template.name(), "Added pattern to alpha network");
        Ok(entry)
    }

    /// Remove a pattern entry; returns the template it belonged to
    pub(crate) fn remove_pattern(&mut self, entry: PatternEntryId) -> Result<TemplateId, PatternError> {
        let template = *self.entry_templates.get(&entry).ok_or(PatternError::UnknownEntry(entry))?;
        let Some(tree) = self.trees.get_mut(&template) else {
            return Err(PatternError::UnknownTemplate(template));
        };
        tree.remove(entry)?;
        if tree.is_empty() {
            // releases the tree's hold on the template
            self.trees.remove(&template);
        }
        self.entry_templates.remove(&entry);
        info!(%entry, %template, "Removed pattern from alpha network");
        Ok(template)
    }

    pub fn tree(&self, template: TemplateId) -> Option<&PatternTree> {
        self.trees.get(&template)
    }

    pub(crate) fn tree_mut(&mut self, template: TemplateId) -> Option<&mut PatternTree> {
        self.trees.get_mut(&template)
    }

    pub fn entry_template(&self, entry: PatternEntryId) -> Option<TemplateId> {
        self.entry_templates.get(&entry).copied()
    }

    pub fn pattern_count(&self) -> usize {
        self.entry_templates.len()
    }

    pub fn node_count(&self) -> usize {
        self.trees.values().map(PatternTree::node_count).sum()
    }

    /// Templates whose trees hold entries that have not seen the existing facts yet
    pub fn templates_needing_replay(&self) -> Vec<TemplateId> {
        let mut templates: Vec<_> =
            self.trees.iter().filter(|(_, tree)| tree.needs_replay()).map(|(id, _)| *id).collect();
        templates.sort();
        templates
    }
}
