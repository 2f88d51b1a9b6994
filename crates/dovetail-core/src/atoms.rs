//! Interned symbols and strings
//!
//! Facts share atom storage through the table: installing a value swaps its `Arc`
//! for the canonical one and bumps a reference count, deinstalling drops it again.
//! `sweep` forgets atoms that are neither installed nor referenced from outside.

use crate::error::fatal_invariant;
use dovetail_types::FactValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
pub struct AtomTable {
    symbols: HashMap<Arc<str>, u64>,
    strings: HashMap<Arc<str>, u64>,
}

impl AtomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical symbol value for `name`
    pub fn intern_symbol(&mut self, name: &str) -> FactValue {
        FactValue::Symbol(Self::intern(&mut self.symbols, name))
    }

    /// Canonical string value for `text`
    pub fn intern_string(&mut self, text: &str) -> FactValue {
        FactValue::String(Self::intern(&mut self.strings, text))
    }

    fn intern(table: &mut HashMap<Arc<str>, u64>, text: &str) -> Arc<str> {
        if let Some((atom, _)) = table.get_key_value(text) {
            return Arc::clone(atom);
        }
        let atom: Arc<str> = Arc::from(text);
        table.insert(Arc::clone(&atom), 0);
        atom
    }

    /// Canonicalize and count every atom inside `value`
    pub fn install(&mut self, value: &mut FactValue) {
        match value {
            FactValue::Symbol(atom) => *atom = Self::install_atom(&mut self.symbols, atom),
            FactValue::String(atom) => *atom = Self::install_atom(&mut self.strings, atom),
            FactValue::Multifield(items) => items.iter_mut().for_each(|item| self.install(item)),
            FactValue::Integer(_) | FactValue::Float(_) => {}
        }
    }

    fn install_atom(table: &mut HashMap<Arc<str>, u64>, atom: &Arc<str>) -> Arc<str> {
        if let Some((canonical, count)) = table.get_key_value(&**atom) {
            let canonical = Arc::clone(canonical);
            let count = count + 1;
            table.insert(Arc::clone(&canonical), count);
            return canonical;
        }
        table.insert(Arc::clone(atom), 1);
        Arc::clone(atom)
    }

    /// Drop one installation of every atom inside `value`
    pub fn deinstall(&mut self, value: &FactValue) {
        match value {
            FactValue::Symbol(atom) => Self::deinstall_atom(&mut self.symbols, atom),
            FactValue::String(atom) => Self::deinstall_atom(&mut self.strings, atom),
            FactValue::Multifield(items) => items.iter().for_each(|item| self.deinstall(item)),
            FactValue::Integer(_) | FactValue::Float(_) => {}
        }
    }

    fn deinstall_atom(table: &mut HashMap<Arc<str>, u64>, atom: &Arc<str>) {
        match table.get_mut(&**atom) {
            Some(count) if *count > 0 => *count -= 1,
            _ => fatal_invariant("atom_table", format!("deinstalling atom {atom:?} that was never installed")),
        }
    }

    /// Installation count of a symbol or string, zero for anything else
    pub fn install_count(&self, value: &FactValue) -> u64 {
        match value {
            FactValue::Symbol(atom) => self.symbols.get(&**atom).copied().unwrap_or(0),
            FactValue::String(atom) => self.strings.get(&**atom).copied().unwrap_or(0),
            _ => 0,
        }
    }

    /// Forget atoms with no installations and no outside references; returns how many
    pub fn sweep(&mut self) -> usize {
        let before = self.len();
        let keep = |atom: &Arc<str>, count: &mut u64| *count > 0 || Arc::strong_count(atom) > 1;
        self.symbols.retain(keep);
        self.strings.retain(keep);
        let removed = before - self.len();
        if removed > 0 {
            trace!(removed, remaining = self.len(), "Swept atom table");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.symbols.len() + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
