//! Backtracking search across the fact lists of several templates
//!
//! A `FactQuery` is a chain of restrictions, each binding one variable to facts of
//! one or more templates. The engine enumerates the cartesian product depth first,
//! in restriction order and fact-list order, and hands every complete binding to a
//! caller-supplied test.
//!
//! Each level walks a snapshot of its fact lists taken when the level is entered.
//! Facts asserted while a query runs are therefore not visited by it, and facts
//! retracted meanwhile are skipped when their turn comes.

use crate::error::{EvalError, QueryError, fatal_invariant};
use crate::fact_store::{FactHandle, FactStore};
use crate::template::TemplateId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Restriction {
    variable: String,
    templates: Vec<String>,
}

/// Restriction chain of a query
#[derive(Debug, Clone, Default)]
pub struct FactQuery {
    restrictions: Vec<Restriction>,
}

impl FactQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `variable` to facts of any of `templates`, searched in the order given
    pub fn restrict(mut self, variable: &str, templates: &[&str]) -> Self {
        self.restrictions.push(Restriction {
            variable: variable.to_string(),
            templates: templates.iter().map(|name| (*name).to_string()).collect(),
        });
        self
    }

    fn compile(&self, store: &FactStore) -> Result<CompiledQuery, QueryError> {
        if self.restrictions.is_empty() {
            return Err(QueryError::MalformedRestriction("a query needs at least one restriction".into()));
        }
        let mut seen = HashSet::new();
        let mut levels = Vec::with_capacity(self.restrictions.len());
        for restriction in &self.restrictions {
            if !seen.insert(restriction.variable.as_str()) {
                return Err(QueryError::MalformedRestriction(format!(
                    "variable ?{} is bound twice",
                    restriction.variable
                )));
            }
            if restriction.templates.is_empty() {
                return Err(QueryError::MalformedRestriction(format!(
                    "variable ?{} has no templates",
                    restriction.variable
                )));
            }
            let templates = restriction
                .templates
                .iter()
                .map(|name| store.templates().find(name).ok_or_else(|| QueryError::UnknownTemplate(name.clone())))
                .collect::<Result<Vec<_>, _>>()?;
            levels.push(templates);
        }
        let variables = self.restrictions.iter().map(|restriction| restriction.variable.clone()).collect();
        Ok(CompiledQuery { variables, levels })
    }
}

struct CompiledQuery {
    variables: Arc<[String]>,
    levels: Vec<Vec<TemplateId>>,
}

/// One complete assignment of facts to the query's variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBinding {
    variables: Arc<[String]>,
    facts: Vec<FactHandle>,
}

impl QueryBinding {
    /// The fact bound to `variable`
    pub fn get(&self, variable: &str) -> Option<FactHandle> {
        let position = self.variables.iter().position(|name| name == variable)?;
        self.facts.get(position).copied()
    }

    /// Bound facts in restriction order
    pub fn facts(&self) -> &[FactHandle] {
        &self.facts
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FactHandle)> {
        self.variables.iter().map(String::as_str).zip(self.facts.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Query operations over one store, obtained from `FactStore::query`
pub struct QueryEngine<'s> {
    store: &'s mut FactStore,
}

impl FactStore {
    pub fn query(&mut self) -> QueryEngine<'_> {
        QueryEngine { store: self }
    }
}

impl QueryEngine<'_> {
    /// Whether any binding satisfies `test`
    pub fn any<T>(&mut self, query: &FactQuery, test: T) -> Result<bool, QueryError>
    where
        T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
    {
        Ok(self.find_first(query, test)?.is_some())
    }

    pub fn find_first<T>(&mut self, query: &FactQuery, test: T) -> Result<Option<QueryBinding>, QueryError>
    where
        T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
    {
        let mut found = None;
        self.search(query, test, |_, binding| {
            found = Some(binding);
            Ok(Flow::Stop)
        })?;
        Ok(found)
    }

    pub fn find_all<T>(&mut self, query: &FactQuery, test: T) -> Result<Vec<QueryBinding>, QueryError>
    where
        T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
    {
        let mut found = Vec::new();
        self.search(query, test, |_, binding| {
            found.push(binding);
            Ok(Flow::Continue)
        })?;
        Ok(found)
    }

    /// Run `action` on the first binding satisfying `test`; returns whether it ran
    pub fn do_for_first<T, A>(&mut self, query: &FactQuery, test: T, mut action: A) -> Result<bool, QueryError>
    where
        T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
        A: FnMut(&mut FactStore, &QueryBinding) -> Result<(), EvalError>,
    {
        let mut ran = false;
        self.search(query, test, |store, binding| {
            ran = run_action(store, &binding, &mut action)?;
            Ok(if ran { Flow::Stop } else { Flow::Continue })
        })?;
        Ok(ran)
    }

    /// Run `action` on each satisfying binding as soon as it is found; returns
    /// how many times it ran
    pub fn do_for_all<T, A>(&mut self, query: &FactQuery, test: T, mut action: A) -> Result<usize, QueryError>
    where
        T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
        A: FnMut(&mut FactStore, &QueryBinding) -> Result<(), EvalError>,
    {
        let mut runs = 0;
        self.search(query, test, |store, binding| {
            if run_action(store, &binding, &mut action)? {
                runs += 1;
            }
            Ok(Flow::Continue)
        })?;
        Ok(runs)
    }

    /// Collect every satisfying binding first, then run `action` on each binding
    /// whose facts are all still asserted
    pub fn delayed_do_for_all<T, A>(&mut self, query: &FactQuery, test: T, mut action: A) -> Result<usize, QueryError>
    where
        T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
        A: FnMut(&mut FactStore, &QueryBinding) -> Result<(), EvalError>,
    {
        let bindings = self.find_all(query, test)?;
        let mut runs = 0;
        for binding in &bindings {
            if self.store.halt_flag().is_halted() {
                break;
            }
            if run_action(self.store, binding, &mut action)? {
                runs += 1;
            }
        }
        Ok(runs)
    }

    fn search<T, V>(&mut self, query: &FactQuery, mut test: T, mut visit: V) -> Result<(), QueryError>
    where
        T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
        V: FnMut(&mut FactStore, QueryBinding) -> Result<Flow, QueryError>,
    {
        let compiled = query.compile(self.store)?;
        let mut bound = Vec::with_capacity(compiled.levels.len());
        let mut search = Search { compiled: &compiled, test: &mut test, visit: &mut visit, candidates: 0 };
        let flow = search.descend(self.store, &mut bound)?;
        debug!(
            variables = compiled.variables.len(),
            candidates = search.candidates,
            stopped = flow == Flow::Stop,
            "Query finished"
        );
        Ok(())
    }
}

struct Search<'q, T, V> {
    compiled: &'q CompiledQuery,
    test: &'q mut T,
    visit: &'q mut V,
    candidates: usize,
}

impl<T, V> Search<'_, T, V>
where
    T: FnMut(&FactStore, &QueryBinding) -> Result<bool, EvalError>,
    V: FnMut(&mut FactStore, QueryBinding) -> Result<Flow, QueryError>,
{
    fn descend(&mut self, store: &mut FactStore, bound: &mut Vec<FactHandle>) -> Result<Flow, QueryError> {
        let depth = bound.len();
        let Some(templates) = self.compiled.levels.get(depth) else {
            self.candidates += 1;
            let binding = QueryBinding { variables: Arc::clone(&self.compiled.variables), facts: bound.clone() };
            if !(self.test)(store, &binding)? {
                return Ok(Flow::Continue);
            }
            return (self.visit)(store, binding);
        };

        for &template in templates {
            for handle in store.template_handles(template) {
                if store.halt_flag().is_halted() {
                    return Ok(Flow::Stop);
                }
                // an action may have retracted an outer binding
                if bound.iter().any(|outer| !store.is_asserted(*outer)) {
                    return Ok(Flow::Continue);
                }
                if !store.is_asserted(handle) {
                    continue;
                }
                bound.push(handle);
                let flow = self.descend(store, bound)?;
                bound.pop();
                if flow == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// Run `action` with every bound fact pinned; bindings with a retracted member
/// are skipped
fn run_action<A>(store: &mut FactStore, binding: &QueryBinding, action: &mut A) -> Result<bool, QueryError>
where
    A: FnMut(&mut FactStore, &QueryBinding) -> Result<(), EvalError>,
{
    if binding.facts.iter().any(|fact| !store.is_asserted(*fact)) {
        return Ok(false);
    }
    for fact in &binding.facts {
        if store.retain(*fact).is_err() {
            fatal_invariant("query", format!("asserted fact {fact} vanished while pinning"));
        }
    }
    let result = action(store, binding);
    for fact in &binding.facts {
        if store.release(*fact).is_err() {
            fatal_invariant("query", format!("pinned fact {fact} was freed during a query action"));
        }
    }
    result?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Deftemplate, SlotDefinition};
    use dovetail_types::FactValue;

    fn store() -> FactStore {
        let mut store = FactStore::default();
        store
            .define_template(
                Deftemplate::new("person")
                    .with_slot(SlotDefinition::single("name"))
                    .with_slot(SlotDefinition::single("age")),
            )
            .unwrap();
        store
            .define_template(
                Deftemplate::new("pet")
                    .with_slot(SlotDefinition::single("owner"))
                    .with_slot(SlotDefinition::single("kind")),
            )
            .unwrap();
        for (name, age) in [("ann", 31), ("bob", 17), ("cy", 45)] {
            add(&mut store, "person", [("name", FactValue::symbol(name)), ("age", FactValue::Integer(age))]);
        }
        for (owner, kind) in [("ann", "cat"), ("cy", "dog"), ("cy", "fish")] {
            add(&mut store, "pet", [("owner", FactValue::symbol(owner)), ("kind", FactValue::symbol(kind))]);
        }
        store
    }

    fn add<const N: usize>(store: &mut FactStore, template: &str, slots: [(&str, FactValue); N]) -> FactHandle {
        let handle = store.create_fact(template).unwrap();
        for (slot, value) in slots {
            store.put_slot(handle, slot, value).unwrap();
        }
        store.assert_fact(handle).unwrap().handle()
    }

    fn owns(store: &FactStore, binding: &QueryBinding) -> Result<bool, EvalError> {
        let person = binding.get("p").and_then(|p| store.slot_value(p, "name"));
        let owner = binding.get("a").and_then(|a| store.slot_value(a, "owner"));
        Ok(person.is_some() && person == owner)
    }

    fn people_and_pets() -> FactQuery {
        FactQuery::new().restrict("p", &["person"]).restrict("a", &["pet"])
    }

    #[test]
    fn test_find_all_joins_in_order() {
        let mut store = store();
        let found = store.query().find_all(&people_and_pets(), owns).unwrap();
        let pairs: Vec<_> = found
            .iter()
            .map(|binding| {
                let p = store.get(binding.get("p").unwrap()).unwrap().index();
                let a = store.get(binding.get("a").unwrap()).unwrap().index();
                (p, a)
            })
            .collect();
        assert_eq!(pairs, vec![(1, 4), (3, 5), (3, 6)]);
    }

    #[test]
    fn test_any_and_find_first() {
        let mut store = store();
        assert!(store.query().any(&people_and_pets(), owns).unwrap());
        let minors = |store: &FactStore, binding: &QueryBinding| {
            let age = binding.get("p").and_then(|p| store.slot_value(p, "age")).and_then(FactValue::as_integer);
            Ok(age.is_some_and(|age| age < 18))
        };
        let query = FactQuery::new().restrict("p", &["person"]);
        let first = store.query().find_first(&query, minors).unwrap().unwrap();
        assert_eq!(store.slot_value(first.get("p").unwrap(), "name"), Some(&FactValue::symbol("bob")));
        assert!(!store.query().any(&people_and_pets(), |_, _| Ok(false)).unwrap());
    }

    #[test]
    fn test_do_for_all_skips_retracted_facts() {
        let mut store = store();
        let query = FactQuery::new().restrict("a", &["pet"]).restrict("b", &["pet"]);
        // retracting the inner fact makes later pairings with it disappear
        let runs = store
            .query()
            .do_for_all(&query, |_, _| Ok(true), |store, binding| {
                let b = binding.get("b").unwrap();
                store.retract(b).map_err(|err| EvalError::new(err.to_string()))
            })
            .unwrap();
        assert_eq!(runs, 3);
        assert_eq!(store.fact_count(), 3);
    }

    #[test]
    fn test_delayed_actions_do_not_see_new_facts() {
        let mut store = store();
        let query = FactQuery::new().restrict("p", &["person"]);
        let runs = store
            .query()
            .delayed_do_for_all(&query, |_, _| Ok(true), |store, binding| {
                let name = binding.get("p").and_then(|p| store.slot_value(p, "name")).cloned();
                let handle = store.create_fact("person").map_err(|err| EvalError::new(err.to_string()))?;
                store
                    .put_slot(handle, "name", name.unwrap_or_else(|| FactValue::symbol("nil")))
                    .map_err(|err| EvalError::new(err.to_string()))?;
                store.put_slot(handle, "age", FactValue::Integer(0)).map_err(|err| EvalError::new(err.to_string()))?;
                store.assert_fact(handle).map_err(|err| EvalError::new(err.to_string()))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(runs, 3);
        let person = store.templates().find("person").unwrap();
        assert_eq!(store.template_fact_count(person), 6);
    }

    #[test]
    fn test_action_pins_bound_facts() {
        let mut store = store();
        let query = FactQuery::new().restrict("p", &["person"]);
        let ran = store
            .query()
            .do_for_first(&query, |_, _| Ok(true), |store, binding| {
                let p = binding.get("p").unwrap();
                assert_eq!(store.get(p).unwrap().busy_count(), 2);
                Ok(())
            })
            .unwrap();
        assert!(ran);
        let first = store.next_fact(None).unwrap();
        assert_eq!(store.get(first).unwrap().busy_count(), 1);
    }

    #[test]
    fn test_multiple_templates_per_variable() {
        let mut store = store();
        let query = FactQuery::new().restrict("x", &["pet", "person"]);
        let found = store.query().find_all(&query, |_, _| Ok(true)).unwrap();
        let indices: Vec<_> = found.iter().map(|b| store.get(b.facts()[0]).unwrap().index()).collect();
        assert_eq!(indices, vec![4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn test_malformed_queries() {
        let mut store = store();
        let always = |_: &FactStore, _: &QueryBinding| Ok(true);
        assert!(matches!(
            store.query().find_all(&FactQuery::new(), always),
            Err(QueryError::MalformedRestriction(_))
        ));
        assert!(matches!(
            store.query().find_all(&FactQuery::new().restrict("p", &[]), always),
            Err(QueryError::MalformedRestriction(_))
        ));
        let twice = FactQuery::new().restrict("p", &["person"]).restrict("p", &["pet"]);
        assert!(matches!(store.query().find_all(&twice, always), Err(QueryError::MalformedRestriction(_))));
        assert_eq!(
            store.query().find_all(&FactQuery::new().restrict("p", &["robot"]), always),
            Err(QueryError::UnknownTemplate("robot".into()))
        );
    }

    #[test]
    fn test_evaluation_error_aborts_query() {
        let mut store = store();
        let result = store
            .query()
            .find_all(&people_and_pets(), |_, _| Err(EvalError::new("division by zero")));
        assert_eq!(result, Err(QueryError::Evaluation(EvalError::new("division by zero"))));
    }

    #[test]
    fn test_halt_returns_partial_results() {
        let mut store = store();
        let halt = store.halt_flag().clone();
        let query = FactQuery::new().restrict("p", &["person"]);
        let mut seen = 0;
        let found = store
            .query()
            .find_all(&query, |_, _| {
                seen += 1;
                if seen == 2 {
                    halt.request_halt();
                }
                Ok(true)
            })
            .unwrap();
        assert_eq!(found.len(), 2);
        store.halt_flag().clear_halt();
    }
}
