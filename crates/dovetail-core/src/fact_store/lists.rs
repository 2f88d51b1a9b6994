//! Doubly linked fact lists threaded through the arena
//!
//! The store keeps one global list in assertion order and one list per template.
//! Links live on the facts themselves; a `FactList` only knows its ends.

use super::arena::{FactArena, FactHandle};
use super::fact::{Fact, Links};
use crate::error::fatal_invariant;

/// Where to splice a newly asserted fact into the global list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListPosition {
    #[default]
    Tail,
    Head,
    /// Directly after the given asserted fact
    After(FactHandle),
}

/// Selects which set of links on a fact a list uses
pub(crate) type LinkSelector = fn(&mut Fact) -> &mut Links;

pub(crate) fn global_links(fact: &mut Fact) -> &mut Links {
    &mut fact.global
}

pub(crate) fn template_links(fact: &mut Fact) -> &mut Links {
    &mut fact.in_template
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FactList {
    pub head: Option<FactHandle>,
    pub tail: Option<FactHandle>,
    pub len: usize,
}

fn links_of(arena: &mut FactArena, select: LinkSelector, handle: FactHandle) -> &mut Links {
    match arena.get_mut(handle) {
        Some(fact) => select(fact),
        None => fatal_invariant("fact_list", format!("list link points at missing fact {handle}")),
    }
}

impl FactList {
    /// Splice `handle` in after `prev`, or at the head when `prev` is `None`
    pub fn link_after(
        &mut self,
        arena: &mut FactArena,
        select: LinkSelector,
        prev: Option<FactHandle>,
        handle: FactHandle,
    ) {
        let next = match prev {
            Some(prev) => links_of(arena, select, prev).next,
            None => self.head,
        };

        *links_of(arena, select, handle) = Links { prev, next };
        match prev {
            Some(prev) => links_of(arena, select, prev).next = Some(handle),
            None => self.head = Some(handle),
        }
        match next {
            Some(next) => links_of(arena, select, next).prev = Some(handle),
            None => self.tail = Some(handle),
        }
        self.len += 1;
    }

    /// Remove `handle`, returning its former predecessor
    pub fn unlink(&mut self, arena: &mut FactArena, select: LinkSelector, handle: FactHandle) -> Option<FactHandle> {
        let Links { prev, next } = std::mem::take(links_of(arena, select, handle));
        match prev {
            Some(prev) => links_of(arena, select, prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => links_of(arena, select, next).prev = prev,
            None => self.tail = prev,
        }
        match self.len.checked_sub(1) {
            Some(len) => self.len = len,
            None => fatal_invariant("fact_list", "unlinking from an empty list"),
        }
        prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Deftemplate, TemplateId};
    use std::sync::Arc;

    fn collect(list: &FactList, arena: &mut FactArena) -> Vec<FactHandle> {
        let mut out = Vec::new();
        let mut cursor = list.head;
        while let Some(handle) = cursor {
            out.push(handle);
            cursor = global_links(arena.get_mut(handle).unwrap()).next;
        }
        out
    }

    #[test]
    fn test_link_and_unlink() {
        let template = Arc::new(Deftemplate::implied("n"));
        let mut arena = FactArena::default();
        let handles: Vec<_> = (0..4)
            .map(|_| arena.insert(Fact::new(TemplateId(0), Arc::clone(&template), Vec::new())))
            .collect();

        let mut list = FactList::default();
        list.link_after(&mut arena, global_links, None, handles[0]);
        list.link_after(&mut arena, global_links, list.tail, handles[2]);
        list.link_after(&mut arena, global_links, Some(handles[0]), handles[1]);
        list.link_after(&mut arena, global_links, None, handles[3]);
        assert_eq!(collect(&list, &mut arena), vec![handles[3], handles[0], handles[1], handles[2]]);
        assert_eq!(list.len, 4);

        assert_eq!(list.unlink(&mut arena, global_links, handles[1]), Some(handles[0]));
        assert_eq!(list.unlink(&mut arena, global_links, handles[3]), None);
        assert_eq!(list.unlink(&mut arena, global_links, handles[2]), Some(handles[0]));
        assert_eq!(collect(&list, &mut arena), vec![handles[0]]);
        assert_eq!(list.head, list.tail);
        assert_eq!(list.len, 1);
    }
}
