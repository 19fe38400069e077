//! Keyed diff between two element lists.

use crate::id::ElementId;
use crate::model::Element;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementListDiff {
    /// In `next` only, in `next` order.
    pub added: Vec<Element>,
    /// In `prev` only, in `prev` order.
    pub removed: Vec<Element>,
    /// `(before, after)` for ids in both lists whose elements differ.
    pub updated: Vec<(Element, Element)>,
}

impl ElementListDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Every id touched by the diff.
    pub fn touched_ids(&self) -> HashSet<ElementId> {
        self.added
            .iter()
            .chain(&self.removed)
            .map(|el| el.id)
            .chain(self.updated.iter().map(|(before, _)| before.id))
            .collect()
    }

    /// Snapshots as they were: removed plus the `before` side of updates.
    pub fn before(&self) -> Vec<Element> {
        self.removed
            .iter()
            .cloned()
            .chain(self.updated.iter().map(|(before, _)| before.clone()))
            .collect()
    }

    /// Snapshots as they are: added plus the `after` side of updates.
    pub fn after(&self) -> Vec<Element> {
        self.added
            .iter()
            .cloned()
            .chain(self.updated.iter().map(|(_, after)| after.clone()))
            .collect()
    }
}

/// Compare two lists by id. Elements are equal when structurally equal.
#[must_use]
pub fn diff_elements(prev: &[Element], next: &[Element]) -> ElementListDiff {
    let prev_by_id: HashMap<ElementId, &Element> = prev.iter().map(|el| (el.id, el)).collect();
    let next_ids: HashSet<ElementId> = next.iter().map(|el| el.id).collect();

    let mut diff = ElementListDiff::default();
    for el in next {
        match prev_by_id.get(&el.id) {
            None => diff.added.push(el.clone()),
            Some(before) if *before != el => diff.updated.push(((*before).clone(), el.clone())),
            Some(_) => {}
        }
    }
    diff.removed = prev
        .iter()
        .filter(|el| !next_ids.contains(&el.id))
        .cloned()
        .collect();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PageId;
    use crate::model::Owner;

    fn el(name: &str) -> Element {
        Element::new(
            ElementId::intern(name),
            "Box",
            Owner::Page(PageId::intern("diff_page")),
        )
    }

    #[test]
    fn classifies_added_removed_updated() {
        let prev = vec![el("d_keep"), el("d_gone"), el("d_edit")];
        let next = vec![el("d_keep"), el("d_edit").with_prop("x", 1), el("d_new")];
        let diff = diff_elements(&prev, &next);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed[0].id, ElementId::intern("d_gone"));
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.touched_ids().len(), 3);
        assert_eq!(diff.before().len(), 2);
        assert_eq!(diff.after().len(), 2);
    }

    #[test]
    fn identical_lists_diff_empty() {
        let list = vec![el("d_same")];
        assert!(diff_elements(&list, &list).is_empty());
    }
}
