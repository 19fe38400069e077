//! Derived lookup structures over the flat element list.
//!
//! Indexes are rebuilt from the canonical list after every structural
//! change. The only incremental paths are parent reassignment and
//! props-only updates, which patch the affected entries in place.

use crate::id::{ElementId, PageId};
use crate::model::{Element, Owner};
use crate::variables::collect_variable_refs;
use std::collections::{HashMap, HashSet};

/// Per-page membership: every element of the page plus its roots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageEntry {
    pub element_ids: HashSet<ElementId>,
    /// Null-parent elements and children of the page Body, in list order.
    pub root_ids: Vec<ElementId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementIndexes {
    /// id → position in the canonical element list.
    pub elements_map: HashMap<ElementId, usize>,
    /// parent → children in list order. `None` is the root bucket.
    pub children_map: HashMap<Option<ElementId>, Vec<ElementId>>,
    /// Only page-owned elements; layout elements are not page-indexed.
    pub page_index: HashMap<PageId, PageEntry>,
    /// master → instances. Every master has an entry, even with no instances.
    pub component_index: HashMap<ElementId, HashSet<ElementId>>,
    /// variable name → consuming elements.
    pub variable_usage_index: HashMap<String, HashSet<ElementId>>,
    /// The first Body element of each page.
    pub page_bodies: HashMap<PageId, ElementId>,
}

/// Build every index from scratch in two linear passes.
///
/// Duplicate ids keep their first occurrence.
#[must_use]
pub fn rebuild_indexes(elements: &[Element]) -> ElementIndexes {
    let mut idx = ElementIndexes {
        elements_map: HashMap::with_capacity(elements.len()),
        ..Default::default()
    };

    // Pass 1: identity, grouping, reverse maps.
    for (pos, el) in elements.iter().enumerate() {
        if idx.elements_map.contains_key(&el.id) {
            log::debug!("rebuild_indexes: duplicate id {} at {pos}, skipped", el.id);
            continue;
        }
        idx.elements_map.insert(el.id, pos);
        idx.children_map.entry(el.parent_id).or_default().push(el.id);

        if let Owner::Page(page) = el.owner
            && el.is_body()
        {
            idx.page_bodies.entry(page).or_insert(el.id);
        }

        if el.is_master() {
            idx.component_index.entry(el.id).or_default();
        }
        if let Some(master) = el.master_id() {
            idx.component_index.entry(master).or_default().insert(el.id);
        }

        for name in variable_names(el) {
            idx.variable_usage_index
                .entry(name.to_string())
                .or_default()
                .insert(el.id);
        }
    }

    // Pass 2: page membership, which needs every page Body known.
    for (pos, el) in elements.iter().enumerate() {
        let Owner::Page(page) = el.owner else {
            continue;
        };
        if idx.elements_map.get(&el.id) != Some(&pos) {
            continue;
        }
        let body = idx.page_bodies.get(&page).copied();
        let entry = idx.page_index.entry(page).or_default();
        entry.element_ids.insert(el.id);
        if is_page_root(el, body) {
            entry.root_ids.push(el.id);
        }
    }

    idx
}

/// Variable names an element consumes: declared bindings plus `$--name`
/// references in its props.
pub fn variable_names(el: &Element) -> Vec<&str> {
    let mut names: Vec<&str> = el.variable_bindings.iter().map(String::as_str).collect();
    for name in collect_variable_refs(&el.props) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn is_page_root(el: &Element, body: Option<ElementId>) -> bool {
    match el.parent_id {
        None => true,
        Some(parent) => Some(parent) == body,
    }
}

impl ElementIndexes {
    pub fn position(&self, id: ElementId) -> Option<usize> {
        self.elements_map.get(&id).copied()
    }

    pub fn children_of(&self, parent: Option<ElementId>) -> &[ElementId] {
        self.children_map
            .get(&parent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn instances_of(&self, master: ElementId) -> Option<&HashSet<ElementId>> {
        self.component_index.get(&master)
    }

    pub fn variable_consumers(&self, name: &str) -> Option<&HashSet<ElementId>> {
        self.variable_usage_index.get(name)
    }

    /// Insert `id` into `list` keeping list order consistent with the
    /// canonical positions.
    fn insert_in_list_order(
        positions: &HashMap<ElementId, usize>,
        list: &mut Vec<ElementId>,
        id: ElementId,
    ) {
        let Some(&pos) = positions.get(&id) else {
            return;
        };
        let at = list.partition_point(|other| positions.get(other).is_some_and(|&p| p < pos));
        list.insert(at, id);
    }

    /// Patch the indexes after `el` moved from `old_parent` to its current
    /// `parent_id`. Positions are unchanged by a reparent.
    pub fn patch_reparent(&mut self, el: &Element, old_parent: Option<ElementId>) {
        if old_parent == el.parent_id {
            return;
        }
        if let Some(list) = self.children_map.get_mut(&old_parent) {
            list.retain(|c| *c != el.id);
            if list.is_empty() {
                self.children_map.remove(&old_parent);
            }
        }
        let list = self.children_map.entry(el.parent_id).or_default();
        Self::insert_in_list_order(&self.elements_map, list, el.id);

        if let Owner::Page(page) = el.owner {
            let body = self.page_bodies.get(&page).copied();
            if let Some(entry) = self.page_index.get_mut(&page) {
                entry.root_ids.retain(|r| *r != el.id);
                if is_page_root(el, body) {
                    Self::insert_in_list_order(&self.elements_map, &mut entry.root_ids, el.id);
                }
            }
        }
    }

    /// Patch the variable-usage entries after a props-only update.
    pub fn patch_variable_usage(&mut self, before: &Element, after: &Element) {
        let old_names = variable_names(before);
        let new_names = variable_names(after);
        for name in &old_names {
            if new_names.contains(name) {
                continue;
            }
            if let Some(set) = self.variable_usage_index.get_mut(*name) {
                set.remove(&before.id);
                if set.is_empty() {
                    self.variable_usage_index.remove(*name);
                }
            }
        }
        for name in new_names {
            self.variable_usage_index
                .entry(name.to_string())
                .or_default()
                .insert(after.id);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────
