//! `ElementGraph`: the canonical flat element list plus its indexes.
//!
//! All reads go through the accessors here. Writes are coarse-grained
//! transitions (insert, splice, patch, reorder) that leave the indexes
//! consistent with the list when they return.

use crate::id::{ElementId, PageId};
use crate::index::{ElementIndexes, rebuild_indexes};
use crate::model::{Element, ElementPatch, Owner, Props};
use crate::order::OrderUpdate;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Structural rule violations rejected before any write happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("element `{0}` already exists")]
    DuplicateId(ElementId),
    #[error("element `{id}` references unknown parent `{parent}`")]
    UnknownParent { id: ElementId, parent: ElementId },
    #[error("element `{id}` and its parent `{parent}` belong to different owners")]
    CrossScopeParent { id: ElementId, parent: ElementId },
    #[error("moving `{id}` under `{parent}` would create a cycle")]
    Cycle { id: ElementId, parent: ElementId },
    #[error("element `{0}` not found")]
    NotFound(ElementId),
}

#[derive(Debug, Clone, Default)]
pub struct ElementGraph {
    elements: Vec<Element>,
    indexes: ElementIndexes,
}

impl ElementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: Vec<Element>) -> Self {
        let indexes = rebuild_indexes(&elements);
        Self { elements, indexes }
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn indexes(&self) -> &ElementIndexes {
        &self.indexes
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.indexes.position(id).map(|pos| &self.elements[pos])
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.indexes.elements_map.contains_key(&id)
    }

    /// Children of `parent` in list order. `None` yields every root.
    pub fn children(&self, parent: Option<ElementId>) -> impl Iterator<Item = &Element> {
        self.indexes
            .children_of(parent)
            .iter()
            .filter_map(|id| self.get(*id))
    }

    /// Children sorted by `(order_num, id)`.
    pub fn ordered_children(&self, parent: Option<ElementId>) -> Vec<&Element> {
        let mut out: Vec<&Element> = self.children(parent).collect();
        out.sort_by(|a, b| a.order_key().cmp(&b.order_key()).then(a.id.cmp(&b.id)));
        out
    }

    /// Siblings sharing `parent` within one owner scope.
    pub fn siblings_in_scope(&self, parent: Option<ElementId>, owner: Owner) -> Vec<&Element> {
        self.children(parent).filter(|el| el.owner == owner).collect()
    }

    /// `max(sibling order) + 1`, or 0 with no siblings. Saturates at
    /// `u32::MAX`; the reconciliation pass renumbers the resulting tie.
    pub fn next_order_num(&self, parent: Option<ElementId>, owner: Owner) -> u32 {
        self.siblings_in_scope(parent, owner)
            .iter()
            .map(|el| el.order_key())
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }

    /// Whether a sibling other than `except` already holds `order`.
    pub fn order_taken(
        &self,
        parent: Option<ElementId>,
        owner: Owner,
        order: u32,
        except: ElementId,
    ) -> bool {
        self.children(parent)
            .any(|el| el.owner == owner && el.id != except && el.order_num == Some(order))
    }

    pub fn scope_elements(&self, owner: Owner) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(move |el| el.owner == owner)
    }

    /// Every element of a page, in list order.
    pub fn page_elements(&self, page: PageId) -> Vec<&Element> {
        let Some(entry) = self.indexes.page_index.get(&page) else {
            return Vec::new();
        };
        self.elements
            .iter()
            .filter(|el| entry.element_ids.contains(&el.id))
            .collect()
    }

    pub fn page_roots(&self, page: PageId) -> Vec<&Element> {
        self.indexes
            .page_index
            .get(&page)
            .map(|entry| entry.root_ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    pub fn page_body(&self, page: PageId) -> Option<&Element> {
        self.indexes
            .page_bodies
            .get(&page)
            .and_then(|id| self.get(*id))
    }

    /// Instances of `master`, sorted by id.
    pub fn instances_of(&self, master: ElementId) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .indexes
            .instances_of(master)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Elements consuming variable `name`, sorted by id.
    pub fn variable_consumers(&self, name: &str) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .indexes
            .variable_consumers(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Every descendant of `id` (excluding `id`), breadth-first.
    pub fn descendants(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for child in self.indexes.children_of(Some(current)) {
                if seen.insert(*child) {
                    out.push(*child);
                    queue.push_back(*child);
                }
            }
        }
        out
    }

    /// `id` followed by all of its descendants.
    pub fn subtree(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = vec![id];
        out.extend(self.descendants(id));
        out
    }

    /// Whether `ancestor` appears on `id`'s parent chain.
    pub fn is_ancestor_of(&self, ancestor: ElementId, id: ElementId) -> bool {
        let mut seen = HashSet::new();
        let mut current = self.get(id).and_then(|el| el.parent_id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            if !seen.insert(parent) {
                return false;
            }
            current = self.get(parent).and_then(|el| el.parent_id);
        }
        false
    }

    // ─── Validation ──────────────────────────────────────────────────────

    /// Check a batch of new elements against the graph and each other.
    /// Parents may point at existing elements or at earlier batch members.
    pub fn validate_insert(&self, batch: &[Element]) -> Result<(), GraphError> {
        let mut owners: HashMap<ElementId, Owner> = HashMap::with_capacity(batch.len());
        for el in batch {
            if self.contains(el.id) || owners.contains_key(&el.id) {
                return Err(GraphError::DuplicateId(el.id));
            }
            owners.insert(el.id, el.owner);
        }
        for el in batch {
            let Some(parent) = el.parent_id else {
                continue;
            };
            let parent_owner = match owners.get(&parent) {
                Some(owner) => *owner,
                None => match self.get(parent) {
                    Some(p) => p.owner,
                    None => return Err(GraphError::UnknownParent { id: el.id, parent }),
                },
            };
            if parent_owner != el.owner {
                return Err(GraphError::CrossScopeParent { id: el.id, parent });
            }
        }
        Ok(())
    }

    /// Check that `id` may move under `parent`.
    pub fn validate_reparent(&self, id: ElementId, parent: Option<ElementId>) -> Result<(), GraphError> {
        let el = self.get(id).ok_or(GraphError::NotFound(id))?;
        let Some(parent) = parent else {
            return Ok(());
        };
        let target = self
            .get(parent)
            .ok_or(GraphError::UnknownParent { id, parent })?;
        if target.owner != el.owner {
            return Err(GraphError::CrossScopeParent { id, parent });
        }
        if parent == id || self.is_ancestor_of(id, parent) {
            return Err(GraphError::Cycle { id, parent });
        }
        Ok(())
    }

    // ─── Writes ──────────────────────────────────────────────────────────

    /// Replace the whole list.
    pub fn replace_all(&mut self, elements: Vec<Element>) {
        self.elements = elements;
        self.rebuild();
    }

    /// Append a batch and rebuild once. Callers validate first.
    pub fn insert_many(&mut self, batch: Vec<Element>) {
        self.elements.extend(batch);
        self.rebuild();
    }

    /// Remove `ids` and return the removed elements in list order.
    pub fn remove_ids(&mut self, ids: &HashSet<ElementId>) -> Vec<Element> {
        let (removed, kept): (Vec<Element>, Vec<Element>) = std::mem::take(&mut self.elements)
            .into_iter()
            .partition(|el| ids.contains(&el.id));
        self.elements = kept;
        self.rebuild();
        removed
    }

    /// One transition: drop `remove`, then upsert `upsert` (replacing in
    /// place when the id is still present, appending otherwise).
    pub fn splice(&mut self, remove: &HashSet<ElementId>, upsert: Vec<Element>) {
        let mut incoming: HashMap<ElementId, Element> =
            upsert.into_iter().map(|el| (el.id, el)).collect();
        let mut appended: Vec<ElementId> = Vec::new();
        let mut next = Vec::with_capacity(self.elements.len() + incoming.len());
        for el in std::mem::take(&mut self.elements) {
            if let Some(replacement) = incoming.remove(&el.id) {
                next.push(replacement);
            } else if !remove.contains(&el.id) {
                next.push(el);
            }
        }
        appended.extend(incoming.keys().copied());
        appended.sort();
        for id in appended {
            if let Some(el) = incoming.remove(&id) {
                next.push(el);
            }
        }
        self.elements = next;
        self.rebuild();
    }

    /// Replace props wholesale. Returns the previous element when the
    /// props actually changed.
    pub fn set_props(&mut self, id: ElementId, props: Props) -> Option<Element> {
        self.apply_patch(id, &ElementPatch::props(props))
    }

    /// Apply a partial update, patching indexes incrementally where the
    /// change allows it. Returns the previous element when anything changed.
    pub fn apply_patch(&mut self, id: ElementId, patch: &ElementPatch) -> Option<Element> {
        let pos = self.indexes.position(id)?;
        let before = self.elements[pos].clone();
        if !self.elements[pos].apply_patch(patch) {
            return None;
        }
        let after = &self.elements[pos];
        let needs_rebuild = before.tag != after.tag || before.component != after.component;
        if needs_rebuild {
            self.rebuild();
            return Some(before);
        }
        if before.parent_id != after.parent_id {
            self.indexes.patch_reparent(after, before.parent_id);
        }
        if before.props != after.props || before.variable_bindings != after.variable_bindings {
            self.indexes.patch_variable_usage(&before, after);
        }
        Some(before)
    }

    /// Write order numbers. Order does not feed any index, so no rebuild.
    /// Returns how many elements changed.
    pub fn set_orders(&mut self, updates: &[OrderUpdate]) -> usize {
        let mut changed = 0;
        for update in updates {
            if let Some(pos) = self.indexes.position(update.id) {
                let el = &mut self.elements[pos];
                if el.order_num != Some(update.order_num) {
                    el.order_num = Some(update.order_num);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Rename an element id, rewriting every reference to it. Returns
    /// `false` if `old` is unknown or `new` is taken.
    pub fn reassign_id(&mut self, old: ElementId, new: ElementId) -> bool {
        if !self.contains(old) || self.contains(new) {
            return false;
        }
        for el in &mut self.elements {
            el.rename_references(old, new);
        }
        self.rebuild();
        true
    }

    fn rebuild(&mut self) {
        self.indexes = rebuild_indexes(&self.elements);
    }

    pub fn into_elements(self) -> Vec<Element> {
        self.elements
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────
