//! Undo/redo history.
//!
//! Every logical mutation records one `HistoryEntry` holding full element
//! snapshots on both sides: `before` (touched elements as they were) and
//! `after` (touched elements as they are now). Reverting an entry deletes
//! the `after` ids and restores the `before` snapshots; replaying does the
//! opposite. A batch touching many elements is still one entry.
//!
//! History is kept per owner scope. Each timeline is a list plus a cursor
//! (the number of applied entries), so jumping to any point is a sequence
//! of undo or redo steps.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use weave_core::{Element, ElementId, Owner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Add,
    Remove,
    Update,
    Batch,
    Group,
    Ungroup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub description: String,
    pub before: Vec<Element>,
    pub after: Vec<Element>,
}

impl HistoryEntry {
    pub fn new(
        kind: HistoryKind,
        description: impl Into<String>,
        before: Vec<Element>,
        after: Vec<Element>,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            before,
            after,
        }
    }

    pub fn before_ids(&self) -> HashSet<ElementId> {
        self.before.iter().map(|el| el.id).collect()
    }

    pub fn after_ids(&self) -> HashSet<ElementId> {
        self.after.iter().map(|el| el.id).collect()
    }

    /// Whether reverting or replaying can change tree structure.
    pub fn is_structural(&self) -> bool {
        match self.kind {
            HistoryKind::Add | HistoryKind::Remove | HistoryKind::Group | HistoryKind::Ungroup => {
                true
            }
            HistoryKind::Update | HistoryKind::Batch => {
                let after: HashMap<ElementId, &Element> =
                    self.after.iter().map(|el| (el.id, el)).collect();
                self.before.len() != self.after.len()
                    || self.before.iter().any(|b| {
                        after
                            .get(&b.id)
                            .is_none_or(|a| a.parent_id != b.parent_id || a.order_num != b.order_num)
                    })
            }
        }
    }
}

/// One step of a [`HistoryManager::go_to`] walk.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStep {
    Undo(HistoryEntry),
    Redo(HistoryEntry),
}

#[derive(Debug, Clone, Default)]
struct Timeline {
    entries: Vec<HistoryEntry>,
    /// Entries `[0, cursor)` are applied.
    cursor: usize,
}

#[derive(Debug)]
pub struct HistoryManager {
    timelines: HashMap<Owner, Timeline>,
    current: Option<Owner>,
    limit: usize,
}

impl HistoryManager {
    pub fn new(limit: usize) -> Self {
        Self {
            timelines: HashMap::new(),
            current: None,
            limit: limit.max(1),
        }
    }

    pub fn current_scope(&self) -> Option<Owner> {
        self.current
    }

    /// Switch the active timeline. Other timelines are kept.
    pub fn set_current_scope(&mut self, scope: Option<Owner>) {
        self.current = scope;
    }

    /// Forget every entry of `scope`.
    pub fn reset_scope(&mut self, scope: Owner) {
        self.timelines.remove(&scope);
    }

    fn timeline(&self) -> Option<&Timeline> {
        self.current.and_then(|scope| self.timelines.get(&scope))
    }

    /// Append an entry to the active timeline, truncating any redo tail.
    /// Returns `false` (and drops the entry) when no scope is active.
    pub fn record(&mut self, entry: HistoryEntry) -> bool {
        let Some(scope) = self.current else {
            log::debug!("history: no active scope, dropping {:?}", entry.kind);
            return false;
        };
        let limit = self.limit;
        let timeline = self.timelines.entry(scope).or_default();
        timeline.entries.truncate(timeline.cursor);
        timeline.entries.push(entry);
        if timeline.entries.len() > limit {
            timeline.entries.remove(0);
        }
        timeline.cursor = timeline.entries.len();
        true
    }

    /// Step back once. Returns the entry to revert.
    pub fn undo(&mut self) -> Option<HistoryEntry> {
        let timeline = self.timelines.get_mut(&self.current?)?;
        if timeline.cursor == 0 {
            return None;
        }
        timeline.cursor -= 1;
        Some(timeline.entries[timeline.cursor].clone())
    }

    /// Step forward once. Returns the entry to replay.
    pub fn redo(&mut self) -> Option<HistoryEntry> {
        let timeline = self.timelines.get_mut(&self.current?)?;
        let entry = timeline.entries.get(timeline.cursor)?.clone();
        timeline.cursor += 1;
        Some(entry)
    }

    /// Move the cursor to `index` (the number of applied entries), returning
    /// the steps to perform in order. Out-of-range indexes are clamped.
    pub fn go_to(&mut self, index: usize) -> Vec<HistoryStep> {
        let Some(scope) = self.current else {
            return Vec::new();
        };
        let Some(timeline) = self.timelines.get_mut(&scope) else {
            return Vec::new();
        };
        let target = index.min(timeline.entries.len());
        let mut steps = Vec::new();
        while timeline.cursor > target {
            timeline.cursor -= 1;
            steps.push(HistoryStep::Undo(timeline.entries[timeline.cursor].clone()));
        }
        while timeline.cursor < target {
            steps.push(HistoryStep::Redo(timeline.entries[timeline.cursor].clone()));
            timeline.cursor += 1;
        }
        steps
    }

    pub fn can_undo(&self) -> bool {
        self.timeline().is_some_and(|t| t.cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.timeline().is_some_and(|t| t.cursor < t.entries.len())
    }

    /// Rewrite `old` to `new` in every snapshot of every timeline, so
    /// entries recorded before an id reassignment still address the
    /// renamed element.
    pub fn rename_id(&mut self, old: ElementId, new: ElementId) {
        let snapshots = self
            .timelines
            .values_mut()
            .flat_map(|t| t.entries.iter_mut())
            .flat_map(|e| e.before.iter_mut().chain(e.after.iter_mut()));
        for el in snapshots {
            el.rename_references(old, new);
        }
    }

    /// Entries of the active timeline, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        self.timeline().map(|t| t.entries.as_slice()).unwrap_or_default()
    }

    /// Number of applied entries in the active timeline.
    pub fn cursor(&self) -> usize {
        self.timeline().map_or(0, |t| t.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::PageId;

    fn scope(name: &str) -> Owner {
        Owner::Page(PageId::intern(name))
    }

    fn entry(desc: &str) -> HistoryEntry {
        HistoryEntry::new(HistoryKind::Update, desc, Vec::new(), Vec::new())
    }

    #[test]
    fn record_requires_active_scope() {
        let mut h = HistoryManager::new(10);
        assert!(!h.record(entry("lost")));
        h.set_current_scope(Some(scope("hist_a")));
        assert!(h.record(entry("kept")));
        assert_eq!(h.entries().len(), 1);
    }

    #[test]
    fn new_entry_truncates_redo_tail() {
        let mut h = HistoryManager::new(10);
        h.set_current_scope(Some(scope("hist_b")));
        h.record(entry("one"));
        h.record(entry("two"));
        assert_eq!(h.undo().map(|e| e.description), Some("two".to_string()));
        assert!(h.can_redo());
        h.record(entry("three"));
        assert!(!h.can_redo());
        let names: Vec<&str> = h.entries().iter().map(|e| e.description.as_str()).collect();
        assert_eq!(names, vec!["one", "three"]);
    }

    #[test]
    fn limit_drops_oldest() {
        let mut h = HistoryManager::new(2);
        h.set_current_scope(Some(scope("hist_c")));
        for name in ["a", "b", "c"] {
            h.record(entry(name));
        }
        assert_eq!(h.entries()[0].description, "b");
        assert_eq!(h.cursor(), 2);
    }

    #[test]
    fn go_to_walks_both_directions() {
        let mut h = HistoryManager::new(10);
        h.set_current_scope(Some(scope("hist_d")));
        for name in ["a", "b", "c"] {
            h.record(entry(name));
        }
        let steps = h.go_to(1);
        assert_eq!(steps.len(), 2);
        assert!(matches!(&steps[0], HistoryStep::Undo(e) if e.description == "c"));
        assert!(matches!(&steps[1], HistoryStep::Undo(e) if e.description == "b"));

        let steps = h.go_to(99);
        assert_eq!(steps.len(), 2);
        assert!(matches!(&steps[0], HistoryStep::Redo(e) if e.description == "b"));
        assert_eq!(h.cursor(), 3);
    }

    #[test]
    fn rename_id_rewrites_snapshots_in_every_timeline() {
        let page = scope("hist_f");
        let old = ElementId::intern("hist_tmp");
        let new = ElementId::intern("hist_srv");
        let parent = Element::new(old, "Box", page);
        let child = Element::new(ElementId::intern("hist_kid"), "Text", page).with_parent(old);

        let mut h = HistoryManager::new(10);
        h.set_current_scope(Some(page));
        h.record(HistoryEntry::new(HistoryKind::Add, "Add Box", Vec::new(), vec![parent]));
        h.record(HistoryEntry::new(HistoryKind::Add, "Add Text", Vec::new(), vec![child]));
        h.set_current_scope(None);
        h.rename_id(old, new);
        h.set_current_scope(Some(page));

        assert_eq!(h.entries()[0].after[0].id, new);
        assert_eq!(h.entries()[1].after[0].parent_id, Some(new));
    }

    #[test]
    fn timelines_are_per_scope() {
        let mut h = HistoryManager::new(10);
        h.set_current_scope(Some(scope("hist_e1")));
        h.record(entry("page one"));
        h.set_current_scope(Some(scope("hist_e2")));
        assert!(!h.can_undo());
        h.set_current_scope(Some(scope("hist_e1")));
        assert!(h.can_undo());
        h.reset_scope(scope("hist_e1"));
        assert!(!h.can_undo());
    }
}
