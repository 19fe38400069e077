//! Selection state read by inspector panels and the canvas overlay.
//!
//! The store drives every transition; this type only keeps the ordered
//! selection, its membership set and the inspector snapshot consistent.

use std::collections::HashSet;
use weave_core::{ElementId, Props};

use crate::schedule::TaskHandle;

#[derive(Debug, Default, Clone)]
pub struct SelectionState {
    ids: Vec<ElementId>,
    members: HashSet<ElementId>,
    editing_context: Option<ElementId>,
    /// Inspector snapshot of the primary selection.
    props: Props,
    /// Stored props the snapshot was taken from, before resolution.
    raw_props: Props,
    /// Pending hydrate task for the primary selection.
    pub(crate) hydrate_task: Option<TaskHandle>,
}

impl SelectionState {
    /// The primary (first) selected element.
    pub fn selected_element_id(&self) -> Option<ElementId> {
        self.ids.first().copied()
    }

    /// Every selected element, primary first.
    pub fn selected_element_ids(&self) -> &[ElementId] {
        &self.ids
    }

    pub fn is_selected(&self, id: ElementId) -> bool {
        self.members.contains(&id)
    }

    pub fn multi_select_mode(&self) -> bool {
        self.ids.len() > 1
    }

    pub fn editing_context_id(&self) -> Option<ElementId> {
        self.editing_context
    }

    pub fn selected_props(&self) -> &Props {
        &self.props
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn raw_props(&self) -> &Props {
        &self.raw_props
    }

    pub(crate) fn set_single(&mut self, id: ElementId, props: Props) {
        self.ids = vec![id];
        self.members = HashSet::from([id]);
        self.show_raw(props);
    }

    /// Replace the selection, dropping duplicates but keeping order.
    pub(crate) fn set_many(&mut self, ids: &[ElementId]) {
        self.ids.clear();
        self.members.clear();
        for id in ids {
            if self.members.insert(*id) {
                self.ids.push(*id);
            }
        }
    }

    /// Add or remove `id`. Returns whether it is selected afterwards.
    pub(crate) fn toggle(&mut self, id: ElementId) -> bool {
        if self.members.remove(&id) {
            self.ids.retain(|x| *x != id);
            false
        } else {
            self.members.insert(id);
            self.ids.push(id);
            true
        }
    }

    /// Show unresolved props, remembering them as the raw snapshot.
    pub(crate) fn show_raw(&mut self, props: Props) {
        self.raw_props.clone_from(&props);
        self.props = props;
    }

    /// Show resolved props. The raw snapshot is kept.
    pub(crate) fn set_props(&mut self, props: Props) {
        self.props = props;
    }

    pub(crate) fn set_editing_context(&mut self, id: Option<ElementId>) {
        self.editing_context = id;
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear();
        self.members.clear();
        self.show_raw(Props::new());
    }

    /// Drop every id for which `exists` is false, including the editing
    /// context. Returns whether the primary selection changed.
    pub(crate) fn retain_existing(&mut self, exists: impl Fn(ElementId) -> bool) -> bool {
        let primary = self.selected_element_id();
        self.ids.retain(|id| exists(*id));
        self.members.retain(|id| exists(*id));
        if self.editing_context.is_some_and(|id| !exists(id)) {
            self.editing_context = None;
        }
        let changed = primary != self.selected_element_id();
        if changed && self.ids.is_empty() {
            self.show_raw(Props::new());
        }
        changed
    }

    /// Rename a selected id in place.
    pub(crate) fn rename(&mut self, old: ElementId, new: ElementId) {
        for id in &mut self.ids {
            if *id == old {
                *id = new;
            }
        }
        if self.members.remove(&old) {
            self.members.insert(new);
        }
        if self.editing_context == Some(old) {
            self.editing_context = Some(new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ElementId {
        ElementId::intern(s)
    }

    #[test]
    fn multi_select_is_derived_from_length() {
        let mut s = SelectionState::default();
        s.set_many(&[id("sel_a"), id("sel_b"), id("sel_a")]);
        assert_eq!(s.selected_element_ids(), &[id("sel_a"), id("sel_b")]);
        assert!(s.multi_select_mode());
        assert!(!s.toggle(id("sel_a")));
        assert!(!s.multi_select_mode());
        assert_eq!(s.selected_element_id(), Some(id("sel_b")));
    }

    #[test]
    fn resolved_props_keep_the_raw_snapshot() {
        let mut raw = Props::new();
        raw.insert("color".into(), "$--primary".into());
        let mut resolved = Props::new();
        resolved.insert("color".into(), "#111".into());

        let mut s = SelectionState::default();
        s.set_single(id("sel_raw"), raw.clone());
        s.set_props(resolved.clone());
        assert_eq!(s.selected_props(), &resolved);
        assert_eq!(s.raw_props(), &raw);
        s.clear();
        assert!(s.raw_props().is_empty());
    }

    #[test]
    fn retain_existing_clears_dangling_ids() {
        let mut s = SelectionState::default();
        s.set_single(id("sel_gone"), Props::new());
        s.set_editing_context(Some(id("sel_gone")));
        assert!(s.retain_existing(|_| false));
        assert!(s.is_empty());
        assert_eq!(s.editing_context_id(), None);
    }
}
