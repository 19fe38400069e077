//! Integration tests: selection state and deferred hydration.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use weave_core::{DesignVariable, Element, ElementId, Props};
use weave_editor::{ElementGraphStore, TaskKind};

fn themed_store() -> ElementGraphStore {
    let mut store = store_with(vec![
        body(),
        el("swatch", "Box", "body", 0).with_prop("color", "$--primary"),
        el("plain", "Box", "body", 1).with_prop("text", "hi"),
    ]);
    store.set_variables(
        [DesignVariable::new("primary")
            .with_value(None, "#111")
            .with_value(Some("dark"), "#eee")]
        .into_iter()
        .collect(),
    );
    store
}

fn hydrate(id: ElementId) -> TaskKind {
    TaskKind::HydrateSelection(id)
}

// ─── Hydration ──────────────────────────────────────────────────────────

#[test]
fn raw_props_first_then_resolved() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("swatch")));
    assert_eq!(store.selection().selected_props()["color"], json!("$--primary"));
    assert!(store.scheduler().has_pending(hydrate(id("swatch"))));

    store.advance(50);
    assert_eq!(store.selection().selected_props()["color"], json!("#111"));
}

#[test]
fn active_theme_changes_hydrated_value() {
    let mut store = themed_store();
    store.set_active_theme(Some("dark".to_string()));
    store.set_selected_element(Some(id("swatch")));
    store.settle();
    assert_eq!(store.selection().selected_props()["color"], json!("#eee"));
}

#[test]
fn changing_selection_cancels_pending_hydration() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("swatch")));
    store.advance(20);
    store.set_selected_element(Some(id("plain")));

    assert!(!store.scheduler().has_pending(hydrate(id("swatch"))));
    assert!(store.scheduler().has_pending(hydrate(id("plain"))));
    store.settle();
    assert_eq!(store.selection().selected_element_id(), Some(id("plain")));
    assert_eq!(store.selection().selected_props()["text"], json!("hi"));
    assert!(store.selection().selected_props().get("color").is_none());
}

#[test]
fn clearing_selection_cancels_hydration() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("swatch")));
    store.clear_selection();
    assert!(!store.scheduler().has_pending(hydrate(id("swatch"))));
    store.settle();
    assert!(store.selection().selected_props().is_empty());
}

#[test]
fn reselecting_unchanged_element_is_a_no_op() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("plain")));
    let pending = store.scheduler().pending_len();
    store.set_selected_element(Some(id("plain")));
    assert_eq!(store.scheduler().pending_len(), pending);
}

#[test]
fn reselecting_after_hydration_keeps_resolved_props() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("swatch")));
    store.settle();
    assert_eq!(store.selection().selected_props()["color"], json!("#111"));

    store.set_selected_element(Some(id("swatch")));
    assert!(!store.scheduler().has_pending(hydrate(id("swatch"))));
    assert_eq!(store.selection().selected_props()["color"], json!("#111"));
}

#[test]
fn editing_selected_element_refreshes_snapshot() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("plain")));
    store.settle();

    let mut patch = Props::new();
    patch.insert("text".into(), json!("changed"));
    store.update_element_props(id("plain"), patch);
    assert_eq!(store.selection().selected_props()["text"], json!("changed"));
}

// ─── Multi-select ───────────────────────────────────────────────────────

#[test]
fn toggling_builds_ordered_multi_selection() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("swatch")));
    store.toggle_element_in_selection(id("plain"));
    assert!(store.selection().multi_select_mode());
    assert_eq!(store.selection().selected_element_ids(), &[id("swatch"), id("plain")]);
    assert!(store.selection().is_selected(id("plain")));

    store.toggle_element_in_selection(id("swatch"));
    assert!(!store.selection().multi_select_mode());
    assert_eq!(store.selection().selected_element_id(), Some(id("plain")));
}

#[test]
fn unknown_ids_are_ignored() {
    let mut store = themed_store();
    store.set_selected_element(Some(id("nowhere")));
    assert!(store.selection().is_empty());
    store.set_selected_elements(&[id("nowhere"), id("plain")]);
    assert_eq!(store.selection().selected_element_ids(), &[id("plain")]);
    store.set_editing_context(Some(id("nowhere")));
    assert_eq!(store.selection().editing_context_id(), None);
}

// ─── Id reassignment ────────────────────────────────────────────────────

#[test]
fn reassigned_id_follows_selection_and_children() {
    let mut store = store_with(vec![body()]);
    let temp = ElementId::temporary();
    store
        .add_element(Element::new(temp, "Box", page()).with_parent(id("body")))
        .unwrap();
    store
        .add_element(Element::new(id("kid"), "Text", page()).with_parent(temp))
        .unwrap();
    store.set_selected_element(Some(temp));

    let server = id("srv_box");
    assert!(store.reassign_id(temp, server));
    assert!(store.get(temp).is_none());
    assert_eq!(store.get(id("kid")).unwrap().parent_id, Some(server));
    assert_eq!(store.selection().selected_element_id(), Some(server));
    assert!(store.scheduler().has_pending(hydrate(server)));
    assert!(!store.reassign_id(temp, id("srv_other")));
}
