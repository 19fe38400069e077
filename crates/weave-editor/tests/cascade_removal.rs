//! Integration tests: cascading removal through the store.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use weave_core::ElementId;

fn ids(names: &[&str]) -> HashSet<ElementId> {
    names.iter().map(|n| id(n)).collect()
}

// ─── Tabs ───────────────────────────────────────────────────────────────

#[test]
fn removing_tab_takes_its_panel_and_nothing_else() {
    let mut store = store_with(tabs_fixture());
    let set = store.remove_element(id("tab_a")).unwrap();

    assert_eq!(set.id_set(), ids(&["tab_a", "panel_a"]));
    assert!(store.get(id("panel_a")).is_none());
    store.settle();
    assert_eq!(child_orders(&store, "tabs"), vec![
        ("tab_b".to_string(), 2),
        ("panel_b".to_string(), 3),
    ]);
}

#[test]
fn removing_panel_takes_its_tab() {
    let mut store = store_with(tabs_fixture());
    let set = store.remove_element(id("panel_b")).unwrap();
    assert_eq!(set.id_set(), ids(&["tab_b", "panel_b"]));
    assert!(store.get(id("tab_a")).is_some());
}

// ─── Tables ─────────────────────────────────────────────────────────────

#[test]
fn removing_column_takes_cells_at_its_position() {
    let mut store = store_with(table_fixture());
    let set = store.remove_element(id("col1")).unwrap();

    assert_eq!(set.id_set(), ids(&["col1", "r0c1", "r1c1"]));
    assert_eq!(store.elements().len(), table_fixture().len() - 3);

    // Reconciliation closes the gap in the header and in every row alike.
    store.settle();
    assert_eq!(child_orders(&store, "thead"), vec![
        ("col0".to_string(), 0),
        ("col2".to_string(), 1),
    ]);
    for row in ["row0", "row1"] {
        let prefix = &row[3..];
        assert_eq!(child_orders(&store, row), vec![
            (format!("r{prefix}c0"), 0),
            (format!("r{prefix}c2"), 1),
        ]);
    }
}

#[test]
fn removing_cell_takes_its_column_and_other_rows() {
    let mut store = store_with(table_fixture());
    let set = store.remove_element(id("r0c2")).unwrap();
    assert_eq!(set.id_set(), ids(&["r0c2", "col2", "r1c2"]));
}

#[test]
fn removing_table_removes_whole_subtree() {
    let mut store = store_with(table_fixture());
    let set = store.remove_element(id("table")).unwrap();
    assert_eq!(set.len(), table_fixture().len() - 1);
    assert_eq!(store.elements().len(), 1);
    assert!(store.get(id("body")).is_some());
}

// ─── Guards and batching ────────────────────────────────────────────────

#[test]
fn body_is_never_removed() {
    let mut store = store_with(table_fixture());
    assert_eq!(store.remove_element(id("body")), None);
    assert_eq!(store.elements().len(), table_fixture().len());
    assert!(!store.can_undo());
}

#[test]
fn unknown_id_is_a_no_op() {
    let mut store = store_with(vec![body()]);
    assert_eq!(store.remove_element(id("nowhere")), None);
    assert!(!store.can_undo());
}

#[test]
fn batch_removal_unions_cascades_in_one_entry() {
    let mut store = store_with(tabs_fixture());
    let set = store
        .remove_elements(&[id("tab_a"), id("panel_a"), id("tab_b"), id("nowhere")])
        .unwrap();
    assert_eq!(set.len(), 4);
    assert_eq!(set.roots, vec![id("tab_a"), id("panel_a"), id("tab_b")]);
    assert_eq!(child_orders(&store, "tabs"), Vec::<(String, u32)>::new());
    assert_eq!(store.history().entries().len(), 1);

    store.undo();
    assert_eq!(child_orders(&store, "tabs").len(), 4);
}

#[test]
fn removal_clears_dangling_selection() {
    let mut store = store_with(table_fixture());
    store.set_selected_elements(&[id("r1c1"), id("col0")]);
    store.set_editing_context(Some(id("r0c1")));
    assert!(store.selection().multi_select_mode());

    store.remove_element(id("col1"));
    assert_eq!(store.selection().selected_element_ids(), &[id("col0")]);
    assert_eq!(store.selection().editing_context_id(), None);
    assert!(!store.selection().multi_select_mode());
}

#[test]
fn collection_item_removal_skips_reorder() {
    let mut store = store_with(vec![
        body(),
        el("menu", "Menu", "body", 0),
        el("item0", "MenuItem", "menu", 0),
        el("item1", "MenuItem", "menu", 1),
        el("item2", "MenuItem", "menu", 2),
    ]);
    let set = store.remove_element(id("item1")).unwrap();
    assert!(set.skip_reorder);
    store.settle();
    assert_eq!(child_orders(&store, "menu"), vec![
        ("item0".to_string(), 0),
        ("item2".to_string(), 2),
    ]);
}
