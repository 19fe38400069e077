//! Shared fixtures for the store integration tests.

#![allow(dead_code)]

use weave_core::{Element, ElementId, Owner, PageId};
use weave_editor::ElementGraphStore;

pub fn id(s: &str) -> ElementId {
    ElementId::intern(s)
}

pub fn page_id() -> PageId {
    PageId::intern("it_page")
}

pub fn page() -> Owner {
    Owner::Page(page_id())
}

/// An element on the test page. An empty `parent` means a root.
pub fn el(name: &str, tag: &str, parent: &str, order: u32) -> Element {
    let mut el = Element::new(id(name), tag, page()).with_order(order);
    if !parent.is_empty() {
        el = el.with_parent(id(parent));
    }
    el
}

/// A store with `elements` loaded as the test page and the initial
/// reconciliation already run.
pub fn store_with(elements: Vec<Element>) -> ElementGraphStore {
    let mut store = ElementGraphStore::default();
    store.load_page_elements(elements, page_id());
    store.settle();
    store
}

pub fn body() -> Element {
    el("body", "Body", "", 0)
}

/// Body > Table > [TableHeader > Column ×3, TableBody > Row ×2 > Cell ×3].
pub fn table_fixture() -> Vec<Element> {
    let mut out = vec![
        body(),
        el("table", "Table", "body", 0),
        el("thead", "TableHeader", "table", 0),
        el("tbody", "TableBody", "table", 1),
    ];
    for c in 0..3u32 {
        out.push(el(&format!("col{c}"), "Column", "thead", c).with_prop("label", format!("C{c}")));
    }
    for r in 0..2u32 {
        let row = format!("row{r}");
        out.push(el(&row, "Row", "tbody", r));
        for c in 0..3u32 {
            out.push(el(&format!("r{r}c{c}"), "Cell", &row, c));
        }
    }
    out
}

/// Body > Tabs > [Tab a, Panel a, Tab b, Panel b].
pub fn tabs_fixture() -> Vec<Element> {
    vec![
        body(),
        el("tabs", "Tabs", "body", 0),
        el("tab_a", "Tab", "tabs", 0)
            .with_prop("tabId", "a")
            .with_prop("title", "Alpha"),
        el("panel_a", "Panel", "tabs", 1).with_prop("tabId", "a"),
        el("tab_b", "Tab", "tabs", 2)
            .with_prop("tabId", "b")
            .with_prop("title", "Beta"),
        el("panel_b", "Panel", "tabs", 3).with_prop("tabId", "b"),
    ]
}

/// `(id, order_num)` of a parent's children, sorted by order then id.
pub fn child_orders(store: &ElementGraphStore, parent: &str) -> Vec<(String, u32)> {
    store
        .graph()
        .ordered_children(Some(id(parent)))
        .into_iter()
        .map(|el| (el.id.as_str().to_string(), el.order_key()))
        .collect()
}

/// The sorted order numbers of a parent's children.
pub fn order_set(store: &ElementGraphStore, parent: Option<ElementId>) -> Vec<u32> {
    let mut orders: Vec<u32> = store
        .graph()
        .children(parent)
        .map(|el| el.order_key())
        .collect();
    orders.sort_unstable();
    orders
}
