//! Ordering engine: repair sibling `order_num`s so every sibling group of
//! an owner scope is numbered `0..n-1` without duplicates.
//!
//! Each group is sorted by a strategy chosen from the parent's tag. Every
//! strategy ends its comparison chain on the element id, so the output is
//! fully deterministic and a second pass over its own output emits nothing.

use crate::id::ElementId;
use crate::model::{Element, Owner, TagKind, display_text, prop_text};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One order rewrite produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub id: ElementId,
    pub order_num: u32,
}

/// Sort strategy for one sibling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    /// Tab / Panel interleaving under `Tabs`.
    TabPairs,
    /// `ColumnGroup` / `Column` under `TableHeader`, tie-broken by label.
    TableHeader,
    /// Items of a collection parent, tie-broken by display text.
    Collection,
    /// `(order_num, id)`.
    Default,
}

impl SortStrategy {
    pub fn for_parent(parent: Option<&Element>) -> Self {
        match parent.map(Element::kind) {
            Some(TagKind::Tabs) => SortStrategy::TabPairs,
            Some(TagKind::TableHeader) => SortStrategy::TableHeader,
            Some(TagKind::Collection) => SortStrategy::Collection,
            _ => SortStrategy::Default,
        }
    }
}

/// Compute order updates for every sibling group in `owner`.
///
/// Only elements whose `order_num` actually changes are emitted. Groups are
/// visited in parent-id order (roots first).
#[must_use]
pub fn compute_reorder_updates(elements: &[Element], owner: &Owner) -> Vec<OrderUpdate> {
    let by_id: HashMap<ElementId, &Element> = elements.iter().map(|el| (el.id, el)).collect();

    let mut groups: BTreeMap<Option<ElementId>, Vec<&Element>> = BTreeMap::new();
    for el in elements.iter().filter(|el| el.owner == *owner) {
        groups.entry(el.parent_id).or_default().push(el);
    }

    let mut updates = Vec::new();
    for (parent_id, children) in groups {
        let parent = parent_id.and_then(|p| by_id.get(&p).copied());
        let strategy = SortStrategy::for_parent(parent);
        let sorted = sort_group(children, strategy);
        if sorted.len() > 1 {
            log::debug!(
                "reorder {:?}: {} children via {strategy:?}",
                parent_id,
                sorted.len()
            );
        }
        for (index, el) in sorted.iter().enumerate() {
            let order_num = index as u32;
            if el.order_num != Some(order_num) {
                updates.push(OrderUpdate { id: el.id, order_num });
            }
        }
    }
    updates
}

/// Sort one sibling group with the given strategy.
pub fn sort_group(mut children: Vec<&Element>, strategy: SortStrategy) -> Vec<&Element> {
    match strategy {
        SortStrategy::TabPairs => pair_tabs(children),
        SortStrategy::TableHeader => {
            children.sort_by(|a, b| {
                a.order_key()
                    .cmp(&b.order_key())
                    .then_with(|| text_cmp(&a.prop_text("label"), &b.prop_text("label")))
                    .then(a.id.cmp(&b.id))
            });
            children
        }
        SortStrategy::Collection => {
            children.sort_by(|a, b| {
                a.order_key()
                    .cmp(&b.order_key())
                    .then_with(|| text_cmp(&display_text(&a.props), &display_text(&b.props)))
                    .then(a.id.cmp(&b.id))
            });
            children
        }
        SortStrategy::Default => {
            children.sort_by(default_cmp);
            children
        }
    }
}

fn default_cmp(a: &&Element, b: &&Element) -> Ordering {
    a.order_key().cmp(&b.order_key()).then(a.id.cmp(&b.id))
}

/// Case-insensitive first, then byte-wise so equal-folding strings still
/// have a fixed order.
pub fn text_cmp(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn title_cmp(a: &&Element, b: &&Element) -> Ordering {
    a.order_key()
        .cmp(&b.order_key())
        .then_with(|| text_cmp(&prop_text(&a.props, "title"), &prop_text(&b.props, "title")))
        .then(a.id.cmp(&b.id))
}

/// Interleave tabs with their panels: tab, panel, tab, panel, ...
///
/// Pass 1 pairs by `tabId`. Pass 2 gives each still-unpaired tab the
/// nearest unused panel by order distance, preferring a panel after the
/// tab and then the lower order. Leftover panels follow, then any other
/// children.
fn pair_tabs(children: Vec<&Element>) -> Vec<&Element> {
    let mut tabs = Vec::new();
    let mut panels = Vec::new();
    let mut others = Vec::new();
    for el in children {
        match el.kind() {
            TagKind::Tab => tabs.push(el),
            TagKind::Panel => panels.push(el),
            _ => others.push(el),
        }
    }
    tabs.sort_by(title_cmp);
    panels.sort_by(title_cmp);
    others.sort_by(default_cmp);

    let mut used: HashSet<usize> = HashSet::new();
    let mut pairs: Vec<Option<usize>> = vec![None; tabs.len()];

    for (ti, tab) in tabs.iter().enumerate() {
        let Some(tab_id) = tab.tab_id() else {
            continue;
        };
        let found = panels
            .iter()
            .enumerate()
            .find(|(pi, panel)| !used.contains(pi) && panel.tab_id().as_deref() == Some(&*tab_id));
        if let Some((pi, _)) = found {
            used.insert(pi);
            pairs[ti] = Some(pi);
        }
    }

    for (ti, tab) in tabs.iter().enumerate() {
        if pairs[ti].is_some() {
            continue;
        }
        let tab_order = i64::from(tab.order_key());
        let nearest = panels
            .iter()
            .enumerate()
            .filter(|(pi, _)| !used.contains(pi))
            .min_by_key(|(_, panel)| {
                let order = i64::from(panel.order_key());
                let distance = (order - tab_order).abs();
                let before_tab = order < tab_order;
                (distance, before_tab, order)
            })
            .map(|(pi, _)| pi);
        if let Some(pi) = nearest {
            used.insert(pi);
            pairs[ti] = Some(pi);
        }
    }

    let mut out = Vec::with_capacity(tabs.len() + panels.len() + others.len());
    for (ti, tab) in tabs.iter().enumerate() {
        out.push(*tab);
        if let Some(pi) = pairs[ti] {
            out.push(panels[pi]);
        }
    }
    out.extend(
        panels
            .iter()
            .enumerate()
            .filter(|(pi, _)| !used.contains(pi))
            .map(|(_, p)| *p),
    );
    out.extend(others);
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────
