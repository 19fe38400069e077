//! Cascading removal: find every element structurally linked to a removal
//! root before anything is deleted.
//!
//! Links followed from each root:
//! - the full descendant subtree;
//! - `Column` → the cells at the same position in every row of its table;
//! - `Cell` → its column plus the cells at that position in other rows;
//! - `Tab` ↔ `Panel` under `Tabs`, by shared `tabId`, falling back to an
//!   adjacent order number.
//!
//! Linked elements bring their own subtrees but do not cascade further.

use crate::graph::ElementGraph;
use crate::id::ElementId;
use crate::model::{Element, TagKind, is_collection_item};
use std::collections::HashSet;

/// The outcome of cascade collection for one or more removal roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalSet {
    /// Roots that were accepted, in request order.
    pub roots: Vec<ElementId>,
    /// Every id to remove, deduplicated. Roots first, then linked elements
    /// in discovery order.
    pub ids: Vec<ElementId>,
    /// A root was a collection item; those re-index themselves, so the
    /// deferred sibling reorder is skipped.
    pub skip_reorder: bool,
}

impl RemovalSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_set(&self) -> HashSet<ElementId> {
        self.ids.iter().copied().collect()
    }
}

/// Collect the removal set for a single root.
pub fn collect_removal(graph: &ElementGraph, id: ElementId) -> Option<RemovalSet> {
    collect_batch_removal(graph, &[id])
}

/// Union the cascade sets of several roots. Unknown ids and Body elements
/// are skipped; returns `None` when nothing is left to remove.
pub fn collect_batch_removal(graph: &ElementGraph, ids: &[ElementId]) -> Option<RemovalSet> {
    let mut out = RemovalSet {
        roots: Vec::new(),
        ids: Vec::new(),
        skip_reorder: false,
    };
    let mut seen: HashSet<ElementId> = HashSet::new();

    for &root_id in ids {
        let Some(root) = graph.get(root_id) else {
            log::debug!("remove: unknown element {root_id}");
            continue;
        };
        if root.is_body() {
            log::debug!("remove: refusing to remove body {root_id}");
            continue;
        }
        if out.roots.contains(&root_id) {
            continue;
        }
        out.roots.push(root_id);
        out.skip_reorder |= is_collection_item(&root.tag);

        let mut linked = vec![root_id];
        linked.extend(linked_elements(graph, root));
        for id in linked {
            for member in graph.subtree(id) {
                let is_body = graph.get(member).is_some_and(Element::is_body);
                if !is_body && seen.insert(member) {
                    out.ids.push(member);
                }
            }
        }
    }

    if out.ids.is_empty() {
        return None;
    }
    // Roots lead so callers can report them first.
    let roots: HashSet<ElementId> = out.roots.iter().copied().collect();
    out.ids.sort_by_key(|id| !roots.contains(id));
    Some(out)
}

/// Elements removed alongside `el` by the table and tab rules.
fn linked_elements(graph: &ElementGraph, el: &Element) -> Vec<ElementId> {
    match el.kind() {
        TagKind::Column => column_cells(graph, el),
        TagKind::Cell => cell_column(graph, el),
        TagKind::Tab | TagKind::Panel => tab_counterpart(graph, el).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn nearest_ancestor(graph: &ElementGraph, el: &Element, kind: TagKind) -> Option<ElementId> {
    let mut seen = HashSet::new();
    let mut current = el.parent_id;
    while let Some(id) = current {
        if !seen.insert(id) {
            return None;
        }
        let parent = graph.get(id)?;
        if parent.kind() == kind {
            return Some(id);
        }
        current = parent.parent_id;
    }
    None
}

fn child_of_kind(graph: &ElementGraph, parent: ElementId, kind: TagKind) -> Option<&Element> {
    graph.children(Some(parent)).find(|c| c.kind() == kind)
}

fn rows_of(graph: &ElementGraph, table: ElementId) -> Vec<&Element> {
    let Some(body) = child_of_kind(graph, table, TagKind::TableBody) else {
        return Vec::new();
    };
    graph
        .children(Some(body.id))
        .filter(|c| c.kind() == TagKind::Row)
        .collect()
}

fn cells_at(graph: &ElementGraph, rows: &[&Element], position: u32) -> Vec<ElementId> {
    rows.iter()
        .flat_map(|row| graph.children(Some(row.id)))
        .filter(|cell| cell.kind() == TagKind::Cell && cell.order_key() == position)
        .map(|cell| cell.id)
        .collect()
}

fn column_cells(graph: &ElementGraph, column: &Element) -> Vec<ElementId> {
    let Some(table) = nearest_ancestor(graph, column, TagKind::Table) else {
        return Vec::new();
    };
    let rows = rows_of(graph, table);
    cells_at(graph, &rows, column.order_key())
}

fn cell_column(graph: &ElementGraph, cell: &Element) -> Vec<ElementId> {
    let Some(row) = cell.parent_id.and_then(|p| graph.get(p)) else {
        return Vec::new();
    };
    if row.kind() != TagKind::Row {
        return Vec::new();
    }
    let Some(body) = row.parent_id.and_then(|p| graph.get(p)) else {
        return Vec::new();
    };
    if body.kind() != TagKind::TableBody {
        return Vec::new();
    }
    let Some(table) = body.parent_id.and_then(|p| graph.get(p)) else {
        return Vec::new();
    };
    if table.kind() != TagKind::Table {
        return Vec::new();
    }
    let Some(header) = child_of_kind(graph, table.id, TagKind::TableHeader) else {
        return Vec::new();
    };

    let position = cell.order_key();
    let column = graph
        .descendants(header.id)
        .into_iter()
        .filter_map(|id| graph.get(id))
        .find(|c| c.kind() == TagKind::Column && c.order_key() == position);
    let Some(column) = column else {
        return Vec::new();
    };

    let mut out = vec![column.id];
    let rows = rows_of(graph, table.id);
    out.extend(
        cells_at(graph, &rows, position)
            .into_iter()
            .filter(|id| *id != cell.id),
    );
    out
}

/// The Tab for a Panel or the Panel for a Tab, under the same `Tabs`.
fn tab_counterpart(graph: &ElementGraph, el: &Element) -> Option<ElementId> {
    let parent = graph.get(el.parent_id?)?;
    if parent.kind() != TagKind::Tabs {
        return None;
    }
    let wanted = if el.kind() == TagKind::Tab {
        TagKind::Panel
    } else {
        TagKind::Tab
    };
    let candidates: Vec<&Element> = graph
        .children(Some(parent.id))
        .filter(|c| c.kind() == wanted)
        .collect();

    if let Some(tab_id) = el.tab_id()
        && let Some(found) = candidates
            .iter()
            .find(|c| c.tab_id().as_deref() == Some(&*tab_id))
    {
        return Some(found.id);
    }

    // A tab's panel normally follows it; a panel's tab precedes it.
    let order = i64::from(el.order_key());
    let offsets: [i64; 2] = if wanted == TagKind::Panel { [1, -1] } else { [-1, 1] };
    offsets.iter().find_map(|offset| {
        candidates
            .iter()
            .find(|c| i64::from(c.order_key()) == order + offset)
            .map(|c| c.id)
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────
