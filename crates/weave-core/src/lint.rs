//! Graph validation for element lists.
//!
//! Reports invariant violations without modifying anything. Mutations keep
//! these invariants; the lint exists for bulk loads and imported data.

use crate::id::{ElementId, PageId};
use crate::model::{Element, Owner};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

// ─── Diagnostic types ────────────────────────────────────────────────────

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintSeverity {
    /// Breaks a graph invariant.
    Warning,
    /// Tolerated transiently; fixed by reconciliation.
    Info,
}

/// A single lint diagnostic for an element.
#[derive(Debug, Clone)]
pub struct GraphDiagnostic {
    pub element_id: ElementId,
    pub message: String,
    pub severity: LintSeverity,
    /// Short rule identifier (e.g. "dangling-parent", "cycle").
    pub rule: &'static str,
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Run all lint rules over an element list.
#[must_use]
pub fn lint_elements(elements: &[Element]) -> Vec<GraphDiagnostic> {
    let by_id: HashMap<ElementId, &Element> = elements.iter().map(|el| (el.id, el)).collect();
    let mut diags = Vec::new();
    lint_parents(elements, &by_id, &mut diags);
    lint_cycles(elements, &by_id, &mut diags);
    lint_duplicate_orders(elements, &mut diags);
    lint_masters(elements, &by_id, &mut diags);
    lint_bodies(elements, &mut diags);
    diags
}

// ─── Rules ────────────────────────────────────────────────────────────────

fn lint_parents(
    elements: &[Element],
    by_id: &HashMap<ElementId, &Element>,
    diags: &mut Vec<GraphDiagnostic>,
) {
    for el in elements {
        let Some(parent_id) = el.parent_id else {
            continue;
        };
        match by_id.get(&parent_id) {
            None => diags.push(GraphDiagnostic {
                element_id: el.id,
                message: format!("`{}` points at missing parent `{parent_id}`.", el.id),
                severity: LintSeverity::Warning,
                rule: "dangling-parent",
            }),
            Some(parent) if parent.owner != el.owner => diags.push(GraphDiagnostic {
                element_id: el.id,
                message: format!(
                    "`{}` and its parent `{parent_id}` belong to different owners.",
                    el.id
                ),
                severity: LintSeverity::Warning,
                rule: "cross-scope-parent",
            }),
            Some(_) => {}
        }
    }
}

/// Build a parent → child graph and report every element on a cycle.
fn lint_cycles(
    elements: &[Element],
    by_id: &HashMap<ElementId, &Element>,
    diags: &mut Vec<GraphDiagnostic>,
) {
    let mut graph: DiGraph<ElementId, ()> = DiGraph::with_capacity(elements.len(), elements.len());
    let mut nodes: HashMap<ElementId, NodeIndex> = HashMap::with_capacity(elements.len());
    for id in by_id.keys() {
        nodes.insert(*id, graph.add_node(*id));
    }
    for el in elements {
        if let Some(parent) = el.parent_id
            && let (Some(&from), Some(&to)) = (nodes.get(&parent), nodes.get(&el.id))
        {
            graph.add_edge(from, to, ());
        }
    }

    let mut on_cycle: Vec<ElementId> = Vec::new();
    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.contains_edge(n, n));
        if is_cycle {
            on_cycle.extend(component.iter().map(|&n| graph[n]));
        }
    }
    on_cycle.sort();
    for id in on_cycle {
        diags.push(GraphDiagnostic {
            element_id: id,
            message: format!("`{id}` is its own ancestor."),
            severity: LintSeverity::Warning,
            rule: "cycle",
        });
    }
}

fn lint_duplicate_orders(elements: &[Element], diags: &mut Vec<GraphDiagnostic>) {
    let mut seen: HashSet<(Owner, Option<ElementId>, u32)> = HashSet::new();
    for el in elements {
        let Some(order) = el.order_num else {
            continue;
        };
        if !seen.insert((el.owner, el.parent_id, order)) {
            diags.push(GraphDiagnostic {
                element_id: el.id,
                message: format!("`{}` shares order {order} with a sibling.", el.id),
                severity: LintSeverity::Info,
                rule: "duplicate-order",
            });
        }
    }
}

fn lint_masters(
    elements: &[Element],
    by_id: &HashMap<ElementId, &Element>,
    diags: &mut Vec<GraphDiagnostic>,
) {
    for el in elements {
        let Some(master_id) = el.master_id() else {
            continue;
        };
        if !by_id.get(&master_id).is_some_and(|m| m.is_master()) {
            diags.push(GraphDiagnostic {
                element_id: el.id,
                message: format!("Instance `{}` references `{master_id}`, which is not a master.", el.id),
                severity: LintSeverity::Warning,
                rule: "dangling-master",
            });
        }
    }
}

/// One Body per page; extras are reported, the first one wins.
fn lint_bodies(elements: &[Element], diags: &mut Vec<GraphDiagnostic>) {
    let mut first: HashMap<PageId, ElementId> = HashMap::new();
    for el in elements {
        let Owner::Page(page) = el.owner else {
            continue;
        };
        if !el.is_body() {
            continue;
        }
        match first.get(&page) {
            None => {
                first.insert(page, el.id);
            }
            Some(body) => diags.push(GraphDiagnostic {
                element_id: el.id,
                message: format!("Page `{page}` already has body `{body}`."),
                severity: LintSeverity::Warning,
                rule: "multiple-body",
            }),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Component;

    fn id(s: &str) -> ElementId {
        ElementId::intern(s)
    }

    fn owner() -> Owner {
        Owner::Page(PageId::intern("lint_page"))
    }

    fn rules(diags: &[GraphDiagnostic]) -> Vec<&'static str> {
        diags.iter().map(|d| d.rule).collect()
    }

    #[test]
    fn clean_graph_has_no_diagnostics() {
        let p = owner();
        let els = vec![
            Element::new(id("l_body"), "Body", p).with_order(0),
            Element::new(id("l_btn"), "Button", p).with_parent(id("l_body")).with_order(0),
        ];
        assert!(lint_elements(&els).is_empty());
    }

    #[test]
    fn detects_dangling_and_cross_scope_parents() {
        let p = owner();
        let other = Owner::Page(PageId::intern("lint_other"));
        let els = vec![
            Element::new(id("l_a"), "Box", p).with_parent(id("l_nowhere")),
            Element::new(id("l_b"), "Box", other),
            Element::new(id("l_c"), "Box", p).with_parent(id("l_b")),
        ];
        let found = rules(&lint_elements(&els));
        assert!(found.contains(&"dangling-parent"));
        assert!(found.contains(&"cross-scope-parent"));
    }

    #[test]
    fn detects_cycles() {
        let p = owner();
        let els = vec![
            Element::new(id("l_x"), "Box", p).with_parent(id("l_y")),
            Element::new(id("l_y"), "Box", p).with_parent(id("l_x")),
            Element::new(id("l_self"), "Box", p).with_parent(id("l_self")),
        ];
        let diags = lint_elements(&els);
        let cyclic: Vec<ElementId> = diags
            .iter()
            .filter(|d| d.rule == "cycle")
            .map(|d| d.element_id)
            .collect();
        assert_eq!(cyclic, vec![id("l_self"), id("l_x"), id("l_y")]);
    }

    #[test]
    fn detects_orders_masters_and_bodies() {
        let p = owner();
        let els = vec![
            Element::new(id("l_body1"), "Body", p),
            Element::new(id("l_body2"), "body", p),
            Element::new(id("l_s1"), "Box", p).with_parent(id("l_body1")).with_order(0),
            Element::new(id("l_s2"), "Box", p).with_parent(id("l_body1")).with_order(0),
            Element::new(id("l_inst"), "Card", p)
                .with_component(Component::instance_of(id("l_not_master"))),
        ];
        let diags = lint_elements(&els);
        let found = rules(&diags);
        assert!(found.contains(&"duplicate-order"));
        assert!(found.contains(&"dangling-master"));
        assert!(found.contains(&"multiple-body"));
        let dup = diags.iter().find(|d| d.rule == "duplicate-order").unwrap();
        assert_eq!(dup.severity, LintSeverity::Info);
    }
}
