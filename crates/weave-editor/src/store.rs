//! `ElementGraphStore`: the editing session.
//!
//! The store owns the element graph and is its only writer. Every mutation
//! action applies one atomic transition to the graph (list and indexes
//! together), records at most one history entry, queues persistence ops and
//! (re)schedules the deferred reorder pass of the scopes it touched.
//!
//! Business-rule violations (unknown ids, Body removal, role conflicts)
//! are refused with a debug log and a `None`/`false` result. Structural
//! programmer errors come back as [`StoreError`].

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use weave_core::model::tags;
use weave_core::{
    Component, Element, ElementGraph, ElementId, ElementListDiff, ElementPatch, GraphError, Owner,
    OrderUpdate, PageId, Props, RemovalSet, VariableContext, VariableTable, collect_batch_removal,
    compute_reorder_updates, diff_elements, normalize_tag, resolve_descendant_overrides,
    resolve_effective_props, resolve_element_variables, resolve_instance_props,
};

use crate::config::StoreConfig;
use crate::history::{HistoryEntry, HistoryKind, HistoryManager, HistoryStep};
use crate::persist::{PersistOp, PersistOutcome, Persistence};
use crate::schedule::{Scheduler, TaskKind};
use crate::selection::SelectionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub struct ElementGraphStore {
    graph: ElementGraph,
    history: HistoryManager,
    selection: SelectionState,
    scheduler: Scheduler,
    persistence: Persistence,
    variables: VariableTable,
    variable_context: VariableContext,
    config: StoreConfig,
}

impl Default for ElementGraphStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

fn normalized(mut el: Element) -> Element {
    let tag = normalize_tag(&el.tag);
    if tag != el.tag {
        el.tag = tag.to_string();
    }
    el
}

/// Merge `patch` over `base` one level deep, like an object spread.
fn shallow_merge(base: &Props, patch: Props) -> Props {
    let mut merged = base.clone();
    merged.extend(patch);
    merged
}

/// Whether a raw component patch keeps the master/instance references
/// intact. Demoting a master that still has instances needs
/// `unregister_master`, and an instance must point at an existing master.
fn component_change_allowed(
    graph: &ElementGraph,
    id: ElementId,
    next: Option<&Component>,
) -> bool {
    let Some(el) = graph.get(id) else {
        return false;
    };
    let demotes_master = el.is_master() && !matches!(next, Some(Component::Master { .. }));
    if demotes_master && !graph.instances_of(id).is_empty() {
        return false;
    }
    match next {
        Some(Component::Instance { master_id, .. }) => {
            *master_id != id && graph.get(*master_id).is_some_and(Element::is_master)
        }
        Some(Component::Master { .. }) => !el.is_instance(),
        None => true,
    }
}

fn group_by_owner(elements: &[Element]) -> BTreeMap<Owner, Vec<Element>> {
    let mut groups: BTreeMap<Owner, Vec<Element>> = BTreeMap::new();
    for el in elements {
        groups.entry(el.owner).or_default().push(el.clone());
    }
    groups
}

impl ElementGraphStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_persistence(config, Persistence::default())
    }

    pub fn with_persistence(config: StoreConfig, mut persistence: Persistence) -> Self {
        persistence.set_log_limit(config.persist_log_limit);
        Self {
            graph: ElementGraph::new(),
            history: HistoryManager::new(config.history_limit),
            selection: SelectionState::default(),
            scheduler: Scheduler::new(),
            persistence,
            variables: VariableTable::new(),
            variable_context: VariableContext::default(),
            config,
        }
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    pub fn graph(&self) -> &ElementGraph {
        &self.graph
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.graph.get(id)
    }

    pub fn elements(&self) -> &[Element] {
        self.graph.elements()
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn persistence_mut(&mut self) -> &mut Persistence {
        &mut self.persistence
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn current_scope(&self) -> Option<Owner> {
        self.history.current_scope()
    }

    /// Switch the active page or layout. History is recorded only while a
    /// scope is active.
    pub fn set_current_scope(&mut self, scope: Option<Owner>) {
        self.history.set_current_scope(scope);
    }

    // ─── Resolution ──────────────────────────────────────────────────────

    pub fn set_variables(&mut self, variables: VariableTable) {
        self.variables = variables;
    }

    pub fn variables_mut(&mut self) -> &mut VariableTable {
        &mut self.variables
    }

    pub fn set_active_theme(&mut self, theme_id: Option<String>) {
        self.variable_context.active_theme_id = theme_id;
    }

    /// Fully resolved props: master and instance overrides, descendant
    /// overrides of the enclosing instance, then design variables.
    pub fn resolve_props(&self, id: ElementId) -> Option<Props> {
        let el = self.graph.get(id)?;
        let effective = resolve_effective_props(&self.graph, el);
        Some(
            resolve_element_variables(effective.as_ref(), &self.variables, &self.variable_context)
                .into_owned(),
        )
    }

    // ─── Side-effect helpers ─────────────────────────────────────────────

    fn record(&mut self, kind: HistoryKind, description: &str, before: Vec<Element>, after: Vec<Element>) {
        self.history
            .record(HistoryEntry::new(kind, description, before, after));
    }

    fn schedule_reorder(&mut self, owner: Owner) {
        self.scheduler
            .debounce(TaskKind::Reorder(owner), self.config.reorder_delay_ms);
    }

    fn schedule_reorders(&mut self, elements: &[Element]) {
        let owners: HashSet<Owner> = elements.iter().map(|el| el.owner).collect();
        for owner in owners {
            self.schedule_reorder(owner);
        }
    }

    fn persist(&mut self, op: PersistOp) {
        self.persistence.enqueue(op);
        self.scheduler
            .ensure(TaskKind::FlushPersistence, self.config.persist_delay_ms);
    }

    fn persist_inserts(&mut self, elements: &[Element]) {
        for (owner, elements) in group_by_owner(elements) {
            self.persist(PersistOp::InsertMany { owner, elements });
        }
    }

    fn persist_full_updates(&mut self, elements: &[Element]) {
        for el in elements {
            self.persist(PersistOp::Update {
                owner: el.owner,
                id: el.id,
                patch: ElementPatch::full(el),
            });
        }
    }

    fn persist_deletes(&mut self, elements: &[Element]) {
        for (owner, elements) in group_by_owner(elements) {
            let ids = elements.iter().map(|el| el.id).collect();
            self.persist(PersistOp::DeleteMany { owner, ids });
        }
    }

    /// Drop dangling selection and refresh the inspector snapshot when the
    /// primary selection changed or was touched.
    fn refresh_selection(&mut self, touched: &HashSet<ElementId>) {
        let primary_before = self.selection.selected_element_id();
        let graph = &self.graph;
        self.selection.retain_existing(|id| graph.contains(id));
        let primary = self.selection.selected_element_id();
        if primary != primary_before || primary.is_some_and(|id| touched.contains(&id)) {
            self.hydrate_primary();
        }
    }

    /// Show raw props for the primary selection now and queue resolution.
    fn hydrate_primary(&mut self) {
        if let Some(handle) = self.selection.hydrate_task.take() {
            self.scheduler.cancel(handle);
        }
        let Some(id) = self.selection.selected_element_id() else {
            self.selection.show_raw(Props::new());
            return;
        };
        let raw = self.graph.get(id).map(|el| el.props.clone()).unwrap_or_default();
        self.selection.show_raw(raw);
        let handle = self
            .scheduler
            .schedule(TaskKind::HydrateSelection(id), self.config.hydrate_delay_ms);
        self.selection.hydrate_task = Some(handle);
    }

    // ─── Add ─────────────────────────────────────────────────────────────

    /// Add one element. A missing or colliding `order_num` is replaced by
    /// the next free number among its siblings.
    pub fn add_element(&mut self, element: Element) -> Result<ElementId, StoreError> {
        let mut el = normalized(element);
        let collides = el
            .order_num
            .is_some_and(|order| self.graph.order_taken(el.parent_id, el.owner, order, el.id));
        if el.order_num.is_none() || collides {
            el.order_num = Some(self.graph.next_order_num(el.parent_id, el.owner));
        }
        self.graph.validate_insert(std::slice::from_ref(&el))?;

        let id = el.id;
        self.graph.insert_many(vec![el.clone()]);
        log::debug!("add {} ({}) order {:?}", id, el.tag, el.order_num);
        self.record(HistoryKind::Add, &format!("Add {}", el.tag), Vec::new(), vec![el.clone()]);
        self.schedule_reorder(el.owner);
        self.persist(PersistOp::Insert(el));
        Ok(id)
    }

    /// Add a parent with a pre-built subtree as one atomic batch and one
    /// history entry. Children without an order are numbered after their
    /// batch siblings.
    pub fn add_complex_element(
        &mut self,
        parent: Element,
        children: Vec<Element>,
    ) -> Result<ElementId, StoreError> {
        let mut root = normalized(parent);
        let collides = root
            .order_num
            .is_some_and(|order| self.graph.order_taken(root.parent_id, root.owner, order, root.id));
        if root.order_num.is_none() || collides {
            root.order_num = Some(self.graph.next_order_num(root.parent_id, root.owner));
        }

        let mut next_order: HashMap<Option<ElementId>, u32> = HashMap::new();
        for child in &children {
            if let Some(order) = child.order_num {
                let slot = next_order.entry(child.parent_id).or_insert(0);
                *slot = (*slot).max(order.saturating_add(1));
            }
        }
        let mut batch = Vec::with_capacity(children.len() + 1);
        batch.push(root);
        for child in children {
            let mut child = normalized(child);
            if child.order_num.is_none() {
                let slot = next_order.entry(child.parent_id).or_insert(0);
                child.order_num = Some(*slot);
                *slot = slot.saturating_add(1);
            }
            batch.push(child);
        }
        self.graph.validate_insert(&batch)?;

        let root_id = batch[0].id;
        let description = format!("Add {}", batch[0].tag);
        self.graph.insert_many(batch.clone());
        log::debug!("add complex {root_id} with {} children", batch.len() - 1);
        self.record(HistoryKind::Add, &description, Vec::new(), batch.clone());
        self.schedule_reorders(&batch);
        self.persist_inserts(&batch);
        Ok(root_id)
    }

    // ─── Update ──────────────────────────────────────────────────────────

    /// Shallow-merge `props` into the element's props. Returns `false`
    /// without side effects when nothing would change.
    pub fn update_element_props(&mut self, id: ElementId, props: Props) -> bool {
        let Some(el) = self.graph.get(id) else {
            log::debug!("update props: unknown element {id}");
            return false;
        };
        let merged = shallow_merge(&el.props, props);
        if merged == el.props {
            return false;
        }
        let patch = ElementPatch::props(merged);
        !self
            .apply_patches(vec![(id, patch)], HistoryKind::Update, "Update props")
            .unwrap_or_default()
            .is_empty()
    }

    /// Apply a partial update. `Ok(false)` when nothing changed.
    pub fn update_element(&mut self, id: ElementId, patch: ElementPatch) -> Result<bool, StoreError> {
        if !self.graph.contains(id) {
            log::debug!("update: unknown element {id}");
            return Ok(false);
        }
        let changed = self.apply_patches(vec![(id, patch)], HistoryKind::Update, "Update element")?;
        Ok(!changed.is_empty())
    }

    /// Shallow-merge props into many elements with one history entry.
    /// Returns how many elements changed.
    pub fn batch_update_element_props(&mut self, updates: Vec<(ElementId, Props)>) -> usize {
        let patches: Vec<(ElementId, ElementPatch)> = updates
            .into_iter()
            .filter_map(|(id, props)| {
                let el = self.graph.get(id)?;
                Some((id, ElementPatch::props(shallow_merge(&el.props, props))))
            })
            .collect();
        self.apply_patches(patches, HistoryKind::Batch, "Batch update props")
            .map(|changed| changed.len())
            .unwrap_or_default()
    }

    /// Apply many partial updates atomically with one history entry. If
    /// any reparent is invalid nothing is applied.
    pub fn batch_update_elements(
        &mut self,
        updates: Vec<(ElementId, ElementPatch)>,
    ) -> Result<usize, StoreError> {
        Ok(self
            .apply_patches(updates, HistoryKind::Batch, "Batch update")?
            .len())
    }

    /// Shared body of every patch-based update. Returns the changed ids.
    fn apply_patches(
        &mut self,
        updates: Vec<(ElementId, ElementPatch)>,
        kind: HistoryKind,
        description: &str,
    ) -> Result<Vec<ElementId>, StoreError> {
        let structural = updates.iter().any(|(_, p)| p.parent_id.is_some());
        // Reparents are validated on a staged copy so a late failure
        // leaves the live graph untouched.
        let mut staged = if structural { Some(self.graph.clone()) } else { None };

        let mut before: Vec<Element> = Vec::new();
        let mut touched: Vec<ElementId> = Vec::new();
        let mut seen: HashSet<ElementId> = HashSet::new();
        let mut reorder = false;
        {
            let graph = staged.as_mut().unwrap_or(&mut self.graph);
            for (id, mut patch) in updates {
                if let Some(tag) = &patch.tag {
                    patch.tag = Some(normalize_tag(tag).to_string());
                }
                if let Some(component) = &patch.component
                    && !component_change_allowed(graph, id, component.as_ref())
                {
                    log::debug!("update {id}: component change refused");
                    patch.component = None;
                }
                if let Some(parent) = patch.parent_id {
                    graph.validate_reparent(id, parent)?;
                }
                if let Some(prev) = graph.apply_patch(id, &patch) {
                    reorder |= patch.is_structural();
                    if seen.insert(id) {
                        touched.push(id);
                        before.push(prev);
                    }
                }
            }
        }
        if let Some(staged) = staged {
            self.graph = staged;
        }
        if touched.is_empty() {
            return Ok(touched);
        }

        let after: Vec<Element> = touched
            .iter()
            .filter_map(|id| self.graph.get(*id).cloned())
            .collect();
        self.record(kind, description, before, after.clone());
        self.persist_full_updates(&after);
        if reorder {
            self.schedule_reorders(&after);
        }
        self.refresh_selection(&seen);
        Ok(touched)
    }

    // ─── Order ───────────────────────────────────────────────────────────

    /// Order-only write used by reconciliation. No history.
    pub fn update_element_order(&mut self, id: ElementId, order_num: u32) -> bool {
        self.batch_update_element_orders(&[OrderUpdate { id, order_num }]) > 0
    }

    /// Write many order numbers in one pass. No history. Returns how many
    /// elements changed.
    pub fn batch_update_element_orders(&mut self, updates: &[OrderUpdate]) -> usize {
        let changed: Vec<OrderUpdate> = updates
            .iter()
            .filter(|u| {
                self.graph
                    .get(u.id)
                    .is_some_and(|el| el.order_num != Some(u.order_num))
            })
            .copied()
            .collect();
        let count = self.graph.set_orders(&changed);
        for update in changed {
            if let Some(owner) = self.graph.get(update.id).map(|el| el.owner) {
                self.persist(PersistOp::Update {
                    owner,
                    id: update.id,
                    patch: ElementPatch::order(update.order_num),
                });
            }
        }
        count
    }

    /// Run the reconciliation pass for one scope immediately.
    pub fn reorder_elements(&mut self, owner: Owner) -> usize {
        let updates = compute_reorder_updates(self.graph.elements(), &owner);
        if updates.is_empty() {
            return 0;
        }
        let count = self.batch_update_element_orders(&updates);
        log::info!("reorder {owner:?}: {count} order numbers rewritten");
        count
    }

    // ─── Remove ──────────────────────────────────────────────────────────

    pub fn remove_element(&mut self, id: ElementId) -> Option<RemovalSet> {
        self.remove_elements(&[id])
    }

    /// Remove elements with every structurally linked element, in one
    /// transition and one history entry. Instances of removed masters are
    /// detached in the same transition.
    pub fn remove_elements(&mut self, ids: &[ElementId]) -> Option<RemovalSet> {
        let set = collect_batch_removal(&self.graph, ids)?;
        let remove = set.id_set();
        let removed: Vec<Element> = set
            .ids
            .iter()
            .filter_map(|id| self.graph.get(*id).cloned())
            .collect();

        let mut detached: Vec<Element> = Vec::new();
        let mut detached_before: Vec<Element> = Vec::new();
        for master in removed.iter().filter(|el| el.is_master()) {
            for instance_id in self.graph.instances_of(master.id) {
                if remove.contains(&instance_id) || detached.iter().any(|d| d.id == instance_id) {
                    continue;
                }
                if let Some(instance) = self.graph.get(instance_id) {
                    let versions = self.detached_versions(instance);
                    for v in &versions {
                        if let Some(prev) = self.graph.get(v.id) {
                            detached_before.push(prev.clone());
                        }
                    }
                    detached.extend(versions);
                }
            }
        }

        self.graph.splice(&remove, detached.clone());
        log::debug!(
            "remove {:?}: {} elements, {} instances detached",
            set.roots,
            removed.len(),
            detached.len()
        );

        let mut before = removed.clone();
        before.extend(detached_before);
        self.record(HistoryKind::Remove, "Remove elements", before, detached.clone());
        self.persist_deletes(&removed);
        self.persist_full_updates(&detached);
        if !set.skip_reorder {
            self.schedule_reorders(&removed);
        }
        let touched: HashSet<ElementId> = detached.iter().map(|el| el.id).collect();
        self.refresh_selection(&touched);
        Some(set)
    }

    // ─── Components ──────────────────────────────────────────────────────

    /// The element (and changed cloned descendants) as they look once
    /// `instance` stops being an instance.
    fn detached_versions(&self, instance: &Element) -> Vec<Element> {
        let master = instance
            .master_id()
            .and_then(|id| self.graph.get(id))
            .filter(|m| m.is_master());
        let mut root = instance.clone();
        root.props = resolve_instance_props(instance, master).props;
        let descendants = match &instance.component {
            Some(Component::Instance { descendants, .. }) => descendants.clone(),
            _ => Default::default(),
        };
        root.component = None;

        let mut out = vec![root];
        if descendants.is_empty() {
            return out;
        }
        for id in self.graph.descendants(instance.id) {
            let Some(child) = self.graph.get(id) else {
                continue;
            };
            if let Cow::Owned(props) = resolve_descendant_overrides(child, &descendants) {
                let mut child = child.clone();
                child.props = props;
                out.push(child);
            }
        }
        out
    }

    /// Place a new instance of `master_id` under `parent_id` in `owner`,
    /// cloning the master's subtree with fresh ids. `None` if `master_id`
    /// is not a master or the parent is unusable.
    pub fn create_instance(
        &mut self,
        master_id: ElementId,
        parent_id: Option<ElementId>,
        owner: Owner,
    ) -> Option<ElementId> {
        let Some(master) = self.graph.get(master_id).filter(|m| m.is_master()) else {
            log::debug!("create instance: {master_id} is not a master");
            return None;
        };
        if let Some(parent) = parent_id
            && !self.graph.get(parent).is_some_and(|p| p.owner == owner)
        {
            log::debug!("create instance: parent {parent} is not in {owner:?}");
            return None;
        }

        let root_id = ElementId::temporary();
        let mut root = Element::new(root_id, master.tag.clone(), owner)
            .with_props(master.props.clone())
            .with_component(Component::instance_of(master_id));
        root.parent_id = parent_id;
        root.order_num = Some(self.graph.next_order_num(parent_id, owner));
        root.variable_bindings = master.variable_bindings.clone();
        root.origin_id = Some(master_id);

        let mut id_map: HashMap<ElementId, ElementId> = HashMap::from([(master_id, root_id)]);
        let mut batch = vec![root];
        for old_id in self.graph.descendants(master_id) {
            let Some(source) = self.graph.get(old_id) else {
                continue;
            };
            let new_id = ElementId::temporary();
            id_map.insert(old_id, new_id);
            let mut clone = source.clone();
            clone.id = new_id;
            clone.owner = owner;
            clone.parent_id = source
                .parent_id
                .and_then(|p| id_map.get(&p).copied())
                .or(Some(root_id));
            clone.origin_id = Some(old_id);
            // Nested masters are copied as plain elements.
            if clone.is_master() {
                clone.component = None;
            }
            clone.created_at = None;
            clone.updated_at = None;
            batch.push(clone);
        }

        if let Err(err) = self.graph.validate_insert(&batch) {
            log::debug!("create instance: {err}");
            return None;
        }
        self.graph.insert_many(batch.clone());
        log::debug!("instance {root_id} of {master_id} ({} elements)", batch.len());
        self.record(HistoryKind::Add, "Create instance", Vec::new(), batch.clone());
        self.schedule_reorder(owner);
        self.persist_inserts(&batch);
        Some(root_id)
    }

    /// Promote an ordinary element to a master. Instances cannot be masters.
    pub fn register_as_master(&mut self, id: ElementId, name: Option<String>) -> bool {
        match self.graph.get(id) {
            None => {
                log::debug!("register master: unknown element {id}");
                return false;
            }
            Some(el) if el.is_instance() => {
                log::debug!("register master: {id} is an instance");
                return false;
            }
            Some(_) => {}
        }
        let patch = ElementPatch {
            component: Some(Some(Component::Master { name })),
            ..Default::default()
        };
        !self
            .apply_patches(vec![(id, patch)], HistoryKind::Update, "Register master")
            .unwrap_or_default()
            .is_empty()
    }

    /// Demote a master after detaching every instance that references it,
    /// all in one history entry.
    pub fn unregister_master(&mut self, id: ElementId) -> bool {
        let Some(master) = self.graph.get(id).filter(|m| m.is_master()) else {
            log::debug!("unregister master: {id} is not a master");
            return false;
        };

        let mut demoted = master.clone();
        demoted.component = None;
        let mut before = vec![master.clone()];
        let mut after = vec![demoted];
        for instance_id in self.graph.instances_of(id) {
            if let Some(instance) = self.graph.get(instance_id) {
                for version in self.detached_versions(instance) {
                    if let Some(prev) = self.graph.get(version.id) {
                        before.push(prev.clone());
                    }
                    after.push(version);
                }
            }
        }

        self.graph.splice(&HashSet::new(), after.clone());
        log::debug!("unregister master {id}: {} instances detached", after.len() - 1);
        self.record(HistoryKind::Batch, "Unregister master", before, after.clone());
        self.persist_full_updates(&after);
        let touched: HashSet<ElementId> = after.iter().map(|el| el.id).collect();
        self.refresh_selection(&touched);
        true
    }

    /// Turn an instance into an ordinary element holding its resolved
    /// props. Returns the element as it was before detaching.
    pub fn detach_instance(&mut self, id: ElementId) -> Option<Element> {
        let Some(instance) = self.graph.get(id).filter(|el| el.is_instance()) else {
            log::debug!("detach: {id} is not an instance");
            return None;
        };
        let snapshot = instance.clone();
        let after = self.detached_versions(instance);
        let before: Vec<Element> = after
            .iter()
            .filter_map(|el| self.graph.get(el.id).cloned())
            .collect();

        self.graph.splice(&HashSet::new(), after.clone());
        self.record(HistoryKind::Update, "Detach instance", before, after.clone());
        self.persist_full_updates(&after);
        let touched: HashSet<ElementId> = after.iter().map(|el| el.id).collect();
        self.refresh_selection(&touched);
        Some(snapshot)
    }

    // ─── Structure ───────────────────────────────────────────────────────

    /// Wrap sibling elements in a new `Group` placed where the first of
    /// them was. Returns the group id and selects it.
    pub fn group_elements(&mut self, ids: &[ElementId]) -> Option<ElementId> {
        let mut members: Vec<&Element> = Vec::new();
        for id in ids {
            let Some(el) = self.graph.get(*id) else {
                log::debug!("group: unknown element {id}");
                return None;
            };
            if el.is_body() {
                log::debug!("group: cannot group body {id}");
                return None;
            }
            if !members.iter().any(|m| m.id == el.id) {
                members.push(el);
            }
        }
        let first = *members.first()?;
        if members.iter().any(|m| !m.is_sibling_of(first)) {
            log::debug!("group: elements are not siblings");
            return None;
        }
        members.sort_by(|a, b| a.order_key().cmp(&b.order_key()).then(a.id.cmp(&b.id)));

        let anchor = members[0];
        let group_id = ElementId::with_prefix("group");
        let mut group = Element::new(group_id, tags::GROUP, anchor.owner);
        group.parent_id = anchor.parent_id;
        group.order_num = Some(anchor.order_key());

        let before: Vec<Element> = members.iter().map(|el| (*el).clone()).collect();
        let moved: Vec<Element> = before
            .iter()
            .enumerate()
            .map(|(i, el)| {
                let mut el = el.clone();
                el.parent_id = Some(group_id);
                el.order_num = Some(i as u32);
                el
            })
            .collect();

        if let Err(err) = self.graph.validate_insert(std::slice::from_ref(&group)) {
            log::debug!("group: {err}");
            return None;
        }
        let mut after = vec![group.clone()];
        after.extend(moved.iter().cloned());
        self.graph.splice(&HashSet::new(), after.clone());

        self.record(HistoryKind::Group, "Group elements", before, after);
        self.persist(PersistOp::Insert(group.clone()));
        self.persist_full_updates(&moved);
        self.schedule_reorder(group.owner);
        self.set_selected_element(Some(group_id));
        Some(group_id)
    }

    /// Replace a `Group` with its children, keeping their order at the
    /// group's position among its siblings.
    pub fn ungroup_element(&mut self, id: ElementId) -> bool {
        let Some(group) = self.graph.get(id).filter(|el| el.tag == tags::GROUP) else {
            log::debug!("ungroup: {id} is not a group");
            return false;
        };
        let group = group.clone();
        let children: Vec<Element> = self
            .graph
            .ordered_children(Some(id))
            .into_iter()
            .cloned()
            .collect();
        let mut siblings: Vec<&Element> = self.graph.siblings_in_scope(group.parent_id, group.owner);
        siblings.sort_by(|a, b| a.order_key().cmp(&b.order_key()).then(a.id.cmp(&b.id)));

        let mut sequence: Vec<Element> = Vec::new();
        for sibling in siblings {
            if sibling.id == id {
                for child in &children {
                    let mut child = child.clone();
                    child.parent_id = group.parent_id;
                    sequence.push(child);
                }
            } else {
                sequence.push(sibling.clone());
            }
        }

        let child_ids: HashSet<ElementId> = children.iter().map(|el| el.id).collect();
        let mut before = vec![group.clone()];
        before.extend(children.iter().cloned());
        let mut after = Vec::new();
        for (i, mut el) in sequence.into_iter().enumerate() {
            let order = i as u32;
            let is_child = child_ids.contains(&el.id);
            if el.order_num == Some(order) && !is_child {
                continue;
            }
            if !is_child && let Some(prev) = self.graph.get(el.id) {
                before.push(prev.clone());
            }
            el.order_num = Some(order);
            after.push(el);
        }

        self.graph.splice(&HashSet::from([id]), after.clone());
        self.record(HistoryKind::Ungroup, "Ungroup", before, after.clone());
        self.persist_deletes(std::slice::from_ref(&group));
        self.persist_full_updates(&after);
        self.schedule_reorder(group.owner);
        self.refresh_selection(&child_ids);
        true
    }

    /// Replace a temporary id with a server-assigned one, rewriting parent
    /// pointers, master references and descendant override keys, along with
    /// the selection and every history snapshot.
    pub fn reassign_id(&mut self, old: ElementId, new: ElementId) -> bool {
        if !self.graph.reassign_id(old, new) {
            log::debug!("reassign: cannot rename {old} to {new}");
            return false;
        }
        self.history.rename_id(old, new);
        let was_primary = self.selection.selected_element_id() == Some(old);
        self.selection.rename(old, new);
        if was_primary {
            self.hydrate_primary();
        }
        true
    }

    /// Replace the whole element list in one transition, recording the
    /// difference as a single batch entry.
    pub fn apply_snapshot(&mut self, next: Vec<Element>) -> ElementListDiff {
        let next: Vec<Element> = next.into_iter().map(normalized).collect();
        let diff = diff_elements(self.graph.elements(), &next);
        if diff.is_empty() {
            return diff;
        }
        self.graph.replace_all(next);

        let before = diff.before();
        let after = diff.after();
        self.record(HistoryKind::Batch, "Apply snapshot", before.clone(), after.clone());
        self.persist_deletes(&diff.removed);
        self.persist_inserts(&diff.added);
        let updated: Vec<Element> = diff.updated.iter().map(|(_, a)| a.clone()).collect();
        self.persist_full_updates(&updated);
        self.schedule_reorders(&before);
        self.schedule_reorders(&after);
        self.refresh_selection(&diff.touched_ids());
        diff
    }

    // ─── Bulk load ───────────────────────────────────────────────────────

    /// Replace every element without history or persistence.
    pub fn set_elements(&mut self, elements: Vec<Element>) {
        let elements: Vec<Element> = elements.into_iter().map(normalized).collect();
        let touched: HashSet<ElementId> = elements.iter().map(|el| el.id).collect();
        self.graph.replace_all(elements);
        self.refresh_selection(&touched);
    }

    /// Load one page's elements, replacing whatever the store held for
    /// that page. Orphans (parents that do not resolve) are moved under the
    /// page Body and persisted. Activates and resets the page's history.
    /// Returns the migrated ids.
    pub fn load_page_elements(&mut self, elements: Vec<Element>, page: PageId) -> Vec<ElementId> {
        let owner = Owner::Page(page);
        let mut loaded: Vec<Element> = Vec::with_capacity(elements.len());
        for el in elements {
            if el.owner != owner {
                log::warn!("load page {page}: {} belongs to {:?}, skipped", el.id, el.owner);
                continue;
            }
            loaded.push(normalized(el));
        }

        let ids: HashSet<ElementId> = loaded.iter().map(|el| el.id).collect();
        let body = loaded.iter().find(|el| el.is_body()).map(|el| el.id);
        let mut migrated: Vec<Element> = Vec::new();
        for el in &mut loaded {
            if let Some(parent) = el.parent_id
                && !ids.contains(&parent)
            {
                el.parent_id = body.filter(|b| *b != el.id);
                migrated.push(el.clone());
            }
        }

        let mut next: Vec<Element> = self
            .graph
            .elements()
            .iter()
            .filter(|el| el.owner != owner && !ids.contains(&el.id))
            .cloned()
            .collect();
        let count = loaded.len();
        self.persistence.prime_local(&loaded);
        next.extend(loaded);
        self.graph.replace_all(next);

        log::info!(
            "loaded {count} elements for page {page} ({} orphans migrated)",
            migrated.len()
        );
        self.history.reset_scope(owner);
        self.history.set_current_scope(Some(owner));
        self.persist_full_updates(&migrated);
        self.schedule_reorder(owner);
        self.refresh_selection(&HashSet::new());
        migrated.iter().map(|el| el.id).collect()
    }

    // ─── History ─────────────────────────────────────────────────────────

    /// Revert or replay one entry as a single transition.
    fn apply_history(&mut self, entry: &HistoryEntry, revert: bool) {
        let (gone, restored) = if revert {
            (&entry.after, &entry.before)
        } else {
            (&entry.before, &entry.after)
        };
        let remove: HashSet<ElementId> = gone.iter().map(|el| el.id).collect();
        let restored_ids: HashSet<ElementId> = restored.iter().map(|el| el.id).collect();
        self.graph.splice(&remove, restored.clone());

        let deleted: Vec<Element> = gone
            .iter()
            .filter(|el| !restored_ids.contains(&el.id))
            .cloned()
            .collect();
        let (updated, inserted): (Vec<Element>, Vec<Element>) =
            restored.iter().cloned().partition(|el| remove.contains(&el.id));
        self.persist_deletes(&deleted);
        self.persist_inserts(&inserted);
        self.persist_full_updates(&updated);
        if entry.is_structural() {
            self.schedule_reorders(gone);
            self.schedule_reorders(restored);
        }
        let mut touched = remove;
        touched.extend(restored_ids);
        self.refresh_selection(&touched);
    }

    /// Undo the last entry of the active scope. Returns its description.
    pub fn undo(&mut self) -> Option<String> {
        let entry = self.history.undo()?;
        self.apply_history(&entry, true);
        Some(entry.description)
    }

    /// Redo the last undone entry. Returns its description.
    pub fn redo(&mut self) -> Option<String> {
        let entry = self.history.redo()?;
        self.apply_history(&entry, false);
        Some(entry.description)
    }

    /// Jump to `index` applied entries. Returns how many steps ran.
    pub fn go_to(&mut self, index: usize) -> usize {
        let steps = self.history.go_to(index);
        for step in &steps {
            match step {
                HistoryStep::Undo(entry) => self.apply_history(entry, true),
                HistoryStep::Redo(entry) => self.apply_history(entry, false),
            }
        }
        steps.len()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ─── Selection ───────────────────────────────────────────────────────

    /// Select a single element. Re-selecting the current single selection
    /// with unchanged props is a no-op.
    pub fn set_selected_element(&mut self, id: Option<ElementId>) {
        let Some(id) = id else {
            self.clear_selection();
            return;
        };
        let Some(el) = self.graph.get(id) else {
            log::debug!("select: unknown element {id}");
            return;
        };
        if self.selection.selected_element_ids() == [id]
            && *self.selection.raw_props() == el.props
        {
            return;
        }
        self.selection.set_single(id, el.props.clone());
        self.hydrate_primary();
    }

    pub fn toggle_element_in_selection(&mut self, id: ElementId) {
        if !self.graph.contains(id) {
            log::debug!("toggle selection: unknown element {id}");
            return;
        }
        let primary = self.selection.selected_element_id();
        self.selection.toggle(id);
        if self.selection.selected_element_id() != primary {
            self.hydrate_primary();
        }
    }

    /// Replace the selection. Unknown ids are dropped.
    pub fn set_selected_elements(&mut self, ids: &[ElementId]) {
        let existing: Vec<ElementId> = ids
            .iter()
            .copied()
            .filter(|id| self.graph.contains(*id))
            .collect();
        self.selection.set_many(&existing);
        self.hydrate_primary();
    }

    pub fn set_editing_context(&mut self, id: Option<ElementId>) {
        let id = id.filter(|id| self.graph.contains(*id));
        self.selection.set_editing_context(id);
    }

    pub fn clear_selection(&mut self) {
        if let Some(handle) = self.selection.hydrate_task.take() {
            self.scheduler.cancel(handle);
        }
        self.selection.clear();
    }

    // ─── Deferred work ───────────────────────────────────────────────────

    fn run_task(&mut self, kind: TaskKind) {
        match kind {
            TaskKind::Reorder(owner) => {
                self.reorder_elements(owner);
            }
            TaskKind::HydrateSelection(id) => {
                self.selection.hydrate_task = None;
                if self.selection.selected_element_id() != Some(id) {
                    log::debug!("hydrate {id}: selection moved on, dropped");
                    return;
                }
                if let Some(props) = self.resolve_props(id) {
                    self.selection.set_props(props);
                }
            }
            TaskKind::FlushPersistence => {
                self.persistence.flush(false);
            }
        }
    }

    /// Advance the virtual clock by `ms`, running every task that comes
    /// due along the way, including tasks those tasks schedule.
    pub fn advance(&mut self, ms: u64) {
        let target = self.scheduler.now() + ms;
        while let Some(due_at) = self.scheduler.next_due_at()
            && due_at <= target
        {
            let step = due_at.saturating_sub(self.scheduler.now());
            self.scheduler.advance_clock(step);
            while let Some((_, kind)) = self.scheduler.pop_due() {
                self.run_task(kind);
            }
        }
        let rest = target.saturating_sub(self.scheduler.now());
        self.scheduler.advance_clock(rest);
    }

    /// Run tasks until the queue is empty.
    pub fn settle(&mut self) {
        while let Some(due_at) = self.scheduler.next_due_at() {
            let step = due_at.saturating_sub(self.scheduler.now());
            self.advance(step);
        }
    }

    /// Explicit, user-initiated save: flush now and notify on failure.
    pub fn save_now(&mut self) -> Vec<PersistOutcome> {
        self.persistence.flush(true)
    }
}
