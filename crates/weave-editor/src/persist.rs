//! Background persistence.
//!
//! The in-memory graph is authoritative during a session. Mutations only
//! enqueue [`PersistOp`]s; a flush sends each op to the local store and,
//! when one is configured, the remote backend. Every outcome is recorded as
//! a [`PersistenceResult`] in an inspectable log. Failures never reach the
//! mutation call path.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use thiserror::Error;
use weave_core::wire::strip_runtime_keys;
use weave_core::{Element, ElementId, ElementPatch, ElementRecord, Owner, PageId, PatchRecord};

// ─── Outcomes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("element `{0}` not found")]
    NotFound(ElementId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The remote store does not know the owning page or layout, so the
    /// write stays local-only.
    UnknownOwner(Owner),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceResult {
    Ok,
    Skipped(SkipReason),
    Failed(PersistError),
}

impl PersistenceResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, PersistenceResult::Ok)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PersistenceResult::Failed(_))
    }
}

impl From<Result<(), PersistError>> for PersistenceResult {
    fn from(result: Result<(), PersistError>) -> Self {
        match result {
            Ok(()) => PersistenceResult::Ok,
            Err(err) => PersistenceResult::Failed(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistTarget {
    Local,
    Remote,
}

/// One logged persistence outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    pub target: PersistTarget,
    pub op: String,
    pub result: PersistenceResult,
}

/// A user-visible message raised by an explicit save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
}

// ─── Ops ─────────────────────────────────────────────────────────────────

/// A queued write. Each op carries full records, so replays are
/// last-write-wins.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    Insert(Element),
    InsertMany { owner: Owner, elements: Vec<Element> },
    Update { owner: Owner, id: ElementId, patch: ElementPatch },
    DeleteMany { owner: Owner, ids: Vec<ElementId> },
}

impl PersistOp {
    pub fn owner(&self) -> Owner {
        match self {
            PersistOp::Insert(el) => el.owner,
            PersistOp::InsertMany { owner, .. }
            | PersistOp::Update { owner, .. }
            | PersistOp::DeleteMany { owner, .. } => *owner,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PersistOp::Insert(el) => format!("insert {}", el.id),
            PersistOp::InsertMany { elements, .. } => format!("insert {} elements", elements.len()),
            PersistOp::Update { id, .. } => format!("update {id}"),
            PersistOp::DeleteMany { ids, .. } => format!("delete {} elements", ids.len()),
        }
    }

    fn run(&self, adapter: &mut dyn PersistenceAdapter) -> Result<(), PersistError> {
        match self {
            PersistOp::Insert(el) => adapter.insert(el),
            PersistOp::InsertMany { elements, .. } => adapter.insert_many(elements),
            PersistOp::Update { id, patch, .. } => adapter.update(*id, patch),
            PersistOp::DeleteMany { ids, .. } => adapter.delete_many(ids),
        }
    }
}

// ─── Adapter seam ────────────────────────────────────────────────────────

/// A durable store keyed by element id.
pub trait PersistenceAdapter {
    fn insert(&mut self, element: &Element) -> Result<(), PersistError>;

    fn insert_many(&mut self, elements: &[Element]) -> Result<(), PersistError> {
        elements.iter().try_for_each(|el| self.insert(el))
    }

    fn update(&mut self, id: ElementId, patch: &ElementPatch) -> Result<(), PersistError>;

    fn delete_many(&mut self, ids: &[ElementId]) -> Result<(), PersistError>;

    fn get_by_page(&self, page: PageId) -> Result<Vec<Element>, PersistError>;

    /// Whether the store knows `owner`. Checked before every remote write.
    fn owner_exists(&self, owner: Owner) -> Result<bool, PersistError>;
}

// ─── Local store ─────────────────────────────────────────────────────────

/// Local durable store holding each element as a MessagePack blob.
#[derive(Debug, Default)]
pub struct MessagePackStore {
    blobs: BTreeMap<ElementId, Vec<u8>>,
}

impl MessagePackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn get(&self, id: ElementId) -> Result<Option<Element>, PersistError> {
        self.blobs.get(&id).map(|blob| decode(blob)).transpose()
    }
}

fn encode(el: &Element) -> Result<Vec<u8>, PersistError> {
    rmp_serde::to_vec_named(el).map_err(|e| PersistError::Encode(e.to_string()))
}

fn decode(blob: &[u8]) -> Result<Element, PersistError> {
    rmp_serde::from_slice(blob).map_err(|e| PersistError::Decode(e.to_string()))
}

impl PersistenceAdapter for MessagePackStore {
    fn insert(&mut self, element: &Element) -> Result<(), PersistError> {
        self.blobs.insert(element.id, encode(element)?);
        Ok(())
    }

    fn update(&mut self, id: ElementId, patch: &ElementPatch) -> Result<(), PersistError> {
        let mut el = self.get(id)?.ok_or(PersistError::NotFound(id))?;
        el.apply_patch(patch);
        self.blobs.insert(id, encode(&el)?);
        Ok(())
    }

    fn delete_many(&mut self, ids: &[ElementId]) -> Result<(), PersistError> {
        for id in ids {
            self.blobs.remove(id);
        }
        Ok(())
    }

    fn get_by_page(&self, page: PageId) -> Result<Vec<Element>, PersistError> {
        let mut out = Vec::new();
        for blob in self.blobs.values() {
            let el = decode(blob)?;
            if el.page_id() == Some(page) {
                out.push(el);
            }
        }
        Ok(out)
    }

    fn owner_exists(&self, _owner: Owner) -> Result<bool, PersistError> {
        Ok(true)
    }
}

// ─── Remote backend ──────────────────────────────────────────────────────

/// Row-level access to a remote table of snake_case element records.
pub trait RowBackend {
    fn insert_rows(&mut self, rows: Vec<Value>) -> Result<(), String>;
    fn update_row(&mut self, id: &str, patch: Map<String, Value>) -> Result<(), String>;
    fn delete_rows(&mut self, ids: &[&str]) -> Result<(), String>;
    fn select_by_page(&self, page_id: &str) -> Result<Vec<Value>, String>;
    fn owner_exists(&self, owner: Owner) -> Result<bool, String>;
}

/// Adapts a [`RowBackend`] to the element-level adapter seam, translating
/// field names and dropping runtime-only props on the way out.
#[derive(Debug, Default)]
pub struct RemoteAdapter<B: RowBackend> {
    backend: B,
}

impl<B: RowBackend> RemoteAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn to_row(el: &Element) -> Result<Value, PersistError> {
        let mut record = ElementRecord::from_element(el);
        let dropped = strip_runtime_keys(&mut record.props);
        if !dropped.is_empty() {
            log::warn!("remote insert {}: dropped runtime props {dropped:?}", el.id);
        }
        record
            .to_json()
            .map_err(|e| PersistError::Encode(e.to_string()))
    }
}

impl<B: RowBackend> PersistenceAdapter for RemoteAdapter<B> {
    fn insert(&mut self, element: &Element) -> Result<(), PersistError> {
        self.insert_many(std::slice::from_ref(element))
    }

    fn insert_many(&mut self, elements: &[Element]) -> Result<(), PersistError> {
        let rows = elements
            .iter()
            .map(Self::to_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.backend.insert_rows(rows).map_err(PersistError::Backend)
    }

    fn update(&mut self, id: ElementId, patch: &ElementPatch) -> Result<(), PersistError> {
        let mut record = PatchRecord::from_patch(patch);
        if let Some(props) = record.props.as_mut() {
            let dropped = strip_runtime_keys(props);
            if !dropped.is_empty() {
                log::warn!("remote update {id}: dropped runtime props {dropped:?}");
            }
        }
        if record.is_empty() {
            return Ok(());
        }
        let map = record
            .to_json_map()
            .map_err(|e| PersistError::Encode(e.to_string()))?;
        self.backend
            .update_row(id.as_str(), map)
            .map_err(PersistError::Backend)
    }

    fn delete_many(&mut self, ids: &[ElementId]) -> Result<(), PersistError> {
        let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        self.backend.delete_rows(&ids).map_err(PersistError::Backend)
    }

    fn get_by_page(&self, page: PageId) -> Result<Vec<Element>, PersistError> {
        let rows = self
            .backend
            .select_by_page(page.as_str())
            .map_err(PersistError::Backend)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match ElementRecord::from_json(row).and_then(ElementRecord::into_element) {
                Ok(el) => out.push(el),
                Err(err) => log::warn!("remote read on page {page}: skipping row: {err}"),
            }
        }
        Ok(out)
    }

    fn owner_exists(&self, owner: Owner) -> Result<bool, PersistError> {
        self.backend.owner_exists(owner).map_err(PersistError::Backend)
    }
}

/// In-process row backend.
#[derive(Debug, Default)]
pub struct MemoryRowBackend {
    rows: BTreeMap<String, Value>,
    owners: HashSet<Owner>,
    /// When set, every write fails with this message.
    pub fail_writes: Option<String>,
}

impl MemoryRowBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `owner` known, enabling remote writes for it.
    pub fn register_owner(&mut self, owner: Owner) {
        self.owners.insert(owner);
    }

    pub fn row(&self, id: &str) -> Option<&Value> {
        self.rows.get(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn check_writable(&self) -> Result<(), String> {
        match &self.fail_writes {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }
}

impl RowBackend for MemoryRowBackend {
    fn insert_rows(&mut self, rows: Vec<Value>) -> Result<(), String> {
        self.check_writable()?;
        for row in rows {
            let id = row
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| "row without id".to_string())?
                .to_string();
            self.rows.insert(id, row);
        }
        Ok(())
    }

    fn update_row(&mut self, id: &str, patch: Map<String, Value>) -> Result<(), String> {
        self.check_writable()?;
        let Some(Value::Object(row)) = self.rows.get_mut(id) else {
            return Err(format!("no row `{id}`"));
        };
        row.extend(patch);
        Ok(())
    }

    fn delete_rows(&mut self, ids: &[&str]) -> Result<(), String> {
        self.check_writable()?;
        for id in ids {
            self.rows.remove(*id);
        }
        Ok(())
    }

    fn select_by_page(&self, page_id: &str) -> Result<Vec<Value>, String> {
        Ok(self
            .rows
            .values()
            .filter(|row| row.get("page_id").and_then(Value::as_str) == Some(page_id))
            .cloned()
            .collect())
    }

    fn owner_exists(&self, owner: Owner) -> Result<bool, String> {
        Ok(self.owners.contains(&owner))
    }
}

// ─── Coordinator ─────────────────────────────────────────────────────────

/// Outbox plus the configured stores.
pub struct Persistence {
    local: Box<dyn PersistenceAdapter>,
    remote: Option<Box<dyn PersistenceAdapter>>,
    outbox: VecDeque<PersistOp>,
    log: Vec<PersistOutcome>,
    log_limit: usize,
    notifications: Vec<Notification>,
}

impl Default for Persistence {
    fn default() -> Self {
        Self::new(Box::new(MessagePackStore::new()))
    }
}

impl Persistence {
    pub fn new(local: Box<dyn PersistenceAdapter>) -> Self {
        Self {
            local,
            remote: None,
            outbox: VecDeque::new(),
            log: Vec::new(),
            log_limit: usize::MAX,
            notifications: Vec::new(),
        }
    }

    pub fn with_remote(mut self, remote: Box<dyn PersistenceAdapter>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Keep at most `limit` outcomes in the log, dropping the oldest.
    pub fn set_log_limit(&mut self, limit: usize) {
        self.log_limit = limit;
        self.trim_log();
    }

    fn trim_log(&mut self) {
        if self.log.len() > self.log_limit {
            let excess = self.log.len() - self.log_limit;
            self.log.drain(..excess);
        }
    }

    pub fn enqueue(&mut self, op: PersistOp) {
        self.outbox.push_back(op);
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn log(&self) -> &[PersistOutcome] {
        &self.log
    }

    /// Drain the outcome log.
    pub fn take_log(&mut self) -> Vec<PersistOutcome> {
        std::mem::take(&mut self.log)
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn local(&self) -> &dyn PersistenceAdapter {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&dyn PersistenceAdapter> {
        self.remote.as_deref()
    }

    /// Mirror freshly loaded records into the local store, bypassing the
    /// outbox. The remote side already holds them.
    pub fn prime_local(&mut self, elements: &[Element]) {
        if let Err(err) = self.local.insert_many(elements) {
            log::warn!("priming local store with {} elements failed: {err}", elements.len());
        }
    }

    /// Drain the outbox. With `notify`, each failure also raises a
    /// user-visible notification.
    pub fn flush(&mut self, notify: bool) -> Vec<PersistOutcome> {
        let mut outcomes = Vec::new();
        // Remote owner checks are cached for the duration of one flush.
        let mut known: HashMap<Owner, Result<bool, PersistError>> = HashMap::new();

        while let Some(op) = self.outbox.pop_front() {
            let description = op.describe();
            outcomes.push(PersistOutcome {
                target: PersistTarget::Local,
                op: description.clone(),
                result: op.run(self.local.as_mut()).into(),
            });

            if let Some(remote) = self.remote.as_mut() {
                let owner = op.owner();
                let exists = known
                    .entry(owner)
                    .or_insert_with(|| remote.owner_exists(owner))
                    .clone();
                let result = match exists {
                    Ok(true) => op.run(remote.as_mut()).into(),
                    Ok(false) => PersistenceResult::Skipped(SkipReason::UnknownOwner(owner)),
                    Err(err) => PersistenceResult::Failed(err),
                };
                outcomes.push(PersistOutcome {
                    target: PersistTarget::Remote,
                    op: description,
                    result,
                });
            }
        }

        for outcome in &outcomes {
            match &outcome.result {
                PersistenceResult::Ok => {}
                PersistenceResult::Skipped(reason) => {
                    log::debug!("persist {:?} {}: skipped ({reason:?})", outcome.target, outcome.op)
                }
                PersistenceResult::Failed(err) => {
                    log::warn!("persist {:?} {} failed: {err}", outcome.target, outcome.op);
                    if notify {
                        self.notifications.push(Notification {
                            message: format!("Save failed: {err}"),
                        });
                    }
                }
            }
        }
        self.log.extend(outcomes.iter().cloned());
        self.trim_log();
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_core::Component;

    fn page() -> Owner {
        Owner::Page(PageId::intern("persist_page"))
    }

    fn el(name: &str) -> Element {
        Element::new(ElementId::intern(name), "Box", page()).with_order(0)
    }

    #[test]
    fn message_pack_store_roundtrips_elements() {
        let mut store = MessagePackStore::new();
        let original = el("mp_a")
            .with_prop("style", json!({"color": "red"}))
            .with_component(Component::Master { name: Some("A".into()) });
        store.insert(&original).unwrap();
        assert_eq!(store.get(original.id).unwrap(), Some(original.clone()));

        store.update(original.id, &ElementPatch::order(4)).unwrap();
        assert_eq!(store.get(original.id).unwrap().unwrap().order_num, Some(4));
        assert_eq!(store.get_by_page(PageId::intern("persist_page")).unwrap().len(), 1);

        assert_eq!(
            store.update(ElementId::intern("mp_missing"), &ElementPatch::order(1)),
            Err(PersistError::NotFound(ElementId::intern("mp_missing")))
        );
    }

    #[test]
    fn unknown_owner_is_skipped_remotely() {
        let mut persistence = Persistence::default()
            .with_remote(Box::new(RemoteAdapter::new(MemoryRowBackend::new())));
        persistence.enqueue(PersistOp::Insert(el("mp_local_only")));
        let outcomes = persistence.flush(false);
        assert_eq!(outcomes[0].result, PersistenceResult::Ok);
        assert_eq!(
            outcomes[1].result,
            PersistenceResult::Skipped(SkipReason::UnknownOwner(page()))
        );
    }

    #[test]
    fn remote_rows_are_snake_case_and_sanitized() {
        let mut backend = MemoryRowBackend::new();
        backend.register_owner(page());
        let mut remote = RemoteAdapter::new(backend);
        let element = el("mp_remote").with_prop("computedStyle", json!({})).with_prop("label", "x");
        remote.insert(&element).unwrap();
        let row = remote.backend().row("mp_remote").unwrap();
        assert_eq!(row["page_id"], json!("persist_page"));
        assert_eq!(row["props"], json!({"label": "x"}));

        remote.update(element.id, &ElementPatch::order(2)).unwrap();
        assert_eq!(remote.backend().row("mp_remote").unwrap()["order_num"], json!(2));

        let back = remote.get_by_page(PageId::intern("persist_page")).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].order_num, Some(2));
    }

    #[test]
    fn explicit_flush_notifies_on_failure() {
        let mut backend = MemoryRowBackend::new();
        backend.register_owner(page());
        backend.fail_writes = Some("offline".into());
        let mut persistence =
            Persistence::default().with_remote(Box::new(RemoteAdapter::new(backend)));

        persistence.enqueue(PersistOp::Insert(el("mp_bg")));
        let outcomes = persistence.flush(false);
        assert!(outcomes[1].result.is_failed());
        assert!(persistence.notifications().is_empty());

        persistence.enqueue(PersistOp::Insert(el("mp_fg")));
        persistence.flush(true);
        assert_eq!(persistence.notifications().len(), 1);
        assert_eq!(persistence.log().len(), 4);
    }
}
