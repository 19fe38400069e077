//! Integration tests: background persistence and explicit saves.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use weave_core::{Element, Props};
use weave_editor::{
    ElementGraphStore, MemoryRowBackend, PersistError, PersistTarget, Persistence,
    PersistenceResult, RemoteAdapter, SkipReason, StoreConfig,
};

fn remote_store(register_owner: bool, fail_writes: Option<&str>) -> ElementGraphStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut backend = MemoryRowBackend::new();
    if register_owner {
        backend.register_owner(page());
    }
    backend.fail_writes = fail_writes.map(str::to_string);
    let persistence = Persistence::default().with_remote(Box::new(RemoteAdapter::new(backend)));
    let mut store = ElementGraphStore::with_persistence(StoreConfig::default(), persistence);
    store.load_page_elements(vec![body()], page_id());
    store.settle();
    store
}

fn remote_elements(store: &ElementGraphStore) -> Vec<Element> {
    store
        .persistence()
        .remote()
        .expect("remote configured")
        .get_by_page(page_id())
        .unwrap()
}

fn local_elements(store: &ElementGraphStore) -> Vec<Element> {
    store.persistence().local().get_by_page(page_id()).unwrap()
}

fn remote_results(store: &ElementGraphStore) -> Vec<PersistenceResult> {
    store
        .persistence()
        .log()
        .iter()
        .filter(|o| o.target == PersistTarget::Remote)
        .map(|o| o.result.clone())
        .collect()
}

// ─── Background flush ───────────────────────────────────────────────────

#[test]
fn writes_wait_for_the_scheduler() {
    let mut store = remote_store(true, None);
    store.add_element(el("box", "Box", "body", 0)).unwrap();
    assert_eq!(store.persistence().pending(), 1);
    assert!(remote_elements(&store).is_empty());

    store.advance(0);
    assert_eq!(store.persistence().pending(), 0);
    let remote = remote_elements(&store);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].id, id("box"));
    assert_eq!(remote[0].parent_id, Some(id("body")));
}

#[test]
fn unknown_owner_stays_local_only() {
    let mut store = remote_store(false, None);
    store.add_element(el("box", "Box", "body", 0)).unwrap();
    store.settle();

    assert_eq!(remote_results(&store), vec![PersistenceResult::Skipped(
        SkipReason::UnknownOwner(page())
    )]);
    assert!(local_elements(&store).iter().any(|el| el.id == id("box")));
}

#[test]
fn background_failure_is_logged_not_raised() {
    let mut store = remote_store(true, Some("offline"));
    store.add_element(el("box", "Box", "body", 0)).unwrap();
    store.settle();

    assert!(store.get(id("box")).is_some());
    assert_eq!(remote_results(&store), vec![PersistenceResult::Failed(
        PersistError::Backend("offline".to_string())
    )]);
    assert!(store.persistence().notifications().is_empty());
}

#[test]
fn explicit_save_notifies_on_failure() {
    let mut store = remote_store(true, Some("offline"));
    store.add_element(el("box", "Box", "body", 0)).unwrap();

    let outcomes = store.save_now();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_failed());

    let notes = store.persistence_mut().take_notifications();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].message.contains("offline"));
    assert_eq!(store.persistence().pending(), 0);
}

#[test]
fn outcome_log_is_capped_and_drainable() {
    let config = StoreConfig {
        persist_log_limit: 4,
        ..StoreConfig::default()
    };
    let mut store = ElementGraphStore::new(config);
    store.load_page_elements(vec![body(), el("box", "Box", "body", 0)], page_id());
    store.settle();

    for n in 0..50 {
        let mut patch = Props::new();
        patch.insert("x".into(), json!(n));
        store.update_element_props(id("box"), patch);
        store.advance(1);
    }
    assert_eq!(store.persistence().log().len(), 4);
    assert!(store.persistence().log().iter().all(|o| o.target == PersistTarget::Local));

    let drained = store.persistence_mut().take_log();
    assert_eq!(drained.len(), 4);
    assert!(store.persistence().log().is_empty());
}

// ─── Record contents ────────────────────────────────────────────────────

#[test]
fn runtime_props_are_dropped_on_the_remote_side_only() {
    let mut store = remote_store(true, None);
    store
        .add_element(
            el("box", "Box", "body", 0)
                .with_prop("text", "kept")
                .with_prop("computedStyle", json!({ "width": 10 }))
                .with_prop("__hover", true),
        )
        .unwrap();
    store.settle();

    let remote = remote_elements(&store);
    assert_eq!(remote[0].props.get("text"), Some(&json!("kept")));
    assert!(remote[0].props.get("computedStyle").is_none());
    assert!(remote[0].props.get("__hover").is_none());

    let local = local_elements(&store);
    let local_box = local.iter().find(|el| el.id == id("box")).unwrap();
    assert!(local_box.props.get("computedStyle").is_some());
}

#[test]
fn last_write_wins_across_updates() {
    let mut store = remote_store(true, None);
    store.add_element(el("box", "Box", "body", 0)).unwrap();
    store.settle();

    for text in ["one", "two", "three"] {
        let mut patch = Props::new();
        patch.insert("text".into(), json!(text));
        store.update_element_props(id("box"), patch);
    }
    store.settle();

    assert_eq!(remote_elements(&store)[0].props.get("text"), Some(&json!("three")));
    assert!(remote_results(&store).iter().all(PersistenceResult::is_ok));
}

#[test]
fn undo_of_removal_restores_remote_rows() {
    let mut store = remote_store(true, None);
    store.add_element(el("box", "Box", "body", 0)).unwrap();
    store.settle();
    store.remove_element(id("box")).unwrap();
    store.settle();
    assert!(remote_elements(&store).is_empty());

    store.undo();
    store.settle();
    assert_eq!(remote_elements(&store).len(), 1);
}

// ─── Page loads ─────────────────────────────────────────────────────────

#[test]
fn orphans_are_migrated_under_body_and_persisted() {
    let mut store = ElementGraphStore::default();
    let migrated = store.load_page_elements(
        vec![body(), el("orphan", "Box", "ghost", 0), el("fine", "Box", "body", 0)],
        page_id(),
    );
    assert_eq!(migrated, vec![id("orphan")]);
    assert_eq!(store.get(id("orphan")).unwrap().parent_id, Some(id("body")));
    assert!(!store.can_undo());

    store.settle();
    let local = local_elements(&store);
    let orphan = local.iter().find(|el| el.id == id("orphan")).unwrap();
    assert_eq!(orphan.parent_id, Some(id("body")));
    assert_eq!(order_set(&store, Some(id("body"))), vec![0, 1]);
}
