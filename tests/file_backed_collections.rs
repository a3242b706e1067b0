//! File-backed collection integration tests
//!
//! Collections over the append-only file store:
//! - identity, documents and configuration survive a reopen
//! - a failed definition write puts back every changed property
//! - a corrupted document file marks the collection corrupted
//! - drop removes the collection directory

use std::fs;
use std::path::Path;
use std::sync::Arc;

use colldb::collection::{
    Collection, CollectionContext, CollectionDefinition, CollectionStatus, CollectionType,
};
use colldb::mutation::{DocumentPipeline, OperationOptions};
use colldb::store::fail_point::points;
use colldb::store::{FileStore, PhysicalStore};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn create(dir: &Path, name: &str, context: &CollectionContext) -> Collection {
    let store = FileStore::open(dir).unwrap();
    Collection::create(
        CollectionDefinition::new(name, CollectionType::Document),
        Arc::new(store),
        context.clone(),
    )
    .unwrap()
}

fn reopen(dir: &Path, context: &CollectionContext) -> Collection {
    let definition = FileStore::read_definition(dir).unwrap().unwrap();
    let definition = CollectionDefinition::from_value(&definition).unwrap();
    let store = FileStore::open(dir).unwrap();
    context.clock.observe(store.revision());
    Collection::open(definition, Arc::new(store), context.clone()).unwrap()
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_collection_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("users");
    let context = CollectionContext::default();

    let (id, guid, revision) = {
        let c = create(&dir, "users", &context);
        let pipeline = DocumentPipeline::new(&c);
        pipeline.insert(&json!({"_key": "a", "v": 1}), &OperationOptions::default()).unwrap();
        pipeline.insert(&json!({"_key": "b", "v": 2}), &OperationOptions::default()).unwrap();
        let removed = pipeline.remove(&json!("b"), &OperationOptions::default()).unwrap();
        let updated = pipeline.update(&json!({"_key": "a", "v": 3}), &OperationOptions::default()).unwrap();
        assert!(updated.revision > removed.revision);
        (c.id(), c.guid().to_string(), updated.revision)
    };

    let c = reopen(&dir, &context);
    assert_eq!(c.id(), id);
    assert_eq!(c.guid(), guid);

    let pipeline = DocumentPipeline::new(&c);
    let a = pipeline.document("a").unwrap();
    assert_eq!(a["v"], 3);
    assert_eq!(a["_rev"], revision.encode());
    assert_eq!(pipeline.document("b").unwrap_err().code(), "COLLDB_DOCUMENT_NOT_FOUND");
    assert_eq!(c.store().number_documents(), 1);

    let next = pipeline.update(&json!({"_key": "a", "v": 4}), &OperationOptions::default()).unwrap();
    assert!(next.revision > revision);
}

#[test]
fn test_rename_and_properties_persisted() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    let context = CollectionContext::default();

    {
        let c = create(&dir, "before", &context);
        c.rename("after", true).unwrap();
        c.update_properties(&json!({"waitForSync": true, "syncOnWrite": false}), true)
            .unwrap();
    }

    let c = reopen(&dir, &context);
    assert_eq!(c.name(), "after");
    assert!(c.wait_for_sync());
    assert_eq!(c.store().properties()["syncOnWrite"], json!(false));

    let definition = c.to_definition();
    assert_eq!(definition["name"], "after");
    assert_eq!(definition["waitForSync"], true);
}

#[test]
fn test_rejected_property_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    let context = CollectionContext::default();
    let c = create(&dir, "strict", &context);

    let err = c
        .update_properties(&json!({"waitForSync": true, "journalSize": 1}), true)
        .unwrap_err();
    assert_eq!(err.code(), "COLLDB_STORAGE_INVALID_PROPERTIES");
    assert!(!c.wait_for_sync());
    assert_eq!(FileStore::read_definition(&dir).unwrap().unwrap()["waitForSync"], false);
}

// =============================================================================
// Failure handling
// =============================================================================

#[test]
fn test_failed_persist_restores_properties() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    let context = CollectionContext::default();
    let store = Arc::new(FileStore::open(&dir).unwrap());
    let c = Collection::create(
        CollectionDefinition::new("logs", CollectionType::Document),
        store.clone(),
        context.clone(),
    )
    .unwrap();

    store.fail_points().arm(points::PERSIST_DEFINITION);
    let err = c
        .update_properties(&json!({"waitForSync": true, "syncOnWrite": false}), true)
        .unwrap_err();
    assert_eq!(err.code(), "COLLDB_STORAGE_WRITE_FAILED");
    assert!(!c.wait_for_sync());
    assert_eq!(store.properties()["syncOnWrite"], json!(true));
    store.fail_points().disarm(points::PERSIST_DEFINITION);

    let on_disk = FileStore::open(&dir).unwrap();
    assert_eq!(on_disk.properties()["syncOnWrite"], json!(true));
    assert_eq!(FileStore::read_definition(&dir).unwrap().unwrap()["waitForSync"], false);
}

#[test]
fn test_corrupted_file_marks_collection_corrupted() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    let context = CollectionContext::default();
    let c = create(&dir, "fragile", &context);

    DocumentPipeline::new(&c)
        .insert(&json!({"_key": "a", "payload": "x".repeat(64)}), &OperationOptions::default())
        .unwrap();
    c.unload().unwrap();
    assert_eq!(c.status_locked(), CollectionStatus::Unloaded);

    let path = dir.join("documents.dat");
    let mut bytes = fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let pipeline = DocumentPipeline::new(&c);
    let err = pipeline.insert(&json!({"_key": "b"}), &OperationOptions::default()).unwrap_err();
    assert_eq!(err.code(), "COLLDB_DATA_CORRUPTION");
    assert_eq!(c.status_locked(), CollectionStatus::Corrupted);

    let err = pipeline.document("a").unwrap_err();
    assert_eq!(err.code(), "COLLDB_CORRUPTED_COLLECTION");
}

#[test]
fn test_drop_removes_directory() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1");
    let context = CollectionContext::default();
    let c = create(&dir, "doomed", &context);
    DocumentPipeline::new(&c)
        .insert(&json!({"_key": "a"}), &OperationOptions::default())
        .unwrap();

    c.drop_collection().unwrap();
    c.drop_collection().unwrap();

    assert!(!dir.exists());
    assert!(c.deleted());
    let err = DocumentPipeline::new(&c)
        .insert(&json!({"_key": "b"}), &OperationOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "COLLDB_DATA_SOURCE_NOT_FOUND");
}
