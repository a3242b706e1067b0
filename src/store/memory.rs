//! Volatile in-memory store

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::errors::{StorageError, StorageResult};
use super::fail_point::{points, FailPoints};
use super::lock::CollectionWriteLock;
use super::{LocalDocumentId, PhysicalStore, StoredDocument, WriteOptions};
use crate::revision::RevisionId;

const ENGINE: &str = "memory";

#[derive(Debug, Default)]
struct MemoryState {
    unloaded: bool,
    destroyed: bool,
    keys: HashMap<String, LocalDocumentId>,
    documents: BTreeMap<LocalDocumentId, Value>,
    top_revision: RevisionId,
    next_local_id: u64,
}

impl MemoryState {
    fn ensure_available(&self) -> StorageResult<()> {
        if self.destroyed {
            return Err(StorageError::unavailable("store has been destroyed"));
        }
        if self.unloaded {
            return Err(StorageError::unavailable("store is unloaded"));
        }
        Ok(())
    }

    fn allocate_local_id(&mut self) -> LocalDocumentId {
        self.next_local_id += 1;
        LocalDocumentId::new(self.next_local_id)
    }

    fn bump_revision(&mut self, revision: RevisionId) {
        if revision > self.top_revision {
            self.top_revision = revision;
        }
    }

    fn check_previous(&self, key: &str, previous: LocalDocumentId) -> StorageResult<()> {
        match self.keys.get(key) {
            Some(current) if *current == previous => Ok(()),
            Some(_) => Err(StorageError::write_failed_no_source(format!(
                "stale local document id {} for key {}",
                previous, key
            ))),
            None => Err(StorageError::write_failed_no_source(format!(
                "no live document for key {}",
                key
            ))),
        }
    }

    fn write_version(
        &mut self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: LocalDocumentId,
    ) -> StorageResult<LocalDocumentId> {
        self.check_previous(key, previous)?;
        self.documents.remove(&previous);
        let local_id = self.allocate_local_id();
        self.documents.insert(local_id, body.clone());
        self.keys.insert(key.to_string(), local_id);
        self.bump_revision(revision);
        Ok(local_id)
    }
}

/// Documents held in process memory.
///
/// A persisted definition is kept so tests can observe what the collection
/// wrote. Fail points make every lifecycle step fail on demand.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    write_lock: CollectionWriteLock,
    properties: RwLock<Map<String, Value>>,
    definition: Mutex<Option<Value>>,
    fail_points: FailPoints,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut properties = Map::new();
        properties.insert("engine".to_string(), Value::from(ENGINE));
        Self {
            state: RwLock::new(MemoryState::default()),
            write_lock: CollectionWriteLock::new(),
            properties: RwLock::new(properties),
            definition: Mutex::new(None),
            fail_points: FailPoints::new(),
        }
    }

    pub fn fail_points(&self) -> &FailPoints {
        &self.fail_points
    }

    /// Last definition handed to `persist_definition`.
    pub fn persisted_definition(&self) -> Option<Value> {
        self.definition.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.read().destroyed
    }

    pub fn is_write_locked(&self) -> bool {
        self.write_lock.is_locked()
    }
}

impl PhysicalStore for MemoryStore {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    fn read(&self, key: &str) -> StorageResult<Option<StoredDocument>> {
        let state = self.state.read();
        state.ensure_available()?;
        Ok(state.keys.get(key).and_then(|local_id| {
            state.documents.get(local_id).map(|body| StoredDocument {
                local_id: *local_id,
                body: body.clone(),
            })
        }))
    }

    fn read_local(&self, local_id: LocalDocumentId) -> StorageResult<Option<Value>> {
        let state = self.state.read();
        state.ensure_available()?;
        Ok(state.documents.get(&local_id).cloned())
    }

    fn insert(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        _options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId> {
        self.fail_points.check(points::BEFORE_WRITE)?;
        let mut state = self.state.write();
        state.ensure_available()?;
        if state.keys.contains_key(key) {
            return Err(StorageError::write_failed_no_source(format!(
                "key {} already has a live document",
                key
            )));
        }
        let local_id = state.allocate_local_id();
        state.documents.insert(local_id, body.clone());
        state.keys.insert(key.to_string(), local_id);
        state.bump_revision(revision);
        Ok(local_id)
    }

    fn update(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: LocalDocumentId,
        _options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId> {
        self.fail_points.check(points::BEFORE_WRITE)?;
        let mut state = self.state.write();
        state.ensure_available()?;
        state.write_version(key, body, revision, previous)
    }

    fn replace(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: LocalDocumentId,
        _options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId> {
        self.fail_points.check(points::BEFORE_WRITE)?;
        let mut state = self.state.write();
        state.ensure_available()?;
        state.write_version(key, body, revision, previous)
    }

    fn remove(
        &self,
        key: &str,
        revision: RevisionId,
        previous: LocalDocumentId,
        _options: &WriteOptions,
    ) -> StorageResult<()> {
        self.fail_points.check(points::BEFORE_WRITE)?;
        let mut state = self.state.write();
        state.ensure_available()?;
        state.check_previous(key, previous)?;
        state.keys.remove(key);
        state.documents.remove(&previous);
        state.bump_revision(revision);
        Ok(())
    }

    fn revision(&self) -> RevisionId {
        self.state.read().top_revision
    }

    fn number_documents(&self) -> u64 {
        self.state.read().documents.len() as u64
    }

    fn for_each(
        &self,
        visitor: &mut dyn FnMut(LocalDocumentId, &Value) -> bool,
    ) -> StorageResult<()> {
        let state = self.state.read();
        state.ensure_available()?;
        for (local_id, body) in &state.documents {
            if !visitor(*local_id, body) {
                break;
            }
        }
        Ok(())
    }

    fn lock_write(&self, timeout: Duration) -> StorageResult<()> {
        self.write_lock.lock_for(timeout)
    }

    fn unlock_write(&self) {
        self.write_lock.unlock();
    }

    fn load(&self) -> StorageResult<()> {
        self.fail_points.check(points::LOAD)?;
        let mut state = self.state.write();
        if state.destroyed {
            return Err(StorageError::unavailable("store has been destroyed"));
        }
        state.unloaded = false;
        Ok(())
    }

    fn unload(&self) -> StorageResult<()> {
        self.fail_points.check(points::UNLOAD)?;
        self.state.write().unloaded = true;
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.fail_points.check(points::CLOSE)?;
        self.state.write().unloaded = true;
        Ok(())
    }

    fn destroy(&self) -> StorageResult<()> {
        self.fail_points.check(points::DESTROY)?;
        let mut state = self.state.write();
        state.keys.clear();
        state.documents.clear();
        state.destroyed = true;
        *self.definition.lock() = None;
        Ok(())
    }

    fn properties(&self) -> Map<String, Value> {
        self.properties.read().clone()
    }

    fn update_properties(
        &self,
        properties: &Map<String, Value>,
        _do_sync: bool,
    ) -> StorageResult<()> {
        self.fail_points.check(points::UPDATE_PROPERTIES)?;
        if let Some(engine) = properties.get("engine") {
            if engine.as_str() != Some(ENGINE) {
                return Err(StorageError::invalid_properties(
                    "engine cannot be changed",
                ));
            }
        }
        let mut current = self.properties.write();
        for (name, value) in properties {
            current.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn persist_definition(&self, definition: &Value, _do_sync: bool) -> StorageResult<()> {
        self.fail_points.check(points::PERSIST_DEFINITION)?;
        *self.definition.lock() = Some(definition.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(store: &MemoryStore, key: &str, rev: u64) -> LocalDocumentId {
        store
            .insert(
                key,
                &json!({"_key": key, "_rev": RevisionId::new(rev).encode()}),
                RevisionId::new(rev),
                &WriteOptions::default(),
            )
            .unwrap()
    }

    #[test]
    fn test_insert_then_read() {
        let store = MemoryStore::new();
        let local_id = insert(&store, "a", 10);

        let found = store.read("a").unwrap().unwrap();
        assert_eq!(found.local_id, local_id);
        assert_eq!(found.revision(), RevisionId::new(10));
        assert_eq!(store.number_documents(), 1);
        assert_eq!(store.revision(), RevisionId::new(10));
    }

    #[test]
    fn test_replace_issues_new_local_id() {
        let store = MemoryStore::new();
        let first = insert(&store, "a", 10);
        let second = store
            .replace("a", &json!({"_key": "a"}), RevisionId::new(11), first, &WriteOptions::default())
            .unwrap();

        assert_ne!(first, second);
        assert!(store.read_local(first).unwrap().is_none());
        assert!(store.read_local(second).unwrap().is_some());
        assert_eq!(store.number_documents(), 1);
    }

    #[test]
    fn test_stale_previous_rejected() {
        let store = MemoryStore::new();
        insert(&store, "a", 10);
        let result = store.update(
            "a",
            &json!({}),
            RevisionId::new(11),
            LocalDocumentId::new(99),
            &WriteOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_remove_advances_revision() {
        let store = MemoryStore::new();
        let local_id = insert(&store, "a", 10);
        store
            .remove("a", RevisionId::new(12), local_id, &WriteOptions::default())
            .unwrap();

        assert!(store.read("a").unwrap().is_none());
        assert_eq!(store.number_documents(), 0);
        assert_eq!(store.revision(), RevisionId::new(12));
    }

    #[test]
    fn test_unloaded_store_rejects_reads() {
        let store = MemoryStore::new();
        insert(&store, "a", 10);
        store.unload().unwrap();
        assert!(store.read("a").is_err());

        store.load().unwrap();
        assert!(store.read("a").unwrap().is_some());
    }

    #[test]
    fn test_destroy_is_final() {
        let store = MemoryStore::new();
        insert(&store, "a", 10);
        store.persist_definition(&json!({"name": "c"}), false).unwrap();
        store.destroy().unwrap();

        assert!(store.is_destroyed());
        assert!(store.persisted_definition().is_none());
        assert!(store.load().is_err());
    }

    #[test]
    fn test_fail_point_blocks_write() {
        let store = MemoryStore::new();
        store.fail_points().arm(points::BEFORE_WRITE);
        let result = store.insert("a", &json!({}), RevisionId::new(1), &WriteOptions::default());
        assert!(result.is_err());
        assert_eq!(store.number_documents(), 0);
    }

    #[test]
    fn test_engine_property_is_immutable() {
        let store = MemoryStore::new();
        let mut props = Map::new();
        props.insert("engine".to_string(), json!("file"));
        assert!(store.update_properties(&props, false).is_err());

        let mut props = Map::new();
        props.insert("cacheEnabled".to_string(), json!(true));
        store.update_properties(&props, false).unwrap();
        assert_eq!(store.properties()["cacheEnabled"], json!(true));
    }

    #[test]
    fn test_for_each_stops_early() {
        let store = MemoryStore::new();
        insert(&store, "a", 1);
        insert(&store, "b", 2);
        insert(&store, "c", 3);

        let mut seen = 0;
        store
            .for_each(&mut |_, _| {
                seen += 1;
                seen < 2
            })
            .unwrap();
        assert_eq!(seen, 2);
    }
}
