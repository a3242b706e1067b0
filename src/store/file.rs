//! Append-only file store
//!
//! One directory per collection:
//!
//! ```text
//! <dir>/documents.dat   append-only document records
//! <dir>/collection.json collection definition
//! <dir>/engine.json     engine properties
//! ```
//!
//! Records are never rewritten. Every write appends a new version (or a
//! tombstone); the offset index is rebuilt by scanning the file on load and
//! the latest record for a key wins.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::errors::{StorageError, StorageResult};
use super::fail_point::{points, FailPoints};
use super::lock::CollectionWriteLock;
use super::record::DocumentRecord;
use super::{LocalDocumentId, PhysicalStore, StoredDocument, WriteOptions};
use crate::revision::RevisionId;

const ENGINE: &str = "file";
const DOCUMENTS_FILE: &str = "documents.dat";
const DEFINITION_FILE: &str = "collection.json";
const PROPERTIES_FILE: &str = "engine.json";
const SYNC_ON_WRITE: &str = "syncOnWrite";

/// Open file plus the offset index built from it.
struct OpenState {
    file: Mutex<File>,
    size: u64,
    keys: HashMap<String, LocalDocumentId>,
    offsets: BTreeMap<LocalDocumentId, u64>,
    top_revision: RevisionId,
    next_local_id: u64,
}

impl OpenState {
    fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                StorageError::io_error(
                    format!("Failed to open storage file: {}", path.display()),
                    e,
                )
            })?;

        let mut data = Vec::new();
        (&file)
            .read_to_end(&mut data)
            .map_err(|e| StorageError::read_failed("Failed to read storage file", e))?;

        let mut state = Self {
            file: Mutex::new(file),
            size: data.len() as u64,
            keys: HashMap::new(),
            offsets: BTreeMap::new(),
            top_revision: RevisionId::default(),
            next_local_id: 0,
        };

        let mut offset = 0usize;
        while offset < data.len() {
            let (record, consumed) = DocumentRecord::deserialize(&data[offset..])
                .map_err(|e| StorageError::corruption_at_offset(offset as u64, e.to_string()))?;
            state.apply(&record, offset as u64);
            offset += consumed;
        }

        Ok(state)
    }

    fn apply(&mut self, record: &DocumentRecord, offset: u64) {
        if let Some(previous) = self.keys.remove(&record.key) {
            self.offsets.remove(&previous);
        }
        if !record.is_tombstone {
            self.keys.insert(record.key.clone(), record.local_id);
            self.offsets.insert(record.local_id, offset);
        }
        if record.revision > self.top_revision {
            self.top_revision = record.revision;
        }
        if record.local_id.value() > self.next_local_id {
            self.next_local_id = record.local_id.value();
        }
    }

    fn allocate_local_id(&mut self) -> LocalDocumentId {
        self.next_local_id += 1;
        LocalDocumentId::new(self.next_local_id)
    }

    /// Appends one record. On failure the file is cut back to its previous
    /// length, so a failed write never reappears on a later read or reload.
    fn append(
        &mut self,
        record: &DocumentRecord,
        sync: bool,
        fail_points: &FailPoints,
    ) -> StorageResult<()> {
        let bytes = record.serialize();
        let offset = self.size;

        let file = self.file.get_mut();
        let written = file
            .write_all(&bytes)
            .map_err(|e| StorageError::write_failed("Failed to append document record", e))
            .and_then(|()| fail_points.check(points::AFTER_APPEND))
            .and_then(|()| {
                if sync {
                    file.sync_data()
                        .map_err(|e| StorageError::write_failed("Failed to sync storage file", e))
                } else {
                    Ok(())
                }
            });

        if let Err(e) = written {
            if let Err(truncate) = file.set_len(offset) {
                // Keep later offsets pointing at the real end of the file.
                if let Ok(metadata) = file.metadata() {
                    self.size = metadata.len();
                }
                return Err(StorageError::write_failed(
                    "Failed to discard partial document record",
                    truncate,
                ));
            }
            return Err(e);
        }

        self.size += bytes.len() as u64;
        self.apply(record, offset);
        Ok(())
    }

    fn read_at(&self, offset: u64) -> StorageResult<DocumentRecord> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::read_failed("Failed to seek storage file", e))?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)
            .map_err(|e| StorageError::read_failed("Failed to read record length", e))?;
        let record_length = u32::from_le_bytes(len_buf) as usize;
        if record_length < 4 {
            return Err(StorageError::corruption_at_offset(offset, "Invalid record length"));
        }

        let mut buf = vec![0u8; record_length];
        buf[..4].copy_from_slice(&len_buf);
        file.read_exact(&mut buf[4..])
            .map_err(|e| StorageError::read_failed("Failed to read record", e))?;

        DocumentRecord::deserialize(&buf)
            .map(|(record, _)| record)
            .map_err(|e| StorageError::corruption_at_offset(offset, e.to_string()))
    }

    /// Reads the live record stored for `local_id`.
    fn read_record(&self, local_id: LocalDocumentId) -> StorageResult<Option<DocumentRecord>> {
        let Some(offset) = self.offsets.get(&local_id) else {
            return Ok(None);
        };
        let record = self.read_at(*offset)?;
        if record.local_id != local_id || record.is_tombstone {
            return Err(StorageError::corruption_at_offset(
                *offset,
                format!("record does not belong to local document id {}", local_id),
            ));
        }
        Ok(Some(record))
    }

    fn read_body(&self, local_id: LocalDocumentId) -> StorageResult<Option<Value>> {
        self.read_record(local_id)?.map(|record| decode_body(&record)).transpose()
    }

    fn read_key(&self, key: &str, local_id: LocalDocumentId) -> StorageResult<Option<Value>> {
        let Some(record) = self.read_record(local_id)? else {
            return Ok(None);
        };
        if record.key != key {
            return Err(StorageError::corruption_for_document(
                key,
                format!("record at local document id {} belongs to {}", local_id, record.key),
            ));
        }
        decode_body(&record).map(Some)
    }

    fn check_previous(&self, key: &str, previous: LocalDocumentId) -> StorageResult<()> {
        match self.keys.get(key) {
            Some(current) if *current == previous => Ok(()),
            _ => Err(StorageError::write_failed_no_source(format!(
                "stale local document id {} for key {}",
                previous, key
            ))),
        }
    }
}

/// Documents persisted in an append-only file under one directory.
pub struct FileStore {
    dir: PathBuf,
    state: RwLock<Option<OpenState>>,
    write_lock: CollectionWriteLock,
    properties: RwLock<Map<String, Value>>,
    definition_write: Mutex<()>,
    fail_points: FailPoints,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.dir)
            .field("loaded", &self.state.read().is_some())
            .finish()
    }
}

impl FileStore {
    /// Opens the store in `dir`, creating the directory when missing.
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            StorageError::io_error(format!("Failed to create directory: {}", dir.display()), e)
        })?;

        let properties = Self::read_properties(&dir)?;
        let state = OpenState::open(&dir.join(DOCUMENTS_FILE))?;

        Ok(Self {
            dir,
            state: RwLock::new(Some(state)),
            write_lock: CollectionWriteLock::new(),
            properties: RwLock::new(properties),
            definition_write: Mutex::new(()),
            fail_points: FailPoints::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Reads the definition persisted in `dir`, if any.
    pub fn read_definition(dir: &Path) -> StorageResult<Option<Value>> {
        read_json(&dir.join(DEFINITION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn fail_points(&self) -> &FailPoints {
        &self.fail_points
    }

    fn read_properties(dir: &Path) -> StorageResult<Map<String, Value>> {
        let mut properties = Map::new();
        properties.insert(SYNC_ON_WRITE.to_string(), Value::Bool(true));
        if let Some(Value::Object(stored)) = read_json(&dir.join(PROPERTIES_FILE))? {
            properties.extend(stored);
        }
        properties.insert("engine".to_string(), Value::from(ENGINE));
        Ok(properties)
    }

    fn sync_on_write(&self) -> bool {
        self.properties
            .read()
            .get(SYNC_ON_WRITE)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    fn unavailable(&self) -> StorageError {
        if self.destroyed.load(Ordering::Acquire) {
            StorageError::unavailable("store has been destroyed")
        } else {
            StorageError::unavailable("store is unloaded")
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&OpenState) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.state.read();
        match guard.as_ref() {
            Some(state) => f(state),
            None => Err(self.unavailable()),
        }
    }

    fn with_state_mut<T>(
        &self,
        f: impl FnOnce(&mut OpenState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.state.write();
        match guard.as_mut() {
            Some(state) => f(state),
            None => Err(self.unavailable()),
        }
    }

    fn write_version(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: Option<LocalDocumentId>,
        options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId> {
        self.fail_points.check(points::BEFORE_WRITE)?;
        let bytes = serde_json::to_vec(body).map_err(|e| {
            StorageError::write_failed_no_source(format!("Failed to serialize document: {}", e))
        })?;
        let sync = options.wait_for_sync || self.sync_on_write();

        self.with_state_mut(|state| {
            match previous {
                Some(previous) => state.check_previous(key, previous)?,
                None if state.keys.contains_key(key) => {
                    return Err(StorageError::write_failed_no_source(format!(
                        "key {} already has a live document",
                        key
                    )))
                }
                None => {}
            }
            let local_id = state.allocate_local_id();
            state.append(
                &DocumentRecord::live(key, local_id, revision, bytes),
                sync,
                &self.fail_points,
            )?;
            Ok(local_id)
        })
    }
}

impl PhysicalStore for FileStore {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    fn read(&self, key: &str) -> StorageResult<Option<StoredDocument>> {
        self.with_state(|state| {
            let Some(local_id) = state.keys.get(key).copied() else {
                return Ok(None);
            };
            Ok(state
                .read_key(key, local_id)?
                .map(|body| StoredDocument { local_id, body }))
        })
    }

    fn read_local(&self, local_id: LocalDocumentId) -> StorageResult<Option<Value>> {
        self.with_state(|state| state.read_body(local_id))
    }

    fn insert(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId> {
        self.write_version(key, body, revision, None, options)
    }

    fn update(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: LocalDocumentId,
        options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId> {
        self.write_version(key, body, revision, Some(previous), options)
    }

    fn replace(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: LocalDocumentId,
        options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId> {
        self.write_version(key, body, revision, Some(previous), options)
    }

    fn remove(
        &self,
        key: &str,
        revision: RevisionId,
        previous: LocalDocumentId,
        options: &WriteOptions,
    ) -> StorageResult<()> {
        self.fail_points.check(points::BEFORE_WRITE)?;
        let sync = options.wait_for_sync || self.sync_on_write();
        self.with_state_mut(|state| {
            state.check_previous(key, previous)?;
            state.append(
                &DocumentRecord::tombstone(key, previous, revision),
                sync,
                &self.fail_points,
            )
        })
    }

    fn revision(&self) -> RevisionId {
        self.state
            .read()
            .as_ref()
            .map(|state| state.top_revision)
            .unwrap_or_default()
    }

    fn number_documents(&self) -> u64 {
        self.state
            .read()
            .as_ref()
            .map(|state| state.keys.len() as u64)
            .unwrap_or(0)
    }

    fn for_each(
        &self,
        visitor: &mut dyn FnMut(LocalDocumentId, &Value) -> bool,
    ) -> StorageResult<()> {
        self.with_state(|state| {
            for local_id in state.offsets.keys() {
                if let Some(body) = state.read_body(*local_id)? {
                    if !visitor(*local_id, &body) {
                        break;
                    }
                }
            }
            Ok(())
        })
    }

    fn lock_write(&self, timeout: Duration) -> StorageResult<()> {
        self.write_lock.lock_for(timeout)
    }

    fn unlock_write(&self) {
        self.write_lock.unlock();
    }

    fn load(&self) -> StorageResult<()> {
        self.fail_points.check(points::LOAD)?;
        if self.destroyed.load(Ordering::Acquire) {
            return Err(self.unavailable());
        }
        let mut guard = self.state.write();
        if guard.is_none() {
            *guard = Some(OpenState::open(&self.dir.join(DOCUMENTS_FILE))?);
        }
        Ok(())
    }

    fn unload(&self) -> StorageResult<()> {
        self.fail_points.check(points::UNLOAD)?;
        if let Some(state) = self.state.write().take() {
            state
                .file
                .lock()
                .sync_all()
                .map_err(|e| StorageError::io_error("Failed to sync storage file", e))?;
        }
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.fail_points.check(points::CLOSE)?;
        self.state.write().take();
        Ok(())
    }

    fn destroy(&self) -> StorageResult<()> {
        self.fail_points.check(points::DESTROY)?;
        self.state.write().take();
        self.destroyed.store(true, Ordering::Release);
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io_error(
                format!("Failed to remove directory: {}", self.dir.display()),
                e,
            )),
        }
    }

    fn properties(&self) -> Map<String, Value> {
        self.properties.read().clone()
    }

    fn update_properties(
        &self,
        properties: &Map<String, Value>,
        do_sync: bool,
    ) -> StorageResult<()> {
        self.fail_points.check(points::UPDATE_PROPERTIES)?;
        for (name, value) in properties {
            match name.as_str() {
                "engine" if value.as_str() == Some(ENGINE) => {}
                "engine" => {
                    return Err(StorageError::invalid_properties("engine cannot be changed"))
                }
                SYNC_ON_WRITE if value.is_boolean() => {}
                SYNC_ON_WRITE => {
                    return Err(StorageError::invalid_properties(
                        "syncOnWrite must be a boolean",
                    ))
                }
                other => {
                    return Err(StorageError::invalid_properties(format!(
                        "unknown engine property: {}",
                        other
                    )))
                }
            }
        }

        let mut updated = self.properties.read().clone();
        for (name, value) in properties {
            updated.insert(name.clone(), value.clone());
        }
        write_json_atomic(&self.dir.join(PROPERTIES_FILE), &Value::Object(updated.clone()), do_sync)?;
        *self.properties.write() = updated;
        Ok(())
    }

    fn persist_definition(&self, definition: &Value, do_sync: bool) -> StorageResult<()> {
        self.fail_points.check(points::PERSIST_DEFINITION)?;
        let _serialized = self.definition_write.lock();
        write_json_atomic(&self.dir.join(DEFINITION_FILE), definition, do_sync)
    }
}

fn decode_body(record: &DocumentRecord) -> StorageResult<Value> {
    serde_json::from_slice(&record.body).map_err(|e| {
        StorageError::corruption_for_document(&record.key, format!("Invalid document body: {}", e))
    })
}

fn read_json(path: &Path) -> StorageResult<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StorageError::read_failed(
                format!("Failed to read {}", path.display()),
                e,
            ))
        }
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        StorageError::data_corruption(format!("Invalid JSON in {}: {}", path.display(), e))
    })
}

/// Writes via a temp file and rename so readers never see a partial file.
fn write_json_atomic(path: &Path, value: &Value, do_sync: bool) -> StorageResult<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| {
        StorageError::write_failed_no_source(format!("Failed to serialize {}: {}", path.display(), e))
    })?;

    let mut file = File::create(&tmp).map_err(|e| {
        StorageError::write_failed(format!("Failed to create {}", tmp.display()), e)
    })?;
    file.write_all(&bytes)
        .map_err(|e| StorageError::write_failed(format!("Failed to write {}", tmp.display()), e))?;
    if do_sync {
        file.sync_all()
            .map_err(|e| StorageError::write_failed(format!("Failed to sync {}", tmp.display()), e))?;
    }
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        StorageError::write_failed(format!("Failed to rename {}", tmp.display()), e)
    })
}
