//! Physical document storage behind a collection
//!
//! The collection layer never touches bytes on disk. It talks to a
//! `PhysicalStore`, which owns document versions, the write lock and the
//! engine-specific properties of one collection.
//!
//! Two implementations ship with the crate:
//! - `MemoryStore`: volatile, with fail points for failure-path tests
//! - `FileStore`: append-only record file, index rebuilt on load

mod errors;
pub mod fail_point;
mod file;
mod lock;
mod memory;
mod record;

pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
pub use fail_point::FailPoints;
pub use file::FileStore;
pub use lock::CollectionWriteLock;
pub use memory::MemoryStore;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::attributes;
use crate::revision::RevisionId;

/// Engine-local handle of one stored document version.
///
/// Every write produces a fresh id; ids are never reused within a store.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalDocumentId(u64);

impl LocalDocumentId {
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalDocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document as returned by a key lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub local_id: LocalDocumentId,
    pub body: Value,
}

impl StoredDocument {
    /// Revision stamped into the stored body.
    pub fn revision(&self) -> RevisionId {
        attributes::extract_revision(&self.body).unwrap_or_default()
    }
}

/// Per-write durability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Flush to stable storage before returning
    pub wait_for_sync: bool,
}

/// Storage engine contract for one collection.
///
/// Implementations are shared between threads. Writers are serialized by the
/// caller through `lock_write`/`unlock_write`; reads may run concurrently.
pub trait PhysicalStore: Send + Sync {
    /// Engine name reported in collection properties.
    fn engine(&self) -> &'static str;

    /// Looks up the live version of `key`.
    fn read(&self, key: &str) -> StorageResult<Option<StoredDocument>>;

    /// Looks up a live version by its local id.
    fn read_local(&self, local_id: LocalDocumentId) -> StorageResult<Option<Value>>;

    /// Stores the first version of a document.
    fn insert(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId>;

    /// Stores a merged version replacing `previous`.
    fn update(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: LocalDocumentId,
        options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId>;

    /// Stores a replacement version replacing `previous`.
    fn replace(
        &self,
        key: &str,
        body: &Value,
        revision: RevisionId,
        previous: LocalDocumentId,
        options: &WriteOptions,
    ) -> StorageResult<LocalDocumentId>;

    /// Removes the live version `previous`. `revision` stamps the removal
    /// marker and advances the store revision.
    fn remove(
        &self,
        key: &str,
        revision: RevisionId,
        previous: LocalDocumentId,
        options: &WriteOptions,
    ) -> StorageResult<()>;

    /// Highest revision written so far, removals included.
    fn revision(&self) -> RevisionId;

    /// Number of live documents.
    fn number_documents(&self) -> u64;

    /// Visits live documents in local id order until the visitor returns false.
    fn for_each(&self, visitor: &mut dyn FnMut(LocalDocumentId, &Value) -> bool)
        -> StorageResult<()>;

    /// Takes the exclusive collection write lock, waiting at most `timeout`.
    fn lock_write(&self, timeout: Duration) -> StorageResult<()>;

    /// Releases the collection write lock.
    fn unlock_write(&self);

    /// Makes documents available. Loading a loaded store is a no-op.
    fn load(&self) -> StorageResult<()>;

    /// Releases in-memory state; documents stay persisted.
    fn unload(&self) -> StorageResult<()>;

    /// Shuts the store down ahead of `destroy`.
    fn close(&self) -> StorageResult<()>;

    /// Deletes all persisted state. The store is unusable afterwards.
    fn destroy(&self) -> StorageResult<()>;

    /// Engine-specific properties.
    fn properties(&self) -> Map<String, Value>;

    /// Validates and applies engine-specific properties. Rejected properties
    /// leave the store unchanged.
    fn update_properties(&self, properties: &Map<String, Value>, do_sync: bool)
        -> StorageResult<()>;

    /// Persists the serialized collection definition.
    fn persist_definition(&self, definition: &Value, do_sync: bool) -> StorageResult<()>;
}
