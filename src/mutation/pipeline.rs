//! Insert, update, replace and remove against one collection
//!
//! Every write follows the same sequence:
//!
//! 1. Validate the input (shape, key, edge endpoints where possible)
//! 2. Take the collection write lock, unless the caller holds it
//! 3. Read the previous version
//! 4. Check pattern and expected revision
//! 5. Build the new body and check shard keys
//! 6. Write through the physical store
//!
//! The write lock is released on every exit path by `WriteLockGuard`.

use serde_json::{Map, Value};

use super::errors::{MutationError, MutationResult};
use super::options::{OperationOptions, OperationResult};
use crate::collection::{shard_keys_changed, Collection};
use crate::document::attributes::{self, KEY};
use crate::document::merge::{merge_for_update, new_object_for_insert, new_object_for_replace};
use crate::document::{BuiltDocument, DocumentError, MergeOptions};
use crate::observability::{log_event_with_fields, Event};
use crate::revision::RevisionId;
use crate::store::{PhysicalStore, StorageResult, StoredDocument, WriteOptions};

/// Holds the collection write lock until dropped.
pub struct WriteLockGuard<'a> {
    store: &'a dyn PhysicalStore,
    owned: bool,
}

impl<'a> WriteLockGuard<'a> {
    /// Takes the lock, or borrows it when `already_locked` is set.
    pub fn acquire(
        store: &'a dyn PhysicalStore,
        timeout: std::time::Duration,
        already_locked: bool,
    ) -> StorageResult<Self> {
        if !already_locked {
            store.lock_write(timeout)?;
        }
        Ok(Self {
            store,
            owned: !already_locked,
        })
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.store.unlock_write();
        }
    }
}

/// Returns true when `expected` names a revision other than `found`.
/// No expectation never conflicts.
fn is_conflict(expected: RevisionId, found: RevisionId) -> bool {
    !expected.is_none() && expected != found
}

fn as_object(value: &Value) -> MutationResult<&Map<String, Value>> {
    value
        .as_object()
        .ok_or(MutationError::Document(DocumentError::DocumentTypeInvalid))
}

/// Extracts the key of an update, replace or remove target.
fn target_key(value: &Value) -> MutationResult<&str> {
    let key = match value {
        Value::String(key) => key.as_str(),
        Value::Object(body) => match body.get(KEY) {
            Some(Value::String(key)) => key.as_str(),
            Some(_) => return Err(MutationError::Document(DocumentError::DocumentTypeInvalid)),
            None => return Err(MutationError::DocumentKeyMissing),
        },
        _ => return Err(MutationError::Document(DocumentError::DocumentTypeInvalid)),
    };
    if !attributes::is_valid_key(key) {
        return Err(MutationError::Key(crate::collection::KeyError::BadKey(key.to_string())));
    }
    Ok(key)
}

/// Document operations on one collection.
pub struct DocumentPipeline<'a> {
    collection: &'a Collection,
}

impl<'a> DocumentPipeline<'a> {
    pub fn new(collection: &'a Collection) -> Self {
        Self { collection }
    }

    fn write_options(&self, options: &OperationOptions) -> WriteOptions {
        WriteOptions {
            wait_for_sync: options.wait_for_sync || self.collection.wait_for_sync(),
        }
    }

    fn lock(&self, options: &OperationOptions) -> MutationResult<WriteLockGuard<'a>> {
        let timeout = options.lock_timeout_or(self.collection.context().lock_timeout);
        WriteLockGuard::acquire(self.collection.store().as_ref(), timeout, options.already_locked)
            .map_err(|e| {
                self.collection.note_lock_timeout(&self.collection.name(), &e);
                MutationError::Storage(e)
            })
    }

    fn expected_revision(value: &Value, options: &OperationOptions) -> RevisionId {
        if options.ignore_revs {
            return RevisionId::default();
        }
        attributes::extract_revision(value).unwrap_or_default()
    }

    /// Reads the previous version and runs the pattern and revision checks.
    fn previous(
        &self,
        key: &str,
        expected: RevisionId,
        options: &OperationOptions,
    ) -> MutationResult<StoredDocument> {
        let old = self
            .collection
            .store()
            .read(key)?
            .ok_or_else(|| MutationError::NotFound(key.to_string()))?;

        if !options.matches_pattern(&old.body) {
            return Err(MutationError::NotFound(key.to_string()));
        }

        let actual = old.revision();
        if is_conflict(expected, actual) {
            self.collection.metrics().increment_conflicts();
            let name = self.collection.name();
            log_event_with_fields(
                Event::WriteConflict,
                &[
                    ("collection", name.as_str()),
                    ("key", key),
                    ("expected", expected.encode().as_str()),
                    ("actual", actual.encode().as_str()),
                ],
            );
            return Err(MutationError::Conflict {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        Ok(old)
    }

    fn check_shard_keys(&self, old: &Value, new: &Value) -> MutationResult<()> {
        if !self.collection.is_db_server() {
            return Ok(());
        }
        if shard_keys_changed(&self.collection.sharding(), old, new) {
            self.collection.metrics().increment_rejected();
            let name = self.collection.name();
            log_event_with_fields(
                Event::ShardKeyViolation,
                &[("collection", name.as_str()), ("key", attributes::extract_key(old).unwrap_or(""))],
            );
            return Err(MutationError::ShardingKeysMustNotChange);
        }
        Ok(())
    }

    fn rejected<T>(&self, result: MutationResult<T>) -> MutationResult<T> {
        if let Err(MutationError::Document(_) | MutationError::Key(_)) = result {
            self.collection.metrics().increment_rejected();
        }
        result
    }

    fn note_restored(&self, built: &BuiltDocument) {
        if built.restored {
            // Range was checked while building the body.
            self.collection.clock().observe(built.revision);
        }
    }

    fn log_write(&self, event: Event, key: &str, revision: RevisionId) {
        let name = self.collection.name();
        log_event_with_fields(
            event,
            &[
                ("collection", name.as_str()),
                ("key", key),
                ("revision", revision.encode().as_str()),
            ],
        );
    }

    fn finish(
        &self,
        key: &str,
        old: Option<&StoredDocument>,
        built: BuiltDocument,
        local_id: crate::store::LocalDocumentId,
        options: &OperationOptions,
    ) -> OperationResult {
        let id = built
            .body
            .get(attributes::ID)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        OperationResult {
            key: key.to_string(),
            id,
            revision: built.revision,
            previous_revision: old.map(StoredDocument::revision),
            local_id: Some(local_id),
            old: old.filter(|_| options.return_old).map(|o| o.body.clone()),
            new: options.return_new.then_some(built.body),
            unchanged: false,
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Inserts a new document. A missing `_key` is generated.
    pub fn insert(&self, value: &Value, options: &OperationOptions) -> MutationResult<OperationResult> {
        let built = self.rejected(self.build_insert(value, options))?;
        let key = attributes::extract_key(&built.body)
            .unwrap_or_default()
            .to_string();
        let user_key = value.get(KEY).is_some();

        self.collection.execute_while_loaded(|| {
            let _lock = self.lock(options)?;
            let store = self.collection.store();

            if store.read(&key)?.is_some() {
                return Err(MutationError::UniqueConstraintViolated(key.clone()));
            }
            let local_id = store.insert(&key, &built.body, built.revision, &self.write_options(options))?;

            if user_key {
                self.collection.key_generator().track(&key);
            }
            self.note_restored(&built);
            self.collection.metrics().increment_inserts();
            self.log_write(Event::DocumentInserted, &key, built.revision);
            Ok(self.finish(&key, None, built, local_id, options))
        })
    }

    fn build_insert(&self, value: &Value, options: &OperationOptions) -> MutationResult<BuiltDocument> {
        let body = as_object(value)?;
        let generator = self.collection.key_generator();

        let key = match body.get(KEY) {
            Some(Value::String(key)) => {
                if options.is_restore {
                    if !attributes::is_valid_key(key) {
                        return Err(crate::collection::KeyError::BadKey(key.clone()).into());
                    }
                } else {
                    generator.validate_key(key)?;
                }
                key.clone()
            }
            Some(other) => {
                return Err(crate::collection::KeyError::BadKey(other.to_string()).into())
            }
            None => generator.generate()?,
        };

        let id = attributes::make_id(&self.collection.name(), &key);
        Ok(new_object_for_insert(
            body,
            &key,
            &id,
            self.collection.is_edge(),
            options.is_restore,
            self.collection.clock(),
        )?)
    }

    /// Merges `value` into the stored document named by its `_key`.
    pub fn update(&self, value: &Value, options: &OperationOptions) -> MutationResult<OperationResult> {
        let body = self.rejected(as_object(value))?;
        let key = self.rejected(target_key(value))?;
        let expected = Self::expected_revision(value, options);
        let is_edge = self.collection.is_edge();

        self.collection.execute_while_loaded(|| {
            let _lock = self.lock(options)?;
            let old = self.previous(key, expected, options)?;

            if attributes::is_effectively_empty(body, is_edge) {
                return Ok(self.unchanged(key, old, options));
            }

            let old_body = as_object(&old.body)?;
            let merge_options = MergeOptions {
                merge_objects: options.merge_objects,
                keep_null: options.keep_null,
                is_restore: options.is_restore,
                max_depth: self.collection.context().max_merge_depth,
            };
            let built = self.rejected(
                merge_for_update(old_body, body, is_edge, &merge_options, self.collection.clock())
                    .map_err(MutationError::from),
            )?;
            self.check_shard_keys(&old.body, &built.body)?;

            let local_id = self.collection.store().update(
                key,
                &built.body,
                built.revision,
                old.local_id,
                &self.write_options(options),
            )?;

            self.note_restored(&built);
            self.collection.metrics().increment_updates();
            self.log_write(Event::DocumentUpdated, key, built.revision);
            Ok(self.finish(key, Some(&old), built, local_id, options))
        })
    }

    fn unchanged(&self, key: &str, old: StoredDocument, options: &OperationOptions) -> OperationResult {
        let revision = old.revision();
        self.collection.metrics().increment_noop_updates();
        self.log_write(Event::DocumentUnchanged, key, revision);

        let id = old
            .body
            .get(attributes::ID)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        OperationResult {
            key: key.to_string(),
            id,
            revision,
            previous_revision: Some(revision),
            local_id: Some(old.local_id),
            new: options.return_new.then(|| old.body.clone()),
            old: options.return_old.then(|| old.body.clone()),
            unchanged: true,
        }
    }

    /// Replaces the stored document named by the `_key` of `value`.
    pub fn replace(&self, value: &Value, options: &OperationOptions) -> MutationResult<OperationResult> {
        let body = self.rejected(as_object(value))?;
        let key = self.rejected(target_key(value))?;
        let expected = Self::expected_revision(value, options);

        self.collection.execute_while_loaded(|| {
            let _lock = self.lock(options)?;
            let old = self.previous(key, expected, options)?;

            let old_body = as_object(&old.body)?;
            let built = self.rejected(
                new_object_for_replace(
                    old_body,
                    body,
                    self.collection.is_edge(),
                    options.is_restore,
                    self.collection.clock(),
                )
                .map_err(MutationError::from),
            )?;
            self.check_shard_keys(&old.body, &built.body)?;

            let local_id = self.collection.store().replace(
                key,
                &built.body,
                built.revision,
                old.local_id,
                &self.write_options(options),
            )?;

            self.note_restored(&built);
            self.collection.metrics().increment_replaces();
            self.log_write(Event::DocumentReplaced, key, built.revision);
            Ok(self.finish(key, Some(&old), built, local_id, options))
        })
    }

    /// Removes a document. `target` is either a key or an object carrying
    /// `_key` and optionally `_rev`.
    pub fn remove(&self, target: &Value, options: &OperationOptions) -> MutationResult<OperationResult> {
        let key = self.rejected(target_key(target))?;
        let expected = Self::expected_revision(target, options);

        self.collection.execute_while_loaded(|| {
            let _lock = self.lock(options)?;
            let old = self.previous(key, expected, options)?;

            let removal = match attributes::extract_revision(target) {
                Some(revision) if options.is_restore => {
                    if !self.collection.clock().observe(revision) {
                        return Err(DocumentError::RevisionOutOfRange(revision.encode()).into());
                    }
                    revision
                }
                _ => self.collection.clock().next(),
            };
            self.collection.store().remove(
                key,
                removal,
                old.local_id,
                &self.write_options(options),
            )?;

            let revision = old.revision();
            self.collection.metrics().increment_removes();
            self.log_write(Event::DocumentRemoved, key, revision);

            let id = old
                .body
                .get(attributes::ID)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(OperationResult {
                key: key.to_string(),
                id,
                revision,
                previous_revision: Some(revision),
                local_id: None,
                new: None,
                old: options.return_old.then_some(old.body),
                unchanged: false,
            })
        })
    }

    /// Reads the live version of `key`. Takes no write lock.
    pub fn document(&self, key: &str) -> MutationResult<Value> {
        self.collection.execute_while_loaded(|| {
            self.collection
                .store()
                .read(key)?
                .map(|stored| stored.body)
                .ok_or_else(|| MutationError::NotFound(key.to_string()))
        })
    }
}
