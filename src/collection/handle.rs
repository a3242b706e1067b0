//! The collection handle
//!
//! A `Collection` owns everything one collection needs at runtime: its
//! definition, key generator, sharding descriptor, status and physical
//! store. Collaborators shared between collections (clock, version tracker,
//! metrics) arrive through a `CollectionContext`.
//!
//! Lock order, outermost first:
//!
//! 1. info lock (rename, property changes)
//! 2. status lock (shared for operations, exclusive for transitions)
//! 3. collection write lock inside the physical store
//!
//! Code holding the status lock never takes it a second time.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::definition::{is_allowed_name, CollectionDefinition, CollectionType, MINIMUM_VERSION};
use super::errors::{CollectionError, CollectionResult};
use super::estimates::{Estimates, IndexEstimateSource, IndexEstimates, DEFAULT_ESTIMATES_TTL};
use super::key_generator::{create_key_generator, KeyGenerator, KeyOptions};
use super::sharding::ShardingInfo;
use super::status::CollectionStatus;
use super::tracker::{NoopVersionTracker, VersionTracker};
use crate::document::DEFAULT_MAX_MERGE_DEPTH;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};
use crate::revision::HybridLogicalClock;
use crate::store::{PhysicalStore, StorageError};

/// Default timeout for the collection write lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(900);

/// Attributes left out of the cluster inventory, since they differ between
/// replicas or are reported elsewhere.
pub const INVENTORY_IGNORE_KEYS: &[&str] = &[
    "allowUserKeys",
    "cid",
    "count",
    "statusString",
    "version",
    "distributeShardsLike",
    "objectId",
    "indexes",
];

/// Properties handled by the collection itself; everything else is
/// forwarded to the physical store.
const COLLECTION_PROPERTIES: &[&str] = &["waitForSync", "replicationFactor"];

type DeferredDrop = Box<dyn FnOnce() + Send>;

/// Process-wide collaborators shared by every collection.
#[derive(Clone)]
pub struct CollectionContext {
    pub clock: Arc<HybridLogicalClock>,
    pub tracker: Arc<dyn VersionTracker>,
    pub metrics: Arc<MetricsRegistry>,
    /// Collections are shards living on a DB server.
    pub is_db_server: bool,
    /// Default wait for the collection write lock.
    pub lock_timeout: Duration,
    pub max_merge_depth: usize,
    pub estimates_ttl: Duration,
}

impl Default for CollectionContext {
    fn default() -> Self {
        Self {
            clock: Arc::new(HybridLogicalClock::new()),
            tracker: Arc::new(NoopVersionTracker),
            metrics: Arc::new(MetricsRegistry::new()),
            is_db_server: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_merge_depth: DEFAULT_MAX_MERGE_DEPTH,
            estimates_ttl: DEFAULT_ESTIMATES_TTL,
        }
    }
}

impl std::fmt::Debug for CollectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionContext")
            .field("is_db_server", &self.is_db_server)
            .field("lock_timeout", &self.lock_timeout)
            .field("max_merge_depth", &self.max_merge_depth)
            .finish()
    }
}

pub struct Collection {
    id: u64,
    plan_id: u64,
    guid: String,
    name: RwLock<String>,
    collection_type: CollectionType,
    version: u32,
    is_system: bool,
    is_smart: bool,
    is_local: bool,

    status: RwLock<CollectionStatus>,
    info_lock: Mutex<()>,
    internal_version: AtomicU32,
    wait_for_sync: AtomicBool,

    key_generator: Box<dyn KeyGenerator>,
    sharding: RwLock<ShardingInfo>,
    indexes: RwLock<Vec<Value>>,
    estimates: IndexEstimates,
    store: Arc<dyn PhysicalStore>,
    context: CollectionContext,
    deferred_drops: Mutex<Vec<DeferredDrop>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("type", &self.collection_type)
            .field("status", &*self.status.read())
            .finish()
    }
}

impl Collection {
    /// Restores a collection from its persisted definition.
    pub fn open(
        definition: CollectionDefinition,
        store: Arc<dyn PhysicalStore>,
        context: CollectionContext,
    ) -> CollectionResult<Self> {
        Self::open_with_estimates(definition, store, context, None)
    }

    /// Restores a collection whose index estimates come from `source`.
    pub fn open_with_estimates(
        definition: CollectionDefinition,
        store: Arc<dyn PhysicalStore>,
        context: CollectionContext,
        source: Option<Box<dyn IndexEstimateSource>>,
    ) -> CollectionResult<Self> {
        if !is_allowed_name(definition.is_system, &definition.name) {
            return Err(CollectionError::IllegalName(definition.name));
        }

        let version = definition.version();
        if version < MINIMUM_VERSION {
            return Err(CollectionError::TooOldVersion {
                name: definition.name,
                version,
            });
        }

        let id = match definition.parsed_id()? {
            Some(id) => id,
            None => context.clock.new_tick(),
        };
        let plan_id = match definition.plan_id.as_deref() {
            None | Some("") => id,
            Some(raw) => raw.parse().map_err(|_| {
                CollectionError::BadParameter(format!("invalid planId '{}'", raw))
            })?,
        };
        let guid = definition
            .resolved_guid()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let status = if definition.deleted {
            CollectionStatus::Deleted
        } else {
            definition.status.unwrap_or(CollectionStatus::NewBorn)
        };

        let mut key_options = definition.key_options.clone().unwrap_or_default();
        if let Some(allow) = definition.allow_user_keys {
            key_options.allow_user_keys = allow;
        }
        let key_generator = create_key_generator(&key_options, Arc::clone(&context.clock))?;
        let sharding = definition.sharding()?;
        let estimates = IndexEstimates::new(source, context.estimates_ttl);

        Ok(Self {
            id,
            plan_id,
            guid,
            name: RwLock::new(definition.name),
            collection_type: definition.collection_type,
            version,
            is_system: definition.is_system,
            is_smart: definition.is_smart,
            is_local: definition.is_local,
            status: RwLock::new(status),
            info_lock: Mutex::new(()),
            internal_version: AtomicU32::new(0),
            wait_for_sync: AtomicBool::new(definition.wait_for_sync),
            key_generator,
            sharding: RwLock::new(sharding),
            indexes: RwLock::new(definition.indexes),
            estimates,
            store,
            context,
            deferred_drops: Mutex::new(Vec::new()),
        })
    }

    /// Creates a new collection and persists its definition.
    pub fn create(
        definition: CollectionDefinition,
        store: Arc<dyn PhysicalStore>,
        context: CollectionContext,
    ) -> CollectionResult<Self> {
        let collection = Self::open(definition, store, context)?;
        collection.persist(CollectionStatus::NewBorn)?;

        let id = collection.id.to_string();
        let name = collection.name();
        let collection_type = collection.collection_type.to_string();
        log_event_with_fields(
            Event::CollectionCreated,
            &[("collection", name.as_str()), ("id", id.as_str()), ("type", collection_type.as_str())],
        );
        collection.context.tracker.track("create collection");
        Ok(collection)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn plan_id(&self) -> u64 {
        self.plan_id
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn collection_type(&self) -> CollectionType {
        self.collection_type
    }

    pub fn is_edge(&self) -> bool {
        self.collection_type.is_edge()
    }

    /// Definition format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Counter bumped on every structural change, for cache invalidation.
    pub fn internal_version(&self) -> u32 {
        self.internal_version.load(Ordering::Acquire)
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub fn is_smart(&self) -> bool {
        self.is_smart
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn is_db_server(&self) -> bool {
        self.context.is_db_server
    }

    pub fn wait_for_sync(&self) -> bool {
        self.wait_for_sync.load(Ordering::Acquire)
    }

    pub fn deleted(&self) -> bool {
        *self.status.read() == CollectionStatus::Deleted
    }

    pub fn key_generator(&self) -> &dyn KeyGenerator {
        self.key_generator.as_ref()
    }

    pub fn key_options(&self) -> KeyOptions {
        self.key_generator.options()
    }

    /// Snapshot of the sharding descriptor.
    pub fn sharding(&self) -> ShardingInfo {
        self.sharding.read().clone()
    }

    pub fn indexes(&self) -> Vec<Value> {
        self.indexes.read().clone()
    }

    pub fn store(&self) -> &Arc<dyn PhysicalStore> {
        &self.store
    }

    pub fn context(&self) -> &CollectionContext {
        &self.context
    }

    pub fn clock(&self) -> &HybridLogicalClock {
        &self.context.clock
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.context.metrics
    }

    // ========================================================================
    // Status lock
    // ========================================================================

    /// Current status, read under the shared status lock.
    pub fn status_locked(&self) -> CollectionStatus {
        *self.status.read()
    }

    /// Current status, or `None` when a transition holds the lock.
    pub fn try_fetch_status(&self) -> Option<CollectionStatus> {
        self.status.try_read().map(|status| *status)
    }

    /// Runs `f` with the shared status lock held.
    pub fn execute_while_status_locked<T>(&self, f: impl FnOnce(CollectionStatus) -> T) -> T {
        let status = self.status.read();
        f(*status)
    }

    /// Runs `f` with the shared status lock held, or returns `None` without
    /// waiting when the lock is taken exclusively.
    pub fn try_execute_while_status_locked<T>(
        &self,
        f: impl FnOnce(CollectionStatus) -> T,
    ) -> Option<T> {
        let status = self.status.try_read()?;
        Some(f(*status))
    }

    /// Runs `f` with the exclusive status lock held.
    pub fn execute_while_status_write_locked<T>(
        &self,
        f: impl FnOnce(&mut CollectionStatus) -> T,
    ) -> T {
        let mut status = self.status.write();
        f(&mut status)
    }

    /// Runs `f` under the shared status lock once the collection is loaded.
    ///
    /// New-born and unloaded collections are loaded first.
    pub fn execute_while_loaded<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<CollectionError>,
    {
        loop {
            {
                let status = self.status.read();
                match *status {
                    CollectionStatus::Loaded => return f(),
                    CollectionStatus::Deleted => {
                        return Err(CollectionError::NotFound(self.name()).into())
                    }
                    CollectionStatus::Corrupted => {
                        return Err(CollectionError::Corrupted(self.name()).into())
                    }
                    _ => {}
                }
            }
            self.load()?;
        }
    }

    fn transition(status: &mut CollectionStatus, next: CollectionStatus) -> CollectionResult<()> {
        if !status.can_transition_to(next) {
            return Err(CollectionError::InvalidStatusTransition {
                from: *status,
                to: next,
            });
        }
        *status = next;
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Makes the collection's documents available.
    pub fn load(&self) -> CollectionResult<()> {
        let mut status = self.status.write();
        match *status {
            CollectionStatus::Loaded => return Ok(()),
            CollectionStatus::Deleted => return Err(CollectionError::NotFound(self.name())),
            CollectionStatus::Corrupted => return Err(CollectionError::Corrupted(self.name())),
            _ => {}
        }

        let name = self.name();
        let scope = ObservationScope::with_fields("COLLECTION_LOAD", &[("collection", name.as_str())]);
        Self::transition(&mut status, CollectionStatus::Loading)?;

        match self.store.load() {
            Ok(()) => {
                *status = CollectionStatus::Loaded;
                self.bump_internal_version();
                self.context.metrics.increment_structural_changes();
                scope.complete();
                log_event_with_fields(Event::CollectionLoaded, &[("collection", name.as_str())]);
                Ok(())
            }
            Err(e) => {
                *status = CollectionStatus::Corrupted;
                scope.fail(&e.to_string(), e.is_fatal());
                log_event_with_fields(
                    Event::CollectionLoadFailed,
                    &[("collection", name.as_str()), ("error", e.code().code())],
                );
                Err(e.into())
            }
        }
    }

    /// Releases the collection's in-memory state. Waits for running
    /// mutations through the collection write lock.
    pub fn unload(&self) -> CollectionResult<()> {
        let mut status = self.status.write();
        match *status {
            CollectionStatus::Unloaded | CollectionStatus::NewBorn => return Ok(()),
            CollectionStatus::Deleted => return Err(CollectionError::NotFound(self.name())),
            _ => {}
        }

        let name = self.name();
        Self::transition(&mut status, CollectionStatus::Unloading)?;

        if let Err(e) = self.store.lock_write(self.context.lock_timeout) {
            *status = CollectionStatus::Loaded;
            self.note_lock_timeout(&name, &e);
            return Err(e.into());
        }
        let result = self.store.unload();
        self.store.unlock_write();

        match result {
            Ok(()) => {
                *status = CollectionStatus::Unloaded;
                self.context.metrics.increment_structural_changes();
                log_event_with_fields(Event::CollectionUnloaded, &[("collection", name.as_str())]);
                Ok(())
            }
            Err(e) => {
                *status = CollectionStatus::Loaded;
                Err(e.into())
            }
        }
    }

    /// Drops the collection. Dropping twice is a no-op.
    ///
    /// Failures of the physical store are logged and do not stop the
    /// collection from reaching `Deleted`. Only a timeout on the write lock
    /// aborts the drop.
    pub fn drop_collection(&self) -> CollectionResult<()> {
        let mut status = self.status.write();
        if *status == CollectionStatus::Deleted {
            return Ok(());
        }

        let name = self.name();
        if let Err(e) = self.store.lock_write(self.context.lock_timeout) {
            self.note_lock_timeout(&name, &e);
            return Err(e.into());
        }

        for (step, result) in [("close", self.store.close()), ("destroy", self.store.destroy())] {
            if let Err(e) = result {
                log_event_with_fields(
                    Event::CollectionDropPhysicalError,
                    &[("collection", name.as_str()), ("step", step), ("error", e.to_string().as_str())],
                );
            }
        }
        self.store.unlock_write();

        *status = CollectionStatus::Deleted;
        drop(status);

        self.bump_internal_version();
        self.context.metrics.increment_structural_changes();
        log_event_with_fields(
            Event::CollectionDropped,
            &[("collection", name.as_str()), ("id", self.id.to_string().as_str())],
        );
        self.context.tracker.track("drop collection");
        Ok(())
    }

    /// Registers `callback` to run once the last reference to this handle
    /// is gone.
    pub fn defer_drop(&self, callback: impl FnOnce() + Send + 'static) {
        self.deferred_drops.lock().push(Box::new(callback));
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Renames the collection and persists the new definition.
    pub fn rename(&self, new_name: &str, do_sync: bool) -> CollectionResult<()> {
        let _info = self.info_lock.lock();
        let status = self.status.write();

        match *status {
            CollectionStatus::Deleted => return Err(CollectionError::NotFound(self.name())),
            CollectionStatus::Corrupted => return Err(CollectionError::Corrupted(self.name())),
            _ => {}
        }
        if !is_allowed_name(self.is_system, new_name) {
            return Err(CollectionError::IllegalName(new_name.to_string()));
        }

        let guard = RenameGuard::swap(&self.name, new_name);
        let definition = self.build_definition(*status);
        if let Err(e) = self.store.persist_definition(&definition, do_sync) {
            log_event_with_fields(
                Event::CollectionRenameReverted,
                &[("collection", guard.old_name()), ("new_name", new_name), ("error", e.code().code())],
            );
            return Err(e.into());
        }
        let old_name = guard.commit();

        self.bump_internal_version();
        self.context.metrics.increment_structural_changes();
        log_event_with_fields(
            Event::CollectionRenamed,
            &[("collection", old_name.as_str()), ("new_name", new_name)],
        );
        self.context.tracker.track("rename collection");
        Ok(())
    }

    /// Applies changed properties.
    ///
    /// `waitForSync` and `replicationFactor` belong to the collection; any
    /// other attribute is engine-specific and validated by the store. Nothing
    /// is applied unless every property is accepted. If the new definition
    /// cannot be persisted, the previous values are put back.
    pub fn update_properties(&self, properties: &Value, do_sync: bool) -> CollectionResult<()> {
        let properties = properties.as_object().ok_or_else(|| {
            CollectionError::BadParameter("properties must be an object".into())
        })?;

        let _info = self.info_lock.lock();

        let wait_for_sync = match properties.get("waitForSync") {
            None => None,
            Some(Value::Bool(flag)) => Some(*flag),
            Some(_) => {
                return Err(CollectionError::BadParameter("bad value for waitForSync".into()))
            }
        };

        let replication_factor = match properties.get("replicationFactor") {
            None => None,
            Some(requested) => {
                let is_smart_edge = self.is_smart && self.is_edge();
                let sharding = self.sharding.read();
                Some(sharding.check_replication_factor_update(requested, self.is_local, is_smart_edge)?)
            }
        };

        let engine_properties: Map<String, Value> = properties
            .iter()
            .filter(|(name, _)| !COLLECTION_PROPERTIES.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut revert = PropertiesGuard::new(self);
        if !engine_properties.is_empty() {
            let current = self.store.properties();
            let previous: Map<String, Value> = engine_properties
                .keys()
                .filter_map(|name| current.get(name).map(|value| (name.clone(), value.clone())))
                .collect();
            self.store.update_properties(&engine_properties, do_sync)?;
            revert.engine = Some(previous);
        }
        if let Some(flag) = wait_for_sync {
            revert.wait_for_sync = Some(self.wait_for_sync.swap(flag, Ordering::AcqRel));
        }
        if let Some(rf) = replication_factor {
            let mut sharding = self.sharding.write();
            revert.replication_factor = Some(sharding.replication_factor());
            sharding.set_replication_factor(rf);
        }

        let definition = self.build_definition(self.status_locked());
        self.store.persist_definition(&definition, do_sync)?;
        revert.commit();

        self.bump_internal_version();
        self.context.metrics.increment_structural_changes();
        let name = self.name();
        let changed: Vec<&str> = properties.keys().map(String::as_str).collect();
        log_event_with_fields(
            Event::CollectionPropertiesChanged,
            &[("collection", name.as_str()), ("properties", changed.join(",").as_str())],
        );
        self.context.tracker.track("change collection");
        Ok(())
    }

    /// Co-locates this collection's shards with `prototype`.
    pub fn set_distribute_shards_like(&self, prototype: &Collection) -> CollectionResult<()> {
        if prototype.id == self.id {
            return Err(CollectionError::BadParameter(
                "a collection cannot distribute its shards like itself".into(),
            ));
        }
        if let Some(ref other) = prototype.sharding.read().distribute_shards_like() {
            return Err(CollectionError::BadParameter(format!(
                "prototype collection already follows {}",
                other
            )));
        }

        let _info = self.info_lock.lock();
        let prototype_sharding = prototype.sharding();
        self.sharding
            .write()
            .set_distribute_shards_like(&prototype.id.to_string(), &prototype_sharding);
        self.bump_internal_version();
        self.context.tracker.track("change collection");
        Ok(())
    }

    // ========================================================================
    // Index estimates
    // ========================================================================

    /// Index selectivity estimates, refreshed when stale unless
    /// `do_not_update` is set.
    pub fn index_estimates(&self, do_not_update: bool) -> Estimates {
        self.estimates.get(do_not_update)
    }

    pub fn set_index_estimates(&self, estimates: Estimates) {
        self.estimates.set(estimates);
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Full definition, as persisted.
    pub fn to_definition(&self) -> Value {
        let status = self.status_locked();
        self.build_definition(status)
    }

    /// Definition without the attributes named in `ignore_keys`.
    pub fn to_definition_ignore(&self, ignore_keys: &[&str]) -> Value {
        let mut definition = match self.to_definition() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        definition.retain(|name, _| !ignore_keys.contains(&name.as_str()));
        Value::Object(definition)
    }

    /// Entry for the cluster inventory. System collections are skipped
    /// unless `use_system` is set.
    pub fn inventory_entry(&self, use_system: bool, is_ready: bool, all_in_sync: bool) -> Option<Value> {
        if self.is_system && !use_system {
            return None;
        }

        let mut entry = Map::new();
        entry.insert("parameters".into(), self.to_definition_ignore(INVENTORY_IGNORE_KEYS));
        entry.insert("indexes".into(), Value::Array(self.indexes()));
        entry.insert("planVersion".into(), Value::from(self.internal_version()));
        entry.insert("isReady".into(), Value::Bool(is_ready));
        entry.insert("allInSync".into(), Value::Bool(all_in_sync));
        Some(Value::Object(entry))
    }

    fn build_definition(&self, status: CollectionStatus) -> Value {
        let mut out = Map::new();
        let id = self.id.to_string();

        out.insert("cid".into(), Value::from(id.clone()));
        out.insert("id".into(), Value::from(id));
        out.insert("name".into(), Value::from(self.name()));
        out.insert("type".into(), Value::from(self.collection_type.code()));
        out.insert("status".into(), Value::from(status.code()));
        out.insert("statusString".into(), Value::from(status.as_str()));
        out.insert("version".into(), Value::from(self.version));
        out.insert("waitForSync".into(), Value::Bool(self.wait_for_sync()));
        out.insert("deleted".into(), Value::Bool(status == CollectionStatus::Deleted));
        out.insert("globallyUniqueId".into(), Value::from(self.guid.clone()));
        out.insert("isSystem".into(), Value::Bool(self.is_system));

        let key_options = self.key_generator.options();
        out.insert("allowUserKeys".into(), Value::Bool(key_options.allow_user_keys));
        out.insert(
            "keyOptions".into(),
            serde_json::to_value(&key_options).unwrap_or(Value::Null),
        );

        for (name, value) in self.store.properties() {
            out.insert(name, value);
        }

        out.insert("indexes".into(), Value::Array(self.indexes()));
        out.insert("isSmart".into(), Value::Bool(self.is_smart));
        out.insert("planId".into(), Value::from(self.plan_id.to_string()));
        self.sharding.read().write_definition(&mut out);
        out.insert("count".into(), Value::from(self.store.number_documents()));

        Value::Object(out)
    }

    fn persist(&self, status: CollectionStatus) -> CollectionResult<()> {
        let definition = self.build_definition(status);
        self.store
            .persist_definition(&definition, self.wait_for_sync())
            .map_err(CollectionError::from)
    }

    fn bump_internal_version(&self) {
        self.internal_version.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_lock_timeout(&self, name: &str, error: &StorageError) {
        if error.is_lock_timeout() {
            self.context.metrics.increment_lock_timeouts();
            log_event_with_fields(
                Event::LockTimeout,
                &[("collection", name), ("timeout", error.details().unwrap_or(""))],
            );
        }
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        let callbacks = std::mem::take(&mut *self.deferred_drops.lock());
        if callbacks.is_empty() {
            return;
        }
        let name = self.name.read().clone();
        let count = callbacks.len().to_string();
        for callback in callbacks {
            callback();
        }
        log_event_with_fields(
            Event::DeferredDropExecuted,
            &[("collection", name.as_str()), ("callbacks", count.as_str())],
        );
    }
}

/// Swaps the collection name and puts the old one back unless committed.
struct RenameGuard<'a> {
    name: &'a RwLock<String>,
    old_name: Option<String>,
}

impl<'a> RenameGuard<'a> {
    fn swap(name: &'a RwLock<String>, new_name: &str) -> Self {
        let old_name = std::mem::replace(&mut *name.write(), new_name.to_string());
        Self {
            name,
            old_name: Some(old_name),
        }
    }

    fn old_name(&self) -> &str {
        self.old_name.as_deref().unwrap_or("")
    }

    /// Keeps the new name and returns the old one.
    fn commit(mut self) -> String {
        self.old_name.take().unwrap_or_default()
    }
}

impl Drop for RenameGuard<'_> {
    fn drop(&mut self) {
        if let Some(old_name) = self.old_name.take() {
            *self.name.write() = old_name;
        }
    }
}

/// Puts back property values changed by `update_properties` unless
/// committed.
struct PropertiesGuard<'a> {
    collection: &'a Collection,
    wait_for_sync: Option<bool>,
    replication_factor: Option<u64>,
    engine: Option<Map<String, Value>>,
}

impl<'a> PropertiesGuard<'a> {
    fn new(collection: &'a Collection) -> Self {
        Self {
            collection,
            wait_for_sync: None,
            replication_factor: None,
            engine: None,
        }
    }

    fn commit(mut self) {
        self.wait_for_sync = None;
        self.replication_factor = None;
        self.engine = None;
    }
}

impl Drop for PropertiesGuard<'_> {
    fn drop(&mut self) {
        let wait_for_sync = self.wait_for_sync.take();
        let replication_factor = self.replication_factor.take();
        let engine = self.engine.take();
        if wait_for_sync.is_none() && replication_factor.is_none() && engine.is_none() {
            return;
        }

        if let Some(flag) = wait_for_sync {
            self.collection.wait_for_sync.store(flag, Ordering::Release);
        }
        if let Some(rf) = replication_factor {
            self.collection.sharding.write().set_replication_factor(rf);
        }
        let restored = match engine {
            Some(previous) if !previous.is_empty() => {
                self.collection.store.update_properties(&previous, false)
            }
            _ => Ok(()),
        };

        let name = self.collection.name();
        let outcome = match &restored {
            Ok(()) => "restored",
            Err(e) => e.code().code(),
        };
        log_event_with_fields(
            Event::CollectionPropertiesReverted,
            &[("collection", name.as_str()), ("engine_properties", outcome)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::sharding::SATELLITE;
    use crate::collection::tracker::CountingVersionTracker;
    use crate::store::{fail_point::points, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn context_with_tracker() -> (CollectionContext, Arc<CountingVersionTracker>) {
        let tracker = Arc::new(CountingVersionTracker::new());
        let context = CollectionContext {
            tracker: tracker.clone(),
            lock_timeout: Duration::from_millis(50),
            ..CollectionContext::default()
        };
        (context, tracker)
    }

    fn create(name: &str) -> (Collection, Arc<MemoryStore>, Arc<CountingVersionTracker>) {
        let store = Arc::new(MemoryStore::new());
        let (context, tracker) = context_with_tracker();
        let definition = CollectionDefinition::new(name, CollectionType::Document);
        let collection = Collection::create(definition, store.clone(), context).unwrap();
        (collection, store, tracker)
    }

    #[test]
    fn test_create_persists_definition() {
        let (collection, store, tracker) = create("users");
        let persisted = store.persisted_definition().unwrap();

        assert_eq!(persisted["name"], json!("users"));
        assert_eq!(persisted["type"], json!(2));
        assert_eq!(persisted["status"], json!(1));
        assert_eq!(persisted["engine"], json!("memory"));
        assert_eq!(persisted["cid"], json!(collection.id().to_string()));
        assert!(!collection.guid().is_empty());
        assert_eq!(tracker.version(), 1);
    }

    #[test]
    fn test_open_rejects_illegal_name() {
        let store = Arc::new(MemoryStore::new());
        let definition = CollectionDefinition::new("_hidden", CollectionType::Document);
        let err = Collection::open(definition, store, CollectionContext::default()).unwrap_err();
        assert_eq!(err.code(), "COLLDB_ILLEGAL_NAME");
    }

    #[test]
    fn test_open_rejects_too_old_version() {
        let store = Arc::new(MemoryStore::new());
        let definition = CollectionDefinition::from_value(&json!({"name": "c", "version": 4})).unwrap();
        let err = Collection::open(definition, store, CollectionContext::default()).unwrap_err();
        assert!(matches!(err, CollectionError::TooOldVersion { version: 4, .. }));
    }

    #[test]
    fn test_open_keeps_persisted_identity() {
        let store = Arc::new(MemoryStore::new());
        let definition = CollectionDefinition::from_value(&json!({
            "name": "c",
            "cid": "777",
            "planId": "700",
            "globallyUniqueId": "g-777",
            "status": 2,
            "waitForSync": true
        }))
        .unwrap();
        let collection = Collection::open(definition, store, CollectionContext::default()).unwrap();

        assert_eq!(collection.id(), 777);
        assert_eq!(collection.plan_id(), 700);
        assert_eq!(collection.guid(), "g-777");
        assert_eq!(collection.status_locked(), CollectionStatus::Unloaded);
        assert!(collection.wait_for_sync());
    }

    #[test]
    fn test_load_unload_cycle() {
        let (collection, _store, _) = create("c");
        collection.load().unwrap();
        assert_eq!(collection.status_locked(), CollectionStatus::Loaded);
        let version = collection.internal_version();

        collection.load().unwrap();
        assert_eq!(collection.internal_version(), version);

        collection.unload().unwrap();
        assert_eq!(collection.status_locked(), CollectionStatus::Unloaded);

        collection.load().unwrap();
        assert!(collection.internal_version() > version);
    }

    #[test]
    fn test_load_failure_marks_corrupted() {
        let (collection, store, _) = create("c");
        store.fail_points().arm(points::LOAD);

        assert!(collection.load().is_err());
        assert_eq!(collection.status_locked(), CollectionStatus::Corrupted);

        store.fail_points().disarm(points::LOAD);
        let err = collection.load().unwrap_err();
        assert_eq!(err.code(), "COLLDB_CORRUPTED_COLLECTION");
    }

    #[test]
    fn test_unload_failure_reverts_to_loaded() {
        let (collection, store, _) = create("c");
        collection.load().unwrap();
        store.fail_points().arm(points::UNLOAD);

        assert!(collection.unload().is_err());
        assert_eq!(collection.status_locked(), CollectionStatus::Loaded);
        assert!(!store.is_write_locked());
    }

    #[test]
    fn test_unload_times_out_while_write_locked() {
        let (collection, store, _) = create("c");
        collection.load().unwrap();
        store.lock_write(Duration::from_millis(10)).unwrap();

        let err = collection.unload().unwrap_err();
        assert_eq!(err.code(), "COLLDB_LOCK_TIMEOUT");
        assert_eq!(collection.status_locked(), CollectionStatus::Loaded);
        assert_eq!(collection.metrics().snapshot().lock_timeouts, 1);
        store.unlock_write();
    }

    #[test]
    fn test_rename_persists_and_bumps_version() {
        let (collection, store, tracker) = create("before");
        let version = collection.internal_version();

        collection.rename("after", false).unwrap();

        assert_eq!(collection.name(), "after");
        assert_eq!(store.persisted_definition().unwrap()["name"], json!("after"));
        assert_eq!(collection.internal_version(), version + 1);
        assert_eq!(tracker.events().last().map(String::as_str), Some("rename collection"));
    }

    #[test]
    fn test_rename_reverts_on_store_failure() {
        let (collection, store, tracker) = create("before");
        let version = collection.internal_version();
        let events = tracker.version();
        store.fail_points().arm(points::PERSIST_DEFINITION);

        let err = collection.rename("after", false).unwrap_err();

        assert_eq!(err.code(), "COLLDB_STORAGE_WRITE_FAILED");
        assert_eq!(collection.name(), "before");
        assert_eq!(collection.internal_version(), version);
        assert_eq!(tracker.version(), events);
    }

    #[test]
    fn test_rename_rejected_when_deleted_or_illegal() {
        let (collection, _store, _) = create("c");
        assert_eq!(collection.rename("1bad", false).unwrap_err().code(), "COLLDB_ILLEGAL_NAME");

        collection.drop_collection().unwrap();
        let err = collection.rename("other", false).unwrap_err();
        assert_eq!(err.code(), "COLLDB_DATA_SOURCE_NOT_FOUND");
        assert_eq!(collection.name(), "c");
    }

    #[test]
    fn test_drop_is_idempotent_and_survives_store_errors() {
        let (collection, store, tracker) = create("c");
        store.fail_points().arm(points::DESTROY);

        collection.drop_collection().unwrap();
        assert!(collection.deleted());
        assert!(!store.is_write_locked());
        let events = tracker.version();

        collection.drop_collection().unwrap();
        assert_eq!(tracker.version(), events);
        assert_eq!(collection.load().unwrap_err().code(), "COLLDB_DATA_SOURCE_NOT_FOUND");
    }

    #[test]
    fn test_drop_times_out_while_write_locked() {
        let (collection, store, _) = create("c");
        store.lock_write(Duration::from_millis(10)).unwrap();

        assert!(collection.drop_collection().is_err());
        assert!(!collection.deleted());
        store.unlock_write();
    }

    #[test]
    fn test_deferred_drop_runs_once_on_last_reference() {
        let (collection, _store, _) = create("c");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        collection.defer_drop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let shared = Arc::new(collection);
        let other = Arc::clone(&shared);
        drop(shared);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(other);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_fetch_status_fails_under_write_lock() {
        let (collection, _store, _) = create("c");
        assert_eq!(collection.try_fetch_status(), Some(CollectionStatus::NewBorn));

        collection.execute_while_status_write_locked(|_| {
            assert_eq!(collection.try_fetch_status(), None);
            assert!(collection.try_execute_while_status_locked(|s| s).is_none());
        });
        assert_eq!(collection.try_execute_while_status_locked(|s| s.code()), Some(1));
    }

    #[test]
    fn test_update_properties() {
        let (collection, store, tracker) = create("c");
        collection
            .update_properties(&json!({"waitForSync": true, "replicationFactor": 2, "note": "x"}), false)
            .unwrap();

        assert!(collection.wait_for_sync());
        assert_eq!(collection.sharding().replication_factor(), 2);
        let persisted = store.persisted_definition().unwrap();
        assert_eq!(persisted["waitForSync"], json!(true));
        assert_eq!(persisted["replicationFactor"], json!(2));
        assert_eq!(persisted["note"], json!("x"));
        assert_eq!(tracker.events().last().map(String::as_str), Some("change collection"));
    }

    #[test]
    fn test_update_properties_is_all_or_nothing() {
        let (collection, _store, _) = create("c");

        let err = collection
            .update_properties(&json!({"waitForSync": true, "replicationFactor": 0}), false)
            .unwrap_err();
        assert_eq!(err.code(), "COLLDB_BAD_PARAMETER");
        assert!(!collection.wait_for_sync());

        let err = collection
            .update_properties(&json!({"waitForSync": true, "engine": "other"}), false)
            .unwrap_err();
        assert_eq!(err.code(), "COLLDB_STORAGE_INVALID_PROPERTIES");
        assert!(!collection.wait_for_sync());

        let err = collection.update_properties(&json!({"waitForSync": "yes"}), false).unwrap_err();
        assert_eq!(err.code(), "COLLDB_BAD_PARAMETER");
    }

    #[test]
    fn test_update_properties_reverted_when_persist_fails() {
        let (collection, store, tracker) = create("c");
        let replication_factor = collection.sharding().replication_factor();
        store.fail_points().arm(points::PERSIST_DEFINITION);

        let err = collection
            .update_properties(&json!({"waitForSync": true, "replicationFactor": 2, "engine": "memory"}), false)
            .unwrap_err();
        assert!(err.code().starts_with("COLLDB_STORAGE"));
        assert!(!collection.wait_for_sync());
        assert_eq!(collection.sharding().replication_factor(), replication_factor);
        assert_ne!(tracker.events().last().map(String::as_str), Some("change collection"));

        store.fail_points().disarm(points::PERSIST_DEFINITION);
        collection.update_properties(&json!({"waitForSync": true}), false).unwrap();
        assert!(collection.wait_for_sync());
    }

    #[test]
    fn test_satellite_replication_factor_is_fixed() {
        let store = Arc::new(MemoryStore::new());
        let definition = CollectionDefinition::from_value(&json!({
            "name": "sat",
            "replicationFactor": SATELLITE
        }))
        .unwrap();
        let collection = Collection::create(definition, store, CollectionContext::default()).unwrap();

        collection
            .update_properties(&json!({"replicationFactor": SATELLITE}), false)
            .unwrap();
        let err = collection
            .update_properties(&json!({"replicationFactor": 2}), false)
            .unwrap_err();
        assert_eq!(err.code(), "COLLDB_FORBIDDEN");
    }

    #[test]
    fn test_distribute_shards_like_forbids_replication_change() {
        let context = CollectionContext::default();
        let open = |name: &str| {
            let definition = CollectionDefinition::new(name, CollectionType::Document);
            Collection::create(definition, Arc::new(MemoryStore::new()), context.clone()).unwrap()
        };
        let prototype = open("proto");
        let follower = open("follower");
        follower.set_distribute_shards_like(&prototype).unwrap();

        let err = follower
            .update_properties(&json!({"replicationFactor": 3}), false)
            .unwrap_err();
        assert_eq!(err.code(), "COLLDB_FORBIDDEN");
        assert!(follower.set_distribute_shards_like(&follower).is_err());
    }

    #[test]
    fn test_definition_ignore_and_inventory() {
        let (collection, _store, _) = create("c");
        let projected = collection.to_definition_ignore(INVENTORY_IGNORE_KEYS);
        assert!(projected.get("cid").is_none());
        assert!(projected.get("count").is_none());
        assert!(projected.get("statusString").is_none());
        assert_eq!(projected["name"], json!("c"));

        let entry = collection.inventory_entry(false, true, false).unwrap();
        assert_eq!(entry["isReady"], json!(true));
        assert_eq!(entry["allInSync"], json!(false));
        assert!(entry["indexes"].is_array());
        assert!(entry["parameters"].get("indexes").is_none());
    }

    #[test]
    fn test_inventory_skips_system_collections() {
        let store = Arc::new(MemoryStore::new());
        let definition = CollectionDefinition::from_value(&json!({"name": "_graphs", "isSystem": true})).unwrap();
        let collection = Collection::open(definition, store, CollectionContext::default()).unwrap();

        assert!(collection.inventory_entry(false, true, true).is_none());
        assert!(collection.inventory_entry(true, true, true).is_some());
    }

    #[test]
    fn test_index_estimates_setter() {
        let (collection, _store, _) = create("c");
        let mut estimates = Estimates::new();
        estimates.insert("primary".into(), 1.0);
        collection.set_index_estimates(estimates);
        assert_eq!(collection.index_estimates(true)["primary"], 1.0);
    }
}
