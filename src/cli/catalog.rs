//! On-disk collection catalog
//!
//! ```text
//! <data_dir>/collections/<id>/   one FileStore per collection
//! ```
//!
//! Collections are found by scanning the persisted definitions. Dropped
//! collections remove their directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collection::{Collection, CollectionContext, CollectionDefinition, NoopVersionTracker};
use crate::config::EngineConfig;
use crate::store::{FileStore, PhysicalStore};

use super::errors::{CliError, CliResult};

pub struct Catalog {
    root: PathBuf,
    context: CollectionContext,
}

impl Catalog {
    /// Creates the catalog directory for `config`.
    pub fn initialize(config: &EngineConfig) -> CliResult<()> {
        let root = config.collections_path();
        if root.exists() {
            return Err(CliError::already_initialized());
        }
        fs::create_dir_all(&root).map_err(|e| {
            CliError::config_error(format!("Failed to create directory {:?}: {}", root, e))
        })?;
        Ok(())
    }

    pub fn open(config: &EngineConfig) -> CliResult<Self> {
        let root = config.collections_path();
        if !root.is_dir() {
            return Err(CliError::not_initialized());
        }
        Ok(Self {
            root,
            context: config.context(Arc::new(NoopVersionTracker)),
        })
    }

    /// Persisted definitions with their directories, ordered by directory.
    fn entries(&self) -> CliResult<Vec<(PathBuf, CollectionDefinition)>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();

        let mut entries = Vec::new();
        for dir in dirs {
            let Some(value) = FileStore::read_definition(&dir)? else {
                continue;
            };
            let definition = CollectionDefinition::from_value(&value)?;
            if !definition.deleted {
                entries.push((dir, definition));
            }
        }
        Ok(entries)
    }

    fn restore(&self, dir: &Path, definition: CollectionDefinition) -> CliResult<Collection> {
        let store = FileStore::open(dir)?;
        // Revisions handed out by this process must sort after stored ones.
        self.context.clock.observe(store.revision());
        Ok(Collection::open(definition, Arc::new(store), self.context.clone())?)
    }

    pub fn contains(&self, name: &str) -> CliResult<bool> {
        Ok(self.entries()?.iter().any(|(_, d)| d.name == name))
    }

    /// Creates a collection in a fresh directory named after its id.
    pub fn create(&self, mut definition: CollectionDefinition) -> CliResult<Collection> {
        if self.contains(&definition.name)? {
            return Err(CliError::duplicate_name(&definition.name));
        }

        let id = self.context.clock.new_tick();
        definition.id = Some(id.to_string());
        let dir = self.root.join(id.to_string());
        let store = FileStore::open(&dir)?;

        match Collection::create(definition, Arc::new(store), self.context.clone()) {
            Ok(collection) => Ok(collection),
            Err(e) => {
                let _ = fs::remove_dir_all(&dir);
                Err(e.into())
            }
        }
    }

    pub fn open_collection(&self, name: &str) -> CliResult<Collection> {
        let (dir, definition) = self
            .entries()?
            .into_iter()
            .find(|(_, d)| d.name == name)
            .ok_or_else(|| CliError::unknown_collection(name))?;
        self.restore(&dir, definition)
    }

    /// All collections in the catalog.
    pub fn collections(&self) -> CliResult<Vec<Collection>> {
        self.entries()?
            .into_iter()
            .map(|(dir, definition)| self.restore(&dir, definition))
            .collect()
    }
}
