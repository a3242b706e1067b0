//! Collection handles
//!
//! This module provides:
//! - `Collection` - the runtime handle of one collection
//! - `CollectionStatus` - the load/unload/drop state machine
//! - `CollectionDefinition` - the persisted definition
//! - key generators, sharding descriptor and shard-key checks
//! - version tracking and cached index estimates

pub mod definition;
mod errors;
pub mod estimates;
mod handle;
pub mod key_generator;
pub mod sharding;
mod status;
pub mod tracker;

pub use definition::{CollectionDefinition, CollectionType};
pub use errors::{CollectionError, CollectionResult, KeyError};
pub use estimates::{Estimates, IndexEstimateSource};
pub use handle::{Collection, CollectionContext, DEFAULT_LOCK_TIMEOUT, INVENTORY_IGNORE_KEYS};
pub use key_generator::{KeyGenerator, KeyGeneratorType, KeyOptions};
pub use sharding::{shard_keys_changed, HashShardResolver, ShardResolver, ShardingInfo};
pub use status::CollectionStatus;
pub use tracker::{CountingVersionTracker, NoopVersionTracker, VersionTracker};
