//! Document mutations
//!
//! `DocumentPipeline` turns logical insert, update, replace and remove
//! requests into revision-stamped writes against a collection's physical
//! store, enforcing:
//! - optimistic concurrency on `_rev`
//! - valid `_from`/`_to` on edge collections
//! - immutable shard keys on DB-server shards
//! - one writer at a time through the collection write lock

mod errors;
mod options;
mod pipeline;

pub use errors::{ErrorKind, MutationError, MutationResult};
pub use options::{OperationOptions, OperationResult};
pub use pipeline::{DocumentPipeline, WriteLockGuard};
