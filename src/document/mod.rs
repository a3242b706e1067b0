//! Document model
//!
//! Documents are JSON objects whose reserved attributes (`_key`, `_id`,
//! `_rev`, and `_from`/`_to` on edges) are owned by the engine.
//!
//! This module provides:
//! - `attributes` - reserved names, key/id syntax, extraction helpers
//! - `merge` - pure construction of the body to persist
//! - `hash` - stable, type-normalized value hashing

pub mod attributes;
mod errors;
pub mod hash;
pub mod merge;

pub use errors::{DocumentError, DocumentResult};
pub use merge::{BuiltDocument, MergeOptions, DEFAULT_MAX_MERGE_DEPTH};
