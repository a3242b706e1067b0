//! Reserved document attributes and identifier syntax
//!
//! Reserved attributes are managed by the engine, never by callers:
//! - `_key` - collection-unique, immutable
//! - `_id` - `<collection>/<key>`, immutable
//! - `_rev` - replaced on every write
//! - `_from` / `_to` - edge endpoints (edge collections only)

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::revision::RevisionId;

pub const KEY: &str = "_key";
pub const ID: &str = "_id";
pub const REV: &str = "_rev";
pub const FROM: &str = "_from";
pub const TO: &str = "_to";

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 254;

/// Maximum collection name length in bytes.
pub const MAX_NAME_LENGTH: usize = 256;

static KEY_PATTERN: OnceLock<Regex> = OnceLock::new();
static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn key_pattern() -> &'static Regex {
    KEY_PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_\-:.@()+,=;$!*'%]+$").expect("static key pattern")
    })
}

fn name_pattern() -> &'static Regex {
    NAME_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("static name pattern"))
}

/// Returns true for any of the five reserved attribute names.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with('_') && matches!(name, KEY | ID | REV | FROM | TO)
}

/// Returns true when `key` is a syntactically valid document key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LENGTH && key_pattern().is_match(key)
}

/// Returns true when `name` may appear as the collection part of an id.
pub fn is_valid_collection_part(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && name_pattern().is_match(name)
}

/// Validates a document id of the form `<collection>/<key>`.
pub fn is_valid_id(id: &str) -> bool {
    match id.split_once('/') {
        Some((collection, key)) => is_valid_collection_part(collection) && is_valid_key(key),
        None => false,
    }
}

/// Validates an edge endpoint value.
pub fn is_valid_edge_attribute(value: &Value) -> bool {
    match value.as_str() {
        Some(id) => id.len() >= 3 && is_valid_id(id),
        None => false,
    }
}

/// Builds a document id.
pub fn make_id(collection: &str, key: &str) -> String {
    format!("{}/{}", collection, key)
}

/// Extracts `_key` from an object.
pub fn extract_key(document: &Value) -> Option<&str> {
    document.get(KEY).and_then(Value::as_str)
}

/// Extracts and parses `_rev`; missing or unparseable values yield `None`.
pub fn extract_revision(document: &Value) -> Option<RevisionId> {
    document
        .get(REV)
        .and_then(Value::as_str)
        .and_then(RevisionId::parse)
}

/// Returns true when an update body carries nothing but reserved attributes.
///
/// For edge collections `_from`/`_to` count as changes, since they are the
/// only reserved attributes an update may legitimately rewrite.
pub fn is_effectively_empty(body: &Map<String, Value>, is_edge: bool) -> bool {
    body.keys().all(|name| {
        if is_edge && (name == FROM || name == TO) {
            return false;
        }
        is_reserved(name)
    })
}
