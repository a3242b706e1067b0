//! Collection checksums for replica comparison
//!
//! A checksum is the XOR of one hash per live document, so it does not
//! depend on the order the store yields documents in. Each document hash
//! covers:
//!
//! - the key, always
//! - the revision string, with `with_revisions`
//! - every attribute except `_key`, `_id` and `_rev`, with `with_data`
//!
//! Attribute values hash by normalized value, so `1` and `1.0` agree.

mod errors;

pub use errors::ChecksumError;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::collection::Collection;
use crate::document::attributes::{self, ID, KEY, REV};
use crate::document::hash::{hash_bytes, hash_str, normalized_hash};
use crate::observability::{log_event_with_fields, Event};
use crate::revision::RevisionId;

const KEY_SEED: u64 = 0;
const DATA_SEED: u64 = 0xdead_f054;
const LENGTH_MIX: u64 = 0x00f0_0ba4_4ba5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChecksumOptions {
    pub with_revisions: bool,
    pub with_data: bool,
}

/// Digest of a collection paired with its top revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionChecksum {
    pub checksum: u64,
    pub revision: RevisionId,
}

impl CollectionChecksum {
    /// `{"checksum": "<u64>", "revision": "<revision>"}`
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("checksum".into(), Value::from(self.checksum.to_string()));
        out.insert("revision".into(), Value::from(self.revision.encode()));
        Value::Object(out)
    }
}

fn data_hash(document: &Map<String, Value>) -> u64 {
    let length = document.len() as u64 ^ LENGTH_MIX;
    let mut seed = hash_bytes(&length.to_le_bytes(), DATA_SEED);
    for (name, value) in document {
        if name == KEY || name == ID || name == REV {
            continue;
        }
        seed ^= normalized_hash(value, hash_str(name, DATA_SEED));
    }
    seed
}

/// Hash of one document under `options`.
pub fn document_hash(document: &Value, options: ChecksumOptions) -> u64 {
    let key = attributes::extract_key(document).unwrap_or_default();
    let mut local = hash_str(key, KEY_SEED);

    if options.with_revisions {
        let revision = document.get(REV).and_then(Value::as_str).unwrap_or_default();
        local = local.wrapping_add(hash_str(revision, KEY_SEED));
    }
    if options.with_data {
        if let Some(members) = document.as_object() {
            local ^= data_hash(members);
        }
    }
    local
}

/// Full-scans `collection` and computes its checksum.
///
/// Runs under the shared status lock and takes no write lock.
pub fn compute(
    collection: &Collection,
    options: ChecksumOptions,
) -> Result<CollectionChecksum, ChecksumError> {
    let result = collection.execute_while_loaded(|| {
        let store = collection.store();
        let mut checksum = 0u64;
        let mut documents = 0u64;
        store.for_each(&mut |_, document| {
            checksum ^= document_hash(document, options);
            documents += 1;
            true
        })?;
        Ok::<_, ChecksumError>((
            CollectionChecksum {
                checksum,
                revision: store.revision(),
            },
            documents,
        ))
    });
    let (result, documents) = result?;

    collection.metrics().increment_checksums();
    let name = collection.name();
    log_event_with_fields(
        Event::ChecksumComputed,
        &[
            ("collection", name.as_str()),
            ("checksum", result.checksum.to_string().as_str()),
            ("documents", documents.to_string().as_str()),
        ],
    );
    Ok(result)
}

/// Compares a replica's reported checksum with the local one.
pub fn compare_checksums(local: &CollectionChecksum, reported: &Value) -> Result<(), ChecksumError> {
    let Some(actual) = reported.get("checksum").and_then(Value::as_str) else {
        return Err(ChecksumError::WrongChecksumFormat);
    };

    let expected = local.checksum.to_string();
    if actual != expected {
        log_event_with_fields(
            Event::ChecksumMismatch,
            &[("expected", expected.as_str()), ("actual", actual)],
        );
        return Err(ChecksumError::WrongChecksum {
            expected,
            actual: actual.to_string(),
        });
    }
    Ok(())
}
