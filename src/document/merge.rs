//! Construction of the body to persist for insert, update and replace
//!
//! Every builder emits the reserved attributes first, in the order
//! `_key`, `_id`, [`_from`, `_to`], `_rev`, followed by the regular
//! attributes. The order carries no meaning but is stable, so downstream
//! hashing and replica comparison see identical bytes for identical input.
//!
//! Update policy for an attribute present in the new body with value `V`:
//!
//! | merge_objects | both objects | effect                                  |
//! |---------------|--------------|-----------------------------------------|
//! | false         | -            | overwrite; null drops it unless keep_null |
//! | true          | yes          | deep merge; inner nulls drop unless keep_null |
//! | true          | no           | overwrite, same null rule               |

use serde_json::{Map, Value};

use super::attributes::{self, FROM, ID, KEY, REV, TO};
use super::errors::{DocumentError, DocumentResult};
use crate::revision::{HybridLogicalClock, RevisionId, RevisionSource};

/// Default bound on deep-merge recursion.
pub const DEFAULT_MAX_MERGE_DEPTH: usize = 64;

/// Options controlling update merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Recursively merge nested objects instead of overwriting them.
    pub merge_objects: bool,
    /// Keep explicit nulls instead of treating them as deletions.
    pub keep_null: bool,
    /// Take `_rev` verbatim from the new body when it parses.
    pub is_restore: bool,
    /// Maximum nesting depth for deep merges.
    pub max_depth: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            merge_objects: true,
            keep_null: true,
            is_restore: false,
            max_depth: DEFAULT_MAX_MERGE_DEPTH,
        }
    }
}

/// A body ready to be handed to the physical store.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltDocument {
    /// The complete document, reserved attributes first.
    pub body: Value,
    /// Revision stamped into `_rev`.
    pub revision: RevisionId,
    /// True when the revision came verbatim from the caller.
    pub restored: bool,
}

/// Picks the revision for a new version.
fn resolve_revision(
    new: &Map<String, Value>,
    is_restore: bool,
    revisions: &dyn RevisionSource,
) -> DocumentResult<(RevisionId, bool)> {
    if is_restore {
        if let Some(rev) = new.get(REV).and_then(Value::as_str).and_then(RevisionId::parse) {
            if !HybridLogicalClock::can_observe(rev) {
                return Err(DocumentError::RevisionOutOfRange(rev.encode()));
            }
            return Ok((rev, true));
        }
    }
    Ok((revisions.next_revision(), false))
}

fn required<'a>(old: &'a Map<String, Value>, name: &'static str) -> DocumentResult<&'a Value> {
    old.get(name)
        .ok_or(DocumentError::MissingReservedAttribute(name))
}

/// Resolves one edge endpoint: the new value when supplied, otherwise the
/// stored one. Either way the result must be a valid document id.
fn resolve_endpoint(
    new: &Map<String, Value>,
    old: Option<&Map<String, Value>>,
    name: &'static str,
) -> DocumentResult<Value> {
    let candidate = match new.get(name) {
        Some(value) => Some(value),
        None => old.and_then(|o| o.get(name)),
    };

    match candidate {
        Some(value) if attributes::is_valid_edge_attribute(value) => Ok(value.clone()),
        _ => Err(DocumentError::InvalidEdgeAttribute(name)),
    }
}

fn push_system_attributes(
    out: &mut Map<String, Value>,
    key: Value,
    id: Value,
    endpoints: Option<(Value, Value)>,
    revision: RevisionId,
) {
    out.insert(KEY.to_string(), key);
    out.insert(ID.to_string(), id);
    if let Some((from, to)) = endpoints {
        out.insert(FROM.to_string(), from);
        out.insert(TO.to_string(), to);
    }
    out.insert(REV.to_string(), Value::String(revision.encode()));
}

/// Deep-merges `new` into `old`.
///
/// Keys present in both are merged recursively when both values are
/// objects, otherwise the new value wins. Nulls from `new` remove the key
/// unless `keep_null` is set. `depth_remaining` bounds the recursion.
pub fn merge_objects(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    keep_null: bool,
    depth_remaining: usize,
) -> DocumentResult<Map<String, Value>> {
    if depth_remaining == 0 {
        return Err(DocumentError::NestingTooDeep);
    }

    let mut out = Map::with_capacity(old.len() + new.len());

    for (name, old_value) in old {
        match new.get(name) {
            None => {
                out.insert(name.clone(), old_value.clone());
            }
            Some(Value::Object(new_inner)) if old_value.is_object() => {
                let old_inner = old_value.as_object().ok_or(DocumentError::DocumentTypeInvalid)?;
                let merged = merge_objects(old_inner, new_inner, keep_null, depth_remaining - 1)?;
                out.insert(name.clone(), Value::Object(merged));
            }
            Some(Value::Null) if !keep_null => {}
            Some(new_value) => {
                out.insert(name.clone(), new_value.clone());
            }
        }
    }

    for (name, new_value) in new {
        if old.contains_key(name) || (new_value.is_null() && !keep_null) {
            continue;
        }
        out.insert(name.clone(), new_value.clone());
    }

    Ok(out)
}

/// Builds the body for a partial update.
///
/// `old` must carry `_key` and `_id`. Reserved attributes in `new` are
/// ignored except `_from`/`_to` on edge collections and `_rev` on restore.
pub fn merge_for_update(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    is_edge: bool,
    options: &MergeOptions,
    revisions: &dyn RevisionSource,
) -> DocumentResult<BuiltDocument> {
    let key = required(old, KEY)?.clone();
    let id = required(old, ID)?.clone();

    let endpoints = if is_edge {
        Some((
            resolve_endpoint(new, Some(old), FROM)?,
            resolve_endpoint(new, Some(old), TO)?,
        ))
    } else {
        None
    };

    let (revision, restored) = resolve_revision(new, options.is_restore, revisions)?;

    let mut out = Map::with_capacity(old.len() + new.len());
    push_system_attributes(&mut out, key, id, endpoints, revision);

    for (name, old_value) in old {
        if attributes::is_reserved(name) {
            continue;
        }

        match new.get(name) {
            None => {
                out.insert(name.clone(), old_value.clone());
            }
            Some(Value::Object(new_inner)) if options.merge_objects && old_value.is_object() => {
                let old_inner = old_value.as_object().ok_or(DocumentError::DocumentTypeInvalid)?;
                let merged =
                    merge_objects(old_inner, new_inner, options.keep_null, options.max_depth)?;
                out.insert(name.clone(), Value::Object(merged));
            }
            Some(Value::Null) if !options.keep_null => {}
            Some(new_value) => {
                out.insert(name.clone(), new_value.clone());
            }
        }
    }

    for (name, new_value) in new {
        if attributes::is_reserved(name) || old.contains_key(name) {
            continue;
        }
        if new_value.is_null() && !options.keep_null {
            continue;
        }
        out.insert(name.clone(), new_value.clone());
    }

    Ok(BuiltDocument {
        body: Value::Object(out),
        revision,
        restored,
    })
}

/// Builds the body for a full replace.
///
/// `_key` and `_id` come from the stored version; every regular attribute
/// comes from `new` verbatim. Edge endpoints missing from `new` are
/// inherited from the stored version.
pub fn new_object_for_replace(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    is_edge: bool,
    is_restore: bool,
    revisions: &dyn RevisionSource,
) -> DocumentResult<BuiltDocument> {
    let key = required(old, KEY)?.clone();
    let id = required(old, ID)?.clone();

    let endpoints = if is_edge {
        Some((
            resolve_endpoint(new, Some(old), FROM)?,
            resolve_endpoint(new, Some(old), TO)?,
        ))
    } else {
        None
    };

    let (revision, restored) = resolve_revision(new, is_restore, revisions)?;

    let mut out = Map::with_capacity(new.len() + 3);
    push_system_attributes(&mut out, key, id, endpoints, revision);
    copy_regular_attributes(new, &mut out);

    Ok(BuiltDocument {
        body: Value::Object(out),
        revision,
        restored,
    })
}

/// Builds the body for an insert under an already validated key.
pub fn new_object_for_insert(
    new: &Map<String, Value>,
    key: &str,
    id: &str,
    is_edge: bool,
    is_restore: bool,
    revisions: &dyn RevisionSource,
) -> DocumentResult<BuiltDocument> {
    let endpoints = if is_edge {
        Some((
            resolve_endpoint(new, None, FROM)?,
            resolve_endpoint(new, None, TO)?,
        ))
    } else {
        None
    };

    let (revision, restored) = resolve_revision(new, is_restore, revisions)?;

    let mut out = Map::with_capacity(new.len() + 3);
    push_system_attributes(
        &mut out,
        Value::String(key.to_string()),
        Value::String(id.to_string()),
        endpoints,
        revision,
    );
    copy_regular_attributes(new, &mut out);

    Ok(BuiltDocument {
        body: Value::Object(out),
        revision,
        restored,
    })
}

fn copy_regular_attributes(source: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (name, value) in source {
        if !attributes::is_reserved(name) {
            out.insert(name.clone(), value.clone());
        }
    }
}
