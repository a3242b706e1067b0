//! Per-operation options and results

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::hash::normalized_equal;
use crate::revision::RevisionId;
use crate::store::LocalDocumentId;

/// Options shared by insert, update, replace and remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationOptions {
    /// Skip the optimistic concurrency check against `_rev`.
    pub ignore_revs: bool,
    /// Deep-merge nested objects on update.
    pub merge_objects: bool,
    /// Keep explicit nulls instead of deleting the attribute.
    pub keep_null: bool,
    /// Take `_rev` verbatim from the input.
    pub is_restore: bool,
    pub return_new: bool,
    pub return_old: bool,
    pub wait_for_sync: bool,
    /// Write lock timeout in milliseconds; the engine default when unset.
    pub lock_timeout: Option<u64>,
    /// The caller already holds the collection write lock.
    pub already_locked: bool,
    /// The stored document must carry these attribute values, otherwise
    /// the operation fails as not found.
    pub pattern: Option<Value>,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            ignore_revs: true,
            merge_objects: true,
            keep_null: true,
            is_restore: false,
            return_new: false,
            return_old: false,
            wait_for_sync: false,
            lock_timeout: None,
            already_locked: false,
            pattern: None,
        }
    }
}

impl OperationOptions {
    /// Options enforcing the `_rev` check.
    pub fn checked() -> Self {
        Self {
            ignore_revs: false,
            ..Self::default()
        }
    }

    pub fn lock_timeout_or(&self, default: Duration) -> Duration {
        self.lock_timeout.map(Duration::from_millis).unwrap_or(default)
    }

    /// Returns true when `document` satisfies the configured pattern.
    pub fn matches_pattern(&self, document: &Value) -> bool {
        let Some(Value::Object(pattern)) = &self.pattern else {
            return true;
        };
        pattern.iter().all(|(name, expected)| {
            document
                .get(name)
                .is_some_and(|actual| normalized_equal(actual, expected))
        })
    }
}

/// Outcome of a successful document operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub key: String,
    pub id: String,
    /// Revision of the version written. For removals, the revision of the
    /// removed version.
    pub revision: RevisionId,
    /// Revision the operation replaced; `None` for inserts.
    pub previous_revision: Option<RevisionId>,
    /// Local id of the version now stored; `None` after a removal.
    pub local_id: Option<LocalDocumentId>,
    pub new: Option<Value>,
    pub old: Option<Value>,
    /// The update carried no change and nothing was written.
    pub unchanged: bool,
}

impl OperationResult {
    /// Client-facing form: `_key`, `_id`, `_rev`, `_oldRev` and the
    /// requested bodies.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("_key".into(), Value::from(self.key.clone()));
        out.insert("_id".into(), Value::from(self.id.clone()));
        out.insert("_rev".into(), Value::from(self.revision.encode()));
        if let Some(previous) = self.previous_revision {
            out.insert("_oldRev".into(), Value::from(previous.encode()));
        }
        if let Some(ref new) = self.new {
            out.insert("new".into(), new.clone());
        }
        if let Some(ref old) = self.old {
            out.insert("old".into(), old.clone());
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options: OperationOptions = serde_json::from_value(json!({})).unwrap();
        assert!(options.ignore_revs);
        assert!(options.merge_objects);
        assert!(options.keep_null);
        assert!(!options.is_restore);
        assert_eq!(options, OperationOptions::default());
    }

    #[test]
    fn test_camel_case_names() {
        let options: OperationOptions =
            serde_json::from_value(json!({"ignoreRevs": false, "keepNull": false, "lockTimeout": 25}))
                .unwrap();
        assert!(!options.ignore_revs);
        assert!(!options.keep_null);
        assert_eq!(options.lock_timeout_or(Duration::from_secs(1)), Duration::from_millis(25));
    }

    #[test]
    fn test_pattern_matching() {
        let doc = json!({"_key": "a", "n": 1, "s": "x"});
        let mut options = OperationOptions::default();
        assert!(options.matches_pattern(&doc));

        options.pattern = Some(json!({"n": 1.0}));
        assert!(options.matches_pattern(&doc));

        options.pattern = Some(json!({"n": 1, "missing": null}));
        assert!(!options.matches_pattern(&doc));
    }

    #[test]
    fn test_result_value() {
        let result = OperationResult {
            key: "a".into(),
            id: "c/a".into(),
            revision: RevisionId::new(3),
            previous_revision: Some(RevisionId::new(2)),
            local_id: Some(LocalDocumentId::new(9)),
            new: None,
            old: Some(json!({"_key": "a"})),
            unchanged: false,
        };
        let value = result.to_value();
        assert_eq!(value["_rev"], json!("B"));
        assert_eq!(value["_oldRev"], json!("A"));
        assert!(value.get("new").is_none());
        assert_eq!(value["old"]["_key"], json!("a"));
    }
}
