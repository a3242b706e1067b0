//! Fail point injection for failure-path testing
//!
//! A fail point is a named location in a store implementation. When armed,
//! the store returns an injected `StorageError` at that location instead of
//! doing its work.
//!
//! Points can be armed per store instance (tests) or process-wide through
//! the `COLLDB_FAIL_POINT` environment variable.
//!
//! ```ignore
//! let store = MemoryStore::new();
//! store.fail_points().arm(points::PERSIST_DEFINITION);
//! ```

use std::collections::HashSet;
use std::sync::OnceLock;

use parking_lot::Mutex;

use super::errors::{StorageError, StorageResult};

/// Cache the environment fail point to avoid repeated env var lookups
static ENV_FAIL_POINT: OnceLock<Option<String>> = OnceLock::new();

fn env_fail_point() -> Option<&'static str> {
    ENV_FAIL_POINT
        .get_or_init(|| std::env::var("COLLDB_FAIL_POINT").ok())
        .as_deref()
}

/// Armed fail points of one store.
#[derive(Debug, Default)]
pub struct FailPoints {
    armed: Mutex<HashSet<String>>,
}

impl FailPoints {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a fail point until it is disarmed.
    pub fn arm(&self, name: &str) {
        self.armed.lock().insert(name.to_string());
    }

    /// Disarms a fail point.
    pub fn disarm(&self, name: &str) {
        self.armed.lock().remove(name);
    }

    /// Returns true when `name` is armed here or through the environment.
    pub fn is_armed(&self, name: &str) -> bool {
        env_fail_point() == Some(name) || self.armed.lock().contains(name)
    }

    /// Fails with an injected error when `name` is armed.
    pub fn check(&self, name: &str) -> StorageResult<()> {
        if self.is_armed(name) {
            return Err(StorageError::injected(name));
        }
        Ok(())
    }
}

/// All defined fail point names
pub mod points {
    pub const BEFORE_WRITE: &str = "store_before_write";
    /// Record bytes are in the file but the write has not completed.
    pub const AFTER_APPEND: &str = "store_after_append";
    pub const PERSIST_DEFINITION: &str = "store_persist_definition";
    pub const UPDATE_PROPERTIES: &str = "store_update_properties";
    pub const LOAD: &str = "store_load";
    pub const UNLOAD: &str = "store_unload";
    pub const CLOSE: &str = "store_close";
    pub const DESTROY: &str = "store_destroy";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_point_passes() {
        let fail_points = FailPoints::new();
        assert!(fail_points.check(points::BEFORE_WRITE).is_ok());
    }

    #[test]
    fn test_armed_point_fails_until_disarmed() {
        let fail_points = FailPoints::new();
        fail_points.arm(points::DESTROY);

        let err = fail_points.check(points::DESTROY).unwrap_err();
        assert_eq!(err.details(), Some("fail_point: store_destroy"));

        fail_points.disarm(points::DESTROY);
        assert!(fail_points.check(points::DESTROY).is_ok());
    }
}
