//! Engine metrics
//!
//! Counters only, monotonically increasing, reset on process start. One
//! registry may be shared by many collections.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters use Relaxed ordering; exact cross-counter consistency is not
/// needed.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inserts: AtomicU64,
    updates: AtomicU64,
    replaces: AtomicU64,
    removes: AtomicU64,
    noop_updates: AtomicU64,
    conflicts: AtomicU64,
    lock_timeouts: AtomicU64,
    rejected: AtomicU64,
    checksums: AtomicU64,
    structural_changes: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_inserts(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replaces(&self) {
        self.replaces.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_removes(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    /// Update requests that carried no change
    pub fn increment_noop_updates(&self) {
        self.noop_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conflicts(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lock_timeouts(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Mutations rejected by validation (bad body, edge, shard key)
    pub fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checksums(&self) {
        self.checksums.fetch_add(1, Ordering::Relaxed);
    }

    /// Renames, property changes, loads, unloads and drops
    pub fn increment_structural_changes(&self) {
        self.structural_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Total successful document writes
    pub fn writes(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
            + self.updates.load(Ordering::Relaxed)
            + self.replaces.load(Ordering::Relaxed)
            + self.removes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            replaces: self.replaces.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            noop_updates: self.noop_updates.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            checksums: self.checksums.load(Ordering::Relaxed),
            structural_changes: self.structural_changes.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as a single JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub inserts: u64,
    pub updates: u64,
    pub replaces: u64,
    pub removes: u64,
    pub noop_updates: u64,
    pub conflicts: u64,
    pub lock_timeouts: u64,
    pub rejected: u64,
    pub checksums: u64,
    pub structural_changes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_registry_is_zeroed() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.inserts, 0);
        assert_eq!(snapshot.conflicts, 0);
    }

    #[test]
    fn test_writes_sum_document_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_inserts();
        registry.increment_updates();
        registry.increment_replaces();
        registry.increment_removes();
        registry.increment_noop_updates();
        assert_eq!(registry.writes(), 4);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_lock_timeouts();
        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["lock_timeouts"], 1);
        assert_eq!(parsed["inserts"], 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..250 {
                        registry.increment_inserts();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.snapshot().inserts, 1000);
    }
}
