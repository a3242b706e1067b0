//! Version tracking for external cache invalidation

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Receives a notification after every structural change to a collection.
///
/// Notifications are fire-and-forget: implementations must not fail and
/// should return quickly.
pub trait VersionTracker: Send + Sync {
    fn track(&self, event: &str);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVersionTracker;

impl VersionTracker for NoopVersionTracker {
    fn track(&self, _event: &str) {}
}

/// Counts notifications and remembers their names.
#[derive(Debug, Default)]
pub struct CountingVersionTracker {
    version: AtomicU64,
    events: Mutex<Vec<String>>,
}

impl CountingVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications received so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl VersionTracker for CountingVersionTracker {
    fn track(&self, event: &str) {
        self.events.lock().push(event.to_string());
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_tracker() {
        let tracker = CountingVersionTracker::new();
        tracker.track("rename collection");
        tracker.track("change collection");
        assert_eq!(tracker.version(), 2);
        assert_eq!(tracker.events(), vec!["rename collection", "change collection"]);
    }
}
