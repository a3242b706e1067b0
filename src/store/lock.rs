//! Exclusive per-collection write lock with a bounded wait.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::errors::{StorageError, StorageResult};

/// Serializes writers of one collection.
///
/// Unlike a guard-based mutex, acquisition and release are separate calls so
/// that a caller may take the lock in one operation and release it in another
/// (operations flagged as "already locked" rely on this).
#[derive(Debug, Default)]
pub struct CollectionWriteLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl CollectionWriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits at most `timeout` for the lock. A zero timeout tries once.
    pub fn lock_for(&self, timeout: Duration) -> StorageResult<()> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();
        while *held {
            if self.released.wait_until(&mut held, deadline).timed_out() && *held {
                return Err(StorageError::lock_timeout(timeout));
            }
        }
        *held = true;
        Ok(())
    }

    /// Releases the lock and wakes one waiter.
    pub fn unlock(&self) {
        let mut held = self.held.lock();
        *held = false;
        drop(held);
        self.released.notify_one();
    }

    pub fn is_locked(&self) -> bool {
        *self.held.lock()
    }
}
