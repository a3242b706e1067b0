//! Cached index selectivity estimates
//!
//! Estimates are fetched from an external source and served from a cache
//! for a fixed time-to-live. Fresh entries are served under a plain read
//! lock. A stale cache is re-checked under an upgradable lock before the
//! fetch, so concurrent callers trigger a single fetch. An empty result is
//! cached like any other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

/// Index id -> selectivity estimate in `[0, 1]`.
pub type Estimates = HashMap<String, f64>;

/// Default time-to-live of cached estimates.
pub const DEFAULT_ESTIMATES_TTL: Duration = Duration::from_secs(60);

/// Supplies fresh selectivity estimates for one collection.
pub trait IndexEstimateSource: Send + Sync {
    fn fetch(&self) -> Estimates;
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

pub struct IndexEstimates {
    source: Option<Box<dyn IndexEstimateSource>>,
    cache: RwLock<Estimates>,
    /// Milliseconds since the epoch of the last refresh; zero means never.
    refreshed_at: AtomicU64,
    ttl: Duration,
}

impl std::fmt::Debug for IndexEstimates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEstimates")
            .field("cached", &self.cache.read().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl IndexEstimates {
    pub fn new(source: Option<Box<dyn IndexEstimateSource>>, ttl: Duration) -> Self {
        Self {
            source,
            cache: RwLock::new(Estimates::new()),
            refreshed_at: AtomicU64::new(0),
            ttl,
        }
    }

    fn is_stale(&self) -> bool {
        let refreshed_at = self.refreshed_at.load(Ordering::Acquire);
        if refreshed_at == 0 {
            return true;
        }
        let age = now_millis().saturating_sub(refreshed_at);
        age > self.ttl.as_millis() as u64
    }

    /// Returns the cached estimates, refreshing them first when stale unless
    /// `do_not_update` is set.
    pub fn get(&self, do_not_update: bool) -> Estimates {
        let Some(ref source) = self.source else {
            return self.cache.read().clone();
        };
        if do_not_update {
            return self.cache.read().clone();
        }

        {
            let cache = self.cache.read();
            if !self.is_stale() {
                return cache.clone();
            }
        }

        let cache = self.cache.upgradable_read();
        if !self.is_stale() {
            return cache.clone();
        }
        let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
        *cache = source.fetch();
        self.refreshed_at.store(now_millis().max(1), Ordering::Release);
        cache.clone()
    }

    /// Replaces the cached estimates.
    pub fn set(&self, estimates: Estimates) {
        let mut cache = self.cache.write();
        *cache = estimates;
        self.refreshed_at.store(now_millis().max(1), Ordering::Release);
    }
}
