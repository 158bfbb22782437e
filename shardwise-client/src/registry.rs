//! Caches opened by one client
//!
//! Partition refreshes ask for every registered cache at once, so installing
//! the result keeps all of them routable. The registry also remembers the
//! last refresh made to look for unmapped caches, so operations on a cache
//! the cluster has no distribution for do not refetch on every call.

use parking_lot::{Mutex, RwLock};
use shardwise::TopologyVersion;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Outcome of the last refresh
#[derive(Debug, Clone, Copy)]
struct RefreshAttempt {
    /// Installed version after the attempt
    version: TopologyVersion,
    failed_at: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct CacheRegistry {
    cache_ids: RwLock<BTreeSet<i32>>,
    last_attempt: Mutex<Option<RefreshAttempt>>,
    retry_after: Duration,
}

impl CacheRegistry {
    pub(crate) fn new(retry_after: Duration) -> Self {
        Self {
            cache_ids: RwLock::new(BTreeSet::new()),
            last_attempt: Mutex::new(None),
            retry_after,
        }
    }

    /// Register a cache; a new id makes the next lookup miss refetch
    pub(crate) fn register(&self, cache_id: i32) {
        if self.cache_ids.write().insert(cache_id) {
            *self.last_attempt.lock() = None;
        }
    }

    /// Registered ids in ascending order
    pub(crate) fn cache_ids(&self) -> Vec<i32> {
        self.cache_ids.read().iter().copied().collect()
    }

    /// Record a refresh and the version installed afterwards
    pub(crate) fn record_attempt(&self, version: TopologyVersion, success: bool) {
        *self.last_attempt.lock() = Some(RefreshAttempt {
            version,
            failed_at: (!success).then(Instant::now),
        });
    }

    /// Whether a cache missing from the distribution at `version` is worth a
    /// refresh
    ///
    /// Yes if nothing was tried since the last install or registration, or
    /// the last try failed at least `retry_after` ago.
    pub(crate) fn should_refresh(&self, version: TopologyVersion) -> bool {
        match *self.last_attempt.lock() {
            None => true,
            Some(attempt) if attempt.version != version => true,
            Some(RefreshAttempt {
                failed_at: Some(at),
                ..
            }) => at.elapsed() >= self.retry_after,
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let registry = CacheRegistry::new(Duration::from_secs(1));
        registry.register(9);
        registry.register(3);
        registry.register(9);
        assert_eq!(registry.cache_ids(), vec![3, 9]);
    }

    #[test]
    fn test_successful_attempt_suppresses_refresh_until_version_moves() {
        let registry = CacheRegistry::new(Duration::from_secs(60));
        let v1 = TopologyVersion::new(1, 0);
        assert!(registry.should_refresh(v1));

        registry.record_attempt(v1, true);
        assert!(!registry.should_refresh(v1));
        assert!(registry.should_refresh(TopologyVersion::new(2, 0)));
    }

    #[test]
    fn test_failed_attempt_backs_off() {
        let registry = CacheRegistry::new(Duration::from_secs(60));
        let v = TopologyVersion::default();
        registry.record_attempt(v, false);
        assert!(!registry.should_refresh(v));

        let eager = CacheRegistry::new(Duration::ZERO);
        eager.record_attempt(v, false);
        assert!(eager.should_refresh(v));
    }

    #[test]
    fn test_new_cache_clears_attempt() {
        let registry = CacheRegistry::new(Duration::from_secs(60));
        let v = TopologyVersion::new(1, 0);
        registry.register(1);
        registry.record_attempt(v, true);
        assert!(!registry.should_refresh(v));

        registry.register(1);
        assert!(!registry.should_refresh(v));
        registry.register(2);
        assert!(registry.should_refresh(v));
    }
}
