//! Affinity manager
//!
//! Sole authority on current partition ownership for one client. Holds a
//! single immutable [`AffinitySnapshot`] behind a lock that guards only the
//! `Arc` pointing at it:
//!
//! ```text
//! reader:  read lock -> clone Arc -> unlock -> look up cache
//! writer:  build new map (no lock) -> write lock -> compare version -> swap Arc -> unlock
//! ```
//!
//! A reader keeps whatever snapshot it cloned for as long as it needs it; a
//! concurrent install never changes that snapshot's contents.
//!
//! # Refresh signals
//!
//! [`AffinityManager::mark_stale`] records that a newer topology exists
//! without supplying its data. Until a full update at least that new arrives,
//! lookups return `None` so callers route without affinity, and
//! [`AffinityManager::needs_refresh`] tells them to fetch the new
//! distribution. [`AffinityManager::try_begin_refresh`] lets exactly one of
//! them do so.

use crate::assignment::{AffinityAssignment, AffinityAwarenessGroup};
use crate::version::TopologyVersion;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Cache id to assignment mapping shared between snapshots
pub type CacheAffinityMap = HashMap<i32, Arc<AffinityAssignment>>;

/// One consistent view of partition ownership
#[derive(Debug, Clone, Default)]
pub struct AffinitySnapshot {
    version: TopologyVersion,
    caches: Arc<CacheAffinityMap>,
    awaiting: Option<TopologyVersion>,
}

impl AffinitySnapshot {
    /// Topology version of the installed distribution
    pub fn version(&self) -> TopologyVersion {
        self.version
    }

    /// Newer topology announced but not yet fetched
    pub fn awaiting(&self) -> Option<TopologyVersion> {
        self.awaiting
    }

    /// Whether the distribution is known to be outdated
    pub fn is_stale(&self) -> bool {
        self.awaiting.is_some()
    }

    /// Assignment for a cache, ignoring staleness
    pub fn assignment(&self, cache_id: i32) -> Option<&Arc<AffinityAssignment>> {
        self.caches.get(&cache_id)
    }

    /// Number of caches with an assignment
    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }
}

/// Thread-safe holder of the current affinity snapshot
#[derive(Debug, Default)]
pub struct AffinityManager {
    current: RwLock<Arc<AffinitySnapshot>>,
    refreshing: AtomicBool,
}

impl AffinityManager {
    /// Create a manager with no assignments at version `0.0`
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<AffinitySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Version of the installed distribution
    pub fn version(&self) -> TopologyVersion {
        self.current.read().version
    }

    /// Whether a newer topology was announced and has not been fetched
    pub fn needs_refresh(&self) -> bool {
        self.current.read().is_stale()
    }

    /// Assignment to route a cache's keys with
    ///
    /// Returns `None` when the cache has no assignment or the distribution is
    /// stale; the caller then routes without affinity.
    pub fn affinity_assignment(&self, cache_id: i32) -> Option<Arc<AffinityAssignment>> {
        let snapshot = self.snapshot();
        if snapshot.is_stale() {
            return None;
        }
        snapshot.caches.get(&cache_id).cloned()
    }

    /// Install the distribution carried by `groups` at `version`
    ///
    /// Installs only if `version` is strictly newer than the installed one and
    /// returns whether it did. The previous mapping is replaced as a whole.
    pub fn update_affinity(
        &self,
        groups: &[AffinityAwarenessGroup],
        version: TopologyVersion,
    ) -> bool {
        // Build outside the lock; readers keep the old snapshot meanwhile
        let mut caches = CacheAffinityMap::new();
        for group in groups {
            for cache_id in &group.cache_ids {
                caches.insert(*cache_id, Arc::clone(&group.assignment));
            }
        }
        let cache_count = caches.len();
        let caches = Arc::new(caches);

        let mut current = self.current.write();
        if !version.is_newer_than(&current.version) {
            debug!(
                "Ignoring affinity update {}: current version is {}",
                version, current.version
            );
            return false;
        }

        let awaiting = current.awaiting.filter(|pending| pending.is_newer_than(&version));
        *current = Arc::new(AffinitySnapshot {
            version,
            caches,
            awaiting,
        });
        drop(current);

        info!(
            "Installed affinity version {} for {} caches",
            version, cache_count
        );
        true
    }

    /// Add assignments for caches the installed distribution does not map
    ///
    /// Applies only to data at exactly the installed version, as returned
    /// when a refresh asks about caches opened after the last install.
    /// Caches already mapped keep their assignment. Returns whether any cache
    /// was added.
    pub fn extend_affinity(
        &self,
        groups: &[AffinityAwarenessGroup],
        version: TopologyVersion,
    ) -> bool {
        let mut current = self.current.write();
        if version != current.version {
            return false;
        }

        let mut caches = CacheAffinityMap::clone(&current.caches);
        let mut added = 0;
        for group in groups {
            for cache_id in &group.cache_ids {
                if let Entry::Vacant(slot) = caches.entry(*cache_id) {
                    slot.insert(Arc::clone(&group.assignment));
                    added += 1;
                }
            }
        }
        if added == 0 {
            return false;
        }

        let next = Arc::new(AffinitySnapshot {
            version,
            caches: Arc::new(caches),
            awaiting: current.awaiting,
        });
        *current = next;
        drop(current);

        info!("Extended affinity version {} with {} caches", version, added);
        true
    }

    /// Record that the topology moved to `version` without new data
    ///
    /// Keeps the installed mapping but stops serving it until a full update
    /// at least as new as `version` arrives. Returns whether the mark was
    /// recorded; versions not newer than what is installed or already
    /// announced are ignored.
    pub fn mark_stale(&self, version: TopologyVersion) -> bool {
        let mut current = self.current.write();
        let known = current.awaiting.unwrap_or(current.version);
        if !version.is_newer_than(&known) {
            return false;
        }

        let next = Arc::new(AffinitySnapshot {
            version: current.version,
            caches: Arc::clone(&current.caches),
            awaiting: Some(version),
        });
        *current = next;
        drop(current);

        debug!("Affinity marked stale: topology moved to {}", version);
        true
    }

    /// Claim the right to refetch a stale distribution
    ///
    /// Returns `None` if another caller holds it. The claim ends when the
    /// guard is dropped.
    pub fn try_begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard { manager: self })
    }
}

/// Exclusive claim on a pending refresh
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    manager: &'a AffinityManager,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.manager.refreshing.store(false, Ordering::Release);
    }
}
