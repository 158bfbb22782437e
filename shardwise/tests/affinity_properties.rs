//! Property and concurrency tests for the affinity core.

use proptest::prelude::*;
use shardwise::{
    AffinityAssignment, AffinityAwarenessGroup, AffinityManager, Endpoint, RendezvousAffinity,
    TopologyVersion,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn nodes(n: usize) -> Vec<Endpoint> {
    (0..n)
        .map(|i| Endpoint::new(format!("node-{}.cluster.local", i), 10800))
        .collect()
}

/// Assignment whose every partition is owned by the node named after `major`,
/// so a reader can tell from the contents which version it was built for.
fn tagged_group(cache_ids: &[i32], major: u64, partitions: usize) -> AffinityAwarenessGroup {
    let owner = Endpoint::new(format!("v{}", major), 10800);
    let assignment = AffinityAssignment::new(vec![vec![owner]; partitions]).unwrap();
    AffinityAwarenessGroup::new(cache_ids.to_vec(), Arc::new(assignment))
}

// ---------------------------------------------------------------------------
// Minimal disruption
// ---------------------------------------------------------------------------

#[test]
fn test_removing_node_moves_about_one_nth_of_primaries() {
    let function = RendezvousAffinity::new(1024).unwrap();

    for n in [4usize, 8, 16] {
        let all = nodes(n);
        let before = function.assign(&all, 1).unwrap();

        let removed = all[n / 2].clone();
        let remaining: Vec<Endpoint> = all.iter().filter(|ep| **ep != removed).cloned().collect();
        let after = function.assign(&remaining, 1).unwrap();

        let moved = (0..1024)
            .filter(|part| before.primary(*part) != after.primary(*part))
            .count();

        // Only partitions the removed node was primary for may move
        assert_eq!(moved, before.primary_count(&removed));

        let fraction = moved as f64 / 1024.0;
        let expected = 1.0 / n as f64;
        assert!(
            fraction > expected * 0.5 && fraction < expected * 1.5,
            "n={} moved {:.3}, expected about {:.3}",
            n,
            fraction,
            expected
        );
    }
}

#[test]
fn test_keys_spread_across_nodes() {
    let function = RendezvousAffinity::new(1024).unwrap();
    let all = nodes(4);
    let assignment = function.assign(&all, 0).unwrap();

    for node in &all {
        let owned = assignment.primary_count(node);
        assert!(owned > 150 && owned < 370, "{} owns {}", node, owned);
    }
}

// ---------------------------------------------------------------------------
// Race freedom
// ---------------------------------------------------------------------------

#[test]
fn test_readers_never_observe_partial_snapshot() {
    const CACHES: [i32; 3] = [11, 22, 33];
    const VERSIONS: u64 = 200;

    let manager = Arc::new(AffinityManager::new());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_seen = 0u64;
                while !done.load(Ordering::Acquire) {
                    let snapshot = manager.snapshot();
                    let major = snapshot.version().major;
                    assert!(major >= last_seen, "version went backwards");
                    last_seen = major;

                    if major == 0 {
                        assert_eq!(snapshot.cache_count(), 0);
                        continue;
                    }

                    // Every cache in one snapshot belongs to the same version
                    let expected = Endpoint::new(format!("v{}", major), 10800);
                    for cache_id in CACHES {
                        let assignment = snapshot.assignment(cache_id).expect("cache missing");
                        assert_eq!(assignment.partition_count(), 8);
                        for part in 0..8 {
                            assert_eq!(assignment.primary(part), Some(&expected));
                        }
                    }
                }
            })
        })
        .collect();

    let writer = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            for major in 1..=VERSIONS {
                let groups = vec![
                    tagged_group(&CACHES[..2], major, 8),
                    tagged_group(&CACHES[2..], major, 8),
                ];
                assert!(manager.update_affinity(&groups, TopologyVersion::new(major, 0)));
                // A stale writer loses silently
                assert!(!manager.update_affinity(
                    &[tagged_group(&CACHES, major - 1, 8)],
                    TopologyVersion::new(major - 1, 0)
                ));
            }
        })
    };

    writer.join().unwrap();
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(manager.version(), TopologyVersion::new(VERSIONS, 0));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_partition_is_deterministic_and_in_range(hash in any::<i32>(), parts in 1u32..=65_000) {
        let function = RendezvousAffinity::new(parts).unwrap();
        let first = function.partition(hash);
        prop_assert!(first < parts);
        prop_assert_eq!(first, function.partition(hash));
        prop_assert_eq!(first, RendezvousAffinity::new(parts).unwrap().partition(hash));
    }

    #[test]
    fn prop_same_key_same_endpoints(key in ".{0,32}", n in 1usize..8, backups in 0usize..3) {
        let function = RendezvousAffinity::new(64).unwrap();
        let first = function.assign(&nodes(n), backups).unwrap();
        let second = function.assign(&nodes(n), backups).unwrap();

        let part = function.partition_of(key.as_str());
        prop_assert_eq!(first.endpoints(part), second.endpoints(part));
        prop_assert!(!first.endpoints(part).is_empty());
    }

    #[test]
    fn prop_version_is_monotonic(updates in proptest::collection::vec((0u64..20, 0u32..4), 1..40)) {
        let manager = AffinityManager::new();
        let mut max = TopologyVersion::default();

        for (major, minor) in updates {
            let version = TopologyVersion::new(major, minor);
            let installed = manager.update_affinity(&[tagged_group(&[1], major, 2)], version);
            prop_assert_eq!(installed, version > max);
            if installed {
                max = version;
            }
            prop_assert_eq!(manager.version(), max);
        }
    }

    #[test]
    fn prop_absent_cache_is_none(cache_id in any::<i32>()) {
        let manager = AffinityManager::new();
        manager.update_affinity(&[tagged_group(&[1, 2, 3], 1, 4)], TopologyVersion::new(1, 0));
        prop_assume!(![1, 2, 3].contains(&cache_id));
        prop_assert!(manager.affinity_assignment(cache_id).is_none());
    }
}
