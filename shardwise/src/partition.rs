//! Rendezvous affinity function
//!
//! Maps key hashes to partitions and partitions to owner nodes the same way
//! cluster nodes do, so the client can compute a key's owners locally.
//!
//! # Key to partition
//!
//! ```text
//! partition count is a power of two:  (h ^ (h >>> 16)) & (count - 1)
//! otherwise:                          |h % count|
//! ```
//!
//! # Partition to nodes
//!
//! Highest random weight: every node gets a pseudo-random weight per
//! partition and the heaviest `1 + backups` nodes own it, heaviest first.
//! Removing a node only moves the partitions that node owned.

use crate::assignment::AffinityAssignment;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::key::AffinityKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound on partitions per cache accepted by the cluster
pub const MAX_PARTITIONS: u32 = 65_000;

/// Default partition count of a cache
pub const DEFAULT_PARTITIONS: u32 = 1024;

/// Affinity function selection in cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityFunctionKind {
    /// Rendezvous (highest random weight) hashing
    #[default]
    Rendezvous,
}

impl AffinityFunctionKind {
    /// Build the function for a partition count
    pub fn create(&self, partitions: u32) -> Result<RendezvousAffinity> {
        match self {
            AffinityFunctionKind::Rendezvous => RendezvousAffinity::new(partitions),
        }
    }
}

/// Rendezvous affinity function over a fixed partition count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendezvousAffinity {
    partitions: u32,
    mask: Option<u32>,
}

impl RendezvousAffinity {
    /// Create the function for `partitions` partitions
    pub fn new(partitions: u32) -> Result<Self> {
        if partitions == 0 || partitions > MAX_PARTITIONS {
            return Err(Error::InvalidPartitionCount(partitions));
        }

        let mask = partitions.is_power_of_two().then(|| partitions - 1);
        Ok(Self { partitions, mask })
    }

    /// Number of partitions
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Partition of a key hash
    pub fn partition(&self, key_hash: i32) -> u32 {
        match self.mask {
            Some(mask) => {
                let h = key_hash ^ ((key_hash as u32) >> 16) as i32;
                (h as u32) & mask
            }
            None => (key_hash % self.partitions as i32).unsigned_abs(),
        }
    }

    /// Partition of a key
    pub fn partition_of<K: AffinityKey + ?Sized>(&self, key: &K) -> u32 {
        self.partition(key.affinity_hash())
    }

    /// Assign every partition to `1 + backups` distinct nodes
    ///
    /// Duplicate endpoints are ignored. When fewer nodes than `1 + backups`
    /// exist every node owns every partition.
    pub fn assign(&self, nodes: &[Endpoint], backups: usize) -> Result<AffinityAssignment> {
        let mut seen = HashSet::new();
        let nodes: Vec<(&Endpoint, u32)> = nodes
            .iter()
            .filter(|ep| seen.insert(*ep))
            .map(|ep| (ep, node_hash(ep)))
            .collect();

        if nodes.is_empty() {
            return Err(Error::NoNodes(0));
        }

        let copies = backups.saturating_add(1).min(nodes.len());
        let partitions: Vec<Vec<Endpoint>> = (0..self.partitions)
            .map(|part| {
                let mut weighted: Vec<(u64, &Endpoint)> = nodes
                    .iter()
                    .map(|(ep, hash)| (weight(*hash, part), *ep))
                    .collect();
                // Heaviest first; endpoint order breaks ties deterministically
                weighted.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
                weighted
                    .into_iter()
                    .take(copies)
                    .map(|(_, ep)| ep.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        AffinityAssignment::new(partitions)
    }
}

fn node_hash(endpoint: &Endpoint) -> u32 {
    endpoint.to_string().affinity_hash() as u32
}

fn weight(node_hash: u32, partition: u32) -> u64 {
    fmix64(((node_hash as u64) << 32) | partition as u64)
}

/// MurmurHash3 64-bit finalizer
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint::new(format!("10.0.0.{}", i + 1), 10800))
            .collect()
    }

    #[test]
    fn test_invalid_partition_counts() {
        assert!(RendezvousAffinity::new(0).is_err());
        assert!(RendezvousAffinity::new(MAX_PARTITIONS + 1).is_err());
        assert!(RendezvousAffinity::new(MAX_PARTITIONS).is_ok());
    }

    #[test]
    fn test_masked_partition() {
        let f = RendezvousAffinity::new(4).unwrap();
        assert_eq!(f.partition_of("k1"), 2);
        assert_eq!(f.partition(0), 0);
        // High bits are folded into the mask
        assert_eq!(f.partition(0x0001_0000), 1);
        assert!(f.partition(i32::MIN) < 4);
        assert!(f.partition(-1) < 4);
    }

    #[test]
    fn test_modulo_partition() {
        let f = RendezvousAffinity::new(10).unwrap();
        assert_eq!(f.partition(25), 5);
        assert_eq!(f.partition(-25), 5);
        assert_eq!(f.partition(i32::MIN), 8);
        assert_eq!(f.partition(i32::MAX), 7);
    }

    #[test]
    fn test_default_partitions_use_mask() {
        let f = RendezvousAffinity::new(DEFAULT_PARTITIONS).unwrap();
        assert_eq!(f.partition(1023), 1023);
        assert_eq!(f.partition(1024), 0);
    }

    #[test]
    fn test_assign_owners_are_distinct() {
        let f = RendezvousAffinity::new(64).unwrap();
        let assignment = f.assign(&nodes(5), 2).unwrap();
        assert_eq!(assignment.partition_count(), 64);
        for part in 0..64 {
            let owners = assignment.endpoints(part);
            assert_eq!(owners.len(), 3);
            let unique: HashSet<_> = owners.iter().collect();
            assert_eq!(unique.len(), 3);
        }
    }

    #[test]
    fn test_assign_caps_copies_at_node_count() {
        let f = RendezvousAffinity::new(8).unwrap();
        let assignment = f.assign(&nodes(2), 5).unwrap();
        for part in 0..8 {
            assert_eq!(assignment.endpoints(part).len(), 2);
        }
    }

    #[test]
    fn test_assign_ignores_node_order_and_duplicates() {
        let f = RendezvousAffinity::new(32).unwrap();
        let mut shuffled = nodes(4);
        shuffled.reverse();
        shuffled.push(shuffled[0].clone());
        assert_eq!(
            f.assign(&nodes(4), 1).unwrap(),
            f.assign(&shuffled, 1).unwrap()
        );
    }

    #[test]
    fn test_assign_requires_nodes() {
        let f = RendezvousAffinity::new(8).unwrap();
        assert_eq!(f.assign(&[], 1).unwrap_err(), Error::NoNodes(0));
    }

    #[test]
    fn test_function_kind_from_config() {
        let f = AffinityFunctionKind::default().create(16).unwrap();
        assert_eq!(f.partitions(), 16);
        assert!(AffinityFunctionKind::Rendezvous.create(0).is_err());
    }
}
