//! Partition-to-node assignment for caches
//!
//! An [`AffinityAssignment`] is built once from a topology refresh and then
//! shared by reference; it is never mutated. Caches with the same partition
//! count and node set share one assignment through an
//! [`AffinityAwarenessGroup`].

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Ordered owners of every partition of a cache (primary first, backups after)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityAssignment {
    partitions: Vec<Vec<Endpoint>>,
}

impl AffinityAssignment {
    /// Create an assignment from per-partition owner lists
    ///
    /// The outer vector is indexed by partition number. An inner list may be
    /// empty while its partition has no live owner.
    pub fn new(partitions: Vec<Vec<Endpoint>>) -> Result<Self> {
        if partitions.is_empty() || partitions.len() > u32::MAX as usize {
            return Err(Error::InvalidPartitionCount(partitions.len() as u32));
        }
        Ok(Self { partitions })
    }

    /// Number of partitions
    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Owners of a partition, primary first
    ///
    /// # Panics
    ///
    /// Panics if `partition` is not below [`partition_count`](Self::partition_count).
    pub fn endpoints(&self, partition: u32) -> &[Endpoint] {
        assert!(
            (partition as usize) < self.partitions.len(),
            "partition {} out of range (partition count {})",
            partition,
            self.partitions.len()
        );
        &self.partitions[partition as usize]
    }

    /// All owner lists, indexed by partition
    pub fn partitions(&self) -> &[Vec<Endpoint>] {
        &self.partitions
    }

    /// Primary owner of a partition, if it has one
    pub fn primary(&self, partition: u32) -> Option<&Endpoint> {
        self.endpoints(partition).first()
    }

    /// Distinct primary owners in order of first appearance
    pub fn primaries(&self) -> Vec<Endpoint> {
        distinct(self.partitions.iter().filter_map(|owners| owners.first()))
    }

    /// Distinct owners in any role in order of first appearance
    pub fn owners(&self) -> Vec<Endpoint> {
        distinct(self.partitions.iter().flatten())
    }

    /// Number of partitions whose primary is `endpoint`
    pub fn primary_count(&self, endpoint: &Endpoint) -> usize {
        self.partitions
            .iter()
            .filter(|owners| owners.first() == Some(endpoint))
            .count()
    }
}

fn distinct<'a>(endpoints: impl Iterator<Item = &'a Endpoint>) -> Vec<Endpoint> {
    let mut seen = std::collections::HashSet::new();
    endpoints
        .filter(|ep| seen.insert(*ep))
        .cloned()
        .collect()
}

/// Set of caches sharing one assignment
#[derive(Debug, Clone)]
pub struct AffinityAwarenessGroup {
    pub cache_ids: Vec<i32>,
    pub assignment: Arc<AffinityAssignment>,
}

impl AffinityAwarenessGroup {
    /// Create a new group
    pub fn new(cache_ids: impl Into<Vec<i32>>, assignment: Arc<AffinityAssignment>) -> Self {
        Self {
            cache_ids: cache_ids.into(),
            assignment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(name: &str) -> Endpoint {
        Endpoint::new(name, 10800)
    }

    fn sample() -> AffinityAssignment {
        AffinityAssignment::new(vec![
            vec![ep("a"), ep("b")],
            vec![ep("b"), ep("c")],
            vec![ep("b"), ep("a")],
            vec![],
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_partitions() {
        assert_eq!(
            AffinityAssignment::new(Vec::new()).unwrap_err(),
            Error::InvalidPartitionCount(0)
        );
    }

    #[test]
    fn test_lookup() {
        let assignment = sample();
        assert_eq!(assignment.partition_count(), 4);
        assert_eq!(assignment.endpoints(2), &[ep("b"), ep("a")]);
        assert_eq!(assignment.primary(1), Some(&ep("b")));
        assert_eq!(assignment.primary(3), None);
        assert!(assignment.endpoints(3).is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        sample().endpoints(4);
    }

    #[test]
    fn test_primaries_and_owners() {
        let assignment = sample();
        assert_eq!(assignment.primaries(), vec![ep("a"), ep("b")]);
        assert_eq!(assignment.owners(), vec![ep("a"), ep("b"), ep("c")]);
        assert_eq!(assignment.primary_count(&ep("b")), 2);
        assert_eq!(assignment.primary_count(&ep("c")), 0);
    }
}
