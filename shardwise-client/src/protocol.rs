//! Cache request/response messages
//!
//! Requests and responses are `bincode`-encoded enums carried as opaque
//! bytes by the transport router. Keys carry the affinity hash computed by
//! the client next to their encoded form, so a node can check partition
//! ownership without decoding the key.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use shardwise::{AffinityAssignment, AffinityAwarenessGroup, Endpoint, TopologyVersion};
use std::sync::Arc;

/// Cache operation, used for metrics labels and error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Put,
    Get,
    ContainsKey,
    Size,
    RemoveAll,
    Clear,
    LocalPeek,
    Partitions,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Get => "get",
            Operation::ContainsKey => "contains_key",
            Operation::Size => "size",
            Operation::RemoveAll => "remove_all",
            Operation::Clear => "clear",
            Operation::LocalPeek => "local_peek",
            Operation::Partitions => "partitions",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which copies of entries a size request counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeekModes(u32);

impl PeekModes {
    pub const ALL: PeekModes = PeekModes(1);
    pub const NEAR: PeekModes = PeekModes(1 << 1);
    pub const PRIMARY: PeekModes = PeekModes(1 << 2);
    pub const BACKUP: PeekModes = PeekModes(1 << 3);
    pub const ONHEAP: PeekModes = PeekModes(1 << 4);
    pub const OFFHEAP: PeekModes = PeekModes(1 << 5);

    /// No explicit mode; nodes count primary entries
    pub const fn empty() -> Self {
        PeekModes(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: PeekModes) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether only primary copies are counted
    pub fn primary_only(&self) -> bool {
        self.0 == 0 || *self == PeekModes::PRIMARY
    }
}

impl std::ops::BitOr for PeekModes {
    type Output = PeekModes;

    fn bitor(self, rhs: PeekModes) -> PeekModes {
        PeekModes(self.0 | rhs.0)
    }
}

/// Encoded key with its affinity hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedKey {
    pub hash: i32,
    pub bytes: Vec<u8>,
}

/// Request sent to a cache node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheRequest {
    Put {
        cache_id: i32,
        key: EncodedKey,
        value: Vec<u8>,
        tx: Option<i32>,
    },
    Get {
        cache_id: i32,
        key: EncodedKey,
        tx: Option<i32>,
    },
    ContainsKey {
        cache_id: i32,
        key: EncodedKey,
        tx: Option<i32>,
    },
    Size {
        cache_id: i32,
        peek_modes: PeekModes,
        tx: Option<i32>,
    },
    RemoveAll {
        cache_id: i32,
        tx: Option<i32>,
    },
    Clear {
        cache_id: i32,
    },
    LocalPeek {
        cache_id: i32,
        key: EncodedKey,
    },
}

impl CacheRequest {
    pub fn operation(&self) -> Operation {
        match self {
            CacheRequest::Put { .. } => Operation::Put,
            CacheRequest::Get { .. } => Operation::Get,
            CacheRequest::ContainsKey { .. } => Operation::ContainsKey,
            CacheRequest::Size { .. } => Operation::Size,
            CacheRequest::RemoveAll { .. } => Operation::RemoveAll,
            CacheRequest::Clear { .. } => Operation::Clear,
            CacheRequest::LocalPeek { .. } => Operation::LocalPeek,
        }
    }

    pub fn cache_id(&self) -> i32 {
        match self {
            CacheRequest::Put { cache_id, .. }
            | CacheRequest::Get { cache_id, .. }
            | CacheRequest::ContainsKey { cache_id, .. }
            | CacheRequest::Size { cache_id, .. }
            | CacheRequest::RemoveAll { cache_id, .. }
            | CacheRequest::Clear { cache_id }
            | CacheRequest::LocalPeek { cache_id, .. } => *cache_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Why a node failed a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CacheNotFound,
    Internal,
}

/// Response returned by a cache node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheResponse {
    Ack,
    Value(Option<Vec<u8>>),
    Bool(bool),
    Size(i64),
    /// The node does not own the key's partition at `topology`
    NotOwner { topology: TopologyVersion },
    Unsupported(String),
    Failure { kind: FailureKind, message: String },
}

impl CacheResponse {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// One awareness group as carried by a partitions response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcAffinityGroup {
    pub cache_ids: Vec<i32>,
    pub partitions: Vec<Vec<Endpoint>>,
}

/// Result of a partitions request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcPartitions {
    pub version: TopologyVersion,
    pub groups: Vec<RpcAffinityGroup>,
}

impl RpcPartitions {
    /// Build a response from in-memory groups
    pub fn from_groups(groups: &[AffinityAwarenessGroup], version: TopologyVersion) -> Self {
        Self {
            version,
            groups: groups
                .iter()
                .map(|group| RpcAffinityGroup {
                    cache_ids: group.cache_ids.clone(),
                    partitions: group.assignment.partitions().to_vec(),
                })
                .collect(),
        }
    }

    /// Validate into awareness groups
    pub fn into_groups(
        self,
    ) -> shardwise::Result<(Vec<AffinityAwarenessGroup>, TopologyVersion)> {
        let groups = self
            .groups
            .into_iter()
            .map(|group| {
                let assignment = AffinityAssignment::new(group.partitions)?;
                Ok(AffinityAwarenessGroup::new(group.cache_ids, Arc::new(assignment)))
            })
            .collect::<shardwise::Result<Vec<_>>>()?;
        Ok((groups, self.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_modes() {
        let modes = PeekModes::PRIMARY | PeekModes::BACKUP;
        assert!(modes.contains(PeekModes::PRIMARY));
        assert!(modes.contains(PeekModes::BACKUP));
        assert!(!modes.contains(PeekModes::ALL));
        assert!(!modes.primary_only());
        assert!(PeekModes::PRIMARY.primary_only());
        assert!(PeekModes::empty().primary_only());
        assert_eq!(modes.bits(), 12);
    }

    #[test]
    fn test_request_metadata() {
        let request = CacheRequest::Get {
            cache_id: 7,
            key: EncodedKey {
                hash: 3366,
                bytes: vec![1, 2],
            },
            tx: None,
        };
        assert_eq!(request.operation(), Operation::Get);
        assert_eq!(request.cache_id(), 7);
        assert_eq!(CacheRequest::Clear { cache_id: 3 }.cache_id(), 3);
    }

    #[test]
    fn test_garbage_response_is_an_error() {
        assert!(CacheResponse::decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).is_err());
        assert!(CacheResponse::decode(&[]).is_err());
    }

    #[test]
    fn test_partitions_validation() {
        let valid = RpcPartitions {
            version: TopologyVersion::new(2, 1),
            groups: vec![RpcAffinityGroup {
                cache_ids: vec![1, 2],
                partitions: vec![vec![Endpoint::new("a", 1)], vec![]],
            }],
        };
        let (groups, version) = valid.into_groups().unwrap();
        assert_eq!(version, TopologyVersion::new(2, 1));
        assert_eq!(groups[0].cache_ids, vec![1, 2]);
        assert_eq!(groups[0].assignment.partition_count(), 2);

        let invalid = RpcPartitions {
            version: TopologyVersion::new(2, 1),
            groups: vec![RpcAffinityGroup {
                cache_ids: vec![1],
                partitions: vec![],
            }],
        };
        assert!(invalid.into_groups().is_err());
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::ContainsKey.to_string(), "contains_key");
        assert_eq!(Operation::RemoveAll.as_str(), "remove_all");
    }
}
