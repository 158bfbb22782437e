//! Shardwise - partition affinity for cache clients
//!
//! Client-side knowledge of which cluster node owns which partition of a
//! cache, so key-addressed requests can go straight to the owner instead of
//! being forwarded by whichever node received them.
//!
//! # Architecture
//!
//! - **Version**: comparable topology version identifying one distribution
//! - **Assignment**: immutable partition to ordered-owners mapping per cache
//! - **Partition**: rendezvous affinity function (key hash to partition,
//!   partition to nodes), identical to the cluster's
//! - **Key**: cluster-compatible key hash codes
//! - **Manager**: copy-on-write snapshot of all assignments with
//!   version-gated replacement
//!
//! # Example
//!
//! ```ignore
//! use shardwise::{AffinityManager, RendezvousAffinity, TopologyVersion};
//!
//! let manager = AffinityManager::new();
//! manager.update_affinity(&groups, TopologyVersion::new(3, 0));
//!
//! if let Some(assignment) = manager.affinity_assignment(cache_id) {
//!     let function = RendezvousAffinity::new(assignment.partition_count())?;
//!     let owners = assignment.endpoints(function.partition_of(&key));
//! }
//! ```

pub mod assignment;
pub mod endpoint;
pub mod error;
pub mod key;
pub mod manager;
pub mod partition;
pub mod version;

pub use assignment::{AffinityAssignment, AffinityAwarenessGroup};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use key::{cache_id, AffinityKey};
pub use manager::{AffinityManager, AffinitySnapshot, CacheAffinityMap, RefreshGuard};
pub use partition::{
    AffinityFunctionKind, RendezvousAffinity, DEFAULT_PARTITIONS, MAX_PARTITIONS,
};
pub use version::TopologyVersion;
