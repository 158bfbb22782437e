//! Transport router interface
//!
//! The router owns every connection of a client instance. Cache facades
//! never hold connections; they only ask the router to exchange bytes with
//! an endpoint.

use crate::error::Result;
use async_trait::async_trait;
use shardwise::{AffinityAwarenessGroup, Endpoint, TopologyVersion};

/// Connection pool shared by all caches of a client
#[async_trait]
pub trait TransportRouter: Send + Sync {
    /// Exchange one encoded request for its encoded response
    ///
    /// Fails with a retryable error (`Connection`, `Transport`, `Timeout`)
    /// when the endpoint cannot be reached.
    async fn send(&self, endpoint: &Endpoint, request: Vec<u8>) -> Result<Vec<u8>>;

    /// All endpoints the router knows about, in preference order
    fn known_endpoints(&self) -> Vec<Endpoint>;

    /// Whether a live connection to `endpoint` exists
    fn is_connected(&self, endpoint: &Endpoint) -> bool;

    /// Fetch the current partition distribution for a set of caches
    ///
    /// The returned groups cover every listed cache the cluster knows.
    async fn request_topology_refresh(
        &self,
        cache_ids: &[i32],
    ) -> Result<(Vec<AffinityAwarenessGroup>, TopologyVersion)>;
}
