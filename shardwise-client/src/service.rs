//! tarpc service definition for cache nodes
//!
//! The client side of the node RPC interface. Cache requests travel through
//! `exchange` as opaque encoded bytes; partition refreshes have their own
//! typed call.

use crate::error::ClientError;
use crate::protocol::RpcPartitions;

/// Cache node RPC service definition.
#[tarpc::service]
pub trait CacheNode {
    /// Execute one encoded [`CacheRequest`](crate::protocol::CacheRequest)
    /// and return the encoded [`CacheResponse`](crate::protocol::CacheResponse)
    async fn exchange(request: Vec<u8>) -> Vec<u8>;

    /// Current partition distribution of the awareness groups the listed
    /// caches belong to
    async fn partitions(cache_ids: Vec<i32>) -> Result<RpcPartitions, ClientError>;

    /// Simple ping for health checking
    async fn ping() -> String;
}
