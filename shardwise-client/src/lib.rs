//! Shardwise Client - affinity-aware access to a partitioned cache cluster
//!
//! Sends key-addressed requests straight to the node owning the key's
//! partition, using the distribution tracked by
//! [`shardwise::AffinityManager`], and falls back to any reachable node when
//! no usable distribution is known.
//!
//! # Architecture
//!
//! - **Client**: owns the affinity manager and the router shared by all caches
//! - **Cache**: typed facade resolving owners, failing over and refreshing
//!   stale affinity
//! - **Router**: transport seam; the QUIC router pools tarpc connections
//! - **Protocol**: bincode request/response messages
//! - **Metrics**: request, routing and connection metrics
//!
//! # Example
//!
//! ```ignore
//! use shardwise_client::{CacheConfig, Client, ClientConfig};
//!
//! let client = Client::connect(ClientConfig {
//!     endpoints: vec!["10.0.0.1:10800".into(), "10.0.0.2:10800".into()],
//!     ..Default::default()
//! })
//! .await?;
//!
//! let cache = client.cache::<String, i64>("orders", CacheConfig::default())?;
//! cache.put(&"k1".to_string(), &42).await?;
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod router;
pub mod service;
pub mod transport;

mod cache;
mod client;
mod registry;

pub use cache::{CacheClient, TxContext};
pub use client::Client;
pub use config::{CacheConfig, ClientConfig, ClientTlsConfig};
pub use error::{ClientError, Result};
pub use protocol::{CacheRequest, CacheResponse, EncodedKey, FailureKind, Operation, PeekModes};
pub use router::TransportRouter;
pub use service::CacheNodeClient;
pub use transport::QuicRouter;
