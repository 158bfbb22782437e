//! Client entry point
//!
//! A [`Client`] owns the affinity manager and the router. Every cache handle
//! it hands out shares both, so a topology refresh triggered through one
//! cache benefits all of them.

use crate::cache::CacheClient;
use crate::config::{CacheConfig, ClientConfig};
use crate::error::Result;
use crate::registry::CacheRegistry;
use crate::router::TransportRouter;
use crate::transport::QuicRouter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shardwise::{AffinityKey, AffinityManager, TopologyVersion};
use std::sync::Arc;
use tracing::{debug, info};

/// Affinity-aware cache client
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    affinity: Arc<AffinityManager>,
    registry: Arc<CacheRegistry>,
    router: Arc<dyn TransportRouter>,
}

impl Client {
    /// Create a client over an existing router
    pub fn new(config: ClientConfig, router: Arc<dyn TransportRouter>) -> Self {
        let registry = Arc::new(CacheRegistry::new(config.refresh_retry()));
        Self {
            config,
            affinity: Arc::new(AffinityManager::new()),
            registry,
            router,
        }
    }

    /// Create a client that talks to the configured endpoints over QUIC
    ///
    /// Connections are opened lazily on first use.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let router = QuicRouter::new(config.clone())?;
        info!(
            "Client {} created for {} endpoints (affinity awareness: {})",
            config.client_name,
            config.endpoints.len(),
            config.affinity_awareness
        );
        Ok(Self::new(config, Arc::new(router)))
    }

    /// Typed handle to the cache called `name`
    ///
    /// The cache joins the set every partition refresh asks about.
    ///
    /// Fails with a configuration error if `cache_config` is invalid.
    pub fn cache<K, V>(&self, name: &str, cache_config: CacheConfig) -> Result<CacheClient<K, V>>
    where
        K: AffinityKey + Serialize,
        V: Serialize + DeserializeOwned,
    {
        let cache = CacheClient::new(
            name,
            &cache_config,
            self.config.affinity_awareness,
            self.config.request_timeout(),
            Arc::clone(&self.affinity),
            Arc::clone(&self.registry),
            Arc::clone(&self.router),
        )?;
        debug!("Opened cache {} (id {})", name, cache.id());
        Ok(cache)
    }

    /// Record that the cluster topology moved to `version`
    ///
    /// Affinity routing pauses until the next operation refetches the
    /// distribution.
    pub fn on_topology_change(&self, version: TopologyVersion) -> bool {
        self.affinity.mark_stale(version)
    }

    /// Shared affinity manager
    pub fn affinity(&self) -> &Arc<AffinityManager> {
        &self.affinity
    }

    /// Shared transport router
    pub fn router(&self) -> &Arc<dyn TransportRouter> {
        &self.router
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("affinity", &self.affinity)
            .field("caches", &self.registry.cache_ids())
            .finish()
    }
}
