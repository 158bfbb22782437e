//! Pooled QUIC router
//!
//! One tarpc client per node endpoint, created lazily on first use and
//! shared by every cache of the owning [`Client`](crate::Client).

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::metrics::{
    record_connection_established, record_connection_failed, record_connection_pool_size,
};
use crate::protocol::Operation;
use crate::router::TransportRouter;
use crate::service::CacheNodeClient;
use crate::transport::make_client_endpoint;
use async_trait::async_trait;
use parking_lot::RwLock;
use shardwise::{AffinityAwarenessGroup, Endpoint, TopologyVersion};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::client::Config as TarpcConfig;
use tarpc::context;
use tracing::{debug, info, warn};

/// Connection pool entry
struct PooledConnection {
    client: CacheNodeClient,
    remote: SocketAddr,
}

/// [`TransportRouter`] over QUIC with a per-endpoint connection pool
pub struct QuicRouter {
    config: ClientConfig,
    seeds: Vec<Endpoint>,
    endpoint: quinn::Endpoint,
    connections: Arc<RwLock<HashMap<Endpoint, PooledConnection>>>,
}

impl QuicRouter {
    /// Create a router for the configured seed endpoints
    ///
    /// No connection is opened until the first request.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let seeds = config.parse_endpoints()?;
        if seeds.is_empty() {
            return Err(ClientError::Config("No endpoints configured".to_string()));
        }
        let endpoint = make_client_endpoint(&config)?;

        Ok(Self {
            config,
            seeds,
            endpoint,
            connections: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get or create a connection to the specified node
    async fn get_client(&self, target: &Endpoint) -> Result<CacheNodeClient> {
        {
            let connections = self.connections.read();
            if let Some(conn) = connections.get(target) {
                return Ok(conn.client.clone());
            }
        }

        let (client, remote) = self.create_connection(target).await?;

        {
            let mut connections = self.connections.write();
            // Another task may have connected meanwhile; keep the first one
            let entry = connections
                .entry(target.clone())
                .or_insert(PooledConnection { client, remote });
            let client = entry.client.clone();
            record_connection_pool_size(connections.len());
            Ok(client)
        }
    }

    async fn resolve(&self, target: &Endpoint) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|e| {
                ClientError::Connection(format!("Failed to resolve {}: {}", target, e))
            })?;
        addrs
            .next()
            .ok_or_else(|| ClientError::Connection(format!("No address found for {}", target)))
    }

    /// Create a new connection to the specified node
    async fn create_connection(&self, target: &Endpoint) -> Result<(CacheNodeClient, SocketAddr)> {
        let target_str = target.to_string();
        let addr = self.resolve(target).await?;
        debug!("Connecting to cache node {} at {}", target, addr);

        let connecting = self
            .endpoint
            .connect(addr, &self.config.tls.server_name)
            .map_err(|e| {
                record_connection_failed(&target_str, "connect_error");
                ClientError::Connection(format!("Failed to connect to {}: {}", target, e))
            })?;

        let connection = tokio::time::timeout(self.config.connect_timeout(), connecting)
            .await
            .map_err(|_| {
                record_connection_failed(&target_str, "timeout");
                ClientError::Timeout(format!("Connection to {} timed out", target))
            })?
            .map_err(|e| {
                record_connection_failed(&target_str, "handshake_error");
                ClientError::Connection(format!("Connection handshake failed with {}: {}", target, e))
            })?;

        let (send, recv) = connection.open_bi().await.map_err(|e| {
            ClientError::Transport(format!("Failed to open stream to {}: {}", target, e))
        })?;

        let transport = tarpc::serde_transport::new(
            tokio_util::codec::Framed::new(
                QuicBiStream { send, recv },
                tokio_util::codec::LengthDelimitedCodec::new(),
            ),
            tokio_serde::formats::Bincode::default(),
        );

        let client = CacheNodeClient::new(TarpcConfig::default(), transport).spawn();

        info!("Connected to cache node {} at {}", target, addr);
        record_connection_established(&target_str);
        Ok((client, addr))
    }

    /// Create a context with the configured request timeout
    fn context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = std::time::Instant::now() + self.config.request_timeout();
        ctx
    }

    /// Map an RPC failure, dropping the pooled connection so the next
    /// request reconnects
    fn rpc_error(&self, target: &Endpoint, err: tarpc::client::RpcError) -> ClientError {
        self.remove_connection(target);
        match err {
            tarpc::client::RpcError::DeadlineExceeded => {
                ClientError::Timeout(format!("Request to {} timed out", target))
            }
            other => ClientError::Transport(format!("RPC to {} failed: {}", target, other)),
        }
    }

    /// Ping a node
    pub async fn ping(&self, target: &Endpoint) -> Result<String> {
        let client = self.get_client(target).await?;
        client
            .ping(self.context())
            .await
            .map_err(|e| self.rpc_error(target, e))
    }

    /// Resolved address of a pooled connection
    pub fn remote_addr(&self, target: &Endpoint) -> Option<SocketAddr> {
        self.connections.read().get(target).map(|conn| conn.remote)
    }

    /// Remove a connection from the pool
    pub fn remove_connection(&self, target: &Endpoint) {
        let mut connections = self.connections.write();
        if connections.remove(target).is_some() {
            debug!("Dropped connection to {}", target);
        }
        record_connection_pool_size(connections.len());
    }

    /// Clear all connections from the pool
    pub fn clear_connections(&self) {
        let mut connections = self.connections.write();
        connections.clear();
        record_connection_pool_size(0);
    }
}

#[async_trait]
impl TransportRouter for QuicRouter {
    async fn send(&self, endpoint: &Endpoint, request: Vec<u8>) -> Result<Vec<u8>> {
        let client = self.get_client(endpoint).await?;
        client
            .exchange(self.context(), request)
            .await
            .map_err(|e| self.rpc_error(endpoint, e))
    }

    fn known_endpoints(&self) -> Vec<Endpoint> {
        self.seeds.clone()
    }

    fn is_connected(&self, endpoint: &Endpoint) -> bool {
        self.connections.read().contains_key(endpoint)
    }

    async fn request_topology_refresh(
        &self,
        cache_ids: &[i32],
    ) -> Result<(Vec<AffinityAwarenessGroup>, TopologyVersion)> {
        let mut candidates = self.known_endpoints();
        candidates.sort_by_key(|endpoint| !self.is_connected(endpoint));

        let mut attempted = Vec::with_capacity(candidates.len());
        let mut last_error = None;

        for target in &candidates {
            attempted.push(target.to_string());
            let result = match self.get_client(target).await {
                Ok(client) => client
                    .partitions(self.context(), cache_ids.to_vec())
                    .await
                    .map_err(|e| self.rpc_error(target, e)),
                Err(e) => Err(e),
            };

            match result {
                Ok(Ok(partitions)) => {
                    return partitions.into_groups().map_err(|e| ClientError::Protocol {
                        endpoint: target.to_string(),
                        operation: Operation::Partitions,
                        message: format!("Invalid partition distribution: {}", e),
                    });
                }
                Ok(Err(e)) => return Err(e),
                Err(e) if e.is_retryable() => {
                    warn!("Partition request to {} failed: {}", target, e);
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClientError::Unreachable {
            cache_id: cache_ids.first().copied().unwrap_or_default(),
            operation: Operation::Partitions,
            attempted,
            last_error,
        })
    }
}

/// Wrapper around QUIC bidirectional streams for tokio I/O
struct QuicBiStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

impl tokio::io::AsyncRead for QuicBiStream {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for QuicBiStream {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        std::pin::Pin::new(&mut self.send)
            .poll_write(cx, buf)
            .map_err(io::Error::other)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.send).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_requires_endpoints() {
        let config = ClientConfig::default();
        assert!(matches!(QuicRouter::new(config), Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_router_is_lazy() {
        let config = ClientConfig {
            endpoints: vec!["127.0.0.1:10800".into(), "127.0.0.1:10801".into()],
            ..Default::default()
        };
        let router = QuicRouter::new(config).unwrap();
        let known = router.known_endpoints();
        assert_eq!(known.len(), 2);
        assert!(!router.is_connected(&known[0]));
        assert!(router.remote_addr(&known[0]).is_none());

        router.remove_connection(&known[0]);
        router.clear_connections();
    }
}
