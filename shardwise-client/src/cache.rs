//! Typed cache facade with partition-direct routing
//!
//! Key-addressed operations compute the key's partition with the cache's
//! affinity function and go straight to the partition owners, primary
//! first. Without a usable assignment they fall back to whatever endpoints
//! the router knows.

use crate::config::CacheConfig;
use crate::error::{ClientError, Result};
use crate::metrics::{
    record_affinity_update, record_failover, record_partition_refresh, record_route,
    record_stale_retry, RpcTimer,
};
use crate::protocol::{CacheRequest, CacheResponse, EncodedKey, FailureKind, Operation, PeekModes};
use crate::registry::CacheRegistry;
use crate::router::TransportRouter;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shardwise::{AffinityAssignment, AffinityKey, AffinityManager, Endpoint, RendezvousAffinity};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Externally managed transaction a facade can be bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    /// Transaction id assigned by the coordinating node
    pub id: i32,
    /// Node coordinating the transaction; all requests are pinned to it
    pub endpoint: Endpoint,
}

/// Typed handle to one cache
///
/// Cheap to clone; clones share the client's affinity manager and router.
pub struct CacheClient<K, V> {
    name: Arc<str>,
    id: i32,
    affinity_function: RendezvousAffinity,
    affinity_awareness: bool,
    request_timeout: Duration,
    manager: Arc<AffinityManager>,
    registry: Arc<CacheRegistry>,
    router: Arc<dyn TransportRouter>,
    tx: Option<TxContext>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for CacheClient<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            id: self.id,
            affinity_function: self.affinity_function,
            affinity_awareness: self.affinity_awareness,
            request_timeout: self.request_timeout,
            manager: Arc::clone(&self.manager),
            registry: Arc::clone(&self.registry),
            router: Arc::clone(&self.router),
            tx: self.tx.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> std::fmt::Debug for CacheClient<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("partitions", &self.affinity_function.partitions())
            .field("affinity_awareness", &self.affinity_awareness)
            .field("tx", &self.tx)
            .finish()
    }
}

impl<K, V> CacheClient<K, V>
where
    K: AffinityKey + Serialize,
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        name: &str,
        config: &CacheConfig,
        affinity_awareness: bool,
        request_timeout: Duration,
        manager: Arc<AffinityManager>,
        registry: Arc<CacheRegistry>,
        router: Arc<dyn TransportRouter>,
    ) -> Result<Self> {
        let affinity_function = config.affinity()?;
        let id = shardwise::cache_id(name);
        registry.register(id);
        Ok(Self {
            name: Arc::from(name),
            id,
            affinity_function,
            affinity_awareness,
            request_timeout,
            manager,
            registry,
            router,
            tx: None,
            _marker: PhantomData,
        })
    }

    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache id derived from the name
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Bound transaction, if any
    pub fn transaction(&self) -> Option<&TxContext> {
        self.tx.as_ref()
    }

    /// Facade that runs every operation inside `tx`
    ///
    /// Affinity routing is bypassed while bound; requests go to the
    /// transaction's node. `size` still counts across the cluster.
    pub fn with_transaction(&self, tx: TxContext) -> Self {
        let mut bound = self.clone();
        bound.tx = Some(tx);
        bound
    }

    /// Store `value` under `key`
    pub async fn put(&self, key: &K, value: &V) -> Result<()> {
        let key = encode_key(key)?;
        let hash = key.hash;
        let request = CacheRequest::Put {
            cache_id: self.id,
            key,
            value: bincode::serialize(value)?,
            tx: self.tx_id(),
        };
        self.key_exchange(hash, request, |response| match response {
            CacheResponse::Ack => Ok(()),
            other => Err(other),
        })
        .await
    }

    /// Value stored under `key`
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let key = encode_key(key)?;
        let hash = key.hash;
        let request = CacheRequest::Get {
            cache_id: self.id,
            key,
            tx: self.tx_id(),
        };
        let value = self
            .key_exchange(hash, request, |response| match response {
                CacheResponse::Value(value) => Ok(value),
                other => Err(other),
            })
            .await?;
        decode_value(value)
    }

    /// Whether the cache holds an entry for `key`
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        let key = encode_key(key)?;
        let hash = key.hash;
        let request = CacheRequest::ContainsKey {
            cache_id: self.id,
            key,
            tx: self.tx_id(),
        };
        self.key_exchange(hash, request, |response| match response {
            CacheResponse::Bool(found) => Ok(found),
            other => Err(other),
        })
        .await
    }

    /// Number of entries across the cluster
    ///
    /// Asks every node holding data for its local count and sums them. With
    /// an assignment that is every owner, or only the distinct primaries when
    /// `peek_modes` selects primary copies; without one, every known
    /// endpoint. Any failing node fails the call. A bound transaction's id is
    /// passed along but does not pin the request to one node.
    pub async fn size(&self, peek_modes: PeekModes) -> Result<i64> {
        self.refresh_if_needed().await;

        let targets = match self.cluster_assignment() {
            Some(assignment) if peek_modes.primary_only() => assignment.primaries(),
            Some(assignment) => assignment.owners(),
            None => self.router.known_endpoints(),
        };
        if targets.is_empty() {
            return Err(self.unreachable(Operation::Size, Vec::new(), None));
        }
        debug!(
            "Size of cache {} over {} endpoints",
            self.name,
            targets.len()
        );

        let request = CacheRequest::Size {
            cache_id: self.id,
            peek_modes,
            tx: self.tx_id(),
        }
        .encode()?;

        let counts = try_join_all(targets.iter().map(|endpoint| {
            self.exchange_on(
                Operation::Size,
                std::slice::from_ref(endpoint),
                &request,
                |response| match response {
                    CacheResponse::Size(count) => Ok(count),
                    other => Err(other),
                },
            )
        }))
        .await?;

        Ok(counts.into_iter().sum())
    }

    /// Remove every entry, inside the bound transaction if there is one
    pub async fn remove_all(&self) -> Result<()> {
        let request = CacheRequest::RemoveAll {
            cache_id: self.id,
            tx: self.tx_id(),
        }
        .encode()?;
        self.exchange_on(
            Operation::RemoveAll,
            &self.fallback_endpoints(),
            &request,
            |response| match response {
                CacheResponse::Ack => Ok(()),
                other => Err(other),
            },
        )
        .await
    }

    /// Clear the cache without transactional or listener semantics
    pub async fn clear(&self) -> Result<()> {
        let request = CacheRequest::Clear { cache_id: self.id }.encode()?;
        self.exchange_on(
            Operation::Clear,
            &self.fallback_endpoints(),
            &request,
            |response| match response {
                CacheResponse::Ack => Ok(()),
                other => Err(other),
            },
        )
        .await
    }

    /// Value held locally by whichever node answers
    ///
    /// Not routed by affinity. Nodes without local storage reject it with
    /// [`ClientError::NotSupported`].
    pub async fn local_peek(&self, key: &K) -> Result<Option<V>> {
        let request = CacheRequest::LocalPeek {
            cache_id: self.id,
            key: encode_key(key)?,
        }
        .encode()?;
        let value = self
            .exchange_on(
                Operation::LocalPeek,
                &self.fallback_endpoints(),
                &request,
                |response| match response {
                    CacheResponse::Value(value) => Ok(value),
                    other => Err(other),
                },
            )
            .await?;
        decode_value(value)
    }

    /// Fetch the partition distribution and install it
    ///
    /// Asks for every cache opened through the same client, so the install
    /// keeps all of them routable. Data at the installed version only adds
    /// caches the installed distribution lacks.
    pub async fn update_partitions(&self) -> Result<()> {
        let cache_ids = self.registry.cache_ids();
        let result = self.router.request_topology_refresh(&cache_ids).await;
        record_partition_refresh(result.is_ok());

        let outcome = match result {
            Ok((groups, version)) => {
                let accepted = self.manager.update_affinity(&groups, version)
                    || self.manager.extend_affinity(&groups, version);
                record_affinity_update(accepted, self.manager.version());
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.registry
            .record_attempt(self.manager.version(), outcome.is_ok());
        outcome
    }

    /// Endpoints a request for `key` would be sent to, in order
    ///
    /// Partition owners (primary first) when affinity routing applies,
    /// otherwise the fallback endpoints.
    pub fn endpoints_for_key(&self, key: &K) -> Result<Vec<Endpoint>> {
        Ok(self.resolve(key.affinity_hash())?.0)
    }

    fn tx_id(&self) -> Option<i32> {
        self.tx.as_ref().map(|tx| tx.id)
    }

    /// Assignment for routing keys; none while bound to a transaction
    fn affinity_assignment(&self) -> Option<Arc<AffinityAssignment>> {
        if self.tx.is_some() {
            return None;
        }
        self.cluster_assignment()
    }

    fn cluster_assignment(&self) -> Option<Arc<AffinityAssignment>> {
        if !self.affinity_awareness {
            return None;
        }
        self.manager.affinity_assignment(self.id)
    }

    fn fallback_endpoints(&self) -> Vec<Endpoint> {
        match &self.tx {
            Some(tx) => vec![tx.endpoint.clone()],
            None => self.router.known_endpoints(),
        }
    }

    /// Candidates for a key hash and whether they came from affinity
    fn resolve(&self, hash: i32) -> Result<(Vec<Endpoint>, bool)> {
        if let Some(assignment) = self.affinity_assignment() {
            let expected = self.affinity_function.partitions();
            if assignment.partition_count() != expected {
                return Err(ClientError::Config(format!(
                    "Cache {} is configured with {} partitions but the cluster reports {}",
                    self.name,
                    expected,
                    assignment.partition_count()
                )));
            }

            let owners = assignment.endpoints(self.affinity_function.partition(hash));
            if !owners.is_empty() {
                return Ok((owners.to_vec(), true));
            }
        }
        Ok((self.fallback_endpoints(), false))
    }

    /// Refetch the distribution if it is outdated or lacks this cache
    ///
    /// A stale mark always refetches. A cache missing from the distribution
    /// refetches once per installed version, and again after the retry delay
    /// if that refresh failed. Only one caller refetches at a time; the rest
    /// route with whatever is installed. Failures are logged and leave the
    /// fallback in place.
    async fn refresh_if_needed(&self) {
        if !self.affinity_awareness {
            return;
        }
        let snapshot = self.manager.snapshot();
        let needed = if snapshot.is_stale() {
            true
        } else {
            snapshot.assignment(self.id).is_none()
                && self.registry.should_refresh(snapshot.version())
        };
        drop(snapshot);
        if !needed {
            return;
        }
        let Some(_guard) = self.manager.try_begin_refresh() else {
            return;
        };
        if let Err(e) = self.update_partitions().await {
            warn!("Partition refresh for cache {} failed: {}", self.name, e);
        }
    }

    /// Route a key-addressed request, refreshing once on a wrong-owner reply
    async fn key_exchange<T>(
        &self,
        hash: i32,
        request: CacheRequest,
        extract: impl Fn(CacheResponse) -> std::result::Result<T, CacheResponse>,
    ) -> Result<T> {
        let operation = request.operation();
        let request = request.encode()?;
        if self.tx.is_none() {
            self.refresh_if_needed().await;
        }

        let mut refreshed = false;
        loop {
            let (candidates, affinity) = self.resolve(hash)?;
            record_route(operation.as_str(), affinity);

            let (endpoint, response) = self.dispatch(operation, &candidates, &request).await?;
            match response {
                CacheResponse::NotOwner { topology } => {
                    if refreshed {
                        return Err(ClientError::StaleAffinity {
                            cache_id: self.id,
                            operation,
                            endpoint: endpoint.to_string(),
                        });
                    }
                    warn!(
                        "{} for cache {} hit non-owner {} at topology {}; refreshing",
                        operation, self.name, endpoint, topology
                    );
                    record_stale_retry(operation.as_str());
                    refreshed = true;
                    self.manager.mark_stale(topology);
                    if let Err(e) = self.update_partitions().await {
                        warn!("Partition refresh for cache {} failed: {}", self.name, e);
                    }
                }
                other => return self.interpret(&endpoint, operation, other, &extract),
            }
        }
    }

    /// Send to the first candidate that answers and interpret the reply
    async fn exchange_on<T>(
        &self,
        operation: Operation,
        candidates: &[Endpoint],
        request: &[u8],
        extract: impl Fn(CacheResponse) -> std::result::Result<T, CacheResponse>,
    ) -> Result<T> {
        let (endpoint, response) = self.dispatch(operation, candidates, request).await?;
        self.interpret(&endpoint, operation, response, &extract)
    }

    /// Try candidates in order, connected ones first, until one replies
    async fn dispatch(
        &self,
        operation: Operation,
        candidates: &[Endpoint],
        request: &[u8],
    ) -> Result<(Endpoint, CacheResponse)> {
        let mut ordered = candidates.to_vec();
        ordered.sort_by_key(|endpoint| !self.router.is_connected(endpoint));

        let mut attempted: Vec<String> = Vec::with_capacity(ordered.len());
        let mut last_error = None;

        for endpoint in ordered {
            let endpoint_str = endpoint.to_string();
            if let Some(previous) = attempted.last() {
                record_failover(operation.as_str(), previous.as_str());
            }
            attempted.push(endpoint_str.clone());

            let timer = RpcTimer::new(operation.as_str(), &endpoint_str);
            let sent = tokio::time::timeout(
                self.request_timeout,
                self.router.send(&endpoint, request.to_vec()),
            )
            .await;
            let result = match sent {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(format!(
                    "{} to {} exceeded {:?}",
                    operation, endpoint, self.request_timeout
                ))),
            };

            match result {
                Ok(bytes) => match CacheResponse::decode(&bytes) {
                    Ok(response) => {
                        timer.success();
                        return Ok((endpoint, response));
                    }
                    Err(e) => {
                        timer.error("protocol");
                        return Err(ClientError::Protocol {
                            endpoint: endpoint_str,
                            operation,
                            message: format!("Malformed response: {}", e),
                        });
                    }
                },
                Err(e) if e.is_retryable() => {
                    timer.error(e.error_type());
                    warn!("{} to {} failed: {}", operation, endpoint, e);
                    last_error = Some(e.to_string());
                }
                Err(e) => {
                    timer.error(e.error_type());
                    return Err(e);
                }
            }
        }

        Err(self.unreachable(operation, attempted, last_error))
    }

    fn interpret<T>(
        &self,
        endpoint: &Endpoint,
        operation: Operation,
        response: CacheResponse,
        extract: &impl Fn(CacheResponse) -> std::result::Result<T, CacheResponse>,
    ) -> Result<T> {
        match response {
            CacheResponse::Failure {
                kind: FailureKind::CacheNotFound,
                message,
            } => Err(ClientError::Config(format!(
                "Unknown cache {} (id {}): {}",
                self.name, self.id, message
            ))),
            CacheResponse::Failure {
                kind: FailureKind::Internal,
                message,
            } => Err(ClientError::Server {
                endpoint: endpoint.to_string(),
                operation,
                message,
            }),
            CacheResponse::Unsupported(message) => Err(ClientError::NotSupported(format!(
                "{} on {}: {}",
                operation, endpoint, message
            ))),
            other => extract(other).map_err(|unexpected| ClientError::Protocol {
                endpoint: endpoint.to_string(),
                operation,
                message: format!("Unexpected response {:?}", unexpected),
            }),
        }
    }

    fn unreachable(
        &self,
        operation: Operation,
        attempted: Vec<String>,
        last_error: Option<String>,
    ) -> ClientError {
        ClientError::Unreachable {
            cache_id: self.id,
            operation,
            attempted,
            last_error,
        }
    }
}

fn encode_key<K: AffinityKey + Serialize>(key: &K) -> Result<EncodedKey> {
    Ok(EncodedKey {
        hash: key.affinity_hash(),
        bytes: bincode::serialize(key)?,
    })
}

fn decode_value<V: DeserializeOwned>(value: Option<Vec<u8>>) -> Result<Option<V>> {
    value
        .map(|bytes| bincode::deserialize(&bytes))
        .transpose()
        .map_err(ClientError::from)
}
