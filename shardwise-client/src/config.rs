//! Client and cache configuration

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use shardwise::{AffinityFunctionKind, Endpoint, RendezvousAffinity, DEFAULT_PARTITIONS};
use std::path::PathBuf;

/// Main client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Name of this client instance, used in logs
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Cluster node addresses (host:port)
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Route key operations straight to partition owners
    #[serde(default = "default_affinity_awareness")]
    pub affinity_awareness: bool,

    /// Delay before retrying a failed partition refresh, in milliseconds
    #[serde(default = "default_refresh_retry")]
    pub refresh_retry_ms: u64,

    /// TLS configuration for node connections
    #[serde(default)]
    pub tls: ClientTlsConfig,
}

fn default_client_name() -> String {
    format!("client-{}", &uuid::Uuid::new_v4().to_string()[..8])
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    10000
}

fn default_refresh_retry() -> u64 {
    1000
}

fn default_affinity_awareness() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            endpoints: Vec::new(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            affinity_awareness: default_affinity_awareness(),
            refresh_retry_ms: default_refresh_retry(),
            tls: ClientTlsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse configured endpoints
    pub fn parse_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.endpoints
            .iter()
            .map(|addr| {
                addr.parse::<Endpoint>()
                    .map_err(|e| ClientError::Config(format!("Invalid endpoint: {}", e)))
            })
            .collect()
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get partition refresh retry delay as Duration
    pub fn refresh_retry(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.refresh_retry_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}

/// TLS configuration for node connections
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientTlsConfig {
    /// Path to CA certificate for verifying node certificates.
    /// System roots are used when unset.
    pub ca_cert_path: Option<PathBuf>,

    /// Server name presented during the handshake
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Skip node certificate verification (INSECURE - for development only)
    #[serde(default)]
    pub skip_verify: bool,
}

fn default_server_name() -> String {
    "shardwise-node".to_string()
}

impl Default for ClientTlsConfig {
    fn default() -> Self {
        Self {
            ca_cert_path: None,
            server_name: default_server_name(),
            skip_verify: false,
        }
    }
}

/// Per-cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Fixed number of partitions
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Function mapping keys to partitions
    #[serde(default)]
    pub affinity_function: AffinityFunctionKind,

    /// Number of backup copies per partition
    #[serde(default)]
    pub backups: u32,
}

fn default_partitions() -> u32 {
    DEFAULT_PARTITIONS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            affinity_function: AffinityFunctionKind::default(),
            backups: 0,
        }
    }
}

impl CacheConfig {
    /// Validate and build the affinity function
    pub fn affinity(&self) -> Result<RendezvousAffinity> {
        self.affinity_function
            .create(self.partitions)
            .map_err(|e| ClientError::Config(format!("Invalid cache configuration: {}", e)))
    }
}
