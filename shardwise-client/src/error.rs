//! Client error types

use crate::protocol::Operation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Every candidate endpoint failed at the connection level
    #[error("No reachable endpoint for {operation} on cache {cache_id} (tried {attempted:?})")]
    Unreachable {
        cache_id: i32,
        operation: Operation,
        attempted: Vec<String>,
        last_error: Option<String>,
    },

    /// The owner still rejected the key after a partition refresh
    #[error("Stale affinity for {operation} on cache {cache_id}: {endpoint} does not own the key after refresh")]
    StaleAffinity {
        cache_id: i32,
        operation: Operation,
        endpoint: String,
    },

    #[error("Protocol error from {endpoint} during {operation}: {message}")]
    Protocol {
        endpoint: String,
        operation: Operation,
        message: String,
    },

    #[error("Server error from {endpoint} during {operation}: {message}")]
    Server {
        endpoint: String,
        operation: Operation,
        message: String,
    },

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl ClientError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            ClientError::Connection(_) => "connection",
            ClientError::Transport(_) => "transport",
            ClientError::Tls(_) => "tls",
            ClientError::Serialization(_) => "serialization",
            ClientError::Timeout(_) => "timeout",
            ClientError::Config(_) => "config",
            ClientError::Unreachable { .. } => "unreachable",
            ClientError::StaleAffinity { .. } => "stale_affinity",
            ClientError::Protocol { .. } => "protocol",
            ClientError::Server { .. } => "server",
            ClientError::NotSupported(_) => "not_supported",
        }
    }

    /// Whether another endpoint may succeed where this attempt failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_) | ClientError::Transport(_) | ClientError::Timeout(_)
        )
    }
}

impl From<shardwise::Error> for ClientError {
    fn from(err: shardwise::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<bincode::Error> for ClientError {
    fn from(err: bincode::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
