//! Network endpoint of a cluster node

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Host and port of a cache-serving node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidEndpoint(s.to_string()))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(Error::InvalidEndpoint(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidEndpoint(s.to_string()))?;

        Ok(Endpoint::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let ep: Endpoint = "node-1.cluster.local:10800".parse().unwrap();
        assert_eq!(ep, Endpoint::new("node-1.cluster.local", 10800));
        assert_eq!(ep.to_string(), "node-1.cluster.local:10800");
    }

    #[test]
    fn test_parse_ipv6() {
        let ep: Endpoint = "[::1]:10800".parse().unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.to_string(), "[::1]:10800");
    }

    #[test]
    fn test_parse_invalid() {
        assert!("no-port".parse::<Endpoint>().is_err());
        assert!(":10800".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }
}
