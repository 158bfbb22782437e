//! Client observability metrics
//!
//! Provides Prometheus-compatible metrics for client operations including:
//! - Request duration and outcome per operation and endpoint
//! - Affinity versus fallback routing decisions
//! - Failovers and stale-affinity retries
//! - Affinity updates and the installed topology version
//! - Connection pool size

use shardwise::TopologyVersion;
use std::time::{Duration, Instant};

/// Record request duration
pub fn record_rpc_duration(operation: &str, endpoint: &str, duration: Duration) {
    metrics::histogram!(
        "shardwise_request_duration_seconds",
        "operation" => operation.to_string(),
        "endpoint" => endpoint.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record request success
pub fn record_rpc_success(operation: &str, endpoint: &str) {
    metrics::counter!(
        "shardwise_requests_total",
        "operation" => operation.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => "ok",
    )
    .increment(1);
}

/// Record request error
pub fn record_rpc_error(operation: &str, endpoint: &str, error_type: &str) {
    metrics::counter!(
        "shardwise_requests_total",
        "operation" => operation.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => "error",
    )
    .increment(1);

    metrics::counter!(
        "shardwise_request_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record how a key operation was routed
pub fn record_route(operation: &str, affinity: bool) {
    let route = if affinity { "affinity" } else { "fallback" };
    metrics::counter!(
        "shardwise_routes_total",
        "operation" => operation.to_string(),
        "route" => route,
    )
    .increment(1);
}

/// Record a move to the next candidate endpoint
pub fn record_failover(operation: &str, endpoint: &str) {
    metrics::counter!(
        "shardwise_failovers_total",
        "operation" => operation.to_string(),
        "endpoint" => endpoint.to_string(),
    )
    .increment(1);
}

/// Record a refresh-and-retry after a wrong-owner reply
pub fn record_stale_retry(operation: &str) {
    metrics::counter!(
        "shardwise_stale_affinity_retries_total",
        "operation" => operation.to_string(),
    )
    .increment(1);
}

/// Record a partition refresh
pub fn record_partition_refresh(success: bool) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!(
        "shardwise_partition_refreshes_total",
        "status" => status,
    )
    .increment(1);
}

/// Record an affinity update and the resulting version
pub fn record_affinity_update(accepted: bool, version: TopologyVersion) {
    let status = if accepted { "accepted" } else { "ignored" };
    metrics::counter!(
        "shardwise_affinity_updates_total",
        "status" => status,
    )
    .increment(1);

    metrics::gauge!("shardwise_topology_version_major").set(version.major as f64);
    metrics::gauge!("shardwise_topology_version_minor").set(version.minor as f64);
}

/// Record connection pool metrics
pub fn record_connection_pool_size(size: usize) {
    metrics::gauge!("shardwise_connections_active").set(size as f64);
}

/// Record connection establishment
pub fn record_connection_established(endpoint: &str) {
    metrics::counter!(
        "shardwise_connections_established_total",
        "endpoint" => endpoint.to_string(),
    )
    .increment(1);
}

/// Record connection failure
pub fn record_connection_failed(endpoint: &str, error_type: &str) {
    metrics::counter!(
        "shardwise_connections_failed_total",
        "endpoint" => endpoint.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Guard for timing one request attempt
pub struct RpcTimer {
    operation: String,
    endpoint: String,
    start: Instant,
}

impl RpcTimer {
    /// Start timing a request
    pub fn new(operation: &str, endpoint: &str) -> Self {
        Self {
            operation: operation.to_string(),
            endpoint: endpoint.to_string(),
            start: Instant::now(),
        }
    }

    /// Record success and duration
    pub fn success(self) {
        let duration = self.start.elapsed();
        record_rpc_duration(&self.operation, &self.endpoint, duration);
        record_rpc_success(&self.operation, &self.endpoint);
    }

    /// Record error and duration
    pub fn error(self, error_type: &str) {
        let duration = self.start.elapsed();
        record_rpc_duration(&self.operation, &self.endpoint, duration);
        record_rpc_error(&self.operation, &self.endpoint, error_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_timer() {
        let timer = RpcTimer::new("get", "node-1:10800");
        std::thread::sleep(std::time::Duration::from_millis(1));
        timer.success();

        let timer = RpcTimer::new("put", "node-2:10800");
        timer.error("connection");
    }

    #[test]
    fn test_recorders_without_exporter() {
        // Should not panic
        record_route("get", true);
        record_route("get", false);
        record_failover("put", "node-1:10800");
        record_stale_retry("put");
        record_partition_refresh(false);
        record_affinity_update(true, TopologyVersion::new(3, 1));
        record_connection_pool_size(2);
    }
}
