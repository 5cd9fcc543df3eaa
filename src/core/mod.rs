/// Core abstractions shared by the balancer, health monitor and storage tiers
pub mod record;
pub mod registry;

pub use record::{Record, RecordStatus};
pub use registry::{NodePool, NodeRegistry};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Opaque string-keyed metadata carried by nodes and records
pub type Metadata = HashMap<String, serde_json::Value>;

/// A cluster member the load balancer may route to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    /// Relative selection frequency for weighted strategies; 0 removes the
    /// node from weighted rotation.
    pub weight: u32,
    pub max_connections: u32,
    /// Probe address; `None` means the node is always considered healthy
    pub health_check_target: Option<String>,
    /// Written only by the health monitor
    pub healthy: bool,
    pub last_health_check: SystemTime,
    pub active_connections: u64,
    pub total_requests: u64,
    pub total_response_time: Duration,
    /// Shared by probe failures and failed requests
    pub error_count: u64,
    pub metadata: Metadata,
}

impl Node {
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            weight: 1,
            max_connections: 100,
            health_check_target: None,
            healthy: true,
            last_health_check: SystemTime::now(),
            active_connections: 0,
            total_requests: 0,
            total_response_time: Duration::ZERO,
            error_count: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_health_check_target<S: Into<String>>(mut self, target: S) -> Self {
        self.health_check_target = Some(target.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// `host:port` of the node
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Mean response time over completed requests, `None` before the first one
    pub fn avg_response_time(&self) -> Option<Duration> {
        if self.total_requests == 0 {
            None
        } else {
            let nanos = self.total_response_time.as_nanos() / u128::from(self.total_requests);
            Some(Duration::from_nanos(nanos as u64))
        }
    }

    /// Merge an explicit partial update into this node
    pub fn apply(&mut self, update: NodeUpdate) {
        if let Some(host) = update.host {
            self.host = host;
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(weight) = update.weight {
            self.weight = weight;
        }
        if let Some(max_connections) = update.max_connections {
            self.max_connections = max_connections;
        }
        if let Some(target) = update.health_check_target {
            self.health_check_target = target;
        }
        if let Some(active) = update.active_connections {
            self.active_connections = active;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
    }
}

/// Partial update of the caller-mutable node fields.
///
/// Health state and request counters are absent on purpose: they belong to
/// the health monitor and to request outcome recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub weight: Option<u32>,
    pub max_connections: Option<u32>,
    /// `Some(None)` clears the probe target
    pub health_check_target: Option<Option<String>>,
    pub active_connections: Option<u64>,
    pub metadata: Option<Metadata>,
}

impl NodeUpdate {
    pub fn weight(weight: u32) -> Self {
        Self {
            weight: Some(weight),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-request information a caller may hand to node selection
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    pub user_agent: String,
    pub request_type: String,
    pub priority: i32,
}
