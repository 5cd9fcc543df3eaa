/// Load balancer over the node registry
///
/// The balancer owns the node pool and starts the health monitor that
/// shares it. Selection only ever considers nodes the monitor last saw
/// healthy.
pub mod manager;
pub mod strategy;

pub use manager::NodeManager;
pub use strategy::{SelectionAlgorithm, Strategy};

use crate::config::HealthConfig;
use crate::core::{Node, NodePool, NodeRegistry, NodeUpdate, RequestContext};
use crate::error::CoreResult;
use crate::health::{HealthChecker, HealthMonitor, MonitorSettings, TargetHealthChecker};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Per-node view reported in cluster status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub healthy: bool,
    pub active_connections: u64,
    pub total_requests: u64,
    pub error_count: u64,
    /// 0 when the node has served no requests
    pub avg_response_time_ms: f64,
    pub last_health_check: SystemTime,
}

impl From<&Node> for NodeStats {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.node_id.clone(),
            host: node.host.clone(),
            port: node.port,
            weight: node.weight,
            healthy: node.healthy,
            active_connections: node.active_connections,
            total_requests: node.total_requests,
            error_count: node.error_count,
            avg_response_time_ms: node
                .avg_response_time()
                .map_or(0.0, |avg| avg.as_secs_f64() * 1000.0),
            last_health_check: node.last_health_check,
        }
    }
}

/// Aggregate cluster view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStatus {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub strategy: Strategy,
    pub nodes: Vec<NodeStats>,
}

pub struct LoadBalancer {
    pool: NodePool,
    strategy: Strategy,
    algorithm: Box<dyn SelectionAlgorithm>,
    monitor: HealthMonitor,
}

impl LoadBalancer {
    /// Build a balancer probing nodes over HTTP/TCP.
    ///
    /// Starts the health monitor, so it must be called within a tokio runtime.
    /// Health timings the monitor cannot run with are a configuration error.
    pub fn new(strategy: Strategy, health: &HealthConfig) -> CoreResult<Self> {
        health.validate()?;
        let settings = MonitorSettings::from(health);
        let checker = Arc::new(TargetHealthChecker::new(settings.probe_timeout)?);
        Ok(Self::with_health_checker(strategy, checker, settings))
    }

    /// Build a balancer with a custom health checker.
    ///
    /// Zero durations in `settings` fall back to the monitor defaults.
    pub fn with_health_checker(
        strategy: Strategy,
        checker: Arc<dyn HealthChecker>,
        settings: MonitorSettings,
    ) -> Self {
        let pool = NodeRegistry::new().into_pool();
        let monitor = HealthMonitor::spawn(pool.clone(), checker, settings);

        info!("Load balancer started with strategy {}", strategy);

        Self {
            pool,
            strategy,
            algorithm: strategy.build_algorithm(),
            monitor,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Shared handle to the node registry
    pub fn pool(&self) -> NodePool {
        self.pool.clone()
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Insert or overwrite a node by id
    pub async fn add_node(&self, node: Node) {
        let node_id = node.node_id.clone();
        let replaced = self.pool.write().await.insert(node);
        if replaced.is_some() {
            info!("Node {} re-registered", node_id);
        } else {
            info!("Node {} registered", node_id);
        }
    }

    pub async fn remove_node(&self, node_id: &str) -> bool {
        let existed = self.pool.write().await.remove(node_id).is_some();
        if existed {
            info!("Node {} unregistered", node_id);
        }
        existed
    }

    /// Apply a partial update; false when the node is absent
    pub async fn update_node(&self, node_id: &str, update: NodeUpdate) -> bool {
        self.pool.write().await.update(node_id, update)
    }

    pub async fn get_node(&self, node_id: &str) -> Option<Node> {
        self.pool.read().await.get(node_id).cloned()
    }

    pub async fn all_nodes(&self) -> Vec<Node> {
        self.pool.read().await.snapshot()
    }

    pub async fn get_healthy_nodes(&self) -> Vec<Node> {
        self.pool.read().await.healthy()
    }

    /// Pick a healthy node with the configured strategy.
    ///
    /// `None` means no node is available, not a transient error.
    pub async fn select_node(&self, context: Option<&RequestContext>) -> Option<Node> {
        let registry = self.pool.read().await;
        let healthy: Vec<&Node> = registry.iter().filter(|n| n.healthy).collect();
        if healthy.is_empty() {
            debug!("No healthy node available");
            return None;
        }

        let candidates: Vec<Node> = healthy.into_iter().cloned().collect();
        let index = self.algorithm.select(&candidates)?;
        let node = candidates.into_iter().nth(index)?;

        if let Some(context) = context {
            debug!(
                "Selected node {} for request {}",
                node.node_id, context.request_id
            );
        }

        Some(node)
    }

    /// Count a request dispatched to the node
    pub async fn record_request_start(&self, node_id: &str) -> bool {
        match self.pool.write().await.get_mut(node_id) {
            Some(node) => {
                node.active_connections += 1;
                true
            }
            None => false,
        }
    }

    /// Feed a completed request back into the node's statistics.
    ///
    /// Success releases one active connection; failure counts an error and
    /// leaves the connection count alone.
    pub async fn record_request_outcome(
        &self,
        node_id: &str,
        response_time: Duration,
        success: bool,
    ) -> bool {
        let mut registry = self.pool.write().await;
        let Some(node) = registry.get_mut(node_id) else {
            return false;
        };

        node.total_requests += 1;
        node.total_response_time += response_time;
        if success {
            node.active_connections = node.active_connections.saturating_sub(1);
        } else {
            node.error_count += 1;
        }
        true
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        let registry = self.pool.read().await;
        ClusterStatus {
            total_nodes: registry.len(),
            healthy_nodes: registry.healthy_count(),
            strategy: self.strategy,
            nodes: registry.iter().map(NodeStats::from).collect(),
        }
    }

    /// Stop the health monitor; safe to call more than once
    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::error::CoreError;
    use crate::health::HealthStatus;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    struct AlwaysHealthy;

    /// Blocks every check until released
    #[derive(Default)]
    struct GatedChecker {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl HealthChecker for GatedChecker {
        async fn check_health(&self, _target: &str) -> HealthStatus {
            self.started.notify_one();
            self.release.notified().await;
            HealthStatus::Healthy
        }
    }

    #[async_trait]
    impl HealthChecker for AlwaysHealthy {
        async fn check_health(&self, _target: &str) -> HealthStatus {
            HealthStatus::Healthy
        }
    }

    fn test_settings() -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(3600),
            probe_timeout: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Balancer whose monitor is already stopped, so health flags set by a
    /// test are never overwritten by a probe cycle
    async fn balancer_with(strategy: Strategy, checker: Arc<dyn HealthChecker>) -> LoadBalancer {
        let lb = LoadBalancer::with_health_checker(strategy, checker, test_settings());
        lb.monitor().shutdown().await;
        lb
    }

    async fn balancer(strategy: Strategy) -> LoadBalancer {
        balancer_with(strategy, Arc::new(AlwaysHealthy)).await
    }

    async fn mark_unhealthy(lb: &LoadBalancer, node_id: &str) {
        lb.pool().write().await.get_mut(node_id).unwrap().healthy = false;
    }

    async fn picks(lb: &LoadBalancer, n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(lb.select_node(None).await.unwrap().node_id);
        }
        out
    }

    #[tokio::test]
    async fn test_round_robin_fairness() {
        let lb = balancer(Strategy::RoundRobin).await;
        for id in ["a", "b", "c"] {
            lb.add_node(Node::new(id, "10.0.0.1", 8080)).await;
        }

        let sequence = picks(&lb, 9).await;
        assert_eq!(sequence, vec!["a", "b", "c", "a", "b", "c", "a", "b", "c"]);
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_round_robin_skips_unhealthy() {
        let lb = balancer(Strategy::RoundRobin).await;
        lb.add_node(Node::new("A", "10.0.0.1", 8080)).await;
        lb.add_node(Node::new("B", "10.0.0.2", 8080)).await;

        assert_eq!(picks(&lb, 4).await, vec!["A", "B", "A", "B"]);

        mark_unhealthy(&lb, "A").await;
        assert_eq!(picks(&lb, 3).await, vec!["B", "B", "B"]);
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_weighted_distribution() {
        let lb = balancer(Strategy::WeightedRoundRobin).await;
        lb.add_node(Node::new("light", "10.0.0.1", 8080).with_weight(1)).await;
        lb.add_node(Node::new("heavy", "10.0.0.2", 8080).with_weight(3)).await;

        let sequence = picks(&lb, 16).await;
        let light = sequence.iter().filter(|id| *id == "light").count();
        let heavy = sequence.iter().filter(|id| *id == "heavy").count();
        assert_eq!((light, heavy), (4, 12));
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_gating_for_every_strategy() {
        for strategy in [
            Strategy::RoundRobin,
            Strategy::Random,
            Strategy::LeastConnections,
            Strategy::WeightedRoundRobin,
            Strategy::LeastResponseTime,
        ] {
            let lb = balancer(strategy).await;
            lb.add_node(Node::new("down", "10.0.0.1", 8080).with_weight(5)).await;
            lb.add_node(Node::new("up", "10.0.0.2", 8080)).await;
            mark_unhealthy(&lb, "down").await;

            for id in picks(&lb, 10).await {
                assert_eq!(id, "up", "{} returned an unhealthy node", strategy);
            }
            let healthy = lb.get_healthy_nodes().await;
            assert_eq!(healthy.len(), 1);
            assert_eq!(healthy[0].node_id, "up");
            lb.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_least_connections_selection() {
        let lb = balancer(Strategy::LeastConnections).await;
        for (id, connections) in [("a", 5), ("b", 5), ("c", 2)] {
            lb.add_node(Node::new(id, "10.0.0.1", 8080)).await;
            lb.update_node(
                id,
                NodeUpdate {
                    active_connections: Some(connections),
                    ..Default::default()
                },
            )
            .await;
        }

        for id in picks(&lb, 5).await {
            assert_eq!(id, "c");
        }
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_healthy_node() {
        let lb = balancer(Strategy::RoundRobin).await;
        assert!(lb.select_node(None).await.is_none());

        lb.add_node(Node::new("a", "10.0.0.1", 8080)).await;
        mark_unhealthy(&lb, "a").await;
        assert!(lb.select_node(Some(&RequestContext::default())).await.is_none());
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_accounting() {
        let lb = balancer(Strategy::LeastResponseTime).await;
        lb.add_node(Node::new("a", "10.0.0.1", 8080)).await;

        assert!(lb.record_request_start("a").await);
        assert!(lb.record_request_start("a").await);
        assert!(lb.record_request_outcome("a", Duration::from_millis(100), true).await);
        assert!(lb.record_request_outcome("a", Duration::from_millis(300), false).await);

        let node = lb.get_node("a").await.unwrap();
        assert_eq!(node.total_requests, 2);
        assert_eq!(node.active_connections, 1);
        assert_eq!(node.error_count, 1);
        assert_eq!(node.avg_response_time(), Some(Duration::from_millis(200)));

        // Floors at zero
        lb.record_request_outcome("a", Duration::from_millis(10), true).await;
        lb.record_request_outcome("a", Duration::from_millis(10), true).await;
        assert_eq!(lb.get_node("a").await.unwrap().active_connections, 0);

        assert!(!lb.record_request_outcome("missing", Duration::ZERO, true).await);
        assert!(!lb.record_request_start("missing").await);
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_least_response_time_ignores_untested_nodes() {
        let lb = balancer(Strategy::LeastResponseTime).await;
        lb.add_node(Node::new("fresh", "10.0.0.1", 8080)).await;
        lb.add_node(Node::new("seasoned", "10.0.0.2", 8080)).await;
        lb.record_request_outcome("seasoned", Duration::from_secs(2), true).await;

        for id in picks(&lb, 5).await {
            assert_eq!(id, "seasoned");
        }
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_remove_update() {
        let lb = balancer(Strategy::RoundRobin).await;
        lb.add_node(Node::new("a", "10.0.0.1", 8080)).await;
        lb.add_node(Node::new("a", "10.0.0.9", 9090)).await;
        assert_eq!(lb.all_nodes().await.len(), 1);
        assert_eq!(lb.get_node("a").await.unwrap().port, 9090);

        assert!(lb.update_node("a", NodeUpdate::weight(7)).await);
        assert_eq!(lb.get_node("a").await.unwrap().weight, 7);
        assert!(!lb.update_node("zz", NodeUpdate::weight(7)).await);

        assert!(lb.remove_node("a").await);
        assert!(!lb.remove_node("a").await);
        assert!(lb.get_node("a").await.is_none());
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_cluster_status() {
        let lb = balancer(Strategy::WeightedRoundRobin).await;
        lb.add_node(Node::new("a", "10.0.0.1", 8080)).await;
        lb.add_node(Node::new("b", "10.0.0.2", 8080)).await;
        mark_unhealthy(&lb, "b").await;
        lb.record_request_outcome("a", Duration::from_millis(50), true).await;

        let status = lb.cluster_status().await;
        assert_eq!(status.total_nodes, 2);
        assert_eq!(status.healthy_nodes, 1);
        assert_eq!(status.strategy, Strategy::WeightedRoundRobin);
        assert_eq!(status.nodes[0].avg_response_time_ms, 50.0);
        assert_eq!(status.nodes[1].avg_response_time_ms, 0.0);
        assert!(!status.nodes[1].healthy);
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_unusable_health_timings() {
        for health in [
            HealthConfig { interval_sec: 0, ..Default::default() },
            HealthConfig { timeout_sec: 0, ..Default::default() },
            HealthConfig { shutdown_timeout_sec: 0, ..Default::default() },
            HealthConfig { interval_sec: 5, timeout_sec: 5, ..Default::default() },
        ] {
            let result = LoadBalancer::new(Strategy::RoundRobin, &health);
            assert!(
                matches!(result, Err(CoreError::Config(ConfigError::ValidationError(_)))),
                "accepted {:?}",
                health
            );
        }

        let lb = LoadBalancer::new(Strategy::RoundRobin, &HealthConfig::default()).unwrap();
        assert!(lb.monitor().is_running().await);
        lb.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_keeps_monitor_alive() {
        let lb = LoadBalancer::with_health_checker(
            Strategy::RoundRobin,
            Arc::new(AlwaysHealthy),
            MonitorSettings {
                interval: Duration::ZERO,
                ..test_settings()
            },
        );
        lb.add_node(Node::new("a", "10.0.0.1", 8080).with_health_check_target("tcp://10.0.0.1:8080"))
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(lb.monitor().is_running().await);
        assert_eq!(lb.monitor().settings().interval, MonitorSettings::default().interval);
        lb.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_health_check_does_not_block_callers() {
        let gate = Arc::new(GatedChecker::default());
        let lb = Arc::new(balancer_with(Strategy::LeastConnections, gate.clone()).await);
        lb.add_node(Node::new("a", "10.0.0.1", 8080).with_health_check_target("http://10.0.0.1/health"))
            .await;

        let cycle = tokio::spawn({
            let lb = lb.clone();
            async move { lb.monitor().check_now().await }
        });
        gate.started.notified().await;

        // The health check for "a" is in flight and will not finish until released
        let quick = Duration::from_secs(1);
        let picked = timeout(quick, lb.select_node(None)).await.unwrap();
        assert_eq!(picked.unwrap().node_id, "a");
        timeout(quick, lb.add_node(Node::new("b", "10.0.0.2", 8080))).await.unwrap();
        assert!(timeout(quick, lb.record_request_start("a")).await.unwrap());
        assert!(timeout(quick, lb.record_request_outcome("a", Duration::from_millis(20), true))
            .await
            .unwrap());
        assert_eq!(timeout(quick, lb.cluster_status()).await.unwrap().total_nodes, 2);
        assert!(!cycle.is_finished());

        gate.release.notify_one();
        let results = cycle.await.unwrap();
        // "b" joined after the cycle took its snapshot
        assert_eq!(results, vec![("a".to_string(), HealthStatus::Healthy)]);
        lb.shutdown().await;
    }
}
