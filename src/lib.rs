/// Votier - cluster coordination and tiered record storage
///
/// Two halves share one process-wide `Config`:
/// 1. Cluster coordination: a node registry, a load balancer with pluggable
///    selection strategies, and a background health monitor probing nodes.
/// 2. Record storage: a memory, remote KV or file primary, backed by a file
///    tier that repairs the primary on read.
///
/// `Coordinator` builds both from configuration and owns their lifecycle.
pub mod balancer;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod records;
pub mod storage;
pub mod utils;

use crate::balancer::{LoadBalancer, NodeManager};
use crate::config::Config;
use crate::core::{Metadata, Node};
use crate::error::CoreResult;
use crate::records::{EmbeddingService, RecordService};
use crate::storage::TieredStorage;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Running coordination core built from one configuration
pub struct Coordinator {
    config: Config,
    storage: Arc<TieredStorage>,
    balancer: Arc<LoadBalancer>,
    nodes: NodeManager,
    records: RecordService,
    self_node_id: OnceLock<String>,
}

impl Coordinator {
    /// Validate `config`, open storage, start the balancer and its health
    /// monitor, and register the statically configured nodes.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(config: &Config) -> CoreResult<Self> {
        config.validate()?;

        let storage = Arc::new(TieredStorage::from_config(&config.storage).await?);
        let balancer = Arc::new(LoadBalancer::new(config.balancer.strategy, &config.health)?);
        let nodes = NodeManager::new(balancer.clone());
        let records = RecordService::new(storage.clone());

        for node in &config.cluster.nodes {
            nodes
                .register(
                    &node.node_id,
                    &node.host,
                    node.port,
                    node.weight,
                    node.health_check_target.clone(),
                    Metadata::new(),
                )
                .await;
        }

        info!(
            "Coordinator started: storage={} strategy={} static_nodes={}",
            config.storage.storage_type,
            config.balancer.strategy,
            config.cluster.nodes.len()
        );

        Ok(Self {
            config: config.clone(),
            storage,
            balancer,
            nodes,
            records,
            self_node_id: OnceLock::new(),
        })
    }

    /// Attach the embedding collaborator used by audio operations
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.records = RecordService::new(self.storage.clone()).with_embedder(embedder);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<TieredStorage> {
        &self.storage
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn nodes(&self) -> &NodeManager {
        &self.nodes
    }

    pub fn records(&self) -> &RecordService {
        &self.records
    }

    /// Id this instance registered itself under, if it has
    pub fn self_node_id(&self) -> Option<&str> {
        self.self_node_id.get().map(String::as_str)
    }

    /// Register this instance as a node probed on its `/health` endpoint.
    ///
    /// The id is generated once; calling again re-registers under the same id.
    pub async fn register_self(&self) -> Node {
        let node_id = self.self_node_id.get_or_init(utils::generate_node_id);
        let server = &self.config.server;

        let mut metadata = Metadata::new();
        metadata.insert("self".to_string(), serde_json::Value::Bool(true));

        let node = self
            .nodes
            .register(
                node_id,
                &server.host,
                server.port,
                1,
                Some(utils::health_url(&server.host, server.port)),
                metadata,
            )
            .await;

        info!("Registered self as {} at {}", node.node_id, node.address());
        node
    }

    /// Stop background work; safe to call more than once
    pub async fn shutdown(&self) {
        self.balancer.shutdown().await;
        info!("Coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticNodeConfig;
    use crate::storage::StorageType;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.file_path = dir.path().to_string_lossy().to_string();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 18080;
        config.cluster.nodes = vec![StaticNodeConfig {
            node_id: "worker-1".to_string(),
            host: "10.0.1.10".to_string(),
            port: 8080,
            weight: 2,
            health_check_target: None,
        }];
        config
    }

    #[tokio::test]
    async fn test_start_registers_static_nodes() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::start(&test_config(&dir)).await.unwrap();

        let node = coordinator.nodes().get_node("worker-1").await.unwrap();
        assert_eq!(node.weight, 2);
        assert_eq!(coordinator.storage().storage_type(), StorageType::Memory);

        coordinator.shutdown().await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_self() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::start(&test_config(&dir)).await.unwrap();
        assert!(coordinator.self_node_id().is_none());

        let node = coordinator.register_self().await;
        assert!(node.node_id.starts_with("node_"));
        assert_eq!(
            node.health_check_target.as_deref(),
            Some("http://127.0.0.1:18080/health")
        );
        assert_eq!(node.metadata["self"], serde_json::Value::Bool(true));

        let again = coordinator.register_self().await;
        assert_eq!(again.node_id, node.node_id);
        assert_eq!(coordinator.nodes().list_nodes(false).await.len(), 2);
        assert_eq!(coordinator.self_node_id(), Some(node.node_id.as_str()));

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_records_flow_through_storage_tiers() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::start(&test_config(&dir)).await.unwrap();

        let key = coordinator
            .records()
            .register("Alice", vec![0.6, 0.8], Metadata::new(), None)
            .await
            .unwrap();
        assert!(dir.path().join(format!("{}.json", key)).exists());

        let result = coordinator.records().verify(&[0.6, 0.8], 0.9, None).await;
        assert_eq!(result.matched_key.as_deref(), Some(key.as_str()));
        assert!(result.is_verified);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.health.timeout_sec = config.health.interval_sec;

        let result = Coordinator::start(&config).await;
        assert!(matches!(result, Err(crate::error::CoreError::Config(_))));
    }
}
