/// Node management facade over the load balancer
use super::{ClusterStatus, LoadBalancer};
use crate::core::{Metadata, Node, NodeUpdate};
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;

/// Registration-oriented view of the balancer; holds no state of its own.
///
/// Absent nodes are reported as `NotFound` here rather than as `false`.
#[derive(Clone)]
pub struct NodeManager {
    balancer: Arc<LoadBalancer>,
}

impl NodeManager {
    pub fn new(balancer: Arc<LoadBalancer>) -> Self {
        Self { balancer }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Build a node from its fields and add it, overwriting any node with the same id
    pub async fn register(
        &self,
        node_id: &str,
        host: &str,
        port: u16,
        weight: u32,
        health_check_target: Option<String>,
        metadata: Metadata,
    ) -> Node {
        let mut node = Node::new(node_id, host, port)
            .with_weight(weight)
            .with_metadata(metadata);
        node.health_check_target = health_check_target;

        self.balancer.add_node(node.clone()).await;
        node
    }

    pub async fn unregister(&self, node_id: &str) -> CoreResult<()> {
        if self.balancer.remove_node(node_id).await {
            Ok(())
        } else {
            Err(CoreError::node_not_found(node_id))
        }
    }

    pub async fn update_weight(&self, node_id: &str, weight: u32) -> CoreResult<()> {
        self.update(node_id, NodeUpdate::weight(weight)).await
    }

    pub async fn update(&self, node_id: &str, update: NodeUpdate) -> CoreResult<()> {
        if self.balancer.update_node(node_id, update).await {
            Ok(())
        } else {
            Err(CoreError::node_not_found(node_id))
        }
    }

    pub async fn get_node(&self, node_id: &str) -> CoreResult<Node> {
        self.balancer
            .get_node(node_id)
            .await
            .ok_or_else(|| CoreError::node_not_found(node_id))
    }

    pub async fn list_nodes(&self, healthy_only: bool) -> Vec<Node> {
        if healthy_only {
            self.balancer.get_healthy_nodes().await
        } else {
            self.balancer.all_nodes().await
        }
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        self.balancer.cluster_status().await
    }
}
