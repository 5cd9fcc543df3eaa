/// Node registry shared between the load balancer and the health monitor
use super::{Node, NodeUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Node pool shared by the balancer (owner) and the health monitor
pub type NodePool = Arc<RwLock<NodeRegistry>>;

/// Mapping of node id to node state.
///
/// Iteration follows registration order; re-registering an existing id keeps
/// its original position.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_pool(self) -> NodePool {
        Arc::new(RwLock::new(self))
    }

    /// Insert or overwrite by node id, returning the replaced node
    pub fn insert(&mut self, node: Node) -> Option<Node> {
        let node_id = node.node_id.clone();
        let previous = self.nodes.insert(node_id.clone(), node);
        if previous.is_none() {
            self.order.push(node_id);
        }
        previous
    }

    pub fn remove(&mut self, node_id: &str) -> Option<Node> {
        let removed = self.nodes.remove(node_id);
        if removed.is_some() {
            self.order.retain(|id| id != node_id);
        }
        removed
    }

    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Apply a partial update; false when the node is absent
    pub fn update(&mut self, node_id: &str, update: NodeUpdate) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.apply(update);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Snapshot of all nodes
    pub fn snapshot(&self) -> Vec<Node> {
        self.iter().cloned().collect()
    }

    /// Snapshot of the healthy nodes
    pub fn healthy(&self) -> Vec<Node> {
        self.iter().filter(|n| n.healthy).cloned().collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.iter().filter(|n| n.healthy).count()
    }
}
