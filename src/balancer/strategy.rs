/// Node selection algorithms
use crate::config::ConfigError;
use crate::core::Node;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Selection algorithm trait.
///
/// Receives the healthy nodes only, in registry order, and returns the
/// index of the chosen one.
pub trait SelectionAlgorithm: Send + Sync {
    fn select(&self, nodes: &[Node]) -> Option<usize>;
}

/// Configured selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
    WeightedRoundRobin,
    LeastResponseTime,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
            Strategy::LeastConnections => "least_connections",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::LeastResponseTime => "least_response_time",
        }
    }

    /// Build a fresh algorithm instance with its own counter state
    pub fn build_algorithm(&self) -> Box<dyn SelectionAlgorithm> {
        match self {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::Random => Box::new(Random),
            Strategy::LeastConnections => Box::new(LeastConnections),
            Strategy::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
            Strategy::LeastResponseTime => Box::new(LeastResponseTime),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            "least_connections" => Ok(Strategy::LeastConnections),
            "weighted_round_robin" => Ok(Strategy::WeightedRoundRobin),
            "least_response_time" => Ok(Strategy::LeastResponseTime),
            _ => Err(ConfigError::ValidationError(format!(
                "Unknown load balancing strategy: {}",
                s
            ))),
        }
    }
}

/// Round-robin over the healthy set.
///
/// The counter is never reset, so the starting point drifts when the
/// healthy set changes size between calls.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionAlgorithm for RoundRobin {
    fn select(&self, nodes: &[Node]) -> Option<usize> {
        if nodes.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Some(index)
    }
}

/// Uniform random pick
pub struct Random;

impl SelectionAlgorithm for Random {
    fn select(&self, nodes: &[Node]) -> Option<usize> {
        if nodes.is_empty() {
            return None;
        }

        Some(rand::thread_rng().gen_range(0..nodes.len()))
    }
}

/// Fewest active connections; the earliest registered node wins ties
pub struct LeastConnections;

impl SelectionAlgorithm for LeastConnections {
    fn select(&self, nodes: &[Node]) -> Option<usize> {
        nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, node)| node.active_connections)
            .map(|(index, _)| index)
    }
}

/// Round-robin over a virtual sequence where each node appears `weight`
/// times; zero-weight nodes never appear
pub struct WeightedRoundRobin {
    counter: AtomicUsize,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionAlgorithm for WeightedRoundRobin {
    fn select(&self, nodes: &[Node]) -> Option<usize> {
        if nodes.is_empty() {
            return None;
        }

        let total_weight: u64 = nodes.iter().map(|n| u64::from(n.weight)).sum();
        if total_weight == 0 {
            // Empty virtual sequence: first healthy node
            return Some(0);
        }

        let position = self.counter.fetch_add(1, Ordering::Relaxed) as u64 % total_weight;
        let mut current_weight = 0;

        for (index, node) in nodes.iter().enumerate() {
            current_weight += u64::from(node.weight);
            if position < current_weight {
                return Some(index);
            }
        }

        Some(0)
    }
}

/// Lowest mean response time.
///
/// A node with no completed requests counts as infinitely slow, so it is
/// only chosen when no node has any history.
pub struct LeastResponseTime;

impl SelectionAlgorithm for LeastResponseTime {
    fn select(&self, nodes: &[Node]) -> Option<usize> {
        nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, node)| match node.avg_response_time() {
                Some(avg) => (false, avg),
                None => (true, Duration::ZERO),
            })
            .map(|(index, _)| index)
    }
}
