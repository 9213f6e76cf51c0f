//! # Node Routing
//!
//! The engine only needs to know which node owns a key. Topology discovery and node
//! health are maintained elsewhere; this module defines the [`Router`] seam the
//! engine consumes and a [`StaticRouter`] for fixed topologies and tests.

use crate::constants::ResultCode;
use crate::error::{ClientError, ErrorKind};
use crate::policy::BatchPolicy;
use crate::types::Key;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Protocol features advertised by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeFeatures {
    /// Node accepts consolidated multi-namespace batch requests
    pub batch_index: bool,
}

impl Default for NodeFeatures {
    fn default() -> Self {
        Self { batch_index: true }
    }
}

/// Cluster node a command can be sent to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub name: String,
    pub address: String,
    pub features: NodeFeatures,
}

impl Node {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            features: NodeFeatures::default(),
        }
    }

    /// Node that only speaks the one-namespace-per-call batch protocol
    pub fn legacy(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            features: NodeFeatures { batch_index: false },
            ..Self::new(name, address)
        }
    }

    /// Whether a batch for this node can carry keys from several namespaces
    pub fn supports_consolidated_batch(&self, policy: &BatchPolicy) -> bool {
        self.features.batch_index && !policy.use_batch_direct
    }
}

/// Resolves key ownership
pub trait Router: Send + Sync + Debug {
    /// Node owning `key`
    fn resolve_node(&self, key: &Key) -> Result<Arc<Node>, ClientError>;

    /// Group key offsets by owning node, preserving first-seen node order and key
    /// order within each group
    fn partition_by_node(&self, keys: &[Key]) -> Result<Vec<(Arc<Node>, Vec<usize>)>, ClientError> {
        let mut groups: Vec<(Arc<Node>, Vec<usize>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (offset, key) in keys.iter().enumerate() {
            let node = self.resolve_node(key)?;
            match index.get(&node.name) {
                Some(&group) => groups[group].1.push(offset),
                None => {
                    index.insert(node.name.clone(), groups.len());
                    groups.push((node, vec![offset]));
                }
            }
        }

        Ok(groups)
    }
}

/// Router over a fixed node list
///
/// Keys pinned with [`StaticRouter::pin`] always resolve to their pinned node; all
/// other keys are spread across the node list by hashing the key.
#[derive(Debug, Default)]
pub struct StaticRouter {
    nodes: Vec<Arc<Node>>,
    pins: HashMap<Key, usize>,
}

impl StaticRouter {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(Arc::new).collect(),
            pins: HashMap::new(),
        }
    }

    /// Route `key` to the node named `node_name`
    pub fn pin(mut self, key: Key, node_name: &str) -> Self {
        if let Some(position) = self.nodes.iter().position(|n| n.name == node_name) {
            self.pins.insert(key, position);
        }
        self
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }
}

impl Router for StaticRouter {
    fn resolve_node(&self, key: &Key) -> Result<Arc<Node>, ClientError> {
        if self.nodes.is_empty() {
            return Err(ClientError::new(
                ErrorKind::ServerUnavailable,
                ResultCode::INVALID_NODE_ERROR,
                "Cluster is empty",
            ));
        }

        let position = match self.pins.get(key) {
            Some(&position) => position,
            None => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.nodes.len() as u64) as usize
            }
        };

        Ok(Arc::clone(&self.nodes[position]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node_router() -> StaticRouter {
        StaticRouter::new(vec![
            Node::new("A", "10.0.0.1:3000"),
            Node::new("B", "10.0.0.2:3000"),
            Node::new("C", "10.0.0.3:3000"),
        ])
    }

    #[test]
    fn test_pinned_keys_resolve_to_their_node() {
        let key = Key::new("test", "users", 1);
        let router = three_node_router().pin(key.clone(), "C");

        assert_eq!(router.resolve_node(&key).unwrap().name, "C");
    }

    #[test]
    fn test_empty_cluster_is_an_invalid_node_error() {
        let router = StaticRouter::default();
        let error = router.resolve_node(&Key::new("test", "users", 1)).unwrap_err();

        assert_eq!(error.code(), ResultCode::INVALID_NODE_ERROR);
        assert_eq!(error.kind(), ErrorKind::ServerUnavailable);
    }

    #[test]
    fn test_partition_by_node_preserves_order() {
        let k1 = Key::new("test", "s", 1);
        let k2 = Key::new("test", "s", 2);
        let k3 = Key::new("test", "s", 3);
        let router = three_node_router()
            .pin(k1.clone(), "B")
            .pin(k2.clone(), "A")
            .pin(k3.clone(), "B");

        let groups = router
            .partition_by_node(&[k1, k2, k3.clone(), k3])
            .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.name, "B");
        assert_eq!(groups[0].1, vec![0, 2, 3]);
        assert_eq!(groups[1].0.name, "A");
        assert_eq!(groups[1].1, vec![1]);
    }

    #[test]
    fn test_legacy_nodes_do_not_support_consolidated_batches() {
        let policy = BatchPolicy::default();
        assert!(Node::new("A", "a").supports_consolidated_batch(&policy));
        assert!(!Node::legacy("B", "b").supports_consolidated_batch(&policy));

        let direct = BatchPolicy {
            use_batch_direct: true,
            ..BatchPolicy::default()
        };
        assert!(!Node::new("A", "a").supports_consolidated_batch(&direct));
    }
}
