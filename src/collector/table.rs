use std::sync::Arc;

use dashmap::DashMap;

use crate::node::{NodeRegistry, NodeStatus};

/// Latest known status per node name.
///
/// Cloning yields another handle onto the same table. Values are replaced
/// whole under the shard lock of their key, so a reader sees either the
/// previous status or the new one, never a mix. Writers for different
/// names only contend when their names hash to the same shard.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    inner: Arc<DashMap<String, NodeStatus>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, status: NodeStatus) {
        self.inner.insert(name.to_string(), status);
    }

    pub fn get(&self, name: &str) -> Option<NodeStatus> {
        self.inner.get(name).map(|entry| entry.value().clone())
    }

    /// Statuses in registry order. Nodes that have not reported yet are
    /// left out rather than represented by an empty status.
    ///
    /// Each entry is read independently, so two entries may come from
    /// polls that finished at slightly different times.
    pub fn snapshot_ordered(&self, registry: &NodeRegistry) -> Vec<NodeStatus> {
        registry.iter().filter_map(|node| self.get(&node.name)).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
