//! NodeStore collaborator: persistence seam for node records
//!
//! The store is the only shared mutable resource in the core. All mutations
//! are per-node partial updates keyed by record id; reconciliation and
//! health sweeps each touch only the single node named by their trigger, so
//! no cross-node locking exists. Concurrent writes to the same node resolve
//! last-write-wins at the store layer.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[cfg(test)]
use mockall::automock;

use crate::node::{Node, NodePatch, NodeStatus};
use crate::Error;

/// Persistence seam for node records.
///
/// Name-based lookups only see non-deleted records; soft-deleted records
/// stay addressable by id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Find the non-deleted node with the given name in the given cluster
    async fn find_by_name_and_cluster(
        &self,
        name: &str,
        cluster: &str,
    ) -> Result<Option<Node>, Error>;

    /// All non-deleted nodes of a cluster
    async fn find_by_cluster(&self, cluster: &str) -> Result<Vec<Node>, Error>;

    /// Persist a node, assigning an id on first save
    async fn save(&self, node: Node) -> Result<Node, Error>;

    /// Apply a partial update; `None` if the target no longer exists
    async fn partial_update(&self, patch: NodePatch) -> Result<Option<Node>, Error>;

    /// Update only the status field
    async fn update_status(&self, id: u64, status: NodeStatus) -> Result<(), Error>;

    /// Update only the last-start-time field
    async fn update_start_time(&self, id: u64, at: DateTime<Utc>) -> Result<(), Error>;
}

/// In-memory store used by the default wiring and tests.
///
/// Fleet inventories are small (hundreds of nodes), so queries scan.
#[derive(Default)]
pub struct InMemoryNodeStore {
    nodes: DashMap<u64, Node>,
    next_id: AtomicU64,
}

impl InMemoryNodeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of records, soft-deleted included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn apply_patch(node: &mut Node, patch: NodePatch) {
    if let Some(name) = patch.internal_name {
        node.internal_name = name;
    }
    if let Some(name) = patch.display_name {
        node.display_name = name;
    }
    if let Some(resources) = patch.resources {
        node.resources = resources;
    }
    if let Some(conditions) = patch.conditions {
        node.conditions = conditions;
    }
    if let Some(network) = patch.network {
        node.network = network;
    }
    if let Some(platform) = patch.platform {
        node.platform = platform;
    }
    if let Some(kind) = patch.kind {
        node.kind = kind;
    }
    if let Some(compute_type) = patch.compute_type {
        node.compute_type = compute_type;
    }
    if let Some(datacenter) = patch.datacenter {
        node.datacenter = datacenter;
    }
    if let Some(ray_cluster) = patch.ray_cluster {
        node.ray_cluster = ray_cluster;
    }
    if let Some(deleted) = patch.deleted {
        node.deleted = deleted;
    }
    if let Some(entry) = patch.append_history {
        node.history.push(entry);
    }
    node.last_updated = Utc::now();
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn find_by_name_and_cluster(
        &self,
        name: &str,
        cluster: &str,
    ) -> Result<Option<Node>, Error> {
        Ok(self
            .nodes
            .iter()
            .find(|entry| {
                let node = entry.value();
                !node.deleted && node.internal_name == name && node.cluster == cluster
            })
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_cluster(&self, cluster: &str) -> Result<Vec<Node>, Error> {
        Ok(self
            .nodes
            .iter()
            .filter(|entry| !entry.value().deleted && entry.value().cluster == cluster)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn save(&self, mut node: Node) -> Result<Node, Error> {
        if node.id == 0 {
            node.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        node.last_updated = Utc::now();
        self.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn partial_update(&self, patch: NodePatch) -> Result<Option<Node>, Error> {
        match self.nodes.get_mut(&patch.id) {
            Some(mut entry) => {
                apply_patch(entry.value_mut(), patch);
                Ok(Some(entry.value().clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_status(&self, id: u64, status: NodeStatus) -> Result<(), Error> {
        match self.nodes.get_mut(&id) {
            Some(mut entry) => {
                entry.value_mut().status = status;
                entry.value_mut().last_updated = Utc::now();
                Ok(())
            }
            None => Err(Error::store(format!("node {} not found", id))),
        }
    }

    async fn update_start_time(&self, id: u64, at: DateTime<Utc>) -> Result<(), Error> {
        match self.nodes.get_mut(&id) {
            Some(mut entry) => {
                entry.value_mut().last_start_time = Some(at);
                Ok(())
            }
            None => Err(Error::store(format!("node {} not found", id))),
        }
    }
}
