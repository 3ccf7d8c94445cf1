//! Node inventory: record model, classification, reconciliation, health
//!
//! The [`Node`] record mirrors one Kubernetes node of one managed cluster.
//! Records are owned by the [`crate::store::NodeStore`]; this module defines
//! the record itself plus the two engines that mutate it: the event-driven
//! [`reconcile::NodeReconciler`] and the scheduled [`health::NodeHealthJob`].

pub mod classify;
pub mod health;
pub mod reconcile;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed health status of a node
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Registered but not yet (or no longer) confirmed healthy
    #[default]
    Pending,
    /// Reachable, kubelet healthy, system component alive
    Ready,
    /// Network-level ping fails
    NotReachable,
    /// Kubelet responds but the monitored system component is silent
    KubeletNotHealthy,
}

/// Kubernetes role of a node
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    /// Worker node
    #[default]
    Node,
    /// Control-plane node
    Master,
}

/// Derived device classification of a node
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    /// Regular datacenter/cloud node
    #[default]
    Node,
    /// Constrained edge device
    Edge,
}

/// Compute capability of a node
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputeType {
    /// CPU-only node
    #[default]
    Cpu,
    /// GPU-capable node
    Gpu,
}

/// The user owning a node, resolved through a reservation
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeOwner {
    /// User id
    pub user: String,
    /// Notification topic for this user
    pub topic: String,
}

/// Allocatable/capacity resource snapshot
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeResources {
    /// Allocatable CPU in millicores
    pub allocatable_cpu_millis: u64,
    /// Allocatable memory in bytes
    pub allocatable_memory_bytes: u64,
    /// Allocatable ephemeral storage in bytes
    pub allocatable_ephemeral_bytes: u64,
    /// CPU capacity in millicores
    pub capacity_cpu_millis: u64,
    /// Memory capacity in bytes
    pub capacity_memory_bytes: u64,
    /// Ephemeral storage capacity in bytes
    pub capacity_ephemeral_bytes: u64,
}

/// Node condition snapshot; absent conditions default to `false`
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConditions {
    /// MemoryPressure condition is true
    pub memory_pressure: bool,
    /// DiskPressure condition is true
    pub disk_pressure: bool,
    /// PIDPressure condition is true
    pub pid_pressure: bool,
    /// Ready condition is false or unknown
    pub kubelet_not_ready: bool,
}

/// Network addresses of a node
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeNetwork {
    /// First internal IPv4 address
    pub ipv4: Option<String>,
    /// First internal IPv6 address
    pub ipv6: Option<String>,
    /// First hostname-typed address
    pub hostname: Option<String>,
}

/// Platform/software snapshot of a node
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodePlatform {
    /// CPU architecture (e.g. "amd64")
    pub architecture: String,
    /// Kernel version
    pub kernel_version: String,
    /// Operating system (e.g. "linux")
    pub os: String,
    /// OS image (e.g. "Ubuntu 24.04 LTS")
    pub os_image: String,
    /// Kubelet version
    pub kubelet_version: String,
}

/// Action recorded in a node's history
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    /// Node record created
    Create,
    /// One category of the record updated
    Update,
    /// Node soft-deleted
    Delete,
}

/// Category of an UPDATE history entry.
///
/// Updates are applied in the fixed order NAME, RESOURCE, CONDITION,
/// ADDRESS, ATTRIBUTE; later categories observe the effects of earlier
/// ones within the same reconciliation.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateCategory {
    /// Internal or display name changed
    Name,
    /// Allocatable/capacity snapshot changed
    Resource,
    /// One of the condition flags changed
    Condition,
    /// ipv4, ipv6 or hostname changed
    Address,
    /// Platform, labels or derived classification changed
    Attribute,
}

/// One append-only history entry.
///
/// Past entries are never mutated; the raw snapshot is an opaque serialized
/// blob of the source object, not a re-parsed structure.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// What happened
    pub action: HistoryAction,
    /// Update category; `None` for CREATE/DELETE entries
    pub update_type: Option<UpdateCategory>,
    /// Source resource type, when known
    pub resource_type: Option<String>,
    /// Serialized source object at the time of the change
    pub raw_snapshot: String,
    /// When the change was recorded
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Entry for a freshly created record
    pub fn create(raw_snapshot: String) -> Self {
        Self {
            action: HistoryAction::Create,
            update_type: None,
            resource_type: Some("Node".to_string()),
            raw_snapshot,
            timestamp: Utc::now(),
        }
    }

    /// Entry for one applied update category
    pub fn update(category: UpdateCategory, raw_snapshot: String) -> Self {
        Self {
            action: HistoryAction::Update,
            update_type: Some(category),
            resource_type: Some("Node".to_string()),
            raw_snapshot,
            timestamp: Utc::now(),
        }
    }

    /// Entry for a soft-deleted record
    pub fn delete(raw_snapshot: String) -> Self {
        Self {
            action: HistoryAction::Delete,
            update_type: None,
            resource_type: Some("Node".to_string()),
            raw_snapshot,
            timestamp: Utc::now(),
        }
    }
}

/// Internal record mirroring one Kubernetes node.
///
/// The `(internal_name, cluster)` pair is unique among non-deleted records;
/// soft delete renames the record so the slot frees for a future node
/// reusing the same cluster-assigned name.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Store-assigned id; 0 until first saved
    pub id: u64,
    /// Kubernetes object name, unique per cluster among non-deleted records
    pub internal_name: String,
    /// Human-facing name
    pub display_name: String,
    /// Owning cluster id
    pub cluster: String,
    /// Owning user
    pub owner: NodeOwner,
    /// Health status, driven by the health sweep
    pub status: NodeStatus,
    /// Kubernetes role
    pub role: NodeRole,
    /// Derived device classification
    pub kind: NodeKind,
    /// Compute capability
    pub compute_type: ComputeType,
    /// Resource snapshot
    pub resources: NodeResources,
    /// Condition snapshot
    pub conditions: NodeConditions,
    /// Network addresses
    pub network: NodeNetwork,
    /// Platform snapshot
    pub platform: NodePlatform,
    /// Datacenter label, if any
    pub datacenter: Option<String>,
    /// Ray cluster label, if any
    pub ray_cluster: Option<String>,
    /// Soft-delete marker
    pub deleted: bool,
    /// Last time any field changed
    pub last_updated: DateTime<Utc>,
    /// Most recent transition into READY
    pub last_start_time: Option<DateTime<Utc>>,
    /// Append-only change history
    pub history: Vec<HistoryEntry>,
}

/// Partial update applied through [`crate::store::NodeStore::partial_update`].
///
/// `None` fields are left untouched. The clearable labels use a double
/// `Option`: `Some(None)` force-writes a `null`, which a plain partial
/// update could never express.
#[derive(Clone, Debug, Default)]
pub struct NodePatch {
    /// Target record id
    pub id: u64,
    /// New internal name
    pub internal_name: Option<String>,
    /// New display name
    pub display_name: Option<String>,
    /// New resource snapshot
    pub resources: Option<NodeResources>,
    /// New condition snapshot
    pub conditions: Option<NodeConditions>,
    /// New network addresses
    pub network: Option<NodeNetwork>,
    /// New platform snapshot
    pub platform: Option<NodePlatform>,
    /// New derived classification
    pub kind: Option<NodeKind>,
    /// New compute capability
    pub compute_type: Option<ComputeType>,
    /// Datacenter label; `Some(None)` clears it
    pub datacenter: Option<Option<String>>,
    /// Ray cluster label; `Some(None)` clears it
    pub ray_cluster: Option<Option<String>>,
    /// Soft-delete marker
    pub deleted: Option<bool>,
    /// History entry to append with this update
    pub append_history: Option<HistoryEntry>,
}

impl NodePatch {
    /// Empty patch targeting the given record
    pub fn for_id(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared record fixtures for tests across the crate

    use super::*;

    pub(crate) fn sample_node(name: &str, cluster: &str) -> Node {
        Node {
            id: 0,
            internal_name: name.to_string(),
            display_name: name.to_string(),
            cluster: cluster.to_string(),
            owner: NodeOwner {
                user: "tenant-a".to_string(),
                topic: "users/tenant-a".to_string(),
            },
            status: NodeStatus::Pending,
            role: NodeRole::Node,
            kind: NodeKind::Node,
            compute_type: ComputeType::Cpu,
            resources: NodeResources::default(),
            conditions: NodeConditions::default(),
            network: NodeNetwork::default(),
            platform: NodePlatform::default(),
            datacenter: None,
            ray_cluster: None,
            deleted: false,
            last_updated: Utc::now(),
            last_start_time: None,
            history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample_node;
    use super::*;

    #[test]
    fn history_entries_carry_their_action() {
        let create = HistoryEntry::create("{}".to_string());
        assert_eq!(create.action, HistoryAction::Create);
        assert!(create.update_type.is_none());

        let update = HistoryEntry::update(UpdateCategory::Condition, "{}".to_string());
        assert_eq!(update.update_type, Some(UpdateCategory::Condition));

        let delete = HistoryEntry::delete("{}".to_string());
        assert_eq!(delete.action, HistoryAction::Delete);
        assert!(delete.update_type.is_none());
    }

    #[test]
    fn update_categories_order_matches_apply_order() {
        // The derived Ord drives nothing at runtime, but documents the
        // fixed apply order.
        let mut categories = vec![
            UpdateCategory::Attribute,
            UpdateCategory::Name,
            UpdateCategory::Address,
            UpdateCategory::Resource,
            UpdateCategory::Condition,
        ];
        categories.sort();
        assert_eq!(
            categories,
            vec![
                UpdateCategory::Name,
                UpdateCategory::Resource,
                UpdateCategory::Condition,
                UpdateCategory::Address,
                UpdateCategory::Attribute,
            ]
        );
    }

    #[test]
    fn node_serializes_with_camel_case_keys() {
        let node = sample_node("worker-1", "c1");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["internalName"], "worker-1");
        assert_eq!(json["computeType"], "CPU");
        assert_eq!(json["status"], "PENDING");
    }
}
