//! Pure functions converting an observed Kubernetes node into record fields
//!
//! Everything here is side-effect free so the extraction rules (quantity
//! parsing, address selection, edge classification) are unit-testable
//! without a cluster.

use std::collections::BTreeMap;
use std::net::IpAddr;

use k8s_openapi::api::core::v1::Node as K8sNode;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::config::{EdgeThresholds, FleetLabels};
use crate::node::{
    ComputeType, Node, NodeConditions, NodeKind, NodeNetwork, NodeOwner, NodePlatform,
    NodeResources, NodeRole, NodeStatus,
};

/// Parse a Kubernetes CPU quantity into millicores ("2" -> 2000, "250m" -> 250)
pub fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    let q = quantity.trim();
    if let Some(millis) = q.strip_suffix('m') {
        return millis.parse::<f64>().ok().map(|v| v.round() as u64);
    }
    q.parse::<f64>().ok().map(|cores| (cores * 1000.0).round() as u64)
}

/// Parse a Kubernetes memory/storage quantity into bytes ("16Gi", "500M", "1024")
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let q = quantity.trim();
    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = q.strip_suffix(suffix) {
            return number
                .parse::<f64>()
                .ok()
                .map(|v| (v * multiplier).round() as u64);
        }
    }
    // millibytes appear in theory; round down to whole bytes
    if let Some(number) = q.strip_suffix('m') {
        return number.parse::<f64>().ok().map(|v| (v / 1000.0).round() as u64);
    }
    q.parse::<f64>().ok().map(|v| v.round() as u64)
}

fn quantity<'m>(map: Option<&'m BTreeMap<String, Quantity>>, key: &str) -> Option<&'m str> {
    map.and_then(|m| m.get(key)).map(|q| q.0.as_str())
}

/// Snapshot allocatable/capacity resources from an observed node
pub fn resources_from(node: &K8sNode) -> NodeResources {
    let status = node.status.as_ref();
    let allocatable = status.and_then(|s| s.allocatable.as_ref());
    let capacity = status.and_then(|s| s.capacity.as_ref());

    let cpu = |m: Option<&BTreeMap<String, Quantity>>| {
        quantity(m, "cpu").and_then(parse_cpu_millis).unwrap_or(0)
    };
    let memory = |m: Option<&BTreeMap<String, Quantity>>| {
        quantity(m, "memory").and_then(parse_memory_bytes).unwrap_or(0)
    };
    let ephemeral = |m: Option<&BTreeMap<String, Quantity>>| {
        quantity(m, "ephemeral-storage")
            .and_then(parse_memory_bytes)
            .unwrap_or(0)
    };

    NodeResources {
        allocatable_cpu_millis: cpu(allocatable),
        allocatable_memory_bytes: memory(allocatable),
        allocatable_ephemeral_bytes: ephemeral(allocatable),
        capacity_cpu_millis: cpu(capacity),
        capacity_memory_bytes: memory(capacity),
        capacity_ephemeral_bytes: ephemeral(capacity),
    }
}

/// Snapshot condition flags; conditions absent from the report default to false
pub fn conditions_from(node: &K8sNode) -> NodeConditions {
    let mut conditions = NodeConditions::default();
    let Some(reported) = node.status.as_ref().and_then(|s| s.conditions.as_ref()) else {
        return conditions;
    };

    for condition in reported {
        match condition.type_.as_str() {
            "MemoryPressure" => conditions.memory_pressure = condition.status == "True",
            "DiskPressure" => conditions.disk_pressure = condition.status == "True",
            "PIDPressure" => conditions.pid_pressure = condition.status == "True",
            "Ready" => conditions.kubelet_not_ready = condition.status != "True",
            _ => {}
        }
    }
    conditions
}

/// Extract ipv4/ipv6 (first internal address of the right family) and the
/// first hostname-typed address
pub fn network_from(node: &K8sNode) -> NodeNetwork {
    let mut network = NodeNetwork::default();
    let Some(addresses) = node.status.as_ref().and_then(|s| s.addresses.as_ref()) else {
        return network;
    };

    for address in addresses {
        match address.type_.as_str() {
            "InternalIP" => match address.address.parse::<IpAddr>() {
                Ok(IpAddr::V4(_)) if network.ipv4.is_none() => {
                    network.ipv4 = Some(address.address.clone());
                }
                Ok(IpAddr::V6(_)) if network.ipv6.is_none() => {
                    network.ipv6 = Some(address.address.clone());
                }
                _ => {}
            },
            "Hostname" if network.hostname.is_none() => {
                network.hostname = Some(address.address.clone());
            }
            _ => {}
        }
    }
    network
}

/// Snapshot architecture/kernel/OS/kubelet versions
pub fn platform_from(node: &K8sNode) -> NodePlatform {
    match node.status.as_ref().and_then(|s| s.node_info.as_ref()) {
        Some(info) => NodePlatform {
            architecture: info.architecture.clone(),
            kernel_version: info.kernel_version.clone(),
            os: info.operating_system.clone(),
            os_image: info.os_image.clone(),
            kubelet_version: info.kubelet_version.clone(),
        },
        None => NodePlatform::default(),
    }
}

fn node_labels(node: &K8sNode) -> Option<&BTreeMap<String, String>> {
    node.metadata.labels.as_ref()
}

/// Value of a label on the observed node, if present
pub fn label_value(node: &K8sNode, key: &str) -> Option<String> {
    node_labels(node).and_then(|labels| labels.get(key).cloned())
}

/// Value of an annotation on the observed node, if present
pub fn annotation_value(node: &K8sNode, key: &str) -> Option<String> {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key).cloned())
}

/// Whether the node carries the marker suppressing event processing
pub fn has_ignore_marker(node: &K8sNode, labels: &FleetLabels) -> bool {
    node_labels(node)
        .map(|l| l.contains_key(&labels.ignore_events))
        .unwrap_or(false)
}

/// Kubernetes role from the control-plane label
pub fn role_from(node: &K8sNode, labels: &FleetLabels) -> NodeRole {
    if node_labels(node)
        .map(|l| l.contains_key(&labels.control_plane_role))
        .unwrap_or(false)
    {
        NodeRole::Master
    } else {
        NodeRole::Node
    }
}

/// GPU capability from the GPU marker label
pub fn compute_type_from(node: &K8sNode, labels: &FleetLabels) -> ComputeType {
    if node_labels(node)
        .map(|l| l.contains_key(&labels.gpu))
        .unwrap_or(false)
    {
        ComputeType::Gpu
    } else {
        ComputeType::Cpu
    }
}

/// Edge classification: below either capacity threshold, or explicitly marked
pub fn kind_from(
    node: &K8sNode,
    resources: &NodeResources,
    labels: &FleetLabels,
    thresholds: &EdgeThresholds,
) -> NodeKind {
    let marked = node_labels(node)
        .map(|l| l.contains_key(&labels.edge))
        .unwrap_or(false);
    let constrained = resources.allocatable_cpu_millis < thresholds.cpu_millis
        || resources.allocatable_memory_bytes < thresholds.memory_bytes;
    if marked || constrained {
        NodeKind::Edge
    } else {
        NodeKind::Node
    }
}

/// The observed node's object name
pub fn observed_name(node: &K8sNode) -> Option<&str> {
    node.metadata.name.as_deref()
}

/// Display name: the override label, falling back to the object name
pub fn display_name_from(node: &K8sNode, labels: &FleetLabels, fallback: &str) -> String {
    label_value(node, &labels.display_name).unwrap_or_else(|| fallback.to_string())
}

/// Assemble a full record from an observed node and a resolved owner.
///
/// The caller appends the CREATE history entry and persists.
pub fn build_node(
    observed: &K8sNode,
    cluster: &str,
    owner: NodeOwner,
    labels: &FleetLabels,
    thresholds: &EdgeThresholds,
) -> Option<Node> {
    let name = observed_name(observed)?.to_string();
    let resources = resources_from(observed);
    let kind = kind_from(observed, &resources, labels, thresholds);

    Some(Node {
        id: 0,
        display_name: display_name_from(observed, labels, &name),
        internal_name: name,
        cluster: cluster.to_string(),
        owner,
        status: NodeStatus::Pending,
        role: role_from(observed, labels),
        kind,
        compute_type: compute_type_from(observed, labels),
        resources,
        conditions: conditions_from(observed),
        network: network_from(observed),
        platform: platform_from(observed),
        datacenter: label_value(observed, &labels.datacenter),
        ray_cluster: label_value(observed, &labels.ray_cluster),
        deleted: false,
        last_updated: chrono::Utc::now(),
        last_start_time: None,
        history: Vec::new(),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared observed-node fixtures for tests across the crate

    use super::*;
    use k8s_openapi::api::core::v1::{
        NodeAddress, NodeCondition, NodeStatus as K8sNodeStatus, NodeSystemInfo,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    pub(crate) fn observed(name: &str) -> K8sNode {
        K8sNode {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::new()),
                annotations: Some(BTreeMap::new()),
                ..Default::default()
            },
            spec: None,
            status: Some(K8sNodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: "10.0.0.7".to_string(),
                    },
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: "fd00::7".to_string(),
                    },
                    NodeAddress {
                        type_: "Hostname".to_string(),
                        address: name.to_string(),
                    },
                ]),
                allocatable: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("7500m".to_string())),
                    ("memory".to_string(), Quantity("16Gi".to_string())),
                    ("ephemeral-storage".to_string(), Quantity("100Gi".to_string())),
                ])),
                capacity: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("8".to_string())),
                    ("memory".to_string(), Quantity("16Gi".to_string())),
                    ("ephemeral-storage".to_string(), Quantity("120Gi".to_string())),
                ])),
                conditions: Some(vec![
                    NodeCondition {
                        type_: "Ready".to_string(),
                        status: "True".to_string(),
                        ..Default::default()
                    },
                    NodeCondition {
                        type_: "MemoryPressure".to_string(),
                        status: "False".to_string(),
                        ..Default::default()
                    },
                ]),
                node_info: Some(NodeSystemInfo {
                    architecture: "amd64".to_string(),
                    kernel_version: "6.8.0-45".to_string(),
                    operating_system: "linux".to_string(),
                    os_image: "Ubuntu 24.04 LTS".to_string(),
                    kubelet_version: "v1.31.2".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    pub(crate) fn set_label(node: &mut K8sNode, key: &str, value: &str) {
        node.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
    }
}
