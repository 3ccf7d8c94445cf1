//! Injected configuration value objects
//!
//! Every Kubernetes label key, threshold, and timeout the core consults is
//! carried in one of these structs rather than read from process-wide
//! globals, so tests can substitute values freely. The binary deserializes
//! the whole set from a single YAML fleet-config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Configuration for one mutating-task invocation.
///
/// Immutable and supplied per invocation; the task framework never mutates
/// it and never hard-codes its own defaults beyond [`Default`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskConfig {
    /// Interval between readiness checks, in milliseconds
    pub poll_interval_ms: u64,
    /// Total budget for a readiness wait, in seconds
    pub wait_timeout_secs: u64,
    /// Read timeout for watch/list calls against a cluster, in seconds
    pub watch_timeout_secs: u64,
    /// Fraction of the resource limit requested for CPU (request = limit * coefficient)
    pub cpu_request_coefficient: f64,
    /// Fraction of the resource limit requested for memory
    pub memory_request_coefficient: f64,
    /// Strip finalizers before deleting a resource
    pub delete_finalizers: bool,
    /// Lifetime of node reservations and one-time tokens, in seconds
    pub token_ttl_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            wait_timeout_secs: 120,
            watch_timeout_secs: 290,
            cpu_request_coefficient: 0.5,
            memory_request_coefficient: 0.5,
            delete_finalizers: false,
            token_ttl_secs: 3_600,
        }
    }
}

impl TaskConfig {
    /// Interval between readiness checks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total budget for a readiness wait
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Read timeout for watch/list calls
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    /// Lifetime of node reservations and one-time tokens
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Kubernetes label and annotation keys the core consults.
///
/// Injected so that deployments with different labeling conventions (and
/// tests) can substitute their own keys.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct FleetLabels {
    /// Label marking a node as GPU-capable
    pub gpu: String,
    /// Label marking a node as an edge device regardless of capacity
    pub edge: String,
    /// Label carrying the datacenter a node belongs to
    pub datacenter: String,
    /// Label carrying the Ray cluster a node is assigned to
    pub ray_cluster: String,
    /// Label overriding the display name of a node
    pub display_name: String,
    /// Label suppressing all event processing for a node (controlled reboots)
    pub ignore_events: String,
    /// Annotation carrying the externally-assigned reachability address
    pub reachable_address: String,
    /// Label identifying control-plane nodes (standard Kubernetes key)
    pub control_plane_role: String,
}

impl Default for FleetLabels {
    fn default() -> Self {
        Self {
            gpu: format!("{}/gpu", crate::LABEL_PREFIX),
            edge: format!("{}/edge", crate::LABEL_PREFIX),
            datacenter: format!("{}/datacenter", crate::LABEL_PREFIX),
            ray_cluster: format!("{}/ray-cluster", crate::LABEL_PREFIX),
            display_name: format!("{}/display-name", crate::LABEL_PREFIX),
            ignore_events: format!("{}/ignore-events", crate::LABEL_PREFIX),
            reachable_address: format!("{}/reachable-ip", crate::LABEL_PREFIX),
            control_plane_role: "node-role.kubernetes.io/control-plane".to_string(),
        }
    }
}

/// Capacity cutoffs below which a node is classified as an edge device
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EdgeThresholds {
    /// Allocatable CPU below this many millicores marks the node as edge
    pub cpu_millis: u64,
    /// Allocatable memory below this many bytes marks the node as edge
    pub memory_bytes: u64,
}

impl Default for EdgeThresholds {
    fn default() -> Self {
        Self {
            cpu_millis: 4_000,
            memory_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

/// Configuration for the scheduled node health sweep
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthConfig {
    /// Kubelet HTTPS port
    pub kubelet_port: u16,
    /// Ping timeout, in milliseconds
    pub ping_timeout_ms: u64,
    /// Kubelet HTTP request timeout, in milliseconds
    pub http_timeout_ms: u64,
    /// Interval between sweeps, in seconds
    pub sweep_interval_secs: u64,
    /// Name fragment of the system component whose logs prove kubelet health
    pub component_pattern: String,
    /// Pod-name fragments excluded when scanning for the component
    pub component_excludes: Vec<String>,
    /// Number of log lines to tail from the component
    pub log_tail_lines: u32,
    /// Sweep control-plane nodes too (appliance deployments)
    pub appliance_mode: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            kubelet_port: 10_250,
            ping_timeout_ms: 2_000,
            http_timeout_ms: 5_000,
            sweep_interval_secs: 60,
            component_pattern: "flannel".to_string(),
            component_excludes: vec!["agent".to_string(), "envoy".to_string()],
            log_tail_lines: 20,
            appliance_mode: false,
        }
    }
}

impl HealthConfig {
    /// Ping timeout as a [`Duration`]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Kubelet HTTP request timeout as a [`Duration`]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Interval between sweeps as a [`Duration`]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// One managed cluster in the fleet config file
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEntry {
    /// Cluster id, unique within the fleet
    pub id: String,
    /// Path to the kubeconfig granting access to the cluster
    pub kubeconfig: PathBuf,
}

/// Top-level fleet configuration, loaded from YAML by the binary
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FleetConfig {
    /// Managed clusters
    pub clusters: Vec<ClusterEntry>,
    /// Mutating-task configuration
    pub task: TaskConfig,
    /// Label/annotation keys
    pub labels: FleetLabels,
    /// Edge classification thresholds
    pub edge: EdgeThresholds,
    /// Health sweep configuration
    pub health: HealthConfig,
}

impl FleetConfig {
    /// Load a fleet config from a YAML file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::internal("config", format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::serialization(format!("invalid fleet config: {}", e)))
    }
}
