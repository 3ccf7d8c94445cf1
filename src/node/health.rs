//! Scheduled node health sweep
//!
//! Probes every worker node of every live cluster and drives the node
//! status state machine. The checks form an ordered guard chain; the first
//! failing check wins and all statuses are transient observations
//! re-derived on every sweep. Probe failures are negative signals, never
//! errors: a sweep changes status fields or changes nothing.
//!
//! The sweep never creates missing inventory records; registration is the
//! reconciler's job alone.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::Node as K8sNode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::{ClusterClient, ClusterId, ClusterPool};
use crate::config::{FleetLabels, HealthConfig};
use crate::node::classify;
use crate::node::{NodeRole, NodeStatus};
use crate::probe::{
    kubelet_container_logs_url, kubelet_healthz_url, kubelet_running_pods_url, Prober,
};
use crate::store::NodeStore;

/// Scheduled sweep probing node health per cluster
pub struct NodeHealthJob {
    store: Arc<dyn NodeStore>,
    prober: Arc<dyn Prober>,
    labels: FleetLabels,
    config: HealthConfig,
}

impl NodeHealthJob {
    /// Create a sweep job over the given collaborators
    pub fn new(
        store: Arc<dyn NodeStore>,
        prober: Arc<dyn Prober>,
        labels: FleetLabels,
        config: HealthConfig,
    ) -> Self {
        Self {
            store,
            prober,
            labels,
            config,
        }
    }

    /// Probe every live cluster once
    pub async fn sweep(&self, pool: &ClusterPool) {
        for (cluster, client) in pool {
            if let Err(e) = self.sweep_cluster(client.as_ref()).await {
                warn!(cluster = %cluster, error = %e, "health sweep failed for cluster");
            }
        }
    }

    /// Probe every eligible node of one cluster
    pub async fn sweep_cluster(&self, client: &dyn ClusterClient) -> Result<(), crate::Error> {
        let nodes = client.list_nodes().await?;
        for observed in &nodes {
            self.sweep_node(client.cluster_id(), observed).await;
        }
        Ok(())
    }

    async fn sweep_node(&self, cluster: &ClusterId, observed: &K8sNode) {
        let Some(name) = classify::observed_name(observed) else {
            return;
        };

        // masters are only swept in appliance deployments
        let role = classify::role_from(observed, &self.labels);
        if role == NodeRole::Master && !self.config.appliance_mode {
            return;
        }

        let stored = match self
            .store
            .find_by_name_and_cluster(name, cluster.as_str())
            .await
        {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!(cluster = %cluster, node = %name, "no inventory record, skipping probe");
                return;
            }
            Err(e) => {
                warn!(cluster = %cluster, node = %name, error = %e, "inventory lookup failed");
                return;
            }
        };

        let address = classify::annotation_value(observed, &self.labels.reachable_address)
            .filter(|a| !a.is_empty());
        let Some(address) = address else {
            warn!(
                cluster = %cluster,
                node = %name,
                "no reachability address assigned, skipping probe"
            );
            return;
        };

        let status = self.derive_status(&address).await;
        debug!(cluster = %cluster, node = %name, ?status, "health probe result");

        if status != stored.status {
            if let Err(e) = self.store.update_status(stored.id, status).await {
                warn!(cluster = %cluster, node = %name, error = %e, "status update failed");
                return;
            }
        }
        // stamp the start of the current uptime on every recovery
        if status == NodeStatus::Ready && stored.status != NodeStatus::Ready {
            if let Err(e) = self.store.update_start_time(stored.id, Utc::now()).await {
                warn!(cluster = %cluster, node = %name, error = %e, "start-time update failed");
            }
        }
    }

    /// Ordered guard chain; the first failing check wins.
    async fn derive_status(&self, address: &str) -> NodeStatus {
        if !self.prober.ping(address, self.config.ping_timeout()).await {
            return NodeStatus::NotReachable;
        }

        let healthz = kubelet_healthz_url(address, self.config.kubelet_port);
        match self.prober.https_get(&healthz).await {
            Ok(response) if response.ok && response.body.trim() == "ok" => {}
            _ => return NodeStatus::Pending,
        }

        if self.component_logs(address).await.is_some() {
            NodeStatus::Ready
        } else {
            NodeStatus::KubeletNotHealthy
        }
    }

    /// Tail the monitored system component's logs; `None` when the
    /// component cannot be found or produces no output.
    async fn component_logs(&self, address: &str) -> Option<String> {
        let pods_url = kubelet_running_pods_url(address, self.config.kubelet_port);
        let listing = self.prober.https_get(&pods_url).await.ok()?;
        if !listing.ok {
            return None;
        }
        let pods: Value = serde_json::from_str(&listing.body).ok()?;

        let (namespace, pod, container) = find_component(
            &pods,
            &self.config.component_pattern,
            &self.config.component_excludes,
        )?;

        let logs_url = kubelet_container_logs_url(
            address,
            self.config.kubelet_port,
            &namespace,
            &pod,
            &container,
            self.config.log_tail_lines,
        );
        let logs = self.prober.https_get(&logs_url).await.ok()?;
        if logs.ok && !logs.body.trim().is_empty() {
            Some(logs.body)
        } else {
            None
        }
    }
}

/// Locate the monitored system component in a kubelet running-pods listing.
///
/// Returns `(namespace, pod name, container name)` of the first pod whose
/// name contains `pattern` and none of the excluded fragments.
pub fn find_component(
    pods: &Value,
    pattern: &str,
    excludes: &[String],
) -> Option<(String, String, String)> {
    let items = pods.get("items")?.as_array()?;
    for pod in items {
        let name = pod.get("metadata")?.get("name")?.as_str()?;
        if !name.contains(pattern) || excludes.iter().any(|ex| name.contains(ex.as_str())) {
            continue;
        }
        let namespace = pod
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or("default");
        let container = pod
            .get("spec")
            .and_then(|s| s.get("containers"))
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)?;
        return Some((
            namespace.to_string(),
            name.to_string(),
            container.to_string(),
        ));
    }
    None
}
