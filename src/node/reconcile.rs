//! Event-driven node reconciliation
//!
//! Converts a cluster's node-watch events into inventory records plus an
//! append-only change history. One reconciliation only ever touches the
//! single node named in the triggering event; events for different nodes
//! or clusters interleave freely.

use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::cluster::ClusterId;
use crate::config::{EdgeThresholds, FleetLabels};
use crate::node::classify;
use crate::node::{
    ComputeType, HistoryEntry, Node, NodeConditions, NodeKind, NodeNetwork, NodePatch,
    NodePlatform, NodeResources, UpdateCategory,
};
use crate::notify::Notifier;
use crate::reserve::ReservationResolver;
use crate::store::NodeStore;
use crate::Error;

/// Projection of an observed node into the record's field categories
struct Observation {
    name: String,
    display_name: String,
    resources: NodeResources,
    conditions: NodeConditions,
    network: NodeNetwork,
    platform: NodePlatform,
    kind: NodeKind,
    compute_type: ComputeType,
    datacenter: Option<String>,
    ray_cluster: Option<String>,
}

/// Reconciles node watch events against the inventory
pub struct NodeReconciler {
    store: Arc<dyn NodeStore>,
    notifier: Arc<dyn Notifier>,
    reservations: Arc<dyn ReservationResolver>,
    labels: FleetLabels,
    thresholds: EdgeThresholds,
}

impl NodeReconciler {
    /// Create a reconciler over the given collaborators
    pub fn new(
        store: Arc<dyn NodeStore>,
        notifier: Arc<dyn Notifier>,
        reservations: Arc<dyn ReservationResolver>,
        labels: FleetLabels,
        thresholds: EdgeThresholds,
    ) -> Self {
        Self {
            store,
            notifier,
            reservations,
            labels,
            thresholds,
        }
    }

    fn observe(&self, observed: &K8sNode, name: &str) -> Observation {
        let resources = classify::resources_from(observed);
        Observation {
            name: name.to_string(),
            display_name: classify::display_name_from(observed, &self.labels, name),
            kind: classify::kind_from(observed, &resources, &self.labels, &self.thresholds),
            resources,
            conditions: classify::conditions_from(observed),
            network: classify::network_from(observed),
            platform: classify::platform_from(observed),
            compute_type: classify::compute_type_from(observed, &self.labels),
            datacenter: classify::label_value(observed, &self.labels.datacenter),
            ray_cluster: classify::label_value(observed, &self.labels.ray_cluster),
        }
    }

    /// Handle an added or updated node.
    ///
    /// Whether this is an add or an update is decided by the store lookup:
    /// an event for a name with no stored record creates one.
    pub async fn handle_applied(&self, cluster: &ClusterId, observed: &K8sNode) -> Result<(), Error> {
        if classify::has_ignore_marker(observed, &self.labels) {
            trace!(cluster = %cluster, "ignore marker set, dropping event");
            return Ok(());
        }
        let Some(name) = classify::observed_name(observed) else {
            warn!(cluster = %cluster, "node event without an object name, dropping");
            return Ok(());
        };

        match self
            .store
            .find_by_name_and_cluster(name, cluster.as_str())
            .await?
        {
            Some(stored) => self.update_node(cluster, stored, observed, name).await,
            None => self.create_node(cluster, observed, name).await,
        }
    }

    async fn create_node(
        &self,
        cluster: &ClusterId,
        observed: &K8sNode,
        name: &str,
    ) -> Result<(), Error> {
        let Some(reservation) = self.reservations.resolve(cluster.as_str(), name).await else {
            warn!(
                cluster = %cluster,
                node = %name,
                "no owner resolvable for incoming node, dropping"
            );
            return Ok(());
        };

        let Some(mut node) = classify::build_node(
            observed,
            cluster.as_str(),
            reservation.owner.clone(),
            &self.labels,
            &self.thresholds,
        ) else {
            warn!(cluster = %cluster, node = %name, "malformed node event, dropping");
            return Ok(());
        };

        node.history.push(HistoryEntry::create(snapshot(observed)));
        let saved = self.store.save(node).await?;
        self.reservations.mark_fulfilled(&reservation.id).await;

        info!(cluster = %cluster, node = %name, id = saved.id, "node registered");
        self.notifier
            .publish(
                &saved.owner.topic,
                &format!("node {} registered in cluster {}", saved.display_name, cluster),
            )
            .await;
        Ok(())
    }

    async fn update_node(
        &self,
        cluster: &ClusterId,
        stored: Node,
        observed: &K8sNode,
        name: &str,
    ) -> Result<(), Error> {
        let observation = self.observe(observed, name);
        let changed = changed_categories(&stored, &observation);
        if changed.is_empty() {
            trace!(cluster = %cluster, node = %name, "no tracked field changed");
            return Ok(());
        }

        let raw = snapshot(observed);
        debug!(cluster = %cluster, node = %name, categories = ?changed, "applying node updates");

        // Fixed order; each category is an independent partial update with
        // its own history entry, so later categories build on earlier ones.
        for category in changed {
            let mut patch = NodePatch::for_id(stored.id);
            match category {
                UpdateCategory::Name => {
                    patch.internal_name = Some(observation.name.clone());
                    patch.display_name = Some(observation.display_name.clone());
                }
                UpdateCategory::Resource => {
                    patch.resources = Some(observation.resources);
                }
                UpdateCategory::Condition => {
                    patch.conditions = Some(observation.conditions);
                }
                UpdateCategory::Address => {
                    patch.network = Some(observation.network.clone());
                }
                UpdateCategory::Attribute => {
                    patch.platform = Some(observation.platform.clone());
                    patch.kind = Some(observation.kind);
                    patch.compute_type = Some(observation.compute_type);
                    // clearable labels are force-written: a plain partial
                    // update could never null them out
                    patch.datacenter = Some(observation.datacenter.clone());
                    patch.ray_cluster = Some(observation.ray_cluster.clone());
                }
            }
            patch.append_history = Some(HistoryEntry::update(category, raw.clone()));

            if self.store.partial_update(patch).await?.is_none() {
                warn!(
                    cluster = %cluster,
                    node = %name,
                    "record vanished mid-update, abandoning remaining categories"
                );
                return Ok(());
            }
        }
        Ok(())
    }

    /// Handle a deleted node: soft-delete by renaming so the slot frees
    /// for a future node reusing the same cluster-assigned name.
    pub async fn handle_deleted(
        &self,
        cluster: &ClusterId,
        observed: &K8sNode,
        final_state_unknown: bool,
    ) -> Result<(), Error> {
        if classify::has_ignore_marker(observed, &self.labels) {
            trace!(cluster = %cluster, "ignore marker set, dropping delete event");
            return Ok(());
        }
        let Some(name) = classify::observed_name(observed) else {
            warn!(cluster = %cluster, "delete event without an object name, dropping");
            return Ok(());
        };

        let Some(stored) = self
            .store
            .find_by_name_and_cluster(name, cluster.as_str())
            .await?
        else {
            debug!(cluster = %cluster, node = %name, "delete for unknown node, nothing to do");
            return Ok(());
        };

        let vacated = format!("{}-{}", stored.internal_name, random_suffix());
        let mut patch = NodePatch::for_id(stored.id);
        patch.internal_name = Some(vacated);
        patch.deleted = Some(true);
        patch.append_history = Some(HistoryEntry::delete(snapshot(observed)));
        self.store.partial_update(patch).await?;

        info!(
            cluster = %cluster,
            node = %name,
            final_state_unknown,
            "node deleted"
        );
        self.notifier
            .publish(
                &stored.owner.topic,
                &format!("node {} removed from cluster {}", stored.display_name, cluster),
            )
            .await;
        Ok(())
    }
}

fn snapshot(observed: &K8sNode) -> String {
    serde_json::to_string(observed).unwrap_or_else(|_| "{}".to_string())
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Changed categories in the fixed apply order
fn changed_categories(stored: &Node, observation: &Observation) -> Vec<UpdateCategory> {
    let mut changed = Vec::new();

    // NAME changes are defensive; Kubernetes does not rename live node
    // objects, but reboot flows can re-register under a changed display name.
    if stored.internal_name != observation.name || stored.display_name != observation.display_name
    {
        changed.push(UpdateCategory::Name);
    }
    if stored.resources != observation.resources {
        changed.push(UpdateCategory::Resource);
    }
    if stored.conditions != observation.conditions {
        changed.push(UpdateCategory::Condition);
    }
    if stored.network != observation.network {
        changed.push(UpdateCategory::Address);
    }
    if stored.platform != observation.platform
        || stored.datacenter != observation.datacenter
        || stored.ray_cluster != observation.ray_cluster
        || stored.kind != observation.kind
        || stored.compute_type != observation.compute_type
    {
        changed.push(UpdateCategory::Attribute);
    }
    changed
}

/// Drive a reconciler from one cluster's node watch until the stream ends.
///
/// Watch errors restart the stream with backoff; reconciliation errors are
/// logged and do not stop the watch.
pub async fn run_node_watch(
    client: Client,
    cluster: ClusterId,
    reconciler: Arc<NodeReconciler>,
) -> Result<(), Error> {
    let api: Api<K8sNode> = Api::all(client);
    let stream = watcher(api, watcher::Config::default().any_semantic()).default_backoff();
    tokio::pin!(stream);

    info!(cluster = %cluster, "node watch started");
    while let Some(event) = stream
        .try_next()
        .await
        .map_err(|e| Error::internal("watcher", e.to_string()))?
    {
        match event {
            watcher::Event::Apply(node) | watcher::Event::InitApply(node) => {
                if let Err(e) = reconciler.handle_applied(&cluster, &node).await {
                    warn!(cluster = %cluster, error = %e, "node reconciliation failed");
                }
            }
            watcher::Event::Delete(node) => {
                if let Err(e) = reconciler.handle_deleted(&cluster, &node, false).await {
                    warn!(cluster = %cluster, error = %e, "node delete handling failed");
                }
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }
    Ok(())
}
