//! Concrete mutating tasks for every resource kind the fleet manages
//!
//! Two generic tasks cover the create/delete lifecycle for any
//! [`ResourceKind`]; the per-kind constructors below only assemble
//! payloads. Node label/annotation changes patch instead of create and get
//! their own task types.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::cluster::{ClusterClient, ClusterId, ResourceKind};
use crate::config::TaskConfig;
use crate::task::{Execution, MutationTask};
use crate::Error;

/// Create-if-absent task for one resource on one cluster
pub struct CreateResource {
    client: Arc<dyn ClusterClient>,
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
    manifest: Value,
}

impl CreateResource {
    /// Build a create task from an assembled manifest (everything below
    /// `metadata`: typically a `spec` object)
    pub fn new(
        client: Arc<dyn ClusterClient>,
        kind: ResourceKind,
        namespace: Option<String>,
        name: impl Into<String>,
        manifest: Value,
    ) -> Self {
        Self {
            client,
            kind,
            namespace,
            name: name.into(),
            manifest,
        }
    }

    /// The manifest this task will submit
    pub fn manifest(&self) -> &Value {
        &self.manifest
    }
}

#[async_trait]
impl MutationTask for CreateResource {
    type Output = Value;

    fn cluster(&self) -> &ClusterId {
        self.client.cluster_id()
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.kind.kind, self.name)
    }

    async fn execute(&self) -> Result<Execution<Value>, Error> {
        let existing = self
            .client
            .get_resource(&self.kind, self.namespace.as_deref(), &self.name)
            .await?;
        if let Some(existing) = existing {
            return Ok(Execution::AlreadyInDesiredState(Some(existing)));
        }

        let created = self
            .client
            .create_resource(
                &self.kind,
                self.namespace.as_deref(),
                &self.name,
                &self.manifest,
            )
            .await?;
        Ok(Execution::Applied(Some(created)))
    }

    async fn is_ready(&self) -> Result<bool, Error> {
        Ok(self
            .client
            .get_resource(&self.kind, self.namespace.as_deref(), &self.name)
            .await?
            .is_some())
    }
}

/// Delete-if-present task for one resource on one cluster.
///
/// Readiness for a delete is the resource being gone.
pub struct DeleteResource {
    client: Arc<dyn ClusterClient>,
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
    delete_finalizers: bool,
}

impl DeleteResource {
    /// Build a delete task; `delete_finalizers` strips finalizers first so
    /// deletion cannot hang on an absent finalizing controller
    pub fn new(
        client: Arc<dyn ClusterClient>,
        kind: ResourceKind,
        namespace: Option<String>,
        name: impl Into<String>,
        delete_finalizers: bool,
    ) -> Self {
        Self {
            client,
            kind,
            namespace,
            name: name.into(),
            delete_finalizers,
        }
    }
}

#[async_trait]
impl MutationTask for DeleteResource {
    type Output = ();

    fn cluster(&self) -> &ClusterId {
        self.client.cluster_id()
    }

    fn describe(&self) -> String {
        format!("{}/{} (delete)", self.kind.kind, self.name)
    }

    async fn execute(&self) -> Result<Execution<()>, Error> {
        let existing = self
            .client
            .get_resource(&self.kind, self.namespace.as_deref(), &self.name)
            .await?;
        if existing.is_none() {
            return Ok(Execution::AlreadyInDesiredState(None));
        }

        if self.delete_finalizers {
            self.client
                .patch_resource(
                    &self.kind,
                    self.namespace.as_deref(),
                    &self.name,
                    &json!({"metadata": {"finalizers": null}}),
                )
                .await?;
        }
        self.client
            .delete_resource(&self.kind, self.namespace.as_deref(), &self.name)
            .await?;
        Ok(Execution::Applied(None))
    }

    async fn is_ready(&self) -> Result<bool, Error> {
        Ok(self
            .client
            .get_resource(&self.kind, self.namespace.as_deref(), &self.name)
            .await?
            .is_none())
    }
}

fn metadata_map<'v>(node: &'v Value, key: &str) -> Option<&'v Map<String, Value>> {
    node.get("metadata")?.get(key)?.as_object()
}

/// Add labels/annotations to a node via merge patch
pub struct ApplyNodeMetadata {
    client: Arc<dyn ClusterClient>,
    node_name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl ApplyNodeMetadata {
    /// Build a task applying the given labels and annotations
    pub fn new(
        client: Arc<dyn ClusterClient>,
        node_name: impl Into<String>,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            node_name: node_name.into(),
            labels,
            annotations,
        }
    }

    fn all_present(&self, node: &Value) -> bool {
        let labels_present = self.labels.iter().all(|(k, v)| {
            metadata_map(node, "labels")
                .and_then(|m| m.get(k))
                .and_then(Value::as_str)
                == Some(v.as_str())
        });
        let annotations_present = self.annotations.iter().all(|(k, v)| {
            metadata_map(node, "annotations")
                .and_then(|m| m.get(k))
                .and_then(Value::as_str)
                == Some(v.as_str())
        });
        labels_present && annotations_present
    }

    fn patch(&self) -> Value {
        json!({
            "metadata": {
                "labels": &self.labels,
                "annotations": &self.annotations,
            }
        })
    }
}

#[async_trait]
impl MutationTask for ApplyNodeMetadata {
    type Output = ();

    fn cluster(&self) -> &ClusterId {
        self.client.cluster_id()
    }

    fn describe(&self) -> String {
        format!("Node/{} (label)", self.node_name)
    }

    async fn execute(&self) -> Result<Execution<()>, Error> {
        let node = self
            .client
            .get_resource(&ResourceKind::node(), None, &self.node_name)
            .await?
            .ok_or_else(|| {
                Error::task(
                    format!("Node/{}", self.node_name),
                    self.client.cluster_id().as_str(),
                    "node does not exist",
                )
            })?;

        if self.all_present(&node) {
            return Ok(Execution::AlreadyInDesiredState(None));
        }

        self.client
            .patch_resource(&ResourceKind::node(), None, &self.node_name, &self.patch())
            .await?;
        Ok(Execution::Applied(None))
    }

    async fn is_ready(&self) -> Result<bool, Error> {
        let node = self
            .client
            .get_resource(&ResourceKind::node(), None, &self.node_name)
            .await?;
        Ok(node.map(|n| self.all_present(&n)).unwrap_or(false))
    }
}

/// Remove labels/annotations from a node via merge patch with nulls
pub struct RemoveNodeMetadata {
    client: Arc<dyn ClusterClient>,
    node_name: String,
    label_keys: Vec<String>,
    annotation_keys: Vec<String>,
}

impl RemoveNodeMetadata {
    /// Build a task removing the given label and annotation keys
    pub fn new(
        client: Arc<dyn ClusterClient>,
        node_name: impl Into<String>,
        label_keys: Vec<String>,
        annotation_keys: Vec<String>,
    ) -> Self {
        Self {
            client,
            node_name: node_name.into(),
            label_keys,
            annotation_keys,
        }
    }

    fn none_present(&self, node: &Value) -> bool {
        let labels_absent = self.label_keys.iter().all(|k| {
            metadata_map(node, "labels")
                .map(|m| !m.contains_key(k))
                .unwrap_or(true)
        });
        let annotations_absent = self.annotation_keys.iter().all(|k| {
            metadata_map(node, "annotations")
                .map(|m| !m.contains_key(k))
                .unwrap_or(true)
        });
        labels_absent && annotations_absent
    }

    fn patch(&self) -> Value {
        // merge-patch semantics: an explicit null removes the key
        let nulls = |keys: &[String]| -> Map<String, Value> {
            keys.iter().map(|k| (k.clone(), Value::Null)).collect()
        };
        json!({
            "metadata": {
                "labels": nulls(&self.label_keys),
                "annotations": nulls(&self.annotation_keys),
            }
        })
    }
}

#[async_trait]
impl MutationTask for RemoveNodeMetadata {
    type Output = ();

    fn cluster(&self) -> &ClusterId {
        self.client.cluster_id()
    }

    fn describe(&self) -> String {
        format!("Node/{} (unlabel)", self.node_name)
    }

    async fn execute(&self) -> Result<Execution<()>, Error> {
        let node = self
            .client
            .get_resource(&ResourceKind::node(), None, &self.node_name)
            .await?
            .ok_or_else(|| {
                Error::task(
                    format!("Node/{}", self.node_name),
                    self.client.cluster_id().as_str(),
                    "node does not exist",
                )
            })?;

        if self.none_present(&node) {
            return Ok(Execution::AlreadyInDesiredState(None));
        }

        self.client
            .patch_resource(&ResourceKind::node(), None, &self.node_name, &self.patch())
            .await?;
        Ok(Execution::Applied(None))
    }

    async fn is_ready(&self) -> Result<bool, Error> {
        let node = self
            .client
            .get_resource(&ResourceKind::node(), None, &self.node_name)
            .await?;
        Ok(node.map(|n| self.none_present(&n)).unwrap_or(true))
    }
}

// =============================================================================
// Payload constructors
// =============================================================================

fn cpu_quantity(millis: u64) -> String {
    format!("{}m", millis)
}

fn scaled(limit: u64, coefficient: f64) -> u64 {
    (limit as f64 * coefficient).round() as u64
}

/// Volume claim bound to a storage class
pub fn volume_claim(
    client: Arc<dyn ClusterClient>,
    namespace: &str,
    name: &str,
    storage_class: &str,
    size: &str,
) -> CreateResource {
    CreateResource::new(
        client,
        ResourceKind::volume_claim(),
        Some(namespace.to_string()),
        name,
        json!({
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "storageClassName": storage_class,
                "resources": {"requests": {"storage": size}},
            }
        }),
    )
}

/// Storage class for a provisioner
pub fn storage_class(
    client: Arc<dyn ClusterClient>,
    name: &str,
    provisioner: &str,
) -> CreateResource {
    CreateResource::new(
        client,
        ResourceKind::storage_class(),
        None,
        name,
        json!({
            "provisioner": provisioner,
            "reclaimPolicy": "Delete",
            "volumeBindingMode": "WaitForFirstConsumer",
        }),
    )
}

/// Database cluster with requests derived from limits via the configured
/// coefficients
#[allow(clippy::too_many_arguments)]
pub fn database_cluster(
    client: Arc<dyn ClusterClient>,
    config: &TaskConfig,
    namespace: &str,
    name: &str,
    instances: u32,
    cpu_limit_millis: u64,
    memory_limit_bytes: u64,
    storage_size: &str,
) -> CreateResource {
    CreateResource::new(
        client,
        ResourceKind::database_cluster(),
        Some(namespace.to_string()),
        name,
        json!({
            "spec": {
                "instances": instances,
                "storage": {"size": storage_size},
                "resources": {
                    "requests": {
                        "cpu": cpu_quantity(scaled(cpu_limit_millis, config.cpu_request_coefficient)),
                        "memory": scaled(memory_limit_bytes, config.memory_request_coefficient).to_string(),
                    },
                    "limits": {
                        "cpu": cpu_quantity(cpu_limit_millis),
                        "memory": memory_limit_bytes.to_string(),
                    },
                },
            }
        }),
    )
}

/// HTTP ingress route for a host, optionally chained through middlewares
pub fn ingress_route(
    client: Arc<dyn ClusterClient>,
    namespace: &str,
    name: &str,
    host: &str,
    service: &str,
    port: u16,
    middlewares: &[String],
) -> CreateResource {
    let middleware_refs: Vec<Value> = middlewares.iter().map(|m| json!({"name": m})).collect();
    CreateResource::new(
        client,
        ResourceKind::ingress_route(),
        Some(namespace.to_string()),
        name,
        json!({
            "spec": {
                "entryPoints": ["websecure"],
                "routes": [{
                    "match": format!("Host(`{}`)", host),
                    "kind": "Rule",
                    "middlewares": middleware_refs,
                    "services": [{"name": service, "port": port}],
                }],
                "tls": {},
            }
        }),
    )
}

/// TCP ingress route for a dedicated entry point
pub fn ingress_route_tcp(
    client: Arc<dyn ClusterClient>,
    namespace: &str,
    name: &str,
    entry_point: &str,
    service: &str,
    port: u16,
) -> CreateResource {
    CreateResource::new(
        client,
        ResourceKind::ingress_route_tcp(),
        Some(namespace.to_string()),
        name,
        json!({
            "spec": {
                "entryPoints": [entry_point],
                "routes": [{
                    "match": "HostSNI(`*`)",
                    "services": [{"name": service, "port": port}],
                }],
            }
        }),
    )
}

/// IP-allowlist middleware (HTTP or TCP variant)
pub fn ip_allow_middleware(
    client: Arc<dyn ClusterClient>,
    namespace: &str,
    name: &str,
    source_ranges: &[String],
    tcp: bool,
) -> CreateResource {
    let kind = if tcp {
        ResourceKind::middleware_tcp()
    } else {
        ResourceKind::middleware()
    };
    CreateResource::new(
        client,
        kind,
        Some(namespace.to_string()),
        name,
        json!({
            "spec": {
                "ipAllowList": {"sourceRange": source_ranges},
            }
        }),
    )
}

/// Default-deny network policy allowing only same-namespace traffic
pub fn namespace_network_policy(
    client: Arc<dyn ClusterClient>,
    namespace: &str,
    name: &str,
) -> CreateResource {
    CreateResource::new(
        client,
        ResourceKind::network_policy(),
        Some(namespace.to_string()),
        name,
        json!({
            "spec": {
                "podSelector": {},
                "policyTypes": ["Ingress"],
                "ingress": [{
                    "from": [{"podSelector": {}}],
                }],
            }
        }),
    )
}

/// Helm chart install via the chart custom resource
pub fn helm_chart_install(
    client: Arc<dyn ClusterClient>,
    namespace: &str,
    name: &str,
    repo: &str,
    chart: &str,
    version: &str,
    values_yaml: &str,
) -> CreateResource {
    CreateResource::new(
        client,
        ResourceKind::helm_chart(),
        Some(namespace.to_string()),
        name,
        json!({
            "spec": {
                "repo": repo,
                "chart": chart,
                "version": version,
                "valuesContent": values_yaml,
            }
        }),
    )
}

/// Helm chart uninstall
pub fn helm_chart_uninstall(
    client: Arc<dyn ClusterClient>,
    config: &TaskConfig,
    namespace: &str,
    name: &str,
) -> DeleteResource {
    DeleteResource::new(
        client,
        ResourceKind::helm_chart(),
        Some(namespace.to_string()),
        name,
        config.delete_finalizers,
    )
}

/// Remove a node object from its cluster
pub fn node_delete(client: Arc<dyn ClusterClient>, name: &str) -> DeleteResource {
    DeleteResource::new(client, ResourceKind::node(), None, name, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;

    use crate::task::{run, CreationStatus, Outcome};

    /// In-memory cluster standing in for a live API server.
    struct FakeCluster {
        id: ClusterId,
        objects: DashMap<(String, String), Value>,
        patches: DashMap<(String, String), Vec<Value>>,
    }

    impl FakeCluster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ClusterId::new("c1"),
                objects: DashMap::new(),
                patches: DashMap::new(),
            })
        }

        fn key(kind: &ResourceKind, name: &str) -> (String, String) {
            (kind.plural.clone(), name.to_string())
        }

        fn put(&self, kind: &ResourceKind, name: &str, value: Value) {
            self.objects.insert(Self::key(kind, name), value);
        }
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        fn cluster_id(&self) -> &ClusterId {
            &self.id
        }

        async fn get_resource<'a>(
            &self,
            kind: &ResourceKind,
            _namespace: Option<&'a str>,
            name: &str,
        ) -> Result<Option<Value>, Error> {
            Ok(self
                .objects
                .get(&Self::key(kind, name))
                .map(|e| e.value().clone()))
        }

        async fn create_resource<'a>(
            &self,
            kind: &ResourceKind,
            _namespace: Option<&'a str>,
            name: &str,
            manifest: &Value,
        ) -> Result<Value, Error> {
            self.put(kind, name, manifest.clone());
            Ok(manifest.clone())
        }

        async fn delete_resource<'a>(
            &self,
            kind: &ResourceKind,
            _namespace: Option<&'a str>,
            name: &str,
        ) -> Result<bool, Error> {
            Ok(self.objects.remove(&Self::key(kind, name)).is_some())
        }

        async fn patch_resource<'a>(
            &self,
            kind: &ResourceKind,
            _namespace: Option<&'a str>,
            name: &str,
            patch: &Value,
        ) -> Result<(), Error> {
            self.patches
                .entry(Self::key(kind, name))
                .or_default()
                .push(patch.clone());
            Ok(())
        }

        async fn list_resources<'a>(
            &self,
            kind: &ResourceKind,
            _namespace: Option<&'a str>,
        ) -> Result<Vec<Value>, Error> {
            Ok(self
                .objects
                .iter()
                .filter(|e| e.key().0 == kind.plural)
                .map(|e| e.value().clone())
                .collect())
        }

        async fn list_nodes(&self) -> Result<Vec<k8s_openapi::api::core::v1::Node>, Error> {
            Ok(Vec::new())
        }
    }

    fn fast_config() -> TaskConfig {
        TaskConfig {
            poll_interval_ms: 10,
            wait_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_is_idempotent() {
        let cluster = FakeCluster::new();
        let task = volume_claim(cluster.clone(), "tenant-a", "data-0", "fast", "10Gi");

        let first = run(&task, &fast_config()).await;
        assert!(first.success);
        assert_eq!(first.creation_status, Some(CreationStatus::Created));

        let second = run(&task, &fast_config()).await;
        assert!(second.success);
        assert_eq!(second.creation_status, Some(CreationStatus::SkippedExists));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_absent_resource_short_circuits() {
        let cluster = FakeCluster::new();
        let task = helm_chart_uninstall(cluster, &fast_config(), "tenant-a", "grafana");

        let result = run(&task, &fast_config()).await;
        assert!(result.success);
        assert_eq!(result.creation_status, Some(CreationStatus::SkippedExists));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_until_the_resource_is_gone() {
        let cluster = FakeCluster::new();
        cluster.put(&ResourceKind::helm_chart(), "grafana", json!({"spec": {}}));
        let config = TaskConfig {
            delete_finalizers: true,
            ..fast_config()
        };
        let task = helm_chart_uninstall(cluster.clone(), &config, "tenant-a", "grafana");

        let result = run(&task, &config).await;
        assert!(result.success);
        assert_eq!(result.creation_status, Some(CreationStatus::Created));
        // finalizers were stripped before the delete
        let key = ("helmcharts".to_string(), "grafana".to_string());
        let patches = cluster.patches.get(&key).unwrap();
        assert_eq!(patches[0], json!({"metadata": {"finalizers": null}}));
    }

    #[tokio::test(start_paused = true)]
    async fn labeling_a_missing_node_is_a_hard_failure() {
        let cluster = FakeCluster::new();
        let task = ApplyNodeMetadata::new(
            cluster,
            "worker-9",
            BTreeMap::from([("armada.io/gpu".to_string(), "true".to_string())]),
            BTreeMap::new(),
        );

        let result = run(&task, &fast_config()).await;
        assert_eq!(result.outcome(), Outcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn labeling_skips_when_labels_already_present() {
        let cluster = FakeCluster::new();
        cluster.put(
            &ResourceKind::node(),
            "worker-1",
            json!({"metadata": {"labels": {"armada.io/gpu": "true"}}}),
        );
        let task = ApplyNodeMetadata::new(
            cluster,
            "worker-1",
            BTreeMap::from([("armada.io/gpu".to_string(), "true".to_string())]),
            BTreeMap::new(),
        );

        let result = run(&task, &fast_config()).await;
        assert_eq!(result.creation_status, Some(CreationStatus::SkippedExists));
    }

    #[tokio::test(start_paused = true)]
    async fn unlabeling_patches_nulls_for_each_key() {
        let cluster = FakeCluster::new();
        cluster.put(
            &ResourceKind::node(),
            "worker-1",
            json!({"metadata": {"labels": {"armada.io/gpu": "true"}}}),
        );
        let task = RemoveNodeMetadata::new(
            cluster.clone(),
            "worker-1",
            vec!["armada.io/gpu".to_string()],
            vec![],
        );

        // the fake's patch does not mutate the object, so readiness times
        // out; the patch payload is what matters here
        let result = run(&task, &fast_config()).await;
        assert!(result.wait_timeout);
        let key = ("nodes".to_string(), "worker-1".to_string());
        let patches = cluster.patches.get(&key).unwrap();
        assert_eq!(
            patches[0]["metadata"]["labels"]["armada.io/gpu"],
            Value::Null
        );
    }

    #[test]
    fn database_cluster_applies_request_coefficients() {
        let cluster = FakeCluster::new();
        let config = TaskConfig {
            cpu_request_coefficient: 0.25,
            memory_request_coefficient: 0.5,
            ..TaskConfig::default()
        };
        let task = database_cluster(
            cluster,
            &config,
            "tenant-a",
            "orders-db",
            3,
            4_000,
            1_073_741_824,
            "50Gi",
        );

        let resources = &task.manifest()["spec"]["resources"];
        assert_eq!(resources["limits"]["cpu"], "4000m");
        assert_eq!(resources["requests"]["cpu"], "1000m");
        assert_eq!(resources["requests"]["memory"], "536870912");
    }

    #[test]
    fn ingress_route_references_middlewares() {
        let cluster = FakeCluster::new();
        let task = ingress_route(
            cluster,
            "tenant-a",
            "app-route",
            "app.example.com",
            "app-svc",
            8080,
            &["ip-allow".to_string()],
        );
        let route = &task.manifest()["spec"]["routes"][0];
        assert_eq!(route["match"], "Host(`app.example.com`)");
        assert_eq!(route["middlewares"][0]["name"], "ip-allow");
    }

    #[test]
    fn ip_allow_middleware_picks_the_tcp_kind() {
        let cluster = FakeCluster::new();
        let http = ip_allow_middleware(
            cluster.clone(),
            "tenant-a",
            "allow",
            &["10.0.0.0/8".to_string()],
            false,
        );
        assert!(http.describe().starts_with("Middleware/"));

        let tcp = ip_allow_middleware(
            cluster,
            "tenant-a",
            "allow-tcp",
            &["10.0.0.0/8".to_string()],
            true,
        );
        assert!(tcp.describe().starts_with("MiddlewareTCP/"));
    }
}
