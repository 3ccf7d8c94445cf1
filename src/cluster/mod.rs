//! Per-cluster API client abstraction and cluster selection
//!
//! Each managed cluster is reached through a [`ClusterClient`]: a bundle of
//! API handles plus the cluster's identity. The core only requires "given a
//! cluster id, get a handle capable of CRUD calls" — the production
//! implementation wraps a kube-rs client, tests substitute mocks.

pub mod select;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Identity of one managed cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(String);

impl ClusterId {
    /// Wrap a cluster id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The live pool of clusters.
///
/// A `BTreeMap` keeps iteration order lexical by cluster id, which makes
/// "first encountered" tie-breaking in selection deterministic.
pub type ClusterPool = BTreeMap<ClusterId, Arc<dyn ClusterClient>>;

/// API identity of a resource type the fleet creates or deletes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceKind {
    /// Full apiVersion (e.g. "traefik.io/v1alpha1", "v1")
    pub api_version: String,
    /// Kind (e.g. "IngressRoute")
    pub kind: String,
    /// Plural resource name (e.g. "ingressroutes")
    pub plural: String,
}

impl ResourceKind {
    /// Build a kind from explicit apiVersion/kind, deriving the plural
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: pluralize_kind(kind),
        }
    }

    /// core/v1 PersistentVolumeClaim
    pub fn volume_claim() -> Self {
        Self::new("v1", "PersistentVolumeClaim")
    }

    /// storage.k8s.io/v1 StorageClass
    pub fn storage_class() -> Self {
        Self::new("storage.k8s.io/v1", "StorageClass")
    }

    /// CloudNativePG database cluster
    pub fn database_cluster() -> Self {
        Self::new("postgresql.cnpg.io/v1", "Cluster")
    }

    /// Traefik HTTP ingress route
    pub fn ingress_route() -> Self {
        Self::new("traefik.io/v1alpha1", "IngressRoute")
    }

    /// Traefik TCP ingress route
    pub fn ingress_route_tcp() -> Self {
        Self::new("traefik.io/v1alpha1", "IngressRouteTCP")
    }

    /// Traefik HTTP middleware
    pub fn middleware() -> Self {
        Self::new("traefik.io/v1alpha1", "Middleware")
    }

    /// Traefik TCP middleware
    pub fn middleware_tcp() -> Self {
        Self::new("traefik.io/v1alpha1", "MiddlewareTCP")
    }

    /// networking.k8s.io/v1 NetworkPolicy
    pub fn network_policy() -> Self {
        Self::new("networking.k8s.io/v1", "NetworkPolicy")
    }

    /// Helm chart release custom resource
    pub fn helm_chart() -> Self {
        Self::new("helm.cattle.io/v1", "HelmChart")
    }

    /// core/v1 Node
    pub fn node() -> Self {
        Self::new("v1", "Node")
    }

    /// Build the kube `ApiResource` for this kind
    pub fn api_resource(&self) -> ApiResource {
        let (group, version) = parse_api_version(&self.api_version);
        ApiResource {
            group,
            version,
            kind: self.kind.clone(),
            api_version: self.api_version.clone(),
            plural: self.plural.clone(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Split an apiVersion into (group, version); core resources have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

const KIND_PLURALS: &[(&str, &str)] = &[
    ("networkpolicy", "networkpolicies"),
    ("ingressroutetcp", "ingressroutetcps"),
    ("middlewaretcp", "middlewaretcps"),
];

/// Derive the plural resource name from a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Per-cluster bundle of API handles.
///
/// Every call distinguishes not-found from other failures: lookups return
/// `None`, deletes report whether the target existed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Identity of the cluster this client talks to
    fn cluster_id(&self) -> &ClusterId;

    /// Get a resource by name; `None` if it does not exist
    async fn get_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<Option<Value>, Error>;

    /// Create a resource from its manifest
    async fn create_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
        manifest: &Value,
    ) -> Result<Value, Error>;

    /// Delete a resource by name; `false` if it was already gone
    async fn delete_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<bool, Error>;

    /// Merge-patch a resource by name
    async fn patch_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
        patch: &Value,
    ) -> Result<(), Error>;

    /// List resources of a kind, optionally within a namespace
    async fn list_resources<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
    ) -> Result<Vec<Value>, Error>;

    /// Typed listing of the cluster's nodes
    async fn list_nodes(&self) -> Result<Vec<K8sNode>, Error>;
}

/// Production client wrapping kube-rs for one cluster.
pub struct KubeClusterClient {
    id: ClusterId,
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an already-built kube client
    pub fn new(id: ClusterId, client: Client) -> Self {
        Self { id, client }
    }

    /// Build a client from a kubeconfig file with the given read timeout
    pub async fn connect(
        id: ClusterId,
        kubeconfig: &Path,
        read_timeout: Duration,
    ) -> Result<Self, Error> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig).map_err(|e| {
            Error::internal("cluster", format!("failed to read kubeconfig: {}", e))
        })?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::internal("cluster", format!("failed to load kubeconfig: {}", e))
            })?;
        config.connect_timeout = Some(Duration::from_secs(5));
        config.read_timeout = Some(read_timeout);
        let client = Client::try_from(config)
            .map_err(|e| Error::internal("cluster", format!("failed to create client: {}", e)))?;
        Ok(Self { id, client })
    }

    /// The underlying kube client, for watch streams
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    fn api_for(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_value(obj: DynamicObject, kind: &ResourceKind) -> Result<Value, Error> {
    serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for(kind.kind.clone(), e.to_string()))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn cluster_id(&self) -> &ClusterId {
        &self.id
    }

    async fn get_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<Option<Value>, Error> {
        match self.api_for(kind, namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(to_value(obj, kind)?)),
            None => Ok(None),
        }
    }

    async fn create_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
        manifest: &Value,
    ) -> Result<Value, Error> {
        let ar = kind.api_resource();
        let mut obj = DynamicObject::new(name, &ar);
        if let Some(ns) = namespace {
            obj = obj.within(ns);
        }
        obj.data = manifest.clone();

        debug!(cluster = %self.id, kind = %kind, name = %name, "creating resource");
        let created = self
            .api_for(kind, namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        to_value(created, kind)
    }

    async fn delete_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<bool, Error> {
        debug!(cluster = %self.id, kind = %kind, name = %name, "deleting resource");
        match self
            .api_for(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_resource<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
        name: &str,
        patch: &Value,
    ) -> Result<(), Error> {
        self.api_for(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn list_resources<'a>(
        &self,
        kind: &ResourceKind,
        namespace: Option<&'a str>,
    ) -> Result<Vec<Value>, Error> {
        let list = self
            .api_for(kind, namespace)
            .list(&ListParams::default())
            .await?;
        list.items
            .into_iter()
            .map(|obj| to_value(obj, kind))
            .collect()
    }

    async fn list_nodes(&self) -> Result<Vec<K8sNode>, Error> {
        let api: Api<K8sNode> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_ids_order_lexically_in_the_pool() {
        let mut pool: BTreeMap<ClusterId, u32> = BTreeMap::new();
        pool.insert(ClusterId::new("c-berlin"), 1);
        pool.insert(ClusterId::new("a-oslo"), 2);
        pool.insert(ClusterId::new("b-paris"), 3);

        let order: Vec<&str> = pool.keys().map(|id| id.as_str()).collect();
        assert_eq!(order, vec!["a-oslo", "b-paris", "c-berlin"]);
    }

    #[test]
    fn resource_kinds_derive_plurals() {
        assert_eq!(ResourceKind::volume_claim().plural, "persistentvolumeclaims");
        assert_eq!(ResourceKind::storage_class().plural, "storageclasses");
        assert_eq!(ResourceKind::network_policy().plural, "networkpolicies");
        assert_eq!(ResourceKind::ingress_route_tcp().plural, "ingressroutetcps");
        assert_eq!(ResourceKind::node().plural, "nodes");
    }

    #[test]
    fn api_resource_splits_group_and_version() {
        let ar = ResourceKind::ingress_route().api_resource();
        assert_eq!(ar.group, "traefik.io");
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.api_version, "traefik.io/v1alpha1");

        let core = ResourceKind::volume_claim().api_resource();
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
    }

    #[test]
    fn display_includes_api_version_and_kind() {
        assert_eq!(
            ResourceKind::database_cluster().to_string(),
            "postgresql.cnpg.io/v1/Cluster"
        );
    }
}
