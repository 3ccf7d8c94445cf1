//! Cluster selection strategies
//!
//! Given the live pool of clusters, a strategy picks the one that should
//! receive a workload, or none if no cluster qualifies. Strategies are pure
//! readers: they consult the node inventory through the store and never
//! mutate anything. Which strategy applies to which workload is policy
//! decided by the caller, not part of the algorithms here.

use rand::seq::IteratorRandom;
use tracing::{debug, warn};

use crate::cluster::{ClusterId, ClusterPool};
use crate::node::{ComputeType, Node};
use crate::store::NodeStore;
use crate::Error;

/// Workload profile narrowing the candidate pool before resource ranking
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Profile {
    /// Keep clusters with at least one GPU-capable node
    Gpu,
    /// Keep clusters with at least one node in the requested datacenter,
    /// or any datacenter-pinned node when none is requested
    Hpc {
        /// Requested datacenter, if any
        datacenter: Option<String>,
    },
    /// Keep clusters containing at least one node owned by the user
    MyNode {
        /// Requesting user id
        user: String,
    },
}

/// Which capacity aggregate ranks the candidates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceMetric {
    /// Sum of CPU capacity in millicores
    Cpu,
    /// Sum of memory capacity in bytes
    Memory,
}

/// Whether the strongest or the weakest cluster wins.
///
/// Low steers low-requirement/onboarding workloads to the weakest cluster
/// to balance load; High steers heavy workloads to the strongest cluster
/// to avoid fragmentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    /// Pick the cluster with the highest aggregate
    High,
    /// Pick the cluster with the lowest aggregate
    Low,
}

/// Closed set of selection strategies
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// The target cluster is already pinned; missing from the pool is a
    /// hard error, never a silent reselect
    Reuse {
        /// The pinned cluster
        cluster: ClusterId,
    },
    /// Uniform choice among pool keys
    Random,
    /// Profile filter, then capacity ranking
    ResourceBased {
        /// Optional profile filter applied before ranking
        profile: Option<Profile>,
        /// Capacity aggregate used for ranking
        metric: ResourceMetric,
        /// Ranking direction
        mode: SelectionMode,
    },
}

impl SelectionStrategy {
    /// Pick a cluster from the pool, or `None` if no cluster qualifies.
    pub async fn select(
        &self,
        pool: &ClusterPool,
        store: &dyn NodeStore,
    ) -> Result<Option<ClusterId>, Error> {
        match self {
            Self::Reuse { cluster } => {
                if pool.contains_key(cluster) {
                    Ok(Some(cluster.clone()))
                } else {
                    Err(Error::selection(
                        cluster.as_str(),
                        "pinned cluster is no longer part of the live pool",
                    ))
                }
            }
            Self::Random => Ok(pool.keys().choose(&mut rand::thread_rng()).cloned()),
            Self::ResourceBased {
                profile,
                metric,
                mode,
            } => select_by_resources(pool, store, profile.as_ref(), *metric, *mode).await,
        }
    }
}

async fn select_by_resources(
    pool: &ClusterPool,
    store: &dyn NodeStore,
    profile: Option<&Profile>,
    metric: ResourceMetric,
    mode: SelectionMode,
) -> Result<Option<ClusterId>, Error> {
    let mut best: Option<(ClusterId, u64)> = None;

    // BTreeMap iteration is lexical by cluster id, so ties keep the first
    // (lowest) id deterministically.
    for cluster in pool.keys() {
        let nodes = match store.find_by_cluster(cluster.as_str()).await {
            Ok(nodes) => nodes,
            Err(e) => {
                // A failing inventory query contributes an empty cluster
                // rather than aborting the whole selection.
                warn!(cluster = %cluster, error = %e, "inventory query failed during selection");
                Vec::new()
            }
        };

        if let Some(profile) = profile {
            if !matches_profile(&nodes, profile) {
                continue;
            }
        }

        let aggregate = nodes
            .iter()
            .map(|node| match metric {
                ResourceMetric::Cpu => node.resources.capacity_cpu_millis,
                ResourceMetric::Memory => node.resources.capacity_memory_bytes,
            })
            .sum::<u64>();
        debug!(cluster = %cluster, aggregate, "selection candidate");

        let better = match (&best, mode) {
            (None, _) => true,
            (Some((_, current)), SelectionMode::High) => aggregate > *current,
            (Some((_, current)), SelectionMode::Low) => aggregate < *current,
        };
        if better {
            best = Some((cluster.clone(), aggregate));
        }
    }

    Ok(best.map(|(cluster, _)| cluster))
}

fn matches_profile(nodes: &[Node], profile: &Profile) -> bool {
    match profile {
        Profile::Gpu => nodes
            .iter()
            .any(|node| node.compute_type == ComputeType::Gpu),
        Profile::Hpc { datacenter } => match datacenter {
            Some(dc) => nodes.iter().any(|node| node.datacenter.as_deref() == Some(dc)),
            // no datacenter requested: any datacenter-pinned node counts
            None => nodes.iter().any(|node| node.datacenter.is_some()),
        },
        Profile::MyNode { user } => nodes.iter().any(|node| node.owner.user == *user),
    }
}
