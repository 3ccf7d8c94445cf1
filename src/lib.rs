//! Armada - control-plane core for a fleet of independent Kubernetes clusters
//!
//! Armada operates cluster-scoped resources (volumes, storage classes, database
//! clusters, ingress routes, middlewares, network policies, node labels, Helm
//! releases) on behalf of tenants across many clusters at once, and keeps an
//! internal inventory of physical nodes synchronized with what each cluster
//! reports.
//!
//! # Modules
//!
//! - [`wait`] - Cooperative polling primitive used by every readiness wait
//! - [`task`] - Idempotent mutating-task lifecycle (execute, poll, succeed/skip)
//! - [`cluster`] - Per-cluster API client abstraction and cluster selection
//! - [`node`] - Node inventory record, event reconciliation, health sweep
//! - [`store`] - NodeStore collaborator (persistence seam)
//! - [`notify`] - Notifier collaborator (user-facing push messages)
//! - [`reserve`] - Reservation ledger linking new nodes to owning users
//! - [`probe`] - Network/kubelet probing collaborator
//! - [`config`] - Injected configuration value objects
//! - [`error`] - Error types for fleet operations

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod node;
pub mod notify;
pub mod probe;
pub mod reserve;
pub mod store;
pub mod task;
pub mod wait;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label/annotation prefix for keys owned by Armada
pub const LABEL_PREFIX: &str = "armada.io";
