//! Error types for fleet operations
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries the contextual identifiers (cluster, resource, probe
//! target) that matter when hundreds of tasks are in flight at once.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Armada operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Cluster selection error
    ///
    /// Raised when a pinned target cluster is no longer part of the live
    /// pool. This is a hard error: silently reselecting would move a
    /// tenant's resources to a different cluster.
    #[error("selection error for cluster {cluster}: {message}")]
    Selection {
        /// Cluster id that failed selection
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// Mutating task error
    #[error("task error [{resource}] on {cluster}: {message}")]
    Task {
        /// Resource identity the task was mutating
        resource: String,
        /// Target cluster id
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// Probe error (network ping or kubelet HTTP)
    #[error("probe error [{target}]: {message}")]
    Probe {
        /// Probe target (ip or url)
        target: String,
        /// Description of what failed
        message: String,
    },

    /// Node store error
    #[error("store error: {message}")]
    Store {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a selection error for the given cluster
    pub fn selection(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Selection {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a task error with resource and cluster context
    pub fn task(
        resource: impl Into<String>,
        cluster: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Task {
            resource: resource.into(),
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a probe error for the given target
    pub fn probe(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Probe {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a store error with the given message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_error_names_the_missing_cluster() {
        let err = Error::selection("edge-eu-1", "not in live pool");
        assert!(err.to_string().contains("edge-eu-1"));
        assert!(err.to_string().contains("not in live pool"));
    }

    #[test]
    fn task_error_carries_resource_and_cluster() {
        let err = Error::task("PersistentVolumeClaim/data-0", "c1", "create rejected");
        let text = err.to_string();
        assert!(text.contains("PersistentVolumeClaim/data-0"));
        assert!(text.contains("c1"));
        assert!(text.contains("create rejected"));
    }

    #[test]
    fn probe_error_names_the_target() {
        let err = Error::probe("10.0.0.7", "ping exited non-zero");
        assert!(err.to_string().contains("10.0.0.7"));
    }

    #[test]
    fn errors_are_categorized_for_handling() {
        fn is_hard_failure(err: &Error) -> bool {
            // Probe failures feed the health state machine; everything else
            // surfaces to the caller.
            !matches!(err, Error::Probe { .. })
        }

        assert!(is_hard_failure(&Error::selection("c1", "gone")));
        assert!(is_hard_failure(&Error::store("connection lost")));
        assert!(!is_hard_failure(&Error::probe("10.0.0.1", "timeout")));
    }

    #[test]
    fn constructors_accept_str_and_string() {
        let cluster = "prod-us-west".to_string();
        let err = Error::selection(cluster, format!("missing at {}", 3));
        assert!(err.to_string().contains("prod-us-west"));
    }
}
