//! Notifier collaborator: push messages to a user's topic
//!
//! Notifications are fire-and-forget: failures are logged as warnings and
//! never propagate. A failed notification must never break reconciliation.

use async_trait::async_trait;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

/// Trait for publishing messages to a user's notification topic.
///
/// Implementations are expected to be fire-and-forget: `publish()` logs a
/// warning on failure but never returns an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish a message to the given topic
    async fn publish(&self, topic: &str, message: &str);
}

/// Notifier that logs instead of delivering; default wiring until a
/// transport is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, topic: &str, message: &str) {
        info!(topic = %topic, message = %message, "notification");
    }
}

/// No-op implementation for tests.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, topic: &str, message: &str) {
        let _ = (topic, message);
    }
}

/// Log a delivery failure without propagating it.
///
/// Helper for transport-backed implementations.
pub fn log_delivery_failure(topic: &str, error: &dyn std::fmt::Display) {
    warn!(topic = %topic, error = %error, "failed to deliver notification");
}
