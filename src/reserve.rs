//! Reservation ledger: linking newly discovered nodes to owning users
//!
//! A reservation is a placeholder created when a user is promised a node
//! that has not joined its cluster yet. The reconciler resolves the owner
//! of an incoming node through this seam and marks the reservation
//! fulfilled once the record exists. Nodes without a resolvable owner are
//! dropped, not escalated: ownerless join events are expected under normal
//! multi-tenant churn.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[cfg(test)]
use mockall::automock;

use crate::node::NodeOwner;

/// A pending or fulfilled node reservation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Reservation id
    pub id: String,
    /// The user the node will belong to
    pub owner: NodeOwner,
    /// Whether a node record has been created against this reservation
    pub fulfilled: bool,
    /// When the reservation was placed
    pub created_at: DateTime<Utc>,
}

/// Seam resolving the owner of an incoming node.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReservationResolver: Send + Sync {
    /// Resolve the reservation covering the given node, if any.
    ///
    /// Expired or already-consumed reservations resolve to `None`.
    async fn resolve(&self, cluster: &str, node_name: &str) -> Option<Reservation>;

    /// Mark a reservation fulfilled once the node record exists
    async fn mark_fulfilled(&self, id: &str);
}

/// In-memory reservation ledger.
///
/// Reservations are keyed by `(cluster, node_name)` and expire after a
/// TTL; the expiry uses the token TTL from the task configuration so both
/// one-time credentials and placeholders age out together.
pub struct InMemoryReservations {
    entries: DashMap<(String, String), Reservation>,
    ttl: Duration,
}

impl InMemoryReservations {
    /// Create a ledger whose reservations expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Place a reservation for a node expected to join `cluster` as
    /// `node_name`, owned by `owner`.
    pub fn place(&self, cluster: &str, node_name: &str, owner: NodeOwner) -> Reservation {
        let reservation = Reservation {
            id: format!("{}/{}", cluster, node_name),
            owner,
            fulfilled: false,
            created_at: Utc::now(),
        };
        self.entries.insert(
            (cluster.to_string(), node_name.to_string()),
            reservation.clone(),
        );
        reservation
    }

    fn expired(&self, reservation: &Reservation) -> bool {
        let age = Utc::now().signed_duration_since(reservation.created_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(false)
    }
}

#[async_trait]
impl ReservationResolver for InMemoryReservations {
    async fn resolve(&self, cluster: &str, node_name: &str) -> Option<Reservation> {
        let key = (cluster.to_string(), node_name.to_string());
        let reservation = self.entries.get(&key)?.value().clone();
        if self.expired(&reservation) {
            self.entries.remove(&key);
            return None;
        }
        Some(reservation)
    }

    async fn mark_fulfilled(&self, id: &str) {
        for mut entry in self.entries.iter_mut() {
            if entry.value().id == id {
                entry.value_mut().fulfilled = true;
                return;
            }
        }
    }
}
