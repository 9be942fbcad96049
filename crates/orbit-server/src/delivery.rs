//! Best-effort single-recipient delivery.
//!
//! At most once: an event reaches the recipient's current connection or it
//! is gone.  Nothing is queued for offline users and nothing is retried.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use orbit_shared::protocol::Envelope;
use orbit_shared::types::UserId;

use crate::connections::{ConnectionTable, SendOutcome};
use crate::presence::PresenceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// No presence entry, or the connection closed mid-send.
    RecipientAbsent,
    /// The recipient's outbound queue was full.
    Dropped,
}

#[derive(Clone)]
pub struct DeliveryBridge {
    presence: Arc<dyn PresenceRegistry>,
    connections: Arc<ConnectionTable>,
}

impl DeliveryBridge {
    pub fn new(presence: Arc<dyn PresenceRegistry>, connections: Arc<ConnectionTable>) -> Self {
        Self {
            presence,
            connections,
        }
    }

    /// Send `payload` tagged with `event` to whichever connection `to`
    /// currently holds.  Silent no-op when `to` is offline.
    pub async fn deliver(&self, to: &UserId, event: &str, payload: Value) -> DeliveryOutcome {
        self.deliver_envelope(to, Envelope::new(event, payload)).await
    }

    pub async fn deliver_envelope(&self, to: &UserId, envelope: Envelope) -> DeliveryOutcome {
        let Some(conn) = self.presence.lookup(to).await else {
            debug!(to = %to.short(), event = %envelope.event, "Recipient offline, skipping");
            return DeliveryOutcome::RecipientAbsent;
        };

        let event = envelope.event.clone();
        match self.connections.send(conn, envelope).await {
            SendOutcome::Queued => {
                debug!(to = %to.short(), conn = %conn, event = %event, "Event delivered");
                DeliveryOutcome::Delivered
            }
            SendOutcome::Full => {
                warn!(to = %to.short(), conn = %conn, event = %event, "Dropping event for slow connection");
                DeliveryOutcome::Dropped
            }
            SendOutcome::Closed => {
                debug!(to = %to.short(), conn = %conn, event = %event, "Connection closed before send");
                DeliveryOutcome::RecipientAbsent
            }
        }
    }

    pub async fn is_present(&self, user: &UserId) -> bool {
        self.presence.lookup(user).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::InMemoryPresence;
    use serde_json::json;

    fn bridge(capacity: usize) -> (DeliveryBridge, Arc<InMemoryPresence>, Arc<ConnectionTable>) {
        let presence = Arc::new(InMemoryPresence::new());
        let connections = Arc::new(ConnectionTable::new(capacity));
        (
            DeliveryBridge::new(presence.clone(), connections.clone()),
            presence,
            connections,
        )
    }

    #[tokio::test]
    async fn test_deliver_to_online_user() {
        let (bridge, presence, connections) = bridge(8);
        let (conn, mut rx) = connections.open().await;
        presence.register(UserId::from("bob"), conn).await;

        let outcome = bridge
            .deliver(&UserId::from("bob"), "message:new", json!({"text": "hi"}))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.event, "message:new");
        assert_eq!(envelope.data, json!({"text": "hi"}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_to_offline_user_is_silent() {
        let (bridge, _presence, connections) = bridge(8);
        let (_conn, mut rx) = connections.open().await;

        let outcome = bridge
            .deliver(&UserId::from("ghost"), "notification:new", json!({}))
            .await;

        assert_eq!(outcome, DeliveryOutcome::RecipientAbsent);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_newest_connection_receives() {
        let (bridge, presence, connections) = bridge(8);
        let user = UserId::from("u");
        let (c1, mut rx1) = connections.open().await;
        let (c2, mut rx2) = connections.open().await;

        presence.register(user.clone(), c1).await;
        presence.register(user.clone(), c2).await;

        bridge.deliver(&user, "message:new", json!(1)).await;

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().data, json!(1));
    }

    #[tokio::test]
    async fn test_same_recipient_order_preserved() {
        let (bridge, presence, connections) = bridge(8);
        let (conn, mut rx) = connections.open().await;
        presence.register(UserId::from("bob"), conn).await;

        for i in 0..5 {
            bridge.deliver(&UserId::from("bob"), "message:new", json!(i)).await;
        }

        for i in 0..5 {
            assert_eq!(rx.try_recv().unwrap().data, json!(i));
        }
    }

    #[tokio::test]
    async fn test_slow_connection_drops() {
        let (bridge, presence, connections) = bridge(1);
        let (conn, _rx) = connections.open().await;
        presence.register(UserId::from("bob"), conn).await;

        assert_eq!(
            bridge.deliver(&UserId::from("bob"), "e", json!(1)).await,
            DeliveryOutcome::Delivered
        );
        assert_eq!(
            bridge.deliver(&UserId::from("bob"), "e", json!(2)).await,
            DeliveryOutcome::Dropped
        );
    }
}
