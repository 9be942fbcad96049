use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use orbit_shared::protocol::Envelope;
use orbit_shared::types::{ConnectionId, UserId};

/// Result of handing one envelope to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queue full: the consumer is too slow, the event is dropped.
    Full,
    /// The connection is gone (closed between lookup and send).
    Closed,
}

/// One open live connection.
struct ConnectionEntry {
    outbound: mpsc::Sender<Envelope>,
    user: Option<UserId>,
    connected_at: DateTime<Utc>,
}

/// Every open connection and its outbound queue.
///
/// Only the lifecycle manager opens and closes entries; everybody else
/// reaches a connection by enqueueing on its channel.
pub struct ConnectionTable {
    entries: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    capacity: usize,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Allocate a connection id and its outbound queue.  The receiver is
    /// drained by the transport writer.
    pub async fn open(&self) -> (ConnectionId, mpsc::Receiver<Envelope>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut entries = self.entries.write().await;
        entries.insert(
            id,
            ConnectionEntry {
                outbound: tx,
                user: None,
                connected_at: Utc::now(),
            },
        );

        info!(conn = %id, open = entries.len(), "Connection opened");
        (id, rx)
    }

    /// Remove the entry, dropping its sender so the writer drains and stops.
    pub async fn close(&self, id: ConnectionId) -> Option<UserId> {
        let mut entries = self.entries.write().await;
        let entry = entries.remove(&id)?;

        info!(
            conn = %id,
            open = entries.len(),
            lived_secs = (Utc::now() - entry.connected_at).num_seconds(),
            "Connection closed"
        );
        entry.user
    }

    /// Record which user announced on this connection.  Returns `false` if
    /// the connection is already closed.
    pub async fn set_user(&self, id: ConnectionId, user: UserId) -> bool {
        match self.entries.write().await.get_mut(&id) {
            Some(entry) => {
                entry.user = Some(user);
                true
            }
            None => false,
        }
    }

    pub async fn user_of(&self, id: ConnectionId) -> Option<UserId> {
        self.entries
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.user.clone())
    }

    /// Non-blocking enqueue.  Ordering is preserved per connection.
    pub async fn send(&self, id: ConnectionId, envelope: Envelope) -> SendOutcome {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(&id) else {
            return SendOutcome::Closed;
        };

        match entry.outbound.try_send(envelope) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                debug!(conn = %id, event = %envelope.event, "Outbound queue full");
                SendOutcome::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_send_close() {
        let table = ConnectionTable::new(8);
        let (id, mut rx) = table.open().await;

        let outcome = table.send(id, Envelope::new("ping", json!(1))).await;
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(rx.recv().await.unwrap().event, "ping");

        table.close(id).await;
        assert_eq!(table.len().await, 0);
        assert!(rx.recv().await.is_none());
        assert_eq!(table.send(id, Envelope::new("ping", json!(2))).await, SendOutcome::Closed);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let table = ConnectionTable::new(1);
        let (id, _rx) = table.open().await;

        assert_eq!(table.send(id, Envelope::new("a", json!(null))).await, SendOutcome::Queued);
        assert_eq!(table.send(id, Envelope::new("b", json!(null))).await, SendOutcome::Full);
    }

    #[tokio::test]
    async fn test_user_binding() {
        let table = ConnectionTable::new(4);
        let (id, _rx) = table.open().await;
        assert_eq!(table.user_of(id).await, None);

        assert!(table.set_user(id, UserId::from("alice")).await);
        assert_eq!(table.user_of(id).await, Some(UserId::from("alice")));
        assert_eq!(table.close(id).await, Some(UserId::from("alice")));
        assert!(!table.set_user(id, UserId::from("bob")).await);
    }
}
