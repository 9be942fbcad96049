//! Presence registry: which user currently owns which live connection.
//!
//! Components depend on the [`PresenceRegistry`] trait, never on the map
//! itself, so a shared backing store can replace [`InMemoryPresence`] when
//! the server runs as more than one instance.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use orbit_shared::types::{ConnectionId, UserId};

#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Bind `user` to `conn`, replacing any previous binding for `user`
    /// (last announce wins).  Returns the connection that was displaced, if
    /// any.
    async fn register(&self, user: UserId, conn: ConnectionId) -> Option<ConnectionId>;

    /// Drop whichever entry currently points at `conn`.  Returns the user
    /// that went offline, or `None` if `conn` held no presence (never
    /// announced, or already displaced by a newer announce).
    async fn unregister(&self, conn: ConnectionId) -> Option<UserId>;

    async fn lookup(&self, user: &UserId) -> Option<ConnectionId>;

    async fn online_count(&self) -> usize;
}

#[derive(Default)]
struct Entries {
    by_user: HashMap<UserId, ConnectionId>,
    /// Reverse index so `unregister` does not scan every entry.
    by_conn: HashMap<ConnectionId, UserId>,
}

/// Process-local registry.  Both indexes live under one lock so they can
/// never disagree.
#[derive(Default)]
pub struct InMemoryPresence {
    entries: RwLock<Entries>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceRegistry for InMemoryPresence {
    async fn register(&self, user: UserId, conn: ConnectionId) -> Option<ConnectionId> {
        let mut entries = self.entries.write().await;

        // The connection re-announced as someone else: release its old user.
        if let Some(previous_user) = entries.by_conn.get(&conn).cloned() {
            if previous_user != user && entries.by_user.get(&previous_user) == Some(&conn) {
                entries.by_user.remove(&previous_user);
            }
        }

        let displaced = entries.by_user.insert(user.clone(), conn);
        if let Some(old) = displaced {
            if old != conn {
                entries.by_conn.remove(&old);
            }
        }
        entries.by_conn.insert(conn, user);

        displaced.filter(|old| *old != conn)
    }

    async fn unregister(&self, conn: ConnectionId) -> Option<UserId> {
        let mut entries = self.entries.write().await;
        let user = entries.by_conn.remove(&conn)?;

        if entries.by_user.get(&user) == Some(&conn) {
            entries.by_user.remove(&user);
            Some(user)
        } else {
            debug!(conn = %conn, user = %user.short(), "Stale presence entry, already replaced");
            None
        }
    }

    async fn lookup(&self, user: &UserId) -> Option<ConnectionId> {
        self.entries.read().await.by_user.get(user).copied()
    }

    async fn online_count(&self) -> usize {
        self.entries.read().await.by_user.len()
    }
}
