//! Connection lifecycle: the only component that opens and closes
//! connections and the only writer of presence.
//!
//! The announced user id is trusted as-is.  Whatever sits in front of the
//! WebSocket endpoint must have authenticated the session already; without
//! that, any client can claim any user's presence.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use orbit_shared::protocol::{ClientEvent, Envelope};
use orbit_shared::types::{ConnectionId, UserId};

use crate::call::{CallSignal, CallSignalingRelay, RelayOutcome};
use crate::connections::ConnectionTable;
use crate::presence::PresenceRegistry;

#[derive(Clone)]
pub struct ConnectionLifecycle {
    presence: Arc<dyn PresenceRegistry>,
    connections: Arc<ConnectionTable>,
    relay: CallSignalingRelay,
}

impl ConnectionLifecycle {
    pub fn new(
        presence: Arc<dyn PresenceRegistry>,
        connections: Arc<ConnectionTable>,
        relay: CallSignalingRelay,
    ) -> Self {
        Self {
            presence,
            connections,
            relay,
        }
    }

    /// A transport connected.  No user is bound until it announces.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<Envelope>) {
        self.connections.open().await
    }

    /// `user:online`.  Returns `false` if the connection already closed or
    /// the user id is empty.
    pub async fn announce(&self, conn: ConnectionId, user: UserId) -> bool {
        if user.is_empty() {
            debug!(conn = %conn, "Ignoring announce with empty user id");
            return false;
        }

        let previous = self.connections.user_of(conn).await;
        if !self.connections.set_user(conn, user.clone()).await {
            debug!(conn = %conn, user = %user.short(), "Announce on closed connection");
            return false;
        }

        if let Some(displaced) = self.presence.register(user.clone(), conn).await {
            // Duplicate announce: not an error, the older connection just
            // stops being reachable.
            info!(
                user = %user.short(),
                conn = %conn,
                displaced = %displaced,
                "Presence moved to newer connection"
            );
        } else {
            info!(user = %user.short(), conn = %conn, "User online");
        }

        // Same connection, different identity: the old user lost presence.
        if let Some(previous) = previous.filter(|previous| *previous != user) {
            if self.presence.lookup(&previous).await.is_none() {
                debug!(conn = %conn, from = %previous.short(), to = %user.short(), "Connection switched user");
                self.relay.drop_user(&previous).await;
            }
        }

        true
    }

    /// Transport closed, cleanly or not.  Safe to call more than once.
    pub async fn disconnect(&self, conn: ConnectionId) {
        self.connections.close(conn).await;

        match self.presence.unregister(conn).await {
            Some(user) => {
                info!(user = %user.short(), conn = %conn, "User offline");
                self.relay.drop_user(&user).await;
            }
            None => debug!(conn = %conn, "Closed connection held no presence"),
        }
    }

    /// Dispatch one inbound event from `conn`.
    pub async fn handle_event(&self, conn: ConnectionId, event: ClientEvent) {
        let name = event.name();

        if let ClientEvent::UserOnline(user) = event {
            self.announce(conn, user).await;
            return;
        }

        let Some((to, signal)) = CallSignal::from_event(event) else {
            return;
        };

        match self.relay_from(conn, &to, signal).await {
            RelayOutcome::Forwarded => {}
            outcome => debug!(conn = %conn, event = name, to = %to.short(), outcome = ?outcome, "Signal not forwarded"),
        }
    }

    async fn relay_from(&self, conn: ConnectionId, to: &UserId, signal: CallSignal) -> RelayOutcome {
        let Some(from) = self.connections.user_of(conn).await else {
            return RelayOutcome::Anonymous;
        };
        self.relay.relay(&from, to, signal).await
    }

    pub async fn open_connections(&self) -> usize {
        self.connections.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::delivery::DeliveryBridge;
    use crate::presence::InMemoryPresence;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        lifecycle: ConnectionLifecycle,
        presence: Arc<InMemoryPresence>,
        relay: CallSignalingRelay,
        bridge: DeliveryBridge,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_timeout(None)
        }

        fn with_timeout(ring_timeout: Option<Duration>) -> Self {
            let presence = Arc::new(InMemoryPresence::new());
            let connections = Arc::new(ConnectionTable::new(16));
            let bridge = DeliveryBridge::new(presence.clone(), connections.clone());
            let relay = CallSignalingRelay::new(bridge.clone(), ring_timeout);
            Self {
                lifecycle: ConnectionLifecycle::new(presence.clone(), connections, relay.clone()),
                presence,
                relay,
                bridge,
            }
        }

        async fn online(&self, user: &str) -> (ConnectionId, mpsc::Receiver<Envelope>) {
            let (conn, rx) = self.lifecycle.connect().await;
            assert!(self.lifecycle.announce(conn, UserId::from(user)).await);
            (conn, rx)
        }

        async fn send(&self, conn: ConnectionId, frame: &str) {
            let event = ClientEvent::parse(frame).unwrap();
            self.lifecycle.handle_event(conn, event).await;
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Envelope>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_without_announce_is_not_present() {
        let fx = Fixture::new();
        let (_conn, _rx) = fx.lifecycle.connect().await;

        assert_eq!(fx.presence.online_count().await, 0);
        assert_eq!(fx.lifecycle.open_connections().await, 1);
    }

    #[tokio::test]
    async fn test_announce_via_event() {
        let fx = Fixture::new();
        let (conn, _rx) = fx.lifecycle.connect().await;

        fx.send(conn, r#"{"event":"user:online","data":"alice"}"#).await;

        assert_eq!(fx.presence.lookup(&UserId::from("alice")).await, Some(conn));
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_newer_presence() {
        let fx = Fixture::new();
        let user = UserId::from("u");
        let (c1, _rx1) = fx.online("u").await;
        let (c2, mut rx2) = fx.online("u").await;

        fx.lifecycle.disconnect(c1).await;

        assert_eq!(fx.presence.lookup(&user).await, Some(c2));
        fx.bridge.deliver(&user, "message:new", json!("still here")).await;
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_presence() {
        let fx = Fixture::new();
        let user = UserId::from("u");
        let (conn, _rx) = fx.online("u").await;

        fx.lifecycle.disconnect(conn).await;
        fx.lifecycle.disconnect(conn).await;

        assert_eq!(fx.presence.lookup(&user).await, None);
        assert_eq!(fx.lifecycle.open_connections().await, 0);
    }

    #[tokio::test]
    async fn test_reannounce_as_other_user_moves_presence() {
        let fx = Fixture::new();
        let (conn, _rx) = fx.online("old").await;

        assert!(fx.lifecycle.announce(conn, UserId::from("new")).await);

        assert_eq!(fx.presence.lookup(&UserId::from("old")).await, None);
        assert_eq!(fx.presence.lookup(&UserId::from("new")).await, Some(conn));
    }

    #[tokio::test]
    async fn test_empty_user_id_ignored() {
        let fx = Fixture::new();
        let (conn, _rx) = fx.lifecycle.connect().await;

        assert!(!fx.lifecycle.announce(conn, UserId::from("")).await);
        assert_eq!(fx.presence.online_count().await, 0);
    }

    #[tokio::test]
    async fn test_call_round_trip_over_events() {
        let fx = Fixture::new();
        let (x, mut x_rx) = fx.online("x").await;
        let (y, mut y_rx) = fx.online("y").await;

        fx.send(
            x,
            r#"{"event":"call:start","data":{"to":"y","offer":{"sdp":"o"},"type":"audio"}}"#,
        )
        .await;
        let incoming = drain(&mut y_rx);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].event, "call:incoming");
        assert_eq!(
            incoming[0].data,
            json!({"from": "x", "offer": {"sdp": "o"}, "type": "audio"})
        );

        fx.send(y, r#"{"event":"call:answer","data":{"to":"x","answer":{"sdp":"a"}}}"#)
            .await;
        let answer = drain(&mut x_rx);
        assert_eq!(answer[0].event, "call:answer");
        assert_eq!(answer[0].data, json!({"answer": {"sdp": "a"}, "from": "y"}));

        fx.send(x, r#"{"event":"call:end","data":{"to":"y"}}"#).await;
        assert_eq!(drain(&mut y_rx)[0].data, json!({"from": "x"}));
    }

    #[tokio::test]
    async fn test_signal_from_anonymous_connection_dropped() {
        let fx = Fixture::new();
        let (anon, _rx) = fx.lifecycle.connect().await;
        let (_y, mut y_rx) = fx.online("y").await;

        fx.send(
            anon,
            r#"{"event":"call:start","data":{"to":"y","offer":{},"type":"video"}}"#,
        )
        .await;

        assert!(drain(&mut y_rx).is_empty());
        assert_eq!(fx.relay.active_calls().await, 0);
    }

    #[tokio::test]
    async fn test_answer_without_start_dropped() {
        let fx = Fixture::new();
        let (_x, mut x_rx) = fx.online("x").await;
        let (y, _y_rx) = fx.online("y").await;

        fx.send(y, r#"{"event":"call:answer","data":{"to":"x","answer":{}}}"#)
            .await;

        assert!(drain(&mut x_rx).is_empty());
    }

    #[tokio::test]
    async fn test_call_to_offline_user_silent() {
        let fx = Fixture::new();
        let (x, mut x_rx) = fx.online("x").await;

        fx.send(
            x,
            r#"{"event":"call:start","data":{"to":"nobody","offer":{},"type":"video"}}"#,
        )
        .await;

        assert!(drain(&mut x_rx).is_empty());
        assert_eq!(fx.relay.active_calls().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_clears_calls_silently() {
        let fx = Fixture::new();
        let (x, _x_rx) = fx.online("x").await;
        let (y, mut y_rx) = fx.online("y").await;

        fx.send(
            x,
            r#"{"event":"call:start","data":{"to":"y","offer":{},"type":"video"}}"#,
        )
        .await;
        drain(&mut y_rx);

        fx.lifecycle.disconnect(x).await;

        assert_eq!(
            fx.relay.state_of(&UserId::from("x"), &UserId::from("y")).await,
            CallState::Idle
        );
        assert!(drain(&mut y_rx).is_empty());

        // The callee's late answer has nowhere to go.
        fx.send(y, r#"{"event":"call:answer","data":{"to":"x","answer":{}}}"#)
            .await;
        assert_eq!(fx.relay.active_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_call_times_out() {
        let fx = Fixture::with_timeout(Some(Duration::from_secs(45)));
        let (x, mut x_rx) = fx.online("x").await;
        let (_y, mut y_rx) = fx.online("y").await;

        fx.send(
            x,
            r#"{"event":"call:start","data":{"to":"y","offer":{},"type":"audio"}}"#,
        )
        .await;
        drain(&mut y_rx);

        tokio::time::sleep(Duration::from_secs(46)).await;

        let ended = drain(&mut x_rx);
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].event, "call:end");
        assert_eq!(ended[0].data, json!({"from": "y"}));
        assert_eq!(fx.relay.active_calls().await, 0);
    }
}
