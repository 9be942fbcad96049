//! The realtime core as the rest of the server sees it.
//!
//! Request handlers that have already committed a record call the `emit_*`
//! helpers to push it live; the WebSocket endpoint drives [`lifecycle`].
//!
//! [`lifecycle`]: Realtime::lifecycle

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use orbit_shared::constants::{
    DEFAULT_OUTBOUND_QUEUE, DEFAULT_RING_TIMEOUT_SECS, EVENT_COMMUNITY_MESSAGE_NEW,
    EVENT_MESSAGE_NEW, EVENT_NOTIFICATION_NEW,
};
use orbit_shared::types::{CommunityId, UserId};

use crate::broadcast::{BroadcastReport, CommunityBroadcaster};
use crate::call::CallSignalingRelay;
use crate::connections::ConnectionTable;
use crate::delivery::{DeliveryBridge, DeliveryOutcome};
use crate::lifecycle::ConnectionLifecycle;
use crate::presence::PresenceRegistry;
use crate::roster::RosterSource;

#[derive(Debug, Clone, Copy)]
pub struct RealtimeOptions {
    pub outbound_queue: usize,
    /// `None` lets calls ring until someone hangs up.
    pub ring_timeout: Option<Duration>,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            ring_timeout: Some(Duration::from_secs(DEFAULT_RING_TIMEOUT_SECS)),
        }
    }
}

#[derive(Clone)]
pub struct Realtime {
    presence: Arc<dyn PresenceRegistry>,
    lifecycle: ConnectionLifecycle,
    bridge: DeliveryBridge,
    broadcaster: CommunityBroadcaster,
    relay: CallSignalingRelay,
}

impl Realtime {
    pub fn new(
        presence: Arc<dyn PresenceRegistry>,
        rosters: Arc<dyn RosterSource>,
        options: RealtimeOptions,
    ) -> Self {
        let connections = Arc::new(ConnectionTable::new(options.outbound_queue));
        let bridge = DeliveryBridge::new(presence.clone(), connections.clone());
        let relay = CallSignalingRelay::new(bridge.clone(), options.ring_timeout);
        let lifecycle = ConnectionLifecycle::new(presence.clone(), connections, relay.clone());
        let broadcaster = CommunityBroadcaster::new(rosters, bridge.clone());

        Self {
            presence,
            lifecycle,
            bridge,
            broadcaster,
            relay,
        }
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    pub async fn deliver_to_user(&self, to: &UserId, event: &str, payload: Value) -> DeliveryOutcome {
        self.bridge.deliver(to, event, payload).await
    }

    pub async fn broadcast_to_community(
        &self,
        community_id: &CommunityId,
        event: &str,
        payload: Value,
    ) -> BroadcastReport {
        self.broadcaster.broadcast(community_id, event, payload).await
    }

    /// Generic push of any serializable record.
    pub async fn emit_to_user<T: Serialize>(&self, to: &UserId, event: &str, record: &T) {
        match serde_json::to_value(record) {
            Ok(payload) => {
                self.deliver_to_user(to, event, payload).await;
            }
            Err(e) => warn!(to = %to.short(), event, error = %e, "Failed to encode record"),
        }
    }

    pub async fn emit_notification<T: Serialize>(&self, to: &UserId, notification: &T) {
        self.emit_to_user(to, EVENT_NOTIFICATION_NEW, notification).await;
    }

    pub async fn emit_direct_message<T: Serialize>(&self, to: &UserId, message: &T) {
        self.emit_to_user(to, EVENT_MESSAGE_NEW, message).await;
    }

    pub async fn emit_community_message<T: Serialize>(
        &self,
        community_id: &CommunityId,
        message: &T,
    ) -> BroadcastReport {
        match serde_json::to_value(message) {
            Ok(payload) => {
                self.broadcast_to_community(community_id, EVENT_COMMUNITY_MESSAGE_NEW, payload)
                    .await
            }
            Err(e) => {
                warn!(community = %community_id, error = %e, "Failed to encode community message");
                BroadcastReport::default()
            }
        }
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.presence.lookup(user).await.is_some()
    }

    pub async fn online_users(&self) -> usize {
        self.presence.online_count().await
    }

    pub async fn active_calls(&self) -> usize {
        self.relay.active_calls().await
    }
}
