//! Community fan-out: resolve the roster, deliver to whoever is online.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use orbit_shared::protocol::Envelope;
use orbit_shared::types::CommunityId;

use crate::delivery::{DeliveryBridge, DeliveryOutcome};
use crate::roster::RosterSource;

/// What one broadcast did.  Informational only; broadcasts never fail
/// towards the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// `false` when the community could not be resolved.
    pub resolved: bool,
    pub recipients: usize,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct CommunityBroadcaster {
    rosters: Arc<dyn RosterSource>,
    bridge: DeliveryBridge,
}

impl CommunityBroadcaster {
    pub fn new(rosters: Arc<dyn RosterSource>, bridge: DeliveryBridge) -> Self {
        Self { rosters, bridge }
    }

    /// Deliver `payload` once to every online member, admin and the
    /// creator of `community_id`.
    ///
    /// The roster is a snapshot taken before the sends; a member removed
    /// while the fan-out runs may still receive this event.
    pub async fn broadcast(
        &self,
        community_id: &CommunityId,
        event: &str,
        payload: Value,
    ) -> BroadcastReport {
        let roster = match self.rosters.find_community_roster(community_id).await {
            Ok(Some(roster)) => roster,
            Ok(None) => {
                warn!(community = %community_id, event, "Community not found, broadcast aborted");
                return BroadcastReport::default();
            }
            Err(e) => {
                warn!(community = %community_id, event, error = %e, "Roster lookup failed, broadcast aborted");
                return BroadcastReport::default();
            }
        };

        let recipients = roster.recipients();
        let envelope = Envelope::new(event, payload);
        let mut report = BroadcastReport {
            resolved: true,
            recipients: recipients.len(),
            ..BroadcastReport::default()
        };

        for user in &recipients {
            match self.bridge.deliver_envelope(user, envelope.clone()).await {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Dropped => report.dropped += 1,
                DeliveryOutcome::RecipientAbsent => {}
            }
        }

        if report.delivered > 0 {
            info!(
                community = %community_id,
                event,
                recipients = report.recipients,
                delivered = report.delivered,
                "Community event fanned out"
            );
        } else {
            debug!(community = %community_id, event, "No roster member online");
        }

        report
    }
}
