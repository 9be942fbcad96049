//! Call signaling relay.
//!
//! The server forwards offers, answers and ICE candidates between two
//! present users and never interprets them.  It does track one small state
//! per call pair so stray signals are dropped and an unanswered call cannot
//! ring forever:
//!
//! ```text
//! Idle --start--> Ringing --answer--> Active
//!                    |                   |
//!                    +--reject/end/timeout--+--end--> Ended
//! ```
//!
//! `Ended` is terminal; the pair returns to `Idle` and a new `call:start`
//! begins a fresh session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use orbit_shared::constants::{
    EVENT_CALL_ANSWER, EVENT_CALL_END, EVENT_CALL_ICE, EVENT_CALL_INCOMING, EVENT_CALL_REJECTED,
};
use orbit_shared::protocol::{
    AnswerRelay, ClientEvent, Envelope, IceRelay, IncomingCall, PeerRelay,
};
use orbit_shared::types::{CallKind, UserId};

use crate::delivery::{DeliveryBridge, DeliveryOutcome};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Ringing,
    Active,
    Ended,
}

/// Which side of the pair sent a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// An inbound signal with its target stripped off.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSignal {
    Start { offer: Value, kind: CallKind },
    Answer { answer: Value },
    Ice { candidate: Value },
    End,
    Reject,
}

impl CallSignal {
    /// Split a client event into `(to, signal)`.  `None` for events that
    /// are not call signaling.
    pub fn from_event(event: ClientEvent) -> Option<(UserId, CallSignal)> {
        match event {
            ClientEvent::CallStart(start) => Some((
                start.to,
                CallSignal::Start {
                    offer: start.offer,
                    kind: start.kind,
                },
            )),
            ClientEvent::CallAnswer(answer) => Some((
                answer.to,
                CallSignal::Answer {
                    answer: answer.answer,
                },
            )),
            ClientEvent::CallIce(ice) => Some((
                ice.to,
                CallSignal::Ice {
                    candidate: ice.candidate,
                },
            )),
            ClientEvent::CallEnd(target) => Some((target.to, CallSignal::End)),
            ClientEvent::CallReject(target) => Some((target.to, CallSignal::Reject)),
            ClientEvent::UserOnline(_) => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CallSignal::Start { .. } => "start",
            CallSignal::Answer { .. } => "answer",
            CallSignal::Ice { .. } => "ice",
            CallSignal::End => "end",
            CallSignal::Reject => "reject",
        }
    }
}

/// Legal transitions.  `None` means the signal is not valid here and must be
/// dropped.  In `Idle` there is no session yet, so `role` is ignored and the
/// sender of `start` becomes the caller.
pub fn transition(state: CallState, role: Role, signal: &CallSignal) -> Option<CallState> {
    use CallState::*;

    match (state, role, signal) {
        (Idle, _, CallSignal::Start { .. }) => Some(Ringing),
        (Ringing, Role::Callee, CallSignal::Answer { .. }) => Some(Active),
        (Ringing | Active, _, CallSignal::Ice { .. }) => Some(state),
        (Ringing | Active, _, CallSignal::End) => Some(Ended),
        (Ringing, Role::Callee, CallSignal::Reject) => Some(Ended),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Session table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CallSession {
    id: Uuid,
    caller: UserId,
    callee: UserId,
    kind: CallKind,
    state: CallState,
    started_at: Instant,
}

/// Live sessions keyed by `(caller, callee)`.  Only `Ringing` and `Active`
/// sessions are stored; absence means `Idle`.
#[derive(Default)]
struct CallTable {
    sessions: HashMap<(UserId, UserId), CallSession>,
}

impl CallTable {
    /// The session between `a` and `b` in either direction, with `a`'s role.
    fn find(&self, a: &UserId, b: &UserId) -> Option<(&CallSession, Role)> {
        if let Some(session) = self.sessions.get(&(a.clone(), b.clone())) {
            return Some((session, Role::Caller));
        }
        self.sessions
            .get(&(b.clone(), a.clone()))
            .map(|session| (session, Role::Callee))
    }

    fn key_of(session: &CallSession) -> (UserId, UserId) {
        (session.caller.clone(), session.callee.clone())
    }
}

/// What the relay did with one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded,
    /// The target holds no presence entry (or its queue was full).
    TargetAbsent,
    /// Not a legal transition for this pair; dropped.
    Illegal,
    /// The sender has not announced a user yet.
    Anonymous,
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CallSignalingRelay {
    calls: Arc<Mutex<CallTable>>,
    bridge: DeliveryBridge,
    ring_timeout: Option<Duration>,
}

impl CallSignalingRelay {
    pub fn new(bridge: DeliveryBridge, ring_timeout: Option<Duration>) -> Self {
        Self {
            calls: Arc::new(Mutex::new(CallTable::default())),
            bridge,
            ring_timeout,
        }
    }

    /// Relay one signal from `from` to `to`.
    ///
    /// Never reports failure to the sender: an offline target, an illegal
    /// transition or a self-call are all silent no-ops.
    pub async fn relay(&self, from: &UserId, to: &UserId, signal: CallSignal) -> RelayOutcome {
        if from == to {
            debug!(user = %from.short(), "Ignoring call signal addressed to self");
            return RelayOutcome::Illegal;
        }

        // A call only starts ringing if the callee is reachable right now.
        if matches!(signal, CallSignal::Start { .. }) && !self.bridge.is_present(to).await {
            debug!(from = %from.short(), to = %to.short(), "Callee offline, call not started");
            return RelayOutcome::TargetAbsent;
        }

        let (envelope, ringing) = {
            let mut calls = self.calls.lock().await;

            let (state, role) = match calls.find(from, to) {
                Some((session, role)) => (session.state, role),
                None => (CallState::Idle, Role::Caller),
            };

            let Some(next) = transition(state, role, &signal) else {
                debug!(
                    from = %from.short(),
                    to = %to.short(),
                    state = ?state,
                    signal = signal.name(),
                    "Dropping illegal call signal"
                );
                return RelayOutcome::Illegal;
            };

            let mut ringing = None;
            match (&signal, next) {
                (CallSignal::Start { kind, .. }, CallState::Ringing) => {
                    let session = CallSession {
                        id: Uuid::new_v4(),
                        caller: from.clone(),
                        callee: to.clone(),
                        kind: *kind,
                        state: CallState::Ringing,
                        started_at: Instant::now(),
                    };
                    ringing = Some(session.id);
                    info!(caller = %from.short(), callee = %to.short(), kind = %kind, "Call ringing");
                    calls.sessions.insert(CallTable::key_of(&session), session);
                }
                (_, CallState::Ended) => {
                    if let Some((session, _)) = calls.find(from, to) {
                        let key = CallTable::key_of(session);
                        if let Some(session) = calls.sessions.remove(&key) {
                            info!(
                                caller = %session.caller.short(),
                                callee = %session.callee.short(),
                                kind = %session.kind,
                                secs = session.started_at.elapsed().as_secs(),
                                by = signal.name(),
                                "Call ended"
                            );
                        }
                    }
                }
                (_, next) => {
                    if let Some((session, _)) = calls.find(from, to) {
                        let key = CallTable::key_of(session);
                        if let Some(session) = calls.sessions.get_mut(&key) {
                            if session.state != next {
                                debug!(caller = %session.caller.short(), state = ?next, "Call state changed");
                            }
                            session.state = next;
                        }
                    }
                }
            }

            (forwarded_envelope(from, signal), ringing)
        };

        if let Some(session_id) = ringing {
            self.arm_ring_timeout(session_id, from.clone(), to.clone());
        }

        let Ok(envelope) = envelope else {
            return RelayOutcome::Illegal;
        };

        match self.bridge.deliver_envelope(to, envelope).await {
            DeliveryOutcome::Delivered => RelayOutcome::Forwarded,
            DeliveryOutcome::RecipientAbsent | DeliveryOutcome::Dropped => {
                // The callee never saw the offer: the call did not start.
                if let Some(session_id) = ringing {
                    self.discard_session(session_id, from, to).await;
                }
                RelayOutcome::TargetAbsent
            }
        }
    }

    /// Remove the `(caller, callee)` session only if it is still `session_id`.
    async fn discard_session(&self, session_id: Uuid, caller: &UserId, callee: &UserId) -> bool {
        let mut calls = self.calls.lock().await;
        let key = (caller.clone(), callee.clone());
        match calls.sessions.get(&key) {
            Some(session) if session.id == session_id => {
                calls.sessions.remove(&key);
                debug!(caller = %caller.short(), callee = %callee.short(), "Offer undeliverable, call not started");
                true
            }
            _ => false,
        }
    }

    /// Forget every session involving `user`.  Called when the user's
    /// presence goes away; the peer is not notified.
    pub async fn drop_user(&self, user: &UserId) -> usize {
        let mut calls = self.calls.lock().await;
        let before = calls.sessions.len();
        calls
            .sessions
            .retain(|(caller, callee), _| caller != user && callee != user);
        let dropped = before - calls.sessions.len();

        if dropped > 0 {
            debug!(user = %user.short(), dropped, "Cleared calls for offline user");
        }
        dropped
    }

    pub async fn state_of(&self, a: &UserId, b: &UserId) -> CallState {
        self.calls
            .lock()
            .await
            .find(a, b)
            .map(|(session, _)| session.state)
            .unwrap_or(CallState::Idle)
    }

    pub async fn active_calls(&self) -> usize {
        self.calls.lock().await.sessions.len()
    }

    fn arm_ring_timeout(&self, session_id: Uuid, caller: UserId, callee: UserId) {
        let Some(timeout) = self.ring_timeout else {
            return;
        };

        let relay = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            relay.expire_ringing(session_id, &caller, &callee).await;
        });
    }

    /// End a call that is still ringing as the same session, and tell both
    /// sides.  A session that was answered, ended, or replaced is left alone.
    async fn expire_ringing(&self, session_id: Uuid, caller: &UserId, callee: &UserId) -> bool {
        {
            let mut calls = self.calls.lock().await;
            let key = (caller.clone(), callee.clone());
            match calls.sessions.get(&key) {
                Some(session)
                    if session.id == session_id && session.state == CallState::Ringing =>
                {
                    calls.sessions.remove(&key);
                }
                _ => return false,
            }
        }

        info!(caller = %caller.short(), callee = %callee.short(), "Call not answered, ending");

        for (to, from) in [(caller, callee), (callee, caller)] {
            if let Ok(envelope) =
                Envelope::from_payload(EVENT_CALL_END, &PeerRelay { from: from.clone() })
            {
                self.bridge.deliver_envelope(to, envelope).await;
            }
        }
        true
    }
}

/// The frame the target receives for `signal` sent by `from`.
fn forwarded_envelope(
    from: &UserId,
    signal: CallSignal,
) -> Result<Envelope, orbit_shared::ProtocolError> {
    let from = from.clone();
    match signal {
        CallSignal::Start { offer, kind } => {
            Envelope::from_payload(EVENT_CALL_INCOMING, &IncomingCall { from, offer, kind })
        }
        CallSignal::Answer { answer } => {
            Envelope::from_payload(EVENT_CALL_ANSWER, &AnswerRelay { answer, from })
        }
        CallSignal::Ice { candidate } => {
            Envelope::from_payload(EVENT_CALL_ICE, &IceRelay { candidate, from })
        }
        CallSignal::End => Envelope::from_payload(EVENT_CALL_END, &PeerRelay { from }),
        CallSignal::Reject => Envelope::from_payload(EVENT_CALL_REJECTED, &PeerRelay { from }),
    }
}
