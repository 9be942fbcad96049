use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::*;
use crate::error::ProtocolError;
use crate::types::{CallKind, UserId};

/// One frame on the realtime socket: `{"event": "<name>", "data": <json>}`.
///
/// Outbound frames are always built as envelopes; the server never looks
/// inside `data` for delivery payloads, it only routes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Build an envelope from a typed payload.
    pub fn from_payload<T: Serialize>(
        event: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(event, serde_json::to_value(payload)?))
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events a client may send over its connection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Announce which user owns this connection.
    #[serde(rename = "user:online")]
    UserOnline(UserId),

    #[serde(rename = "call:start")]
    CallStart(CallStart),

    #[serde(rename = "call:answer")]
    CallAnswer(CallAnswer),

    #[serde(rename = "call:ice")]
    CallIce(CallIce),

    #[serde(rename = "call:end")]
    CallEnd(CallTarget),

    #[serde(rename = "call:reject")]
    CallReject(CallTarget),
}

impl ClientEvent {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        if !CLIENT_EVENTS.contains(&envelope.event.as_str()) {
            return Err(ProtocolError::UnknownEvent(envelope.event));
        }

        let event = envelope.event.clone();
        serde_json::from_value(serde_json::json!({
            "event": envelope.event,
            "data": envelope.data,
        }))
        .map_err(|e| ProtocolError::InvalidPayload {
            event,
            reason: e.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::UserOnline(_) => EVENT_USER_ONLINE,
            ClientEvent::CallStart(_) => EVENT_CALL_START,
            ClientEvent::CallAnswer(_) => EVENT_CALL_ANSWER,
            ClientEvent::CallIce(_) => EVENT_CALL_ICE,
            ClientEvent::CallEnd(_) => EVENT_CALL_END,
            ClientEvent::CallReject(_) => EVENT_CALL_REJECT,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound call signaling
// ---------------------------------------------------------------------------

/// `call:start`. The offer is an opaque SDP blob, relayed verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallStart {
    pub to: UserId,
    pub offer: Value,
    #[serde(rename = "type")]
    pub kind: CallKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallAnswer {
    pub to: UserId,
    pub answer: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallIce {
    pub to: UserId,
    pub candidate: Value,
}

/// `call:end` and `call:reject` only name the peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallTarget {
    pub to: UserId,
}

// ---------------------------------------------------------------------------
// Outbound call signaling
// ---------------------------------------------------------------------------

/// `call:incoming`, sent to the callee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomingCall {
    pub from: UserId,
    pub offer: Value,
    #[serde(rename = "type")]
    pub kind: CallKind,
}

/// `call:answer`, sent back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerRelay {
    pub answer: Value,
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceRelay {
    pub candidate: Value,
    pub from: UserId,
}

/// `call:end` and `call:rejected` only name the peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerRelay {
    pub from: UserId,
}
