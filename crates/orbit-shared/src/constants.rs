/// Default HTTP + WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Maximum inbound WebSocket frame size in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Per-connection outbound queue depth before events are dropped
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Seconds a call may ring before the server ends it
pub const DEFAULT_RING_TIMEOUT_SECS: u64 = 45;

// Client -> server events
pub const EVENT_USER_ONLINE: &str = "user:online";
pub const EVENT_CALL_START: &str = "call:start";
pub const EVENT_CALL_REJECT: &str = "call:reject";

// Server -> client events
pub const EVENT_CALL_INCOMING: &str = "call:incoming";
pub const EVENT_CALL_REJECTED: &str = "call:rejected";
pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_NOTIFICATION_NEW: &str = "notification:new";
pub const EVENT_COMMUNITY_MESSAGE_NEW: &str = "community:message:new";

// Same name in both directions
pub const EVENT_CALL_ANSWER: &str = "call:answer";
pub const EVENT_CALL_ICE: &str = "call:ice";
pub const EVENT_CALL_END: &str = "call:end";

/// Every event name a client may send.
pub const CLIENT_EVENTS: &[&str] = &[
    EVENT_USER_ONLINE,
    EVENT_CALL_START,
    EVENT_CALL_ANSWER,
    EVENT_CALL_ICE,
    EVENT_CALL_END,
    EVENT_CALL_REJECT,
];
