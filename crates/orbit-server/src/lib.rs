//! # orbit-server
//!
//! Real-time presence and delivery for the Orbit social network.
//!
//! - **Presence**: which user currently holds which live WebSocket
//!   connection (last announce wins)
//! - **Delivery**: best-effort push of direct messages and notifications to
//!   online users
//! - **Community fan-out**: one event to every online member of a community
//!   roster read from SQLite
//! - **Call signaling**: offer/answer/ICE relay between two online users,
//!   guarded by a small per-call state machine with a ring timeout
//! - **Internal REST API** (axum) through which record-owning services push
//!   committed records live
//!
//! Services that run in-process use [`Realtime`] directly; the binary wires
//! it to the HTTP and WebSocket surface.

pub mod api;
pub mod broadcast;
pub mod call;
pub mod config;
pub mod connections;
pub mod delivery;
pub mod error;
pub mod lifecycle;
pub mod presence;
pub mod rate_limit;
pub mod realtime;
pub mod roster;
pub mod ws;

pub use realtime::{Realtime, RealtimeOptions};
