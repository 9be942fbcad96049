//! # orbit-shared
//!
//! Identifiers, wire protocol and constants shared by the Orbit realtime
//! server and its collaborators.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
