//! # orbit-store
//!
//! Persisted community records for Orbit, backed by SQLite.
//!
//! The realtime server only ever reads rosters through
//! [`Database::find_community_roster`]; the write helpers exist for the
//! record-owning collaborators and for seeding tests.

pub mod communities;
pub mod database;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
