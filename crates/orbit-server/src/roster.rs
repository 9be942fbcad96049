//! Access to community rosters in the persisted-record store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use orbit_shared::types::CommunityId;
use orbit_store::{CommunityRoster, Database};

use crate::error::ServerError;

#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Fresh read of a community's membership.  `Ok(None)` when the
    /// community does not exist.
    async fn find_community_roster(
        &self,
        id: &CommunityId,
    ) -> Result<Option<CommunityRoster>, ServerError>;
}

/// Reads rosters from the SQLite store.  Queries run on the blocking pool so
/// a slow disk never stalls connection handling.
#[derive(Clone)]
pub struct SqliteRosterSource {
    db: Arc<Mutex<Database>>,
}

impl SqliteRosterSource {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RosterSource for SqliteRosterSource {
    async fn find_community_roster(
        &self,
        id: &CommunityId,
    ) -> Result<Option<CommunityRoster>, ServerError> {
        let db = self.db.clone();
        let id = id.clone();

        tokio::task::spawn_blocking(move || {
            let db = db.blocking_lock();
            db.find_community_roster(&id)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Roster query task failed: {e}")))?
        .map_err(ServerError::from)
    }
}
