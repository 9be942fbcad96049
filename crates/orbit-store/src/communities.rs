//! CRUD operations for [`Community`] records and their membership, plus the
//! roster lookup the realtime broadcaster depends on.

use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension};

use orbit_shared::types::{CommunityId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Community, CommunityRoster, MemberRole};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new community.
    pub fn create_community(&self, community: &Community) -> Result<()> {
        self.conn().execute(
            "INSERT INTO communities (id, name, creator, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                community.id.as_str(),
                community.name,
                community.creator.as_str(),
                community.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Grant `role` to `user`.  Granting a role the user already holds is a
    /// no-op.  Fails with [`StoreError::NotFound`] if the community does not
    /// exist.
    pub fn add_member(
        &self,
        community_id: &CommunityId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO community_members (community_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    community_id.as_str(),
                    user.as_str(),
                    role.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    StoreError::NotFound
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single community by id.
    pub fn get_community(&self, id: &CommunityId) -> Result<Community> {
        self.conn()
            .query_row(
                "SELECT id, name, creator, created_at FROM communities WHERE id = ?1",
                params![id.as_str()],
                row_to_community,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Resolve who may receive a community's broadcast events.
    ///
    /// Returns `Ok(None)` when the community does not exist.  Always reads
    /// current membership; nothing is cached.
    pub fn find_community_roster(&self, id: &CommunityId) -> Result<Option<CommunityRoster>> {
        let creator: Option<String> = self
            .conn()
            .query_row(
                "SELECT creator FROM communities WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(creator) = creator else {
            return Ok(None);
        };

        let mut stmt = self.conn().prepare(
            "SELECT user_id, role
             FROM community_members
             WHERE community_id = ?1
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut members = Vec::new();
        let mut admins = Vec::new();
        for row in rows {
            let (user_id, role) = row?;
            match MemberRole::parse(&role) {
                Some(MemberRole::Member) => members.push(UserId(user_id)),
                Some(MemberRole::Admin) => admins.push(UserId(user_id)),
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "unknown role '{}' in community {}",
                        role, id
                    )))
                }
            }
        }

        Ok(Some(CommunityRoster {
            community_id: id.clone(),
            members,
            admins,
            creator: UserId(creator),
        }))
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Revoke `role` from `user`.  Returns `true` if a row was removed.
    pub fn remove_member(
        &self,
        community_id: &CommunityId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM community_members
             WHERE community_id = ?1 AND user_id = ?2 AND role = ?3",
            params![community_id.as_str(), user.as_str(), role.as_str()],
        )?;
        Ok(affected > 0)
    }

    // ON DELETE CASCADE: membership rows go with it
    pub fn delete_community(&self, id: &CommunityId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM communities WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }
}

fn row_to_community(row: &rusqlite::Row<'_>) -> rusqlite::Result<Community> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let creator: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Community {
        id: CommunityId(id),
        name,
        creator: UserId(creator),
        created_at,
    })
}
