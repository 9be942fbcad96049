//! v001 -- Initial schema creation.
//!
//! Creates the `communities` and `community_members` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Communities
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS communities (
    id         TEXT PRIMARY KEY NOT NULL,   -- record-store document id
    name       TEXT NOT NULL,
    creator    TEXT NOT NULL,               -- user id
    created_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Membership (one row per user per role)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS community_members (
    community_id TEXT NOT NULL,             -- FK -> communities(id)
    user_id      TEXT NOT NULL,
    role         TEXT NOT NULL CHECK (role IN ('member', 'admin')),
    joined_at    TEXT NOT NULL,

    PRIMARY KEY (community_id, user_id, role),
    FOREIGN KEY (community_id) REFERENCES communities(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_community_members_community
    ON community_members(community_id, role);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
