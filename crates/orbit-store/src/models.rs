//! Domain model structs persisted in the community database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to HTTP handlers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbit_shared::types::{CommunityId, UserId};

// ---------------------------------------------------------------------------
// Community
// ---------------------------------------------------------------------------

/// A community record.  Membership lives in `community_members`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Community {
    /// Unique community identifier.
    pub id: CommunityId,
    /// Display name.
    pub name: String,
    /// The user who created the community.
    pub creator: UserId,
    /// When the community was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Role a user holds inside a community.  A user may hold both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Admin,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(MemberRole::Member),
            "admin" => Some(MemberRole::Admin),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// Everyone entitled to a community's broadcast events, as stored.
///
/// The three sets may overlap; use [`CommunityRoster::recipients`] for the
/// de-duplicated union.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityRoster {
    pub community_id: CommunityId,
    pub members: Vec<UserId>,
    pub admins: Vec<UserId>,
    pub creator: UserId,
}

impl CommunityRoster {
    /// members ∪ admins ∪ {creator}, each user once.
    ///
    /// Order is stable: creator first, then admins, then members, each in
    /// first-appearance order.
    pub fn recipients(&self) -> Vec<UserId> {
        let mut seen = HashSet::new();
        std::iter::once(&self.creator)
            .chain(self.admins.iter())
            .chain(self.members.iter())
            .filter(|user| seen.insert(*user))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_are_deduplicated() {
        let roster = CommunityRoster {
            community_id: CommunityId::new("c1"),
            members: vec![UserId::from("a"), UserId::from("b"), UserId::from("a")],
            admins: vec![UserId::from("b"), UserId::from("c")],
            creator: UserId::from("c"),
        };

        assert_eq!(
            roster.recipients(),
            vec![UserId::from("c"), UserId::from("b"), UserId::from("a")]
        );
    }

    #[test]
    fn creator_only_roster() {
        let roster = CommunityRoster {
            community_id: CommunityId::new("c1"),
            members: vec![],
            admins: vec![],
            creator: UserId::from("solo"),
        };
        assert_eq!(roster.recipients(), vec![UserId::from("solo")]);
    }

    #[test]
    fn role_round_trip() {
        for role in [MemberRole::Member, MemberRole::Admin] {
            assert_eq!(MemberRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MemberRole::parse("owner"), None);
    }
}
