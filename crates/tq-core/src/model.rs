//! # Domain Model
//!
//! Records owned by the relational store ([`Group`], [`Project`],
//! [`GroupInbox`]), the row shape of the columnar event store
//! ([`EventRow`]) and the caller identity ([`Actor`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type GroupId = u64;
pub type ProjectId = u64;
pub type OrganizationId = u64;
pub type UserId = u64;
pub type TeamId = u64;

/// Lifecycle status of a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Unresolved,
    Resolved,
    Ignored,
    PendingDeletion,
    DeletionInProgress,
    PendingMerge,
    Reprocessing,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Resolved => "resolved",
            Self::Ignored => "ignored",
            Self::PendingDeletion => "pending_deletion",
            Self::DeletionInProgress => "deletion_in_progress",
            Self::PendingMerge => "pending_merge",
            Self::Reprocessing => "reprocessing",
        }
    }

    /// Parse a status as written in a query. `archived` is accepted as an
    /// alias of `ignored`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unresolved" => Some(Self::Unresolved),
            "resolved" => Some(Self::Resolved),
            "ignored" | "archived" => Some(Self::Ignored),
            "pending_deletion" => Some(Self::PendingDeletion),
            "deletion_in_progress" => Some(Self::DeletionInProgress),
            "pending_merge" => Some(Self::PendingMerge),
            "reprocessing" => Some(Self::Reprocessing),
            _ => None,
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupSubStatus {
    New,
    Ongoing,
    Escalating,
    Regressed,
    ArchivedForever,
    ArchivedUntilEscalating,
}

impl GroupSubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Ongoing => "ongoing",
            Self::Escalating => "escalating",
            Self::Regressed => "regressed",
            Self::ArchivedForever => "archived_forever",
            Self::ArchivedUntilEscalating => "archived_until_escalating",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "ongoing" => Some(Self::Ongoing),
            "escalating" => Some(Self::Escalating),
            "regressed" => Some(Self::Regressed),
            "archived_forever" => Some(Self::ArchivedForever),
            "archived_until_escalating" => Some(Self::ArchivedUntilEscalating),
            _ => None,
        }
    }
}

impl fmt::Display for GroupSubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a group: a single user or a whole team.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Owner {
    User(UserId),
    Team(TeamId),
}

impl Owner {
    /// Accepts `user:5`, `5`, `team:3` and `#3`.
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(id) = value.strip_prefix("user:") {
            return id.parse().ok().map(Self::User);
        }
        if let Some(id) = value.strip_prefix("team:").or_else(|| value.strip_prefix('#')) {
            return id.parse().ok().map(Self::Team);
        }
        value.parse().ok().map(Self::User)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Team(id) => write!(f, "team:{}", id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub organization_id: OrganizationId,
    pub slug: String,
    /// Unresolved groups not seen for this many hours are reported as
    /// resolved by the serializer.
    #[serde(default)]
    pub resolve_age_hours: Option<u32>,
}

/// The authoritative issue record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub project_id: ProjectId,
    /// Per-project counter rendered as the short id suffix.
    pub short_id: u64,
    pub status: GroupStatus,
    #[serde(default)]
    pub substatus: Option<GroupSubStatus>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub times_seen: u64,
    #[serde(default)]
    pub assignee: Option<Owner>,
    #[serde(default)]
    pub suggested_owners: Vec<Owner>,
    #[serde(default)]
    pub bookmarked_by: Vec<UserId>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InboxReason {
    New,
    Regression,
    Unignored,
    Escalating,
    Manual,
}

/// A group waiting for review. `date_added` orders the inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupInbox {
    pub group_id: GroupId,
    pub project_id: ProjectId,
    pub date_added: DateTime<Utc>,
    pub reason: InboxReason,
}

/// One event as stored in the columnar store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRow {
    /// 32 lowercase hex characters.
    pub event_id: String,
    pub project_id: ProjectId,
    pub group_id: GroupId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl EventRow {
    /// Look up a filterable attribute. Well-known columns shadow tags of
    /// the same name.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "environment" => self.environment.as_deref(),
            "level" => self.level.as_deref(),
            "release" => self.release.as_deref(),
            "message" => Some(self.message.as_str()),
            "event.id" | "id" => Some(self.event_id.as_str()),
            _ => self.tags.get(key).map(String::as_str),
        }
    }
}

/// The caller on whose behalf a search runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub team_ids: Vec<TeamId>,
    /// Projects the actor is a member of through a team.
    #[serde(default)]
    pub project_ids: Vec<ProjectId>,
    #[serde(default)]
    pub is_superuser: bool,
}

impl Actor {
    /// True if `owner` is this user or one of their teams.
    pub fn owns(&self, owner: &Owner) -> bool {
        match owner {
            Owner::User(id) => *id == self.user_id,
            Owner::Team(id) => self.team_ids.contains(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_aliases() {
        assert_eq!(GroupStatus::parse("archived"), Some(GroupStatus::Ignored));
        assert_eq!(GroupStatus::parse("unresolved"), Some(GroupStatus::Unresolved));
        assert_eq!(GroupStatus::parse("bogus"), None);
    }

    #[test]
    fn test_owner_parse() {
        assert_eq!(Owner::parse("user:5"), Some(Owner::User(5)));
        assert_eq!(Owner::parse("5"), Some(Owner::User(5)));
        assert_eq!(Owner::parse("#3"), Some(Owner::Team(3)));
        assert_eq!(Owner::parse("team:3"), Some(Owner::Team(3)));
        assert_eq!(Owner::parse("me"), None);
    }

    #[test]
    fn test_actor_owns_team_assignments() {
        let actor = Actor {
            user_id: 1,
            organization_id: 1,
            team_ids: vec![7],
            project_ids: vec![],
            is_superuser: false,
        };
        assert!(actor.owns(&Owner::User(1)));
        assert!(actor.owns(&Owner::Team(7)));
        assert!(!actor.owns(&Owner::Team(8)));
    }
}
