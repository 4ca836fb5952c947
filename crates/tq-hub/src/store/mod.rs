//! # Store Collaborators
//!
//! The search layer reads from two stores with different consistency:
//! the relational store owns [`Group`] rows and the review inbox, the
//! columnar store owns individual events and everything aggregated from
//! them. Access control, feature flags and the status-transition workflow
//! sit behind their own traits. Every trait has an in-memory implementation
//! in [`memory`].

pub mod memory;
pub mod predicate;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use tq_core::cursor::CursorValue;
use tq_core::model::{
    Actor, EventRow, Group, GroupInbox, GroupId, OrganizationId, Project, ProjectId, UserId,
};
use tq_core::{Filter, SearchResult, SortBy};

pub use predicate::GroupPredicate;

/// Boxed error used by the mutation workflow.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Half-open `[start, end)` time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

// =============================================================================
// Columnar store
// =============================================================================

/// One aggregated query against the event store.
#[derive(Debug, Clone)]
pub struct EventStoreQuery {
    pub projects: Vec<ProjectId>,
    pub environments: Vec<String>,
    /// Columnar filters only.
    pub filters: Vec<Filter>,
    /// Restrict to these groups when set.
    pub group_ids: Option<Vec<GroupId>>,
    pub sort: SortBy,
    pub window: TimeWindow,
    /// Rows past this many, in sort order, are cut.
    pub max_rows: usize,
    pub count_hits: bool,
}

/// One aggregated group row.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStoreRow {
    pub group_id: GroupId,
    pub score: CursorValue,
    pub tie_break: Vec<CursorValue>,
}

/// Rows come back in no particular order.
#[derive(Debug, Clone, Default)]
pub struct EventStoreQueryResult {
    pub rows: Vec<EventStoreRow>,
    /// Matching groups before the row budget, when requested.
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjacentEvents {
    pub previous_event_id: Option<String>,
    pub next_event_id: Option<String>,
}

/// Event counts per time bucket: `[bucket_start_secs, count]`.
pub type StatsSeries = Vec<[i64; 2]>;

#[async_trait]
pub trait ColumnarStore: Send + Sync {
    /// Aggregate matching events per group and score them for `sort`.
    async fn query(&self, query: &EventStoreQuery) -> SearchResult<EventStoreQueryResult>;

    /// Point lookup of one event in one project.
    async fn get_event(&self, project: ProjectId, event_id: &str) -> SearchResult<Option<EventRow>>;

    /// Scan for an event id across projects.
    async fn find_events(&self, projects: &[ProjectId], event_id: &str) -> SearchResult<Vec<EventRow>>;

    /// Events immediately before and after `event_id` within its group.
    async fn adjacent_events(
        &self,
        project: ProjectId,
        group: GroupId,
        event_id: &str,
    ) -> SearchResult<AdjacentEvents>;

    async fn group_stats(
        &self,
        projects: &[ProjectId],
        groups: &[GroupId],
        start: DateTime<Utc>,
        interval_secs: i64,
        buckets: usize,
    ) -> SearchResult<HashMap<GroupId, StatsSeries>>;
}

// =============================================================================
// Relational store
// =============================================================================

/// Group ids matching the relational filters, capped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    pub ids: Vec<GroupId>,
    /// More groups matched than the cap allowed.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct InboxQuery {
    pub projects: Vec<ProjectId>,
    pub window: TimeWindow,
    /// Only groups that have events in one of these environments.
    pub environments: Vec<String>,
    /// Owner predicates for the joined group row.
    pub predicate: GroupPredicate,
    pub limit: usize,
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn projects(&self, organization_id: OrganizationId) -> SearchResult<Vec<Project>>;

    /// Groups by id, restricted to `projects`. Order is unspecified.
    async fn groups_by_id(&self, ids: &[GroupId], projects: &[ProjectId]) -> SearchResult<Vec<Group>>;

    async fn group_by_short_id(
        &self,
        organization_id: OrganizationId,
        project_slug: &str,
        short_id: u64,
    ) -> SearchResult<Option<Group>>;

    async fn candidate_ids(
        &self,
        projects: &[ProjectId],
        predicate: &GroupPredicate,
        limit: usize,
    ) -> SearchResult<CandidateSet>;

    /// Inbox rows added within the window, newest `date_added` first (ties
    /// by descending group id), at most `limit` of them. Row status is not
    /// checked here.
    async fn inbox(&self, query: &InboxQuery) -> SearchResult<Vec<GroupInbox>>;

    async fn inbox_rows(&self, group_ids: &[GroupId]) -> SearchResult<Vec<GroupInbox>>;

    async fn environment_names(&self, organization_id: OrganizationId) -> SearchResult<Vec<String>>;

    /// Resolve a user's membership in an organization.
    async fn member(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> SearchResult<Option<Actor>>;
}

// =============================================================================
// Access, features, workflow
// =============================================================================

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn has_project_access(&self, actor: &Actor, project: &Project) -> bool;
}

#[async_trait]
pub trait FeatureFlags: Send + Sync {
    async fn has(&self, feature: &str, organization_id: OrganizationId, actor: &Actor) -> SearchResult<bool>;
}

/// Requested change for a bulk update.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    #[serde(default)]
    pub status: Option<tq_core::model::GroupStatus>,
    #[serde(default)]
    pub substatus: Option<tq_core::model::GroupSubStatus>,
    /// `user:5`, `team:3`, or empty to unassign.
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub is_bookmarked: Option<bool>,
}

/// Applies status transitions. The search layer only picks the targets.
#[async_trait]
pub trait StatusWorkflow: Send + Sync {
    async fn update(&self, actor: &Actor, groups: &[Group], update: &GroupUpdate) -> Result<usize, BoxError>;

    async fn delete(&self, actor: &Actor, groups: &[Group]) -> Result<usize, BoxError>;
}
