//! # In-Memory Stores
//!
//! Implementations of every store collaborator over a [`Dataset`] loaded
//! from JSON. The hub binary serves a fixture through these, tests build
//! datasets directly.
//!
//! The columnar store enforces a retention period the way a time-partitioned
//! event store does: windows ending before it fail with
//! [`SearchError::QueryOutsideRetention`], windows straddling it are clamped.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use tq_core::cursor::CursorValue;
use tq_core::filter::{CompareOp, DateBound, Filter, Scalar};
use tq_core::model::{
    Actor, EventRow, Group, GroupId, GroupInbox, GroupStatus, OrganizationId, Owner, Project,
    ProjectId, UserId,
};
use tq_core::sort::TieBreak;
use tq_core::{SearchError, SearchResult, SequenceEntry, SortBy};

use super::{
    AccessControl, AdjacentEvents, BoxError, CandidateSet, ColumnarStore, EventStoreQuery,
    EventStoreQueryResult, EventStoreRow, FeatureFlags, GroupPredicate, GroupUpdate, InboxQuery,
    RelationalStore, StatsSeries, StatusWorkflow, TimeWindow,
};

// =============================================================================
// Dataset
// =============================================================================

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid dataset {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Everything both stores are seeded from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub inbox: Vec<GroupInbox>,
    #[serde(default)]
    pub events: Vec<EventRow>,
    #[serde(default)]
    pub members: Vec<Actor>,
}

impl Dataset {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| DatasetError::Parse {
            path: display,
            source,
        })
    }

    /// Move every timestamp by the same amount so the newest event lands one
    /// minute before `now`. Keeps a static fixture inside retention.
    pub fn shift_to(&mut self, now: DateTime<Utc>) {
        let Some(latest) = self.events.iter().map(|e| e.timestamp).max() else {
            return;
        };
        let delta = (now - Duration::minutes(1)) - latest;
        for event in &mut self.events {
            event.timestamp += delta;
        }
        for group in &mut self.groups {
            group.first_seen += delta;
            group.last_seen += delta;
        }
        for row in &mut self.inbox {
            row.date_added += delta;
        }
    }
}

// =============================================================================
// Relational store
// =============================================================================

#[derive(Debug, Default)]
struct Tables {
    projects: Vec<Project>,
    groups: BTreeMap<GroupId, Group>,
    inbox: Vec<GroupInbox>,
    group_environments: HashMap<GroupId, HashSet<String>>,
    project_environments: HashMap<ProjectId, BTreeSet<String>>,
    members: Vec<Actor>,
}

pub struct MemoryRelationalStore {
    tables: RwLock<Tables>,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid assignee '{0}'")]
    InvalidAssignee(String),
}

impl MemoryRelationalStore {
    pub fn new(dataset: &Dataset) -> Self {
        let mut tables = Tables {
            projects: dataset.projects.clone(),
            groups: dataset.groups.iter().map(|g| (g.id, g.clone())).collect(),
            inbox: dataset.inbox.clone(),
            members: dataset.members.clone(),
            ..Tables::default()
        };
        for event in &dataset.events {
            if let Some(env) = &event.environment {
                tables
                    .group_environments
                    .entry(event.group_id)
                    .or_default()
                    .insert(env.clone());
                tables
                    .project_environments
                    .entry(event.project_id)
                    .or_default()
                    .insert(env.clone());
            }
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn upsert_group(&self, group: Group) {
        self.tables.write().await.groups.insert(group.id, group);
    }

    async fn apply_update(
        &self,
        actor: &Actor,
        ids: &[GroupId],
        update: &GroupUpdate,
    ) -> Result<usize, WorkflowError> {
        let assignee = match update.assigned_to.as_deref() {
            None => None,
            Some("") => Some(None),
            Some(raw) => Some(Some(
                Owner::parse(raw).ok_or_else(|| WorkflowError::InvalidAssignee(raw.to_string()))?,
            )),
        };

        let mut tables = self.tables.write().await;
        let mut updated = 0;
        for id in ids {
            let Some(group) = tables.groups.get_mut(id) else {
                continue;
            };
            if let Some(status) = update.status {
                group.status = status;
                group.substatus = update.substatus;
            }
            if let Some(assignee) = assignee {
                group.assignee = assignee;
            }
            match update.is_bookmarked {
                Some(true) if !group.bookmarked_by.contains(&actor.user_id) => {
                    group.bookmarked_by.push(actor.user_id)
                }
                Some(false) => group.bookmarked_by.retain(|u| *u != actor.user_id),
                _ => {}
            }
            updated += 1;
        }
        // Leaving the unresolved state takes a group out of review.
        if matches!(update.status, Some(s) if s != GroupStatus::Unresolved) {
            tables.inbox.retain(|row| !ids.contains(&row.group_id));
        }
        Ok(updated)
    }

    async fn remove(&self, ids: &[GroupId]) -> usize {
        let mut tables = self.tables.write().await;
        let before = tables.groups.len();
        tables.groups.retain(|id, _| !ids.contains(id));
        tables.inbox.retain(|row| !ids.contains(&row.group_id));
        before - tables.groups.len()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn projects(&self, organization_id: OrganizationId) -> SearchResult<Vec<Project>> {
        let tables = self.tables.read().await;
        Ok(tables
            .projects
            .iter()
            .filter(|p| p.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn groups_by_id(&self, ids: &[GroupId], projects: &[ProjectId]) -> SearchResult<Vec<Group>> {
        let tables = self.tables.read().await;
        let wanted: HashSet<&GroupId> = ids.iter().collect();
        // Hash order on purpose: callers must not rely on it.
        Ok(wanted
            .into_iter()
            .filter_map(|id| tables.groups.get(id))
            .filter(|g| projects.contains(&g.project_id))
            .cloned()
            .collect())
    }

    async fn group_by_short_id(
        &self,
        organization_id: OrganizationId,
        project_slug: &str,
        short_id: u64,
    ) -> SearchResult<Option<Group>> {
        let tables = self.tables.read().await;
        let Some(project) = tables
            .projects
            .iter()
            .find(|p| p.organization_id == organization_id && p.slug.eq_ignore_ascii_case(project_slug))
        else {
            return Ok(None);
        };
        Ok(tables
            .groups
            .values()
            .find(|g| g.project_id == project.id && g.short_id == short_id)
            .cloned())
    }

    async fn candidate_ids(
        &self,
        projects: &[ProjectId],
        predicate: &GroupPredicate,
        limit: usize,
    ) -> SearchResult<CandidateSet> {
        let tables = self.tables.read().await;
        let mut ids = Vec::new();
        for group in tables.groups.values() {
            if !projects.contains(&group.project_id) || !predicate.matches(group) {
                continue;
            }
            if ids.len() == limit {
                return Ok(CandidateSet {
                    ids,
                    truncated: true,
                });
            }
            ids.push(group.id);
        }
        Ok(CandidateSet {
            ids,
            truncated: false,
        })
    }

    async fn inbox(&self, query: &InboxQuery) -> SearchResult<Vec<GroupInbox>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&GroupInbox> = tables
            .inbox
            .iter()
            .filter(|row| query.projects.contains(&row.project_id))
            .filter(|row| query.window.contains(row.date_added))
            .filter(|row| {
                query.environments.is_empty()
                    || tables
                        .group_environments
                        .get(&row.group_id)
                        .map_or(false, |envs| query.environments.iter().any(|e| envs.contains(e)))
            })
            .filter(|row| {
                query.predicate.is_empty()
                    || tables
                        .groups
                        .get(&row.group_id)
                        .map_or(false, |g| query.predicate.matches(g))
            })
            .collect();
        // Newest first, so the row budget drops the oldest entries.
        rows.sort_by(|a, b| (b.date_added, b.group_id).cmp(&(a.date_added, a.group_id)));
        Ok(rows.into_iter().take(query.limit).cloned().collect())
    }

    async fn inbox_rows(&self, group_ids: &[GroupId]) -> SearchResult<Vec<GroupInbox>> {
        let tables = self.tables.read().await;
        Ok(tables
            .inbox
            .iter()
            .filter(|row| group_ids.contains(&row.group_id))
            .cloned()
            .collect())
    }

    async fn environment_names(&self, organization_id: OrganizationId) -> SearchResult<Vec<String>> {
        let tables = self.tables.read().await;
        let names: BTreeSet<String> = tables
            .projects
            .iter()
            .filter(|p| p.organization_id == organization_id)
            .filter_map(|p| tables.project_environments.get(&p.id))
            .flatten()
            .cloned()
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn member(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> SearchResult<Option<Actor>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .iter()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .cloned())
    }
}

// =============================================================================
// Columnar store
// =============================================================================

pub struct MemoryColumnarStore {
    events: RwLock<Vec<EventRow>>,
    retention: Duration,
}

/// Per-group aggregate over the matching events.
struct Aggregate {
    count: u64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    latest_event_id: String,
}

fn scalar_text(value: &Scalar) -> String {
    match value {
        Scalar::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn within(at: DateTime<Utc>, from: &Option<DateBound>, to: &Option<DateBound>) -> bool {
    let after = from.map_or(true, |b| if b.inclusive { at >= b.at } else { at > b.at });
    let before = to.map_or(true, |b| if b.inclusive { at <= b.at } else { at < b.at });
    after && before
}

/// Filters evaluated after aggregation.
fn is_aggregate_key(key: &str) -> bool {
    matches!(key, "times_seen" | "last_seen")
}

fn compare_text(actual: &str, op: CompareOp, expected: &str) -> bool {
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(b)) if !matches!(op, CompareOp::Eq | CompareOp::Neq) => {
            op.accepts(a.total_cmp(&b))
        }
        _ => op.accepts(actual.cmp(expected)),
    }
}

fn event_matches(event: &EventRow, filter: &Filter) -> bool {
    match filter {
        Filter::Comparison { key, .. } if is_aggregate_key(key) => true,
        Filter::Comparison { key, op, value } if key == "message" => {
            let needle = scalar_text(value).to_lowercase();
            let found = event.message.to_lowercase().contains(&needle);
            found != (*op == CompareOp::Neq)
        }
        Filter::Comparison { key, op, value } => match event.attribute(key) {
            Some(actual) => compare_text(actual, *op, &scalar_text(value)),
            None => *op == CompareOp::Neq,
        },
        Filter::InClause {
            key,
            values,
            negated,
        } => {
            let hit = event
                .attribute(key)
                .map_or(false, |actual| values.iter().any(|v| scalar_text(v) == actual));
            hit != *negated
        }
        Filter::DateRange { key, from, to } if key == "date" => within(event.timestamp, from, to),
        Filter::DateRange { .. } => true,
    }
}

fn aggregate_matches(agg: &Aggregate, filter: &Filter) -> bool {
    match filter {
        Filter::Comparison {
            key,
            op,
            value: Scalar::Int(n),
        } if key == "times_seen" => op.accepts((agg.count as i64).cmp(n)),
        Filter::DateRange { key, from, to } if key == "last_seen" => within(agg.last_seen, from, to),
        _ => true,
    }
}

fn score(sort: SortBy, agg: &Aggregate) -> SearchResult<CursorValue> {
    Ok(match sort {
        SortBy::Date => CursorValue::Int(agg.last_seen.timestamp_millis()),
        SortBy::New => CursorValue::Int(agg.first_seen.timestamp_millis()),
        SortBy::Freq => CursorValue::Int(agg.count as i64),
        SortBy::Priority | SortBy::Relevance => {
            CursorValue::Float((agg.count as f64).ln() * 600.0 + agg.last_seen.timestamp() as f64)
        }
        SortBy::Inbox => {
            return Err(SearchError::internal("the event store does not order by inbox date"))
        }
    })
}

fn tie_break(sort: SortBy, group_id: GroupId, agg: &Aggregate) -> Vec<CursorValue> {
    sort.tie_break()
        .iter()
        .map(|key| match key {
            TieBreak::LastSeen => CursorValue::Int(agg.last_seen.timestamp_millis()),
            TieBreak::FirstSeen => CursorValue::Int(agg.first_seen.timestamp_millis()),
            TieBreak::LatestEventId => CursorValue::Str(agg.latest_event_id.clone()),
            TieBreak::GroupId | TieBreak::DateAdded => CursorValue::Int(group_id as i64),
        })
        .collect()
}

impl MemoryColumnarStore {
    pub fn new(dataset: &Dataset, retention_days: u32) -> Self {
        Self {
            events: RwLock::new(dataset.events.clone()),
            retention: Duration::days(retention_days as i64),
        }
    }

    pub async fn insert(&self, event: EventRow) {
        self.events.write().await.push(event);
    }

    fn retention_start(&self) -> DateTime<Utc> {
        Utc::now() - self.retention
    }

    fn clamp(&self, window: &TimeWindow) -> SearchResult<TimeWindow> {
        let floor = self.retention_start();
        if window.end <= floor {
            return Err(SearchError::QueryOutsideRetention);
        }
        Ok(TimeWindow::new(window.start.max(floor), window.end))
    }
}

#[async_trait]
impl ColumnarStore for MemoryColumnarStore {
    async fn query(&self, query: &EventStoreQuery) -> SearchResult<EventStoreQueryResult> {
        let window = self.clamp(&query.window)?;
        let events = self.events.read().await;

        let mut aggregates: HashMap<GroupId, Aggregate> = HashMap::new();
        for event in events.iter() {
            if !query.projects.contains(&event.project_id) || !window.contains(event.timestamp) {
                continue;
            }
            if !query.environments.is_empty()
                && !event
                    .environment
                    .as_ref()
                    .map_or(false, |env| query.environments.contains(env))
            {
                continue;
            }
            if let Some(ids) = &query.group_ids {
                if !ids.contains(&event.group_id) {
                    continue;
                }
            }
            if !query.filters.iter().all(|f| event_matches(event, f)) {
                continue;
            }
            let agg = aggregates.entry(event.group_id).or_insert_with(|| Aggregate {
                count: 0,
                first_seen: event.timestamp,
                last_seen: event.timestamp,
                latest_event_id: event.event_id.clone(),
            });
            agg.count += 1;
            agg.first_seen = agg.first_seen.min(event.timestamp);
            let newer = (event.timestamp, &event.event_id) > (agg.last_seen, &agg.latest_event_id);
            if newer {
                agg.last_seen = event.timestamp;
                agg.latest_event_id = event.event_id.clone();
            }
        }

        let mut entries = Vec::with_capacity(aggregates.len());
        for (group_id, agg) in &aggregates {
            if !query.filters.iter().all(|f| aggregate_matches(agg, f)) {
                continue;
            }
            entries.push(SequenceEntry::new(
                score(query.sort, agg)?,
                tie_break(query.sort, *group_id, agg),
                *group_id,
            ));
        }
        let total = query.count_hits.then_some(entries.len() as u64);

        entries.sort_by(|a, b| a.order(b));
        entries.truncate(query.max_rows);
        let mut rows: Vec<EventStoreRow> = entries
            .into_iter()
            .map(|e| EventStoreRow {
                group_id: e.item,
                score: e.score,
                tie_break: e.tie_break,
            })
            .collect();
        // Row order is not part of the contract.
        rows.sort_by_key(|r| r.group_id);

        Ok(EventStoreQueryResult { rows, total })
    }

    async fn get_event(&self, project: ProjectId, event_id: &str) -> SearchResult<Option<EventRow>> {
        let floor = self.retention_start();
        let events = self.events.read().await;
        Ok(events
            .iter()
            .find(|e| e.project_id == project && e.event_id == event_id && e.timestamp >= floor)
            .cloned())
    }

    async fn find_events(&self, projects: &[ProjectId], event_id: &str) -> SearchResult<Vec<EventRow>> {
        let floor = self.retention_start();
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| projects.contains(&e.project_id) && e.event_id == event_id)
            .filter(|e| e.timestamp >= floor)
            .cloned()
            .collect())
    }

    async fn adjacent_events(
        &self,
        project: ProjectId,
        group: GroupId,
        event_id: &str,
    ) -> SearchResult<AdjacentEvents> {
        let floor = self.retention_start();
        let events = self.events.read().await;
        let mut timeline: Vec<&EventRow> = events
            .iter()
            .filter(|e| e.project_id == project && e.group_id == group)
            .collect();
        let Some(current) = timeline.iter().find(|e| e.event_id == event_id).copied() else {
            return Err(SearchError::not_found("Event not found"));
        };
        if current.timestamp < floor {
            return Err(SearchError::QueryOutsideRetention);
        }
        timeline.retain(|e| e.timestamp >= floor);
        timeline.sort_by(|a, b| (a.timestamp, &a.event_id).cmp(&(b.timestamp, &b.event_id)));
        let position = timeline
            .iter()
            .position(|e| e.event_id == event_id)
            .unwrap_or_default();
        Ok(AdjacentEvents {
            previous_event_id: position
                .checked_sub(1)
                .and_then(|i| timeline.get(i))
                .map(|e| e.event_id.clone()),
            next_event_id: timeline.get(position + 1).map(|e| e.event_id.clone()),
        })
    }

    async fn group_stats(
        &self,
        projects: &[ProjectId],
        groups: &[GroupId],
        start: DateTime<Utc>,
        interval_secs: i64,
        buckets: usize,
    ) -> SearchResult<HashMap<GroupId, StatsSeries>> {
        let start_secs = start.timestamp();
        let blank: StatsSeries = (0..buckets)
            .map(|i| [start_secs + i as i64 * interval_secs, 0])
            .collect();
        let mut out: HashMap<GroupId, StatsSeries> =
            groups.iter().map(|id| (*id, blank.clone())).collect();

        let events = self.events.read().await;
        for event in events.iter().filter(|e| projects.contains(&e.project_id)) {
            let Some(series) = out.get_mut(&event.group_id) else {
                continue;
            };
            let offset = event.timestamp.timestamp() - start_secs;
            if offset < 0 || interval_secs <= 0 {
                continue;
            }
            if let Some(bucket) = series.get_mut((offset / interval_secs) as usize) {
                bucket[1] += 1;
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Access, features, workflow
// =============================================================================

/// Organization-scoped access. With open membership every member sees every
/// project of the organization, otherwise only the projects of their teams.
pub struct MembershipAccess {
    pub open_membership: bool,
}

#[async_trait]
impl AccessControl for MembershipAccess {
    async fn has_project_access(&self, actor: &Actor, project: &Project) -> bool {
        if actor.is_superuser {
            return true;
        }
        actor.organization_id == project.organization_id
            && (self.open_membership || actor.project_ids.contains(&project.id))
    }
}

/// Feature grants fixed at startup.
pub struct StaticFeatures {
    global: HashSet<String>,
    organizations: HashMap<OrganizationId, HashSet<String>>,
}

impl StaticFeatures {
    pub fn new(global: Vec<String>, organizations: HashMap<OrganizationId, Vec<String>>) -> Self {
        Self {
            global: global.into_iter().collect(),
            organizations: organizations
                .into_iter()
                .map(|(org, features)| (org, features.into_iter().collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl FeatureFlags for StaticFeatures {
    async fn has(&self, feature: &str, organization_id: OrganizationId, _actor: &Actor) -> SearchResult<bool> {
        Ok(self.global.contains(feature)
            || self
                .organizations
                .get(&organization_id)
                .map_or(false, |set| set.contains(feature)))
    }
}

/// Writes transitions straight into the relational tables. The columnar
/// store keeps its events, so deleted groups linger there until reconciled.
pub struct MemoryWorkflow {
    relational: Arc<MemoryRelationalStore>,
}

impl MemoryWorkflow {
    pub fn new(relational: Arc<MemoryRelationalStore>) -> Self {
        Self { relational }
    }
}

#[async_trait]
impl StatusWorkflow for MemoryWorkflow {
    async fn update(&self, actor: &Actor, groups: &[Group], update: &GroupUpdate) -> Result<usize, BoxError> {
        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        Ok(self.relational.apply_update(actor, &ids, update).await?)
    }

    async fn delete(&self, _actor: &Actor, groups: &[Group]) -> Result<usize, BoxError> {
        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        Ok(self.relational.remove(&ids).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{actor, event, fixture};

    fn query(sort: SortBy) -> EventStoreQuery {
        let now = Utc::now();
        EventStoreQuery {
            projects: vec![1, 2],
            environments: vec![],
            filters: vec![],
            group_ids: None,
            sort,
            window: TimeWindow::new(now - Duration::days(30), now + Duration::minutes(5)),
            max_rows: 100,
            count_hits: true,
        }
    }

    #[tokio::test]
    async fn test_freq_scores_and_budget() {
        let data = fixture(Utc::now());
        let store = MemoryColumnarStore::new(&data, 90);
        let result = store.query(&query(SortBy::Freq)).await.unwrap();
        let top = result.rows.iter().max_by(|a, b| a.score.cmp(&b.score)).unwrap();
        assert_eq!(top.group_id, 1);
        assert_eq!(result.total, Some(result.rows.len() as u64));

        let mut budget = query(SortBy::Freq);
        budget.max_rows = 2;
        let cut = store.query(&budget).await.unwrap();
        assert_eq!(cut.rows.len(), 2);
        assert_eq!(cut.total, result.total);
        assert!(cut.rows.iter().any(|r| r.group_id == 1));
    }

    #[tokio::test]
    async fn test_tag_filters_and_having() {
        let data = fixture(Utc::now());
        let store = MemoryColumnarStore::new(&data, 90);
        let mut q = query(SortBy::Date);
        q.filters = vec![Filter::equals("browser", Scalar::Str("Chrome".into()))];
        let rows = store.query(&q).await.unwrap().rows;
        assert!(rows.iter().all(|r| r.group_id == 1 || r.group_id == 2));

        q.filters = vec![Filter::Comparison {
            key: "times_seen".into(),
            op: CompareOp::Gt,
            value: Scalar::Int(3),
        }];
        let rows = store.query(&q).await.unwrap().rows;
        assert_eq!(rows.iter().map(|r| r.group_id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_retention() {
        let now = Utc::now();
        let store = MemoryColumnarStore::new(&fixture(now), 90);
        let mut q = query(SortBy::Date);
        q.window = TimeWindow::new(now - Duration::days(200), now - Duration::days(100));
        assert_eq!(store.query(&q).await.unwrap_err(), SearchError::QueryOutsideRetention);

        let old = event("0000000000000000000000000000dead", 1, 1, now - Duration::days(120));
        store.insert(old).await;
        let err = store
            .adjacent_events(1, 1, "0000000000000000000000000000dead")
            .await
            .unwrap_err();
        assert_eq!(err, SearchError::QueryOutsideRetention);
    }

    #[tokio::test]
    async fn test_workflow_updates_relational_rows_only() {
        let data = fixture(Utc::now());
        let relational = Arc::new(MemoryRelationalStore::new(&data));
        let workflow = MemoryWorkflow::new(relational.clone());
        let groups = relational.groups_by_id(&[1], &[1]).await.unwrap();
        let update = GroupUpdate {
            status: Some(GroupStatus::Resolved),
            ..GroupUpdate::default()
        };
        assert_eq!(workflow.update(&actor(), &groups, &update).await.unwrap(), 1);
        let after = relational.groups_by_id(&[1], &[1]).await.unwrap();
        assert_eq!(after[0].status, GroupStatus::Resolved);
        assert!(relational.inbox_rows(&[1]).await.unwrap().is_empty());

        let bad = GroupUpdate {
            assigned_to: Some("nobody".into()),
            ..GroupUpdate::default()
        };
        assert!(workflow.update(&actor(), &groups, &bad).await.is_err());
    }

    #[tokio::test]
    async fn test_demo_dataset_loads_and_rebases() {
        let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/demo.json"));
        let mut data = Dataset::load(path).unwrap();
        let now = Utc::now();
        data.shift_to(now);
        let newest = data.events.iter().map(|e| e.timestamp).max().unwrap();
        assert_eq!(newest, now - Duration::minutes(1));
        assert!(data.groups.iter().all(|g| g.last_seen <= newest));

        let relational = MemoryRelationalStore::new(&data);
        assert_eq!(relational.projects(1).await.unwrap().len(), 3);
        assert!(Dataset::load(Path::new("/nonexistent.json")).is_err());
    }

    #[tokio::test]
    async fn test_access_and_features() {
        let project = Project {
            id: 9,
            organization_id: 1,
            slug: "other".into(),
            resolve_age_hours: None,
        };
        let closed = MembershipAccess {
            open_membership: false,
        };
        assert!(!closed.has_project_access(&actor(), &project).await);
        let open = MembershipAccess {
            open_membership: true,
        };
        assert!(open.has_project_access(&actor(), &project).await);

        let features = StaticFeatures::new(
            vec!["organizations:inbox".into()],
            HashMap::from([(1, vec!["organizations:global-views".into()])]),
        );
        assert!(features.has("organizations:inbox", 7, &actor()).await.unwrap());
        assert!(features.has("organizations:global-views", 1, &actor()).await.unwrap());
        assert!(!features.has("organizations:global-views", 2, &actor()).await.unwrap());
    }
}
