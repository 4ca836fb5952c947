//! # Group Serializer
//!
//! Renders hydrated groups for the issue list. Stats series and inbox rows
//! are fetched concurrently, one batch per page.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tq_core::ident::ShortId;
use tq_core::model::{Actor, Group, GroupId, GroupStatus, GroupSubStatus, InboxReason, Project, ProjectId};
use tq_core::{SearchError, SearchResult};

use super::SearchServices;
use crate::store::StatsSeries;

/// Which stats series to attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsPeriod {
    /// `""`: no stats.
    Disabled,
    #[default]
    Day,
    TwoWeeks,
    /// Day for windows up to 48 hours, two weeks otherwise.
    Auto,
}

impl StatsPeriod {
    pub fn parse(raw: &str) -> SearchResult<Self> {
        match raw {
            "" => Ok(Self::Disabled),
            "24h" => Ok(Self::Day),
            "14d" => Ok(Self::TwoWeeks),
            "auto" => Ok(Self::Auto),
            _ => Err(SearchError::invalid_query(
                "Invalid stats_period. Valid choices are '', '24h', '14d' and 'auto'",
            )),
        }
    }

    /// Replace `Auto` using the span of the search window.
    pub fn resolve(self, span: Option<Duration>) -> Self {
        match self {
            Self::Auto if span.map_or(false, |s| s <= Duration::hours(48)) => Self::Day,
            Self::Auto => Self::TwoWeeks,
            other => other,
        }
    }

    fn key(self) -> Option<&'static str> {
        match self {
            Self::Day => Some("24h"),
            Self::TwoWeeks => Some("14d"),
            Self::Disabled | Self::Auto => None,
        }
    }

    /// `(start, interval_secs, buckets)` ending in the bucket holding `now`.
    fn buckets(self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, i64, usize)> {
        let (interval, buckets) = match self {
            Self::Day => (3_600, 24),
            Self::TwoWeeks => (86_400, 14),
            Self::Disabled | Self::Auto => return None,
        };
        let secs = now.timestamp();
        let first = secs - secs.rem_euclid(interval) - interval * (buckets as i64 - 1);
        let start = Utc.timestamp_opt(first, 0).single()?;
        Some((start, interval, buckets))
    }
}

/// Serializer knobs read from the request.
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    pub stats_period: StatsPeriod,
    pub expand: Vec<String>,
    pub collapse: Vec<String>,
}

impl SerializeOptions {
    fn wants_stats(&self) -> bool {
        !self.collapse.iter().any(|c| c == "stats")
    }

    fn expands(&self, field: &str) -> bool {
        self.expand.iter().any(|e| e == field)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectRef {
    pub id: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboxDetails {
    pub reason: InboxReason,
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SerializedGroup {
    pub id: String,
    pub short_id: String,
    pub project: ProjectRef,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substatus: Option<GroupSubStatus>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: String,
    pub title: String,
    pub assigned_to: Option<String>,
    pub is_bookmarked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<BTreeMap<&'static str, StatsSeries>>,
    /// Present when expanded; `null` for groups not in the inbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox: Option<Option<InboxDetails>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owners: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_event_id: Option<String>,
}

/// Status as the list reports it. Unresolved groups not seen within their
/// project's resolve age read as resolved.
pub fn reported_status(group: &Group, project: &Project, now: DateTime<Utc>) -> GroupStatus {
    match project.resolve_age_hours {
        Some(hours)
            if hours > 0
                && group.status == GroupStatus::Unresolved
                && group.last_seen < now - Duration::hours(hours as i64) =>
        {
            GroupStatus::Resolved
        }
        _ => group.status,
    }
}

pub struct GroupSerializer<'a> {
    services: &'a SearchServices,
    projects: HashMap<ProjectId, &'a Project>,
    actor: &'a Actor,
    options: &'a SerializeOptions,
    /// Resolved period; never `Auto`.
    period: StatsPeriod,
    now: DateTime<Utc>,
}

impl<'a> GroupSerializer<'a> {
    pub fn new(
        services: &'a SearchServices,
        projects: &'a [Project],
        actor: &'a Actor,
        options: &'a SerializeOptions,
        window_span: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            services,
            projects: projects.iter().map(|p| (p.id, p)).collect(),
            actor,
            options,
            period: options.stats_period.resolve(window_span),
            now,
        }
    }

    pub async fn serialize(&self, groups: &[Group]) -> SearchResult<Vec<SerializedGroup>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        let project_ids: Vec<ProjectId> = groups
            .iter()
            .map(|g| g.project_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let stats = async {
            match self.period.buckets(self.now) {
                Some((start, interval, buckets)) if self.options.wants_stats() => self
                    .services
                    .columnar
                    .group_stats(&project_ids, &ids, start, interval, buckets)
                    .await
                    .map(Some),
                _ => Ok(None),
            }
        };
        let inbox = async {
            if self.options.expands("inbox") {
                self.services.relational.inbox_rows(&ids).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let (mut stats, inbox) = tokio::try_join!(stats, inbox)?;
        let inbox: Option<HashMap<GroupId, InboxDetails>> = inbox.map(|rows| {
            rows.into_iter()
                .map(|row| {
                    (
                        row.group_id,
                        InboxDetails {
                            reason: row.reason,
                            date_added: row.date_added,
                        },
                    )
                })
                .collect()
        });

        groups
            .iter()
            .map(|group| {
                let project = self.projects.get(&group.project_id).ok_or_else(|| {
                    SearchError::internal(format!(
                        "group {} belongs to unknown project {}",
                        group.id, group.project_id
                    ))
                })?;
                let series = stats.as_mut().map(|s| s.remove(&group.id).unwrap_or_default());
                Ok(SerializedGroup {
                    id: group.id.to_string(),
                    short_id: ShortId::format(&project.slug, group.short_id),
                    project: ProjectRef {
                        id: project.id.to_string(),
                        slug: project.slug.clone(),
                    },
                    status: reported_status(group, project, self.now).to_string(),
                    substatus: group.substatus,
                    first_seen: group.first_seen,
                    last_seen: group.last_seen,
                    count: group.times_seen.to_string(),
                    title: group.message.clone(),
                    assigned_to: group.assignee.map(|o| o.to_string()),
                    is_bookmarked: group.bookmarked_by.contains(&self.actor.user_id),
                    stats: match (series, self.period.key()) {
                        (Some(series), Some(key)) => Some(BTreeMap::from([(key, series)])),
                        _ => None,
                    },
                    inbox: inbox.as_ref().map(|rows| rows.get(&group.id).cloned()),
                    owners: self
                        .options
                        .expands("owners")
                        .then(|| group.suggested_owners.iter().map(ToString::to_string).collect()),
                    matching_event_id: None,
                })
            })
            .collect()
    }
}
