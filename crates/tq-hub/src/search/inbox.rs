//! # Inbox Search
//!
//! Pages the review inbox, newest addition first, over the last week.
//! Only a handful of keys make sense here and the search is always about
//! unresolved groups: inbox rows of resolved groups are stale.

use async_trait::async_trait;
use chrono::Duration;

use tq_core::filter::{get_filter, partition, AllowList, Operator};
use tq_core::model::Group;
use tq_core::{CursorPage, CursorValue, Filter, SearchError, SearchResult, SequenceEntry, SequencePaginator};

use super::backend::ALLOWED_FUTURE_DELTA_MINUTES;
use super::executor::SearchExecutor;
use super::{date_bounds, reconcile, EffectiveQuery, SearchRequest, SearchServices};
use crate::store::{GroupPredicate, InboxQuery, TimeWindow};

pub const INBOX_SEARCH_KEYS: AllowList = AllowList {
    name: "inbox",
    keys: &["date", "status", "for_review", "assigned_or_suggested"],
};

/// Inbox rows older than this are never searched.
pub const INBOX_RETENTION_DAYS: i64 = 7;

pub struct InboxSearch {
    services: SearchServices,
}

impl InboxSearch {
    pub fn new(services: SearchServices) -> Self {
        Self { services }
    }

    /// Last week, narrowed by the request and any `date` filter.
    pub fn window(request: &SearchRequest, filters: &[Filter]) -> SearchResult<TimeWindow> {
        let (lower, upper) = date_bounds(filters)?;
        let floor = request.now - Duration::days(INBOX_RETENTION_DAYS);
        let start = [request.date_from, lower]
            .into_iter()
            .flatten()
            .fold(floor, |acc, at| acc.max(at));
        let end = [request.date_to, upper]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(request.now + Duration::minutes(ALLOWED_FUTURE_DELTA_MINUTES));
        Ok(TimeWindow::new(start, end))
    }
}

fn require_unresolved(filters: &[Filter]) -> SearchResult<()> {
    let exact = get_filter(filters, "status", Operator::Eq)?;
    let any_of = get_filter(filters, "status", Operator::In)?;
    let unresolved = [exact, any_of]
        .iter()
        .flatten()
        .any(|value| value.contains_str("unresolved"));
    if unresolved {
        Ok(())
    } else {
        Err(SearchError::invalid_query(
            "Inbox search only works for 'unresolved' status",
        ))
    }
}

#[async_trait]
impl SearchExecutor for InboxSearch {
    fn name(&self) -> &'static str {
        "inbox"
    }

    async fn execute(
        &self,
        request: &SearchRequest,
        extra_filters: &[Filter],
    ) -> SearchResult<(CursorPage<Group>, EffectiveQuery)> {
        let filters = request.filters_with(extra_filters);
        INBOX_SEARCH_KEYS.check(&filters)?;
        require_unresolved(&filters)?;

        let window = Self::window(request, &filters)?;
        let effective = EffectiveQuery::new(self.name(), request, &filters, window);
        if window.is_empty() {
            return Ok((CursorPage::empty(request.cursor.as_ref(), request.count_hits), effective));
        }

        let parts = partition(&filters);
        let settings = &self.services.settings;
        let rows = self
            .services
            .relational
            .inbox(&InboxQuery {
                projects: request.project_ids(),
                window,
                environments: request.environments.clone(),
                predicate: GroupPredicate::compile(&parts.owner, &request.actor)?,
                limit: settings.max_rows,
            })
            .await?;

        let entries = rows
            .into_iter()
            .map(|row| {
                let added = CursorValue::Int(row.date_added.timestamp_millis());
                SequenceEntry::new(
                    added.clone(),
                    vec![added, CursorValue::Int(row.group_id as i64)],
                    row.group_id,
                )
            })
            .collect();
        let page = SequencePaginator::new(entries).page(
            request.limit,
            request.cursor.as_ref(),
            request.count_hits,
            None,
            Some(settings.max_hits),
        );

        // Status is rechecked on the hydrated rows; the inbox does not track it.
        let predicate = GroupPredicate::compile(&parts.relational, &request.actor)?.require_unresolved();
        let page = reconcile::hydrate(
            self.services.relational.as_ref(),
            page,
            &request.project_ids(),
            &predicate,
        )
        .await?;
        Ok((page, effective))
    }
}
