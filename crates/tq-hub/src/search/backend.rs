//! # Event Store Backend
//!
//! Builds one aggregated query against the columnar store and cuts a page
//! out of the scored rows. Relational filters are answered by a capped
//! candidate-id pre-filter when it is selective enough; otherwise they are
//! left to the reconciliation post-filter.

use chrono::Duration;

use tq_core::filter::{format_terms, partition};
use tq_core::model::GroupId;
use tq_core::{CursorPage, Filter, SearchError, SearchResult, SequenceEntry, SequencePaginator};

use super::{date_bounds, SearchRequest, SearchServices};
use crate::store::{EventStoreQuery, GroupPredicate, TimeWindow};

/// Events newer than `now` by up to this much are still searched.
pub const ALLOWED_FUTURE_DELTA_MINUTES: i64 = 5;

pub struct EventStoreBackend<'a> {
    services: &'a SearchServices,
}

impl<'a> EventStoreBackend<'a> {
    pub fn new(services: &'a SearchServices) -> Self {
        Self { services }
    }

    /// Caller window narrowed by any `date` filter. Defaults span the
    /// retention period up to a few minutes past `now`.
    pub fn window(&self, request: &SearchRequest, filters: &[Filter]) -> SearchResult<TimeWindow> {
        let (lower, upper) = date_bounds(filters)?;
        let retention = Duration::days(self.services.settings.retention_days as i64);
        let start = request.date_from.unwrap_or(request.now - retention);
        let end = request
            .date_to
            .unwrap_or(request.now + Duration::minutes(ALLOWED_FUTURE_DELTA_MINUTES));
        Ok(TimeWindow::new(
            lower.map_or(start, |l| l.max(start)),
            upper.map_or(end, |u| u.min(end)),
        ))
    }

    pub async fn query(
        &self,
        request: &SearchRequest,
        filters: &[Filter],
    ) -> SearchResult<(CursorPage<GroupId>, TimeWindow)> {
        let parts = partition(filters);
        if !parts.owner.is_empty() {
            return Err(SearchError::invalid_query(format!(
                "Search terms {} are only supported with the 'inbox' sort",
                format_terms(&parts.owner)
            )));
        }

        let window = self.window(request, filters)?;
        if window.is_empty() {
            tracing::debug!(start = %window.start, end = %window.end, "empty search window");
            return Ok((
                CursorPage::empty(request.cursor.as_ref(), request.count_hits),
                window,
            ));
        }

        let settings = &self.services.settings;
        let project_ids = request.project_ids();

        let group_ids = if parts.relational.is_empty() {
            None
        } else {
            let predicate = GroupPredicate::compile(&parts.relational, &request.actor)?;
            let candidates = self
                .services
                .relational
                .candidate_ids(&project_ids, &predicate, settings.max_candidates)
                .await?;
            if candidates.truncated {
                tracing::debug!(
                    cap = settings.max_candidates,
                    "relational pre-filter not selective, leaving it to reconciliation"
                );
                None
            } else if candidates.ids.is_empty() {
                return Ok((
                    CursorPage::empty(request.cursor.as_ref(), request.count_hits),
                    window,
                ));
            } else {
                Some(candidates.ids)
            }
        };

        let query = EventStoreQuery {
            projects: project_ids,
            environments: request.environments.clone(),
            // `date` filters stay: the window is half-open, the filters
            // carry the exact bounds.
            filters: parts.columnar,
            group_ids,
            sort: request.sort,
            window,
            max_rows: settings.max_rows,
            count_hits: request.count_hits,
        };
        let result = self.services.columnar.query(&query).await?;

        let entries = result
            .rows
            .into_iter()
            .map(|row| SequenceEntry::new(row.score, row.tie_break, row.group_id))
            .collect();
        let page = SequencePaginator::new(entries).page(
            request.limit,
            request.cursor.as_ref(),
            request.count_hits,
            result.total,
            Some(settings.max_hits),
        );
        Ok((page, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::{harness, Harness};
    use chrono::{DateTime, Utc};
    use tq_core::filter::DateBound;
    use tq_core::SortBy;

    fn date_range(from: Option<DateBound>, to: Option<DateBound>) -> Vec<Filter> {
        vec![Filter::DateRange {
            key: "date".into(),
            from,
            to,
        }]
    }

    async fn ids_between(h: &Harness, filters: &[Filter]) -> Vec<GroupId> {
        let request = h.request("", SortBy::Date, 10).await;
        let (page, _) = EventStoreBackend::new(&h.services)
            .query(&request, filters)
            .await
            .unwrap();
        let mut ids = page.items;
        ids.sort();
        ids
    }

    async fn walk(h: &Harness, query: &str, sort: SortBy, limit: usize) -> Vec<GroupId> {
        let mut request = h.request(query, sort, limit).await;
        let backend = EventStoreBackend::new(&h.services);
        let mut seen = Vec::new();
        loop {
            let (page, _) = backend.query(&request, &request.filters).await.unwrap();
            seen.extend(page.items.iter().copied());
            if !page.has_more {
                return seen;
            }
            request.cursor = Some(page.next);
        }
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let h = harness();
        let request = h.request("", SortBy::Priority, 2).await;
        let backend = EventStoreBackend::new(&h.services);
        let (a, _) = backend.query(&request, &request.filters).await.unwrap();
        let (b, _) = backend.query(&request, &request.filters).await.unwrap();
        assert_eq!(a.items, b.items);
        assert_eq!(a.next, b.next);
        assert_eq!(a.prev, b.prev);
    }

    #[tokio::test]
    async fn test_pages_neither_skip_nor_repeat() {
        let h = harness();
        for sort in [SortBy::Priority, SortBy::Date, SortBy::New, SortBy::Freq] {
            let all = walk(&h, "", sort, 100).await;
            assert_eq!(all.len(), 6);
            for limit in 1..=4 {
                assert_eq!(walk(&h, "", sort, limit).await, all, "{} limit {}", sort, limit);
            }
        }
    }

    #[tokio::test]
    async fn test_freq_ties_break_on_last_seen() {
        let h = harness();
        // Groups 2 and 6 both have two events; 6 was seen more recently.
        let all = walk(&h, "", SortBy::Freq, 100).await;
        let pos = |id| all.iter().position(|g| *g == id).unwrap();
        assert_eq!(all[0], 1);
        assert!(pos(6) < pos(2));
    }

    #[tokio::test]
    async fn test_previous_cursor_returns_previous_page() {
        let h = harness();
        let mut request = h.request("", SortBy::Date, 2).await;
        let backend = EventStoreBackend::new(&h.services);
        let (first, _) = backend.query(&request, &request.filters).await.unwrap();
        request.cursor = Some(first.next.clone());
        let (second, _) = backend.query(&request, &request.filters).await.unwrap();
        request.cursor = Some(second.prev.clone());
        let (back, _) = backend.query(&request, &request.filters).await.unwrap();
        assert_eq!(back.items, first.items);
    }

    #[tokio::test]
    async fn test_inverted_window_is_an_empty_page() {
        let h = harness();
        let mut request = h.request("is:unresolved", SortBy::Date, 10).await;
        request.date_from = Some(h.now - Duration::hours(1));
        request.date_to = Some(h.now - Duration::days(1));
        let (page, _) = EventStoreBackend::new(&h.services)
            .query(&request, &request.filters)
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.hits, Some(0));
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_window_outside_retention_fails() {
        let h = harness();
        let mut request = h.request("", SortBy::Date, 10).await;
        request.date_from = Some(h.now - Duration::days(400));
        request.date_to = Some(h.now - Duration::days(300));
        let err = EventStoreBackend::new(&h.services)
            .query(&request, &request.filters)
            .await
            .unwrap_err();
        assert_eq!(err, SearchError::QueryOutsideRetention);
    }

    #[tokio::test]
    async fn test_owner_predicates_need_the_inbox() {
        let h = harness();
        let request = h.request("is:for_review", SortBy::Date, 10).await;
        let err = EventStoreBackend::new(&h.services)
            .query(&request, &request.filters)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidSearchQuery(_)));
    }

    #[tokio::test]
    async fn test_relational_prefilter_and_truncation() {
        let mut h = harness();
        let request = h.request("is:unresolved", SortBy::Date, 10).await;
        let (page, _) = EventStoreBackend::new(&h.services)
            .query(&request, &request.filters)
            .await
            .unwrap();
        let mut ids = page.items.clone();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 4, 6]);

        // A cap below the candidate count drops the restriction.
        h.services.settings.max_candidates = 1;
        let (page, _) = EventStoreBackend::new(&h.services)
            .query(&request, &request.filters)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 6);
    }

    #[tokio::test]
    async fn test_date_filter_narrows_window() {
        let h = harness();
        let request = h.request("date:>-90m", SortBy::Date, 10).await;
        let (page, window) = EventStoreBackend::new(&h.services)
            .query(&request, &request.filters)
            .await
            .unwrap();
        // `>` is exclusive: the window opens just after the bound.
        assert_eq!(window.start, h.now - Duration::minutes(90) + Duration::nanoseconds(1));
        let mut ids = page.items.clone();
        ids.sort();
        assert_eq!(ids, vec![1, 5, 6]);
    }

    #[tokio::test]
    async fn test_date_bounds_keep_inclusivity() {
        let h = harness();
        let hour_ago: DateTime<Utc> = h.now - Duration::hours(1);
        let half_hour_ago = h.now - Duration::minutes(30);

        // Group 1's newest event sits exactly on the exclusive lower bound,
        // group 5's only event exactly on the inclusive upper bound.
        let filters = date_range(
            Some(DateBound::exclusive(hour_ago)),
            Some(DateBound::inclusive(half_hour_ago)),
        );
        assert_eq!(ids_between(&h, &filters).await, vec![5]);

        let filters = date_range(
            Some(DateBound::inclusive(hour_ago)),
            Some(DateBound::exclusive(half_hour_ago)),
        );
        assert_eq!(ids_between(&h, &filters).await, vec![1]);
    }

    #[tokio::test]
    async fn test_exact_instant_matches_events_at_that_instant() {
        let h = harness();
        let at = h.now - Duration::minutes(30);
        let filters = date_range(Some(DateBound::inclusive(at)), Some(DateBound::inclusive(at)));
        assert_eq!(ids_between(&h, &filters).await, vec![5]);

        let window = EventStoreBackend::new(&h.services)
            .window(&h.request("", SortBy::Date, 10).await, &filters)
            .unwrap();
        assert!(!window.is_empty());
        assert!(window.contains(at));
    }

    #[tokio::test]
    async fn test_empty_window_counts_hits_only_when_asked() {
        let h = harness();
        let mut request = h.request("", SortBy::Date, 10).await;
        request.date_from = Some(h.now - Duration::hours(1));
        request.date_to = Some(h.now - Duration::days(1));
        request.count_hits = false;
        let (page, _) = EventStoreBackend::new(&h.services)
            .query(&request, &request.filters)
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.hits, None);
    }
}
