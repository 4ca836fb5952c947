//! # Search Executors
//!
//! A strategy turns a [`SearchRequest`] into a hydrated page. The general
//! executor pages the event store; the inbox executor pages the review
//! inbox (see [`super::inbox`]). Both hand back raw page cursors.

use async_trait::async_trait;

use tq_core::filter::partition;
use tq_core::model::Group;
use tq_core::{CursorPage, Filter, SearchResult};

use super::backend::EventStoreBackend;
use super::{reconcile, EffectiveQuery, SearchRequest, SearchServices};
use crate::store::GroupPredicate;

#[async_trait]
pub trait SearchExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `request` with `extra_filters` appended to its own.
    async fn execute(
        &self,
        request: &SearchRequest,
        extra_filters: &[Filter],
    ) -> SearchResult<(CursorPage<Group>, EffectiveQuery)>;
}

/// Event store search for every sort except `inbox`.
pub struct GeneralSearch {
    services: SearchServices,
}

impl GeneralSearch {
    pub fn new(services: SearchServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl SearchExecutor for GeneralSearch {
    fn name(&self) -> &'static str {
        "general"
    }

    async fn execute(
        &self,
        request: &SearchRequest,
        extra_filters: &[Filter],
    ) -> SearchResult<(CursorPage<Group>, EffectiveQuery)> {
        let filters = request.filters_with(extra_filters);
        let (page, window) = EventStoreBackend::new(&self.services)
            .query(request, &filters)
            .await?;

        let predicate = GroupPredicate::compile(&partition(&filters).relational, &request.actor)?;
        let page = reconcile::hydrate(
            self.services.relational.as_ref(),
            page,
            &request.project_ids(),
            &predicate,
        )
        .await?;

        tracing::debug!(
            strategy = self.name(),
            sort = %request.sort,
            returned = page.items.len(),
            has_more = page.has_more,
            "search executed"
        );
        Ok((page, EffectiveQuery::new(self.name(), request, &filters, window)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::harness;
    use crate::store::memory::MemoryWorkflow;
    use crate::store::testing::actor;
    use crate::store::StatusWorkflow;
    use tq_core::model::{GroupId, GroupStatus};
    use tq_core::{Scalar, SortBy};

    #[tokio::test]
    async fn test_general_search_filters_and_orders() {
        let h = harness();
        let request = h.request("is:unresolved browser:Chrome", SortBy::Freq, 10).await;
        let (page, effective) = GeneralSearch::new(h.services.clone())
            .execute(&request, &[])
            .await
            .unwrap();
        let ids: Vec<GroupId> = page.items.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(effective.strategy, "general");
        assert!(effective.query.contains("browser"));
    }

    #[tokio::test]
    async fn test_extra_filters_are_appended() {
        let h = harness();
        let request = h.request("", SortBy::Date, 10).await;
        let extra = vec![Filter::Comparison {
            key: "status".into(),
            op: tq_core::filter::CompareOp::Neq,
            value: Scalar::Str("resolved".into()),
        }];
        let (page, _) = GeneralSearch::new(h.services.clone())
            .execute(&request, &extra)
            .await
            .unwrap();
        assert!(page.items.iter().all(|g| g.status != GroupStatus::Resolved));
        assert_eq!(page.items.len(), 5);
    }

    #[tokio::test]
    async fn test_deleted_group_leaves_a_short_page_without_skipping() {
        let h = harness();
        let executor = GeneralSearch::new(h.services.clone());
        let mut request = h.request("", SortBy::Date, 2).await;
        let (before, _) = executor.execute(&request, &[]).await.unwrap();
        let first = before.items[0].clone();

        MemoryWorkflow::new(h.relational.clone())
            .delete(&actor(), &[first])
            .await
            .unwrap();

        let (page, _) = executor.execute(&request, &[]).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, before.items[1].id);

        // The next page starts right after the raw page, as before.
        request.cursor = Some(page.next.clone());
        let (next, _) = executor.execute(&request, &[]).await.unwrap();
        request.cursor = Some(before.next.clone());
        let (expected, _) = executor.execute(&request, &[]).await.unwrap();
        assert_eq!(
            next.items.iter().map(|g| g.id).collect::<Vec<_>>(),
            expected.items.iter().map(|g| g.id).collect::<Vec<_>>()
        );
    }
}
