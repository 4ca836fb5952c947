//! # Dispatcher
//!
//! Resolves the projects a search may touch, validates environments and
//! feature gates, then tries the direct lookups in order before falling
//! back to the executor for the requested sort.

use chrono::{DateTime, Utc};

use tq_core::model::{Actor, Group, GroupId, OrganizationId, Project};
use tq_core::parser::{parse, ParseOptions};
use tq_core::{Cursor, CursorPage, SearchError, SearchResult, SortBy};

use super::executor::{GeneralSearch, SearchExecutor};
use super::inbox::InboxSearch;
use super::lookup::{DirectHit, Lookup};
use super::{EffectiveQuery, SearchRequest, SearchServices, GLOBAL_VIEWS_FEATURE, INBOX_FEATURE};

/// Issue search parameters as read off the request.
#[derive(Debug, Clone, Default)]
pub struct IssueSearchParams {
    /// `None` searches unresolved groups; `Some("")` searches everything.
    pub query: Option<String>,
    pub sort: SortBy,
    /// Explicit project ids; `-1` selects every accessible project.
    pub projects: Vec<i64>,
    pub environments: Vec<String>,
    pub group_ids: Vec<GroupId>,
    pub short_id_lookup: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub cursor: Option<Cursor>,
    pub limit: usize,
    pub count_hits: bool,
}

/// Projects a search runs over.
#[derive(Debug, Clone)]
pub struct SearchScope {
    pub organization_projects: Vec<Project>,
    pub projects: Vec<Project>,
}

#[derive(Debug)]
pub enum SearchOutcome {
    Direct(DirectHit),
    Paged {
        page: CursorPage<Group>,
        request: SearchRequest,
        effective: EffectiveQuery,
    },
}

#[derive(Debug)]
pub struct IssueSearch {
    pub scope: SearchScope,
    pub outcome: SearchOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupState {
    ExplicitIds,
    EventId,
    ShortId,
}

impl LookupState {
    const ORDER: [Self; 3] = [Self::ExplicitIds, Self::EventId, Self::ShortId];
}

pub struct Dispatcher {
    services: SearchServices,
    general: GeneralSearch,
    inbox: InboxSearch,
}

impl Dispatcher {
    pub fn new(services: SearchServices) -> Self {
        Self {
            general: GeneralSearch::new(services.clone()),
            inbox: InboxSearch::new(services.clone()),
            services,
        }
    }

    pub fn services(&self) -> &SearchServices {
        &self.services
    }

    pub fn executor(&self, sort: SortBy) -> &dyn SearchExecutor {
        match sort {
            SortBy::Inbox => &self.inbox,
            _ => &self.general,
        }
    }

    async fn accessible(&self, actor: &Actor, projects: &[Project]) -> Vec<Project> {
        let mut out = Vec::new();
        for project in projects {
            if self.services.access.has_project_access(actor, project).await {
                out.push(project.clone());
            }
        }
        out
    }

    async fn validate_environments(
        &self,
        organization_id: OrganizationId,
        environments: &[String],
    ) -> SearchResult<()> {
        if environments.is_empty() {
            return Ok(());
        }
        let known = self.services.relational.environment_names(organization_id).await?;
        if environments.iter().all(|env| known.contains(env)) {
            Ok(())
        } else {
            Err(SearchError::not_found("Environment not found"))
        }
    }

    async fn feature(
        &self,
        wanted: bool,
        feature: &str,
        organization_id: OrganizationId,
        actor: &Actor,
    ) -> SearchResult<bool> {
        if !wanted {
            return Ok(true);
        }
        self.services.features.has(feature, organization_id, actor).await
    }

    /// Resolve `params.projects` and check the gates that depend on it.
    pub async fn scope(
        &self,
        actor: &Actor,
        organization_id: OrganizationId,
        params: &IssueSearchParams,
    ) -> SearchResult<SearchScope> {
        let organization_projects = self.services.relational.projects(organization_id).await?;

        let projects = if params.projects.is_empty() {
            let members: Vec<Project> = organization_projects
                .iter()
                .filter(|p| actor.project_ids.contains(&p.id))
                .cloned()
                .collect();
            self.accessible(actor, &members).await
        } else if params.projects.contains(&-1) {
            self.accessible(actor, &organization_projects).await
        } else {
            let mut selected = Vec::with_capacity(params.projects.len());
            for raw in &params.projects {
                let denied = || {
                    SearchError::permission_denied(format!("You do not have access to project {}", raw))
                };
                let project = u64::try_from(*raw)
                    .ok()
                    .and_then(|id| organization_projects.iter().find(|p| p.id == id))
                    .ok_or_else(denied)?;
                if !self.services.access.has_project_access(actor, project).await {
                    return Err(denied());
                }
                selected.push(project.clone());
            }
            selected
        };

        let multiple_requested = params.projects.contains(&-1) || params.projects.len() > 1;
        let (_, global_views, inbox) = tokio::try_join!(
            self.validate_environments(organization_id, &params.environments),
            self.feature(multiple_requested, GLOBAL_VIEWS_FEATURE, organization_id, actor),
            self.feature(params.sort == SortBy::Inbox, INBOX_FEATURE, organization_id, actor),
        )?;
        if !global_views && projects.len() > 1 {
            return Err(SearchError::invalid_query(
                "You cannot view events from multiple projects.",
            ));
        }
        if !inbox {
            return Err(SearchError::invalid_query(
                "The 'inbox' sort is not enabled for this organization",
            ));
        }

        Ok(SearchScope {
            organization_projects,
            projects,
        })
    }

    /// Parse the query and fix the request limits.
    pub fn request(
        &self,
        actor: &Actor,
        organization_id: OrganizationId,
        scope: &SearchScope,
        params: &IssueSearchParams,
        now: DateTime<Utc>,
    ) -> SearchResult<SearchRequest> {
        let query = params.query.as_deref().unwrap_or("is:unresolved");
        let filters = parse(query, &ParseOptions::new(now))?;
        Ok(SearchRequest {
            actor: actor.clone(),
            organization_id,
            projects: scope.projects.clone(),
            environments: params.environments.clone(),
            filters,
            sort: params.sort,
            date_from: params.start,
            date_to: params.end,
            limit: params.limit,
            cursor: params.cursor.clone(),
            count_hits: params.count_hits,
            now,
        })
    }

    async fn lookup(
        &self,
        state: LookupState,
        lookup: &Lookup<'_>,
        params: &IssueSearchParams,
        scope: &SearchScope,
    ) -> SearchResult<Option<DirectHit>> {
        let query = params.query.as_deref().unwrap_or_default();
        match state {
            LookupState::ExplicitIds => lookup.by_ids(&params.group_ids).await,
            LookupState::EventId => lookup.by_event_id(query, &scope.projects).await,
            LookupState::ShortId if params.short_id_lookup => lookup.by_short_id(query).await,
            LookupState::ShortId => Ok(None),
        }
    }

    pub async fn search(
        &self,
        actor: &Actor,
        organization_id: OrganizationId,
        params: &IssueSearchParams,
        now: DateTime<Utc>,
    ) -> SearchResult<IssueSearch> {
        let scope = self.scope(actor, organization_id, params).await?;

        let lookup = Lookup::new(&self.services, actor, &scope.organization_projects);
        for state in LookupState::ORDER {
            if let Some(hit) = self.lookup(state, &lookup, params, &scope).await? {
                tracing::debug!(
                    ?state,
                    groups = hit.groups.len(),
                    direct = hit.direct,
                    "direct lookup answered the search"
                );
                return Ok(IssueSearch {
                    scope,
                    outcome: SearchOutcome::Direct(hit),
                });
            }
        }

        let request = self.request(actor, organization_id, &scope, params, now)?;
        let (page, effective) = self.executor(request.sort).execute(&request, &[]).await?;
        Ok(IssueSearch {
            scope,
            outcome: SearchOutcome::Paged {
                page,
                request,
                effective,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::{harness, Harness};
    use crate::store::memory::StaticFeatures;
    use crate::store::testing::{actor, event_id};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn params(query: Option<&str>) -> IssueSearchParams {
        IssueSearchParams {
            query: query.map(str::to_string),
            sort: SortBy::Date,
            limit: 25,
            count_hits: true,
            ..Default::default()
        }
    }

    async fn paged_ids(h: &Harness, params: &IssueSearchParams) -> Vec<GroupId> {
        let dispatcher = Dispatcher::new(h.services.clone());
        match dispatcher.search(&actor(), 1, params, h.now).await.unwrap().outcome {
            SearchOutcome::Paged { page, .. } => {
                let mut ids: Vec<GroupId> = page.items.iter().map(|g| g.id).collect();
                ids.sort();
                ids
            }
            SearchOutcome::Direct(hit) => panic!("unexpected direct hit {:?}", hit),
        }
    }

    #[tokio::test]
    async fn test_absent_query_means_unresolved() {
        let h = harness();
        assert_eq!(paged_ids(&h, &params(None)).await, vec![1, 2, 4, 6]);
        assert_eq!(paged_ids(&h, &params(Some(""))).await, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_project_selection() {
        let h = harness();
        let mut p = params(Some(""));
        p.projects = vec![2];
        assert_eq!(paged_ids(&h, &p).await, vec![4, 5, 6]);

        p.projects = vec![-1];
        assert_eq!(paged_ids(&h, &p).await.len(), 6);

        let dispatcher = Dispatcher::new(h.services.clone());
        p.projects = vec![7];
        let err = dispatcher.search(&actor(), 1, &p, h.now).await.unwrap_err();
        assert!(matches!(err, SearchError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_multiple_projects_need_global_views() {
        let mut h = harness();
        h.services.features = Arc::new(StaticFeatures::new(vec![], HashMap::new()));
        let dispatcher = Dispatcher::new(h.services.clone());

        let mut p = params(Some(""));
        p.projects = vec![1, 2];
        let err = dispatcher.search(&actor(), 1, &p, h.now).await.unwrap_err();
        assert_eq!(err.to_string(), "You cannot view events from multiple projects.");

        // Membership default is not an explicit request.
        p.projects = vec![];
        assert!(dispatcher.search(&actor(), 1, &p, h.now).await.is_ok());

        p.sort = SortBy::Inbox;
        p.query = None;
        let err = dispatcher.search(&actor(), 1, &p, h.now).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidSearchQuery(_)));
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let h = harness();
        let mut p = params(None);
        p.environments = vec!["production".into()];
        assert_eq!(paged_ids(&h, &p).await, vec![1, 4, 6]);

        p.environments = vec!["qa".into()];
        let err = Dispatcher::new(h.services.clone())
            .search(&actor(), 1, &p, h.now)
            .await
            .unwrap_err();
        assert_eq!(err, SearchError::not_found("Environment not found"));
    }

    #[tokio::test]
    async fn test_event_id_hit_excludes_search_results() {
        let h = harness();
        let dispatcher = Dispatcher::new(h.services.clone());
        let search = dispatcher
            .search(&actor(), 1, &params(Some(&event_id(13))), h.now)
            .await
            .unwrap();
        match search.outcome {
            SearchOutcome::Direct(hit) => {
                assert_eq!(hit.groups.len(), 1);
                assert_eq!(hit.groups[0].id, 6);
                assert!(hit.direct);
            }
            other => panic!("expected a direct hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_id_needs_the_flag() {
        let h = harness();
        let dispatcher = Dispatcher::new(h.services.clone());
        let mut p = params(Some("BACKEND-2"));
        // Without the flag it is free text that matches nothing.
        assert!(paged_ids(&h, &p).await.is_empty());

        p.short_id_lookup = true;
        let search = dispatcher.search(&actor(), 1, &p, h.now).await.unwrap();
        assert!(matches!(
            search.outcome,
            SearchOutcome::Direct(DirectHit { direct: true, ref groups, .. }) if groups[0].id == 2
        ));
    }

    #[tokio::test]
    async fn test_explicit_ids_win() {
        let h = harness();
        let dispatcher = Dispatcher::new(h.services.clone());
        let mut p = params(Some(&event_id(13)));
        p.group_ids = vec![3];
        let search = dispatcher.search(&actor(), 1, &p, h.now).await.unwrap();
        match search.outcome {
            SearchOutcome::Direct(hit) => {
                assert_eq!(hit.groups[0].id, 3);
                assert!(!hit.direct);
            }
            other => panic!("expected explicit ids, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inbox_sort_routes_to_inbox() {
        let h = harness();
        let dispatcher = Dispatcher::new(h.services.clone());
        assert_eq!(dispatcher.executor(SortBy::Inbox).name(), "inbox");
        assert_eq!(dispatcher.executor(SortBy::Freq).name(), "general");

        let mut p = params(None);
        p.sort = SortBy::Inbox;
        match dispatcher.search(&actor(), 1, &p, h.now).await.unwrap().outcome {
            SearchOutcome::Paged { page, effective, .. } => {
                assert_eq!(effective.strategy, "inbox");
                assert_eq!(page.items.iter().map(|g| g.id).collect::<Vec<_>>(), vec![6, 1, 2]);
            }
            other => panic!("expected a paged search, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_runs_on_a_spawned_task() {
        let h = harness();
        let dispatcher = Arc::new(Dispatcher::new(h.services.clone()));
        let now = h.now;
        // Handlers need the search future to be `Send`.
        let task = tokio::spawn(async move {
            let params = params(None);
            dispatcher.search(&actor(), 1, &params, now).await.map(|s| s.scope.projects.len())
        });
        assert_eq!(task.await.unwrap().unwrap(), 2);
    }
}
