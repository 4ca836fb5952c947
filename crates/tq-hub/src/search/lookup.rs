//! # Direct Lookups
//!
//! Queries that name their result: explicit group ids, an event id, or a
//! project-qualified short id. Each returns `None` when it does not apply
//! so the dispatcher can move on.

use futures_util::future::try_join_all;
use std::collections::BTreeSet;

use tq_core::ident::{normalize_event_id, ShortId};
use tq_core::model::{Actor, Group, GroupId, Project, ProjectId};
use tq_core::{SearchError, SearchResult};

use super::SearchServices;

/// Groups found by a direct lookup. Never paginated.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectHit {
    pub groups: Vec<Group>,
    /// The query named exactly this result.
    pub direct: bool,
    /// Event id that led to the single group.
    pub matching_event_id: Option<String>,
}

pub struct Lookup<'a> {
    services: &'a SearchServices,
    actor: &'a Actor,
    /// Every project of the organization.
    org_projects: &'a [Project],
}

impl<'a> Lookup<'a> {
    pub fn new(services: &'a SearchServices, actor: &'a Actor, org_projects: &'a [Project]) -> Self {
        Self {
            services,
            actor,
            org_projects,
        }
    }

    async fn can_access(&self, project: &Project) -> bool {
        self.services.access.has_project_access(self.actor, project).await
    }

    /// Explicit `group` ids. Every project they belong to must be
    /// accessible; result keeps the requested order.
    pub async fn by_ids(&self, ids: &[GroupId]) -> SearchResult<Option<DirectHit>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let scope: Vec<ProjectId> = self.org_projects.iter().map(|p| p.id).collect();
        let mut groups = self.services.relational.groups_by_id(ids, &scope).await?;

        let touched: BTreeSet<ProjectId> = groups.iter().map(|g| g.project_id).collect();
        for project in self.org_projects.iter().filter(|p| touched.contains(&p.id)) {
            if !self.can_access(project).await {
                return Err(SearchError::permission_denied(
                    "You do not have permission to perform this action.",
                ));
            }
        }

        groups.sort_by_key(|g| ids.iter().position(|id| *id == g.id));
        Ok(Some(DirectHit {
            groups,
            direct: false,
            matching_event_id: None,
        }))
    }

    /// Event id over the selected projects plus the caller's own.
    pub async fn by_event_id(&self, query: &str, selected: &[Project]) -> SearchResult<Option<DirectHit>> {
        let Some(event_id) = normalize_event_id(query) else {
            return Ok(None);
        };

        let mut scope = Vec::new();
        for project in self.org_projects {
            let wanted = selected.iter().any(|p| p.id == project.id)
                || self.actor.project_ids.contains(&project.id);
            if wanted && self.can_access(project).await {
                scope.push(project.id);
            }
        }
        if scope.is_empty() {
            return Ok(None);
        }

        let columnar = &self.services.columnar;
        let events = if scope.len() <= self.services.settings.point_lookup_limit {
            try_join_all(scope.iter().map(|project| columnar.get_event(*project, &event_id)))
                .await?
                .into_iter()
                .flatten()
                .collect()
        } else {
            columnar.find_events(&scope, &event_id).await?
        };

        let group_ids: Vec<GroupId> = events
            .iter()
            .map(|e| e.group_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if group_ids.is_empty() {
            return Ok(None);
        }
        let mut groups = self.services.relational.groups_by_id(&group_ids, &scope).await?;
        groups.sort_by_key(|g| g.id);

        Ok(match groups.len() {
            0 => None,
            1 => Some(DirectHit {
                groups,
                direct: true,
                matching_event_id: Some(event_id),
            }),
            _ => Some(DirectHit {
                groups,
                direct: false,
                matching_event_id: None,
            }),
        })
    }

    /// `SLUG-SUFFIX` within the organization. A group the caller cannot
    /// see is treated as not found.
    pub async fn by_short_id(&self, query: &str) -> SearchResult<Option<DirectHit>> {
        let Some(short_id) = ShortId::parse(query) else {
            return Ok(None);
        };
        let Some(organization_id) = self.org_projects.first().map(|p| p.organization_id) else {
            return Ok(None);
        };
        let Some(group) = self
            .services
            .relational
            .group_by_short_id(organization_id, &short_id.project_slug, short_id.short_id)
            .await?
        else {
            return Ok(None);
        };
        let Some(project) = self.org_projects.iter().find(|p| p.id == group.project_id) else {
            return Ok(None);
        };
        if !self.can_access(project).await {
            return Ok(None);
        }
        Ok(Some(DirectHit {
            groups: vec![group],
            direct: true,
            matching_event_id: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::{harness, Harness};
    use crate::store::testing::{actor, event, event_id};

    async fn projects(h: &Harness) -> Vec<Project> {
        h.services.relational.projects(1).await.unwrap()
    }

    fn colleague() -> Actor {
        let mut a = actor();
        a.user_id = 2;
        a.team_ids = vec![];
        a.project_ids = vec![1];
        a
    }

    #[tokio::test]
    async fn test_explicit_ids_keep_order_and_check_access() {
        let h = harness();
        let projects = projects(&h).await;
        let me = actor();
        let hit = Lookup::new(&h.services, &me, &projects)
            .by_ids(&[4, 1, 99])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.groups.iter().map(|g| g.id).collect::<Vec<_>>(), vec![4, 1]);
        assert!(!hit.direct);

        let other = colleague();
        let err = Lookup::new(&h.services, &other, &projects)
            .by_ids(&[1, 4])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::PermissionDenied(_)));
        assert!(Lookup::new(&h.services, &other, &projects)
            .by_ids(&[])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_event_id_single_hit_is_direct() {
        let h = harness();
        let projects = projects(&h).await;
        let me = actor();
        let lookup = Lookup::new(&h.services, &me, &projects);

        let hit = lookup.by_event_id(&event_id(13), &[]).await.unwrap().unwrap();
        assert!(hit.direct);
        assert_eq!(hit.groups.len(), 1);
        assert_eq!(hit.groups[0].id, 6);
        assert_eq!(hit.matching_event_id, Some(event_id(13)));

        assert!(lookup.by_event_id(&event_id(999), &[]).await.unwrap().is_none());
        assert!(lookup.by_event_id("not an id", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_id_in_several_projects_is_not_direct() {
        let h = harness();
        // The same event id stored in both projects.
        h.columnar.insert(event(&event_id(1), 2, 4, h.now)).await;
        let projects = projects(&h).await;
        let me = actor();
        let hit = Lookup::new(&h.services, &me, &projects)
            .by_event_id(&event_id(1), &[])
            .await
            .unwrap()
            .unwrap();
        assert!(!hit.direct);
        assert_eq!(hit.groups.iter().map(|g| g.id).collect::<Vec<_>>(), vec![1, 4]);
        assert!(hit.matching_event_id.is_none());
    }

    #[tokio::test]
    async fn test_event_id_scan_path_and_scope() {
        let mut h = harness();
        h.services.settings.point_lookup_limit = 0;
        let projects = projects(&h).await;

        let me = actor();
        let hit = Lookup::new(&h.services, &me, &projects)
            .by_event_id(&event_id(13), &[])
            .await
            .unwrap();
        assert_eq!(hit.map(|hit| hit.groups[0].id), Some(6));

        // Project 2 is outside the colleague's membership.
        let other = colleague();
        let hit = Lookup::new(&h.services, &other, &projects)
            .by_event_id(&event_id(13), &projects)
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn test_short_id() {
        let h = harness();
        let projects = projects(&h).await;
        let me = actor();
        let lookup = Lookup::new(&h.services, &me, &projects);

        let hit = lookup.by_short_id("FRONTEND-3").await.unwrap().unwrap();
        assert!(hit.direct);
        assert_eq!(hit.groups[0].id, 6);
        assert!(lookup.by_short_id("frontend-99").await.unwrap().is_none());
        assert!(lookup.by_short_id("nope-1").await.unwrap().is_none());

        let other = colleague();
        assert!(Lookup::new(&h.services, &other, &projects)
            .by_short_id("FRONTEND-3")
            .await
            .unwrap()
            .is_none());
    }
}
