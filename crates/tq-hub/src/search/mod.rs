//! # Issue Search
//!
//! Turns a parsed request into an ordered, cursor-paginated page of groups.
//!
//! ```text
//! request ─► dispatch ─┬─► explicit ids ─┐
//!                      ├─► event id ─────┤  (first hit wins)
//!                      ├─► short id ─────┤
//!                      └─► executor ─────┴─► reconcile ─► page
//!                           ├─ GeneralSearch: event store backend
//!                           └─ InboxSearch:   review inbox
//! ```
//!
//! The event store is always queried before group rows are hydrated from
//! the relational store; hydration needs the ids it returns.

pub mod backend;
pub mod dispatch;
pub mod executor;
pub mod inbox;
pub mod lookup;
pub mod reconcile;
pub mod serialize;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use tq_core::filter::{get_filter, Operator};
use tq_core::model::{Actor, OrganizationId, Project, ProjectId};
use tq_core::{Cursor, Filter, SearchResult, SortBy};

use crate::config::SearchConfig;
use crate::store::{AccessControl, ColumnarStore, FeatureFlags, RelationalStore, TimeWindow};

pub use dispatch::{Dispatcher, IssueSearch, IssueSearchParams};
pub use executor::{GeneralSearch, SearchExecutor};
pub use inbox::InboxSearch;

pub const GLOBAL_VIEWS_FEATURE: &str = "organizations:global-views";
pub const INBOX_FEATURE: &str = "organizations:inbox";

/// Store collaborators and limits shared by every search path.
#[derive(Clone)]
pub struct SearchServices {
    pub relational: Arc<dyn RelationalStore>,
    pub columnar: Arc<dyn ColumnarStore>,
    pub access: Arc<dyn AccessControl>,
    pub features: Arc<dyn FeatureFlags>,
    pub settings: SearchConfig,
}

/// A validated search: scope resolved, filters parsed, limits applied.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub actor: Actor,
    pub organization_id: OrganizationId,
    pub projects: Vec<Project>,
    pub environments: Vec<String>,
    pub filters: Vec<Filter>,
    pub sort: SortBy,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub cursor: Option<Cursor>,
    pub count_hits: bool,
    pub now: DateTime<Utc>,
}

impl SearchRequest {
    pub fn project_ids(&self) -> Vec<ProjectId> {
        self.projects.iter().map(|p| p.id).collect()
    }

    pub fn is_first_page(&self) -> bool {
        self.cursor.is_none()
    }

    /// Request filters followed by `extra`.
    pub fn filters_with(&self, extra: &[Filter]) -> Vec<Filter> {
        self.filters.iter().chain(extra).cloned().collect()
    }
}

/// What a strategy actually ran, for logging and bulk mutation replies.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveQuery {
    pub strategy: &'static str,
    pub query: String,
    pub sort: SortBy,
    pub projects: Vec<ProjectId>,
    pub environments: Vec<String>,
    pub window: TimeWindow,
}

impl EffectiveQuery {
    pub fn new(strategy: &'static str, request: &SearchRequest, filters: &[Filter], window: TimeWindow) -> Self {
        Self {
            strategy,
            query: filters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            sort: request.sort,
            projects: request.project_ids(),
            environments: request.environments.clone(),
            window,
        }
    }
}

/// `date` filter bounds as a half-open `[lower, upper)`. Conflicting
/// repeats fail.
///
/// Exclusive lower and inclusive upper bounds move up by one nanosecond,
/// the finest timestamp resolution, so `>`, `<=` and an exact instant keep
/// their meaning in a half-open window.
pub fn date_bounds(filters: &[Filter]) -> SearchResult<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    get_filter(filters, "date", Operator::Gte)?;
    get_filter(filters, "date", Operator::Lt)?;

    let tick = Duration::nanoseconds(1);
    let mut lower: Option<DateTime<Utc>> = None;
    let mut upper: Option<DateTime<Utc>> = None;
    for filter in filters {
        let Filter::DateRange { key, from, to } = filter else {
            continue;
        };
        if key != "date" {
            continue;
        }
        if let Some(bound) = from {
            let start = if bound.inclusive { bound.at } else { bound.at + tick };
            lower = Some(lower.map_or(start, |l| l.max(start)));
        }
        if let Some(bound) = to {
            let end = if bound.inclusive { bound.at + tick } else { bound.at };
            upper = Some(upper.map_or(end, |u| u.min(end)));
        }
    }
    Ok((lower, upper))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::store::memory::{
        Dataset, MemoryColumnarStore, MemoryRelationalStore, MembershipAccess, StaticFeatures,
    };
    use crate::store::testing;
    use std::collections::HashMap;
    use tq_core::parser::{parse, ParseOptions};

    pub struct Harness {
        pub services: SearchServices,
        pub relational: Arc<MemoryRelationalStore>,
        pub columnar: Arc<MemoryColumnarStore>,
        pub now: DateTime<Utc>,
    }

    pub fn harness() -> Harness {
        let now = Utc::now();
        harness_with(testing::fixture(now), now)
    }

    pub fn harness_with(dataset: Dataset, now: DateTime<Utc>) -> Harness {
        let relational = Arc::new(MemoryRelationalStore::new(&dataset));
        let columnar = Arc::new(MemoryColumnarStore::new(&dataset, 90));
        let features = StaticFeatures::new(
            vec![INBOX_FEATURE.to_string()],
            HashMap::from([(1, vec![GLOBAL_VIEWS_FEATURE.to_string()])]),
        );
        let services = SearchServices {
            relational: relational.clone(),
            columnar: columnar.clone(),
            access: Arc::new(MembershipAccess {
                open_membership: false,
            }),
            features: Arc::new(features),
            settings: SearchConfig::default(),
        };
        Harness {
            services,
            relational,
            columnar,
            now,
        }
    }

    impl Harness {
        pub async fn request(&self, query: &str, sort: SortBy, limit: usize) -> SearchRequest {
            let projects = self.services.relational.projects(1).await.unwrap();
            SearchRequest {
                actor: testing::actor(),
                organization_id: 1,
                projects,
                environments: vec![],
                filters: parse(query, &ParseOptions::new(self.now)).unwrap(),
                sort,
                date_from: None,
                date_to: None,
                limit,
                cursor: None,
                count_hits: true,
                now: self.now,
            }
        }
    }
}
