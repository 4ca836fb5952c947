//! # Bulk Mutation
//!
//! Picks the groups an update or delete applies to and hands them to the
//! [`StatusWorkflow`]. Targets are either explicit ids or everything the
//! current search matches, capped at [`BULK_MUTATION_LIMIT`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use tq_core::filter::CompareOp;
use tq_core::model::{Actor, Group, GroupId, OrganizationId};
use tq_core::{Filter, Scalar, SearchError, SearchResult};

use crate::search::lookup::Lookup;
use crate::search::{Dispatcher, EffectiveQuery, IssueSearchParams};
use crate::store::{BoxError, GroupUpdate, StatusWorkflow};

pub const BULK_MUTATION_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("Error while updating issues")]
    Update(#[source] BoxError),
    #[error("Error while deleting issues")]
    Delete(#[source] BoxError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSummary {
    pub matched: usize,
    pub affected: usize,
    /// The search that picked the targets, when ids were not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<EffectiveQuery>,
}

pub struct BulkMutation<'a> {
    dispatcher: &'a Dispatcher,
    workflow: &'a dyn StatusWorkflow,
}

impl<'a> BulkMutation<'a> {
    pub fn new(dispatcher: &'a Dispatcher, workflow: &'a dyn StatusWorkflow) -> Self {
        Self {
            dispatcher,
            workflow,
        }
    }

    /// Groups the mutation applies to. `extra` narrows a search-selected set.
    pub async fn targets(
        &self,
        actor: &Actor,
        organization_id: OrganizationId,
        params: &IssueSearchParams,
        ids: &[GroupId],
        extra: &[Filter],
        now: DateTime<Utc>,
    ) -> SearchResult<(Vec<Group>, Option<EffectiveQuery>)> {
        if ids.len() > BULK_MUTATION_LIMIT {
            return Err(SearchError::invalid_query(format!(
                "Too many issues selected, the limit is {}",
                BULK_MUTATION_LIMIT
            )));
        }
        let scope = self.dispatcher.scope(actor, organization_id, params).await?;

        if !ids.is_empty() {
            let hit = Lookup::new(self.dispatcher.services(), actor, &scope.organization_projects)
                .by_ids(ids)
                .await?;
            return Ok((hit.map(|h| h.groups).unwrap_or_default(), None));
        }

        let params = IssueSearchParams {
            cursor: None,
            limit: BULK_MUTATION_LIMIT,
            count_hits: false,
            ..params.clone()
        };
        let request = self
            .dispatcher
            .request(actor, organization_id, &scope, &params, now)?;
        let (page, effective) = self
            .dispatcher
            .executor(request.sort)
            .execute(&request, extra)
            .await?;
        Ok((page.items, Some(effective)))
    }

    pub async fn update(
        &self,
        actor: &Actor,
        organization_id: OrganizationId,
        params: &IssueSearchParams,
        ids: &[GroupId],
        update: &GroupUpdate,
        now: DateTime<Utc>,
    ) -> Result<MutationSummary, MutationError> {
        // Groups already in the target status are left alone.
        let extra: Vec<Filter> = update
            .status
            .map(|status| Filter::Comparison {
                key: "status".into(),
                op: CompareOp::Neq,
                value: Scalar::Str(status.as_str().into()),
            })
            .into_iter()
            .collect();

        let (groups, query) = self
            .targets(actor, organization_id, params, ids, &extra, now)
            .await?;
        let affected = if groups.is_empty() {
            0
        } else {
            self.workflow
                .update(actor, &groups, update)
                .await
                .map_err(MutationError::Update)?
        };
        Ok(MutationSummary {
            matched: groups.len(),
            affected,
            query,
        })
    }

    pub async fn delete(
        &self,
        actor: &Actor,
        organization_id: OrganizationId,
        params: &IssueSearchParams,
        ids: &[GroupId],
        now: DateTime<Utc>,
    ) -> Result<MutationSummary, MutationError> {
        let (groups, query) = self
            .targets(actor, organization_id, params, ids, &[], now)
            .await?;
        let affected = if groups.is_empty() {
            0
        } else {
            self.workflow
                .delete(actor, &groups)
                .await
                .map_err(MutationError::Delete)?
        };
        Ok(MutationSummary {
            matched: groups.len(),
            affected,
            query,
        })
    }
}
