//! # API Handlers
//!
//! Axum handlers for the issue list, bulk mutations, adjacent events and
//! key management.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use tq_core::ident::normalize_event_id;
use tq_core::model::{Actor, GroupId, OrganizationId, ProjectId};
use tq_core::{Cursor, CursorPage, SearchError, SearchResult, SortBy};

use crate::auth::{actor_ref, ApiKey, AuditAction, AuditEntry, CreateApiKeyRequest};
use crate::config::SearchConfig;
use crate::mutate::{BulkMutation, MutationError, MutationSummary};
use crate::search::dispatch::SearchOutcome;
use crate::search::reconcile;
use crate::search::serialize::{GroupSerializer, SerializeOptions, StatsPeriod};
use crate::search::IssueSearchParams;
use crate::store::{AdjacentEvents, GroupUpdate};
use crate::AppState;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// A failed request, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        let status = match &err {
            SearchError::InvalidSearchQuery(_)
            | SearchError::InvalidCursor(_)
            | SearchError::QueryOutsideRetention => StatusCode::BAD_REQUEST,
            SearchError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            SearchError::NotFound(_) => StatusCode::NOT_FOUND,
            SearchError::Backend(_) => StatusCode::BAD_GATEWAY,
            SearchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if !err.is_client_error() {
            tracing::error!(error = %err, "search failed");
        }
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<MutationError> for ApiError {
    fn from(err: MutationError) -> Self {
        if let MutationError::Search(err) = err {
            return err.into();
        }
        let source = std::error::Error::source(&err)
            .map(ToString::to_string)
            .unwrap_or_default();
        tracing::error!(error = %source, "{}", err);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

fn ensure_organization(actor: &Actor, organization_id: OrganizationId) -> SearchResult<()> {
    if actor.is_superuser || actor.organization_id == organization_id {
        Ok(())
    } else {
        Err(SearchError::permission_denied(
            "You do not have access to this organization.",
        ))
    }
}

// =============================================================================
// Query string
// =============================================================================

/// Everything the issue endpoints read from the query string.
#[derive(Debug, Default)]
pub struct IssueQuery {
    pub search: IssueSearchParams,
    /// `id` values, for mutations.
    pub ids: Vec<GroupId>,
    pub serialize: SerializeOptions,
}

fn parse_date(name: &str, raw: &str) -> SearchResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SearchError::invalid_query(format!("Invalid date '{}' for '{}'", raw, name)))
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> SearchResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| SearchError::invalid_query(format!("Invalid value '{}' for '{}'", raw, name)))
}

impl IssueQuery {
    pub fn parse(pairs: &[(String, String)], settings: &SearchConfig) -> SearchResult<Self> {
        let mut out = Self::default();
        let mut stats_period = None;
        let mut group_stats_period = None;
        let mut limit = None;
        out.search.count_hits = true;

        for (name, value) in pairs {
            match name.as_str() {
                "query" => out.search.query = Some(value.clone()),
                "sort" => out.search.sort = value.parse()?,
                "statsPeriod" => stats_period = Some(StatsPeriod::parse(value)?),
                "groupStatsPeriod" => group_stats_period = Some(StatsPeriod::parse(value)?),
                "start" => out.search.start = Some(parse_date(name, value)?),
                "end" => out.search.end = Some(parse_date(name, value)?),
                "expand" => out.serialize.expand.push(value.clone()),
                "collapse" => out.serialize.collapse.push(value.clone()),
                "cursor" => out.search.cursor = Some(Cursor::decode(value)?),
                "project" => out.search.projects.push(parse_number(name, value)?),
                "environment" => out.search.environments.push(value.clone()),
                "group" => out.search.group_ids.push(parse_number(name, value)?),
                "id" => out.ids.push(parse_number(name, value)?),
                "shortIdLookup" => out.search.short_id_lookup = matches!(value.as_str(), "1" | "true"),
                "limit" => limit = Some(parse_number::<usize>(name, value)?),
                _ => {}
            }
        }

        out.serialize.stats_period = group_stats_period.or(stats_period).unwrap_or_default();
        out.search.limit = limit
            .unwrap_or(settings.default_limit)
            .clamp(1, settings.max_limit.max(1));
        Ok(out)
    }

    /// Span of an explicit date range, for `statsPeriod=auto`.
    fn window_span(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.search
            .start
            .map(|start| self.search.end.unwrap_or(now) - start)
    }
}

/// `Link` header in the `rel="previous"` / `rel="next"` form, keeping every
/// query parameter but the cursor.
fn link_header<T>(path: &str, raw_query: Option<&str>, page: &CursorPage<T>) -> SearchResult<String> {
    let kept: Vec<&str> = raw_query
        .unwrap_or_default()
        .split('&')
        .filter(|part| !part.is_empty() && !part.starts_with("cursor="))
        .collect();
    let link = |cursor: &Cursor, rel: &str, results: bool| -> SearchResult<String> {
        let token = cursor.encode()?;
        let mut query = kept.clone();
        let cursor_param = format!("cursor={}", token);
        query.push(&cursor_param);
        Ok(format!(
            "<{}?{}>; rel=\"{}\"; results=\"{}\"; cursor=\"{}\"",
            path,
            query.join("&"),
            rel,
            results,
            token
        ))
    };
    Ok(format!(
        "{}, {}",
        link(&page.prev, "previous", page.has_prev)?,
        link(&page.next, "next", page.has_more)?
    ))
}

fn header_value(value: &str) -> SearchResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| SearchError::internal(format!("invalid header value: {}", e)))
}

// =============================================================================
// Issues
// =============================================================================

pub async fn list_issues(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(organization_id): Path<OrganizationId>,
    uri: Uri,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    ensure_organization(&actor, organization_id)?;
    let now = Utc::now();
    let query = IssueQuery::parse(&pairs, &state.config.search)?;

    let search = state
        .dispatcher
        .search(&actor, organization_id, &query.search, now)
        .await?;
    let serializer = GroupSerializer::new(
        state.dispatcher.services(),
        &search.scope.organization_projects,
        &actor,
        &query.serialize,
        query.window_span(now),
        now,
    );

    match search.outcome {
        SearchOutcome::Direct(hit) => {
            let mut items = serializer.serialize(&hit.groups).await?;
            if let Some(event_id) = &hit.matching_event_id {
                for item in &mut items {
                    item.matching_event_id = Some(event_id.clone());
                }
            }
            let mut response = Json(items).into_response();
            if hit.direct {
                response
                    .headers_mut()
                    .insert("X-Sentry-Direct-Hit", HeaderValue::from_static("1"));
            }
            Ok(response)
        }
        SearchOutcome::Paged {
            page,
            request,
            effective,
        } => {
            tracing::debug!(
                strategy = effective.strategy,
                query = %effective.query,
                projects = ?effective.projects,
                "issue search"
            );
            let page =
                reconcile::complete(&serializer, page, &request.filters, request.is_first_page()).await?;

            let mut headers = HeaderMap::new();
            headers.insert(
                header::LINK,
                header_value(&link_header(uri.path(), uri.query(), &page)?)?,
            );
            if let Some(hits) = page.hits {
                headers.insert("X-Hits", HeaderValue::from(hits));
            }
            if let Some(max_hits) = page.max_hits {
                headers.insert("X-Max-Hits", HeaderValue::from(max_hits));
            }
            Ok((headers, Json(page.items)).into_response())
        }
    }
}

pub async fn update_issues(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(organization_id): Path<OrganizationId>,
    Query(pairs): Query<Vec<(String, String)>>,
    Json(update): Json<GroupUpdate>,
) -> Result<Json<MutationSummary>, ApiError> {
    ensure_organization(&actor, organization_id)?;
    let query = IssueQuery::parse(&pairs, &state.config.search)?;
    let summary = BulkMutation::new(&state.dispatcher, state.workflow.as_ref())
        .update(&actor, organization_id, &query.search, &query.ids, &update, Utc::now())
        .await?;

    state
        .auth_layer
        .record(
            &actor_ref(&actor),
            AuditAction::UpdateIssues,
            format!("organization:{}", organization_id),
            format!("{} of {} issues updated", summary.affected, summary.matched),
        )
        .await;
    Ok(Json(summary))
}

pub async fn delete_issues(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(organization_id): Path<OrganizationId>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<MutationSummary>, ApiError> {
    ensure_organization(&actor, organization_id)?;
    let query = IssueQuery::parse(&pairs, &state.config.search)?;
    let summary = BulkMutation::new(&state.dispatcher, state.workflow.as_ref())
        .delete(&actor, organization_id, &query.search, &query.ids, Utc::now())
        .await?;

    state
        .auth_layer
        .record(
            &actor_ref(&actor),
            AuditAction::DeleteIssues,
            format!("organization:{}", organization_id),
            format!("{} of {} issues deleted", summary.affected, summary.matched),
        )
        .await;
    Ok(Json(summary))
}

pub async fn adjacent_events(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((organization_id, group_id, event_id)): Path<(OrganizationId, GroupId, String)>,
) -> Result<Json<AdjacentEvents>, ApiError> {
    ensure_organization(&actor, organization_id)?;
    let services = state.dispatcher.services();

    let projects = services.relational.projects(organization_id).await?;
    let project_ids: Vec<ProjectId> = projects.iter().map(|p| p.id).collect();
    let group = services
        .relational
        .groups_by_id(&[group_id], &project_ids)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| SearchError::not_found("Issue not found"))?;
    let project = projects
        .iter()
        .find(|p| p.id == group.project_id)
        .ok_or_else(|| SearchError::not_found("Issue not found"))?;
    if !services.access.has_project_access(&actor, project).await {
        return Err(SearchError::permission_denied("You do not have access to this issue.").into());
    }
    let event_id = normalize_event_id(&event_id).ok_or_else(|| SearchError::not_found("Event not found"))?;

    match services
        .columnar
        .adjacent_events(group.project_id, group.id, &event_id)
        .await
    {
        Ok(adjacent) => Ok(Json(adjacent)),
        Err(SearchError::QueryOutsideRetention) => Ok(Json(AdjacentEvents::default())),
        Err(err) => Err(err.into()),
    }
}

// =============================================================================
// Status
// =============================================================================

#[derive(Serialize)]
pub struct ServiceStatus {
    version: &'static str,
    uptime_seconds: u64,
    retention_days: u32,
    max_hits: u64,
    default_sort: SortBy,
}

pub async fn api_status(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        retention_days: state.config.search.retention_days,
        max_hits: state.config.search.max_hits,
        default_sort: SortBy::default(),
    })
}

// =============================================================================
// Auth
// =============================================================================

pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<Json<ApiKey>, ApiError> {
    let member = state
        .dispatcher
        .services()
        .relational
        .member(actor.organization_id, req.user_id)
        .await?
        .ok_or_else(|| SearchError::not_found("Member not found"))?;
    let key = state
        .auth_layer
        .create_key(&actor_ref(&actor), req.label, req.scopes, member)
        .await;
    Ok(Json(key))
}

pub async fn list_api_keys(State(state): State<Arc<AppState>>) -> Json<Vec<ApiKey>> {
    let keys = state.auth_layer.list_keys().await;
    Json(keys)
}

pub async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.auth_layer.revoke_key(&actor_ref(&actor), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_audit_log(State(state): State<Arc<AppState>>) -> Json<Vec<AuditEntry>> {
    let log = state.auth_layer.audit_log(100).await;
    Json(log)
}
