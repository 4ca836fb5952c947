//! # Reconciliation
//!
//! The event store and the relational store are not updated atomically,
//! so a page of ids from one must be checked against the other:
//!
//! 1. take the ids of the raw backend page, in backend order;
//! 2. load their group rows from the relational store;
//! 3. drop ids without a row, or whose row no longer satisfies the
//!    relational filters;
//! 4. serialize the survivors;
//! 5. for an exact `status:unresolved` search, drop groups that serialize
//!    as resolved (auto-resolve by age);
//! 6. on a first page with nothing after it, lower the hit count to what
//!    is actually returned;
//! 7. keep the cursors of the raw page.
//!
//! Dropping rows after pagination can leave a page short. Cursors are
//! positions in the backend order, so the next page still starts right
//! after the last raw row and nothing is skipped or repeated.

use std::collections::HashMap;

use tq_core::filter::{get_filter, Operator};
use tq_core::model::{Group, GroupId, ProjectId};
use tq_core::{CursorPage, Filter, SearchResult};

use super::serialize::{GroupSerializer, SerializedGroup};
use crate::store::{GroupPredicate, RelationalStore};

/// What reconciliation removed from one page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub backend_rows: usize,
    /// Ids with no relational row (deleted, or outside the projects).
    pub missing: usize,
    /// Rows that no longer match the relational filters.
    pub mismatched: usize,
    /// Groups dropped because they serialize as resolved.
    pub auto_resolved: usize,
    pub hits_clamped: bool,
}

/// Steps 1 to 3. Keeps the raw page cursors.
pub async fn hydrate(
    relational: &dyn RelationalStore,
    page: CursorPage<GroupId>,
    projects: &[ProjectId],
    predicate: &GroupPredicate,
) -> SearchResult<CursorPage<Group>> {
    let mut stats = ReconcileStats {
        backend_rows: page.items.len(),
        ..Default::default()
    };
    if page.items.is_empty() {
        return Ok(page.with_items(Vec::new()));
    }

    let mut rows: HashMap<GroupId, Group> = relational
        .groups_by_id(&page.items, projects)
        .await?
        .into_iter()
        .map(|g| (g.id, g))
        .collect();

    let mut groups = Vec::with_capacity(page.items.len());
    for id in &page.items {
        match rows.remove(id) {
            None => stats.missing += 1,
            Some(group) if !predicate.matches(&group) => stats.mismatched += 1,
            Some(group) => groups.push(group),
        }
    }

    if stats.missing + stats.mismatched > 0 {
        tracing::debug!(?stats, "dropped stale rows while hydrating");
    }
    Ok(page.with_items(groups))
}

/// Steps 4 to 6.
pub async fn complete(
    serializer: &GroupSerializer<'_>,
    page: CursorPage<Group>,
    filters: &[Filter],
    first_page: bool,
) -> SearchResult<CursorPage<SerializedGroup>> {
    let serialized = serializer.serialize(&page.items).await?;
    Ok(finalize(page.with_items(serialized), filters, first_page))
}

/// Steps 5 and 6 on an already serialized page.
pub fn finalize(
    mut page: CursorPage<SerializedGroup>,
    filters: &[Filter],
    first_page: bool,
) -> CursorPage<SerializedGroup> {
    let mut stats = ReconcileStats {
        backend_rows: page.items.len(),
        ..Default::default()
    };

    if searches_exactly_unresolved(filters) {
        page.items.retain(|g| g.status == "unresolved");
        stats.auto_resolved = stats.backend_rows - page.items.len();
    }

    if first_page && !page.has_more {
        let returned = page.items.len() as u64;
        if let Some(hits) = page.hits.as_mut() {
            if *hits > returned {
                *hits = returned;
                stats.hits_clamped = true;
            }
        }
    }

    if stats.auto_resolved > 0 || stats.hits_clamped {
        tracing::debug!(?stats, "adjusted serialized page");
    }
    page
}

fn searches_exactly_unresolved(filters: &[Filter]) -> bool {
    matches!(
        get_filter(filters, "status", Operator::Eq).ok().flatten(),
        Some(value) if value.as_scalar().and_then(|s| s.as_str()) == Some("unresolved")
    )
}
