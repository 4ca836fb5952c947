//! Shared test dataset, built relative to the current time.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use tq_core::model::{
    Actor, EventRow, Group, GroupId, GroupInbox, GroupStatus, InboxReason, Owner, Project,
    ProjectId,
};

use super::memory::Dataset;

pub fn actor() -> Actor {
    Actor {
        user_id: 1,
        organization_id: 1,
        team_ids: vec![10],
        project_ids: vec![1, 2],
        is_superuser: false,
    }
}

pub fn event_id(n: u64) -> String {
    format!("{:032x}", n)
}

pub fn event(id: &str, project: ProjectId, group: GroupId, at: DateTime<Utc>) -> EventRow {
    EventRow {
        event_id: id.to_string(),
        project_id: project,
        group_id: group,
        timestamp: at,
        environment: Some("production".into()),
        level: Some("error".into()),
        release: None,
        message: format!("failure in group {}", group),
        tags: BTreeMap::new(),
    }
}

fn group(id: GroupId, project: ProjectId, short_id: u64, status: GroupStatus, now: DateTime<Utc>) -> Group {
    Group {
        id,
        project_id: project,
        short_id,
        status,
        substatus: None,
        first_seen: now - Duration::days(10),
        last_seen: now - Duration::hours(1),
        times_seen: 1,
        assignee: None,
        suggested_owners: vec![],
        bookmarked_by: vec![],
        message: format!("failure in group {}", id),
    }
}

fn inbox(group_id: GroupId, project: ProjectId, at: DateTime<Utc>) -> GroupInbox {
    GroupInbox {
        group_id,
        project_id: project,
        date_added: at,
        reason: InboxReason::New,
    }
}

/// Two projects, six groups:
///
/// | group | project | status     | events | notes                              |
/// |-------|---------|------------|--------|------------------------------------|
/// | 1     | 1       | unresolved | 5      | 3 Chrome, inbox 1d ago              |
/// | 2     | 1       | unresolved | 2      | Chrome, staging, assigned to user 1 |
/// | 3     | 1       | resolved   | 3      | stale inbox row 3d ago              |
/// | 4     | 2       | unresolved | 1      | last seen 2d ago, auto-resolves     |
/// | 5     | 2       | ignored    | 1      | assigned to team 10                 |
/// | 6     | 2       | unresolved | 2      | suggested to user 1, inbox 1h ago   |
pub fn fixture(now: DateTime<Utc>) -> Dataset {
    let projects = vec![
        Project {
            id: 1,
            organization_id: 1,
            slug: "backend".into(),
            resolve_age_hours: None,
        },
        Project {
            id: 2,
            organization_id: 1,
            slug: "frontend".into(),
            resolve_age_hours: Some(12),
        },
    ];

    let mut groups = vec![
        group(1, 1, 1, GroupStatus::Unresolved, now),
        group(2, 1, 2, GroupStatus::Unresolved, now),
        group(3, 1, 3, GroupStatus::Resolved, now),
        group(4, 2, 1, GroupStatus::Unresolved, now),
        group(5, 2, 2, GroupStatus::Ignored, now),
        group(6, 2, 3, GroupStatus::Unresolved, now),
    ];
    groups[1].assignee = Some(Owner::User(1));
    groups[3].last_seen = now - Duration::days(2);
    groups[4].assignee = Some(Owner::Team(10));
    groups[5].suggested_owners = vec![Owner::User(1)];

    let mut events = Vec::new();
    let mut push = |n: u64, project: ProjectId, group: GroupId, at: DateTime<Utc>, browser: Option<&str>| {
        let mut row = event(&event_id(n), project, group, at);
        if let Some(browser) = browser {
            row.tags.insert("browser".into(), browser.into());
        }
        events.push(row);
    };
    push(1, 1, 1, now - Duration::days(10), Some("Chrome"));
    push(2, 1, 1, now - Duration::days(5), Some("Chrome"));
    push(3, 1, 1, now - Duration::days(2), Some("Firefox"));
    push(4, 1, 1, now - Duration::days(1), Some("Firefox"));
    push(5, 1, 1, now - Duration::hours(1), Some("Chrome"));
    push(6, 1, 2, now - Duration::days(5), Some("Chrome"));
    push(7, 1, 2, now - Duration::hours(2), Some("Chrome"));
    push(8, 1, 3, now - Duration::days(4), Some("Firefox"));
    push(9, 1, 3, now - Duration::days(3), Some("Firefox"));
    push(10, 1, 3, now - Duration::hours(3), Some("Firefox"));
    push(11, 2, 4, now - Duration::days(2), None);
    push(12, 2, 5, now - Duration::minutes(30), None);
    push(13, 2, 6, now - Duration::hours(3), None);
    push(14, 2, 6, now - Duration::minutes(20), None);
    for row in events.iter_mut().filter(|e| e.group_id == 2) {
        row.environment = Some("staging".into());
    }

    let inbox = vec![
        inbox(1, 1, now - Duration::days(1)),
        inbox(2, 1, now - Duration::days(2)),
        inbox(3, 1, now - Duration::days(3)),
        inbox(4, 2, now - Duration::days(10)),
        inbox(6, 2, now - Duration::hours(1)),
    ];

    let mut colleague = actor();
    colleague.user_id = 2;
    colleague.team_ids = vec![];
    colleague.project_ids = vec![1];

    Dataset {
        projects,
        groups,
        inbox,
        events,
        members: vec![actor(), colleague],
    }
}
