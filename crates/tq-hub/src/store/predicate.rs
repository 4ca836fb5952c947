//! # Group Predicate
//!
//! Relational and owner filters compiled against the caller. A predicate is
//! what relational stores evaluate: candidate pre-filtering, inbox owner
//! scoping and the reconciliation post-filter all use it.

use tq_core::filter::{CompareOp, DateBound, Filter, KeyClass, Scalar};
use tq_core::model::{Actor, Group, GroupStatus, GroupSubStatus, Owner, UserId};
use tq_core::{SearchError, SearchResult};

/// Who an owner-valued filter points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerTarget {
    Me,
    None,
    MeOrNone,
    Owner(Owner),
}

impl OwnerTarget {
    fn parse(value: &Scalar) -> SearchResult<Self> {
        let raw = value
            .as_str()
            .ok_or_else(|| SearchError::invalid_query(format!("Invalid owner value '{}'", value)))?;
        match raw {
            "me" => Ok(Self::Me),
            "none" => Ok(Self::None),
            "me_or_none" => Ok(Self::MeOrNone),
            other => Owner::parse(other)
                .map(Self::Owner)
                .ok_or_else(|| SearchError::invalid_query(format!("Invalid owner value '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Status { values: Vec<GroupStatus>, negated: bool },
    SubStatus { values: Vec<GroupSubStatus>, negated: bool },
    Assigned { targets: Vec<OwnerTarget>, negated: bool },
    AssignedOrSuggested { targets: Vec<OwnerTarget>, negated: bool },
    Bookmarks { users: Vec<UserId>, negated: bool },
    FirstSeen { from: Option<DateBound>, to: Option<DateBound> },
    ForReview(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupPredicate {
    clauses: Vec<Clause>,
    actor: Actor,
}

/// `(values, negated)` of a filter usable as a set test.
fn set_of(filter: &Filter) -> SearchResult<(Vec<Scalar>, bool)> {
    match filter {
        Filter::Comparison {
            op: CompareOp::Eq,
            value,
            ..
        } => Ok((vec![value.clone()], false)),
        Filter::Comparison {
            op: CompareOp::Neq,
            value,
            ..
        } => Ok((vec![value.clone()], true)),
        Filter::InClause {
            values, negated, ..
        } => Ok((values.clone(), *negated)),
        other => Err(SearchError::invalid_query(format!(
            "Invalid operator for '{}' search term",
            other.key()
        ))),
    }
}

fn parse_all<T>(
    values: &[Scalar],
    parse: impl Fn(&Scalar) -> SearchResult<T>,
) -> SearchResult<Vec<T>> {
    values.iter().map(parse).collect()
}

impl GroupPredicate {
    /// Match everything.
    pub fn any(actor: &Actor) -> Self {
        Self {
            clauses: Vec::new(),
            actor: actor.clone(),
        }
    }

    /// Compile relational and owner filters. Columnar filters are rejected,
    /// the caller partitions first.
    pub fn compile(filters: &[Filter], actor: &Actor) -> SearchResult<Self> {
        let mut clauses = Vec::with_capacity(filters.len());
        for filter in filters {
            if filter.class() == KeyClass::Columnar {
                return Err(SearchError::internal(format!(
                    "'{}' cannot be evaluated against group rows",
                    filter.key()
                )));
            }
            clauses.push(Self::clause(filter, actor)?);
        }
        Ok(Self {
            clauses,
            actor: actor.clone(),
        })
    }

    fn clause(filter: &Filter, actor: &Actor) -> SearchResult<Clause> {
        let invalid = |value: &Scalar| {
            SearchError::invalid_query(format!(
                "Invalid value '{}' for '{}' search term",
                value,
                filter.key()
            ))
        };
        match filter.key() {
            "status" => {
                let (values, negated) = set_of(filter)?;
                let values = parse_all(&values, |v| {
                    v.as_str().and_then(GroupStatus::parse).ok_or_else(|| invalid(v))
                })?;
                Ok(Clause::Status { values, negated })
            }
            "substatus" => {
                let (values, negated) = set_of(filter)?;
                let values = parse_all(&values, |v| {
                    v.as_str().and_then(GroupSubStatus::parse).ok_or_else(|| invalid(v))
                })?;
                Ok(Clause::SubStatus { values, negated })
            }
            "assigned" => {
                let (values, negated) = set_of(filter)?;
                let targets = parse_all(&values, OwnerTarget::parse)?;
                Ok(Clause::Assigned { targets, negated })
            }
            "assigned_or_suggested" => {
                let (values, negated) = set_of(filter)?;
                let targets = parse_all(&values, OwnerTarget::parse)?;
                Ok(Clause::AssignedOrSuggested { targets, negated })
            }
            "bookmarks" => {
                let (values, negated) = set_of(filter)?;
                let users = parse_all(&values, |v| match OwnerTarget::parse(v)? {
                    OwnerTarget::Me => Ok(actor.user_id),
                    OwnerTarget::Owner(Owner::User(id)) => Ok(id),
                    _ => Err(invalid(v)),
                })?;
                Ok(Clause::Bookmarks { users, negated })
            }
            "first_seen" => match filter {
                Filter::DateRange { from, to, .. } => Ok(Clause::FirstSeen {
                    from: *from,
                    to: *to,
                }),
                other => Err(SearchError::invalid_query(format!(
                    "Invalid operator for '{}' search term",
                    other.key()
                ))),
            },
            "for_review" => match filter {
                Filter::Comparison {
                    op: CompareOp::Eq,
                    value: Scalar::Bool(flag),
                    ..
                } => Ok(Clause::ForReview(*flag)),
                other => Err(SearchError::invalid_query(format!(
                    "Invalid value for '{}' search term",
                    other.key()
                ))),
            },
            other => Err(SearchError::internal(format!(
                "no relational clause for '{}'",
                other
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Add `status = unresolved`.
    pub fn require_unresolved(mut self) -> Self {
        self.clauses.push(Clause::Status {
            values: vec![GroupStatus::Unresolved],
            negated: false,
        });
        self
    }

    pub fn matches(&self, group: &Group) -> bool {
        self.clauses.iter().all(|clause| self.eval(clause, group))
    }

    fn owned(&self, owner: &Option<Owner>) -> bool {
        owner.as_ref().map_or(false, |o| self.actor.owns(o))
    }

    fn assigned_to(&self, target: &OwnerTarget, group: &Group) -> bool {
        match target {
            OwnerTarget::Me => self.owned(&group.assignee),
            OwnerTarget::None => group.assignee.is_none(),
            OwnerTarget::MeOrNone => group.assignee.is_none() || self.owned(&group.assignee),
            OwnerTarget::Owner(owner) => group.assignee.as_ref() == Some(owner),
        }
    }

    // Suggestions count only while nobody is assigned.
    fn assigned_or_suggested_to(&self, target: &OwnerTarget, group: &Group) -> bool {
        let suggested = |pred: &dyn Fn(&Owner) -> bool| {
            group.assignee.is_none() && group.suggested_owners.iter().any(pred)
        };
        match target {
            OwnerTarget::Me => {
                self.owned(&group.assignee) || suggested(&|o| self.actor.owns(o))
            }
            OwnerTarget::None => group.assignee.is_none() && group.suggested_owners.is_empty(),
            OwnerTarget::MeOrNone => {
                self.assigned_or_suggested_to(&OwnerTarget::Me, group)
                    || self.assigned_or_suggested_to(&OwnerTarget::None, group)
            }
            OwnerTarget::Owner(owner) => {
                group.assignee.as_ref() == Some(owner) || suggested(&|o| o == owner)
            }
        }
    }

    fn eval(&self, clause: &Clause, group: &Group) -> bool {
        match clause {
            Clause::Status { values, negated } => values.contains(&group.status) != *negated,
            Clause::SubStatus { values, negated } => {
                group.substatus.map_or(false, |s| values.contains(&s)) != *negated
            }
            Clause::Assigned { targets, negated } => {
                targets.iter().any(|t| self.assigned_to(t, group)) != *negated
            }
            Clause::AssignedOrSuggested { targets, negated } => {
                targets.iter().any(|t| self.assigned_or_suggested_to(t, group)) != *negated
            }
            Clause::Bookmarks { users, negated } => {
                users.iter().any(|u| group.bookmarked_by.contains(u)) != *negated
            }
            Clause::FirstSeen { from, to } => {
                let after = from.map_or(true, |b| {
                    if b.inclusive {
                        group.first_seen >= b.at
                    } else {
                        group.first_seen > b.at
                    }
                });
                let before = to.map_or(true, |b| {
                    if b.inclusive {
                        group.first_seen <= b.at
                    } else {
                        group.first_seen < b.at
                    }
                });
                after && before
            }
            Clause::ForReview(flag) => {
                let reviewable = group.assignee.is_none() || self.owned(&group.assignee);
                reviewable == *flag
            }
        }
    }
}
