//! # Search Filter Model
//!
//! A normalized predicate is one of three shapes: a single comparison, a set
//! membership test, or a date range. Every consumer (relational classifier,
//! columnar query builder, inbox allow-list) matches on [`Filter`]
//! exhaustively.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SearchError, SearchResult};

/// A single filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) if s.contains(char::is_whitespace) => write!(f, "\"{}\"", s),
            Self::Str(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Date(d) => f.write_str(&d.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

/// Operator of a [`Filter::Comparison`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn operator(self) -> Operator {
        match self {
            Self::Eq => Operator::Eq,
            Self::Neq => Operator::Neq,
            Self::Gt => Operator::Gt,
            Self::Gte => Operator::Gte,
            Self::Lt => Operator::Lt,
            Self::Lte => Operator::Lte,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq | Self::Neq => "",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Apply the operator to an ordering of `candidate` relative to the
    /// filter value.
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ordering == Equal,
            Self::Neq => ordering != Equal,
            Self::Gt => ordering == Greater,
            Self::Gte => ordering != Less,
            Self::Lt => ordering == Less,
            Self::Lte => ordering != Greater,
        }
    }
}

/// The flat operator vocabulary used to look filters up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

/// One end of a date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateBound {
    pub at: DateTime<Utc>,
    pub inclusive: bool,
}

impl DateBound {
    pub fn inclusive(at: DateTime<Utc>) -> Self {
        Self { at, inclusive: true }
    }

    pub fn exclusive(at: DateTime<Utc>) -> Self {
        Self {
            at,
            inclusive: false,
        }
    }
}

/// A normalized search predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    Comparison {
        key: String,
        op: CompareOp,
        value: Scalar,
    },
    InClause {
        key: String,
        values: Vec<Scalar>,
        negated: bool,
    },
    DateRange {
        key: String,
        from: Option<DateBound>,
        to: Option<DateBound>,
    },
}

/// Which store can answer a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// Resolvable against group rows.
    Relational,
    /// Event or tag derived; only the columnar store can answer it.
    Columnar,
    /// `for_review` / `assigned_or_suggested`, inbox only.
    OwnerPredicate,
}

pub const RELATIONAL_KEYS: &[&str] = &["status", "substatus", "assigned", "bookmarks", "first_seen"];
pub const OWNER_PREDICATE_KEYS: &[&str] = &["for_review", "assigned_or_suggested"];

pub fn classify(key: &str) -> KeyClass {
    if RELATIONAL_KEYS.contains(&key) {
        KeyClass::Relational
    } else if OWNER_PREDICATE_KEYS.contains(&key) {
        KeyClass::OwnerPredicate
    } else {
        KeyClass::Columnar
    }
}

/// Value returned by [`get_filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    Set(Vec<Scalar>),
}

impl FilterValue {
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::Set(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        self.as_scalar().and_then(Scalar::as_date)
    }

    /// True if the value is, or contains, `needle`.
    pub fn contains_str(&self, needle: &str) -> bool {
        match self {
            Self::Scalar(s) => s.as_str() == Some(needle),
            Self::Set(values) => values.iter().any(|v| v.as_str() == Some(needle)),
        }
    }
}

impl Filter {
    pub fn key(&self) -> &str {
        match self {
            Self::Comparison { key, .. } | Self::InClause { key, .. } | Self::DateRange { key, .. } => {
                key
            }
        }
    }

    pub fn class(&self) -> KeyClass {
        classify(self.key())
    }

    pub fn equals(key: impl Into<String>, value: Scalar) -> Self {
        Self::Comparison {
            key: key.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    /// The value this filter contributes for `operator`, if any. Date ranges
    /// answer `Gt`/`Gte` with their lower bound and `Lt`/`Lte` with their
    /// upper bound, regardless of inclusiveness.
    pub fn value_for(&self, operator: Operator) -> Option<FilterValue> {
        match self {
            Self::Comparison { op, value, .. } if op.operator() == operator => {
                Some(FilterValue::Scalar(value.clone()))
            }
            Self::Comparison { .. } => None,
            Self::InClause { values, negated, .. } => {
                let wanted = if *negated { Operator::NotIn } else { Operator::In };
                (wanted == operator).then(|| FilterValue::Set(values.clone()))
            }
            Self::DateRange { from, to, .. } => {
                let bound = match operator {
                    Operator::Gt | Operator::Gte => from.as_ref(),
                    Operator::Lt | Operator::Lte => to.as_ref(),
                    _ => None,
                };
                bound.map(|b| FilterValue::Scalar(Scalar::Date(b.at)))
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comparison { key, op, value } => {
                let neg = if *op == CompareOp::Neq { "!" } else { "" };
                write!(f, "{}{}:{}{}", neg, key, op.symbol(), value)
            }
            Self::InClause {
                key,
                values,
                negated,
            } => {
                let neg = if *negated { "!" } else { "" };
                let joined: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{}{}:[{}]", neg, key, joined.join(", "))
            }
            Self::DateRange { key, from, to } => {
                let mut parts = Vec::new();
                if let Some(b) = from {
                    let sym = if b.inclusive { ">=" } else { ">" };
                    parts.push(format!("{}:{}{}", key, sym, Scalar::Date(b.at)));
                }
                if let Some(b) = to {
                    let sym = if b.inclusive { "<=" } else { "<" };
                    parts.push(format!("{}:{}{}", key, sym, Scalar::Date(b.at)));
                }
                f.write_str(&parts.join(" "))
            }
        }
    }
}

/// Filters split by the store that answers them. The three lists are
/// disjoint and together hold every input filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterPartition {
    pub relational: Vec<Filter>,
    pub columnar: Vec<Filter>,
    pub owner: Vec<Filter>,
}

pub fn partition(filters: &[Filter]) -> FilterPartition {
    let mut out = FilterPartition::default();
    for filter in filters {
        match filter.class() {
            KeyClass::Relational => out.relational.push(filter.clone()),
            KeyClass::Columnar => out.columnar.push(filter.clone()),
            KeyClass::OwnerPredicate => out.owner.push(filter.clone()),
        }
    }
    out
}

/// Find the value filtered for `(key, operator)`.
///
/// Independent of filter order. Repeated filters carrying the same value
/// collapse to one; repeated filters with different values are rejected
/// rather than silently picking one.
pub fn get_filter(
    filters: &[Filter],
    key: &str,
    operator: Operator,
) -> SearchResult<Option<FilterValue>> {
    let mut found: Option<FilterValue> = None;
    for value in filters
        .iter()
        .filter(|f| f.key() == key)
        .filter_map(|f| f.value_for(operator))
    {
        match &found {
            None => found = Some(value),
            Some(existing) if *existing == value => {}
            Some(_) => {
                return Err(SearchError::invalid_query(format!(
                    "Conflicting values given for '{}' filter",
                    key
                )))
            }
        }
    }
    Ok(found)
}

/// Render terms the way error messages list them: `['a:b', 'c:d']`.
pub fn format_terms<'a>(terms: impl IntoIterator<Item = &'a Filter>) -> String {
    let quoted: Vec<String> = terms.into_iter().map(|t| format!("'{}'", t)).collect();
    format!("[{}]", quoted.join(", "))
}

/// A caller-supplied restriction on which keys a search may use.
#[derive(Debug, Clone, Copy)]
pub struct AllowList {
    /// Name used in the error message, e.g. `inbox`.
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

impl AllowList {
    pub fn check(&self, filters: &[Filter]) -> SearchResult<()> {
        let invalid: Vec<&Filter> = filters
            .iter()
            .filter(|f| !self.keys.contains(&f.key()))
            .collect();
        if invalid.is_empty() {
            return Ok(());
        }
        Err(SearchError::invalid_query(format!(
            "Invalid search terms for '{}' search: {}",
            self.name,
            format_terms(invalid)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status(value: &str) -> Filter {
        Filter::equals("status", Scalar::Str(value.into()))
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let filters = vec![
            status("unresolved"),
            Filter::equals("browser", Scalar::Str("Chrome".into())),
            Filter::equals("for_review", Scalar::Bool(true)),
            Filter::equals("assigned", Scalar::Str("me".into())),
        ];
        let parts = partition(&filters);
        assert_eq!(parts.relational.len(), 2);
        assert_eq!(parts.columnar.len(), 1);
        assert_eq!(parts.owner.len(), 1);
        assert_eq!(
            parts.relational.len() + parts.columnar.len() + parts.owner.len(),
            filters.len()
        );
    }

    #[test]
    fn test_get_filter_ignores_order_and_collapses_duplicates() {
        let filters = vec![
            Filter::equals("browser", Scalar::Str("Chrome".into())),
            status("unresolved"),
            status("unresolved"),
        ];
        let value = get_filter(&filters, "status", Operator::Eq).unwrap();
        assert_eq!(value, Some(FilterValue::Scalar(Scalar::Str("unresolved".into()))));
        assert_eq!(get_filter(&filters, "status", Operator::Neq).unwrap(), None);
    }

    #[test]
    fn test_get_filter_rejects_conflicting_duplicates() {
        let filters = vec![status("unresolved"), status("resolved")];
        assert!(matches!(
            get_filter(&filters, "status", Operator::Eq),
            Err(SearchError::InvalidSearchQuery(_))
        ));
    }

    #[test]
    fn test_get_filter_reads_date_bounds() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let filters = vec![Filter::DateRange {
            key: "date".into(),
            from: Some(DateBound::inclusive(from)),
            to: Some(DateBound::exclusive(to)),
        }];
        let upper = get_filter(&filters, "date", Operator::Lt).unwrap().unwrap();
        let lower = get_filter(&filters, "date", Operator::Gt).unwrap().unwrap();
        assert_eq!(upper.as_date(), Some(to));
        assert_eq!(lower.as_date(), Some(from));
    }

    #[test]
    fn test_display_renders_query_syntax() {
        assert_eq!(
            Filter::equals("browser", Scalar::Str("Chrome".into())).to_string(),
            "browser:Chrome"
        );
        let neg = Filter::Comparison {
            key: "level".into(),
            op: CompareOp::Neq,
            value: Scalar::Str("error".into()),
        };
        assert_eq!(neg.to_string(), "!level:error");
        let gt = Filter::Comparison {
            key: "times_seen".into(),
            op: CompareOp::Gt,
            value: Scalar::Int(10),
        };
        assert_eq!(gt.to_string(), "times_seen:>10");
        let set = Filter::InClause {
            key: "status".into(),
            values: vec![Scalar::Str("resolved".into()), Scalar::Str("ignored".into())],
            negated: false,
        };
        assert_eq!(set.to_string(), "status:[resolved, ignored]");
    }

    #[test]
    fn test_allow_list_names_offending_terms() {
        const INBOX: AllowList = AllowList {
            name: "inbox",
            keys: &["date", "status", "for_review", "assigned_or_suggested"],
        };
        let filters = vec![
            status("unresolved"),
            Filter::equals("browser", Scalar::Str("Chrome".into())),
        ];
        let err = INBOX.check(&filters).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid search terms for 'inbox' search: ['browser:Chrome']"
        );
        assert!(INBOX.check(&filters[..1]).is_ok());
    }
}
