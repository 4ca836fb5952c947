//! # Search Query Parser
//!
//! Parses the structured search syntax into normalized [`Filter`]s.
//!
//! Syntax:
//! ```text
//! is:unresolved assigned:me !level:error times_seen:>10 status:[resolved, ignored] age:-24h "connection reset"
//! ```
//!
//! Terms are separated by whitespace. Double quotes group values that contain
//! spaces, brackets hold a value list. Anything that is not `key:value` is
//! free text and ends up in one `message` filter.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{SearchError, SearchResult};
use crate::filter::{AllowList, CompareOp, DateBound, Filter, Scalar};
use crate::model::{GroupStatus, GroupSubStatus, Owner};

/// Owner values with a meaning relative to the caller.
pub const OWNER_KEYWORDS: &[&str] = &["me", "none", "me_or_none"];

const IS_VALUES: &[&str] = &[
    "unresolved",
    "resolved",
    "ignored",
    "archived",
    "new",
    "ongoing",
    "escalating",
    "regressed",
    "assigned",
    "unassigned",
    "for_review",
    "bookmarked",
];

/// Longest relative date accepted (100 years).
const MAX_RELATIVE_SECS: i64 = 100 * 365 * 24 * 3600;

pub struct ParseOptions {
    /// Reference point for relative dates.
    pub now: DateTime<Utc>,
    /// When set, every key outside the list is rejected.
    pub allowed_keys: Option<AllowList>,
}

impl ParseOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            allowed_keys: None,
        }
    }

    pub fn with_allowed_keys(mut self, allowed: AllowList) -> Self {
        self.allowed_keys = Some(allowed);
        self
    }
}

/// How values of a key are read and which operators it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Status,
    SubStatus,
    Owner,
    Bool,
    Date,
    Number,
    Text,
}

fn canonical_key(key: &str) -> &str {
    match key {
        "firstSeen" | "age" => "first_seen",
        "lastSeen" => "last_seen",
        "timestamp" => "date",
        "timesSeen" => "times_seen",
        "assigned_to" | "assignee" => "assigned",
        "bookmarked_by" => "bookmarks",
        other => other,
    }
}

fn value_kind(key: &str) -> ValueKind {
    match key {
        "status" => ValueKind::Status,
        "substatus" => ValueKind::SubStatus,
        "assigned" | "assigned_or_suggested" | "bookmarks" => ValueKind::Owner,
        "for_review" => ValueKind::Bool,
        "date" | "first_seen" | "last_seen" => ValueKind::Date,
        "times_seen" => ValueKind::Number,
        _ => ValueKind::Text,
    }
}

/// Parse a query string.
pub fn parse(input: &str, options: &ParseOptions) -> SearchResult<Vec<Filter>> {
    let mut filters = Vec::new();
    let mut free_text = Vec::new();

    for token in tokenize(input)? {
        match split_term(&token) {
            Some((negated, key, value)) => {
                filters.push(parse_term(negated, key, value, options)?);
            }
            None => free_text.push(unquote(&token).to_string()),
        }
    }

    if !free_text.is_empty() {
        filters.push(Filter::equals("message", Scalar::Str(free_text.join(" "))));
    }

    if let Some(allowed) = &options.allowed_keys {
        allowed.check(&filters)?;
    }
    Ok(filters)
}

// ===== Tokenizer =====

fn tokenize(input: &str) -> SearchResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut depth = 0usize;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '[' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ']' if !in_quotes && depth > 0 => {
                depth -= 1;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(SearchError::invalid_query("Unterminated quote in search query"));
    }
    if depth > 0 {
        return Err(SearchError::invalid_query("Unterminated list in search query"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Split `[!]key:value`. Returns `None` for free text.
fn split_term(token: &str) -> Option<(bool, &str, &str)> {
    let (negated, body) = match token.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let (key, value) = body.split_once(':')?;
    let valid_key = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    valid_key.then_some((negated, key, value))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

// ===== Terms =====

fn parse_term(
    negated: bool,
    raw_key: &str,
    raw_value: &str,
    options: &ParseOptions,
) -> SearchResult<Filter> {
    if raw_value.is_empty() {
        return Err(SearchError::invalid_query(format!(
            "Missing value for '{}' search term",
            raw_key
        )));
    }
    if raw_key == "is" {
        return parse_is(negated, unquote(raw_value));
    }

    let key = canonical_key(raw_key);
    let kind = value_kind(key);

    if let Some(list) = raw_value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        if matches!(kind, ValueKind::Date | ValueKind::Number | ValueKind::Bool) {
            return Err(invalid_operator(raw_key, "IN"));
        }
        let values = list
            .split(',')
            .map(|item| unquote(item.trim()))
            .filter(|item| !item.is_empty())
            .map(|item| parse_scalar(raw_key, kind, item))
            .collect::<SearchResult<Vec<_>>>()?;
        if values.is_empty() {
            return Err(SearchError::invalid_query(format!(
                "Empty list for '{}' search term",
                raw_key
            )));
        }
        return Ok(Filter::InClause {
            key: key.to_string(),
            values,
            negated,
        });
    }

    let (op, value) = split_operator(raw_value);
    let value = unquote(value);
    let op = match (op, negated) {
        (CompareOp::Eq, true) => CompareOp::Neq,
        (op, false) => op,
        (_, true) => return Err(invalid_operator(raw_key, "!")),
    };

    match kind {
        ValueKind::Date => parse_date_term(key, raw_key, op, value, options.now),
        ValueKind::Number => Ok(Filter::Comparison {
            key: key.to_string(),
            op,
            value: parse_scalar(raw_key, kind, value)?,
        }),
        _ if !matches!(op, CompareOp::Eq | CompareOp::Neq) => {
            Err(invalid_operator(raw_key, symbol(op)))
        }
        ValueKind::Bool if op == CompareOp::Neq => Err(invalid_operator(raw_key, "!")),
        _ => Ok(Filter::Comparison {
            key: key.to_string(),
            op,
            value: parse_scalar(raw_key, kind, value)?,
        }),
    }
}

fn parse_is(negated: bool, value: &str) -> SearchResult<Filter> {
    let op = if negated { CompareOp::Neq } else { CompareOp::Eq };
    let (key, value) = match value {
        "unresolved" | "resolved" | "ignored" | "archived" => {
            let status = GroupStatus::parse(value).map(|s| s.as_str()).unwrap_or(value);
            ("status", Scalar::Str(status.to_string()))
        }
        "new" | "ongoing" | "escalating" | "regressed" => {
            ("substatus", Scalar::Str(value.to_string()))
        }
        "assigned" => {
            let op = if negated { CompareOp::Eq } else { CompareOp::Neq };
            return Ok(Filter::Comparison {
                key: "assigned".into(),
                op,
                value: Scalar::Str("none".into()),
            });
        }
        "unassigned" => ("assigned", Scalar::Str("none".into())),
        "for_review" if !negated => ("for_review", Scalar::Bool(true)),
        "bookmarked" => ("bookmarks", Scalar::Str("me".into())),
        _ => {
            let choices: Vec<String> = IS_VALUES.iter().map(|v| format!("'{}'", v)).collect();
            return Err(SearchError::invalid_query(format!(
                "Invalid value for \"is\" search, valid values are [{}]",
                choices.join(", ")
            )));
        }
    };
    Ok(Filter::Comparison {
        key: key.to_string(),
        op,
        value,
    })
}

fn split_operator(value: &str) -> (CompareOp, &str) {
    for (prefix, op) in [
        (">=", CompareOp::Gte),
        ("<=", CompareOp::Lte),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ] {
        if let Some(rest) = value.strip_prefix(prefix) {
            return (op, rest);
        }
    }
    (CompareOp::Eq, value)
}

fn symbol(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => ":",
        CompareOp::Neq => "!",
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
    }
}

fn invalid_operator(key: &str, op: &str) -> SearchError {
    SearchError::invalid_query(format!("Invalid operator '{}' for '{}' search term", op, key))
}

fn parse_scalar(raw_key: &str, kind: ValueKind, value: &str) -> SearchResult<Scalar> {
    let invalid = || {
        SearchError::invalid_query(format!("Invalid value '{}' for '{}' search term", value, raw_key))
    };
    match kind {
        ValueKind::Status => GroupStatus::parse(value)
            .map(|s| Scalar::Str(s.as_str().to_string()))
            .ok_or_else(invalid),
        ValueKind::SubStatus => GroupSubStatus::parse(value)
            .map(|s| Scalar::Str(s.as_str().to_string()))
            .ok_or_else(invalid),
        ValueKind::Owner => {
            if OWNER_KEYWORDS.contains(&value) {
                Ok(Scalar::Str(value.to_string()))
            } else {
                Owner::parse(value)
                    .map(|o| Scalar::Str(o.to_string()))
                    .ok_or_else(invalid)
            }
        }
        ValueKind::Bool => match value {
            "true" | "1" | "yes" => Ok(Scalar::Bool(true)),
            "false" | "0" | "no" => Ok(Scalar::Bool(false)),
            _ => Err(invalid()),
        },
        ValueKind::Number => value.parse().map(Scalar::Int).map_err(|_| invalid()),
        ValueKind::Date | ValueKind::Text => Ok(Scalar::Str(value.to_string())),
    }
}

// ===== Dates =====

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([+-])(\d+)([smhdw])$").expect("relative date pattern"))
}

/// `-24h` / `+7d` as seconds, with the sign.
fn parse_relative(value: &str) -> Option<(bool, i64)> {
    let caps = relative_re().captures(value)?;
    let amount: i64 = caps[2].parse().ok()?;
    let unit = match &caps[3] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => 604_800,
    };
    let secs = amount.checked_mul(unit)?;
    (secs <= MAX_RELATIVE_SECS).then_some((&caps[1] == "-", secs))
}

enum AbsoluteDate {
    Day(DateTime<Utc>),
    Instant(DateTime<Utc>),
}

fn parse_absolute(value: &str) -> Option<AbsoluteDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(AbsoluteDate::Instant(dt.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(AbsoluteDate::Instant(Utc.from_utc_datetime(&naive)));
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    Some(AbsoluteDate::Day(Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?)))
}

fn parse_date_term(
    key: &str,
    raw_key: &str,
    op: CompareOp,
    value: &str,
    now: DateTime<Utc>,
) -> SearchResult<Filter> {
    let range = |from: Option<DateBound>, to: Option<DateBound>| Filter::DateRange {
        key: key.to_string(),
        from,
        to,
    };
    let bounded = |at: DateTime<Utc>| match op {
        CompareOp::Gt => Ok(range(Some(DateBound::exclusive(at)), None)),
        CompareOp::Gte => Ok(range(Some(DateBound::inclusive(at)), None)),
        CompareOp::Lt => Ok(range(None, Some(DateBound::exclusive(at)))),
        CompareOp::Lte => Ok(range(None, Some(DateBound::inclusive(at)))),
        CompareOp::Eq | CompareOp::Neq => Err(invalid_operator(raw_key, symbol(op))),
    };

    if op == CompareOp::Neq {
        return Err(invalid_operator(raw_key, "!"));
    }

    if let Some((newer, secs)) = parse_relative(value) {
        let at = now - Duration::seconds(secs);
        return match op {
            // `-24h`: within the last day. `+24h`: older than a day.
            CompareOp::Eq if newer => Ok(range(Some(DateBound::inclusive(at)), None)),
            CompareOp::Eq => Ok(range(None, Some(DateBound::exclusive(at)))),
            _ => bounded(at),
        };
    }

    match parse_absolute(value) {
        Some(AbsoluteDate::Day(day)) if op == CompareOp::Eq => Ok(range(
            Some(DateBound::inclusive(day)),
            Some(DateBound::exclusive(day + Duration::days(1))),
        )),
        Some(AbsoluteDate::Instant(at)) if op == CompareOp::Eq => Ok(range(
            Some(DateBound::inclusive(at)),
            Some(DateBound::inclusive(at)),
        )),
        Some(AbsoluteDate::Day(at)) | Some(AbsoluteDate::Instant(at)) => bounded(at),
        None => Err(SearchError::invalid_query(format!(
            "Invalid date '{}' for '{}' search term",
            value, raw_key
        ))),
    }
}
