use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SearchError;

/// Requested result order. Every order is descending on its primary score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Priority,
    Relevance,
    /// Most recent event first.
    Date,
    /// Newest group first.
    New,
    /// Most events first.
    Freq,
    /// Most recently added to the review inbox first.
    Inbox,
}

/// Secondary keys that make an order total. Applied in sequence after the
/// primary score, all descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    LastSeen,
    FirstSeen,
    LatestEventId,
    DateAdded,
    GroupId,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Relevance => "relevance",
            Self::Date => "date",
            Self::New => "new",
            Self::Freq => "freq",
            Self::Inbox => "inbox",
        }
    }

    pub fn tie_break(&self) -> &'static [TieBreak] {
        match self {
            Self::Priority | Self::Relevance | Self::Freq => {
                &[TieBreak::LastSeen, TieBreak::GroupId]
            }
            Self::Date => &[TieBreak::LatestEventId, TieBreak::GroupId],
            Self::New => &[TieBreak::FirstSeen, TieBreak::GroupId],
            Self::Inbox => &[TieBreak::DateAdded, TieBreak::GroupId],
        }
    }
}

impl FromStr for SortBy {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "priority" => Ok(Self::Priority),
            "relevance" => Ok(Self::Relevance),
            "date" => Ok(Self::Date),
            "new" => Ok(Self::New),
            "freq" => Ok(Self::Freq),
            "inbox" => Ok(Self::Inbox),
            other => Err(SearchError::invalid_query(format!(
                "Invalid sort '{}'. Valid choices are 'priority', 'relevance', 'date', 'new', 'freq' and 'inbox'",
                other
            ))),
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
