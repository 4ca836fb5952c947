//! # Cursor — Resumable Scan Position
//!
//! A cursor names a position in a descending sequence as `(value, offset)`:
//! the first entry whose score is `<= value`, plus `offset` entries. Forward
//! cursors return the page starting at that position, previous cursors the
//! page ending just before it.
//!
//! The token handed to clients is base64url (no padding) over a compact JSON
//! object. Scores are externally tagged so integers, floats and strings keep
//! their exact value; floats travel as their shortest round-trip decimal
//! text. Unknown fields are ignored on decode, anything truncated or
//! malformed fails with [`SearchError::InvalidCursor`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{SearchError, SearchResult};

/// Tokens longer than this are rejected before decoding.
pub const MAX_CURSOR_LEN: usize = 4096;

/// A sort score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CursorValue {
    #[serde(rename = "i")]
    Int(i64),
    #[serde(rename = "f")]
    Float(#[serde(with = "float_text")] f64),
    #[serde(rename = "s")]
    Str(String),
}

impl CursorValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Float(_) => 1,
            Self::Str(_) => 2,
        }
    }
}

// Total order: numbers before strings, numbers compared numerically with
// `total_cmp` so NaN has a stable place.
impl Ord for CursorValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64)
                .total_cmp(b)
                .then(self.rank().cmp(&other.rank())),
            (Self::Float(a), Self::Int(b)) => a
                .total_cmp(&(*b as f64))
                .then(self.rank().cmp(&other.rank())),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for CursorValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CursorValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CursorValue {}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for CursorValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for CursorValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for CursorValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for CursorValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Opaque pagination position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "v")]
    pub value: CursorValue,
    #[serde(rename = "o")]
    pub offset: usize,
    #[serde(rename = "p")]
    pub is_prev: bool,
}

impl Cursor {
    pub fn new(value: impl Into<CursorValue>, offset: usize, is_prev: bool) -> Self {
        Self {
            value: value.into(),
            offset,
            is_prev,
        }
    }

    pub fn encode(&self) -> SearchResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|err| SearchError::internal(format!("failed to serialize cursor: {err}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> SearchResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SearchError::invalid_cursor("empty cursor"));
        }
        if token.len() > MAX_CURSOR_LEN {
            return Err(SearchError::invalid_cursor("cursor is too long"));
        }
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| SearchError::invalid_cursor(format!("invalid base64 cursor: {err}")))?;
        serde_json::from_slice(&raw)
            .map_err(|err| SearchError::invalid_cursor(format!("invalid cursor payload: {err}")))
    }
}

mod float_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<f64>().map_err(serde::de::Error::custom)
    }
}
