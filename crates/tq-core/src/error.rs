use thiserror::Error;

pub type SearchResult<T> = Result<T, SearchError>;

/// Error taxonomy of the search layer.
///
/// Validation errors (`InvalidSearchQuery`, `InvalidCursor`) are raised where
/// the bad input is first seen and travel unchanged to the HTTP boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("{0}")]
    InvalidSearchQuery(String),
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Query is outside of the retention period")]
    QueryOutsideRetention,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidSearchQuery(message.into())
    }

    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::InvalidCursor(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors caused by the request itself rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSearchQuery(_)
                | Self::InvalidCursor(_)
                | Self::PermissionDenied(_)
                | Self::NotFound(_)
                | Self::QueryOutsideRetention
        )
    }
}
