use std::path::PathBuf;

/// Errors surfaced while locating or reading a log file
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The requested log file does not exist
    #[error("log file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// A host or month name that is not a single plain path component
    #[error("invalid path component: {0:?}")]
    InvalidComponent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Problems found while parsing a filter expression.
///
/// These never fail a query; the offending clause or term is dropped and the
/// problem is kept on the [`Query`](crate::Query) for display.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid regex {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid range in {term:?}")]
    RangeParse { term: String },
}
