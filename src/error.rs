//! Error types for the query catalogue.

use thiserror::Error;

/// Result type alias for catalogue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// No catalogue entry with the given name
    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    /// Failure reported by the document store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fixture file could not be read or decoded
    #[error("Fixture error: {0}")]
    Fixture(String),

    /// A fixture record failed model validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Failure during query submission or result materialization
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query execution failed: {0}")]
    Query(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

/// Stable label for a [`StoreError`], used in log fields and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    Connection,
    Query,
    InvalidQuery,
    Unsupported,
    Serialization,
    Configuration,
    Timeout,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::Connection => "connection",
            StoreErrorKind::Query => "query",
            StoreErrorKind::InvalidQuery => "invalid_query",
            StoreErrorKind::Unsupported => "unsupported",
            StoreErrorKind::Serialization => "serialization",
            StoreErrorKind::Configuration => "configuration",
            StoreErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Connection(_) => StoreErrorKind::Connection,
            StoreError::Query(_) => StoreErrorKind::Query,
            StoreError::InvalidQuery(_) => StoreErrorKind::InvalidQuery,
            StoreError::Unsupported(_) => StoreErrorKind::Unsupported,
            StoreError::Serialization(_) => StoreErrorKind::Serialization,
            StoreError::Configuration(_) => StoreErrorKind::Configuration,
            StoreError::Timeout(_) => StoreErrorKind::Timeout,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidQuery(msg.into())
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
