//! Error types shared across the crate

use thiserror::Error;

/// Result type alias for top-level operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that abort an operation as a whole.
///
/// Failures that only concern a single task, chore or to-do are not represented here:
/// they are collected as strings into [`SyncStats::errors`](crate::sync::SyncStats) and the run goes on.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing URL or credentials. Raised before any network call
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport or authentication failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed calendar or server payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// The local store could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Another sync run is in progress
    #[error("A sync is already running")]
    AlreadyRunning,
}

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(format!("invalid URL: {}", err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<minidom::Error> for SyncError {
    fn from(err: minidom::Error) -> Self {
        Self::Parse(format!("invalid XML: {}", err))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = SyncError::configuration("CalDAV credentials are incomplete");
        assert_eq!(err.to_string(), "Configuration error: CalDAV credentials are incomplete");

        let err: SyncError = "not a url".parse::<url::Url>().unwrap_err().into();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
