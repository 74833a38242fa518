//! Error types for the tiered rate limiter.

use thiserror::Error;

/// Main error type for rate limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Invalid settings or missing credentials. Only raised at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request did not yield a usable rate limit key.
    #[error("Unable to determine rate limit key")]
    KeyIndeterminate,

    /// The remote counter store answered with an error or an unreadable reply.
    #[error("Remote store error: {0}")]
    RemoteStore(String),

    /// The remote counter store could not be reached.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LimiterError {
    /// Whether this error came from the remote counter store.
    pub fn is_remote(&self) -> bool {
        matches!(self, LimiterError::RemoteStore(_) | LimiterError::Http(_))
    }
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
