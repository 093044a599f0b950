//! Job source error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for job source operations.
pub type ActionsResult<T> = Result<T, ActionsError>;

/// Errors returned by the job source client.
#[derive(Debug, Error)]
pub enum ActionsError {
    #[error("message queue token expired: {0}")]
    TokenExpired(String),

    #[error("rate limited by the job source")]
    RateLimited {
        /// Delay suggested by the source, when it sent one.
        retry_after: Option<Duration>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("runner {0:?} not found")]
    RunnerNotFound(String),

    #[error("runner {name:?} offline")]
    RunnerOffline { name: String, busy: bool },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid pool scope: {0}")]
    InvalidScope(String),

    #[error("credentials error: {0}")]
    Credentials(String),
}

/// Closed classification of [`ActionsError`] that callers switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session credential lapsed; refresh the session.
    TokenExpired,
    /// The source is throttling; back off.
    RateLimited,
    /// The resource (or runner) does not exist at the source.
    NotFound,
    /// The runner exists but is offline.
    Offline,
    /// The resource already exists or is held by someone else.
    Conflict,
    /// Misconfiguration that retrying will not fix.
    Invalid,
    /// Anything else; retry on the next iteration.
    Transient,
}

impl ActionsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionsError::TokenExpired(_) => ErrorKind::TokenExpired,
            ActionsError::RateLimited { .. } => ErrorKind::RateLimited,
            ActionsError::NotFound(_) | ActionsError::RunnerNotFound(_) => ErrorKind::NotFound,
            ActionsError::RunnerOffline { .. } => ErrorKind::Offline,
            ActionsError::Conflict(_) => ErrorKind::Conflict,
            ActionsError::InvalidScope(_) | ActionsError::Credentials(_) => ErrorKind::Invalid,
            ActionsError::Api { .. } | ActionsError::Http(_) | ActionsError::Decode(_) => {
                ErrorKind::Transient
            }
        }
    }
}
