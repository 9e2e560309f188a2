//! Error types for sessgate-core.

use thiserror::Error;

use crate::config::ConfigValidationError;

/// Result type alias using sessgate-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for session coordination
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("{0} cannot be missing when building a session filter")]
    MissingCollaborator(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigValidationError),

    // Protocol misuse
    #[error("Unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("Cannot create a session after the response has been committed")]
    SessionAfterCommit,

    #[error("Cannot change session ID. There is no session associated with this request.")]
    NoSessionBound,

    #[error("Session has been invalidated")]
    SessionInvalidated,

    #[error("Response has already been committed")]
    ResponseCommitted,

    #[error("Required attribute '{0}' is missing")]
    MissingAttribute(String),

    // Store errors
    #[error("Session store error: {0}")]
    Store(String),

    #[cfg(feature = "db")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session state lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Errors caused by calling the session API in the wrong order or context.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedExchange(_)
                | Self::SessionAfterCommit
                | Self::NoSessionBound
                | Self::SessionInvalidated
                | Self::ResponseCommitted
        )
    }

    /// Errors raised by (or while talking to) a session store.
    pub fn is_store_failure(&self) -> bool {
        #[cfg(feature = "db")]
        if matches!(self, Self::Database(_)) {
            return true;
        }
        matches!(self, Self::Store(_) | Self::Io(_) | Self::Serialization(_))
    }
}
