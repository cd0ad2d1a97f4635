//! Domain-level error types for agrisync.
//!
//! Every failure in the sync core is recoverable: storage errors leave the
//! in-memory cache authoritative, sync errors leave the pending queue intact.

use std::time::Duration;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Durable store read or write failed.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Remote submit or pull failed.
    #[error("Sync error: {message}")]
    Sync {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A remote call did not finish within the configured bound.
    #[error("Remote call timed out after {}s: {operation}", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// An entity invariant was violated.
    #[error("Invalid {entity}: {message}")]
    Validation {
        entity: &'static str,
        message: String,
    },

    /// A referenced record does not exist in the cache.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// JSON encoding or decoding failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create a storage error from a rusqlite error.
    pub fn storage(err: rusqlite::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a storage error without an underlying cause.
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a sync error from a transport error.
    pub fn sync<E>(message: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Sync {
            message: message.into(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a sync error without an underlying cause.
    pub fn sync_msg(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
            source: None,
        }
    }

    /// Create a validation error for the named entity.
    pub fn validation(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            entity,
            message: message.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Whether this is a durable-store failure (soft: cache state survives).
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Whether this is a remote failure that leaves the queue for the next cycle.
    #[must_use]
    pub const fn is_sync(&self) -> bool {
        matches!(self, Self::Sync { .. } | Self::Timeout { .. })
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
