//! Storage error types for the query-layer abstraction.

use std::fmt;

/// Errors that can occur while executing a query against a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The storage backend does not know the entity.
    #[error("Unknown entity: {entity}")]
    UnknownEntity {
        /// Name of the unknown entity.
        entity: String,
    },

    /// The query could not be executed as written.
    #[error("Invalid query: {message}")]
    InvalidQuery {
        /// Why the query is invalid.
        message: String,
    },

    /// The backend cannot evaluate a requested construct.
    #[error("Unsupported by storage backend: {message}")]
    Unsupported {
        /// The unsupported construct.
        message: String,
    },

    /// Failed to reach the storage backend.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    #[must_use]
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity {
            entity: entity.into(),
        }
    }

    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownEntity { .. } | Self::InvalidQuery { .. } => ErrorCategory::Validation,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::ConnectionError { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    Unsupported,
    Infrastructure,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
