//! Error taxonomy for the data-access core.
//!
//! Every failure that can reach the caller of an effect is a [`DataError`].
//! Errors are values: they flow through the effect chain unchanged and are
//! never retried or swallowed by this layer.

use thiserror::Error;

/// Result type alias for data-access operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Failures surfaced by specifications, pagers, repositories and units of work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    /// A specification, sort key or page request was malformed.
    ///
    /// Raised at construction time, never during query execution.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A mutation targeted an entity that does not exist (or was already removed).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity collection name
        entity: &'static str,
        /// Rendered identifier of the missing entity
        id: String,
    },

    /// The storage engine detected a concurrent modification or constraint violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Execution was aborted through the cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Connectivity or timeout problem in the storage engine; the caller may retry.
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// A unit-of-work operation was invoked in a state that does not allow it
    /// (nested `begin`, `commit` without a transaction, ...).
    #[error("Invalid transaction state: {0}")]
    InvalidTransactionState(String),

    /// Any unanticipated failure from the storage adapter.
    #[error("Unknown storage error: {0}")]
    Unknown(String),
}

/// Coarse classification of a [`DataError`], used for metrics labels and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`DataError::Validation`]
    Validation,
    /// See [`DataError::NotFound`]
    NotFound,
    /// See [`DataError::Conflict`]
    Conflict,
    /// See [`DataError::Cancelled`]
    Cancelled,
    /// See [`DataError::TransientStorage`]
    TransientStorage,
    /// See [`DataError::InvalidTransactionState`]
    InvalidTransactionState,
    /// See [`DataError::Unknown`]
    Unknown,
}

impl ErrorKind {
    /// Stable lowercase name, suitable for metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::TransientStorage => "transient_storage",
            Self::InvalidTransactionState => "invalid_transaction_state",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DataError {
    /// Shorthand for [`DataError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for [`DataError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`DataError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Shorthand for [`DataError::InvalidTransactionState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidTransactionState(message.into())
    }

    /// The coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TransientStorage(_) => ErrorKind::TransientStorage,
            Self::InvalidTransactionState(_) => ErrorKind::InvalidTransactionState,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Returns `true` if a caller-side retry may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use composable_data_core::error::DataError;
    /// assert!(DataError::TransientStorage("pool timed out".into()).is_retryable());
    /// assert!(!DataError::Cancelled.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }
}
