//! Error types for the store crate.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error types.
///
/// `Conflict` and `Unavailable` are retryable: the caller discards its
/// in-memory copy, re-reads and starts over. The rest describe the request
/// itself and will fail the same way on a blind retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("conflict writing {kind} '{key}': expected resource version {expected}, store has {actual}")]
    Conflict {
        kind: String,
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid {kind} '{key}': {reason}")]
    Invalid {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("store unavailable during '{operation}': {reason}")]
    Unavailable { operation: String, reason: String },

    #[error("kind '{kind}' is not registered")]
    UnregisteredKind { kind: String },

    #[error("watch lagged behind, {skipped} events dropped")]
    Lagged { skipped: u64 },

    #[error("watch channel closed")]
    ChannelClosed,
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: impl Into<String>, key: impl ToString, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.to_string(),
            expected,
            actual,
        }
    }

    /// Create an invalid request error.
    pub fn invalid(kind: impl Into<String>, key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind: kind.into(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an unregistered kind error.
    pub fn unregistered_kind(kind: impl Into<String>) -> Self {
        Self::UnregisteredKind { kind: kind.into() }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether re-running the whole operation from a fresh read may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Unavailable { .. } | Self::Lagged { .. }
        )
    }
}
