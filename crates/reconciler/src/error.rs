//! Error types for the reconciler crate.

use std::path::PathBuf;
use std::time::Duration;

use confsync_store::ObjectKey;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Any error fails the pass; the controller re-enqueues the identity with
/// backoff. `is_retryable` only says whether an unchanged input can succeed
/// on a later attempt.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] confsync_store::Error),

    #[error("invalid payload in '{key}': {reason}")]
    Validation { key: String, reason: String },

    #[error("reconciliation of '{key}' timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to read config '{path}': {reason}")]
    ConfigRead { path: PathBuf, reason: String },
}

impl Error {
    /// Create a validation error.
    pub fn validation(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Validation {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(key: &ObjectKey, timeout: Duration) -> Self {
        Self::Timeout {
            key: key.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a config read error.
    pub fn config_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from a stale optimistic-concurrency token.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// Whether a later attempt with the same input may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            Self::Validation { .. }
            | Self::InvalidConfig { .. }
            | Self::ConfigRead { .. } => false,
        }
    }
}
