//! Error taxonomy shared by every controller crate.
//!
//! Each variant maps to exactly one queue behaviour, so callers classify
//! errors with [`Error::is_retryable`], [`Error::is_conflict`] and friends
//! instead of matching on strings.

use thiserror::Error;

use crate::meta::ObjectKey;
use crate::resource::ResourceKind;

/// Core error type for controller operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The object vanished between enqueue and fetch.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    /// An optimistic-concurrency write lost against a concurrent writer.
    #[error("version conflict on {kind} '{key}': expected version {expected}, found {actual}")]
    VersionConflict {
        kind: ResourceKind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    /// The object already exists.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    /// Network failure, throttling or timeout. Safe to retry with backoff.
    #[error("transient failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    /// The resource is structurally invalid and can never reconcile as is.
    #[error("{kind} '{key}' is invalid: {reason}")]
    Fatal {
        kind: ResourceKind,
        key: ObjectKey,
        reason: String,
    },

    /// A watch payload could not be decoded.
    #[error("malformed event: {reason}")]
    Malformed { reason: String },

    /// The operation observed shutdown and aborted.
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// A string could not be parsed as an object key.
    #[error("invalid object key '{input}': {reason}")]
    InvalidKey { input: String, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: ResourceKind, key: ObjectKey) -> Self {
        Self::NotFound { kind, key }
    }

    /// Create a version conflict error.
    pub fn version_conflict(
        kind: ResourceKind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    ) -> Self {
        Self::VersionConflict {
            kind,
            key,
            expected,
            actual,
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: ResourceKind, key: ObjectKey) -> Self {
        Self::AlreadyExists { kind, key }
    }

    /// Create a transient error.
    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a fatal error for a structurally invalid resource.
    pub fn fatal(kind: ResourceKind, key: ObjectKey, reason: impl Into<String>) -> Self {
        Self::Fatal {
            kind,
            key,
            reason: reason.into(),
        }
    }

    /// Create a malformed event error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the work queue should retry with exponential backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether this is an optimistic-concurrency conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Whether the target object does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the resource can never reconcile without a spec change.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Whether the error came from a shutdown in progress.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
