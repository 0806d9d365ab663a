//! Error types for contactlink.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition (and decide whether a retry makes sense) instead of
//! parsing messages.

use thiserror::Error;

use crate::contact::ContactId;
use crate::storage::StorageError;

/// Validation errors, raised before any storage access.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("At least one of 'email' or 'phoneNumber' must be provided")]
    MissingIdentifier,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Malformed request: {reason}")]
    MalformedRequest {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while resolving an identity.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Contact not found: {id}")]
    ContactNotFound {
        id: ContactId,
    },

    #[error("Identifier lock not acquired within {duration_ms}ms")]
    LockTimeout {
        duration_ms: u64,
    },

    #[error("Cluster changed concurrently; gave up after {attempts} commit attempts")]
    CommitConflict {
        attempts: u32,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("{path} queue is full (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("{path} workers are disconnected")]
    Disconnected {
        path: String,
    },
}

/// Top-level error type for contactlink.
#[derive(Debug, Error)]
pub enum ContactError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ContactError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error came from the storage backend.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the caller may retry the same request.
    ///
    /// Lost races (a vanished primary, a lock that could not be acquired in
    /// time, a cluster that kept changing under us) are retryable conflicts.
    /// Storage failures propagate unchanged and are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => !matches!(e, ExecutionError::Disconnected { .. }),
            Self::Storage(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for contactlink operations.
pub type ContactResult<T> = Result<T, ContactError>;
