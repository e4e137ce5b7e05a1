//! Error types for the store crate.

use thiserror::Error;

use slumber_core::{Error as CoreError, StoreOperation};

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{what} already exists")]
    AlreadyExists { what: String },

    #[error("{what} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        what: String,
        expected: u64,
        actual: u64,
    },

    #[error("store unavailable during {operation}: {reason}")]
    Unavailable {
        operation: StoreOperation,
        reason: String,
    },

    #[error("invalid object: {reason}")]
    Invalid { reason: String },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an already exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Create an unavailable error.
    pub fn unavailable(operation: StoreOperation, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify into the core taxonomy.
    ///
    /// `NotFound` stays `NotFound`; everything else is a transient
    /// infrastructure failure of `operation` on `target`.
    pub fn classify(self, target: impl Into<String>, operation: StoreOperation) -> CoreError {
        match self {
            Self::NotFound { what } => CoreError::not_found(what),
            other => CoreError::transient(target, operation, other.to_string()),
        }
    }
}
