//! Core error types for slumber operations using Railway-Oriented Programming.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed. The
//! variants mirror how a control-loop pass reacts to them: retry soon, stop
//! silently, or surface in status until the spec changes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::ResourceKind;

/// Store operation that failed, recorded alongside infrastructure errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOperation {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl StoreOperation {
    /// Lowercase name used in log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::UpdateStatus => "update_status",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the control loop should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Schedule the next pass on the short retry interval.
    RetrySoon,
    /// Stop the pass and do not schedule another one.
    Abandon,
    /// Record the error in status; it persists until the spec changes.
    Permanent,
}

/// Core error type for slumber operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Operator configuration has not been published yet.
    #[error("operator configuration not initialized yet: {reason}")]
    NotYetInitialized { reason: String },

    /// The object being reconciled no longer exists.
    #[error("{what} not found")]
    NotFound { what: String },

    /// A store call failed; the pass may succeed on retry.
    #[error("{operation} {target} failed: {reason}")]
    TransientInfra {
        target: String,
        operation: StoreOperation,
        reason: String,
    },

    /// A spec value cannot be turned into a valid dependent.
    #[error("cannot render {kind}: {reason}")]
    Render { kind: ResourceKind, reason: String },

    /// The probe was invoked with an unusable target.
    #[error("invalid probe target: {reason}")]
    InvalidProbeTarget { reason: String },

    /// Settings or seed data are invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The pass was abandoned at a step boundary.
    #[error("pass for {instance} cancelled")]
    Cancelled { instance: String },
}

impl Error {
    /// Create a not-yet-initialized error.
    pub fn not_yet_initialized(reason: impl Into<String>) -> Self {
        Self::NotYetInitialized {
            reason: reason.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a transient infrastructure error.
    pub fn transient(
        target: impl Into<String>,
        operation: StoreOperation,
        reason: impl Into<String>,
    ) -> Self {
        Self::TransientInfra {
            target: target.into(),
            operation,
            reason: reason.into(),
        }
    }

    /// Create a render error for the given kind.
    pub fn render(kind: ResourceKind, reason: impl Into<String>) -> Self {
        Self::Render {
            kind,
            reason: reason.into(),
        }
    }

    /// Create an invalid probe target error.
    pub fn invalid_probe_target(reason: impl Into<String>) -> Self {
        Self::InvalidProbeTarget {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(instance: impl Into<String>) -> Self {
        Self::Cancelled {
            instance: instance.into(),
        }
    }

    /// Classify the error for scheduling.
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::NotYetInitialized { .. } | Self::TransientInfra { .. } => Disposition::RetrySoon,
            Self::NotFound { .. } | Self::Cancelled { .. } => Disposition::Abandon,
            Self::Render { .. } | Self::InvalidProbeTarget { .. } | Self::InvalidConfig { .. } => {
                Disposition::Permanent
            }
        }
    }

    /// Whether a later pass may succeed without any spec change.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.disposition(), Disposition::RetrySoon)
    }

    /// Suggested delay before the next pass, given the normal and retry intervals.
    #[must_use]
    pub const fn requeue_after(&self, normal: Duration, retry: Duration) -> Option<Duration> {
        match self.disposition() {
            Disposition::RetrySoon => Some(retry),
            Disposition::Permanent => Some(normal),
            Disposition::Abandon => None,
        }
    }
}
