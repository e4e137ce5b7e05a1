//! Error types for the reconciler crate.

use thiserror::Error;

use slumber_core::ResourceKind;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// The spec could not be encoded into canonical bytes for hashing.
    #[error("cannot encode spec for hashing: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

impl From<Error> for slumber_core::Error {
    fn from(err: Error) -> Self {
        // Only the workload carries the hash.
        Self::render(ResourceKind::Workload, err.to_string())
    }
}
