//! Probe transport errors.
//!
//! Every variant is a fact about one exchange. The prober folds all of them
//! into an unreachable report; none escapes to the control loop.

use std::io::ErrorKind as IoErrorKind;

use thiserror::Error;

/// Result type alias for protocol operations.
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Status-query transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Connecting, reading or writing failed.
    #[error("i/o error ({kind:?}): {message}")]
    Io { kind: IoErrorKind, message: String },

    /// The stream ended in the middle of a packet.
    #[error("connection closed while reading {context}")]
    UnexpectedEof { context: &'static str },

    /// A length or payload exceeded the protocol limits.
    #[error("{actual} bytes exceeds the {max}-byte limit")]
    TooLarge { actual: usize, max: usize },

    /// A varint ran past five bytes.
    #[error("varint longer than 5 bytes")]
    VarIntTooLong,

    /// The server answered with a packet we did not ask for.
    #[error("expected packet {expected:#04x}, got {actual:#04x}")]
    UnexpectedPacket { expected: i32, actual: i32 },

    /// The packet decoded but its contents are invalid.
    #[error("malformed response: {reason}")]
    Malformed { reason: String },

    /// The overall deadline elapsed.
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl ProbeError {
    /// Create an Io error from `std::io::Error`.
    pub fn io(err: &std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Map a read failure, keeping EOF distinct.
    pub fn read(err: &std::io::Error, context: &'static str) -> Self {
        if err.kind() == IoErrorKind::UnexpectedEof {
            Self::UnexpectedEof { context }
        } else {
            Self::io(err)
        }
    }

    /// Create a Malformed error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Create a TooLarge error.
    pub const fn too_large(actual: usize, max: usize) -> Self {
        Self::TooLarge { actual, max }
    }
}
