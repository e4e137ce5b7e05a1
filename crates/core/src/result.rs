//! Result type definition and extension traits for Railway-Oriented Programming.
//!
//! Provides combinators that keep the control loop free of unwrap/expect/panic
//! while still leaving a trace of every swallowed failure.

use crate::error::Error;

/// The standard Result type for slumber operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logged, non-fatal handling of Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error at `warn` if present.
    fn into_option_logged(self, context: &str) -> Option<T>;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;

    /// Treat `NotFound` as success with `None`, keeping every other error.
    fn ignore_not_found(self) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }

    fn ignore_not_found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Extension trait for Option types providing Railway-style operations.
pub trait OptionExt<T> {
    /// Convert `None` into a `NotFound` error describing what was missing.
    fn ok_or_not_found<F: FnOnce() -> String>(self, what: F) -> Result<T>;

    /// Tap into None without consuming the Option.
    fn tap_none<F: FnOnce()>(self, f: F) -> Self;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found<F: FnOnce() -> String>(self, what: F) -> Result<T> {
        self.ok_or_else(|| Error::not_found(what()))
    }

    fn tap_none<F: FnOnce()>(self, f: F) -> Self {
        if self.is_none() {
            f();
        }
        self
    }
}
