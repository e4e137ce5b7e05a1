#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Slumber
//!
//! Keeps game servers converged to their declared state and scales them to
//! zero when nobody is playing.
//!
//! This library holds the binary's command line and seed loading, and
//! re-exports the workspace crates for convenience.

pub use slumber_controller;
pub use slumber_core;
pub use slumber_probe;
pub use slumber_reconciler;
pub use slumber_store;

pub mod cli;
pub mod seed;

pub use seed::Seed;
