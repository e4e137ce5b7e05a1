//! # slumber-store
//!
//! The resource store boundary: the [`ResourceStore`] trait the control loop
//! converges against, an [`InMemoryResourceStore`] used in standalone mode and
//! tests, and a [`TracingResourceStore`] decorator.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{Fault, InMemoryResourceStore, WriteStats};
pub use store::{OperatorConfigSource, ResourceStore, StoreEvent, TracingResourceStore};
