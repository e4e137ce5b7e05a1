//! Level-triggered reconciliation of an instance's dependent resources.
//!
//! Every pass re-derives the full desired state and re-asserts it against
//! whatever exists in the store:
//!
//! - **Hash**: a stable fingerprint of the workload-relevant spec subset
//! - **Render**: spec plus operator configuration into one dependent per kind
//! - **Policy**: which fields of each kind the engine owns
//! - **Reconcile**: list, create, prune duplicates, update on drift
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use slumber_reconciler::{Renderer, ResourceReconciler};
//!
//! let renderer = Renderer::new(config);
//! let reconciler = ResourceReconciler::new(store);
//!
//! for (kind, rendered) in renderer.render(&instance).iter() {
//!     if let Ok(desired) = rendered {
//!         reconciler.reconcile(&instance.id, desired.clone()).await?;
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod hash;
pub mod policy;
pub mod reconciler;
pub mod render;
pub mod types;

pub use error::Error;
pub use hash::content_hash;
pub use policy::{
    ClaimPolicy, ConfigBundlePolicy, EndpointPolicy, KindPolicy, UpdatePolicy, VolumePolicy,
    WorkloadPolicy, policy_for,
};
pub use reconciler::ResourceReconciler;
pub use render::Renderer;
pub use types::{DesiredSet, ReconcileAction, ReconcileOutcome};
