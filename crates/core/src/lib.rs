//! # slumber-core
//!
//! Object model, error taxonomy and shared utilities for slumber.
//!
//! - [`Instance`]: desired [`InstanceSpec`] plus observed [`InstanceStatus`]
//! - [`DependentResource`]: storage, configuration, compute and network objects owned by an instance
//! - [`OperatorConfig`]: process-wide configuration behind an explicit [`ConfigState`]
//! - [`Error`]: the failure taxonomy every control-loop step reports in

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod error;
pub mod instance;
pub mod operator;
pub mod resource;
pub mod result;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Disposition, Error, StoreOperation};
pub use instance::{Flavor, Instance, InstanceId, InstanceSpec, InstanceStatus, Mod};
pub use operator::{
    ConfigState, DEFAULT_INIT_IMAGE, OperatorConfig, OperatorConfigDocument, VolumeTemplate,
};
pub use resource::{
    APP_LABEL, AccessMode, CONFIG_HASH_ANNOTATION, ClaimSpec, ConfigBundleSpec, DependentResource,
    EndpointSpec, Mount, MountSource, ObjectMeta, OwnerRef, ReclaimPolicy, ResourceBody,
    ResourceKind, SERVICE_PORT, VolumeSpec, WorkloadSpec,
};
pub use result::{OptionExt, Result, ResultExt};
