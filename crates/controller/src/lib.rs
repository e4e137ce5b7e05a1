//! # slumber-controller
//!
//! Drives every instance towards its declared state and scales idle ones to
//! zero.
//!
//! - [`ControlLoop`]: one serialized pass per instance (reconcile, probe,
//!   status, idle evaluation)
//! - [`idle`]: the idle-timeout state machine
//! - [`Scheduler`]: per-instance coalescing on a bounded worker pool
//! - [`OperatorConfigTask`]: the sole writer of the shared operator configuration
//! - [`Admin`]: list instances and toggle them through the persisted spec
//! - [`Runtime`]: discovery and change notifications wired to the scheduler
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use slumber_controller::{Runtime, Settings, ShutdownCoordinator, install_signal_handlers};
//!
//! let shutdown = Arc::new(ShutdownCoordinator::new());
//! install_signal_handlers(Arc::clone(&shutdown));
//! let stats = Runtime::new(store, source, prober, clock, Settings::default())
//!     .run(shutdown)
//!     .await;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod admin;
pub mod config;
pub mod idle;
pub mod operator_config;
pub mod pass;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;

pub use admin::{Admin, persist_enabled};
pub use config::Settings;
pub use idle::{IdleDecision, IdleState};
pub use operator_config::{OperatorConfigTask, config_channel};
pub use pass::{Cancellation, ControlLoop, PassReport, PassRunner, PassStep};
pub use runtime::{Runtime, RuntimeStats};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
pub use shutdown::{
    SHUTDOWN_TIMEOUT, ShutdownCoordinator, ShutdownPhase, ShutdownSignal, install_signal_handlers,
};
