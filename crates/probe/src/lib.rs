//! # slumber-probe
//!
//! Liveness probing over the game server's status-query protocol.
//!
//! A probe connects, sends a handshake announcing a status query, reads the
//! JSON status document and measures latency with a ping, all under one
//! deadline. Anything that goes wrong on the wire yields an unreachable
//! [`ProbeReport`]; only unusable targets are errors.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use slumber_probe::{SlpProber, StatusProber};
//!
//! let report = SlpProber::new()
//!     .probe("lobby.games.svc.cluster.local", 25565, Duration::from_secs(3))
//!     .await?;
//! if report.has_players() {
//!     println!("{} online", report.online);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod codec;
pub mod error;
pub mod prober;
pub mod scripted;
pub mod types;

pub use error::{ProbeError, ProbeResult};
pub use prober::{DEFAULT_PROTOCOL_VERSION, SlpProber, StatusProber, validate_target};
pub use scripted::ScriptedProber;
pub use types::{ProbeReport, StatusResponse};
