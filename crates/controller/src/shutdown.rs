//! Graceful shutdown handling for the controller.
//!
//! Handles SIGTERM/SIGINT and lets the runtime drain in-flight passes within
//! a bounded window before exiting.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Default time allowed for the drain phase.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic shutdown requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Shutdown coordinator state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation, no shutdown initiated
    #[default]
    Running,
    /// Shutdown signal received, no new passes are started
    Initiating,
    /// Waiting for in-flight passes
    Draining,
    /// Cleanup complete
    Complete,
}

/// Shutdown coordinator for graceful controller shutdown
pub struct ShutdownCoordinator {
    phase: RwLock<ShutdownPhase>,
    shutdown_initiated: AtomicBool,
    signal: RwLock<Option<ShutdownSignal>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(SHUTDOWN_TIMEOUT)
    }

    /// Create a coordinator with a custom drain timeout
    #[must_use]
    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            phase: RwLock::new(ShutdownPhase::Running),
            shutdown_initiated: AtomicBool::new(false),
            signal: RwLock::new(None),
            shutdown_tx,
            drain_timeout,
        }
    }

    /// Get the current shutdown phase
    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate graceful shutdown. Returns `false` if already initiated.
    pub async fn initiate_shutdown(&self, signal: ShutdownSignal) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Shutdown already in progress, ignoring duplicate signal");
            return false;
        }

        info!(signal = %signal, "Initiating graceful shutdown");

        *self.signal.write().await = Some(signal);
        *self.phase.write().await = ShutdownPhase::Initiating;

        let subscriber_count = self.shutdown_tx.receiver_count();
        info!(
            subscribers = subscriber_count,
            "Broadcasting shutdown signal to subscribers"
        );

        if let Err(e) = self.shutdown_tx.send(signal) {
            debug!("No active subscribers for shutdown signal: {}", e);
        }

        true
    }

    /// Resolve once shutdown has been initiated, including before the call.
    pub async fn wait(&self) -> ShutdownSignal {
        let mut rx = self.shutdown_tx.subscribe();
        if let Some(signal) = *self.signal.read().await {
            return signal;
        }
        rx.recv().await.unwrap_or(ShutdownSignal::Programmatic)
    }

    /// Run the drain phase under the drain timeout.
    ///
    /// Returns `None` when `work` did not finish in time.
    pub async fn drain<F, T>(&self, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let start = std::time::Instant::now();
        *self.phase.write().await = ShutdownPhase::Draining;
        info!("Draining in-flight passes");

        let result = timeout(self.drain_timeout, work).await.ok();
        if result.is_none() {
            error!(
                timeout_secs = self.drain_timeout.as_secs(),
                "Shutdown timeout exceeded, abandoning remaining work"
            );
        }

        *self.phase.write().await = ShutdownPhase::Complete;
        info!(
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Graceful shutdown complete"
        );
        result
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT)
pub fn install_signal_handlers(
    coordinator: Arc<ShutdownCoordinator>,
) -> tokio::task::JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigterm).await;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigint).await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }

            info!("Received Ctrl+C");
            coordinator.initiate_shutdown(ShutdownSignal::Sigint).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.phase().await, ShutdownPhase::Running);
        assert!(!coordinator.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_duplicate_shutdown_ignored() {
        let coordinator = ShutdownCoordinator::new();

        assert!(coordinator.initiate_shutdown(ShutdownSignal::Programmatic).await);
        assert!(!coordinator.initiate_shutdown(ShutdownSignal::Sigterm).await);
        assert_eq!(coordinator.phase().await, ShutdownPhase::Initiating);
    }

    #[tokio::test]
    async fn test_wait_after_initiation_returns_signal() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate_shutdown(ShutdownSignal::Sigterm).await;
        assert_eq!(coordinator.wait().await, ShutdownSignal::Sigterm);
    }

    #[tokio::test]
    async fn test_subscribe_to_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let mut receiver = coordinator.subscribe();

        coordinator.initiate_shutdown(ShutdownSignal::Programmatic).await;

        let signal = receiver.recv().await;
        assert_eq!(signal.ok(), Some(ShutdownSignal::Programmatic));
    }

    #[tokio::test]
    async fn test_drain_completes() {
        let coordinator = ShutdownCoordinator::new();
        let drained = coordinator.drain(async { 3 }).await;
        assert_eq!(drained, Some(3));
        assert_eq!(coordinator.phase().await, ShutdownPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out() {
        let coordinator = ShutdownCoordinator::with_timeout(Duration::from_secs(1));
        let drained = coordinator
            .drain(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(drained.is_none());
        assert_eq!(coordinator.phase().await, ShutdownPhase::Complete);
    }

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(format!("{}", ShutdownSignal::Sigterm), "SIGTERM");
        assert_eq!(format!("{}", ShutdownSignal::Sigint), "SIGINT");
        assert_eq!(format!("{}", ShutdownSignal::Programmatic), "PROGRAMMATIC");
    }
}
