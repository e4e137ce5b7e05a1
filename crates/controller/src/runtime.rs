//! Standalone runtime: discovery, configuration and scheduling wired together.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use slumber_core::{Clock, InstanceId, ResultExt};
use slumber_probe::StatusProber;
use slumber_store::{OperatorConfigSource, ResourceStore, StoreEvent};

use crate::admin::Admin;
use crate::config::Settings;
use crate::operator_config::{OperatorConfigTask, config_channel};
use crate::pass::ControlLoop;
use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
use crate::shutdown::{ShutdownCoordinator, ShutdownPhase};

/// Summary returned once the runtime has stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub scheduler: SchedulerStats,
    /// Instances known when the runtime stopped.
    pub instances: usize,
    /// Whether in-flight passes drained before the shutdown timeout.
    pub drained: bool,
    /// Coordinator phase once the runtime returned.
    pub phase: ShutdownPhase,
}

/// Everything the controller needs to run against one store.
pub struct Runtime {
    store: Arc<dyn ResourceStore>,
    source: Arc<dyn OperatorConfigSource>,
    prober: Arc<dyn StatusProber>,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl Runtime {
    /// Create a new runtime.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        source: Arc<dyn OperatorConfigSource>,
        prober: Arc<dyn StatusProber>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            source,
            prober,
            clock,
            settings,
        }
    }

    /// Run until `shutdown` is initiated, then drain.
    pub async fn run(self, shutdown: Arc<ShutdownCoordinator>) -> RuntimeStats {
        let settings = self.settings;
        let (publisher, config_rx) = config_channel();
        let config_task = tokio::spawn(
            OperatorConfigTask::new(
                self.source,
                Arc::clone(&self.store),
                publisher,
                settings.operator_config_interval(),
            )
            .run(shutdown.subscribe()),
        );

        let control = Arc::new(ControlLoop::new(
            Arc::clone(&self.store),
            self.prober,
            self.clock,
            config_rx.clone(),
            settings.clone(),
        ));
        let scheduler = Scheduler::spawn(control, settings.workers, settings.shutdown_timeout());

        let mut events = self.store.subscribe();
        let mut discovery = Discovery {
            admin: Admin::new(Arc::clone(&self.store)),
            scheduler: scheduler.handle(),
            known: HashSet::new(),
        };
        discovery.resync().await;
        info!(instances = discovery.known.len(), "Controller running");

        let period = settings.instance_resync();
        let mut resync = interval_at(Instant::now() + period, period);
        let mut config_changes = config_rx;
        let mut events_open = true;
        let mut config_open = true;
        let stop = shutdown.wait();
        tokio::pin!(stop);

        // Once shutdown starts only the stop branch stays armed.
        loop {
            tokio::select! {
                signal = &mut stop => {
                    info!(%signal, "Stopping controller");
                    break;
                }
                event = events.recv(), if events_open && !shutdown.is_shutdown_initiated() => match event {
                    Ok(event) => discovery.apply(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed store events, resyncing");
                        discovery.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Store event stream closed, relying on resync");
                        events_open = false;
                    }
                },
                _ = resync.tick(), if !shutdown.is_shutdown_initiated() => discovery.resync().await,
                changed = config_changes.changed(), if config_open && !shutdown.is_shutdown_initiated() => {
                    if changed.is_err() {
                        config_open = false;
                    } else if config_changes.borrow_and_update().is_ready() {
                        info!("Operator configuration changed, triggering every instance");
                        discovery.trigger_all();
                    }
                }
            }
        }

        let instances = discovery.known.len();
        let drained = shutdown.drain(scheduler.shutdown()).await;
        config_task.abort();

        RuntimeStats {
            drained: drained.is_some(),
            scheduler: drained.unwrap_or_default(),
            instances,
            phase: shutdown.phase().await,
        }
    }
}

/// Tracks known instances and feeds the scheduler.
struct Discovery {
    admin: Admin,
    scheduler: SchedulerHandle,
    known: HashSet<InstanceId>,
}

impl Discovery {
    /// Re-list instances; trigger new ones and forget removed ones.
    async fn resync(&mut self) {
        let Some(instances) = self
            .admin
            .list_instances()
            .await
            .into_option_logged("Instance resync failed")
        else {
            return;
        };

        let listed: HashSet<InstanceId> = instances.into_iter().map(|i| i.id).collect();
        for id in listed.difference(&self.known) {
            debug!(instance = %id, "Discovered instance");
            self.scheduler.trigger(id.clone());
        }
        for id in self.known.difference(&listed) {
            debug!(instance = %id, "Instance disappeared");
            self.scheduler.forget(id.clone());
        }
        self.known = listed;
    }

    fn apply(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::InstanceCreated(id) | StoreEvent::InstanceSpecChanged(id) => {
                debug!(instance = %id, "Instance changed");
                self.known.insert(id.clone());
                self.scheduler.trigger(id);
            }
            StoreEvent::InstanceDeleted(id) => {
                debug!(instance = %id, "Instance deleted");
                self.known.remove(&id);
                self.scheduler.forget(id);
            }
        }
    }

    fn trigger_all(&self) {
        for id in &self.known {
            self.scheduler.trigger(id.clone());
        }
    }
}
