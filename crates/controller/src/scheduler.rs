//! Per-instance serialized scheduling on a bounded worker pool.
//!
//! A single dispatcher task owns one slot per instance. Triggers arriving
//! while a pass is in flight collapse into one pending rerun, so passes for
//! the same instance never overlap. Passes for different instances run
//! concurrently, bounded by a semaphore.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use slumber_core::InstanceId;

use crate::pass::{Cancellation, PassRunner};

#[derive(Debug)]
enum Command {
    Trigger(InstanceId),
    Completed {
        id: InstanceId,
        next: Option<Duration>,
        panicked: bool,
    },
    Forget(InstanceId),
    Shutdown,
}

/// Counters reported when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Passes that ran to completion.
    pub passes: u64,
    /// Triggers that arrived during a pass and were folded into its rerun.
    pub coalesced: u64,
    /// Instances dropped because a pass asked not to be rescheduled.
    pub abandoned: u64,
    /// Passes still running when the drain timeout elapsed.
    pub aborted: u64,
    /// Passes that panicked; their instance is retried.
    pub panicked: u64,
}

/// Cloneable handle for feeding the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Request a pass for `id` as soon as possible.
    pub fn trigger(&self, id: InstanceId) {
        self.send(Command::Trigger(id));
    }

    /// Stop scheduling `id` and cancel its in-flight pass at the next step boundary.
    pub fn forget(&self, id: InstanceId) {
        self.send(Command::Forget(id));
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Scheduler stopped, dropping command");
        }
    }
}

/// The running scheduler.
pub struct Scheduler {
    handle: SchedulerHandle,
    task: JoinHandle<SchedulerStats>,
}

impl Scheduler {
    /// Start the dispatcher.
    ///
    /// `drain_timeout` bounds how long shutdown waits for in-flight passes.
    #[must_use]
    pub fn spawn(runner: Arc<dyn PassRunner>, workers: usize, drain_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            runner,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tx: tx.clone(),
            slots: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            stats: SchedulerStats::default(),
        };
        info!(workers, "Scheduler started");
        Self {
            handle: SchedulerHandle { tx },
            task: tokio::spawn(dispatcher.run(rx, drain_timeout)),
        }
    }

    /// A handle for triggering and forgetting instances.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop accepting triggers, cancel timers and wait for in-flight passes.
    pub async fn shutdown(self) -> SchedulerStats {
        self.handle.send(Command::Shutdown);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Scheduler task failed");
                SchedulerStats::default()
            }
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    running: bool,
    rerun: bool,
    cancel: Cancellation,
    timer: Option<JoinHandle<()>>,
}

impl Slot {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Dispatcher {
    runner: Arc<dyn PassRunner>,
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Command>,
    slots: HashMap<InstanceId, Slot>,
    in_flight: FuturesUnordered<JoinHandle<()>>,
    stats: SchedulerStats,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        drain_timeout: Duration,
    ) -> SchedulerStats {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(joined) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Pass task failed");
                    }
                }
            }
        }

        self.drain(drain_timeout).await;
        self.stats
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Trigger(id) => self.trigger(id),
            Command::Completed { id, next, panicked } => {
                if panicked {
                    self.stats.panicked += 1;
                }
                self.completed(id, next);
            }
            Command::Forget(id) => self.forget(&id),
            Command::Shutdown => {}
        }
    }

    fn trigger(&mut self, id: InstanceId) {
        let slot = self.slots.entry(id.clone()).or_default();
        if slot.running {
            slot.rerun = true;
            self.stats.coalesced += 1;
            trace!(instance = %id, "Pass in flight, rerun pending");
            return;
        }
        self.start(id);
    }

    fn completed(&mut self, id: InstanceId, next: Option<Duration>) {
        self.stats.passes += 1;
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.running = false;

        if slot.rerun {
            slot.rerun = false;
            self.start(id);
            return;
        }

        match next {
            Some(delay) if !slot.cancel.is_cancelled() => {
                let tx = self.tx.clone();
                let target = id.clone();
                slot.disarm();
                slot.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Command::Trigger(target));
                }));
                trace!(instance = %id, delay_ms = delay.as_millis(), "Next pass armed");
            }
            _ => {
                debug!(instance = %id, "Instance no longer scheduled");
                self.stats.abandoned += 1;
                self.slots.remove(&id);
            }
        }
    }

    fn forget(&mut self, id: &InstanceId) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        slot.disarm();
        slot.rerun = false;
        if slot.running {
            slot.cancel.cancel();
        } else {
            self.slots.remove(id);
        }
        debug!(instance = %id, "Instance forgotten");
    }

    fn start(&mut self, id: InstanceId) {
        let slot = self.slots.entry(id.clone()).or_default();
        slot.disarm();
        if slot.cancel.is_cancelled() {
            slot.cancel = Cancellation::new();
        }
        slot.running = true;

        let cancel = slot.cancel.clone();
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);
        let tx = self.tx.clone();

        self.in_flight.push(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let outcome = AssertUnwindSafe(runner.run(&id, &cancel))
                .catch_unwind()
                .await;
            let (next, panicked) = match outcome {
                Ok(next) => (next, false),
                Err(_) => {
                    let retry = runner.retry_interval();
                    error!(instance = %id, retry_ms = retry.as_millis(), "Pass panicked, retrying");
                    (Some(retry), true)
                }
            };
            let _ = tx.send(Command::Completed { id, next, panicked });
        }));
    }

    async fn drain(&mut self, drain_timeout: Duration) {
        for slot in self.slots.values_mut() {
            slot.disarm();
        }

        let pending = self.in_flight.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight passes");
        }

        let in_flight = &mut self.in_flight;
        let finished = tokio::time::timeout(drain_timeout, async {
            while in_flight.next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            for task in self.in_flight.iter() {
                task.abort();
            }
            self.stats.aborted = u64::try_from(self.in_flight.len()).unwrap_or(u64::MAX);
            warn!(aborted = self.stats.aborted, "Drain timeout exceeded, aborting passes");
        }
        info!(passes = self.stats.passes, "Scheduler stopped");
    }
}
