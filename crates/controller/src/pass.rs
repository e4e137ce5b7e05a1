//! One control-loop pass over a single instance.
//!
//! `FetchSpec → ReconcileStorage → ReconcileConfig → ReconcileCompute →
//! ReconcileNetwork → Probe → UpdateStatus → EvaluateIdle → Scheduled`
//!
//! Only `NotFound` and cancellation end a pass early. A transient store
//! failure skips the remaining reconcile steps, but the probe, the status
//! write and the idle evaluation always run so status stays honest.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use slumber_core::{
    Clock, ConfigState, Disposition, Error, Instance, InstanceId, InstanceStatus, ResourceKind,
    Result, ResultExt, StoreOperation,
};
use slumber_probe::{ProbeReport, StatusProber};
use slumber_reconciler::{DesiredSet, ReconcileOutcome, Renderer, ResourceReconciler};
use slumber_store::ResourceStore;

use crate::admin::persist_enabled;
use crate::config::Settings;
use crate::idle::{self, IdleDecision, IdleState};

/// Steps of a pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassStep {
    FetchSpec,
    ReconcileStorage,
    ReconcileConfig,
    ReconcileCompute,
    ReconcileNetwork,
    Probe,
    UpdateStatus,
    EvaluateIdle,
    Scheduled,
}

impl PassStep {
    /// Dependent kinds converged by a reconcile step.
    #[must_use]
    pub const fn kinds(&self) -> &'static [ResourceKind] {
        match self {
            Self::ReconcileStorage => &[ResourceKind::Volume, ResourceKind::VolumeClaim],
            Self::ReconcileConfig => &[ResourceKind::ConfigBundle],
            Self::ReconcileCompute => &[ResourceKind::Workload],
            Self::ReconcileNetwork => &[ResourceKind::NetworkEndpoint],
            _ => &[],
        }
    }
}

impl fmt::Display for PassStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const RECONCILE_STEPS: [PassStep; 4] = [
    PassStep::ReconcileStorage,
    PassStep::ReconcileConfig,
    PassStep::ReconcileCompute,
    PassStep::ReconcileNetwork,
];

/// Shared flag telling an in-flight pass to stop at the next step boundary.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What one pass observed and did.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub instance: InstanceId,
    /// Outcome of every dependent reconciled this pass.
    pub outcomes: Vec<ReconcileOutcome>,
    /// Retryable failure that shortened the next interval.
    pub error: Option<Error>,
    pub render_errors: BTreeMap<ResourceKind, String>,
    pub probe: ProbeReport,
    pub status_written: bool,
    pub idle: IdleState,
    /// Whether this pass disabled the instance for idleness.
    pub disabled: bool,
    /// Delay before the next pass.
    pub requeue_after: Duration,
}

impl PassReport {
    /// Dependent writes issued by the reconcile steps.
    #[must_use]
    pub fn dependent_writes(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| usize::from(o.action.wrote()) + o.duplicates_removed)
            .sum()
    }
}

/// Runs one pass for an instance; the seam the scheduler drives.
#[async_trait]
pub trait PassRunner: Send + Sync {
    /// Run a pass. `None` means the instance should not be scheduled again.
    async fn run(&self, id: &InstanceId, cancel: &Cancellation) -> Option<Duration>;

    /// Delay before retrying an instance whose pass panicked.
    fn retry_interval(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// The per-instance control loop.
pub struct ControlLoop {
    store: Arc<dyn ResourceStore>,
    reconciler: ResourceReconciler,
    prober: Arc<dyn StatusProber>,
    clock: Arc<dyn Clock>,
    config: watch::Receiver<ConfigState>,
    settings: Settings,
}

impl ControlLoop {
    /// Create a new control loop.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        prober: Arc<dyn StatusProber>,
        clock: Arc<dyn Clock>,
        config: watch::Receiver<ConfigState>,
        settings: Settings,
    ) -> Self {
        Self {
            reconciler: ResourceReconciler::new(Arc::clone(&store)),
            store,
            prober,
            clock,
            config,
            settings,
        }
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// `NotFound` when the instance is gone, `Cancelled` when the pass was
    /// abandoned at a step boundary, `TransientInfra` when the instance
    /// itself could not be read. Everything else is recorded in the report.
    pub async fn run_pass(&self, id: &InstanceId, cancel: &Cancellation) -> Result<PassReport> {
        checkpoint(PassStep::FetchSpec, id, cancel)?;
        let instance = self
            .store
            .get_instance(id)
            .await
            .map_err(|e| e.classify(format!("instance {id}"), StoreOperation::Get))?;
        debug!(instance = %id, version = instance.resource_version, "Fetched instance");

        let mut outcomes = Vec::new();
        let config = self.config.borrow().clone();
        let (render_errors, mut error) = match config.require() {
            Ok(config) => {
                let desired = Renderer::new(config).render(&instance);
                let render_errors = desired.render_errors();
                for (kind, message) in &render_errors {
                    warn!(instance = %id, %kind, error = %message, "Cannot render dependent");
                }
                let failure = self
                    .reconcile_dependents(&instance, &desired, cancel, &mut outcomes)
                    .await?;
                (render_errors, failure)
            }
            Err(e) => {
                debug!(instance = %id, error = %e, "Skipping dependents until configured");
                (instance.status.render_errors.clone(), Some(e))
            }
        };

        checkpoint(PassStep::Probe, id, cancel)?;
        let probe = self.probe(id).await;

        checkpoint(PassStep::UpdateStatus, id, cancel)?;
        let now = self.clock.now();
        let decision = idle::evaluate(
            &instance.spec,
            instance.status.idle_since,
            probe.has_players(),
            now,
        );
        let status = compose_status(&instance.status, &probe, &decision, render_errors.clone(), now);
        let status_written = match self.write_status(&instance, status).await {
            Ok(written) => written,
            Err(e) if e.disposition() == Disposition::Abandon => return Err(e),
            Err(e) => {
                warn!(instance = %id, error = %e, "Status write failed");
                error = error.or(Some(e));
                false
            }
        };

        checkpoint(PassStep::EvaluateIdle, id, cancel)?;
        let disabled = self.evaluate_idle(&instance, &decision, now).await?;

        let requeue_after = match &error {
            Some(e) if e.is_retryable() => self.settings.retry_interval(),
            _ => self.settings.resync_interval(),
        };
        debug!(
            instance = %id,
            step = %PassStep::Scheduled,
            requeue_secs = requeue_after.as_secs(),
            "Pass complete"
        );

        Ok(PassReport {
            instance: id.clone(),
            outcomes,
            error,
            render_errors,
            probe,
            status_written,
            idle: decision.state,
            disabled,
            requeue_after,
        })
    }

    /// Converge every rendered dependent in step order.
    ///
    /// Returns the transient failure that stopped the remaining steps.
    async fn reconcile_dependents(
        &self,
        instance: &Instance,
        desired: &DesiredSet,
        cancel: &Cancellation,
        outcomes: &mut Vec<ReconcileOutcome>,
    ) -> Result<Option<Error>> {
        let id = &instance.id;
        for step in RECONCILE_STEPS {
            checkpoint(step, id, cancel)?;
            for kind in step.kinds() {
                let Some(Ok(resource)) = desired.get(*kind) else {
                    continue;
                };
                match self.reconciler.reconcile(id, resource.clone()).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) if e.disposition() == Disposition::Abandon => return Err(e),
                    Err(e) => {
                        warn!(
                            instance = %id,
                            %step,
                            %kind,
                            error = %e,
                            "Reconcile failed, skipping remaining dependents"
                        );
                        return Ok(Some(e));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn probe(&self, id: &InstanceId) -> ProbeReport {
        let host = self.settings.probe_host(id);
        self.prober
            .probe(&host, self.settings.service_port, self.settings.probe_timeout())
            .await
            .inspect_error(|e| warn!(instance = %id, %host, error = %e, "Probe misconfigured"))
            .unwrap_or_else(|e| ProbeReport::unreachable(e.to_string()))
    }

    /// Write `status` unless it is already stored. Returns whether it wrote.
    async fn write_status(&self, instance: &Instance, status: InstanceStatus) -> Result<bool> {
        if status == instance.status {
            return Ok(false);
        }
        self.store
            .update_instance_status(&instance.id, status)
            .await
            .map_err(|e| {
                e.classify(format!("instance {}", instance.id), StoreOperation::UpdateStatus)
            })?;
        debug!(instance = %instance.id, "Status updated");
        Ok(true)
    }

    /// Disable the instance when the idle threshold was exceeded.
    async fn evaluate_idle(
        &self,
        instance: &Instance,
        decision: &IdleDecision,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if decision.state != IdleState::Triggering {
            return Ok(false);
        }

        let idle_secs = decision.idle_for(now).map_or(0, |d| d.num_seconds());
        match persist_enabled(self.store.as_ref(), instance, false).await {
            Ok(_) => {
                info!(
                    instance = %instance.id,
                    idle_secs,
                    threshold_secs = instance.spec.idle_timeout_seconds,
                    "Disabled idle instance"
                );
                Ok(true)
            }
            Err(e) if e.disposition() == Disposition::Abandon => Err(e),
            Err(e) => {
                warn!(instance = %instance.id, error = %e, "Failed to disable idle instance");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl PassRunner for ControlLoop {
    async fn run(&self, id: &InstanceId, cancel: &Cancellation) -> Option<Duration> {
        match self.run_pass(id, cancel).await {
            Ok(report) => Some(report.requeue_after),
            Err(e) => {
                match e.disposition() {
                    Disposition::Abandon => debug!(instance = %id, error = %e, "Pass abandoned"),
                    _ => warn!(instance = %id, error = %e, "Pass failed"),
                }
                e.requeue_after(self.settings.resync_interval(), self.settings.retry_interval())
            }
        }
    }

    fn retry_interval(&self) -> Duration {
        self.settings.retry_interval()
    }
}

fn checkpoint(step: PassStep, id: &InstanceId, cancel: &Cancellation) -> Result<()> {
    if cancel.is_cancelled() {
        debug!(instance = %id, %step, "Pass cancelled");
        return Err(Error::cancelled(id.to_string()));
    }
    Ok(())
}

/// Status after this pass.
///
/// Liveness facts come from the probe. Descriptive fields keep their last
/// known value while the service is unreachable.
fn compose_status(
    previous: &InstanceStatus,
    probe: &ProbeReport,
    decision: &IdleDecision,
    render_errors: BTreeMap<ResourceKind, String>,
    now: DateTime<Utc>,
) -> InstanceStatus {
    if !probe.reachable {
        return InstanceStatus {
            running: false,
            players: Vec::new(),
            latency_ms: None,
            idle_since: decision.idle_since,
            render_errors,
            ..previous.clone()
        };
    }

    InstanceStatus {
        running: true,
        last_probe: Some(now),
        idle_since: decision.idle_since,
        players: probe.players.clone(),
        thumbnail: probe.thumbnail().or_else(|| previous.thumbnail.clone()),
        server_version: probe.version.clone(),
        motd: probe.motd.clone(),
        latency_ms: probe.latency_ms,
        render_errors,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn decision(idle_since: Option<DateTime<Utc>>) -> IdleDecision {
        IdleDecision {
            state: IdleState::Counting,
            idle_since,
        }
    }

    #[test]
    fn test_unreachable_keeps_descriptive_fields() {
        let probed_at = DateTime::<Utc>::UNIX_EPOCH;
        let previous = InstanceStatus {
            running: true,
            last_probe: Some(probed_at),
            players: vec!["alex".to_string()],
            server_version: Some("1.20.4".to_string()),
            thumbnail: Some("iVBORw0KGgo=".to_string()),
            latency_ms: Some(4),
            ..InstanceStatus::default()
        };
        let now = probed_at + TimeDelta::seconds(30);

        let status = compose_status(
            &previous,
            &ProbeReport::unreachable("connection refused"),
            &decision(Some(now)),
            BTreeMap::new(),
            now,
        );

        assert!(!status.running);
        assert!(status.players.is_empty());
        assert_eq!(status.latency_ms, None);
        assert_eq!(status.last_probe, Some(probed_at));
        assert_eq!(status.server_version.as_deref(), Some("1.20.4"));
        assert_eq!(status.idle_since, Some(now));
    }

    #[test]
    fn test_reachable_keeps_thumbnail_without_favicon() {
        let previous = InstanceStatus {
            thumbnail: Some("iVBORw0KGgo=".to_string()),
            ..InstanceStatus::default()
        };
        let probe = ProbeReport {
            reachable: true,
            players: vec!["alex".to_string()],
            online: 1,
            ..ProbeReport::default()
        };
        let now = DateTime::<Utc>::UNIX_EPOCH;

        let status = compose_status(&previous, &probe, &decision(None), BTreeMap::new(), now);

        assert!(status.running);
        assert_eq!(status.last_probe, Some(now));
        assert_eq!(status.players, vec!["alex"]);
        assert_eq!(status.thumbnail, previous.thumbnail);
    }

    #[test]
    fn test_cancellation_stops_at_checkpoint() {
        let id = InstanceId::new("games", "lobby");
        let cancel = Cancellation::new();
        assert!(checkpoint(PassStep::Probe, &id, &cancel).is_ok());

        cancel.clone().cancel();
        assert!(matches!(
            checkpoint(PassStep::Probe, &id, &cancel),
            Err(Error::Cancelled { .. })
        ));
    }

    #[test]
    fn test_reconcile_steps_cover_every_kind_in_order() {
        let kinds: Vec<ResourceKind> = RECONCILE_STEPS
            .iter()
            .flat_map(|step| step.kinds().iter().copied())
            .collect();
        assert_eq!(kinds, ResourceKind::ALL.to_vec());
    }
}
