//! Operator configuration initialization routine.
//!
//! Runs on its own schedule, separately from instance passes. It is the only
//! writer of the shared [`ConfigState`]; passes only read it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use slumber_core::{
    ConfigState, Error, OperatorConfig, OperatorConfigDocument, ResourceKind, Result,
    StoreOperation,
};
use slumber_store::{OperatorConfigSource, ResourceStore};

use crate::shutdown::ShutdownSignal;

/// Create the channel the configuration is published through.
#[must_use]
pub fn config_channel() -> (watch::Sender<ConfigState>, watch::Receiver<ConfigState>) {
    watch::channel(ConfigState::Uninitialized)
}

/// Fetches, verifies and publishes the operator configuration.
pub struct OperatorConfigTask {
    source: Arc<dyn OperatorConfigSource>,
    store: Arc<dyn ResourceStore>,
    publisher: watch::Sender<ConfigState>,
    interval: Duration,
}

impl OperatorConfigTask {
    /// Create a new task publishing into `publisher`.
    #[must_use]
    pub fn new(
        source: Arc<dyn OperatorConfigSource>,
        store: Arc<dyn ResourceStore>,
        publisher: watch::Sender<ConfigState>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            publisher,
            interval,
        }
    }

    /// Resolve the configuration once.
    ///
    /// # Errors
    ///
    /// `NotYetInitialized` when the document or a shared claim is missing,
    /// `TransientInfra` when the store cannot be read.
    pub async fn resolve(&self) -> Result<OperatorConfig> {
        let document = self
            .source
            .fetch_document()
            .await
            .map_err(|e| e.classify("operator configuration", StoreOperation::Get))?
            .ok_or_else(|| {
                Error::not_yet_initialized("operator configuration document not declared")
            })?;

        for claim in [&document.server_jars_claim, &document.mod_jars_claim] {
            self.require_claim(&document, claim).await?;
        }

        Ok(OperatorConfig::from_document(&document))
    }

    async fn require_claim(&self, document: &OperatorConfigDocument, claim: &str) -> Result<()> {
        let target = format!("{} {}/{claim}", ResourceKind::VolumeClaim, document.namespace);
        let found = self
            .store
            .find_resource(&document.namespace, ResourceKind::VolumeClaim, claim)
            .await
            .map_err(|e| e.classify(&target, StoreOperation::Get))?;

        found
            .map(|_| ())
            .ok_or_else(|| Error::not_yet_initialized(format!("shared claim {target} not found")))
    }

    /// Resolve and publish once. Returns whether the published state changed.
    ///
    /// On failure the last published state is kept.
    ///
    /// # Errors
    ///
    /// See [`OperatorConfigTask::resolve`].
    pub async fn refresh(&self) -> Result<bool> {
        let config = Arc::new(self.resolve().await?);
        let changed = self.publisher.send_if_modified(|state| match state {
            ConfigState::Ready(current) if *current == config => false,
            _ => {
                *state = ConfigState::Ready(Arc::clone(&config));
                true
            }
        });

        if changed {
            info!(
                server_jars = %config.server_jars_claim,
                mod_jars = %config.mod_jars_claim,
                init_image = %config.init_image,
                "Published operator configuration"
            );
        }
        Ok(changed)
    }

    /// Refresh every interval until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        loop {
            match self.refresh().await {
                Ok(changed) => debug!(changed, "Operator configuration refreshed"),
                Err(e) => warn!(
                    error = %e,
                    retry_secs = self.interval.as_secs(),
                    "Operator configuration not available"
                ),
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    debug!("Operator configuration task stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use slumber_core::{
        AccessMode, ClaimSpec, DependentResource, ObjectMeta, ReclaimPolicy, ResourceBody,
        VolumeTemplate,
    };
    use slumber_store::{Fault, InMemoryResourceStore};

    use super::*;

    fn document() -> OperatorConfigDocument {
        OperatorConfigDocument {
            namespace: "games".to_string(),
            server_jars_claim: "server-jars".to_string(),
            mod_jars_claim: "mod-jars".to_string(),
            servers_volume: VolumeTemplate {
                storage_class: "manual".to_string(),
                capacity: "1Gi".to_string(),
                base_path: "/srv/worlds".to_string(),
                access_mode: AccessMode::ReadWriteOnce,
                reclaim_policy: ReclaimPolicy::Retain,
            },
            init_image: None,
        }
    }

    fn claim(name: &str) -> DependentResource {
        DependentResource::new(
            ObjectMeta::shared("games", name),
            ResourceBody::VolumeClaim(ClaimSpec {
                volume_name: name.to_string(),
                storage_class: "manual".to_string(),
                capacity: "5Gi".to_string(),
                access_mode: AccessMode::ReadOnlyMany,
            }),
        )
    }

    fn task(
        store: &Arc<InMemoryResourceStore>,
    ) -> (OperatorConfigTask, watch::Receiver<ConfigState>) {
        let (tx, rx) = config_channel();
        let task = OperatorConfigTask::new(store.clone(), store.clone(), tx, Duration::from_secs(30));
        (task, rx)
    }

    #[tokio::test]
    async fn test_missing_document_stays_uninitialized() {
        let store = InMemoryResourceStore::new_arc();
        let (task, rx) = task(&store);

        let result = task.refresh().await;
        assert!(matches!(result, Err(Error::NotYetInitialized { .. })));
        assert!(!rx.borrow().is_ready());
    }

    #[tokio::test]
    async fn test_missing_claim_stays_uninitialized() {
        let store = InMemoryResourceStore::new_arc();
        store.set_operator_config(document()).await;
        store.seed_resource(claim("server-jars")).await;
        let (task, rx) = task(&store);

        let result = task.refresh().await;
        assert!(result.is_err_and(|e| e.to_string().contains("mod-jars")));
        assert!(!rx.borrow().is_ready());
    }

    #[tokio::test]
    async fn test_publishes_once_claims_exist() -> Result<()> {
        let store = InMemoryResourceStore::new_arc();
        store.set_operator_config(document()).await;
        store.seed_resource(claim("server-jars")).await;
        store.seed_resource(claim("mod-jars")).await;
        let (task, rx) = task(&store);

        assert!(task.refresh().await?);
        assert!(!task.refresh().await?);

        let config = rx.borrow().require()?;
        assert_eq!(config.init_image, "busybox");
        assert_eq!(config.mod_jars_claim, "mod-jars");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_state() -> Result<()> {
        let store = InMemoryResourceStore::new_arc();
        store.set_operator_config(document()).await;
        store.seed_resource(claim("server-jars")).await;
        store.seed_resource(claim("mod-jars")).await;
        let (task, rx) = task(&store);
        task.refresh().await?;

        store.inject(Fault::on(StoreOperation::Get)).await;
        assert!(task.refresh().await.is_err_and(|e| e.is_retryable()));
        assert!(rx.borrow().is_ready());
        Ok(())
    }
}
