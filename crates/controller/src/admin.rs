//! Administrative surface: list instances and toggle them on or off.

use std::sync::Arc;

use tracing::info;

use slumber_core::{Instance, InstanceId, Result, StoreOperation};
use slumber_store::ResourceStore;

/// Persist `enabled` into the spec of `instance`.
///
/// The write is conditional on the instance's `resource_version`, so a
/// concurrent spec edit surfaces as a retryable conflict instead of being
/// overwritten. No write is issued when the flag already matches.
///
/// # Errors
///
/// `NotFound` when the instance is gone, `TransientInfra` for conflicts and
/// other store failures.
pub async fn persist_enabled(
    store: &dyn ResourceStore,
    instance: &Instance,
    enabled: bool,
) -> Result<Instance> {
    if instance.spec.enabled == enabled {
        return Ok(instance.clone());
    }

    let mut spec = instance.spec.clone();
    spec.enabled = enabled;

    let updated = store
        .update_instance_spec(&instance.id, spec, instance.resource_version)
        .await
        .map_err(|e| e.classify(format!("instance {}", instance.id), StoreOperation::Update))?;

    info!(instance = %instance.id, enabled, "Persisted enabled flag");
    Ok(updated)
}

/// Operations an administrative front end needs from the controller.
#[derive(Clone)]
pub struct Admin {
    store: Arc<dyn ResourceStore>,
}

impl Admin {
    /// Create a new admin surface over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Every instance with its spec and status.
    ///
    /// # Errors
    ///
    /// `TransientInfra` when the store cannot list.
    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        self.store
            .list_instances()
            .await
            .map_err(|e| e.classify("instances", StoreOperation::List))
    }

    /// Turn an instance on or off.
    ///
    /// Goes through the same persisted-spec path as the idle-timeout
    /// controller.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown instance, `TransientInfra` otherwise.
    pub async fn set_enabled(&self, id: &InstanceId, enabled: bool) -> Result<Instance> {
        let instance = self
            .store
            .get_instance(id)
            .await
            .map_err(|e| e.classify(format!("instance {id}"), StoreOperation::Get))?;
        persist_enabled(self.store.as_ref(), &instance, enabled).await
    }
}
