//! Generic dependent reconciler.
//!
//! For one kind and one owner: list what exists, create the rendered
//! dependent when no existing one carries its name, prune every other
//! dependent, and update the survivor when an owned field drifted.

use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info, warn};

use slumber_core::{DependentResource, InstanceId, Result, StoreOperation};
use slumber_store::ResourceStore;

use crate::policy::{KindPolicy, UpdatePolicy, policy_for};
use crate::types::{ReconcileAction, ReconcileOutcome};

/// Converges dependents of one owner towards their rendered desired shape.
#[derive(Clone)]
pub struct ResourceReconciler {
    store: Arc<dyn ResourceStore>,
}

impl ResourceReconciler {
    /// Create a new reconciler over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Reconcile `desired` using the built-in policy for its kind.
    ///
    /// # Errors
    ///
    /// Store failures on list, create or update come back as
    /// `TransientInfra`; a vanished owner comes back as `NotFound`.
    /// Failed duplicate deletions are logged and counted, never returned.
    pub async fn reconcile(
        &self,
        owner: &InstanceId,
        desired: DependentResource,
    ) -> Result<ReconcileOutcome> {
        let policy = policy_for(desired.kind());
        self.reconcile_with(owner, desired, policy).await
    }

    /// Reconcile `desired` under an explicit policy.
    ///
    /// # Errors
    ///
    /// See [`ResourceReconciler::reconcile`].
    pub async fn reconcile_with(
        &self,
        owner: &InstanceId,
        desired: DependentResource,
        policy: &dyn KindPolicy,
    ) -> Result<ReconcileOutcome> {
        let kind = policy.kind();
        let target = desired.describe();

        let existing = self
            .store
            .list_dependents(owner, kind)
            .await
            .map_err(|e| e.classify(&target, StoreOperation::List))?;

        debug!(instance = %owner, %kind, existing = existing.len(), "Reconciling dependent");

        // Other dependents reference this one by its rendered name, so only
        // a dependent carrying that name can survive.
        let mut existing = existing.into_iter().sorted_by(|a, b| {
            (!desired.same_identity(a), a.meta.created_at, &a.meta.name, a.meta.uid).cmp(&(
                !desired.same_identity(b),
                b.meta.created_at,
                &b.meta.name,
                b.meta.uid,
            ))
        });

        let live = match existing.next() {
            Some(live) if desired.same_identity(&live) => live,
            stale => {
                let created = self
                    .store
                    .create_dependent(desired)
                    .await
                    .map_err(|e| e.classify(&target, StoreOperation::Create))?;
                info!(instance = %owner, resource = %created.describe(), "Created dependent");
                let (duplicates_removed, duplicates_failed) =
                    self.prune(owner, stale.into_iter().chain(existing)).await;
                return Ok(ReconcileOutcome {
                    duplicates_removed,
                    duplicates_failed,
                    ..ReconcileOutcome::new(kind, created.meta.name, ReconcileAction::Created)
                });
            }
        };

        let (duplicates_removed, duplicates_failed) = self.prune(owner, existing).await;

        let action = if policy.update_policy() == UpdatePolicy::Never
            || !policy.differs(&live, &desired)
        {
            ReconcileAction::Unchanged
        } else {
            let update = policy.merge(&live, &desired);
            let updated = self
                .store
                .update_dependent(update)
                .await
                .map_err(|e| e.classify(live.describe(), StoreOperation::Update))?;
            info!(instance = %owner, resource = %updated.describe(), "Updated dependent");
            ReconcileAction::Updated
        };

        Ok(ReconcileOutcome {
            kind,
            name: live.meta.name,
            action,
            duplicates_removed,
            duplicates_failed,
        })
    }

    /// Delete every duplicate. Returns `(removed, failed)`.
    async fn prune(
        &self,
        owner: &InstanceId,
        duplicates: impl Iterator<Item = DependentResource>,
    ) -> (usize, usize) {
        let mut removed = 0;
        let mut failed = 0;
        for duplicate in duplicates {
            match self.store.delete_dependent(&duplicate).await {
                Ok(()) => {
                    info!(instance = %owner, resource = %duplicate.describe(), "Deleted duplicate dependent");
                    removed += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!(resource = %duplicate.describe(), "Duplicate already gone");
                    removed += 1;
                }
                Err(e) => {
                    warn!(
                        instance = %owner,
                        resource = %duplicate.describe(),
                        operation = %StoreOperation::Delete,
                        error = %e,
                        "Failed to delete duplicate dependent"
                    );
                    failed += 1;
                }
            }
        }
        (removed, failed)
    }
}
