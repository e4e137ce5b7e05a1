//! In-memory resource store for standalone mode and tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast};
use ulid::Ulid;

use slumber_core::{
    DependentResource, Instance, InstanceId, InstanceSpec, InstanceStatus,
    OperatorConfigDocument, ResourceKind, StoreOperation,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{OperatorConfigSource, ResourceStore, StoreEvent};

const EVENT_CAPACITY: usize = 256;

type ResourceKey = (ResourceKind, String, String);

fn key_of(resource: &DependentResource) -> ResourceKey {
    (
        resource.kind(),
        resource.meta.namespace.clone(),
        resource.meta.name.clone(),
    )
}

/// A scripted store failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    operation: StoreOperation,
    kind: Option<ResourceKind>,
    remaining: Option<usize>,
    reason: String,
}

impl Fault {
    /// Fail every call of `operation` until cleared.
    pub fn on(operation: StoreOperation) -> Self {
        Self {
            operation,
            kind: None,
            remaining: None,
            reason: format!("injected {operation} failure"),
        }
    }

    /// Only fail calls touching dependents of `kind`.
    #[must_use]
    pub const fn for_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Fail only the next `count` matching calls.
    #[must_use]
    pub const fn times(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    fn matches(&self, operation: StoreOperation, kind: Option<ResourceKind>) -> bool {
        self.operation == operation && self.kind.is_none_or(|k| Some(k) == kind)
    }
}

/// Counts of successful writes, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub spec_updates: u64,
    pub status_updates: u64,
}

impl WriteStats {
    /// Writes touching dependents.
    #[must_use]
    pub const fn dependent_writes(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }

    /// Every write of any kind.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.dependent_writes() + self.spec_updates + self.status_updates
    }
}

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    spec_updates: AtomicU64,
    status_updates: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WriteStats {
        WriteStats {
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            spec_updates: self.spec_updates.load(Ordering::Relaxed),
            status_updates: self.status_updates.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<InstanceId, Instance>,
    resources: BTreeMap<ResourceKey, DependentResource>,
    operator_config: Option<OperatorConfigDocument>,
}

/// In-memory store backed by ordered maps behind a tokio `RwLock`.
///
/// Lists come back ordered by name, which is not creation order; callers
/// must not rely on list position.
pub struct InMemoryResourceStore {
    state: RwLock<State>,
    faults: Mutex<Vec<Fault>>,
    counters: Counters,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResourceStore {
    /// Create a new in-memory resource store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            faults: Mutex::new(Vec::new()),
            counters: Counters::default(),
            events,
        }
    }

    /// Create a new in-memory resource store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace an instance, announcing it to subscribers.
    pub async fn insert_instance(&self, mut instance: Instance) -> Instance {
        instance.resource_version = instance.resource_version.max(1);
        let id = instance.id.clone();
        self.state
            .write()
            .await
            .instances
            .insert(id.clone(), instance.clone());
        self.notify(StoreEvent::InstanceCreated(id));
        instance
    }

    /// Remove an instance and every dependent it owns.
    pub async fn delete_instance(&self, id: &InstanceId) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.instances.remove(id).is_some();
            state.resources.retain(|_, r| !r.meta.is_owned_by(id));
            removed
        };
        if removed {
            self.notify(StoreEvent::InstanceDeleted(id.clone()));
        }
        removed
    }

    /// Declare the operator configuration document.
    pub async fn set_operator_config(&self, document: OperatorConfigDocument) {
        self.state.write().await.operator_config = Some(document);
    }

    /// Insert a resource as-is, filling identity fields only when absent.
    ///
    /// Used for shared claims and for arranging pre-existing state.
    pub async fn seed_resource(&self, mut resource: DependentResource) -> DependentResource {
        resource.meta.uid = resource.meta.uid.or_else(|| Some(Ulid::new()));
        resource.meta.created_at = resource.meta.created_at.or_else(|| Some(Utc::now()));
        resource.meta.resource_version = resource.meta.resource_version.max(1);
        self.state
            .write()
            .await
            .resources
            .insert(key_of(&resource), resource.clone());
        resource
    }

    /// Every stored resource owned by `owner`, across kinds.
    pub async fn dependents_of(&self, owner: &InstanceId) -> Vec<DependentResource> {
        self.state
            .read()
            .await
            .resources
            .values()
            .filter(|r| r.meta.is_owned_by(owner))
            .cloned()
            .collect()
    }

    /// Script a failure.
    pub async fn inject(&self, fault: Fault) {
        self.faults.lock().await.push(fault);
    }

    /// Drop every scripted failure.
    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    /// Successful writes so far.
    #[must_use]
    pub fn write_stats(&self) -> WriteStats {
        self.counters.snapshot()
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn check_fault(
        &self,
        operation: StoreOperation,
        kind: Option<ResourceKind>,
    ) -> StoreResult<()> {
        let mut faults = self.faults.lock().await;
        let Some(index) = faults.iter().position(|f| f.matches(operation, kind)) else {
            return Ok(());
        };

        let reason = faults[index].reason.clone();
        if let Some(remaining) = faults[index].remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        Err(StoreError::unavailable(operation, reason))
    }
}

fn describe_instance(id: &InstanceId) -> String {
    format!("instance {id}")
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_instance(&self, id: &InstanceId) -> StoreResult<Instance> {
        self.check_fault(StoreOperation::Get, None).await?;
        self.state
            .read()
            .await
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(describe_instance(id)))
    }

    async fn list_instances(&self) -> StoreResult<Vec<Instance>> {
        self.check_fault(StoreOperation::List, None).await?;
        Ok(self.state.read().await.instances.values().cloned().collect())
    }

    async fn update_instance_spec(
        &self,
        id: &InstanceId,
        spec: InstanceSpec,
        expected_version: u64,
    ) -> StoreResult<Instance> {
        self.check_fault(StoreOperation::Update, None).await?;
        let updated = {
            let mut state = self.state.write().await;
            let instance = state
                .instances
                .get_mut(id)
                .ok_or_else(|| StoreError::not_found(describe_instance(id)))?;
            if instance.resource_version != expected_version {
                return Err(StoreError::Conflict {
                    what: describe_instance(id),
                    expected: expected_version,
                    actual: instance.resource_version,
                });
            }
            instance.spec = spec;
            instance.resource_version += 1;
            instance.clone()
        };
        self.counters.spec_updates.fetch_add(1, Ordering::Relaxed);
        self.notify(StoreEvent::InstanceSpecChanged(id.clone()));
        Ok(updated)
    }

    async fn update_instance_status(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> StoreResult<Instance> {
        self.check_fault(StoreOperation::UpdateStatus, None).await?;
        let mut state = self.state.write().await;
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(describe_instance(id)))?;
        instance.status = status;
        self.counters.status_updates.fetch_add(1, Ordering::Relaxed);
        Ok(instance.clone())
    }

    async fn list_dependents(
        &self,
        owner: &InstanceId,
        kind: ResourceKind,
    ) -> StoreResult<Vec<DependentResource>> {
        self.check_fault(StoreOperation::List, Some(kind)).await?;
        Ok(self
            .state
            .read()
            .await
            .resources
            .values()
            .filter(|r| r.kind() == kind && r.meta.is_owned_by(owner))
            .cloned()
            .collect())
    }

    async fn find_resource(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> StoreResult<Option<DependentResource>> {
        self.check_fault(StoreOperation::Get, Some(kind)).await?;
        let key = (kind, namespace.to_string(), name.to_string());
        Ok(self.state.read().await.resources.get(&key).cloned())
    }

    async fn create_dependent(
        &self,
        mut resource: DependentResource,
    ) -> StoreResult<DependentResource> {
        self.check_fault(StoreOperation::Create, Some(resource.kind()))
            .await?;
        let key = key_of(&resource);
        let mut state = self.state.write().await;
        if state.resources.contains_key(&key) {
            return Err(StoreError::already_exists(resource.describe()));
        }
        if let Some(owner) = resource.meta.owner.as_ref() {
            if !state.instances.contains_key(&owner.instance) {
                return Err(StoreError::not_found(describe_instance(&owner.instance)));
            }
        }

        resource.meta.uid = Some(Ulid::new());
        resource.meta.created_at = Some(Utc::now());
        resource.meta.resource_version = 1;
        state.resources.insert(key, resource.clone());
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        Ok(resource)
    }

    async fn update_dependent(
        &self,
        mut resource: DependentResource,
    ) -> StoreResult<DependentResource> {
        self.check_fault(StoreOperation::Update, Some(resource.kind()))
            .await?;
        let key = key_of(&resource);
        let mut state = self.state.write().await;
        let stored = state
            .resources
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(resource.describe()))?;
        if stored.meta.resource_version != resource.meta.resource_version {
            return Err(StoreError::Conflict {
                what: resource.describe(),
                expected: resource.meta.resource_version,
                actual: stored.meta.resource_version,
            });
        }

        resource.meta.uid = stored.meta.uid;
        resource.meta.created_at = stored.meta.created_at;
        resource.meta.resource_version = stored.meta.resource_version + 1;
        *stored = resource.clone();
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        Ok(resource)
    }

    async fn delete_dependent(&self, resource: &DependentResource) -> StoreResult<()> {
        self.check_fault(StoreOperation::Delete, Some(resource.kind()))
            .await?;
        let key = key_of(resource);
        let mut state = self.state.write().await;
        let same_object = state
            .resources
            .get(&key)
            .is_some_and(|stored| resource.meta.uid.is_none() || stored.meta.uid == resource.meta.uid);
        if !same_object {
            return Err(StoreError::not_found(resource.describe()));
        }
        state.resources.remove(&key);
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl OperatorConfigSource for InMemoryResourceStore {
    async fn fetch_document(&self) -> StoreResult<Option<OperatorConfigDocument>> {
        self.check_fault(StoreOperation::Get, None).await?;
        Ok(self.state.read().await.operator_config.clone())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use slumber_core::{ConfigBundleSpec, ObjectMeta, ResourceBody};

    fn lobby() -> InstanceId {
        InstanceId::new("games", "lobby")
    }

    fn bundle(owner: &InstanceId, name: &str) -> DependentResource {
        DependentResource::new(
            ObjectMeta::owned_by(owner, name),
            ResourceBody::ConfigBundle(ConfigBundleSpec::default()),
        )
    }

    async fn store_with_lobby() -> InMemoryResourceStore {
        let store = InMemoryResourceStore::new();
        store
            .insert_instance(Instance::new(lobby(), InstanceSpec::new("java:21", 2048, 1024)))
            .await;
        store
    }

    #[tokio::test]
    async fn test_create_assigns_identity() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_with_lobby().await;
        let created = store.create_dependent(bundle(&lobby(), "lobby")).await?;

        assert!(created.meta.uid.is_some());
        assert!(created.meta.created_at.is_some());
        assert_eq!(created.meta.resource_version, 1);
        assert_eq!(store.write_stats().creates, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_with_lobby().await;
        store.create_dependent(bundle(&lobby(), "lobby")).await?;
        let second = store.create_dependent(bundle(&lobby(), "lobby")).await;
        assert!(matches!(second, Err(StoreError::AlreadyExists { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_by_owner_and_kind() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_with_lobby().await;
        let other = InstanceId::new("games", "survival");
        store
            .insert_instance(Instance::new(other.clone(), InstanceSpec::new("java:21", 1024, 512)))
            .await;
        store.create_dependent(bundle(&lobby(), "lobby")).await?;
        store.create_dependent(bundle(&other, "survival")).await?;

        let listed = store
            .list_dependents(&lobby(), ResourceKind::ConfigBundle)
            .await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].meta.name, "lobby");
        assert!(
            store
                .list_dependents(&lobby(), ResourceKind::Workload)
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_dependent_update_conflicts() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_with_lobby().await;
        let created = store.create_dependent(bundle(&lobby(), "lobby")).await?;
        let updated = store.update_dependent(created.clone()).await?;
        assert_eq!(updated.meta.resource_version, 2);
        assert_eq!(updated.meta.uid, created.meta.uid);

        let stale = store.update_dependent(created).await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_spec_update_checks_version_and_notifies() -> Result<(), Box<dyn std::error::Error>>
    {
        let store = store_with_lobby().await;
        let mut events = store.subscribe();
        let current = store.get_instance(&lobby()).await?;

        let disabled = current.spec.clone().with_enabled(false);
        let updated = store
            .update_instance_spec(&lobby(), disabled.clone(), current.resource_version)
            .await?;
        assert!(!updated.spec.enabled);
        assert_eq!(
            events.recv().await?,
            StoreEvent::InstanceSpecChanged(lobby())
        );

        let stale = store
            .update_instance_spec(&lobby(), disabled, current.resource_version)
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_fault_fires_requested_times() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_with_lobby().await;
        store
            .inject(
                Fault::on(StoreOperation::Create)
                    .for_kind(ResourceKind::ConfigBundle)
                    .times(1),
            )
            .await;

        let first = store.create_dependent(bundle(&lobby(), "lobby")).await;
        assert!(matches!(first, Err(StoreError::Unavailable { .. })));
        store.create_dependent(bundle(&lobby(), "lobby")).await?;
        assert_eq!(store.write_stats().creates, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_instance_cascades() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_with_lobby().await;
        store.create_dependent(bundle(&lobby(), "lobby")).await?;
        assert!(store.delete_instance(&lobby()).await);
        assert!(store.dependents_of(&lobby()).await.is_empty());
        assert!(store.get_instance(&lobby()).await.is_err_and(|e| e.is_not_found()));
        Ok(())
    }
}
