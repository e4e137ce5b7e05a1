//! Resource store trait, change notifications and the tracing decorator.

use async_trait::async_trait;
use tokio::sync::broadcast;

use slumber_core::{
    DependentResource, Instance, InstanceId, InstanceSpec, InstanceStatus,
    OperatorConfigDocument, ResourceKind,
};

use crate::error::StoreResult;

/// Change notification emitted by a store when an instance's spec changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    InstanceCreated(InstanceId),
    InstanceSpecChanged(InstanceId),
    InstanceDeleted(InstanceId),
}

impl StoreEvent {
    /// The instance this event is about.
    #[must_use]
    pub const fn instance(&self) -> &InstanceId {
        match self {
            Self::InstanceCreated(id) | Self::InstanceSpecChanged(id) | Self::InstanceDeleted(id) => {
                id
            }
        }
    }
}

/// The declarative resource store the control loop converges against.
///
/// Dependents are listed by owner back-reference; the store owns identity
/// (`uid`, `created_at`) and the optimistic-concurrency tokens.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one instance.
    async fn get_instance(&self, id: &InstanceId) -> StoreResult<Instance>;

    /// List every instance.
    async fn list_instances(&self) -> StoreResult<Vec<Instance>>;

    /// Replace an instance's spec if its version still matches `expected_version`.
    async fn update_instance_spec(
        &self,
        id: &InstanceId,
        spec: InstanceSpec,
        expected_version: u64,
    ) -> StoreResult<Instance>;

    /// Replace an instance's status. Does not touch the spec version.
    async fn update_instance_status(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> StoreResult<Instance>;

    /// List dependents of `kind` owned by `owner`.
    async fn list_dependents(
        &self,
        owner: &InstanceId,
        kind: ResourceKind,
    ) -> StoreResult<Vec<DependentResource>>;

    /// Look up any resource by name, owned or not.
    async fn find_resource(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> StoreResult<Option<DependentResource>>;

    async fn create_dependent(&self, resource: DependentResource)
    -> StoreResult<DependentResource>;

    /// Update a dependent; its `resource_version` must match the stored one.
    async fn update_dependent(&self, resource: DependentResource)
    -> StoreResult<DependentResource>;

    async fn delete_dependent(&self, resource: &DependentResource) -> StoreResult<()>;

    /// Subscribe to instance change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Source of the operator configuration document.
#[async_trait]
pub trait OperatorConfigSource: Send + Sync {
    /// Fetch the document, `None` when it has not been declared yet.
    async fn fetch_document(&self) -> StoreResult<Option<OperatorConfigDocument>>;
}

/// A wrapper that adds tracing to a resource store.
pub struct TracingResourceStore<S> {
    inner: S,
}

impl<S> TracingResourceStore<S> {
    /// Create a new tracing resource store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for TracingResourceStore<S> {
    async fn get_instance(&self, id: &InstanceId) -> StoreResult<Instance> {
        tracing::trace!(instance = %id, "Getting instance");
        self.inner.get_instance(id).await
    }

    async fn list_instances(&self) -> StoreResult<Vec<Instance>> {
        let result = self.inner.list_instances().await;
        if let Ok(ref instances) = result {
            tracing::trace!(count = instances.len(), "Listed instances");
        }
        result
    }

    async fn update_instance_spec(
        &self,
        id: &InstanceId,
        spec: InstanceSpec,
        expected_version: u64,
    ) -> StoreResult<Instance> {
        tracing::debug!(
            instance = %id,
            enabled = spec.enabled,
            expected_version,
            "Updating instance spec"
        );
        let result = self.inner.update_instance_spec(id, spec, expected_version).await;
        if let Err(ref e) = result {
            tracing::debug!(instance = %id, error = %e, "Spec update rejected");
        }
        result
    }

    async fn update_instance_status(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> StoreResult<Instance> {
        tracing::debug!(
            instance = %id,
            running = status.running,
            players = status.players.len(),
            "Updating instance status"
        );
        self.inner.update_instance_status(id, status).await
    }

    async fn list_dependents(
        &self,
        owner: &InstanceId,
        kind: ResourceKind,
    ) -> StoreResult<Vec<DependentResource>> {
        tracing::trace!(instance = %owner, %kind, "Listing dependents");
        self.inner.list_dependents(owner, kind).await
    }

    async fn find_resource(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> StoreResult<Option<DependentResource>> {
        tracing::trace!(namespace, %kind, name, "Finding resource");
        self.inner.find_resource(namespace, kind, name).await
    }

    async fn create_dependent(
        &self,
        resource: DependentResource,
    ) -> StoreResult<DependentResource> {
        tracing::debug!(resource = %resource.describe(), "Creating dependent");
        tracing::trace!(body = ?resource.body, "Dependent body");
        self.inner.create_dependent(resource).await
    }

    async fn update_dependent(
        &self,
        resource: DependentResource,
    ) -> StoreResult<DependentResource> {
        tracing::debug!(
            resource = %resource.describe(),
            resource_version = resource.meta.resource_version,
            "Updating dependent"
        );
        tracing::trace!(body = ?resource.body, "Dependent body");
        self.inner.update_dependent(resource).await
    }

    async fn delete_dependent(&self, resource: &DependentResource) -> StoreResult<()> {
        tracing::debug!(resource = %resource.describe(), "Deleting dependent");
        self.inner.delete_dependent(resource).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

#[async_trait]
impl<S: OperatorConfigSource> OperatorConfigSource for TracingResourceStore<S> {
    async fn fetch_document(&self) -> StoreResult<Option<OperatorConfigDocument>> {
        let result = self.inner.fetch_document().await;
        match result {
            Ok(Some(ref doc)) => {
                tracing::trace!(namespace = %doc.namespace, "Fetched operator config document");
            }
            Ok(None) => tracing::trace!("Operator config document not declared"),
            Err(ref e) => tracing::debug!(error = %e, "Fetching operator config document failed"),
        }
        result
    }
}
