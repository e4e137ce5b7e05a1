//! YAML seed document for the standalone runtime.
//!
//! A seed declares what an external store would otherwise hold: the
//! operator configuration, the shared jar claims and the instances.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use slumber_core::{
    AccessMode, ClaimSpec, DependentResource, Error, Instance, InstanceId, InstanceSpec,
    ObjectMeta, OperatorConfigDocument, ResourceBody, Result,
};
use slumber_store::InMemoryResourceStore;

const DEFAULT_NAMESPACE: &str = "default";

/// The seed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Seed {
    #[serde(default)]
    pub operator_config: Option<OperatorConfigDocument>,
    #[serde(default)]
    pub shared_claims: Vec<SharedClaim>,
    #[serde(default)]
    pub instances: Vec<SeedInstance>,
}

/// A claim shared by every instance, such as the jar caches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SharedClaim {
    pub name: String,
    /// Defaults to the operator configuration namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    pub capacity: String,
    #[serde(default)]
    pub storage_class: String,
    #[serde(default = "read_only_many")]
    pub access_mode: AccessMode,
}

const fn read_only_many() -> AccessMode {
    AccessMode::ReadOnlyMany
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeedInstance {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub spec: InstanceSpec,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Seed {
    /// Parse and validate a seed from YAML text.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the text does not parse or fails validation.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let seed: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::invalid_config(format!("failed to parse seed: {e}")))?;
        seed.validate()?;
        Ok(seed)
    }

    /// Load a seed file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid_config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Reject empty names and duplicate instances.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the offending entry.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for instance in &self.instances {
            if instance.name.trim().is_empty() || instance.namespace.trim().is_empty() {
                return Err(Error::invalid_config("instance name and namespace must not be empty"));
            }
            let id = instance.id();
            if !seen.insert(id.clone()) {
                return Err(Error::invalid_config(format!("instance {id} declared twice")));
            }
        }

        if let Some(claim) = self.shared_claims.iter().find(|c| c.name.trim().is_empty()) {
            return Err(Error::invalid_config(format!(
                "shared claim with capacity {} has no name",
                claim.capacity
            )));
        }
        Ok(())
    }

    /// Instances declared by the seed.
    pub fn instances(&self) -> impl Iterator<Item = Instance> + '_ {
        self.instances
            .iter()
            .map(|i| Instance::new(i.id(), i.spec.clone()))
    }

    fn claim_namespace(&self, claim: &SharedClaim) -> String {
        claim
            .namespace
            .clone()
            .or_else(|| self.operator_config.as_ref().map(|c| c.namespace.clone()))
            .unwrap_or_else(default_namespace)
    }

    /// Load everything into `store`. Returns the number of instances.
    pub async fn apply(&self, store: &InMemoryResourceStore) -> usize {
        if let Some(document) = &self.operator_config {
            store.set_operator_config(document.clone()).await;
        }

        for claim in &self.shared_claims {
            let resource = DependentResource::new(
                ObjectMeta::shared(self.claim_namespace(claim), &claim.name),
                ResourceBody::VolumeClaim(ClaimSpec {
                    volume_name: claim.name.clone(),
                    storage_class: claim.storage_class.clone(),
                    capacity: claim.capacity.clone(),
                    access_mode: claim.access_mode,
                }),
            );
            store.seed_resource(resource).await;
        }

        let mut count = 0;
        for instance in self.instances() {
            store.insert_instance(instance).await;
            count += 1;
        }

        info!(
            instances = count,
            shared_claims = self.shared_claims.len(),
            configured = self.operator_config.is_some(),
            "Seeded store"
        );
        count
    }
}

impl SeedInstance {
    #[must_use]
    pub fn id(&self) -> InstanceId {
        InstanceId::new(self.namespace.clone(), self.name.clone())
    }
}
