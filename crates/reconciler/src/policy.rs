//! Per-kind field ownership.
//!
//! Each kind names the fields the engine owns and compares only those, so
//! fields written by the store or by other actors never cause an update.

use slumber_core::{DependentResource, ResourceBody, ResourceKind};

/// Whether an existing dependent may be changed after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Replace the owned fields when they drift.
    Replace,
    /// Create only. No spec field can change this kind.
    Never,
}

/// Comparison and update rules for one dependent kind.
pub trait KindPolicy: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::Replace
    }

    /// Whether any owned field of `live` differs from `desired`.
    fn differs(&self, live: &DependentResource, desired: &DependentResource) -> bool;

    /// The update to send: `live` identity and foreign metadata, `desired`
    /// body plus the labels and annotations the engine sets.
    fn merge(&self, live: &DependentResource, desired: &DependentResource) -> DependentResource {
        let mut meta = live.meta.clone();
        meta.labels.extend(desired.meta.labels.clone());
        meta.annotations.extend(desired.meta.annotations.clone());
        if meta.owner.is_none() {
            meta.owner.clone_from(&desired.meta.owner);
        }
        DependentResource::new(meta, desired.body.clone())
    }
}

/// Volume: the whole spec is owned.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumePolicy;

impl KindPolicy for VolumePolicy {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    fn differs(&self, live: &DependentResource, desired: &DependentResource) -> bool {
        match (&live.body, &desired.body) {
            (ResourceBody::Volume(l), ResourceBody::Volume(d)) => l != d,
            _ => true,
        }
    }
}

/// Volume claim: binding, class, capacity and access mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimPolicy;

impl KindPolicy for ClaimPolicy {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VolumeClaim
    }

    fn differs(&self, live: &DependentResource, desired: &DependentResource) -> bool {
        match (&live.body, &desired.body) {
            (ResourceBody::VolumeClaim(l), ResourceBody::VolumeClaim(d)) => {
                l.volume_name != d.volume_name
                    || l.storage_class != d.storage_class
                    || l.capacity != d.capacity
                    || l.access_mode != d.access_mode
            }
            _ => true,
        }
    }
}

/// Config bundle: file contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigBundlePolicy;

impl KindPolicy for ConfigBundlePolicy {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigBundle
    }

    fn differs(&self, live: &DependentResource, desired: &DependentResource) -> bool {
        match (&live.body, &desired.body) {
            (ResourceBody::ConfigBundle(l), ResourceBody::ConfigBundle(d)) => l.data != d.data,
            _ => true,
        }
    }
}

/// Workload: replicas, image, command, host port, init image, mounts and
/// the config-hash annotation.
///
/// Selector, working directory and container port are fixed at creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadPolicy;

impl KindPolicy for WorkloadPolicy {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Workload
    }

    fn differs(&self, live: &DependentResource, desired: &DependentResource) -> bool {
        let (ResourceBody::Workload(l), ResourceBody::Workload(d)) = (&live.body, &desired.body)
        else {
            return true;
        };

        l.replicas != d.replicas
            || l.image != d.image
            || l.command != d.command
            || l.host_port != d.host_port
            || l.init_image != d.init_image
            || l.init_command != d.init_command
            || l.init_mounts != d.init_mounts
            || l.mounts != d.mounts
            || live.config_hash() != desired.config_hash()
    }
}

/// Network endpoint: never updated once it exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointPolicy;

impl KindPolicy for EndpointPolicy {
    fn kind(&self) -> ResourceKind {
        ResourceKind::NetworkEndpoint
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::Never
    }

    fn differs(&self, _live: &DependentResource, _desired: &DependentResource) -> bool {
        false
    }
}

/// The policy for `kind`.
#[must_use]
pub fn policy_for(kind: ResourceKind) -> &'static dyn KindPolicy {
    match kind {
        ResourceKind::Volume => &VolumePolicy,
        ResourceKind::VolumeClaim => &ClaimPolicy,
        ResourceKind::ConfigBundle => &ConfigBundlePolicy,
        ResourceKind::Workload => &WorkloadPolicy,
        ResourceKind::NetworkEndpoint => &EndpointPolicy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use slumber_core::{
        CONFIG_HASH_ANNOTATION, ConfigBundleSpec, InstanceId, ObjectMeta, WorkloadSpec,
    };

    fn owner() -> InstanceId {
        InstanceId::new("games", "lobby")
    }

    fn workload(replicas: u32, hash: &str) -> DependentResource {
        let mut meta = ObjectMeta::owned_by(&owner(), "lobby");
        meta.annotations
            .insert(CONFIG_HASH_ANNOTATION.to_string(), hash.to_string());
        DependentResource::new(
            meta,
            ResourceBody::Workload(WorkloadSpec {
                replicas,
                image: "java:21".to_string(),
                command: vec!["java".to_string()],
                init_image: "busybox".to_string(),
                init_command: vec!["sh".to_string()],
                container_port: 25565,
                host_port: None,
                init_mounts: Vec::new(),
                mounts: Vec::new(),
                working_dir: "/data".to_string(),
                selector: BTreeMap::new(),
            }),
        )
    }

    #[test]
    fn test_policy_table_matches_kinds() {
        for kind in ResourceKind::ALL {
            assert_eq!(policy_for(kind).kind(), kind);
        }
        assert_eq!(
            policy_for(ResourceKind::NetworkEndpoint).update_policy(),
            UpdatePolicy::Never
        );
    }

    #[test]
    fn test_workload_ignores_unowned_fields() {
        let desired = workload(1, "abc");
        let mut live = workload(1, "abc");
        if let ResourceBody::Workload(w) = &mut live.body {
            w.working_dir = "/elsewhere".to_string();
        }
        live.meta
            .annotations
            .insert("deployment.revision".to_string(), "7".to_string());

        assert!(!WorkloadPolicy.differs(&live, &desired));
        assert!(WorkloadPolicy.differs(&workload(0, "abc"), &desired));
        assert!(WorkloadPolicy.differs(&workload(1, "def"), &desired));
    }

    #[test]
    fn test_merge_keeps_identity_and_foreign_metadata() {
        let desired = workload(0, "new");
        let mut live = workload(1, "old");
        live.meta.resource_version = 4;
        live.meta
            .labels
            .insert("team".to_string(), "ops".to_string());

        let merged = WorkloadPolicy.merge(&live, &desired);
        assert_eq!(merged.meta.resource_version, 4);
        assert_eq!(merged.meta.labels.get("team").map(String::as_str), Some("ops"));
        assert_eq!(merged.config_hash(), Some("new"));
        assert_eq!(merged.replicas(), Some(0));
    }

    #[test]
    fn test_bundle_compares_data() {
        let bundle = |value: &str| {
            DependentResource::new(
                ObjectMeta::owned_by(&owner(), "lobby"),
                ResourceBody::ConfigBundle(ConfigBundleSpec {
                    data: BTreeMap::from([("eula.txt".to_string(), value.to_string())]),
                }),
            )
        };
        assert!(!ConfigBundlePolicy.differs(&bundle("eula=true\n"), &bundle("eula=true\n")));
        assert!(ConfigBundlePolicy.differs(&bundle("eula=false\n"), &bundle("eula=true\n")));
    }
}
