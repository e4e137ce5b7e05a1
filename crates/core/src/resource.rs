//! Dependent resources: infrastructure objects owned by and derived from an instance.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::instance::InstanceId;

/// Annotation carrying the content hash of the spec that produced a workload.
pub const CONFIG_HASH_ANNOTATION: &str = "slumber.io/config-hash";

/// Label selecting every dependent of one instance.
pub const APP_LABEL: &str = "app";

/// Port the status-query protocol and game clients use inside the workload.
pub const SERVICE_PORT: u16 = 25565;

/// Kinds of dependent resources, in reconciliation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ResourceKind {
    Volume,
    VolumeClaim,
    ConfigBundle,
    Workload,
    NetworkEndpoint,
}

impl ResourceKind {
    /// All kinds in the order a pass converges them.
    pub const ALL: [Self; 5] = [
        Self::Volume,
        Self::VolumeClaim,
        Self::ConfigBundle,
        Self::Workload,
        Self::NetworkEndpoint,
    ];

    /// Kinds that must have rendered before this one is attempted.
    #[must_use]
    pub const fn prerequisites(&self) -> &'static [Self] {
        match self {
            Self::Volume | Self::ConfigBundle | Self::NetworkEndpoint => &[],
            Self::VolumeClaim => &[Self::Volume],
            Self::Workload => &[Self::VolumeClaim, Self::ConfigBundle],
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "Volume",
            Self::VolumeClaim => "VolumeClaim",
            Self::ConfigBundle => "ConfigBundle",
            Self::Workload => "Workload",
            Self::NetworkEndpoint => "NetworkEndpoint",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Back-reference from a dependent to the instance that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub instance: InstanceId,
}

/// Metadata common to every dependent resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Assigned by the store on create.
    #[serde(default)]
    pub uid: Option<Ulid>,
    /// Assigned by the store on create.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    /// Metadata for a dependent owned by `owner`.
    pub fn owned_by(owner: &InstanceId, name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(APP_LABEL.to_string(), owner.app_label());
        Self {
            name: name.into(),
            namespace: owner.namespace.clone(),
            uid: None,
            created_at: None,
            owner: Some(OwnerRef {
                instance: owner.clone(),
            }),
            labels,
            annotations: BTreeMap::new(),
            resource_version: 0,
        }
    }

    /// Metadata for an unowned, shared resource.
    pub fn shared(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: None,
            created_at: None,
            owner: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            resource_version: 0,
        }
    }

    /// Whether this object is owned by `instance`.
    #[must_use]
    pub fn is_owned_by(&self, instance: &InstanceId) -> bool {
        self.owner.as_ref().is_some_and(|o| &o.instance == instance)
    }
}

/// Volume access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    #[default]
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

/// What happens to the data once the claim is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    #[default]
    Retain,
    Delete,
}

/// Storage volume backing an instance's world data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub storage_class: String,
    pub capacity: String,
    pub path: String,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

/// Claim binding an instance to its volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
    pub volume_name: String,
    pub storage_class: String,
    pub capacity: String,
    #[serde(default)]
    pub access_mode: AccessMode,
}

/// Files mounted into the workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBundleSpec {
    pub data: BTreeMap<String, String>,
}

/// Where a volume source is mounted inside the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub source: MountSource,
    pub mount_path: String,
    #[serde(default)]
    pub sub_path: Option<String>,
}

/// Source of a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MountSource {
    Claim(String),
    ConfigBundle(String),
    Scratch,
}

/// The compute workload running the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub replicas: u32,
    pub image: String,
    pub command: Vec<String>,
    pub init_image: String,
    pub init_command: Vec<String>,
    pub container_port: u16,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub init_mounts: Vec<Mount>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    pub working_dir: String,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

/// Network endpoint routing clients to the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub port: u16,
    pub target_port: u16,
    pub selector: BTreeMap<String, String>,
}

/// Kind-tagged body of a dependent resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ResourceBody {
    Volume(VolumeSpec),
    VolumeClaim(ClaimSpec),
    ConfigBundle(ConfigBundleSpec),
    Workload(WorkloadSpec),
    NetworkEndpoint(EndpointSpec),
}

impl ResourceBody {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Volume(_) => ResourceKind::Volume,
            Self::VolumeClaim(_) => ResourceKind::VolumeClaim,
            Self::ConfigBundle(_) => ResourceKind::ConfigBundle,
            Self::Workload(_) => ResourceKind::Workload,
            Self::NetworkEndpoint(_) => ResourceKind::NetworkEndpoint,
        }
    }
}

/// A dependent resource as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentResource {
    pub meta: ObjectMeta,
    pub body: ResourceBody,
}

impl DependentResource {
    #[must_use]
    pub const fn new(meta: ObjectMeta, body: ResourceBody) -> Self {
        Self { meta, body }
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.body.kind()
    }

    /// `Kind namespace/name`, used in logs and error targets.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}/{}", self.kind(), self.meta.namespace, self.meta.name)
    }

    /// Whether `other` is the same kind, namespace and name.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.meta.namespace == other.meta.namespace
            && self.meta.name == other.meta.name
    }

    /// Content hash annotation, if stamped.
    #[must_use]
    pub fn config_hash(&self) -> Option<&str> {
        self.meta
            .annotations
            .get(CONFIG_HASH_ANNOTATION)
            .map(String::as_str)
    }

    /// Desired replica count, for workloads.
    #[must_use]
    pub const fn replicas(&self) -> Option<u32> {
        match &self.body {
            ResourceBody::Workload(w) => Some(w.replicas),
            _ => None,
        }
    }
}
