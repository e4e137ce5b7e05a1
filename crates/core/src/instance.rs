//! Instance: the managed unit combining a desired spec and observed status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceKind;

/// Namespace-qualified identity of an instance, stable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub namespace: String,
    pub name: String,
}

impl InstanceId {
    /// Create a new instance ID.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Label value shared by every dependent of this instance.
    #[must_use]
    pub fn app_label(&self) -> String {
        format!("slumber-server-{}", self.name)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Server flavor; selects which jar is fetched from the jar site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    Vanilla,
    Spigot,
    Paper,
    Forge,
}

impl Flavor {
    /// Directory name of this flavor on the jar site.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vanilla => "vanilla",
            Self::Spigot => "spigot",
            Self::Paper => "paper",
            Self::Forge => "forge",
        }
    }
}

/// A mod installed into the server before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mod {
    pub name: String,
    pub version: String,
    pub url: String,
}

/// Desired state of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Whether the workload should be running.
    #[serde(default)]
    pub enabled: bool,

    /// Container image for the server process.
    pub image: String,

    /// Server version to run.
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub flavor: Flavor,

    /// Base URL serving `<flavor>/server-<version>.jar`.
    #[serde(default)]
    pub jar_site: String,

    /// Explicit storage path; derived from the operator volume template when unset.
    #[serde(default)]
    pub host_path: Option<String>,

    /// Path of the world, relative to the server data directory.
    #[serde(default = "default_world_path")]
    pub world_path: String,

    #[serde(default)]
    pub mods: Vec<Mod>,

    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: u32,

    #[serde(rename = "initMemoryMB")]
    pub init_memory_mb: u32,

    /// Host port to bind the service port to.
    #[serde(default)]
    pub host_port: Option<u16>,

    /// Seconds without connected clients before the instance is disabled; <= 0 disables the feature.
    #[serde(default)]
    pub idle_timeout_seconds: i64,

    /// Service configuration key/values (server.properties).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Display-only name; has no effect on the running workload.
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_world_path() -> String {
    "world".to_string()
}

impl InstanceSpec {
    /// Create a spec with the required fields and defaults for the rest.
    pub fn new(image: impl Into<String>, max_memory_mb: u32, init_memory_mb: u32) -> Self {
        Self {
            enabled: false,
            image: image.into(),
            version: default_version(),
            flavor: Flavor::default(),
            jar_site: String::new(),
            host_path: None,
            world_path: default_world_path(),
            mods: Vec::new(),
            max_memory_mb,
            init_memory_mb,
            host_port: None,
            idle_timeout_seconds: 0,
            properties: BTreeMap::new(),
            display_name: None,
        }
    }

    /// Set the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the idle timeout in seconds.
    #[must_use]
    pub const fn with_idle_timeout(mut self, seconds: i64) -> Self {
        self.idle_timeout_seconds = seconds;
        self
    }

    /// Set a configuration property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether idle scale-down is configured.
    #[must_use]
    pub const fn idle_timeout_enabled(&self) -> bool {
        self.idle_timeout_seconds > 0
    }
}

/// Observed state of an instance. Written only by the control loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Whether the last probe reached the service.
    #[serde(default)]
    pub running: bool,

    /// Time of the last successful probe.
    #[serde(default)]
    pub last_probe: Option<DateTime<Utc>>,

    /// Start of the current idle period.
    #[serde(default)]
    pub idle_since: Option<DateTime<Utc>>,

    /// Names of connected clients.
    #[serde(default)]
    pub players: Vec<String>,

    /// Base64-encoded PNG status icon.
    #[serde(default)]
    pub thumbnail: Option<String>,

    #[serde(default)]
    pub server_version: Option<String>,

    #[serde(default)]
    pub motd: Option<String>,

    #[serde(default)]
    pub latency_ms: Option<u64>,

    /// Render failures keyed by dependent kind; cleared once the kind renders again.
    #[serde(default)]
    pub render_errors: BTreeMap<ResourceKind, String>,
}

/// The unit of management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,

    /// Optimistic-concurrency token assigned by the store.
    #[serde(default)]
    pub resource_version: u64,

    pub spec: InstanceSpec,

    #[serde(default)]
    pub status: InstanceStatus,
}

impl Instance {
    /// Create a new instance with an empty status.
    #[must_use]
    pub fn new(id: InstanceId, spec: InstanceSpec) -> Self {
        Self {
            id,
            resource_version: 0,
            spec,
            status: InstanceStatus::default(),
        }
    }
}
