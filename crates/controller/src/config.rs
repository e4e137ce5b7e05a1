//! Controller settings, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use slumber_core::{Error, InstanceId, Result, SERVICE_PORT};
use slumber_probe::DEFAULT_PROTOCOL_VERSION;

/// Tunables for the control loop, scheduler and runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Interval between passes of a healthy instance.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Interval before retrying after a transient failure.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Overall deadline of one liveness probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Passes allowed to run at once across all instances.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Interval between operator configuration refreshes.
    #[serde(default = "default_operator_config_interval")]
    pub operator_config_interval_secs: u64,

    /// Interval between full instance re-listings.
    #[serde(default = "default_instance_resync")]
    pub instance_resync_secs: u64,

    /// Protocol version announced in the status-query handshake.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,

    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Probe host; `{name}` and `{namespace}` are substituted per instance.
    #[serde(default = "default_probe_host_template")]
    pub probe_host_template: String,

    /// Time allowed for in-flight passes to finish on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval(),
            retry_interval_secs: default_retry_interval(),
            probe_timeout_ms: default_probe_timeout(),
            workers: default_workers(),
            operator_config_interval_secs: default_operator_config_interval(),
            instance_resync_secs: default_instance_resync(),
            protocol_version: default_protocol_version(),
            service_port: default_service_port(),
            probe_host_template: default_probe_host_template(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the text does not parse or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("failed to parse settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("resync_interval_secs", self.resync_interval_secs),
            ("retry_interval_secs", self.retry_interval_secs),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("operator_config_interval_secs", self.operator_config_interval_secs),
            ("instance_resync_secs", self.instance_resync_secs),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::invalid_config(format!("{field} must be greater than 0")));
        }

        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be greater than 0"));
        }

        if self.service_port == 0 {
            return Err(Error::invalid_config("service_port must not be 0"));
        }

        if self.probe_host_template.trim().is_empty() {
            return Err(Error::invalid_config("probe_host_template must not be empty"));
        }

        Ok(())
    }

    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub const fn operator_config_interval(&self) -> Duration {
        Duration::from_secs(self.operator_config_interval_secs)
    }

    #[must_use]
    pub const fn instance_resync(&self) -> Duration {
        Duration::from_secs(self.instance_resync_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Host to probe for `id`.
    #[must_use]
    pub fn probe_host(&self, id: &InstanceId) -> String {
        self.probe_host_template
            .replace("{name}", &id.name)
            .replace("{namespace}", &id.namespace)
    }
}

const fn default_resync_interval() -> u64 {
    30
}

const fn default_retry_interval() -> u64 {
    10
}

const fn default_probe_timeout() -> u64 {
    3000
}

const fn default_workers() -> usize {
    4
}

const fn default_operator_config_interval() -> u64 {
    30
}

const fn default_instance_resync() -> u64 {
    60
}

const fn default_protocol_version() -> i32 {
    DEFAULT_PROTOCOL_VERSION
}

const fn default_service_port() -> u16 {
    SERVICE_PORT
}

fn default_probe_host_template() -> String {
    "{name}.{namespace}.svc.cluster.local".to_string()
}

const fn default_shutdown_timeout() -> u64 {
    30
}
