//! Process-wide operator configuration shared by every instance pass.
//!
//! The configuration is an immutable value injected at construction. Until
//! the initialization routine has published it, readers see
//! [`ConfigState::Uninitialized`] and must treat that as retryable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::resource::{AccessMode, ReclaimPolicy};
use crate::result::Result;

/// Init image used when the configuration document does not name one.
pub const DEFAULT_INIT_IMAGE: &str = "busybox";

/// Template every instance volume is copied from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeTemplate {
    pub storage_class: String,
    pub capacity: String,
    /// Directory under which per-instance volume paths are derived.
    pub base_path: String,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

/// The externally-declared configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfigDocument {
    pub namespace: String,
    /// Claim holding the server jars.
    pub server_jars_claim: String,
    /// Claim holding the mod jars.
    pub mod_jars_claim: String,
    pub servers_volume: VolumeTemplate,
    #[serde(default)]
    pub init_image: Option<String>,
}

/// Resolved operator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub server_jars_claim: String,
    pub mod_jars_claim: String,
    pub volume_template: VolumeTemplate,
    pub init_image: String,
}

impl OperatorConfig {
    /// Resolve a configuration document, applying defaults.
    #[must_use]
    pub fn from_document(doc: &OperatorConfigDocument) -> Self {
        let init_image = doc
            .init_image
            .as_deref()
            .filter(|image| !image.trim().is_empty())
            .unwrap_or(DEFAULT_INIT_IMAGE)
            .to_string();

        Self {
            server_jars_claim: doc.server_jars_claim.clone(),
            mod_jars_claim: doc.mod_jars_claim.clone(),
            volume_template: doc.servers_volume.clone(),
            init_image,
        }
    }
}

/// Snapshot of the shared configuration as seen by a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigState {
    #[default]
    Uninitialized,
    Ready(Arc<OperatorConfig>),
}

impl ConfigState {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The configuration, or a retryable `NotYetInitialized` error.
    ///
    /// # Errors
    ///
    /// Returns `NotYetInitialized` while the state is `Uninitialized`.
    pub fn require(&self) -> Result<Arc<OperatorConfig>> {
        match self {
            Self::Ready(config) => Ok(Arc::clone(config)),
            Self::Uninitialized => Err(Error::not_yet_initialized(
                "operator configuration has not been published",
            )),
        }
    }
}
