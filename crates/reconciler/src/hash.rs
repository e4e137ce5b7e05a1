//! Content hash of the workload-relevant subset of an instance spec.
//!
//! The subset is encoded with bincode's standard configuration and digested
//! with SHA-256, so the value is stable across processes and restarts.
//! Maps are ordered, never randomized.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use bincode::config;
use serde::Serialize;
use sha2::{Digest, Sha256};

use slumber_core::{Flavor, InstanceSpec, Mod};

use crate::error::Error;

/// Number of digest bytes kept in the rendered hash.
const HASH_BYTES: usize = 16;

/// Fields that change what the workload runs.
///
/// `enabled` is reflected in replicas, `idle_timeout_seconds` only drives the
/// idle controller and `display_name` is cosmetic, so none of them roll the
/// workload.
#[derive(Serialize)]
struct HashedSpec<'a> {
    image: &'a str,
    version: &'a str,
    flavor: Flavor,
    jar_site: &'a str,
    host_path: Option<&'a str>,
    world_path: &'a str,
    mods: &'a [Mod],
    max_memory_mb: u32,
    init_memory_mb: u32,
    host_port: Option<u16>,
    properties: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a InstanceSpec> for HashedSpec<'a> {
    fn from(spec: &'a InstanceSpec) -> Self {
        Self {
            image: &spec.image,
            version: &spec.version,
            flavor: spec.flavor,
            jar_site: &spec.jar_site,
            host_path: spec.host_path.as_deref(),
            world_path: &spec.world_path,
            mods: &spec.mods,
            max_memory_mb: spec.max_memory_mb,
            init_memory_mb: spec.init_memory_mb,
            host_port: spec.host_port,
            properties: &spec.properties,
        }
    }
}

/// Hash the workload-relevant subset of `spec`.
///
/// Returns the first 16 bytes of the SHA-256 digest as lowercase hex.
///
/// # Errors
///
/// Returns [`Error::Encode`] if the subset cannot be serialized.
pub fn content_hash(spec: &InstanceSpec) -> Result<String, Error> {
    let bytes = bincode::serde::encode_to_vec(HashedSpec::from(spec), config::standard())?;
    let digest = Sha256::digest(&bytes);

    Ok(digest
        .iter()
        .take(HASH_BYTES)
        .fold(String::with_capacity(HASH_BYTES * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base_spec() -> InstanceSpec {
        InstanceSpec::new("eclipse-temurin:21", 2048, 1024).with_property("motd", "hello")
    }

    #[test]
    fn test_hash_shape() -> Result<(), Box<dyn std::error::Error>> {
        let hash = content_hash(&base_spec())?;
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        Ok(())
    }

    #[test]
    fn test_excluded_fields_do_not_change_hash() -> Result<(), Box<dyn std::error::Error>> {
        let spec = base_spec();
        let mut cosmetic = spec.clone().with_enabled(true).with_idle_timeout(600);
        cosmetic.display_name = Some("The Lobby".to_string());

        assert_eq!(content_hash(&spec)?, content_hash(&cosmetic)?);
        Ok(())
    }

    #[test]
    fn test_property_change_changes_hash() -> Result<(), Box<dyn std::error::Error>> {
        let spec = base_spec();
        let changed = spec.clone().with_property("motd", "goodbye");
        assert_ne!(content_hash(&spec)?, content_hash(&changed)?);
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(image in "[a-z0-9:./-]{1,40}", max in 1u32..65536) {
            let spec = InstanceSpec::new(image, max, 1);
            let first = content_hash(&spec);
            let second = content_hash(&spec.clone());
            prop_assert!(first.is_ok());
            prop_assert_eq!(first.ok(), second.ok());
        }

        #[test]
        fn prop_relevant_field_changes_hash(
            image in "[a-z]{1,20}",
            other in "[a-z]{1,20}",
            port in 1u16..,
        ) {
            prop_assume!(image != other);
            let spec = InstanceSpec::new(image, 2048, 1024);
            let mut renamed = spec.clone();
            renamed.image = other;
            let mut ported = spec.clone();
            ported.host_port = Some(port);

            prop_assert_ne!(content_hash(&spec).ok(), content_hash(&renamed).ok());
            prop_assert_ne!(content_hash(&spec).ok(), content_hash(&ported).ok());
        }

        #[test]
        fn prop_irrelevant_field_keeps_hash(timeout in any::<i64>(), name in ".{0,30}") {
            let spec = base_spec();
            let mut touched = spec.clone().with_idle_timeout(timeout);
            touched.display_name = Some(name);
            prop_assert_eq!(content_hash(&spec).ok(), content_hash(&touched).ok());
        }
    }
}
