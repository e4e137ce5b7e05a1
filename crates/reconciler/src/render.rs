//! Desired-state renderer: spec plus operator configuration in, one canonical
//! dependent per kind out.
//!
//! Rendering is pure. Invalid spec values become `Render` errors for the kind
//! they affect; kinds that depend on a failed kind are not rendered at all.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use itertools::Itertools;

use slumber_core::{
    APP_LABEL, CONFIG_HASH_ANNOTATION, ClaimSpec, ConfigBundleSpec, DependentResource,
    EndpointSpec, Error, Instance, InstanceSpec, Mount, MountSource, ObjectMeta, OperatorConfig,
    ResourceBody, ResourceKind, Result, SERVICE_PORT, VolumeSpec, WorkloadSpec,
};

use crate::hash::content_hash;
use crate::types::DesiredSet;

const DATA_DIR: &str = "/data";
const CONFIG_DIR: &str = "/config";
const SERVER_JARS_DIR: &str = "/jars/server";
const MOD_JARS_DIR: &str = "/jars/mods";

/// Config bundle entry names.
pub const EULA_FILE: &str = "eula.txt";
pub const PROPERTIES_FILE: &str = "server.properties";
pub const INIT_SCRIPT_FILE: &str = "init.sh";

/// Renders the dependents of an instance against one operator configuration.
#[derive(Debug, Clone)]
pub struct Renderer {
    config: Arc<OperatorConfig>,
}

impl Renderer {
    /// Create a renderer for the given operator configuration.
    #[must_use]
    pub const fn new(config: Arc<OperatorConfig>) -> Self {
        Self { config }
    }

    /// Render every kind, in dependency order.
    #[must_use]
    pub fn render(&self, instance: &Instance) -> DesiredSet {
        let hash = content_hash(&instance.spec).map_err(Error::from);
        let mut resources: BTreeMap<ResourceKind, Result<DependentResource>> = BTreeMap::new();

        for kind in ResourceKind::ALL {
            let blocked = kind
                .prerequisites()
                .iter()
                .find(|prereq| !matches!(resources.get(*prereq), Some(Ok(_))));

            let rendered = match blocked {
                Some(prereq) => Err(Error::render(
                    kind,
                    format!("prerequisite {prereq} did not render"),
                )),
                None => self.render_kind(kind, instance, hash.as_ref()),
            };
            resources.insert(kind, rendered);
        }

        DesiredSet::new(hash.ok(), resources)
    }

    fn render_kind(
        &self,
        kind: ResourceKind,
        instance: &Instance,
        hash: std::result::Result<&String, &Error>,
    ) -> Result<DependentResource> {
        match kind {
            ResourceKind::Volume => self.volume(instance),
            ResourceKind::VolumeClaim => Ok(self.claim(instance)),
            ResourceKind::ConfigBundle => config_bundle(instance),
            ResourceKind::Workload => {
                let hash = hash.map_err(Clone::clone)?;
                self.workload(instance, hash)
            }
            ResourceKind::NetworkEndpoint => Ok(endpoint(instance)),
        }
    }

    fn volume(&self, instance: &Instance) -> Result<DependentResource> {
        let template = &self.config.volume_template;
        let path = match instance.spec.host_path.as_deref() {
            Some(path) if path.starts_with('/') => path.to_string(),
            Some(path) => {
                return Err(Error::render(
                    ResourceKind::Volume,
                    format!("hostPath {path:?} must be absolute"),
                ));
            }
            None => format!(
                "{}/{}",
                template.base_path.trim_end_matches('/'),
                volume_name(instance)
            ),
        };

        Ok(DependentResource::new(
            ObjectMeta::owned_by(&instance.id, volume_name(instance)),
            ResourceBody::Volume(VolumeSpec {
                storage_class: template.storage_class.clone(),
                capacity: template.capacity.clone(),
                path,
                access_mode: template.access_mode,
                reclaim_policy: template.reclaim_policy,
            }),
        ))
    }

    fn claim(&self, instance: &Instance) -> DependentResource {
        let template = &self.config.volume_template;
        DependentResource::new(
            ObjectMeta::owned_by(&instance.id, instance.id.name.clone()),
            ResourceBody::VolumeClaim(ClaimSpec {
                volume_name: volume_name(instance),
                storage_class: template.storage_class.clone(),
                capacity: template.capacity.clone(),
                access_mode: template.access_mode,
            }),
        )
    }

    fn workload(&self, instance: &Instance, hash: &str) -> Result<DependentResource> {
        let spec = &instance.spec;
        validate_memory(spec)?;

        let name = instance.id.name.clone();
        let mut meta = ObjectMeta::owned_by(&instance.id, name.clone());
        meta.annotations
            .insert(CONFIG_HASH_ANNOTATION.to_string(), hash.to_string());

        let world = Mount {
            source: MountSource::Claim(name.clone()),
            mount_path: DATA_DIR.to_string(),
            sub_path: None,
        };
        let init_mounts = vec![
            world.clone(),
            Mount {
                source: MountSource::Claim(self.config.server_jars_claim.clone()),
                mount_path: SERVER_JARS_DIR.to_string(),
                sub_path: None,
            },
            Mount {
                source: MountSource::Claim(self.config.mod_jars_claim.clone()),
                mount_path: MOD_JARS_DIR.to_string(),
                sub_path: None,
            },
            Mount {
                source: MountSource::ConfigBundle(name.clone()),
                mount_path: CONFIG_DIR.to_string(),
                sub_path: None,
            },
        ];

        Ok(DependentResource::new(
            meta,
            ResourceBody::Workload(WorkloadSpec {
                replicas: u32::from(spec.enabled),
                image: spec.image.clone(),
                command: vec![
                    "java".to_string(),
                    format!("-Xmx{}M", spec.max_memory_mb),
                    format!("-Xms{}M", spec.init_memory_mb),
                    "-jar".to_string(),
                    "server.jar".to_string(),
                ],
                init_image: self.config.init_image.clone(),
                init_command: vec![
                    "sh".to_string(),
                    format!("{CONFIG_DIR}/{INIT_SCRIPT_FILE}"),
                ],
                container_port: SERVICE_PORT,
                host_port: spec.host_port,
                init_mounts,
                mounts: vec![world],
                working_dir: DATA_DIR.to_string(),
                selector: app_selector(instance),
            }),
        ))
    }
}

fn volume_name(instance: &Instance) -> String {
    format!("{}-{}", instance.id.namespace, instance.id.name)
}

fn app_selector(instance: &Instance) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), instance.id.app_label())])
}

fn endpoint(instance: &Instance) -> DependentResource {
    DependentResource::new(
        ObjectMeta::owned_by(&instance.id, instance.id.name.clone()),
        ResourceBody::NetworkEndpoint(EndpointSpec {
            port: SERVICE_PORT,
            target_port: SERVICE_PORT,
            selector: app_selector(instance),
        }),
    )
}

fn validate_memory(spec: &InstanceSpec) -> Result<()> {
    if spec.max_memory_mb == 0 || spec.init_memory_mb == 0 {
        return Err(Error::render(
            ResourceKind::Workload,
            "memory limits must be positive",
        ));
    }
    if spec.init_memory_mb > spec.max_memory_mb {
        return Err(Error::render(
            ResourceKind::Workload,
            format!(
                "initMemoryMB ({}) exceeds maxMemoryMB ({})",
                spec.init_memory_mb, spec.max_memory_mb
            ),
        ));
    }
    Ok(())
}

fn config_bundle(instance: &Instance) -> Result<DependentResource> {
    let spec = &instance.spec;
    let data = BTreeMap::from([
        (EULA_FILE.to_string(), "eula=true\n".to_string()),
        (PROPERTIES_FILE.to_string(), server_properties(spec)?),
        (INIT_SCRIPT_FILE.to_string(), init_script(spec)?),
    ]);

    Ok(DependentResource::new(
        ObjectMeta::owned_by(&instance.id, instance.id.name.clone()),
        ResourceBody::ConfigBundle(ConfigBundleSpec { data }),
    ))
}

fn bundle_error(reason: impl Into<String>) -> Error {
    Error::render(ResourceKind::ConfigBundle, reason)
}

/// `key=value` lines sorted by key.
///
/// `level-name` defaults to the world path; `server-port` is always the
/// service port so the prober can reach it.
fn server_properties(spec: &InstanceSpec) -> Result<String> {
    let mut properties = BTreeMap::from([("level-name".to_string(), spec.world_path.clone())]);
    for (key, value) in &spec.properties {
        if key.is_empty()
            || key
                .chars()
                .any(|c| c == '=' || c == ':' || c.is_whitespace())
        {
            return Err(bundle_error(format!("invalid property key {key:?}")));
        }
        if value.contains(['\n', '\r']) {
            return Err(bundle_error(format!(
                "value of property {key:?} contains a line break"
            )));
        }
        properties.insert(key.clone(), value.clone());
    }
    properties.insert("server-port".to_string(), SERVICE_PORT.to_string());

    Ok(properties
        .iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .join(""))
}

fn is_plain_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
}

fn is_http_url(value: &str) -> bool {
    (value.starts_with("http://") || value.starts_with("https://"))
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\' | '`' | '$'))
}

/// Shell script run by the init container: fetches jars into the shared
/// claims once, then copies them and the config files into the world volume.
fn init_script(spec: &InstanceSpec) -> Result<String> {
    if !is_plain_token(&spec.version) {
        return Err(bundle_error(format!("invalid version {:?}", spec.version)));
    }
    if !is_http_url(&spec.jar_site) {
        return Err(bundle_error(format!(
            "jarSite {:?} is not an http(s) URL",
            spec.jar_site
        )));
    }

    let flavor = spec.flavor.as_str();
    let server_jar = format!("{SERVER_JARS_DIR}/{flavor}-{}.jar", spec.version);
    let server_url = format!(
        "{}/{flavor}/server-{}.jar",
        spec.jar_site.trim_end_matches('/'),
        spec.version
    );

    let mut script = String::from("#!/bin/sh\nset -eu\n");
    let _ = writeln!(script, "mkdir -p {DATA_DIR}/mods");
    push_fetch(&mut script, &server_jar, &server_url);
    let _ = writeln!(script, "cp '{server_jar}' {DATA_DIR}/server.jar");

    for m in &spec.mods {
        if !is_plain_token(&m.name) || !is_plain_token(&m.version) {
            return Err(bundle_error(format!(
                "mod {:?} needs a plain name and version",
                m.name
            )));
        }
        if !is_http_url(&m.url) {
            return Err(bundle_error(format!(
                "mod {:?} url {:?} is not an http(s) URL",
                m.name, m.url
            )));
        }
        let jar = format!("{MOD_JARS_DIR}/{}-{}.jar", m.name, m.version);
        push_fetch(&mut script, &jar, &m.url);
        let _ = writeln!(script, "cp '{jar}' {DATA_DIR}/mods/");
    }

    let _ = writeln!(
        script,
        "cp {CONFIG_DIR}/{EULA_FILE} {CONFIG_DIR}/{PROPERTIES_FILE} {DATA_DIR}/"
    );
    Ok(script)
}

fn push_fetch(script: &mut String, target: &str, url: &str) {
    let _ = writeln!(
        script,
        "[ -f '{target}' ] || wget -q -O '{target}' '{url}'"
    );
}
