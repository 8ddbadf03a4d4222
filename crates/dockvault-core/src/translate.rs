//! Captured container configuration to engine creation parameters.

use crate::CoreError;
use dockvault_engine::{CreateParams, VolumeSpec};
use dockvault_schema::{env_list_to_map, Mount, MountKind, PortBinding};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The part of a captured configuration that container creation needs.
/// Field names and shapes match the serialized `ContainerSnapshot`, so
/// `container_config.json` deserializes into it directly.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CreationConfig {
    pub image: String,
    pub env: Vec<String>,
    pub mounts: Vec<Mount>,
    pub ports: BTreeMap<String, Option<Vec<PortBinding>>>,
    pub labels: BTreeMap<String, String>,
    pub command: Vec<String>,
}

/// Shallow merge: every top-level key in `overrides` replaces the one in `base`.
pub fn merge_overrides(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
}

fn volume_spec(mount: &Mount) -> Option<VolumeSpec> {
    let source = match mount.kind {
        MountKind::Bind => mount.source.clone(),
        MountKind::Volume => mount.name.clone().unwrap_or_else(|| mount.source.clone()),
        MountKind::Other => return None,
    };
    if source.is_empty() || mount.destination.is_empty() {
        return None;
    }
    Some(VolumeSpec {
        source,
        target: mount.destination.clone(),
        mode: "rw".to_owned(),
    })
}

/// First binding with a concrete host port; unbound exposures are dropped.
fn host_port(bindings: Option<&Vec<PortBinding>>) -> Option<u16> {
    bindings?
        .iter()
        .filter(|b| !b.host_port.is_empty())
        .find_map(|b| b.host_port.parse().ok())
}

/// Build creation parameters for a container called `name` from a
/// configuration document (captured config with overrides already merged).
pub fn creation_params(doc: &Map<String, Value>, name: &str) -> Result<CreateParams, CoreError> {
    let config: CreationConfig = serde_json::from_value(Value::Object(doc.clone()))
        .map_err(|e| CoreError::InvalidRequest(format!("invalid container configuration: {e}")))?;
    if config.image.is_empty() {
        return Err(CoreError::InvalidRequest(
            "container configuration has no image".to_owned(),
        ));
    }

    let mut volumes = Vec::new();
    for mount in &config.mounts {
        match volume_spec(mount) {
            Some(spec) => volumes.push(spec),
            None => tracing::debug!("not restoring mount at {}", mount.destination),
        }
    }

    let ports = config
        .ports
        .iter()
        .filter_map(|(container_port, bindings)| {
            host_port(bindings.as_ref()).map(|p| (container_port.clone(), p))
        })
        .collect();

    Ok(CreateParams {
        image: config.image,
        name: name.to_owned(),
        env: env_list_to_map(&config.env),
        volumes,
        ports,
        labels: config.labels,
        command: config.command,
    })
}
