use crate::types::ContainerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status as reported by the engine at capture time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ContainerStatus {
    pub fn parse(s: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .unwrap_or(ContainerStatus::Unknown)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    /// tmpfs, npipe, cluster: captured for the record, never restored.
    #[serde(other)]
    Other,
}

/// One entry of the container's mount list.
///
/// Field names follow the engine's inspect output so a raw `Mounts` array
/// deserializes directly into `Vec<Mount>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mount {
    #[serde(rename = "Type")]
    pub kind: MountKind,
    /// Volume name; only set for named volumes.
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "RW", default = "default_rw")]
    pub read_write: bool,
}

fn default_rw() -> bool {
    true
}

impl Mount {
    pub fn bind(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            name: None,
            source: source.into(),
            destination: destination.into(),
            read_write: true,
        }
    }

    pub fn volume(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            name: Some(name.into()),
            source: String::new(),
            destination: destination.into(),
            read_write: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort", default)]
    pub host_port: String,
}

/// Point-in-time description of a container, captured from a fresh inspect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub id: ContainerId,
    #[serde(default)]
    pub short_id: String,
    pub name: String,
    #[serde(default)]
    pub status: ContainerStatus,
    /// First repo tag of the container's image, or the raw image id when untagged.
    pub image: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub started: Option<String>,
    /// Container port (`"80/tcp"`) to host bindings; `None` when exposed but unbound.
    #[serde(default)]
    pub ports: BTreeMap<String, Option<Vec<PortBinding>>>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// `KEY=VALUE` strings exactly as the engine reports them.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
}

impl ContainerSnapshot {
    /// Environment list as a map, split on the first `=`. Entries without
    /// `=` carry no value and are dropped.
    pub fn env_map(&self) -> BTreeMap<String, String> {
        env_list_to_map(&self.env)
    }

    /// Number of container ports that have at least one concrete host port.
    pub fn bound_port_count(&self) -> usize {
        self.ports
            .values()
            .filter(|b| {
                b.as_ref()
                    .is_some_and(|list| list.iter().any(|p| !p.host_port.is_empty()))
            })
            .count()
    }
}

pub fn env_list_to_map(env: &[String]) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}
