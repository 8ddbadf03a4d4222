use crate::EngineError;
use dockvault_schema::{ContainerId, ContainerSnapshot, ContainerStatus, ImageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: ImageId,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ImageSummary {
    /// No repo tag, or only the `<none>:<none>` placeholder.
    pub fn is_untagged(&self) -> bool {
        self.tags.iter().all(|t| t == "<none>:<none>")
    }

    /// What a user would type to refer to this image.
    pub fn reference(&self) -> &str {
        self.tags
            .iter()
            .find(|t| *t != "<none>:<none>")
            .map_or(self.id.as_str(), String::as_str)
    }
}

/// A volume or bind specification in engine terms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct VolumeSpec {
    /// Host path for a bind mount, volume name for a named volume.
    pub source: String,
    pub target: String,
    /// `rw` or `ro`.
    pub mode: String,
}

impl VolumeSpec {
    pub fn is_bind(&self) -> bool {
        self.source.starts_with('/')
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateParams {
    pub image: String,
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    /// Container port (`"80/tcp"`) to host port.
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Vec<String>,
}

/// Narrow view of a container engine: only what backup and restore need.
///
/// Every call may be slow and every call may fail; implementations must not
/// cache container state between calls.
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`EngineError::Unavailable`] when the engine cannot be reached.
    fn ping(&self) -> Result<(), EngineError>;

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, EngineError>;

    /// Look up a container by exact name or id (a unique id prefix also
    /// matches). `Ok(None)` when nothing matches.
    fn find_container(&self, name_or_id: &str) -> Result<Option<ContainerSummary>, EngineError>;

    /// Freshly reloaded description of a container.
    fn inspect(&self, name_or_id: &str) -> Result<ContainerSnapshot, EngineError>;

    /// Stream the container's filesystem as an uncompressed tar. Returns bytes written.
    fn export_filesystem(&self, id: &str, out: &mut dyn Write) -> Result<u64, EngineError>;

    /// The last `tail` lines of output, with timestamps.
    fn logs(&self, id: &str, tail: usize) -> Result<String, EngineError>;

    fn start(&self, id: &str) -> Result<(), EngineError>;

    fn stop(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    fn create(&self, params: &CreateParams) -> Result<ContainerId, EngineError>;

    fn remove(&self, id: &str, force: bool) -> Result<(), EngineError>;

    /// `Ok(None)` when no image matches `reference` (tag or id).
    fn get_image(&self, reference: &str) -> Result<Option<ImageSummary>, EngineError>;

    /// Stream an image as a `docker save`-style tar. Returns bytes written.
    fn save_image(&self, reference: &str, out: &mut dyn Write) -> Result<u64, EngineError>;

    /// Load images from a `docker save`-style tar. The engine does not say
    /// which image it loaded, and may or may not keep the original tags.
    fn load_image(&self, input: &mut dyn Read) -> Result<(), EngineError>;

    fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError>;

    fn tag_image(&self, image: &str, reference: &str) -> Result<(), EngineError>;

    /// Extract a tar stream into the container's filesystem at `path`
    /// (whole-tree overlay, paths preserved).
    fn put_archive(&self, id: &str, path: &str, tar: &mut dyn Read) -> Result<(), EngineError>;
}

pub fn select_engine(
    name: &str,
    command: &str,
    timeout: Duration,
) -> Result<Box<dyn ContainerEngine>, EngineError> {
    match name {
        "docker" => Ok(Box::new(crate::docker::DockerCliEngine::new(command, timeout))),
        "mock" => Ok(Box::new(crate::mock::MockEngine::new())),
        other => Err(EngineError::UnknownEngine(other.to_owned())),
    }
}
