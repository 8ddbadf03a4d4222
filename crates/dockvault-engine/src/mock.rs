use crate::backend::{ContainerEngine, ContainerSummary, CreateParams, ImageSummary};
use crate::EngineError;
use dockvault_schema::{
    ContainerId, ContainerSnapshot, ContainerStatus, ImageId, Mount, PortBinding,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Engine calls that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Ping,
    Inspect,
    Export,
    Logs,
    SaveImage,
    LoadImage,
    Tag,
    Create,
    Start,
    PutArchive,
    Remove,
}

#[derive(Debug, Clone)]
struct MockContainer {
    snapshot: ContainerSnapshot,
    files: BTreeMap<String, Vec<u8>>,
    logs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockImage {
    id: ImageId,
    tags: Vec<String>,
}

#[derive(Default)]
struct MockState {
    containers: Vec<MockContainer>,
    images: Vec<MockImage>,
    failures: HashSet<FailPoint>,
    drop_tags_on_load: bool,
    mutations: usize,
    next_id: u64,
}

impl MockState {
    fn container(&self, name_or_id: &str) -> Option<&MockContainer> {
        self.containers.iter().find(|c| refers_to(&c.snapshot, name_or_id))
    }

    fn container_mut(&mut self, name_or_id: &str) -> Option<&mut MockContainer> {
        self.containers
            .iter_mut()
            .find(|c| refers_to(&c.snapshot, name_or_id))
    }

    fn image(&self, reference: &str) -> Option<&MockImage> {
        self.images
            .iter()
            .find(|i| i.id == reference || i.tags.iter().any(|t| t == reference))
    }

    fn fresh_id(&mut self, seed: &str) -> String {
        self.next_id += 1;
        blake3::hash(format!("{seed}:{}", self.next_id).as_bytes())
            .to_hex()
            .to_string()
    }

    fn check(&self, point: FailPoint) -> Result<(), EngineError> {
        if !self.failures.contains(&point) {
            return Ok(());
        }
        if point == FailPoint::Ping {
            return Err(EngineError::Unavailable("injected failure".to_owned()));
        }
        Err(EngineError::CommandFailed {
            command: format!("mock {point:?}"),
            status: Some(1),
            stderr: "injected failure".to_owned(),
        })
    }
}

fn refers_to(snapshot: &ContainerSnapshot, name_or_id: &str) -> bool {
    snapshot.name == name_or_id
        || snapshot.id == name_or_id
        || (name_or_id.len() >= 4 && snapshot.id.starts_with(name_or_id))
}

fn summary(snapshot: &ContainerSnapshot) -> ContainerSummary {
    ContainerSummary {
        id: snapshot.id.clone(),
        name: snapshot.name.clone(),
        image: snapshot.image.clone(),
        status: snapshot.status,
    }
}

/// Strip `./` and `/` prefixes so tar paths and container paths agree.
fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_start_matches('/').to_owned()
}

/// In-memory engine for tests.
///
/// Containers carry a flat file map that `export_filesystem` renders as a tar
/// and `put_archive` extracts into. Saved images are small JSON documents;
/// loading one registers the image, with or without its tags depending on
/// [`set_drop_tags_on_load`](Self::set_drop_tags_on_load).
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, EngineError> {
        self.state
            .lock()
            .map_err(|e| EngineError::Unavailable(format!("mutex poisoned: {e}")))
    }

    fn guard(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a container. An empty `snapshot.id` gets a generated one.
    pub fn add_container(&self, mut snapshot: ContainerSnapshot, files: &[(&str, &[u8])]) -> ContainerId {
        let mut state = self.guard();
        if snapshot.id.is_empty() {
            snapshot.id = ContainerId::new(state.fresh_id(&snapshot.name));
        }
        snapshot.short_id = snapshot.id.short().to_owned();
        let id = snapshot.id.clone();
        let logs = format!("2025-01-01T00:00:00Z {} started\n", snapshot.name);
        state.containers.push(MockContainer {
            snapshot,
            files: files
                .iter()
                .map(|(p, d)| (normalize(p), d.to_vec()))
                .collect(),
            logs,
        });
        id
    }

    /// Register an image and return its id.
    pub fn add_image(&self, tags: &[&str]) -> ImageId {
        let mut state = self.guard();
        let seed = tags.join(",");
        let id = ImageId::new(format!("sha256:{}", state.fresh_id(&seed)));
        state.images.push(MockImage {
            id: id.clone(),
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        });
        id
    }

    pub fn remove_image(&self, reference: &str) {
        let mut state = self.guard();
        state
            .images
            .retain(|i| i.id != reference && !i.tags.iter().any(|t| t == reference));
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.guard().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.guard().failures.clear();
    }

    /// Simulate engines that load saved images without their repo tags.
    pub fn set_drop_tags_on_load(&self, drop_tags: bool) {
        self.guard().drop_tags_on_load = drop_tags;
    }

    pub fn container_names(&self) -> Vec<String> {
        self.guard()
            .containers
            .iter()
            .map(|c| c.snapshot.name.clone())
            .collect()
    }

    pub fn container_files(&self, name_or_id: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.guard().container(name_or_id).map(|c| c.files.clone())
    }

    pub fn set_logs(&self, name_or_id: &str, logs: &str) {
        if let Some(c) = self.guard().container_mut(name_or_id) {
            c.logs = logs.to_owned();
        }
    }

    /// Number of state-changing calls served so far.
    pub fn mutation_count(&self) -> usize {
        self.guard().mutations
    }
}

impl ContainerEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn ping(&self) -> Result<(), EngineError> {
        self.lock()?.check(FailPoint::Ping)
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, EngineError> {
        let state = self.lock()?;
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.snapshot.status == ContainerStatus::Running)
            .map(|c| summary(&c.snapshot))
            .collect())
    }

    fn find_container(&self, name_or_id: &str) -> Result<Option<ContainerSummary>, EngineError> {
        let state = self.lock()?;
        Ok(state.container(name_or_id).map(|c| summary(&c.snapshot)))
    }

    fn inspect(&self, name_or_id: &str) -> Result<ContainerSnapshot, EngineError> {
        let state = self.lock()?;
        state.check(FailPoint::Inspect)?;
        state
            .container(name_or_id)
            .map(|c| c.snapshot.clone())
            .ok_or_else(|| EngineError::ContainerNotFound(name_or_id.to_owned()))
    }

    fn export_filesystem(&self, id: &str, out: &mut dyn Write) -> Result<u64, EngineError> {
        let files = {
            let state = self.lock()?;
            state.check(FailPoint::Export)?;
            state
                .container(id)
                .map(|c| c.files.clone())
                .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?
        };
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in &files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_slice())?;
        }
        let bytes = builder.into_inner()?;
        out.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    fn logs(&self, id: &str, tail: usize) -> Result<String, EngineError> {
        let state = self.lock()?;
        state.check(FailPoint::Logs)?;
        let c = state
            .container(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?;
        let lines: Vec<&str> = c.logs.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].iter().map(|l| format!("{l}\n")).collect())
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.check(FailPoint::Start)?;
        let c = state
            .container_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?;
        c.snapshot.status = ContainerStatus::Running;
        Ok(())
    }

    fn stop(&self, id: &str, _timeout: Duration) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let c = state
            .container_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?;
        c.snapshot.status = ContainerStatus::Exited;
        Ok(())
    }

    fn create(&self, params: &CreateParams) -> Result<ContainerId, EngineError> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.check(FailPoint::Create)?;
        if state.container(&params.name).is_some() {
            return Err(EngineError::Conflict(format!(
                "container name \"/{}\" is already in use",
                params.name
            )));
        }
        let image = state
            .image(&params.image)
            .ok_or_else(|| EngineError::ImageNotFound(params.image.clone()))?
            .clone();

        let mounts = params
            .volumes
            .iter()
            .map(|v| {
                let mut mount = if v.is_bind() {
                    Mount::bind(&v.source, &v.target)
                } else {
                    Mount::volume(&v.source, &v.target)
                };
                mount.read_write = v.mode != "ro";
                mount
            })
            .collect();
        let ports = params
            .ports
            .iter()
            .map(|(container_port, host_port)| {
                (
                    container_port.clone(),
                    Some(vec![PortBinding {
                        host_ip: "0.0.0.0".to_owned(),
                        host_port: host_port.to_string(),
                    }]),
                )
            })
            .collect();

        let id = ContainerId::new(state.fresh_id(&params.name));
        let snapshot = ContainerSnapshot {
            short_id: id.short().to_owned(),
            id: id.clone(),
            name: params.name.clone(),
            status: ContainerStatus::Created,
            // mirror what inspect reports: the reference the container was created from
            image: if params.image == image.id.as_str() {
                image.tags.first().cloned().unwrap_or(params.image.clone())
            } else {
                params.image.clone()
            },
            ports,
            mounts,
            env: params.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels: params.labels.clone(),
            command: params.command.clone(),
            networks: vec!["bridge".to_owned()],
            ..Default::default()
        };
        state.containers.push(MockContainer {
            snapshot,
            files: BTreeMap::new(),
            logs: String::new(),
        });
        Ok(id)
    }

    fn remove(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.check(FailPoint::Remove)?;
        let pos = state
            .containers
            .iter()
            .position(|c| refers_to(&c.snapshot, id))
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?;
        if state.containers[pos].snapshot.status == ContainerStatus::Running && !force {
            return Err(EngineError::Conflict(format!("container {id} is running")));
        }
        state.containers.remove(pos);
        Ok(())
    }

    fn get_image(&self, reference: &str) -> Result<Option<ImageSummary>, EngineError> {
        let state = self.lock()?;
        Ok(state.image(reference).map(|i| ImageSummary {
            id: i.id.clone(),
            tags: i.tags.clone(),
        }))
    }

    fn save_image(&self, reference: &str, out: &mut dyn Write) -> Result<u64, EngineError> {
        let state = self.lock()?;
        state.check(FailPoint::SaveImage)?;
        let image = state
            .image(reference)
            .ok_or_else(|| EngineError::ImageNotFound(reference.to_owned()))?;
        let bytes = serde_json::to_vec(image).map_err(|e| EngineError::Parse(e.to_string()))?;
        out.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    fn load_image(&self, input: &mut dyn Read) -> Result<(), EngineError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let mut state = self.lock()?;
        state.mutations += 1;
        state.check(FailPoint::LoadImage)?;
        let mut loaded: MockImage = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Parse(format!("invalid image archive: {e}")))?;
        if state.drop_tags_on_load {
            loaded.tags.clear();
        }
        match state.images.iter_mut().find(|i| i.id == loaded.id) {
            Some(existing) => {
                for tag in loaded.tags {
                    if !existing.tags.contains(&tag) {
                        existing.tags.push(tag);
                    }
                }
            }
            None => {
                // a tag moves to the newly loaded image, as with a real engine
                for other in &mut state.images {
                    other.tags.retain(|t| !loaded.tags.contains(t));
                }
                state.images.push(loaded);
            }
        }
        Ok(())
    }

    fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        let state = self.lock()?;
        Ok(state
            .images
            .iter()
            .map(|i| ImageSummary {
                id: i.id.clone(),
                tags: i.tags.clone(),
            })
            .collect())
    }

    fn tag_image(&self, image: &str, reference: &str) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.check(FailPoint::Tag)?;
        if state.image(image).is_none() {
            return Err(EngineError::ImageNotFound(image.to_owned()));
        }
        for other in &mut state.images {
            other.tags.retain(|t| t != reference);
        }
        if let Some(target) = state
            .images
            .iter_mut()
            .find(|i| i.id == image || i.tags.iter().any(|t| t == image))
        {
            target.tags.push(reference.to_owned());
        }
        Ok(())
    }

    fn put_archive(&self, id: &str, path: &str, tar: &mut dyn Read) -> Result<(), EngineError> {
        let mut bytes = Vec::new();
        tar.read_to_end(&mut bytes)?;
        let mut state = self.lock()?;
        state.mutations += 1;
        state.check(FailPoint::PutArchive)?;

        let mut extracted = Vec::new();
        let mut archive = tar::Archive::new(bytes.as_slice());
        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let rel = normalize(&entry.path()?.to_string_lossy());
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            let base = normalize(path);
            let full = if base.is_empty() {
                rel
            } else {
                format!("{base}/{rel}")
            };
            extracted.push((full, data));
        }

        let c = state
            .container_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?;
        c.files.extend(extracted);
        Ok(())
    }
}
