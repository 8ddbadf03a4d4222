use crate::concurrency::{CancelFlag, JobSlots, OperationLocks};
use crate::image::{image_ids, resolve_loaded_image};
use crate::progress::ProgressSink;
use crate::settings::Settings;
use crate::translate::{creation_params, merge_overrides};
use crate::CoreError;
use dockvault_engine::ContainerEngine;
use dockvault_schema::{
    BackupId, BackupRecord, BackupType, ContainerId, CONFIG_ARTIFACT, FILESYSTEM_ARTIFACT,
    IMAGE_ARTIFACT,
};
use dockvault_store::{
    decompress_file, gzip_reader, validate_tar, verify_artifacts, BackupLayout, IntegrityReport,
    RecordStore,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Which backup to restore and how.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRequest {
    pub backup_id: String,
    /// Target container name; defaults to the captured one.
    pub new_name: Option<String>,
    /// Top-level keys replacing those of the captured configuration.
    pub overrides: Map<String, Value>,
    pub start: bool,
    /// Re-check artifact digests before touching the engine.
    pub verify: bool,
}

impl RestoreRequest {
    pub fn new(backup_id: impl Into<String>) -> Self {
        Self {
            backup_id: backup_id.into(),
            new_name: None,
            overrides: Map::new(),
            start: true,
            verify: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.new_name = Some(name.into());
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    pub fn with_start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// `new_name`, then a string `name` override, then the captured name.
    pub fn target_name(&self, record: &BackupRecord) -> Result<String, CoreError> {
        let name = self
            .new_name
            .clone()
            .or_else(|| {
                self.overrides
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| record.container_name.clone());
        if name.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "target container name is empty".to_owned(),
            ));
        }
        Ok(name)
    }
}

/// Result of a restore that produced a container. Anything that went wrong
/// without preventing that is listed in `warnings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub container_id: ContainerId,
    pub container_name: String,
    pub backup_id: BackupId,
    pub image: String,
    pub started: bool,
    pub warnings: Vec<String>,
}

impl RestoreOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Read-only summary shown before committing to a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestorePreview {
    pub backup_id: BackupId,
    pub backup_type: BackupType,
    pub timestamp: String,
    pub container_name: String,
    pub image: String,
    pub size: String,
    pub environment_variables: usize,
    pub volumes: usize,
    pub ports: usize,
    pub networks: Vec<String>,
    pub files_included: Vec<String>,
    /// Every listed artifact is present and the record is well-formed.
    /// Digests are not checked here.
    pub valid: bool,
}

/// Turns backup directories back into containers.
pub struct RestoreManager {
    engine: Arc<dyn ContainerEngine>,
    store: RecordStore,
    locks: OperationLocks,
    slots: JobSlots,
    image_load: Mutex<()>,
}

impl RestoreManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, layout: BackupLayout) -> Self {
        Self {
            engine,
            locks: OperationLocks::new(layout.clone()),
            store: RecordStore::new(layout),
            slots: JobSlots::default(),
            image_load: Mutex::new(()),
        }
    }

    pub fn from_settings(engine: Arc<dyn ContainerEngine>, settings: &Settings) -> Self {
        Self::new(engine, BackupLayout::new(&settings.general.backup_dir))
            .with_job_slots(JobSlots::new(settings.general.max_concurrent_jobs))
    }

    pub fn with_job_slots(mut self, slots: JobSlots) -> Self {
        self.slots = slots;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn restore_container(&self, request: &RestoreRequest) -> Result<RestoreOutcome, CoreError> {
        self.restore_container_with(request, &ProgressSink::disabled(), &CancelFlag::new())
    }

    /// Create a container from a backup.
    ///
    /// Fails without touching the engine if the backup is unknown, fails
    /// verification, or the target name is taken. Once a container has been
    /// created, only a `filesystem` restore whose archive cannot be
    /// extracted removes it again; every later problem becomes a warning.
    pub fn restore_container_with(
        &self,
        request: &RestoreRequest,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<RestoreOutcome, CoreError> {
        progress.operation("Reading backup");
        let record = self.store.get(&request.backup_id)?;
        let name = request.target_name(&record)?;
        let _guard = self.locks.try_lock(&name)?;
        let _slot = self.slots.acquire();
        let dir = self.store.layout().backup_dir(&record.backup_id);

        if request.verify {
            progress.operation("Verifying backup");
            if let Some(failure) = verify_artifacts(&dir, &record).first_failure() {
                error!(
                    "refusing to restore {}: {}: {}",
                    record.backup_id, failure.file, failure.kind
                );
                return Err(failure.into());
            }
        }
        progress.percent(5);

        self.engine.ping()?;
        if self.engine.find_container(&name)?.is_some() {
            return Err(CoreError::ContainerExists(name));
        }
        cancel.check()?;

        info!(
            "restoring {} backup {} as {name}",
            record.backup_type, record.backup_id
        );
        let result = match record.backup_type {
            BackupType::Full => self.restore_full(&record, &dir, &name, request, progress, cancel),
            BackupType::Filesystem => {
                self.restore_filesystem(&record, &dir, &name, request, progress, cancel)
            }
        };
        match &result {
            Ok(outcome) => {
                progress.percent(100);
                info!(
                    "restored {} as {} ({})",
                    record.backup_id, outcome.container_name, outcome.container_id
                );
                for w in &outcome.warnings {
                    progress.detail(format!("Warning: {w}"));
                }
            }
            Err(e) => error!("restore of {} failed: {e}", record.backup_id),
        }
        result
    }

    fn restore_full(
        &self,
        record: &BackupRecord,
        dir: &Path,
        name: &str,
        request: &RestoreRequest,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<RestoreOutcome, CoreError> {
        let mut warnings = Vec::new();
        progress.percent(10);

        let image = if record.has_artifact(IMAGE_ARTIFACT) {
            progress.operation("Loading image");
            self.load_image(record, dir, &mut warnings)?
        } else {
            let reference = &record.container_info.image;
            if self.engine.get_image(reference)?.is_none() {
                return Err(CoreError::ImageNotFound(reference.clone()));
            }
            let msg = format!("backup has no saved image; using {reference} from the engine");
            warn!("{msg}");
            warnings.push(msg);
            reference.clone()
        };
        progress.percent(40);
        cancel.check()?;

        progress.operation("Creating container");
        let mut doc = config_document(record, dir)?;
        doc.insert("image".to_owned(), Value::String(image));
        merge_overrides(&mut doc, &request.overrides);
        let params = creation_params(&doc, name)?;
        let id = self.engine.create(&params)?;
        progress.percent(60);

        progress.operation("Restoring filesystem");
        if let Err(e) = self.extract_filesystem(dir, &id) {
            let msg = format!("container kept without its filesystem changes: {e}");
            warn!("{msg}");
            warnings.push(msg);
        }
        progress.percent(85);

        let started = self.start_if_requested(request.start, &id, progress, &mut warnings);
        Ok(RestoreOutcome {
            container_id: id,
            container_name: name.to_owned(),
            backup_id: record.backup_id.clone(),
            image: params.image,
            started,
            warnings,
        })
    }

    fn restore_filesystem(
        &self,
        record: &BackupRecord,
        dir: &Path,
        name: &str,
        request: &RestoreRequest,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<RestoreOutcome, CoreError> {
        let mut warnings = Vec::new();
        let mut doc = Map::new();
        doc.insert(
            "image".to_owned(),
            Value::String(record.container_info.image.clone()),
        );
        merge_overrides(&mut doc, &request.overrides);

        let image = doc
            .get("image")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if image.is_empty() || self.engine.get_image(&image)?.is_none() {
            return Err(CoreError::ImageNotFound(image));
        }
        progress.percent(20);
        cancel.check()?;

        progress.operation("Creating container");
        let params = creation_params(&doc, name)?;
        let id = self.engine.create(&params)?;
        progress.percent(40);

        progress.operation("Restoring filesystem");
        if let Err(e) = self.extract_filesystem(dir, &id) {
            warn!("removing {name} ({id}) after failed filesystem restore");
            if let Err(re) = self.engine.remove(&id, true) {
                error!("could not remove {id}: {re}");
            }
            return Err(e);
        }
        progress.percent(85);

        let started = self.start_if_requested(request.start, &id, progress, &mut warnings);
        Ok(RestoreOutcome {
            container_id: id,
            container_name: name.to_owned(),
            backup_id: record.backup_id.clone(),
            image,
            started,
            warnings,
        })
    }

    /// Load the saved image and work out which reference it now has.
    /// Loads are serialized so the before/after id diff sees one load only.
    fn load_image(
        &self,
        record: &BackupRecord,
        dir: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<String, CoreError> {
        let _loading = self
            .image_load
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = image_ids(self.engine.as_ref())?;
        let mut reader = gzip_reader(&dir.join(IMAGE_ARTIFACT))?;
        self.engine.load_image(&mut reader)?;
        let resolution =
            resolve_loaded_image(self.engine.as_ref(), &record.container_info.image, &before)?;
        debug!(
            "loaded image resolved to {} via {:?}",
            resolution.reference, resolution.step
        );
        warnings.extend(resolution.warnings);
        Ok(resolution.reference)
    }

    fn extract_filesystem(&self, dir: &Path, id: &str) -> Result<(), CoreError> {
        self.try_extract_filesystem(dir, id)
            .map_err(|e| match e {
                CoreError::FilesystemRestore(msg) => CoreError::FilesystemRestore(msg),
                other => CoreError::FilesystemRestore(other.to_string()),
            })
    }

    fn try_extract_filesystem(&self, dir: &Path, id: &str) -> Result<(), CoreError> {
        let staging = tempfile::tempdir()?;
        let tar_path = staging.path().join("filesystem.tar");
        decompress_file(&dir.join(FILESYSTEM_ARTIFACT), &tar_path)?;
        let entries = validate_tar(&tar_path)?;
        debug!("extracting {entries} entries into {id}");
        let mut tar = File::open(&tar_path)?;
        self.engine.put_archive(id, "/", &mut tar)?;
        Ok(())
    }

    fn start_if_requested(
        &self,
        start: bool,
        id: &str,
        progress: &ProgressSink,
        warnings: &mut Vec<String>,
    ) -> bool {
        if !start {
            return false;
        }
        progress.operation("Starting container");
        match self.engine.start(id) {
            Ok(()) => true,
            Err(e) => {
                let msg = format!("container created but not started: {e}");
                warn!("{msg}");
                warnings.push(msg);
                false
            }
        }
    }

    pub fn get_restore_preview(&self, backup_id: &str) -> Result<RestorePreview, CoreError> {
        let record = self.store.get(backup_id)?;
        let dir = self.store.layout().backup_dir(&record.backup_id);
        let valid = record.validate().is_ok() && record.files.iter().all(|f| dir.join(f).is_file());
        let info = &record.container_info;
        Ok(RestorePreview {
            backup_id: record.backup_id.clone(),
            backup_type: record.backup_type,
            timestamp: record.timestamp.clone(),
            container_name: record.container_name.clone(),
            image: info.image.clone(),
            size: record.size_human.clone(),
            environment_variables: info.env.len(),
            volumes: info.mounts.len(),
            ports: info.ports.len(),
            networks: info.networks.clone(),
            files_included: record.files.clone(),
            valid,
        })
    }

    /// Re-hash every artifact. The report lists all failures.
    pub fn verify_backup_integrity(&self, backup_id: &str) -> Result<IntegrityReport, CoreError> {
        let report = self.store.verify(backup_id)?;
        if report.is_ok() {
            info!("backup {backup_id}: {} files verified", report.passed);
        } else {
            for f in &report.failed {
                warn!("backup {backup_id}: {}: {}", f.file, f.kind);
            }
        }
        Ok(report)
    }

    /// Like [`verify_backup_integrity`](Self::verify_backup_integrity) but
    /// turns the first failure into [`CoreError::Integrity`].
    pub fn verify_backup_strict(&self, backup_id: &str) -> Result<IntegrityReport, CoreError> {
        let report = self.verify_backup_integrity(backup_id)?;
        match report.first_failure() {
            Some(failure) => Err(failure.into()),
            None => Ok(report),
        }
    }
}

/// `container_config.json` when present, the embedded snapshot otherwise.
fn config_document(record: &BackupRecord, dir: &Path) -> Result<Map<String, Value>, CoreError> {
    let path = dir.join(CONFIG_ARTIFACT);
    let value = if record.has_artifact(CONFIG_ARTIFACT) && path.is_file() {
        serde_json::from_slice(&fs::read(&path)?)?
    } else {
        debug!("no {CONFIG_ARTIFACT}, using the embedded snapshot");
        serde_json::to_value(&record.container_info)?
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(CoreError::InvalidRequest(format!(
            "{CONFIG_ARTIFACT} is not a JSON object"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupManager, BackupRequest};
    use dockvault_engine::{FailPoint, MockEngine};
    use dockvault_schema::{ContainerSnapshot, ContainerStatus, LOG_ARTIFACT};
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<MockEngine>,
        backups: BackupManager,
        restores: RestoreManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::new());
        engine.add_image(&["redis:7"]);
        engine.add_container(
            ContainerSnapshot {
                name: "cache".to_owned(),
                image: "redis:7".to_owned(),
                status: ContainerStatus::Running,
                env: vec!["MAXMEM=64mb".to_owned()],
                networks: vec!["backend".to_owned()],
                ..Default::default()
            },
            &[("data/dump.rdb", b"REDIS0009")],
        );
        let layout = BackupLayout::new(dir.path());
        Fixture {
            backups: BackupManager::new(engine.clone(), layout.clone()),
            restores: RestoreManager::new(engine.clone(), layout),
            engine,
            _dir: dir,
        }
    }

    #[test]
    fn target_name_precedence() {
        let f = fixture();
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();

        let plain = RestoreRequest::new(record.backup_id.as_str());
        assert_eq!(plain.target_name(&record).unwrap(), "cache");

        let via_override = plain.clone().with_override("name", json!("cache-b"));
        assert_eq!(via_override.target_name(&record).unwrap(), "cache-b");

        let explicit = via_override.with_name("cache-c");
        assert_eq!(explicit.target_name(&record).unwrap(), "cache-c");
    }

    #[test]
    fn full_restore_recreates_container_and_files() {
        let f = fixture();
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();
        let outcome = f
            .restores
            .restore_container(&RestoreRequest::new(record.backup_id.as_str()).with_name("cache2"))
            .unwrap();

        assert!(outcome.is_clean(), "{:?}", outcome.warnings);
        assert!(outcome.started);
        assert_eq!(outcome.image, "redis:7");
        let files = f.engine.container_files("cache2").unwrap();
        assert_eq!(files["data/dump.rdb"], b"REDIS0009");
        let snapshot = f.engine.inspect("cache2").unwrap();
        assert_eq!(snapshot.env_map()["MAXMEM"], "64mb");
        assert_eq!(snapshot.status, ContainerStatus::Running);
    }

    #[test]
    fn no_start_leaves_container_created() {
        let f = fixture();
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();
        let outcome = f
            .restores
            .restore_container(
                &RestoreRequest::new(record.backup_id.as_str())
                    .with_name("cache2")
                    .with_start(false),
            )
            .unwrap();
        assert!(!outcome.started);
        assert_eq!(
            f.engine.inspect("cache2").unwrap().status,
            ContainerStatus::Created
        );
    }

    #[test]
    fn start_failure_is_a_warning() {
        let f = fixture();
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();
        f.engine.fail_on(FailPoint::Start);
        let outcome = f
            .restores
            .restore_container(&RestoreRequest::new(record.backup_id.as_str()).with_name("cache2"))
            .unwrap();
        assert!(!outcome.started);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(f.engine.find_container("cache2").unwrap().is_some());
    }

    #[test]
    fn full_backup_without_saved_image_uses_engine_image() {
        let f = fixture();
        f.engine.fail_on(FailPoint::SaveImage);
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();
        f.engine.clear_failures();

        let outcome = f
            .restores
            .restore_container(&RestoreRequest::new(record.backup_id.as_str()).with_name("cache2"))
            .unwrap();
        assert_eq!(outcome.image, "redis:7");
        assert_eq!(outcome.warnings.len(), 1);

        f.engine.remove_image("redis:7");
        let result = f
            .restores
            .restore_container(&RestoreRequest::new(record.backup_id.as_str()).with_name("cache3"));
        assert!(matches!(result, Err(CoreError::ImageNotFound(_))));
    }

    #[test]
    fn override_image_applies_to_filesystem_restore() {
        let f = fixture();
        f.engine.add_image(&["redis:7.2"]);
        let record = f
            .backups
            .create_backup(&BackupRequest::new("cache").with_type(BackupType::Filesystem))
            .unwrap();
        let outcome = f
            .restores
            .restore_container(
                &RestoreRequest::new(record.backup_id.as_str())
                    .with_name("cache2")
                    .with_override("image", json!("redis:7.2")),
            )
            .unwrap();
        assert_eq!(outcome.image, "redis:7.2");
    }

    #[test]
    fn tampered_artifact_blocks_restore_before_engine_calls() {
        let f = fixture();
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();
        let artifact = f
            .restores
            .store()
            .layout()
            .artifact_path(&record.backup_id, CONFIG_ARTIFACT);
        let mut bytes = fs::read(&artifact).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&artifact, bytes).unwrap();

        let before = f.engine.mutation_count();
        let result = f
            .restores
            .restore_container(&RestoreRequest::new(record.backup_id.as_str()).with_name("cache2"));
        assert!(matches!(result, Err(CoreError::Integrity { ref file, .. }) if file == CONFIG_ARTIFACT));
        assert_eq!(f.engine.mutation_count(), before);
    }

    #[test]
    fn preview_summarizes_without_side_effects() {
        let f = fixture();
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();
        let before = f.engine.mutation_count();
        let preview = f.restores.get_restore_preview(&record.backup_id).unwrap();

        assert_eq!(preview.container_name, "cache");
        assert_eq!(preview.image, "redis:7");
        assert_eq!(preview.environment_variables, 1);
        assert_eq!(preview.networks, vec!["backend"]);
        assert_eq!(preview.files_included, record.files);
        assert!(preview.valid);
        assert_eq!(f.engine.mutation_count(), before);

        fs::remove_file(
            f.restores
                .store()
                .layout()
                .artifact_path(&record.backup_id, LOG_ARTIFACT),
        )
        .unwrap();
        assert!(!f.restores.get_restore_preview(&record.backup_id).unwrap().valid);
    }

    #[test]
    fn strict_verify_reports_first_failure() {
        let f = fixture();
        let record = f.backups.create_backup(&BackupRequest::new("cache")).unwrap();
        assert!(f.restores.verify_backup_strict(&record.backup_id).is_ok());

        fs::remove_file(
            f.restores
                .store()
                .layout()
                .artifact_path(&record.backup_id, FILESYSTEM_ARTIFACT),
        )
        .unwrap();
        let report = f.restores.verify_backup_integrity(&record.backup_id).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            f.restores.verify_backup_strict(&record.backup_id),
            Err(CoreError::Integrity { ref file, .. }) if file == FILESYSTEM_ARTIFACT
        ));
    }

    #[test]
    fn unknown_backup_is_backup_not_found() {
        let f = fixture();
        assert!(matches!(
            f.restores
                .restore_container(&RestoreRequest::new("nope_20250101_000000")),
            Err(CoreError::BackupNotFound(_))
        ));
    }
}
