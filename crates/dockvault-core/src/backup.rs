use crate::concurrency::{CancelFlag, JobSlots, OperationLocks};
use crate::progress::ProgressSink;
use crate::settings::Settings;
use crate::CoreError;
use chrono::{DateTime, Utc};
use dockvault_engine::ContainerEngine;
use dockvault_schema::{
    format_size, BackupId, BackupRecord, BackupType, ContainerSnapshot, CONFIG_ARTIFACT,
    FILESYSTEM_ARTIFACT, IMAGE_ARTIFACT, LOG_ARTIFACT, MAX_COMPRESSION_LEVEL,
};
use dockvault_store::{
    compress_file, sha256_file, sweep_expired, verify_artifacts, BackupLayout, RecordStore,
    RetentionReport,
};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What to back up and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    /// Container name or id, resolved through the engine.
    pub container: String,
    pub backup_type: BackupType,
    pub compression_level: u32,
    pub include_logs: bool,
    pub verify: bool,
    /// Alternate backup root; the backup still gets its own `<backup_id>/`.
    pub destination: Option<PathBuf>,
}

impl BackupRequest {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            backup_type: BackupType::Full,
            compression_level: 6,
            include_logs: true,
            verify: true,
            destination: None,
        }
    }

    pub fn from_settings(container: impl Into<String>, settings: &Settings) -> Self {
        Self {
            container: container.into(),
            backup_type: settings.backup.default_type,
            compression_level: settings.general.compression_level,
            include_logs: settings.backup.include_logs,
            verify: settings.backup.verify,
            destination: None,
        }
    }

    pub fn with_type(mut self, backup_type: BackupType) -> Self {
        self.backup_type = backup_type;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_logs(mut self, include_logs: bool) -> Self {
        self.include_logs = include_logs;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.container.trim().is_empty() {
            return Err(CoreError::InvalidRequest("no container given".to_owned()));
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(CoreError::InvalidRequest(format!(
                "compression level must be 0-{MAX_COMPRESSION_LEVEL}, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// Creates, lists and deletes backups.
pub struct BackupManager {
    engine: Arc<dyn ContainerEngine>,
    store: RecordStore,
    locks: OperationLocks,
    slots: JobSlots,
    log_tail_lines: usize,
}

impl BackupManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, layout: BackupLayout) -> Self {
        Self {
            engine,
            locks: OperationLocks::new(layout.clone()),
            store: RecordStore::new(layout),
            slots: JobSlots::default(),
            log_tail_lines: 1000,
        }
    }

    pub fn from_settings(engine: Arc<dyn ContainerEngine>, settings: &Settings) -> Self {
        Self::new(engine, BackupLayout::new(&settings.general.backup_dir))
            .with_job_slots(JobSlots::new(settings.general.max_concurrent_jobs))
            .with_log_tail(settings.docker.log_tail_lines)
    }

    /// Share a slot pool with other managers.
    pub fn with_job_slots(mut self, slots: JobSlots) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_log_tail(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn create_backup(&self, request: &BackupRequest) -> Result<BackupRecord, CoreError> {
        self.create_backup_with(request, &ProgressSink::disabled(), &CancelFlag::new())
    }

    /// Back up one container.
    ///
    /// On failure after the backup directory was allocated, whatever was
    /// written stays on disk for inspection. Such a directory either has no
    /// metadata file or a record still marked pending, so it is never listed
    /// and shows up in `incomplete_backups()` instead.
    pub fn create_backup_with(
        &self,
        request: &BackupRequest,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<BackupRecord, CoreError> {
        request.validate()?;
        let _slot = self.slots.acquire();

        progress.operation("Inspecting container");
        self.engine.ping()?;
        let snapshot = self.engine.inspect(&request.container)?;
        let _guard = self.locks.try_lock(&snapshot.name)?;
        cancel.check()?;
        progress.percent(5);

        let store = match &request.destination {
            Some(dest) => {
                let layout = BackupLayout::new(dest);
                layout.initialize()?;
                RecordStore::new(layout)
            }
            None => self.store.clone(),
        };
        let now = Utc::now();
        let (backup_id, dir) = store.allocate(&snapshot.name, now)?;
        info!(
            "starting {} backup of {} as {backup_id}",
            request.backup_type, snapshot.name
        );
        progress.detail(format!("Backup id: {backup_id}"));

        let result = self.write_backup(
            &store, request, snapshot, backup_id.clone(), now, &dir, progress, cancel,
        );
        if let Err(e) = &result {
            error!(
                "backup {backup_id} failed: {e}; partial files left in {}",
                dir.display()
            );
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn write_backup(
        &self,
        store: &RecordStore,
        request: &BackupRequest,
        snapshot: ContainerSnapshot,
        backup_id: BackupId,
        now: DateTime<Utc>,
        dir: &Path,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<BackupRecord, CoreError> {
        let level = request.compression_level;
        let mut record = BackupRecord::new(backup_id, snapshot, request.backup_type, level, now);
        progress.percent(10);

        progress.operation("Exporting container filesystem");
        let tar_path = dir.join("filesystem.tar");
        {
            let mut out = BufWriter::new(File::create(&tar_path)?);
            let n = self
                .engine
                .export_filesystem(&record.container_id, &mut out)?;
            out.flush()?;
            debug!("exported {n} bytes of filesystem");
        }
        cancel.check()?;
        progress.operation("Compressing filesystem");
        compress_file(&tar_path, &dir.join(FILESYSTEM_ARTIFACT), level)?;
        fs::remove_file(&tar_path)?;
        add_artifact(&mut record, dir, FILESYSTEM_ARTIFACT, progress)?;
        progress.percent(40);
        cancel.check()?;

        if request.backup_type == BackupType::Full {
            progress.operation("Saving container image");
            match self.save_image(&record.container_info.image, dir, level) {
                Ok(()) => add_artifact(&mut record, dir, IMAGE_ARTIFACT, progress)?,
                Err(e) => {
                    warn!(
                        "could not save image {}: {e}; continuing without it",
                        record.container_info.image
                    );
                    progress.detail(format!("Image not saved: {e}"));
                }
            }
            progress.percent(70);
            cancel.check()?;

            progress.operation("Saving container configuration");
            let config = serde_json::to_vec_pretty(&record.container_info)?;
            fs::write(dir.join(CONFIG_ARTIFACT), config)?;
            add_artifact(&mut record, dir, CONFIG_ARTIFACT, progress)?;
            progress.percent(80);
        }

        if request.include_logs {
            progress.operation("Collecting container logs");
            let logs = self
                .engine
                .logs(&record.container_id, self.log_tail_lines)?;
            fs::write(dir.join(LOG_ARTIFACT), logs)?;
            add_artifact(&mut record, dir, LOG_ARTIFACT, progress)?;
            progress.percent(85);
        }
        cancel.check()?;

        record.validate()?;
        record.pending = true;
        progress.operation("Writing metadata");
        store.put(&record)?;
        progress.percent(90);

        if request.verify {
            progress.operation("Verifying backup");
            let report = verify_artifacts(dir, &record);
            if let Some(failure) = report.first_failure() {
                error!(
                    "verification of {} failed: {}: {}",
                    record.backup_id, failure.file, failure.kind
                );
                return Err(failure.into());
            }
            progress.detail(format!("Verified {} files", report.passed));
        }
        progress.percent(95);

        let size = store.artifact_size(&record)?;
        record.set_size(size);
        record.pending = false;
        let written = store.put(&record)?;
        progress.percent(100);
        info!(
            "backup {} completed ({})",
            written.backup_id, written.size_human
        );
        Ok(written)
    }

    /// Save and compress the image. Leaves nothing behind on failure.
    fn save_image(&self, reference: &str, dir: &Path, level: u32) -> Result<(), CoreError> {
        let tar_path = dir.join("image.tar");
        let result = self
            .save_image_tar(reference, &tar_path)
            .and_then(|()| {
                compress_file(&tar_path, &dir.join(IMAGE_ARTIFACT), level).map_err(CoreError::from)
            });
        let _ = fs::remove_file(&tar_path);
        if result.is_err() {
            let _ = fs::remove_file(dir.join(IMAGE_ARTIFACT));
        }
        result.map(|_| ())
    }

    fn save_image_tar(&self, reference: &str, tar_path: &Path) -> Result<(), CoreError> {
        let mut out = BufWriter::new(File::create(tar_path)?);
        let n = self.engine.save_image(reference, &mut out)?;
        out.flush()?;
        debug!("saved {n} bytes of image {reference}");
        Ok(())
    }

    /// Back up several containers one after another. A failure does not stop
    /// the run; cancellation does, marking the rest as cancelled.
    pub fn backup_many(
        &self,
        containers: &[String],
        template: &BackupRequest,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Vec<(String, Result<BackupRecord, CoreError>)> {
        let total = containers.len();
        containers
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if cancel.is_cancelled() {
                    return (name.clone(), Err(CoreError::Cancelled));
                }
                progress.detail(format!("[{}/{total}] {name}", i + 1));
                let request = BackupRequest {
                    container: name.clone(),
                    ..template.clone()
                };
                (name.clone(), self.create_backup_with(&request, progress, cancel))
            })
            .collect()
    }

    /// Readable backups, newest first.
    pub fn list_backups(&self, container_name: Option<&str>) -> Result<Vec<BackupRecord>, CoreError> {
        Ok(self.store.list(container_name)?)
    }

    pub fn get_backup_metadata(&self, backup_id: &str) -> Result<BackupRecord, CoreError> {
        Ok(self.store.get(backup_id)?)
    }

    /// Remove the backup directory. Irreversible.
    pub fn delete_backup(&self, backup_id: &str) -> Result<(), CoreError> {
        let _guard = match self.store.get(backup_id) {
            Ok(record) => Some(self.locks.try_lock(&record.container_name)?),
            Err(_) => None,
        };
        self.store.remove(backup_id)?;
        Ok(())
    }

    /// Delete every backup older than `retention_days`. Returns the count deleted.
    pub fn cleanup_old_backups(
        &self,
        retention_days: u32,
        container_name: Option<&str>,
    ) -> Result<usize, CoreError> {
        Ok(self
            .cleanup_report(retention_days, container_name, false)?
            .removed)
    }

    pub fn cleanup_report(
        &self,
        retention_days: u32,
        container_name: Option<&str>,
        dry_run: bool,
    ) -> Result<RetentionReport, CoreError> {
        Ok(sweep_expired(
            &self.store,
            retention_days,
            container_name,
            Utc::now(),
            dry_run,
        )?)
    }

    /// Backup directories without metadata: interrupted or failed runs.
    pub fn incomplete_backups(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.store.incomplete()?)
    }
}

fn add_artifact(
    record: &mut BackupRecord,
    dir: &Path,
    name: &str,
    progress: &ProgressSink,
) -> Result<(), CoreError> {
    let path = dir.join(name);
    let digest = sha256_file(&path)?;
    let size = fs::metadata(&path)?.len();
    debug!("{name}: {size} bytes, sha256 {digest}");
    progress.detail(format!("{name}: {}", format_size(size)));
    record.add_artifact(name, digest);
    Ok(())
}
