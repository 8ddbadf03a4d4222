use crate::{join_remote, RemoteError, StorageBackend};
use dockvault_schema::{validate_backup_id, BackupRecord, METADATA_FILE};
use dockvault_store::{verify_artifacts, verify_record_checksum, RecordStore, StoreError};
use std::fs;
use std::path::Path;

/// Result of a push operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    pub files_pushed: usize,
    pub files_skipped: usize,
    pub bytes_pushed: u64,
}

/// Result of a pull operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub record: BackupRecord,
    pub files_pulled: usize,
}

fn ensure_connected(backend: &dyn StorageBackend) -> Result<(), RemoteError> {
    if !backend.is_connected() {
        backend.connect()?;
    }
    Ok(())
}

/// Copy a local backup to `backend` under `<backup_id>/`.
///
/// The backup is verified before anything is sent. Artifacts already present
/// remotely with the same size are skipped; the metadata file always goes
/// last, so a remote backup without metadata is an interrupted push.
pub fn push_backup(
    store: &RecordStore,
    backup_id: &str,
    backend: &dyn StorageBackend,
) -> Result<PushResult, RemoteError> {
    let record = store.get(backup_id)?;
    let report = store.verify(backup_id)?;
    if let Some(failure) = report.first_failure() {
        return Err(RemoteError::IntegrityFailure {
            file: failure.file.clone(),
            reason: failure.kind.to_string(),
        });
    }

    ensure_connected(backend)?;

    let mut result = PushResult {
        files_pushed: 0,
        files_skipped: 0,
        bytes_pushed: 0,
    };
    for file in &record.files {
        let local = store.layout().artifact_path(backup_id, file);
        let size = fs::metadata(&local)?.len();
        let remote = join_remote(backup_id, file);
        if backend
            .file_info(&remote)
            .is_ok_and(|info| info.size == size)
        {
            tracing::debug!("skipping {remote}: already present");
            result.files_skipped += 1;
            continue;
        }
        backend.upload_file(&local, &remote)?;
        result.files_pushed += 1;
        result.bytes_pushed += size;
    }

    backend.upload_file(
        &store.layout().metadata_path(backup_id),
        &join_remote(backup_id, METADATA_FILE),
    )?;
    tracing::info!(
        "pushed backup {backup_id} to {} storage ({} files, {} skipped)",
        backend.name(),
        result.files_pushed,
        result.files_skipped
    );
    Ok(result)
}

/// Fetch `<backup_id>/` from `backend` into the local store.
///
/// Files land in a hidden staging directory and are moved into place only
/// after the record checksum and every artifact checksum verify.
pub fn pull_backup(
    store: &RecordStore,
    backup_id: &str,
    backend: &dyn StorageBackend,
) -> Result<PullResult, RemoteError> {
    validate_backup_id(backup_id).map_err(StoreError::from)?;
    if store.exists(backup_id) {
        return Err(StoreError::BackupExists(backup_id.to_owned()).into());
    }
    ensure_connected(backend)?;

    let root = store.layout().root();
    fs::create_dir_all(root)?;
    let staging = root.join(format!(".pull-{backup_id}"));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let outcome = fetch_into(&staging, backup_id, backend);
    let (record, files_pulled) = match outcome {
        Ok(v) => v,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    let dest = store.layout().backup_dir(backup_id);
    if let Err(e) = fs::rename(&staging, &dest) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }
    tracing::info!(
        "pulled backup {backup_id} from {} storage ({files_pulled} files)",
        backend.name()
    );
    Ok(PullResult {
        record,
        files_pulled,
    })
}

fn fetch_into(
    staging: &Path,
    backup_id: &str,
    backend: &dyn StorageBackend,
) -> Result<(BackupRecord, usize), RemoteError> {
    let meta_path = staging.join(METADATA_FILE);
    backend.download_file(&join_remote(backup_id, METADATA_FILE), &meta_path)?;
    let content = fs::read_to_string(&meta_path)?;
    let record: BackupRecord = serde_json::from_str(&content)
        .map_err(|e| RemoteError::Serialization(format!("invalid backup metadata: {e}")))?;

    if record.backup_id != backup_id {
        return Err(RemoteError::IntegrityFailure {
            file: METADATA_FILE.to_owned(),
            reason: format!("metadata belongs to backup '{}'", record.backup_id),
        });
    }
    verify_record_checksum(&record).map_err(|e| RemoteError::IntegrityFailure {
        file: METADATA_FILE.to_owned(),
        reason: e.to_string(),
    })?;
    if record.pending {
        return Err(RemoteError::IntegrityFailure {
            file: METADATA_FILE.to_owned(),
            reason: "backup never finished verification".to_owned(),
        });
    }
    // Rejects artifact names that could resolve outside the staging dir.
    record.validate().map_err(StoreError::from)?;

    let mut pulled = 0;
    for file in &record.files {
        backend.download_file(&join_remote(backup_id, file), &staging.join(file))?;
        pulled += 1;
    }

    let report = verify_artifacts(staging, &record);
    if let Some(failure) = report.first_failure() {
        return Err(RemoteError::IntegrityFailure {
            file: failure.file.clone(),
            reason: failure.kind.to_string(),
        });
    }
    Ok((record, pulled))
}

/// Backup ids with a complete (metadata-bearing) copy on `backend`.
pub fn list_remote_backups(backend: &dyn StorageBackend) -> Result<Vec<String>, RemoteError> {
    ensure_connected(backend)?;
    let mut ids: Vec<String> = backend
        .list_files("")?
        .into_iter()
        .filter_map(|path| {
            let (id, file) = path.split_once('/')?;
            (file == METADATA_FILE).then(|| id.to_owned())
        })
        .collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}
