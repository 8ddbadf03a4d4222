use crate::checksum::{verify_artifacts, IntegrityReport};
use crate::layout::BackupLayout;
use crate::{fsync_dir, StoreError};
use chrono::{DateTime, Utc};
use dockvault_schema::{backup_id_for, BackupId, BackupRecord};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// blake3 of the record serialized without its own checksum field.
pub fn compute_record_checksum(record: &BackupRecord) -> Result<String, StoreError> {
    let mut copy = record.clone();
    copy.record_checksum = None;
    let json = serde_json::to_string_pretty(&copy)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// Check the embedded self-checksum. Records without one are accepted.
pub fn verify_record_checksum(record: &BackupRecord) -> Result<(), StoreError> {
    if let Some(ref expected) = record.record_checksum {
        let actual = compute_record_checksum(record)?;
        if actual != *expected {
            return Err(StoreError::RecordChecksum {
                backup_id: record.backup_id.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

/// Reads and writes `backup_metadata.json` files under a backup root.
#[derive(Debug, Clone)]
pub struct RecordStore {
    layout: BackupLayout,
}

impl RecordStore {
    pub fn new(layout: BackupLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    /// Create a fresh, empty backup directory for `container_name`.
    ///
    /// Uses `create_dir` so two callers can never get the same directory; a
    /// collision within the same second gets a `_<n>` suffix.
    pub fn allocate(
        &self,
        container_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(BackupId, PathBuf), StoreError> {
        fs::create_dir_all(self.layout.root())?;
        let base = backup_id_for(container_name, at);
        for n in 0..1000u32 {
            let id = if n == 0 {
                base.clone()
            } else {
                BackupId::new(format!("{base}_{n}"))
            };
            let dir = self.layout.checked_backup_dir(&id)?;
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!("allocated backup directory {}", dir.display());
                    return Ok((id, dir));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::BackupExists(base.into_inner()))
    }

    /// Write the record atomically, embedding a fresh `record_checksum`.
    /// Returns the record as written.
    pub fn put(&self, record: &BackupRecord) -> Result<BackupRecord, StoreError> {
        let dir = self.layout.checked_backup_dir(&record.backup_id)?;
        fs::create_dir_all(&dir)?;

        let mut stamped = record.clone();
        stamped.record_checksum = Some(compute_record_checksum(&stamped)?);
        let content = serde_json::to_string_pretty(&stamped)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.metadata_path(&record.backup_id))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        Ok(stamped)
    }

    /// Read and check a record. A record still marked `pending` belongs to
    /// a backup that never finished verification and yields `Incomplete`.
    pub fn get(&self, backup_id: &str) -> Result<BackupRecord, StoreError> {
        let dir = self.layout.checked_backup_dir(backup_id)?;
        let path = self.layout.metadata_path(backup_id);
        if !dir.is_dir() || !path.is_file() {
            return Err(StoreError::BackupNotFound(backup_id.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let record: BackupRecord = serde_json::from_str(&content)?;
        verify_record_checksum(&record)?;
        if record.pending {
            return Err(StoreError::Incomplete(backup_id.to_owned()));
        }
        Ok(record)
    }

    pub fn exists(&self, backup_id: &str) -> bool {
        self.layout
            .checked_backup_dir(backup_id)
            .is_ok_and(|_| self.layout.metadata_path(backup_id).is_file())
    }

    /// Remove the whole backup directory. Irreversible.
    pub fn remove(&self, backup_id: &str) -> Result<(), StoreError> {
        let dir = self.layout.checked_backup_dir(backup_id)?;
        if !dir.is_dir() {
            return Err(StoreError::BackupNotFound(backup_id.to_owned()));
        }
        fs::remove_dir_all(&dir)?;
        info!("deleted backup {backup_id}");
        Ok(())
    }

    /// All readable records, newest first, optionally restricted to one
    /// container. Unreadable or tampered records are skipped with a warning.
    pub fn list(&self, container_name: Option<&str>) -> Result<Vec<BackupRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.list_with_errors()? {
            match entry {
                Ok(record) => match container_name {
                    Some(name) if record.container_name != name => {}
                    _ => records.push(record),
                },
                Err((id, e)) => warn!("skipping unreadable backup '{id}': {e}"),
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Like `list()`, but surfaces per-entry errors instead of skipping them.
    /// Directories without a metadata file, or whose record is still
    /// pending, are ignored: they are backups in progress or leftovers of a
    /// failed run, and `incomplete()` reports them.
    #[allow(clippy::type_complexity)]
    pub fn list_with_errors(
        &self,
    ) -> Result<Vec<Result<BackupRecord, (String, StoreError)>>, StoreError> {
        let root = self.layout.root();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str() else { continue };
            if id.starts_with('.') || !self.layout.metadata_path(id).is_file() {
                continue;
            }
            match self.get(id) {
                Err(StoreError::Incomplete(_)) => {}
                other => results.push(other.map_err(|e| (id.to_owned(), e))),
            }
        }
        Ok(results)
    }

    /// Directories under the root that have no metadata file, or whose
    /// record never left the pending state.
    pub fn incomplete(&self) -> Result<Vec<String>, StoreError> {
        let root = self.layout.root();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type()?.is_dir() || name.starts_with('.') {
                continue;
            }
            if !self.layout.metadata_path(&name).is_file()
                || matches!(self.get(&name), Err(StoreError::Incomplete(_)))
            {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Sum of the on-disk sizes of every listed artifact.
    pub fn artifact_size(&self, record: &BackupRecord) -> Result<u64, StoreError> {
        let mut total = 0;
        for file in &record.files {
            total += fs::metadata(self.layout.artifact_path(&record.backup_id, file))?.len();
        }
        Ok(total)
    }

    pub fn verify(&self, backup_id: &str) -> Result<IntegrityReport, StoreError> {
        let record = self.get(backup_id)?;
        Ok(verify_artifacts(&self.layout.backup_dir(backup_id), &record))
    }
}

/// Newest first. Ties (and unparseable timestamps) fall back to the raw
/// strings so the order is stable across calls.
pub fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| b.backup_id.cmp(&a.backup_id))
    });
}
