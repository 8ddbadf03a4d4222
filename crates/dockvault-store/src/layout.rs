use crate::StoreError;
use dockvault_schema::{validate_backup_id, METADATA_FILE};
use std::fs;
use std::path::{Path, PathBuf};

/// Hidden directory under the backup root holding per-container lock files.
pub const LOCKS_DIR: &str = ".locks";

/// Directory layout of a backup root.
///
/// ```text
/// <root>/
///   .locks/<container_name>.lock
///   <backup_id>/backup_metadata.json
///   <backup_id>/filesystem.tar.gz
///   ...
/// ```
#[derive(Debug, Clone)]
pub struct BackupLayout {
    root: PathBuf,
}

impl BackupLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn backup_dir(&self, backup_id: &str) -> PathBuf {
        self.root.join(backup_id)
    }

    #[inline]
    pub fn metadata_path(&self, backup_id: &str) -> PathBuf {
        self.backup_dir(backup_id).join(METADATA_FILE)
    }

    #[inline]
    pub fn artifact_path(&self, backup_id: &str, artifact: &str) -> PathBuf {
        self.backup_dir(backup_id).join(artifact)
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    pub fn lock_file(&self, container_name: &str) -> PathBuf {
        self.locks_dir().join(format!("{container_name}.lock"))
    }

    /// Resolve a backup directory, rejecting ids that would escape the root.
    pub fn checked_backup_dir(&self, backup_id: &str) -> Result<PathBuf, StoreError> {
        validate_backup_id(backup_id)?;
        Ok(self.backup_dir(backup_id))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }
}
