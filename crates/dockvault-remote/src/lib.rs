//! Remote storage for dockvault backups.
//!
//! A `StorageBackend` is anything that can hold files under relative paths:
//! a local directory (`LocalStorage`), an NFS export mounted on demand
//! (`MountedStorage`, which wraps a `LocalStorage`), or an HTTP file server
//! (`HttpStorage`). `push_backup` and `pull_backup` copy whole backup
//! directories between the local backup root and a backend, verifying
//! checksums on both ends.

pub mod config;
pub mod http;
pub mod local;
pub mod mounted;
pub mod transfer;

pub use config::{select_storage, StorageConfig};
pub use http::HttpStorage;
pub use local::LocalStorage;
pub use mounted::MountedStorage;
pub use transfer::{list_remote_backups, pull_backup, push_backup, PullResult, PushResult};

/// Protocol version sent as `X-Dockvault-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("store error: {0}")]
    Store(#[from] dockvault_store::StoreError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage config error: {0}")]
    Config(String),
    #[error("storage backend '{0}' is not connected")]
    NotConnected(String),
    #[error("invalid remote path '{0}'")]
    InvalidPath(String),
    #[error("mount failed: {0}")]
    Mount(String),
    #[error("integrity failure for '{file}': {reason}")]
    IntegrityFailure { file: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// Reject absolute paths and `..` components so a backend can never reach
/// outside its base.
pub fn validate_remote_path(path: &str) -> Result<(), RemoteError> {
    if path.starts_with('/') || path.split('/').any(|c| c == "..") || path.contains('\0') {
        return Err(RemoteError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

/// Join remote path segments with `/`, ignoring empty ones.
pub fn join_remote(dir: &str, name: &str) -> String {
    match (dir.trim_matches('/'), name.trim_matches('/')) {
        ("", n) => n.to_owned(),
        (d, "") => d.to_owned(),
        (d, n) => format!("{d}/{n}"),
    }
}

/// Uniform file-level contract over remote storage.
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> Result<(), RemoteError>;

    fn disconnect(&self) -> Result<(), RemoteError>;

    fn is_connected(&self) -> bool;

    fn upload_file(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    fn download_file(&self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    fn delete_file(&self, remote: &str) -> Result<(), RemoteError>;

    /// Files (not directories) under `remote_dir`, recursively, as paths
    /// relative to it.
    fn list_files(&self, remote_dir: &str) -> Result<Vec<String>, RemoteError>;

    fn file_exists(&self, remote: &str) -> Result<bool, RemoteError>;

    fn file_info(&self, remote: &str) -> Result<FileInfo, RemoteError>;

    /// Free bytes at the destination, when the backend can tell.
    fn available_space(&self) -> Result<Option<u64>, RemoteError> {
        Ok(None)
    }

    /// Upload every file below `local_dir`. Returns the number of files sent.
    fn upload_directory(&self, local_dir: &Path, remote_dir: &str) -> Result<usize, RemoteError> {
        let mut count = 0;
        for rel in local::walk_files(local_dir)? {
            self.upload_file(&local_dir.join(&rel), &join_remote(remote_dir, &rel))?;
            count += 1;
        }
        Ok(count)
    }

    /// Download every file below `remote_dir`. Returns the number of files received.
    fn download_directory(&self, remote_dir: &str, local_dir: &Path) -> Result<usize, RemoteError> {
        let mut count = 0;
        for rel in self.list_files(remote_dir)? {
            validate_remote_path(&rel)?;
            self.download_file(&join_remote(remote_dir, &rel), &local_dir.join(&rel))?;
            count += 1;
        }
        Ok(count)
    }

    /// Connect if needed and report whether the backend answers.
    fn test_connection(&self) -> bool {
        if !self.is_connected() {
            if let Err(e) = self.connect() {
                tracing::warn!("{} storage connection test failed: {e}", self.name());
                return false;
            }
        }
        match self.list_files("") {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("{} storage connection test failed: {e}", self.name());
                false
            }
        }
    }
}
