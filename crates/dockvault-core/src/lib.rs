//! Core orchestration for dockvault backups and restores.
//!
//! `BackupManager` turns a live container into a verified, multi-artifact
//! backup directory; `RestoreManager` turns such a directory back into a
//! container, re-identifying the loaded image and translating the captured
//! configuration into creation parameters. Around them sit the per-container
//! operation locks, job slots and cancellation flag (`concurrency`), the
//! progress channel (`progress`), background workers (`worker`) and the
//! TOML `Settings` every front-end starts from.

pub mod backup;
pub mod concurrency;
pub mod image;
pub mod progress;
pub mod restore;
pub mod settings;
pub mod translate;
pub mod worker;

pub use backup::{BackupManager, BackupRequest};
pub use concurrency::{
    install_signal_handler, shutdown_requested, CancelFlag, JobSlot, JobSlots, OperationGuard,
    OperationLocks,
};
pub use image::{resolve_loaded_image, ImageResolution, ResolutionStep};
pub use progress::{ProgressEvent, ProgressSink};
pub use restore::{RestoreManager, RestoreOutcome, RestorePreview, RestoreRequest};
pub use settings::{BackupSettings, DockerSettings, GeneralSettings, Settings};
pub use translate::{creation_params, merge_overrides, CreationConfig};
pub use worker::{spawn_backup, spawn_restore, JobHandle};

use dockvault_engine::EngineError;
use dockvault_store::{IntegrityFailure, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("backup not found: {0}")]
    BackupNotFound(String),
    #[error("a container named '{0}' already exists")]
    ContainerExists(String),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("filesystem restore failed: {0}")]
    FilesystemRestore(String),
    #[error("integrity check failed for '{file}': {reason}")]
    Integrity { file: String, reason: String },
    #[error("engine error: {0}")]
    Engine(EngineError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("another backup or restore of '{0}' is in progress")]
    Busy(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("remote error: {0}")]
    Remote(#[from] dockvault_remote::RemoteError),
    #[error("worker thread failed: {0}")]
    Worker(String),
}

impl From<EngineError> for CoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Unavailable(msg) => CoreError::EngineUnavailable(msg),
            EngineError::ContainerNotFound(c) => CoreError::ContainerNotFound(c),
            EngineError::ImageNotFound(i) => CoreError::ImageNotFound(i),
            other => CoreError::Engine(other),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::BackupNotFound(id) => CoreError::BackupNotFound(id),
            StoreError::RecordChecksum {
                backup_id,
                expected,
                actual,
            } => CoreError::Integrity {
                file: format!("{backup_id}/{}", dockvault_schema::METADATA_FILE),
                reason: format!("metadata checksum mismatch: expected {expected}, got {actual}"),
            },
            other => CoreError::Store(other),
        }
    }
}

impl From<dockvault_schema::RecordError> for CoreError {
    fn from(e: dockvault_schema::RecordError) -> Self {
        CoreError::Store(StoreError::InvalidRecord(e))
    }
}

impl From<&IntegrityFailure> for CoreError {
    fn from(f: &IntegrityFailure) -> Self {
        CoreError::Integrity {
            file: f.file.clone(),
            reason: f.kind.to_string(),
        }
    }
}
