//! Data model shared by every dockvault crate.
//!
//! This crate defines what a backup *is*: the point-in-time `ContainerSnapshot`
//! captured from the engine, the `BackupRecord` persisted as
//! `backup_metadata.json` next to the artifacts, the artifact file names of the
//! on-disk layout, and the string newtypes used as identifiers.

pub mod record;
pub mod snapshot;
pub mod types;

pub use record::{
    backup_id_for, format_size, is_known_artifact, parse_timestamp, validate_backup_id,
    BackupRecord, BackupType, CONFIG_ARTIFACT, FILESYSTEM_ARTIFACT, IMAGE_ARTIFACT, LOG_ARTIFACT, MAX_COMPRESSION_LEVEL,
    METADATA_FILE,
};
pub use snapshot::{
    env_list_to_map, ContainerSnapshot, ContainerStatus, Mount, MountKind, PortBinding,
};
pub use types::{BackupId, ContainerId, ImageId};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("invalid backup id '{0}': {1}")]
    InvalidBackupId(String, &'static str),
    #[error("unknown backup type: {0}")]
    UnknownBackupType(String),
    #[error("compression level {0} is out of range 0-9")]
    InvalidCompressionLevel(u32),
    #[error("unknown artifact name '{0}'")]
    UnknownArtifact(String),
    #[error("artifact '{0}' is listed but has no checksum")]
    MissingChecksum(String),
    #[error("{backup_type} backup must not contain '{file}'")]
    UnexpectedArtifact { backup_type: BackupType, file: String },
    #[error("{backup_type} backup is missing required artifact '{file}'")]
    MissingArtifact { backup_type: BackupType, file: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_error_display_names_file() {
        let e = RecordError::MissingArtifact {
            backup_type: BackupType::Full,
            file: CONFIG_ARTIFACT.to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("full"));
        assert!(msg.contains("container_config.json"));
    }

    #[test]
    fn record_error_display_compression_level() {
        let e = RecordError::InvalidCompressionLevel(12);
        assert!(e.to_string().contains("12"));
    }
}
