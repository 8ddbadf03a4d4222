use crate::snapshot::ContainerSnapshot;
use crate::types::{BackupId, ContainerId};
use crate::RecordError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const METADATA_FILE: &str = "backup_metadata.json";
pub const FILESYSTEM_ARTIFACT: &str = "filesystem.tar.gz";
pub const IMAGE_ARTIFACT: &str = "image.tar.gz";
pub const CONFIG_ARTIFACT: &str = "container_config.json";
pub const LOG_ARTIFACT: &str = "container.log";

/// Highest gzip level accepted for artifacts.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// Writable layer only; restore needs the original image in the engine.
    Filesystem,
    /// Writable layer, saved image and configuration snapshot.
    #[default]
    Full,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupType::Filesystem => write!(f, "filesystem"),
            BackupType::Full => write!(f, "full"),
        }
    }
}

impl FromStr for BackupType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem" => Ok(BackupType::Filesystem),
            "full" => Ok(BackupType::Full),
            other => Err(RecordError::UnknownBackupType(other.to_owned())),
        }
    }
}

/// The durable description of one backup, persisted as [`METADATA_FILE`]
/// inside the backup directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub backup_id: BackupId,
    pub container_name: String,
    pub container_id: ContainerId,
    pub backup_type: BackupType,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub compression_level: u32,
    pub container_info: ContainerSnapshot,
    /// Artifact names in the order they were produced.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub size_human: String,
    /// Set while the backup is still being verified. A pending record is
    /// never listed or returned as a usable backup.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    /// blake3 over the record serialized without this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_checksum: Option<String>,
}

impl BackupRecord {
    pub fn new(
        backup_id: BackupId,
        snapshot: ContainerSnapshot,
        backup_type: BackupType,
        compression_level: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_id,
            container_name: snapshot.name.clone(),
            container_id: snapshot.id.clone(),
            backup_type,
            timestamp: created_at.to_rfc3339(),
            compression_level,
            container_info: snapshot,
            files: Vec::new(),
            checksums: BTreeMap::new(),
            size_bytes: 0,
            size_human: String::new(),
            pending: false,
            record_checksum: None,
        }
    }

    /// Register an artifact and its digest. Re-adding a name replaces the
    /// digest without duplicating the file entry.
    pub fn add_artifact(&mut self, name: &str, digest: String) {
        if !self.has_artifact(name) {
            self.files.push(name.to_owned());
        }
        self.checksums.insert(name.to_owned(), digest);
    }

    pub fn has_artifact(&self, name: &str) -> bool {
        self.files.iter().any(|f| f == name)
    }

    pub fn set_size(&mut self, size_bytes: u64) {
        self.size_bytes = size_bytes;
        self.size_human = format_size(size_bytes);
    }

    /// Creation instant. Accepts RFC 3339 and, for records written by older
    /// tools, a naive ISO-8601 timestamp which is read as UTC.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Check the structural invariants of the manifest. File presence on disk
    /// is checked by the store, not here.
    pub fn validate(&self) -> Result<(), RecordError> {
        validate_backup_id(&self.backup_id)?;
        if let Some(bad) = self.files.iter().find(|f| !is_known_artifact(f)) {
            return Err(RecordError::UnknownArtifact(bad.clone()));
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(RecordError::InvalidCompressionLevel(self.compression_level));
        }
        if let Some(missing) = self.files.iter().find(|f| !self.checksums.contains_key(*f)) {
            return Err(RecordError::MissingChecksum(missing.clone()));
        }
        if !self.has_artifact(FILESYSTEM_ARTIFACT) {
            return Err(RecordError::MissingArtifact {
                backup_type: self.backup_type,
                file: FILESYSTEM_ARTIFACT.to_owned(),
            });
        }
        match self.backup_type {
            BackupType::Filesystem => {
                if self.has_artifact(IMAGE_ARTIFACT) {
                    return Err(RecordError::UnexpectedArtifact {
                        backup_type: self.backup_type,
                        file: IMAGE_ARTIFACT.to_owned(),
                    });
                }
            }
            BackupType::Full => {
                if !self.has_artifact(CONFIG_ARTIFACT) {
                    return Err(RecordError::MissingArtifact {
                        backup_type: self.backup_type,
                        file: CONFIG_ARTIFACT.to_owned(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Artifact names become file names inside the backup directory, so only
/// the fixed set is accepted.
pub fn is_known_artifact(name: &str) -> bool {
    [
        FILESYSTEM_ARTIFACT,
        IMAGE_ARTIFACT,
        CONFIG_ARTIFACT,
        LOG_ARTIFACT,
    ]
    .contains(&name)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// `<container_name>_<YYYYmmdd_HHMMSS>`; sorts by creation time for a given
/// container.
pub fn backup_id_for(container_name: &str, at: DateTime<Utc>) -> BackupId {
    BackupId::new(format!("{container_name}_{}", at.format("%Y%m%d_%H%M%S")))
}

/// Backup ids become directory names under the backup root, so anything
/// that could escape it is rejected.
pub fn validate_backup_id(id: &str) -> Result<(), RecordError> {
    let reject = |why| Err(RecordError::InvalidBackupId(id.to_owned(), why));
    if id.is_empty() {
        return reject("must not be empty");
    }
    if id.len() > 255 {
        return reject("must be at most 255 characters");
    }
    if id.starts_with('.') {
        return reject("must not start with '.'");
    }
    if id.contains('/') || id.contains('\\') || id.contains('\0') {
        return reject("must not contain path separators");
    }
    Ok(())
}

/// Human-readable size with two decimals and 1024-based units.
pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}
