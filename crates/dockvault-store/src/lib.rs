//! On-disk layer for dockvault backups.
//!
//! Every backup lives in its own directory under a backup root, described by
//! `BackupLayout`. `RecordStore` reads and writes the `backup_metadata.json`
//! record with an embedded blake3 self-checksum, `checksum` computes and
//! verifies the SHA-256 artifact digests, `archive` streams data through
//! gzip in bounded chunks, and `retention` sweeps expired backups.

pub mod archive;
pub mod checksum;
pub mod layout;
pub mod records;
pub mod retention;

pub use archive::{
    compress_file, compress_reader, copy_chunked, decompress_file, gzip_reader, validate_tar,
};
pub use checksum::{
    sha256_file, sha256_reader, verify_artifacts, FailureKind, IntegrityFailure, IntegrityReport,
};
pub use layout::{BackupLayout, LOCKS_DIR};
pub use records::{
    compute_record_checksum, sort_newest_first, verify_record_checksum, RecordStore,
};
pub use retention::{sweep_expired, RetentionReport};

use dockvault_schema::RecordError;
use std::path::Path;
use thiserror::Error;

/// Read/write granularity for hashing and (de)compression; bounds peak memory
/// regardless of artifact size.
pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Fsync a directory so that a preceding `rename()` into it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backup not found: {0}")]
    BackupNotFound(String),
    #[error("backup already exists: {0}")]
    BackupExists(String),
    #[error("backup '{0}' is incomplete")]
    Incomplete(String),
    #[error("invalid backup record: {0}")]
    InvalidRecord(#[from] RecordError),
    #[error("metadata checksum mismatch for backup '{backup_id}': expected {expected}, got {actual}")]
    RecordChecksum {
        backup_id: String,
        expected: String,
        actual: String,
    },
    #[error("invalid archive '{path}': {reason}")]
    InvalidArchive { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_backup_not_found() {
        let e = StoreError::BackupNotFound("web_20250101_000000".to_owned());
        assert!(e.to_string().contains("web_20250101_000000"));
    }

    #[test]
    fn store_error_display_record_checksum() {
        let e = StoreError::RecordChecksum {
            backup_id: "b".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }

    #[test]
    fn store_error_display_invalid_archive() {
        let e = StoreError::InvalidArchive {
            path: "/x/filesystem.tar".to_owned(),
            reason: "truncated".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("filesystem.tar"));
        assert!(msg.contains("truncated"));
    }

    #[test]
    fn store_error_display_incomplete() {
        let e = StoreError::Incomplete("web_20250101_000000".to_owned());
        assert_eq!(e.to_string(), "backup 'web_20250101_000000' is incomplete");
    }

    #[test]
    fn store_error_wraps_record_error() {
        let e: StoreError = RecordError::InvalidCompressionLevel(11).into();
        assert!(e.to_string().contains("11"));
    }
}
