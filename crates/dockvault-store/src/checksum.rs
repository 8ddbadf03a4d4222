use crate::{StoreError, CHUNK_SIZE};
use dockvault_schema::BackupRecord;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Hex SHA-256 of a file, read in [`CHUNK_SIZE`] pieces.
pub fn sha256_file(path: &Path) -> Result<String, StoreError> {
    let file = File::open(path)?;
    Ok(sha256_reader(file)?)
}

pub fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    Missing,
    /// Listed in `files` without an entry in `checksums`.
    NoChecksum,
    Mismatch { expected: String, actual: String },
    Unreadable { error: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Missing => write!(f, "file is missing"),
            FailureKind::NoChecksum => write!(f, "no recorded checksum"),
            FailureKind::Mismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            FailureKind::Unreadable { error } => write!(f, "read error: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityFailure {
    pub file: String,
    pub kind: FailureKind,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn first_failure(&self) -> Option<&IntegrityFailure> {
        self.failed.first()
    }
}

/// Re-hash every artifact of `record` found in `dir` and compare against the
/// recorded digests. Never stops early: the report lists every bad file.
pub fn verify_artifacts(dir: &Path, record: &BackupRecord) -> IntegrityReport {
    let mut names: Vec<&str> = record.files.iter().map(String::as_str).collect();
    for name in record.checksums.keys() {
        if !record.has_artifact(name) {
            names.push(name);
        }
    }

    let mut report = IntegrityReport {
        checked: names.len(),
        ..Default::default()
    };

    for name in names {
        let fail = |kind| IntegrityFailure {
            file: name.to_owned(),
            kind,
        };
        let Some(expected) = record.checksums.get(name) else {
            report.failed.push(fail(FailureKind::NoChecksum));
            continue;
        };
        let path = dir.join(name);
        if !path.is_file() {
            warn!("missing file in backup {}: {name}", record.backup_id);
            report.failed.push(fail(FailureKind::Missing));
            continue;
        }
        match sha256_file(&path) {
            Ok(actual) if actual == *expected => {
                debug!("{name}: {actual}");
                report.passed += 1;
            }
            Ok(actual) => {
                warn!("checksum mismatch in backup {}: {name}", record.backup_id);
                report.failed.push(fail(FailureKind::Mismatch {
                    expected: expected.clone(),
                    actual,
                }));
            }
            Err(e) => report.failed.push(fail(FailureKind::Unreadable {
                error: e.to_string(),
            })),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockvault_schema::{
        backup_id_for, BackupType, ContainerSnapshot, FILESYSTEM_ARTIFACT, LOG_ARTIFACT,
    };
    use std::fs;

    // sha256("hello world")
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn record_for(dir: &Path, files: &[(&str, &[u8])]) -> BackupRecord {
        let snap = ContainerSnapshot {
            name: "web".to_owned(),
            ..Default::default()
        };
        let now = chrono::Utc::now();
        let mut rec = BackupRecord::new(backup_id_for("web", now), snap, BackupType::Filesystem, 6, now);
        for (name, data) in files {
            let path = dir.join(name);
            fs::write(&path, data).unwrap();
            rec.add_artifact(name, sha256_file(&path).unwrap());
        }
        rec
    }

    #[test]
    fn sha256_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"hello world").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn sha256_of_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sha256_file(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn clean_backup_passes() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record_for(
            dir.path(),
            &[(FILESYSTEM_ARTIFACT, b"fs"), (LOG_ARTIFACT, b"log")],
        );
        let report = verify_artifacts(dir.path(), &rec);
        assert!(report.is_ok());
        assert_eq!(report.checked, 2);
        assert_eq!(report.passed, 2);
    }

    #[test]
    fn flipped_byte_is_reported_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record_for(
            dir.path(),
            &[(FILESYSTEM_ARTIFACT, b"filesystem"), (LOG_ARTIFACT, b"log")],
        );
        fs::write(dir.path().join(LOG_ARTIFACT), b"log!").unwrap();

        let report = verify_artifacts(dir.path(), &rec);
        assert_eq!(report.passed, 1);
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.file, LOG_ARTIFACT);
        assert!(matches!(failure.kind, FailureKind::Mismatch { .. }));
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record_for(dir.path(), &[(FILESYSTEM_ARTIFACT, b"fs")]);
        fs::remove_file(dir.path().join(FILESYSTEM_ARTIFACT)).unwrap();
        let report = verify_artifacts(dir.path(), &rec);
        assert_eq!(
            report.failed,
            vec![IntegrityFailure {
                file: FILESYSTEM_ARTIFACT.to_owned(),
                kind: FailureKind::Missing,
            }]
        );
    }

    #[test]
    fn listed_file_without_checksum_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record_for(dir.path(), &[(FILESYSTEM_ARTIFACT, b"fs")]);
        rec.files.push(LOG_ARTIFACT.to_owned());
        let report = verify_artifacts(dir.path(), &rec);
        assert_eq!(report.failed[0].kind, FailureKind::NoChecksum);
    }

    #[test]
    fn failure_kind_display_includes_digests() {
        let kind = FailureKind::Mismatch {
            expected: "aaa".to_owned(),
            actual: "bbb".to_owned(),
        };
        let msg = kind.to_string();
        assert!(msg.contains("aaa") && msg.contains("bbb"));
    }
}
