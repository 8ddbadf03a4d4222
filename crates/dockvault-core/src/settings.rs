use crate::CoreError;
use dockvault_remote::StorageConfig;
use dockvault_schema::{BackupType, MAX_COMPRESSION_LEVEL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub backup_dir: PathBuf,
    pub compression_level: u32,
    pub retention_days: u32,
    pub max_concurrent_jobs: usize,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("/var/backups/dockvault"),
            compression_level: 6,
            retention_days: 30,
            max_concurrent_jobs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Engine CLI to shell out to (`docker`, `podman`, or a full path).
    pub command: String,
    pub timeout_secs: u64,
    pub log_tail_lines: usize,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            command: "docker".to_owned(),
            timeout_secs: 300,
            log_tail_lines: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub default_type: BackupType,
    pub include_logs: bool,
    pub verify: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            default_type: BackupType::Full,
            include_logs: true,
            verify: true,
        }
    }
}

/// Everything a front-end needs to build managers. Missing sections and keys
/// take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub docker: DockerSettings,
    pub backup: BackupSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
}

impl Settings {
    /// `$HOME/.config/dockvault/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("dockvault")
                .join("config.toml")
        })
    }

    /// Load from `path`, or from [`default_path`](Self::default_path) when
    /// `None`. An explicit path must exist; a missing default file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            if explicit {
                return Err(CoreError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let settings = Self::from_toml_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.general.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(CoreError::Config(format!(
                "compression_level must be 0-{MAX_COMPRESSION_LEVEL}, got {}",
                self.general.compression_level
            )));
        }
        if self.general.max_concurrent_jobs == 0 {
            return Err(CoreError::Config(
                "max_concurrent_jobs must be at least 1".to_owned(),
            ));
        }
        if self.docker.command.trim().is_empty() {
            return Err(CoreError::Config("docker.command is empty".to_owned()));
        }
        if let Some(storage) = &self.storage {
            storage
                .validate()
                .map_err(|e| CoreError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// Write atomically to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.general.backup_dir, PathBuf::from("/var/backups/dockvault"));
        assert_eq!(s.general.compression_level, 6);
        assert_eq!(s.general.retention_days, 30);
        assert_eq!(s.general.max_concurrent_jobs, 2);
        assert_eq!(s.docker.command, "docker");
        assert_eq!(s.docker.log_tail_lines, 1000);
        assert_eq!(s.backup.default_type, BackupType::Full);
        assert!(s.backup.include_logs);
        assert!(s.backup.verify);
        assert!(s.storage.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let s = Settings::from_toml_str(
            r#"
[general]
backup_dir = "/srv/backups"

[backup]
default_type = "filesystem"
"#,
        )
        .unwrap();
        assert_eq!(s.general.backup_dir, PathBuf::from("/srv/backups"));
        assert_eq!(s.general.compression_level, 6);
        assert_eq!(s.backup.default_type, BackupType::Filesystem);
        assert!(s.backup.verify);
    }

    #[test]
    fn storage_section_parses() {
        let s = Settings::from_toml_str(
            r#"
[storage]
kind = "nfs"
server = "nas.lan"
export = "/exports/backups"
mount_point = "/mnt/dockvault"
"#,
        )
        .unwrap();
        assert!(matches!(s.storage, Some(StorageConfig::Nfs { .. })));
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            Settings::from_toml_str("[general]\ncompression_level = 12\n"),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("[general]\nmax_concurrent_jobs = 0\n"),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("[backup]\ndefault_type = \"partial\"\n"),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut s = Settings::default();
        s.general.retention_days = 7;
        s.storage = Some(StorageConfig::Http {
            url: "https://backups.example.com".to_owned(),
            auth_token: Some("t".to_owned()),
        });
        s.save(&path).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap(), s);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
