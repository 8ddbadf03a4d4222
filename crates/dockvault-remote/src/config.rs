use crate::{HttpStorage, LocalStorage, MountedStorage, RemoteError, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where backups are pushed to and pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        path: PathBuf,
    },
    Nfs {
        server: String,
        export: String,
        mount_point: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<String>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
}

impl StorageConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Nfs { .. } => "nfs",
            Self::Http { .. } => "http",
        }
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        match self {
            Self::Local { path } if path.as_os_str().is_empty() => {
                Err(RemoteError::Config("local storage path is empty".to_owned()))
            }
            Self::Nfs { server, export, .. } if server.is_empty() || export.is_empty() => Err(
                RemoteError::Config("nfs storage needs both server and export".to_owned()),
            ),
            Self::Nfs { mount_point, .. } if !mount_point.is_absolute() => Err(
                RemoteError::Config(format!(
                    "nfs mount point must be absolute: {}",
                    mount_point.display()
                )),
            ),
            Self::Http { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                Err(RemoteError::Config(format!(
                    "http storage url must start with http:// or https://: {url}"
                )))
            }
            _ => Ok(()),
        }
    }
}

pub fn select_storage(config: &StorageConfig) -> Result<Box<dyn StorageBackend>, RemoteError> {
    config.validate()?;
    Ok(match config {
        StorageConfig::Local { path } => Box::new(LocalStorage::new(path)),
        StorageConfig::Nfs {
            server,
            export,
            mount_point,
            options,
        } => Box::new(MountedStorage::new(
            server,
            export,
            mount_point,
            options.clone(),
        )),
        StorageConfig::Http { url, auth_token } => {
            Box::new(HttpStorage::new(url, auth_token.clone()))
        }
    })
}
