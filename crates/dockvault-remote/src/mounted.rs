use crate::{FileInfo, LocalStorage, RemoteError, StorageBackend};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

/// An NFS export, mounted at `mount_point` on connect and unmounted on
/// disconnect. File operations go through a [`LocalStorage`] rooted at the
/// mount point.
pub struct MountedStorage {
    server: String,
    export: String,
    mount_point: PathBuf,
    options: Option<String>,
    inner: LocalStorage,
    /// Set only when this instance performed the mount, so an already
    /// mounted export is never unmounted behind someone else's back.
    mounted_here: AtomicBool,
}

impl MountedStorage {
    pub fn new(
        server: &str,
        export: &str,
        mount_point: impl Into<PathBuf>,
        options: Option<String>,
    ) -> Self {
        let mount_point = mount_point.into();
        Self {
            server: server.to_owned(),
            export: export.to_owned(),
            inner: LocalStorage::new(&mount_point),
            mount_point,
            options,
            mounted_here: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> String {
        format!("{}:{}", self.server, self.export)
    }

    pub fn mount_args(&self) -> Vec<String> {
        let mut args = vec!["-t".to_owned(), "nfs".to_owned()];
        if let Some(opts) = &self.options {
            args.push("-o".to_owned());
            args.push(opts.clone());
        }
        args.push(self.source());
        args.push(self.mount_point.to_string_lossy().into_owned());
        args
    }

    fn is_mounted(&self) -> bool {
        std::fs::read_to_string("/proc/mounts")
            .is_ok_and(|table| mounted_in(&table, &self.mount_point))
    }
}

/// Whether `/proc/mounts`-formatted `table` lists `mount_point` as a target.
pub fn mounted_in(table: &str, mount_point: &Path) -> bool {
    let target = mount_point.to_string_lossy();
    let target = target.trim_end_matches('/');
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|t| t.trim_end_matches('/') == target)
}

fn run_mount_command(program: &str, args: &[String]) -> Result<(), RemoteError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| RemoteError::Mount(format!("failed to run {program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RemoteError::Mount(format!(
            "{program} {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(())
}

impl StorageBackend for MountedStorage {
    fn name(&self) -> &str {
        "nfs"
    }

    fn connect(&self) -> Result<(), RemoteError> {
        if self.is_mounted() {
            tracing::debug!("{} already mounted", self.mount_point.display());
        } else {
            std::fs::create_dir_all(&self.mount_point)?;
            tracing::info!("mounting {} at {}", self.source(), self.mount_point.display());
            run_mount_command("mount", &self.mount_args())?;
            self.mounted_here.store(true, Ordering::SeqCst);
        }
        self.inner.connect()
    }

    fn disconnect(&self) -> Result<(), RemoteError> {
        self.inner.disconnect()?;
        if self.mounted_here.swap(false, Ordering::SeqCst) {
            tracing::info!("unmounting {}", self.mount_point.display());
            run_mount_command(
                "umount",
                &[self.mount_point.to_string_lossy().into_owned()],
            )?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn upload_file(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.inner.upload_file(local, remote)
    }

    fn download_file(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.inner.download_file(remote, local)
    }

    fn delete_file(&self, remote: &str) -> Result<(), RemoteError> {
        self.inner.delete_file(remote)
    }

    fn list_files(&self, remote_dir: &str) -> Result<Vec<String>, RemoteError> {
        self.inner.list_files(remote_dir)
    }

    fn file_exists(&self, remote: &str) -> Result<bool, RemoteError> {
        self.inner.file_exists(remote)
    }

    fn file_info(&self, remote: &str) -> Result<FileInfo, RemoteError> {
        self.inner.file_info(remote)
    }

    fn available_space(&self) -> Result<Option<u64>, RemoteError> {
        self.inner.available_space()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_args_include_options() {
        let s = MountedStorage::new("nas", "/exports/backups", "/mnt/dv", Some("vers=4".to_owned()));
        assert_eq!(
            s.mount_args(),
            vec!["-t", "nfs", "-o", "vers=4", "nas:/exports/backups", "/mnt/dv"]
        );
        let plain = MountedStorage::new("nas", "/b", "/mnt/x", None);
        assert_eq!(plain.mount_args(), vec!["-t", "nfs", "nas:/b", "/mnt/x"]);
    }

    #[test]
    fn mount_table_parsing() {
        let table = "proc /proc proc rw 0 0\nnas:/b /mnt/dv nfs4 rw,vers=4 0 0\n";
        assert!(mounted_in(table, Path::new("/mnt/dv")));
        assert!(mounted_in(table, Path::new("/mnt/dv/")));
        assert!(!mounted_in(table, Path::new("/mnt")));
    }

    #[test]
    fn file_operations_before_connect_fail() {
        let s = MountedStorage::new("nas", "/b", "/mnt/dockvault-test-never-mounted", None);
        assert!(!s.is_connected());
        assert!(matches!(
            s.list_files(""),
            Err(RemoteError::NotConnected(_))
        ));
        // Nothing was mounted, so disconnect must not try to unmount.
        s.disconnect().unwrap();
    }
}
