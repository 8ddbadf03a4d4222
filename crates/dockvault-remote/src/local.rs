use crate::{validate_remote_path, FileInfo, RemoteError, StorageBackend};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// A directory on a locally reachable filesystem (a second disk, a mounted
/// share, a USB drive).
pub struct LocalStorage {
    base: PathBuf,
    connected: AtomicBool,
}

impl LocalStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, remote: &str) -> Result<PathBuf, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::NotConnected(self.base.display().to_string()));
        }
        validate_remote_path(remote)?;
        Ok(self.base.join(remote.trim_matches('/')))
    }
}

/// Copy into a temp file beside `dst`, then rename over it.
fn copy_atomic(src: &Path, dst: &Path) -> Result<u64, RemoteError> {
    let parent = dst.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let mut input = File::open(src)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    let n = io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|e| RemoteError::Io(e.error))?;
    Ok(n)
}

/// All regular files below `dir`, as sorted `/`-separated relative paths.
pub(crate) fn walk_files(dir: &Path) -> Result<Vec<String>, RemoteError> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(parts.join("/"));
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(dir, dir, &mut out)?;
    out.sort();
    Ok(out)
}

impl StorageBackend for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    fn connect(&self) -> Result<(), RemoteError> {
        fs::create_dir_all(&self.base)?;
        if !self.base.is_dir() {
            return Err(RemoteError::Config(format!(
                "{} is not a directory",
                self.base.display()
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("local storage ready at {}", self.base.display());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), RemoteError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn upload_file(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let dst = self.resolve(remote)?;
        let n = copy_atomic(local, &dst)?;
        tracing::debug!("copied {} -> {} ({n} bytes)", local.display(), dst.display());
        Ok(())
    }

    fn download_file(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let src = self.resolve(remote)?;
        if !src.is_file() {
            return Err(RemoteError::NotFound(remote.to_owned()));
        }
        copy_atomic(&src, local)?;
        Ok(())
    }

    fn delete_file(&self, remote: &str) -> Result<(), RemoteError> {
        let path = self.resolve(remote)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(remote.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self, remote_dir: &str) -> Result<Vec<String>, RemoteError> {
        let dir = self.resolve(remote_dir)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        walk_files(&dir)
    }

    fn file_exists(&self, remote: &str) -> Result<bool, RemoteError> {
        Ok(self.resolve(remote)?.exists())
    }

    fn file_info(&self, remote: &str) -> Result<FileInfo, RemoteError> {
        let path = self.resolve(remote)?;
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RemoteError::NotFound(remote.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(FileInfo {
            path: remote.to_owned(),
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            is_dir: meta.is_dir(),
        })
    }

    fn available_space(&self) -> Result<Option<u64>, RemoteError> {
        let Ok(c_path) = std::ffi::CString::new(self.base.to_string_lossy().as_bytes()) else {
            return Ok(None);
        };

        // SAFETY: zeroed statvfs is a valid initial state for the struct.
        #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: statvfs with a valid, NUL-terminated path and a properly
        // zeroed output struct is well-defined. The struct is only read
        // after the call succeeds.
        #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
        if ret != 0 {
            return Ok(None);
        }

        #[allow(clippy::unnecessary_cast)]
        let avail = stat.f_bavail as u64 * stat.f_frsize as u64;
        Ok(Some(avail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(dir: &Path) -> LocalStorage {
        let s = LocalStorage::new(dir.join("remote"));
        s.connect().unwrap();
        s
    }

    #[test]
    fn operations_require_connect() {
        let dir = tempfile::tempdir().unwrap();
        let s = LocalStorage::new(dir.path());
        assert!(matches!(
            s.file_exists("x"),
            Err(RemoteError::NotConnected(_))
        ));
    }

    #[test]
    fn upload_download_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let s = connected(dir.path());
        let src = dir.path().join("src.bin");
        fs::write(&src, b"payload").unwrap();

        s.upload_file(&src, "b1/filesystem.tar.gz").unwrap();
        assert!(s.file_exists("b1/filesystem.tar.gz").unwrap());
        assert_eq!(s.file_info("b1/filesystem.tar.gz").unwrap().size, 7);

        let dst = dir.path().join("out/copy.bin");
        s.download_file("b1/filesystem.tar.gz", &dst).unwrap();
        assert_eq!(fs::read(dst).unwrap(), b"payload");
    }

    #[test]
    fn list_files_is_recursive_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        let s = connected(dir.path());
        let src = dir.path().join("f");
        fs::write(&src, b"x").unwrap();
        s.upload_file(&src, "b1/a").unwrap();
        s.upload_file(&src, "b1/sub/b").unwrap();
        s.upload_file(&src, "b2/c").unwrap();

        assert_eq!(s.list_files("b1").unwrap(), vec!["a", "sub/b"]);
        assert_eq!(s.list_files("").unwrap(), vec!["b1/a", "b1/sub/b", "b2/c"]);
        assert!(s.list_files("missing").unwrap().is_empty());
    }

    #[test]
    fn delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let s = connected(dir.path());
        assert!(matches!(s.delete_file("nope"), Err(RemoteError::NotFound(_))));
        assert!(matches!(s.file_info("nope"), Err(RemoteError::NotFound(_))));
    }

    #[test]
    fn escaping_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let s = connected(dir.path());
        assert!(matches!(
            s.file_exists("../outside"),
            Err(RemoteError::InvalidPath(_))
        ));
    }

    #[test]
    fn directory_transfer_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let s = connected(dir.path());
        let local = dir.path().join("bk");
        fs::create_dir_all(local.join("nested")).unwrap();
        fs::write(local.join("one"), b"1").unwrap();
        fs::write(local.join("nested/two"), b"2").unwrap();

        assert_eq!(s.upload_directory(&local, "bk").unwrap(), 2);
        let back = dir.path().join("back");
        assert_eq!(s.download_directory("bk", &back).unwrap(), 2);
        assert_eq!(fs::read(back.join("nested/two")).unwrap(), b"2");
        assert!(s.test_connection());
    }

    #[test]
    fn available_space_reported() {
        let dir = tempfile::tempdir().unwrap();
        let s = connected(dir.path());
        assert!(s.available_space().unwrap().is_some());
    }
}
