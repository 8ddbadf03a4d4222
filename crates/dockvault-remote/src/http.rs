use crate::{validate_remote_path, FileInfo, RemoteError, StorageBackend};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// HTTP file server backend.
///
/// Expects a simple REST API rooted at `url`:
/// - `PUT    /<path>` upload a file
/// - `GET    /<path>` download a file
/// - `HEAD   /<path>` existence and size
/// - `DELETE /<path>` remove a file
/// - `GET    /<dir>/` list files below `dir` (JSON array of relative paths)
pub struct HttpStorage {
    url: String,
    auth_token: Option<String>,
    agent: ureq::Agent,
    connected: AtomicBool,
}

impl HttpStorage {
    pub fn new(url: &str, auth_token: Option<String>) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token,
            agent: ureq::Agent::new_with_defaults(),
            connected: AtomicBool::new(false),
        }
    }

    fn file_url(&self, remote: &str) -> Result<String, RemoteError> {
        validate_remote_path(remote)?;
        Ok(format!("{}/{}", self.url, remote.trim_matches('/')))
    }

    fn dir_url(&self, remote_dir: &str) -> Result<String, RemoteError> {
        validate_remote_path(remote_dir)?;
        match remote_dir.trim_matches('/') {
            "" => Ok(format!("{}/", self.url)),
            d => Ok(format!("{}/{d}/", self.url)),
        }
    }

    fn ensure_connected(&self) -> Result<(), RemoteError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RemoteError::NotConnected(self.url.clone()))
        }
    }

    fn bearer(&self) -> Option<String> {
        self.auth_token.as_ref().map(|t| format!("Bearer {t}"))
    }

    fn map_error(url: &str, e: ureq::Error) -> RemoteError {
        match e {
            ureq::Error::StatusCode(404) => RemoteError::NotFound(url.to_owned()),
            ureq::Error::StatusCode(code) => RemoteError::Http(format!("HTTP {code} for {url}")),
            e => RemoteError::Http(e.to_string()),
        }
    }

    fn check_status(url: &str, code: u16) -> Result<(), RemoteError> {
        match code {
            404 => Err(RemoteError::NotFound(url.to_owned())),
            c if c >= 400 => Err(RemoteError::Http(format!("HTTP {c} for {url}"))),
            _ => Ok(()),
        }
    }

    fn do_put(&self, url: &str, data: &[u8]) -> Result<(), RemoteError> {
        let mut req = self
            .agent
            .put(url)
            .header("Content-Type", "application/octet-stream")
            .header("X-Dockvault-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(auth) = self.bearer() {
            req = req.header("Authorization", &auth);
        }
        let resp = req.send(data).map_err(|e| Self::map_error(url, e))?;
        Self::check_status(url, resp.status().as_u16())
    }

    fn do_get(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("X-Dockvault-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(auth) = self.bearer() {
            req = req.header("Authorization", &auth);
        }
        let resp = req.call().map_err(|e| Self::map_error(url, e))?;
        Self::check_status(url, resp.status().as_u16())?;
        Ok(resp)
    }

    /// Status code and `Content-Length` of a HEAD request.
    fn do_head(&self, url: &str) -> Result<(u16, Option<u64>), RemoteError> {
        let mut req = self
            .agent
            .head(url)
            .header("X-Dockvault-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(auth) = self.bearer() {
            req = req.header("Authorization", &auth);
        }
        match req.call() {
            Ok(resp) => {
                let len = resp
                    .headers()
                    .get("content-length")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok());
                Ok((resp.status().as_u16(), len))
            }
            Err(ureq::Error::StatusCode(code)) => Ok((code, None)),
            Err(e) => Err(RemoteError::Http(e.to_string())),
        }
    }

    fn do_delete(&self, url: &str) -> Result<(), RemoteError> {
        let mut req = self
            .agent
            .delete(url)
            .header("X-Dockvault-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(auth) = self.bearer() {
            req = req.header("Authorization", &auth);
        }
        let resp = req.call().map_err(|e| Self::map_error(url, e))?;
        Self::check_status(url, resp.status().as_u16())
    }
}

impl StorageBackend for HttpStorage {
    fn name(&self) -> &str {
        "http"
    }

    /// Any HTTP answer from the base URL counts as reachable.
    fn connect(&self) -> Result<(), RemoteError> {
        let url = format!("{}/", self.url);
        let (code, _) = self.do_head(&url)?;
        tracing::debug!("HEAD {url} -> {code}");
        self.connected.store(true, Ordering::SeqCst);
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
        self.ensure_connected()?;
        let url = self.file_url(remote)?;
        let data = fs::read(local)?;
        tracing::debug!("PUT {url} ({} bytes)", data.len());
        self.do_put(&url, &data)
    }

    fn download_file(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.ensure_connected()?;
        let url = self.file_url(remote)?;
        tracing::debug!("GET {url}");
        let resp = self.do_get(&url)?;

        let parent = local.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        let mut reader = resp.into_body().into_reader();
        io::copy(&mut reader, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(local).map_err(|e| RemoteError::Io(e.error))?;
        Ok(())
    }

    fn delete_file(&self, remote: &str) -> Result<(), RemoteError> {
        self.ensure_connected()?;
        let url = self.file_url(remote)?;
        tracing::debug!("DELETE {url}");
        self.do_delete(&url)
    }

    fn list_files(&self, remote_dir: &str) -> Result<Vec<String>, RemoteError> {
        self.ensure_connected()?;
        let url = self.dir_url(remote_dir)?;
        tracing::debug!("GET {url}");
        let resp = match self.do_get(&url) {
            Ok(r) => r,
            Err(RemoteError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut body = String::new();
        io::Read::read_to_string(&mut resp.into_body().into_reader(), &mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        let mut files: Vec<String> = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        files.sort();
        Ok(files)
    }

    fn file_exists(&self, remote: &str) -> Result<bool, RemoteError> {
        self.ensure_connected()?;
        let url = self.file_url(remote)?;
        tracing::debug!("HEAD {url}");
        match self.do_head(&url)? {
            (200, _) => Ok(true),
            (404, _) => Ok(false),
            (code, _) => Err(RemoteError::Http(format!("HTTP {code} for HEAD {url}"))),
        }
    }

    fn file_info(&self, remote: &str) -> Result<FileInfo, RemoteError> {
        self.ensure_connected()?;
        let url = self.file_url(remote)?;
        match self.do_head(&url)? {
            (200, size) => Ok(FileInfo {
                path: remote.to_owned(),
                size: size.unwrap_or(0),
                modified: None,
                is_dir: false,
            }),
            (404, _) => Err(RemoteError::NotFound(url)),
            (code, _) => Err(RemoteError::Http(format!("HTTP {code} for HEAD {url}"))),
        }
    }
}
