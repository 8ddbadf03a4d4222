//! gzip streaming for backup artifacts.
//!
//! Inputs are copied in [`CHUNK_SIZE`] pieces, so peak memory stays bounded
//! whatever the size of the exported filesystem or image. Outputs go through a
//! temporary file in the destination directory and are renamed into place, so
//! a half-written artifact never carries its final name.

use crate::{fsync_dir, StoreError, CHUNK_SIZE};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path};
use tempfile::NamedTempFile;
use tracing::debug;

/// Copy `reader` into `writer` in fixed-size chunks. Returns bytes copied.
pub fn copy_chunked(reader: &mut impl Read, writer: &mut impl Write) -> io::Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

fn persist_tmp(tmp: NamedTempFile, output: &Path) -> Result<(), StoreError> {
    tmp.as_file().sync_all()?;
    tmp.persist(output).map_err(|e| StoreError::Io(e.error))?;
    if let Some(parent) = output.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

fn tmp_beside(output: &Path) -> Result<NamedTempFile, StoreError> {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(NamedTempFile::new_in(parent)?)
}

/// gzip everything `reader` yields into `output` at `level` (0-9). Returns
/// the compressed size.
pub fn compress_reader(mut reader: impl Read, output: &Path, level: u32) -> Result<u64, StoreError> {
    let mut tmp = tmp_beside(output)?;
    let raw = {
        let mut encoder = GzEncoder::new(BufWriter::new(tmp.as_file_mut()), Compression::new(level));
        let raw = copy_chunked(&mut reader, &mut encoder)?;
        let mut inner = encoder.finish()?;
        inner.flush()?;
        raw
    };
    persist_tmp(tmp, output)?;
    let compressed = fs::metadata(output)?.len();
    debug!(
        "compressed {raw} bytes into {} ({compressed} bytes, level {level})",
        output.display()
    );
    Ok(compressed)
}

pub fn compress_file(input: &Path, output: &Path, level: u32) -> Result<u64, StoreError> {
    let file = File::open(input)?;
    compress_reader(BufReader::new(file), output, level)
}

/// Streaming reader over a `.gz` file.
pub fn gzip_reader(input: &Path) -> Result<GzDecoder<BufReader<File>>, StoreError> {
    Ok(GzDecoder::new(BufReader::new(File::open(input)?)))
}

/// Inflate `input` into `output`. Returns the decompressed size.
pub fn decompress_file(input: &Path, output: &Path) -> Result<u64, StoreError> {
    let mut decoder = gzip_reader(input)?;
    let mut tmp = tmp_beside(output)?;
    let written = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let written = copy_chunked(&mut decoder, &mut writer).map_err(|e| {
            StoreError::InvalidArchive {
                path: input.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        writer.flush()?;
        written
    };
    persist_tmp(tmp, output)?;
    debug!("decompressed {} to {written} bytes", input.display());
    Ok(written)
}

/// Walk every entry header of an uncompressed tar. Returns the entry count.
///
/// Entries with absolute paths or `..` components are rejected: they would
/// land outside the directory the archive is extracted into.
pub fn validate_tar(path: &Path) -> Result<usize, StoreError> {
    let invalid = |reason: String| StoreError::InvalidArchive {
        path: path.display().to_string(),
        reason,
    };
    if fs::metadata(path)?.len() == 0 {
        return Err(invalid("archive is empty".to_owned()));
    }
    let mut archive = tar::Archive::new(BufReader::new(File::open(path)?));
    let mut count = 0;
    for entry in archive.entries().map_err(|e| invalid(e.to_string()))? {
        let entry = entry.map_err(|e| invalid(e.to_string()))?;
        let entry_path = entry.path().map_err(|e| invalid(e.to_string()))?;
        let escapes = entry_path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(invalid(format!(
                "entry '{}' escapes the extraction root",
                entry_path.display()
            )));
        }
        count += 1;
    }
    Ok(count)
}
