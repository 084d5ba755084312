//! Makes sure an object's bytes sit at their target path, exactly once.
//!
//! An existing regular file counts as reconciled (presence only, no size or
//! hash check). Downloads are streamed into a temp file next to the target
//! and renamed into place, so the target path never holds a partial file.
//! Bytes for a name nobody has recorded yet are only placed where nothing
//! exists, so two different objects racing for one name never overwrite
//! each other.

use crate::error::DownloadError;
use crate::vault::descriptor::MediaDescriptor;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tempfile::NamedTempFile;

const PARTIAL_PREFIX: &str = ".partial-";

/// Capability to stream the raw bytes behind a descriptor.
pub trait MediaFetcher: Send + Sync {
    fn open(&self, descriptor: &MediaDescriptor) -> Result<Box<dyn Read + Send>, DownloadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

/// Logs download progress at debug level in 10% steps when the size is known.
struct ProgressReader<R> {
    inner: R,
    label: String,
    total: u64,
    read: u64,
    last_decile: u64,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.total > 0 {
            let decile = (self.read.saturating_mul(10) / self.total).min(10);
            if decile > self.last_decile {
                self.last_decile = decile;
                tracing::debug!(
                    file = %self.label,
                    "{:.1}%",
                    self.read as f64 * 100.0 / self.total as f64
                );
            }
        }
        Ok(n)
    }
}

fn io_error(path: &Path, source: io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// A finished download waiting in a temp file beside its destination.
/// Dropping it deletes the temp file.
#[derive(Debug)]
pub struct Staged {
    partial: NamedTempFile,
    bytes: u64,
}

#[derive(Debug)]
pub enum Commit {
    Placed { bytes: u64 },
    /// Something already lives at the target; the download is handed back.
    Occupied(Staged),
}

impl Staged {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Rename into `target` unless a file already exists there.
    pub fn commit_new(self, target: &Path) -> Result<Commit, DownloadError> {
        let bytes = self.bytes;
        match self.partial.persist_noclobber(target) {
            Ok(_) => Ok(Commit::Placed { bytes }),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(Commit::Occupied(Staged {
                    partial: err.file,
                    bytes,
                }))
            }
            Err(err) => Err(io_error(target, err.error)),
        }
    }

    /// Rename into `target`, replacing whatever is there.
    fn commit_over(self, target: &Path) -> Result<u64, DownloadError> {
        self.partial
            .persist(target)
            .map_err(|err| io_error(target, err.error))?;
        Ok(self.bytes)
    }
}

/// Download `descriptor` into a temp file inside `dir`, creating `dir` first.
pub fn stage(
    dir: &Path,
    label: &str,
    descriptor: &MediaDescriptor,
    fetcher: &dyn MediaFetcher,
) -> Result<Staged, DownloadError> {
    fs::create_dir_all(dir).map_err(|err| io_error(dir, err))?;

    let mut partial = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|err| io_error(dir, err))?;

    let source = fetcher.open(descriptor)?;
    let mut reader = ProgressReader {
        inner: source,
        label: label.to_string(),
        total: descriptor.file_size.unwrap_or(0),
        read: 0,
        last_decile: 0,
    };

    // On any error below `partial` is dropped, which deletes the temp file.
    let bytes = io::copy(&mut reader, &mut partial).map_err(|err| io_error(dir, err))?;
    partial
        .as_file()
        .sync_all()
        .map_err(|err| io_error(partial.path(), err))?;

    Ok(Staged { partial, bytes })
}

/// Restore the file behind an existing record. Anything already at `target`
/// is taken to be that record's bytes.
pub fn ensure_present(
    target: &Path,
    descriptor: &MediaDescriptor,
    fetcher: &dyn MediaFetcher,
) -> Result<Reconciled, DownloadError> {
    if target.is_file() {
        return Ok(Reconciled::AlreadyPresent);
    }

    let Some(dir) = target.parent() else {
        return Err(io_error(
            target,
            io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory"),
        ));
    };
    let label = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let bytes = stage(dir, &label, descriptor, fetcher)?.commit_over(target)?;
    Ok(Reconciled::Downloaded { bytes })
}
