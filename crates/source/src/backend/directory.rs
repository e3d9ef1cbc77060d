//! Local directory content source.
//!
//! Content for a key lives at `<root>/<collection>/<sub>/<item>/<version>/`,
//! which holds exactly one file. The file's name is the suggested name and
//! its modification time is the source's last-modified time.

use crate::backend::{ContentSource, Fetched};
use crate::error::{ErrorKind, Result};
use crate::key::CacheKey;
use std::fs::{self, DirEntry};
use std::io;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tracing::instrument;

/// Serves content from a directory tree on the local filesystem.
///
/// # Examples
///
/// ```no_run
/// use parcel_source::backend::DirectorySource;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = DirectorySource::new("local", "/srv/content")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DirectorySource {
    name: String,
    root: PathBuf,
}

impl DirectorySource {
    /// Create a new directory source.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if `root` is relative
    /// or is not an existing directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { name: name.into(), root })
    }

    /// Directory holding the content for `key`.
    pub fn content_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.collection.to_string())
            .join(key.sub.to_string())
            .join(key.item.to_string())
            .join(key.version.to_string())
    }

    /// The single content file for `key`. With several candidates the first
    /// by name wins, so the choice is stable across processes.
    fn locate(&self, key: &CacheKey) -> Result<PathBuf> {
        let dir = self.content_dir(key);
        let entries = fs::read_dir(&dir).map_err(|e| Self::map_io_error(e, &dir, key))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry: DirEntry = entry.map_err(|e| Self::map_io_error(e, &dir, key))?;
            if entry.file_type().map_err(|e| Self::map_io_error(e, &dir, key))?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        match files.into_iter().next() {
            Some(path) => Ok(path),
            None => exn::bail!(ErrorKind::NotFound(key.to_string())),
        }
    }

    fn modified(path: &Path, key: &CacheKey) -> Result<UtcDateTime> {
        let metadata = fs::metadata(path).map_err(|e| Self::map_io_error(e, path, key))?;
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(UtcDateTime::from(modified))
    }

    fn map_io_error(e: io::Error, path: &Path, key: &CacheKey) -> ErrorKind {
        match e.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound(key.to_string()),
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }
}

impl ContentSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip(self), fields(source = %self.name, %key))]
    fn fetch(&self, key: &CacheKey) -> Result<Fetched> {
        let path = self.locate(key)?;
        let last_modified = Self::modified(&path, key)?;
        let bytes = fs::read(&path).map_err(|e| Self::map_io_error(e, &path, key))?;
        let suggested_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        tracing::debug!(size = bytes.len(), name = %suggested_name, "Fetched content");
        Ok(Fetched { bytes, last_modified, suggested_name })
    }

    fn peek_last_modified(&self, key: &CacheKey) -> Result<UtcDateTime> {
        let path = self.locate(key)?;
        Self::modified(&path, key)
    }
}
