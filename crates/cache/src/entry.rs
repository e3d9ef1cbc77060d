//! Entry paths and the handle callers hold while reading an entry.

use crate::key::directory_name;
use crate::lock::LockRecord;
use crate::lock::file::FileLock;
use crate::lock::protocol::{self, Touched};
use parcel_package::PackageReader;
use parcel_source::CacheKey;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub(crate) const LOCK_EXTENSION: &str = "lock";
pub(crate) const MARKER_SUFFIX: &str = ".lock.time";

/// Filesystem locations belonging to one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    /// Materialized content.
    pub directory: PathBuf,
    /// `<directory>.lock`, beside the directory in the cache root.
    pub lock_file: PathBuf,
    /// `<lock_file>.time`, records access times the lock file could not.
    pub marker_file: PathBuf,
}

impl EntryPaths {
    pub fn new(root: &Path, key: &CacheKey) -> Self {
        Self::from_name(root, &directory_name(key))
    }

    pub fn from_name(root: &Path, name: &str) -> Self {
        Self {
            directory: root.join(name),
            lock_file: root.join(format!("{name}.{LOCK_EXTENSION}")),
            marker_file: root.join(format!("{name}{MARKER_SUFFIX}")),
        }
    }

    /// Paths for the entry a lock file belongs to, if it is named like one.
    pub fn from_lock_file(lock_file: &Path) -> Option<Self> {
        if lock_file.extension()? != LOCK_EXTENSION {
            return None;
        }
        let name = lock_file.file_stem()?.to_str()?;
        Some(Self::from_name(lock_file.parent()?, name))
    }
}

/// A shared lock on a populated entry.
///
/// The entry cannot be purged or evicted while the handle is alive. Dropping
/// the handle (or calling [`dispose`](Self::dispose)) releases the lock and
/// records the access time.
#[derive(Debug)]
pub struct CacheHandle {
    key: CacheKey,
    paths: EntryPaths,
    record: LockRecord,
    lock: Option<FileLock>,
}

impl CacheHandle {
    pub(crate) fn new(key: CacheKey, paths: EntryPaths, record: LockRecord, lock: FileLock) -> Self {
        Self {
            key,
            paths,
            record,
            lock: Some(lock),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Directory holding the materialized content.
    pub fn directory(&self) -> &Path {
        &self.paths.directory
    }

    pub fn paths(&self) -> &EntryPaths {
        &self.paths
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Read access to the materialized files.
    pub fn reader(&self) -> parcel_package::error::Result<PackageReader> {
        PackageReader::open(&self.paths.directory)
    }

    /// Whether the handle still holds its lock.
    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Release the shared lock and record the access time. Idempotent.
    ///
    /// Failures to record the access time are logged; they only affect how
    /// soon the entry becomes eligible for eviction.
    pub fn dispose(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        drop(lock);
        match protocol::record_access(&self.paths, SystemTime::now()) {
            Ok(Touched::LockFile) => tracing::trace!(key = %self.key, "Released entry"),
            Ok(Touched::Marker) => tracing::debug!(key = %self.key, "Released entry, access recorded on marker"),
            Ok(Touched::Nothing) => tracing::debug!(key = %self.key, "Released entry that no longer exists"),
            Err(e) => tracing::warn!(key = %self.key, error = %e, "Failed to record access time"),
        }
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}
