//! The lock file protocol.
//!
//! One lock file per cache entry coordinates every process sharing the cache
//! root:
//!
//! - **Writers** create the lock file with `create_new`, so exactly one
//!   process materializes a given entry. The writer holds an exclusive lock
//!   until the record is stamped.
//! - **Readers** hold a shared lock for as long as they use the entry.
//! - **Purgers and the janitor** delete an entry only while holding an
//!   exclusive lock, which they cannot get while any reader is present.
//!
//! A directory is never trusted unless its lock file carries a valid record,
//! and a record is only written once the directory is complete.

use crate::entry::EntryPaths;
use crate::lock::file::{FileLock, LockMode};
use crate::lock::record::{FormatCode, LockRecord, ParseError, to_ticks};
use crate::materialize::MaterializeMode;
use std::fs::{self, OpenOptions};
use std::io;
use std::time::{Duration, SystemTime};
use time::UtcDateTime;

/// Result of trying to become the writer for an entry.
#[derive(Debug)]
pub enum CreateOutcome {
    /// This caller owns the entry and must materialize then stamp it.
    Writer(FileLock),
    /// Another process created the lock file first.
    AlreadyExists,
    /// The file was unlinked between create and lock; try again.
    Superseded,
}

/// Create the lock file for an entry and lock it exclusively.
pub fn try_create_exclusive(paths: &EntryPaths) -> io::Result<CreateOutcome> {
    let Some(lock) = FileLock::create_exclusive(&paths.lock_file)? else {
        return Ok(CreateOutcome::AlreadyExists);
    };
    match lock.is_current()? {
        true => Ok(CreateOutcome::Writer(lock)),
        false => Ok(CreateOutcome::Superseded),
    }
}

/// Persist `record` and release the writer's exclusive lock.
///
/// Must only be called once the entry's directory is fully written.
pub fn write_stamp(lock: FileLock, record: &LockRecord) -> io::Result<()> {
    lock.overwrite(record.to_string().as_bytes())
    // Dropping the handle releases the lock.
}

/// Result of opening an entry for reading.
#[derive(Debug)]
pub enum SharedOpen {
    /// A valid record, with a shared lock held until the lock is dropped.
    Shared(FileLock, LockRecord),
    /// A writer, purger or janitor holds the entry exclusively.
    AlreadyLocked,
    /// The lock file exists but its record is not valid.
    Corrupt(ParseError),
    /// There is no lock file (or it vanished while opening).
    Missing,
}

/// Open an entry's lock file with a shared lock and parse its record.
pub fn open_shared(paths: &EntryPaths) -> io::Result<SharedOpen> {
    let lock = match FileLock::try_open(&paths.lock_file, LockMode::Shared) {
        Ok(Some(lock)) => lock,
        Ok(None) => return Ok(SharedOpen::AlreadyLocked),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SharedOpen::Missing),
        Err(e) => return Err(e),
    };
    if !lock.is_current()? {
        return Ok(SharedOpen::Missing);
    }
    match lock.read_to_string()?.parse::<LockRecord>() {
        Ok(record) => Ok(SharedOpen::Shared(lock, record)),
        Err(e) => Ok(SharedOpen::Corrupt(e)),
    }
}

/// Whether an entry has been idle long enough to recheck the source.
///
/// Inside the window staleness is never rechecked, so a change at the source
/// goes unnoticed for as long as the entry keeps being used more often than
/// once per window.
pub fn is_quiescent(last_access: SystemTime, now: SystemTime, window: Duration) -> bool {
    now.duration_since(last_access).is_ok_and(|idle| idle > window)
}

/// Whether the source's content changed since the entry was written.
/// Compared at tick precision, which is all the record keeps.
pub fn is_stale(record: &LockRecord, source_last_modified: UtcDateTime) -> bool {
    record.source_ticks() != to_ticks(source_last_modified)
}

/// Whether an entry was written in a form `mode` cannot use.
///
/// Content that failed package validation satisfies both modes: asking for
/// it as a package again would only fail validation again.
pub fn is_format_mismatch(record: &LockRecord, mode: MaterializeMode) -> bool {
    matches!(
        (mode, record.format),
        (MaterializeMode::AttemptAsPackage, FormatCode::WrittenAsFile)
            | (MaterializeMode::AlwaysAsFile, FormatCode::WrittenAsPackage)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Directory, lock file and marker were deleted.
    Purged,
    /// Readers hold the entry; back off and retry.
    InUse,
    /// The reason for purging no longer holds (a concurrent process already
    /// repaired the entry).
    Unneeded,
    /// The lock file is gone already.
    Gone,
}

/// Delete an entry after re-checking, under an exclusive lock, that it
/// still needs deleting.
///
/// `still_needed` receives the record as it reads now. The caller must not
/// hold a shared lock on the entry.
pub fn purge(
    paths: &EntryPaths,
    still_needed: impl FnOnce(Result<LockRecord, ParseError>) -> bool,
) -> io::Result<PurgeOutcome> {
    let lock = match FileLock::try_open(&paths.lock_file, LockMode::Exclusive) {
        Ok(Some(lock)) => lock,
        Ok(None) => return Ok(PurgeOutcome::InUse),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PurgeOutcome::Gone),
        Err(e) => return Err(e),
    };
    if !lock.is_current()? {
        return Ok(PurgeOutcome::Gone);
    }
    if !still_needed(lock.read_to_string()?.parse()) {
        return Ok(PurgeOutcome::Unneeded);
    }
    delete_entry(paths, &lock)?;
    Ok(PurgeOutcome::Purged)
}

/// Delete the directory, then the marker, then the lock file itself.
///
/// `lock` must be the exclusive lock on `paths.lock_file`. The lock file goes
/// last so that a failure part way leaves an entry the next purge or sweep
/// will find again.
pub fn delete_entry(paths: &EntryPaths, lock: &FileLock) -> io::Result<()> {
    debug_assert_eq!(lock.mode(), LockMode::Exclusive);
    match fs::remove_dir_all(&paths.directory) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {},
    }
    match fs::remove_file(&paths.marker_file) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {},
    }
    lock.remove()
}

/// The later of the lock file's and the marker file's modification times.
/// `None` when there is no lock file.
pub fn last_access(paths: &EntryPaths) -> io::Result<Option<SystemTime>> {
    let lock = match fs::metadata(&paths.lock_file) {
        Ok(metadata) => metadata.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let marker = match fs::metadata(&paths.marker_file) {
        Ok(metadata) => Some(metadata.modified()?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    Ok(Some(marker.map_or(lock, |marker| marker.max(lock))))
}

/// Where an access time ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touched {
    LockFile,
    Marker,
    /// The entry was deleted in the meantime.
    Nothing,
}

/// Record `now` as the entry's last access.
///
/// The lock file's modification time is updated under a shared lock. When
/// that lock is unavailable (an exclusive holder is present) or the time
/// cannot be set, the zero-byte marker file records it instead.
pub fn record_access(paths: &EntryPaths, now: SystemTime) -> io::Result<Touched> {
    match FileLock::try_open_writable(&paths.lock_file, LockMode::Shared) {
        Ok(Some(lock)) => {
            if !lock.is_current()? {
                return Ok(Touched::Nothing);
            }
            match lock.file().set_modified(now) {
                Ok(()) => return Ok(Touched::LockFile),
                Err(e) => tracing::debug!(error = %e, "Could not touch lock file, using marker"),
            }
        },
        Ok(None) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Touched::Nothing),
        Err(e) => tracing::debug!(error = %e, "Could not open lock file for touching, using marker"),
    }
    let marker = OpenOptions::new().write(true).create(true).truncate(true).open(&paths.marker_file)?;
    marker.set_modified(now)?;
    Ok(Touched::Marker)
}
