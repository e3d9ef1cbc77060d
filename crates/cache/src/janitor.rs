//! Bounded, best-effort eviction of expired entries.
//!
//! The only thing keeping a sweep away from entries in use is the exclusive
//! lock: it cannot be taken while any reader holds a shared one. Everything
//! else here is best effort; a failed deletion is logged and left for a
//! later sweep.

use crate::entry::{EntryPaths, MARKER_SUFFIX};
use crate::error::{ErrorKind, Result};
use crate::lock::file::{FileLock, LockMode};
use crate::lock::protocol;
use exn::ResultExt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tracing::instrument;

/// When this cache instance last swept.
#[derive(Debug)]
pub struct SweepClock {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl SweepClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Claim the next sweep if the interval has elapsed since the last one.
    /// The first claim always succeeds. Concurrent callers race for the
    /// mutex and only one of them wins.
    pub fn try_claim(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(previous) if now.saturating_duration_since(previous) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            },
        }
    }

    /// Record a sweep that ran regardless of the interval.
    pub fn reset(&self, now: Instant) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries whose last access was checked.
    pub examined: usize,
    pub deleted: usize,
    /// Expired entries a reader (or writer) still holds.
    pub skipped_in_use: usize,
    /// Expired entries that could not be deleted.
    pub failed: usize,
    /// The sweep did not run because the interval had not elapsed.
    pub skipped: bool,
}

#[derive(Debug)]
pub struct Janitor {
    root: PathBuf,
    ttl: Option<Duration>,
    max_deletions: usize,
    clock: SweepClock,
}

impl Janitor {
    pub fn new(root: impl Into<PathBuf>, ttl: Option<Duration>, interval: Duration, max_deletions: usize) -> Self {
        Self {
            root: root.into(),
            ttl,
            max_deletions,
            clock: SweepClock::new(interval),
        }
    }

    /// Sweep if the interval has elapsed since this janitor last swept.
    pub fn sweep(&self) -> Result<SweepStats> {
        if !self.clock.try_claim(Instant::now()) {
            return Ok(SweepStats {
                skipped: true,
                ..SweepStats::default()
            });
        }
        self.run(SystemTime::now())
    }

    /// Sweep now, regardless of the interval.
    pub fn sweep_now(&self) -> Result<SweepStats> {
        self.clock.reset(Instant::now());
        self.run(SystemTime::now())
    }

    #[instrument(level = "info", skip(self), fields(root = %self.root.display()))]
    fn run(&self, now: SystemTime) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let Some(ttl) = self.ttl else {
            tracing::debug!("Eviction disabled");
            return Ok(stats);
        };
        let mut candidates = Vec::new();
        let mut markers = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
        };
        for entry in entries {
            let path = entry.or_raise(|| ErrorKind::Io)?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.ends_with(MARKER_SUFFIX) {
                markers.push(path);
            } else if let Some(paths) = EntryPaths::from_lock_file(&path) {
                candidates.push(paths);
            }
        }
        // Oldest first, so the bound on deletions removes the most expired.
        let mut expired = Vec::new();
        for paths in candidates {
            stats.examined += 1;
            match protocol::last_access(&paths) {
                Ok(Some(last_access)) if protocol::is_quiescent(last_access, now, ttl) => {
                    expired.push((last_access, paths))
                },
                Ok(_) => {},
                Err(e) => tracing::warn!(lock = %paths.lock_file.display(), error = %e, "Failed to read access time"),
            }
        }
        expired.sort_by_key(|(last_access, _)| *last_access);
        for (_, paths) in expired {
            if stats.deleted >= self.max_deletions {
                tracing::debug!(limit = self.max_deletions, "Deletion limit reached");
                break;
            }
            match evict(&paths, ttl, now) {
                Ok(Eviction::Evicted) => stats.deleted += 1,
                Ok(Eviction::InUse) => stats.skipped_in_use += 1,
                Ok(Eviction::Fresh | Eviction::Gone) => {},
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(directory = %paths.directory.display(), error = %e, "Failed to evict entry");
                },
            }
        }
        remove_orphan_markers(&markers);
        tracing::info!(
            examined = stats.examined,
            deleted = stats.deleted,
            in_use = stats.skipped_in_use,
            failed = stats.failed,
            "Sweep finished"
        );
        Ok(stats)
    }
}

/// What happened to an expired candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    Evicted,
    /// A reader or writer holds the lock.
    InUse,
    /// Accessed again between the listing and taking the lock.
    Fresh,
    /// Purged by someone else since the listing.
    Gone,
}

/// Delete an entry unless someone holds it or it was used since the listing.
fn evict(paths: &EntryPaths, ttl: Duration, now: SystemTime) -> io::Result<Eviction> {
    let lock = match FileLock::try_open(&paths.lock_file, LockMode::Exclusive) {
        Ok(Some(lock)) => lock,
        Ok(None) => return Ok(Eviction::InUse),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Eviction::Gone),
        Err(e) => return Err(e),
    };
    if !lock.is_current()? {
        return Ok(Eviction::Gone);
    }
    match protocol::last_access(paths)? {
        Some(last_access) if protocol::is_quiescent(last_access, now, ttl) => {},
        Some(_) => return Ok(Eviction::Fresh),
        None => return Ok(Eviction::Gone),
    }
    protocol::delete_entry(paths, &lock)?;
    tracing::info!(directory = %paths.directory.display(), "Evicted entry");
    Ok(Eviction::Evicted)
}

/// Markers whose lock file is gone belong to entries deleted while a
/// release was recording its access time.
fn remove_orphan_markers(markers: &[PathBuf]) {
    for marker in markers {
        let lock_file: &Path = match marker.to_str().and_then(|m| m.strip_suffix(".time")) {
            Some(lock_file) => Path::new(lock_file),
            None => continue,
        };
        if lock_file.exists() {
            continue;
        }
        if let Err(e) = fs::remove_file(marker)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(marker = %marker.display(), error = %e, "Failed to remove orphaned marker");
        }
    }
}
