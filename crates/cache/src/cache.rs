//! The cache: acquisition loop, inspection and sweeping.

use crate::entry::{CacheHandle, EntryPaths};
use crate::error::{Error, ErrorKind, Result};
use crate::janitor::{Janitor, SweepStats};
use crate::lock::file::FileLock;
use crate::lock::protocol::{self, CreateOutcome, PurgeOutcome, SharedOpen};
use crate::lock::{LockRecord, ParseError};
use crate::materialize::{MaterializeMode, Materializer};
use exn::ResultExt;
use parcel_source::{CacheKey, SourceHandle};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Absolute directory holding entries and lock files.
    pub root: PathBuf,
    /// Idle time after which an entry may be evicted; `None` never evicts.
    pub ttl: Option<Duration>,
    pub fallback_invalid_as_file: bool,
    pub sweep_interval: Duration,
    pub max_deletions_per_sweep: usize,
    pub quiescence_window: Duration,
    pub lock_acquire_timeout: Duration,
    pub retry_backoff: Duration,
    pub manifest_name: String,
}

impl CacheOptions {
    /// Options with the default timings for a cache at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ttl: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            fallback_invalid_as_file: false,
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            max_deletions_per_sweep: 3,
            quiescence_window: Duration::from_secs(2 * 60),
            lock_acquire_timeout: Duration::from_secs(2 * 60),
            retry_backoff: Duration::from_millis(750),
            manifest_name: parcel_package::DEFAULT_MANIFEST.to_string(),
        }
    }
}

/// What one pass through the protocol achieved.
#[derive(Debug)]
enum Outcome {
    /// This call materialized and stamped the entry.
    Created,
    /// Someone else holds the entry exclusively.
    AlreadyLocked,
    /// The entry is out of date or in the wrong form.
    Stale(PurgeOutcome),
    /// The lock record is unreadable.
    Corrupt(PurgeOutcome),
    /// The lock file vanished between create and open.
    Missing,
    Ready(CacheHandle),
}

impl Outcome {
    /// Whether the next attempt should wait first. Progress that changed the
    /// entry is followed up immediately.
    fn backs_off(&self) -> bool {
        match self {
            Self::Created | Self::Missing | Self::Ready(_) => false,
            Self::AlreadyLocked => true,
            Self::Stale(purge) | Self::Corrupt(purge) => *purge == PurgeOutcome::InUse,
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Created => write!(f, "created"),
            Self::AlreadyLocked => write!(f, "already locked"),
            Self::Stale(purge) => write!(f, "stale ({purge:?})"),
            Self::Corrupt(purge) => write!(f, "corrupt ({purge:?})"),
            Self::Missing => write!(f, "missing"),
            Self::Ready(_) => write!(f, "ready"),
        }
    }
}

/// State of an entry as seen without taking part in the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    /// Held exclusively by a writer, purger or sweep.
    Busy,
    Corrupt(ParseError),
    Cached {
        record: LockRecord,
        last_access: Option<SystemTime>,
    },
}

/// A filesystem cache of materialized content, safe to share between threads
/// and between processes using the same root.
///
/// # Examples
///
/// ```no_run
/// use parcel_cache::{Cache, CacheKey, CacheOptions, MaterializeMode};
/// use parcel_source::backend::DirectorySource;
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = Arc::new(DirectorySource::new("local", "/srv/content")?);
/// let cache = Cache::new(CacheOptions::new("/var/cache/parcel"), source)?;
/// let key = CacheKey::new(Uuid::nil(), Uuid::nil(), Uuid::from_u128(1), 1);
/// let handle = cache.acquire(&key, MaterializeMode::AttemptAsPackage)?;
/// for file in handle.reader()?.list()? {
///     println!("{}", handle.directory().join(file).display());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Cache {
    options: CacheOptions,
    source: SourceHandle,
    materializer: Materializer,
    janitor: Janitor,
}

impl Cache {
    /// Open a cache at `options.root`, creating the directory if needed.
    pub fn new(options: CacheOptions, source: SourceHandle) -> Result<Self> {
        if !options.root.is_absolute() {
            exn::bail!(ErrorKind::Config(format!("cache root `{}` is not absolute", options.root.display())));
        }
        if options.retry_backoff.is_zero() {
            exn::bail!(ErrorKind::Config("retry backoff must be greater than zero".to_string()));
        }
        fs::create_dir_all(&options.root).or_raise(|| ErrorKind::Io)?;
        let materializer = Materializer::new(&options.manifest_name, options.fallback_invalid_as_file);
        let janitor = Janitor::new(
            &options.root,
            options.ttl,
            options.sweep_interval,
            options.max_deletions_per_sweep,
        );
        tracing::debug!(root = %options.root.display(), source = source.name(), "Cache opened");
        Ok(Self {
            options,
            source,
            materializer,
            janitor,
        })
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn paths(&self, key: &CacheKey) -> EntryPaths {
        EntryPaths::new(&self.options.root, key)
    }

    /// Obtain a shared lock on a populated, current entry for `key`,
    /// materializing it from the source when needed.
    ///
    /// Retries until [`lock_acquire_timeout`](CacheOptions::lock_acquire_timeout)
    /// while other processes write, repair or evict the entry.
    ///
    /// # Errors
    /// - [`ErrorKind::InvalidContent`] when the content is not a valid
    ///   package and file fallback is disabled.
    /// - [`ErrorKind::Source`] when the source fails in a way retrying will
    ///   not fix.
    /// - [`ErrorKind::LockTimeout`] when no attempt succeeded in time.
    #[instrument(level = "debug", skip(self), fields(%key))]
    pub fn acquire(&self, key: &CacheKey, mode: MaterializeMode) -> Result<CacheHandle> {
        let paths = self.paths(key);
        let started = Instant::now();
        let mut first_error: Option<Error> = None;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let backs_off = match self.attempt(key, &paths, mode) {
                Ok(Outcome::Ready(handle)) => {
                    tracing::debug!(attempt, elapsed = ?started.elapsed(), "Entry ready");
                    self.maybe_sweep();
                    return Ok(handle);
                },
                Ok(outcome) => {
                    tracing::debug!(attempt, %outcome, "Entry not ready");
                    outcome.backs_off()
                },
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::debug!(attempt, error = ?e, "Retryable failure");
                    first_error.get_or_insert(e);
                    true
                },
            };
            let elapsed = started.elapsed();
            if elapsed >= self.options.lock_acquire_timeout {
                let kind = ErrorKind::LockTimeout { key: *key, elapsed };
                tracing::warn!(attempts = attempt, ?elapsed, "Gave up acquiring entry");
                return Err(match first_error {
                    Some(inner) => inner.raise(kind),
                    None => exn::Exn::from(kind),
                });
            }
            if backs_off {
                thread::sleep(self.options.retry_backoff.min(self.options.lock_acquire_timeout - elapsed));
            }
        }
    }

    fn attempt(&self, key: &CacheKey, paths: &EntryPaths, mode: MaterializeMode) -> Result<Outcome> {
        match protocol::try_create_exclusive(paths).or_raise(|| ErrorKind::Io)? {
            CreateOutcome::Writer(lock) => return self.populate(key, paths, lock, mode),
            CreateOutcome::Superseded => return Ok(Outcome::AlreadyLocked),
            CreateOutcome::AlreadyExists => {},
        }
        let (lock, record) = match protocol::open_shared(paths).or_raise(|| ErrorKind::Io)? {
            SharedOpen::Shared(lock, record) => (lock, record),
            SharedOpen::AlreadyLocked => return Ok(Outcome::AlreadyLocked),
            SharedOpen::Missing => return Ok(Outcome::Missing),
            SharedOpen::Corrupt(reason) => {
                tracing::debug!(%reason, lock = %paths.lock_file.display(), "Corrupt lock record");
                let purged = protocol::purge(paths, |current| current.is_err()).or_raise(|| ErrorKind::Io)?;
                return Ok(Outcome::Corrupt(purged));
            },
        };
        if protocol::is_format_mismatch(&record, mode) {
            tracing::debug!(format = ?record.format, ?mode, "Entry written in another form");
            return self.rebuild(paths, lock, record);
        }
        if self.source_changed(key, paths, &record) {
            return self.rebuild(paths, lock, record);
        }
        Ok(Outcome::Ready(CacheHandle::new(*key, paths.clone(), record, lock)))
    }

    /// Materialize and stamp an entry this call owns exclusively.
    fn populate(&self, key: &CacheKey, paths: &EntryPaths, lock: FileLock, mode: MaterializeMode) -> Result<Outcome> {
        let record = match self.fetch_and_materialize(key, paths, mode) {
            Ok(record) => record,
            Err(e) => {
                // Without a lock file the next attempt, here or elsewhere, starts over.
                if let Err(cleanup) = protocol::delete_entry(paths, &lock) {
                    tracing::warn!(error = %cleanup, lock = %paths.lock_file.display(), "Failed to abandon entry");
                }
                return Err(e);
            },
        };
        // A failed stamp leaves an unreadable record, which the next reader purges.
        protocol::write_stamp(lock, &record).or_raise(|| ErrorKind::Io)?;
        tracing::debug!(format = ?record.format, length = record.content_length, "Entry stamped");
        Ok(Outcome::Created)
    }

    fn fetch_and_materialize(&self, key: &CacheKey, paths: &EntryPaths, mode: MaterializeMode) -> Result<LockRecord> {
        let fetched = self.source.fetch(key).map_err(ErrorKind::source)?;
        let materialized = self.materializer.materialize(key, &paths.directory, &fetched, mode)?;
        Ok(LockRecord::new(fetched.last_modified, materialized.content_length, materialized.format))
    }

    /// Release a shared lock and try to delete an entry so it can be
    /// rebuilt. Succeeds only when no one else is reading it.
    fn rebuild(&self, paths: &EntryPaths, lock: FileLock, observed: LockRecord) -> Result<Outcome> {
        drop(lock);
        let purged = protocol::purge(paths, |current| current.is_ok_and(|current| current == observed))
            .or_raise(|| ErrorKind::Io)?;
        Ok(Outcome::Stale(purged))
    }

    /// Whether the source changed since the entry was written. Only asked
    /// once the entry has been idle for longer than the quiescence window; a
    /// failing source keeps the cached content usable.
    fn source_changed(&self, key: &CacheKey, paths: &EntryPaths, record: &LockRecord) -> bool {
        let last_access = match protocol::last_access(paths) {
            Ok(Some(last_access)) => last_access,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read access time, skipping staleness check");
                return false;
            },
        };
        if !protocol::is_quiescent(last_access, SystemTime::now(), self.options.quiescence_window) {
            return false;
        }
        match self.source.peek_last_modified(key) {
            Ok(modified) if protocol::is_stale(record, modified) => {
                tracing::info!(cached = %record.source_last_modified, source = %modified, "Entry is stale");
                true
            },
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = ?e, "Failed to check source for changes, serving cached entry");
                false
            },
        }
    }

    /// Read an entry's state without waiting or repairing anything.
    pub fn inspect(&self, key: &CacheKey) -> Result<EntryState> {
        let paths = self.paths(key);
        let state = match protocol::open_shared(&paths).or_raise(|| ErrorKind::Io)? {
            SharedOpen::Missing => EntryState::Absent,
            SharedOpen::AlreadyLocked => EntryState::Busy,
            SharedOpen::Corrupt(reason) => EntryState::Corrupt(reason),
            SharedOpen::Shared(_lock, record) => EntryState::Cached {
                record,
                last_access: protocol::last_access(&paths).or_raise(|| ErrorKind::Io)?,
            },
        };
        Ok(state)
    }

    /// Evict expired entries, at most once per sweep interval.
    pub fn sweep(&self) -> Result<SweepStats> {
        self.janitor.sweep()
    }

    /// Evict expired entries now.
    pub fn sweep_now(&self) -> Result<SweepStats> {
        self.janitor.sweep_now()
    }

    fn maybe_sweep(&self) {
        match self.janitor.sweep() {
            Ok(stats) if !stats.skipped => tracing::debug!(deleted = stats.deleted, "Background sweep finished"),
            Ok(_) => {},
            Err(e) => tracing::warn!(error = ?e, "Background sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{encode_id, encode_version};
    use crate::lock::FormatCode;
    use crate::lock::file::LockMode;
    use crate::lock::record::from_ticks;
    use parcel_source::backend::MockSource;
    use rstest::rstest;
    use std::io::{Cursor, Write};
    use std::sync::Arc;
    use tempfile::TempDir;
    use time::UtcDateTime;
    use uuid::Uuid;
    use zip::write::SimpleFileOptions;

    const MANIFEST: &str = "imsmanifest.xml";

    fn key() -> CacheKey {
        CacheKey::new(Uuid::from_u128(0x5), Uuid::from_u128(0x77), Uuid::from_u128(0xF00D), 3)
    }

    fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn package() -> Vec<u8> {
        tarball(&[(MANIFEST, &b"<manifest/>"[..]), ("res/index.html", &b"<html/>"[..])])
    }

    fn options(dir: &TempDir) -> CacheOptions {
        CacheOptions {
            retry_backoff: Duration::from_millis(10),
            lock_acquire_timeout: Duration::from_secs(5),
            ..CacheOptions::new(dir.path().join("cache"))
        }
    }

    fn setup(options: CacheOptions, content: Vec<u8>) -> (Cache, Arc<MockSource>) {
        let source = Arc::new(MockSource::default().with_content(key(), "course.tar", content));
        let cache = Cache::new(options, source.clone()).unwrap();
        (cache, source)
    }

    fn age_lock_file(paths: &EntryPaths, by: Duration) {
        let file = fs::File::options().write(true).open(&paths.lock_file).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_rejects_relative_root() {
        let source = Arc::new(MockSource::default());
        let err = Cache::new(CacheOptions::new("relative"), source).err().unwrap();
        assert!(matches!(*err, ErrorKind::Config(_)));
    }

    #[test]
    fn test_acquire_package() {
        let dir = TempDir::new().unwrap();
        let (cache, source) = setup(options(&dir), package());
        let handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(handle.record().format, FormatCode::WrittenAsPackage);
        assert_eq!(handle.record().content_length, package().len() as u64);
        assert_eq!(fs::read(handle.directory().join("res/index.html")).unwrap(), b"<html/>");
        assert!(handle.reader().unwrap().exists(MANIFEST).unwrap());
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_second_acquire_reuses_entry() {
        let dir = TempDir::new().unwrap();
        let (cache, source) = setup(options(&dir), package());
        let first = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        let record = *first.record();
        // Concurrent readers share the entry.
        let second = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(*second.record(), record);
        drop((first, second));
        let third = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(*third.record(), record);
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_persisted_record_and_names() {
        let dir = TempDir::new().unwrap();
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(MANIFEST, stored).unwrap();
        writer.write_all(b"<manifest/>").unwrap();
        writer.start_file("res/a.html", stored).unwrap();
        writer.write_all(b"<html/>").unwrap();
        let archive = writer.finish().unwrap().into_inner();
        let length = archive.len();
        let (cache, source) = setup(options(&dir), archive);
        source.set_last_modified(&key(), from_ticks(638_000_000_000_000_000).unwrap());

        let handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        let paths = cache.paths(&key());
        let expected_name = format!("{}_{}", encode_id(0xF00D), encode_version(3));
        assert_eq!(paths.directory.file_name().unwrap().to_str().unwrap(), expected_name);
        assert_eq!(paths.lock_file, dir.path().join("cache").join(format!("{expected_name}.lock")));
        assert_eq!(
            fs::read_to_string(&paths.lock_file).unwrap(),
            format!("1 638000000000000000 {length} 1\n")
        );
        assert_eq!(handle.directory(), paths.directory);
        assert_eq!(fs::read(paths.directory.join(MANIFEST)).unwrap(), b"<manifest/>");
        assert_eq!(fs::read(paths.directory.join("res/a.html")).unwrap(), b"<html/>");
    }

    #[test]
    fn test_staleness_only_checked_when_quiescent() {
        let dir = TempDir::new().unwrap();
        let (cache, source) = setup(options(&dir), package());
        let paths = cache.paths(&key());
        let original = *cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap().record();

        let updated = UtcDateTime::now() + time::Duration::hours(1);
        source.set_last_modified(&key(), updated);

        // Recently used: the change at the source goes unnoticed.
        let handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(*handle.record(), original);
        assert_eq!(source.fetch_count(), 1);
        drop(handle);

        // Idle for longer than the window: rebuilt from the source.
        age_lock_file(&paths, Duration::from_secs(10 * 60));
        let handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(source.fetch_count(), 2);
        assert_eq!(handle.record().source_ticks(), LockRecord::new(updated, 0, FormatCode::WrittenAsFile).source_ticks());
    }

    #[test]
    fn test_unchanged_source_is_not_rebuilt() {
        let dir = TempDir::new().unwrap();
        let (cache, source) = setup(options(&dir), package());
        drop(cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap());
        age_lock_file(&cache.paths(&key()), Duration::from_secs(10 * 60));
        drop(cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap());
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_invalid_content_without_fallback() {
        let dir = TempDir::new().unwrap();
        let (cache, source) = setup(options(&dir), b"%PDF-1.7".to_vec());
        let err = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidContent { key: key() });
        let paths = cache.paths(&key());
        assert!(!paths.directory.exists());
        assert!(!paths.lock_file.exists());
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_invalid_content_with_fallback() {
        let dir = TempDir::new().unwrap();
        let options = CacheOptions {
            fallback_invalid_as_file: true,
            ..options(&dir)
        };
        let (cache, source) = setup(options, b"%PDF-1.7".to_vec());
        let handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(handle.record().format, FormatCode::InvalidPackageWrittenAsFile);
        assert_eq!(fs::read(handle.directory().join("course.tar")).unwrap(), b"%PDF-1.7");
        drop(handle);
        // Satisfies a single-file request too.
        let handle = cache.acquire(&key(), MaterializeMode::AlwaysAsFile).unwrap();
        assert_eq!(handle.record().format, FormatCode::InvalidPackageWrittenAsFile);
        assert_eq!(source.fetch_count(), 1);
    }

    #[rstest]
    #[case::without_fallback(false)]
    #[case::with_fallback(true)]
    fn test_conflicting_entries_are_invalid_content(#[case] fallback: bool) {
        let dir = TempDir::new().unwrap();
        let options = CacheOptions {
            fallback_invalid_as_file: fallback,
            ..options(&dir)
        };
        // `res` is both a file and the parent of `res/a.html`.
        let content = tarball(&[(MANIFEST, &b"<manifest/>"[..]), ("res", &b"x"[..]), ("res/a.html", &b"a"[..])]);
        let (cache, source) = setup(options, content.clone());

        let result = cache.acquire(&key(), MaterializeMode::AttemptAsPackage);
        match fallback {
            true => {
                let handle = result.unwrap();
                assert_eq!(handle.record().format, FormatCode::InvalidPackageWrittenAsFile);
                assert_eq!(fs::read(handle.directory().join("course.tar")).unwrap(), content);
            },
            false => {
                let err = result.unwrap_err();
                assert_eq!(*err, ErrorKind::InvalidContent { key: key() });
                assert!(!cache.paths(&key()).lock_file.exists());
            },
        }
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_format_mismatch_rebuilds() {
        let dir = TempDir::new().unwrap();
        let (cache, source) = setup(options(&dir), package());
        let handle = cache.acquire(&key(), MaterializeMode::AlwaysAsFile).unwrap();
        assert_eq!(handle.record().format, FormatCode::WrittenAsFile);
        assert!(handle.directory().join("course.tar").is_file());
        drop(handle);

        let handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(handle.record().format, FormatCode::WrittenAsPackage);
        assert!(handle.directory().join(MANIFEST).is_file());
        assert!(!handle.directory().join("course.tar").exists());
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn test_corrupt_record_is_repaired() {
        let dir = TempDir::new().unwrap();
        let (cache, source) = setup(options(&dir), package());
        let paths = cache.paths(&key());
        fs::create_dir_all(&paths.directory).unwrap();
        fs::write(paths.directory.join("partial.bin"), b"half").unwrap();
        fs::write(&paths.lock_file, b"").unwrap();
        assert!(matches!(cache.inspect(&key()).unwrap(), EntryState::Corrupt(ParseError::Empty)));

        let handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert_eq!(handle.record().format, FormatCode::WrittenAsPackage);
        assert!(!handle.directory().join("partial.bin").exists());
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_timeout_while_held_exclusively() {
        let dir = TempDir::new().unwrap();
        let options = CacheOptions {
            lock_acquire_timeout: Duration::from_millis(200),
            ..options(&dir)
        };
        let (cache, source) = setup(options, package());
        drop(cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap());
        let paths = cache.paths(&key());
        let _exclusive = FileLock::try_open(&paths.lock_file, LockMode::Exclusive).unwrap().unwrap();

        let started = Instant::now();
        let err = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(200));
        match &*err {
            ErrorKind::LockTimeout { key: timed_out, elapsed } => {
                assert_eq!(*timed_out, key());
                assert!(*elapsed >= Duration::from_millis(200));
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(cache.inspect(&key()).unwrap(), EntryState::Busy));
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_missing_content_fails_fast() {
        let dir = TempDir::new().unwrap();
        let (cache, _source) = setup(options(&dir), package());
        let started = Instant::now();
        let err = cache.acquire(&key().with_version(9), MaterializeMode::AttemptAsPackage).unwrap_err();
        assert_eq!(*err, ErrorKind::Source { retryable: false });
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!cache.paths(&key().with_version(9)).lock_file.exists());
    }

    #[test]
    fn test_inspect_and_dispose() {
        let dir = TempDir::new().unwrap();
        let (cache, _source) = setup(options(&dir), package());
        assert_eq!(cache.inspect(&key()).unwrap(), EntryState::Absent);

        let mut handle = cache.acquire(&key(), MaterializeMode::AttemptAsPackage).unwrap();
        assert!(handle.is_held());
        handle.dispose();
        handle.dispose();
        assert!(!handle.is_held());

        match cache.inspect(&key()).unwrap() {
            EntryState::Cached { record, last_access } => {
                assert_eq!(record, *handle.record());
                assert!(last_access.is_some());
            },
            other => panic!("unexpected state: {other:?}"),
        }
    }
}
