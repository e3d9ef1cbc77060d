//! In-memory content source for testing.

use crate::backend::{ContentSource, Fetched};
use crate::error::{ErrorKind, Result};
use crate::key::CacheKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::Duration;
use time::UtcDateTime;

/// In-memory content source for testing.
///
/// Counts calls to [`fetch`](ContentSource::fetch) so tests can assert how
/// many materializations actually happened, and allows the last-modified
/// time of an entry to be changed to simulate an update at the source.
///
/// # Examples
///
/// ```
/// use parcel_source::backend::MockSource;
/// use parcel_source::{CacheKey, ContentSource};
/// use uuid::Uuid;
///
/// let key = CacheKey::new(Uuid::nil(), Uuid::nil(), Uuid::from_u128(1), 1);
/// let source = MockSource::default().with_content(key, "lesson.pdf", b"%PDF");
/// assert_eq!(source.fetch(&key).unwrap().bytes, b"%PDF");
/// assert_eq!(source.fetch_count(), 1);
/// ```
pub struct MockSource {
    name: String,
    content: RwLock<HashMap<CacheKey, Fetched>>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl MockSource {
    /// Add content for `key`, last modified now.
    pub fn with_content(self, key: CacheKey, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(key, name, bytes);
        self
    }

    /// Change the name of the mock source.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep for `delay` inside every fetch, widening race windows in
    /// concurrency tests.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add or replace content for `key`, last modified now.
    pub fn insert(&self, key: CacheKey, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let fetched = Fetched {
            bytes: bytes.into(),
            last_modified: UtcDateTime::now(),
            suggested_name: name.into(),
        };
        self.content.write().unwrap_or_else(PoisonError::into_inner).insert(key, fetched);
    }

    /// Change the last-modified time reported for `key`.
    ///
    /// Panics if there is no content for `key`: the test setup is wrong.
    pub fn set_last_modified(&self, key: &CacheKey, last_modified: UtcDateTime) {
        let mut guard = self.content.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = guard.get_mut(key) else {
            panic!("MockSource::set_last_modified: no content for {key}");
        };
        entry.last_modified = last_modified;
    }

    /// Number of completed calls to [`fetch`](ContentSource::fetch).
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            content: RwLock::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            delay: None,
        }
    }
}

impl ContentSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, key: &CacheKey) -> Result<Fetched> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let fetched = self
            .content
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.to_string())))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(fetched)
    }

    fn peek_last_modified(&self, key: &CacheKey) -> Result<UtcDateTime> {
        self.content
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|fetched| fetched.last_modified)
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.to_string())))
    }
}
