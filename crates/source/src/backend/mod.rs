//! Content source trait and implementations.

mod directory;
#[cfg(feature = "mock")]
mod mock;

pub use self::directory::DirectorySource;
#[cfg(feature = "mock")]
pub use self::mock::MockSource;
use crate::error::Result;
use crate::key::CacheKey;
use time::UtcDateTime;

/// Content retrieved from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// Modification time of the content at the source.
    pub last_modified: UtcDateTime,
    /// File name the source associates with the content. Untrusted: it may
    /// contain separators or be empty.
    pub suggested_name: String,
}

/// Unified interface for remote content stores.
///
/// Calls are synchronous and may block on I/O; the cache calls them from the
/// thread performing an acquisition. Implementations must be safe to call
/// concurrently from many threads.
///
/// # Examples
///
/// ```
/// use parcel_source::{CacheKey, ContentSource, error::Result};
///
/// fn size_of(source: &dyn ContentSource, key: &CacheKey) -> Result<usize> {
///     Ok(source.fetch(key)?.bytes.len())
/// }
/// ```
pub trait ContentSource: Send + Sync {
    /// Name of the configured source (used for logging only).
    fn name(&self) -> &str;

    /// Download the content for `key`.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// holds nothing for the key.
    fn fetch(&self, key: &CacheKey) -> Result<Fetched>;

    /// Modification time of the content for `key`, without downloading it.
    fn peek_last_modified(&self, key: &CacheKey) -> Result<UtcDateTime>;
}
