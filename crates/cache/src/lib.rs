//! Cross-process filesystem cache for materialized content packages.
//!
//! Content fetched from a [`ContentSource`](parcel_source::ContentSource) is
//! written once into a directory under the cache root and then read in place
//! by any number of threads and processes. Coordination needs nothing but the
//! filesystem:
//!
//! - Each entry has a lock file beside its directory. Creating that file
//!   with `create_new` elects the single writer; readers hold shared
//!   advisory locks on it for as long as they use the entry.
//! - The lock file carries a one-line [`LockRecord`] written only after the
//!   directory is complete, so a readable record means a complete entry.
//! - Corrupt records, stale content and entries in the wrong form are purged
//!   under an exclusive lock, which readers' shared locks keep away.
//! - A [`Janitor`](janitor::Janitor) evicts entries idle for longer than the
//!   TTL, a few at a time.
//!
//! Entry names come from [`key::directory_name`]: a fixed-width encoding of
//! the item identifier and version that is safe on case-insensitive
//! filesystems.

mod cache;
mod entry;
pub mod error;
pub mod janitor;
pub mod key;
pub mod lock;
mod materialize;

pub use crate::cache::{Cache, CacheOptions, EntryState};
pub use crate::entry::{CacheHandle, EntryPaths};
pub use crate::janitor::SweepStats;
pub use crate::lock::{FormatCode, LockRecord};
pub use crate::materialize::{MaterializeMode, Materialized, Materializer};
pub use parcel_source::CacheKey;
