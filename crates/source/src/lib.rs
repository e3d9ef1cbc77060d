//! Content sources the cache materializes from.
//!
//! A source answers two questions about a [`CacheKey`]: "give me the bytes"
//! ([`ContentSource::fetch`]) and the much cheaper "when did this last
//! change?" ([`ContentSource::peek_last_modified`]), which the cache uses for
//! staleness checks without downloading anything.

pub mod backend;
pub mod error;
mod key;

pub use crate::backend::{ContentSource, Fetched};
pub use crate::key::CacheKey;
use std::sync::Arc;

pub type SourceHandle = Arc<dyn ContentSource + Send + Sync>;
