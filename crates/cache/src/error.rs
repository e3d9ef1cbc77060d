//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures from the content source and
//! the package crate are raised into these kinds with their own frames kept
//! as children.

use derive_more::{Display, Error};
use parcel_package::error::Error as PackageError;
use parcel_source::CacheKey;
use parcel_source::error::Error as SourceError;
use std::time::Duration;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No usable entry could be obtained before the acquisition deadline. The
    /// first failure seen while retrying, if any, is attached as a child.
    #[display("timed out after {elapsed:?} acquiring {key}")]
    LockTimeout { key: CacheKey, elapsed: Duration },
    /// Content failed package validation and file fallback is disabled.
    #[display("content for {key} is not a valid package")]
    InvalidContent { key: CacheKey },
    /// The content source failed.
    #[display("content source error")]
    Source {
        #[error(not(source))]
        retryable: bool,
    },
    /// A filesystem operation in the cache root failed.
    #[display("cache I/O error")]
    Io,
    /// Cache options are unusable.
    #[display("invalid cache configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Source { retryable: true })
    }

    /// Raise a source failure, keeping its frame as a child.
    #[track_caller]
    pub fn source(err: SourceError) -> Error {
        let retryable = err.is_retryable();
        err.raise(ErrorKind::Source { retryable })
    }

    /// Raise a package failure that fallback did not absorb.
    #[track_caller]
    pub fn package(err: PackageError, key: CacheKey) -> Error {
        match err.is_invalid_package() {
            true => err.raise(ErrorKind::InvalidContent { key }),
            false => err.raise(ErrorKind::Io),
        }
    }
}
