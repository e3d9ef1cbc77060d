//! Package Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A package error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for package operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Data is corrupt or malformed. Don't retry with the same input.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// No known archive signature was found in the content.
    #[display("unrecognized package format")]
    UnrecognizedFormat,
    /// An entry path is absolute, empty or escapes the package root.
    #[display("unsafe entry path: {}", _0.display())]
    UnsafePath(#[error(not(source))] PathBuf),
    /// An entry is neither a regular file nor a directory (links, devices...).
    #[display("unsupported entry type: {}", _0.display())]
    UnsupportedEntry(#[error(not(source))] PathBuf),
    /// Two entries disagree on whether a path is a file or a directory.
    #[display("conflicting entry: {}", _0.display())]
    Conflict(#[error(not(source))] PathBuf),
    /// The package does not contain its manifest entry.
    #[display("missing manifest: {_0}")]
    MissingManifest(#[error(not(source))] String),
    /// The requested path does not exist in the package.
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// An I/O operation failed. Used for writing extracted content.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }

    /// Returns `true` if the content itself failed validation, as opposed to
    /// the environment failing while handling valid content. Only these
    /// failures are eligible for writing the content as a plain file instead.
    pub fn is_invalid_package(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidData
                | ErrorKind::UnrecognizedFormat
                | ErrorKind::UnsafePath(_)
                | ErrorKind::UnsupportedEntry(_)
                | ErrorKind::Conflict(_)
                | ErrorKind::MissingManifest(_)
        )
    }
}
