//! Entry path validation.
//!
//! Every path inside a package is attacker-controlled as far as the cache is
//! concerned. Paths are normalized here before anything touches the disk.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Validates a package entry path and returns it normalized.
///
/// Rejects absolute paths, platform prefixes, null bytes, empty paths and any
/// path whose `..` components would leave the package root. `.` components,
/// repeated separators and trailing slashes are normalized away.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use parcel_package::validate_path;
///
/// assert_eq!(validate_path("res/./a.html").unwrap(), Path::new("res/a.html"));
/// assert_eq!(validate_path("res/../imsmanifest.xml").unwrap(), Path::new("imsmanifest.xml"));
/// assert!(validate_path("../escape").is_err());
/// assert!(validate_path("/etc/passwd").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::UnsafePath(original.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir => {},
            Component::RootDir | Component::Prefix(_) => exn::bail!(ErrorKind::UnsafePath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::UnsafePath(original.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::UnsafePath(original.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Reduce a remote-supplied file name to a single safe path component.
///
/// Only the final component of `name` is kept. Falls back to `fallback` when
/// nothing usable remains (empty names, `..`, `/`).
pub fn file_name(name: &str, fallback: &str) -> PathBuf {
    // Remote names sometimes carry Windows separators; treat both as separators
    // regardless of the platform we run on.
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    match validate(last) {
        Ok(path) if path.components().count() == 1 => path,
        _ => PathBuf::from(fallback),
    }
}
