//! Read access to materialized content.
//!
//! Callers holding a cache handle read through a [`PackageReader`] rather
//! than touching the cache directory directly, so that paths coming from
//! manifests or user input cannot escape the entry.

use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use exn::{OptionExt, ResultExt};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Read-only view over a materialized directory or a single document.
#[derive(Debug, Clone)]
pub enum PackageReader {
    /// An extracted package; paths are relative to the directory.
    Directory(PathBuf),
    /// A single document; its file name is the only valid path.
    File(PathBuf),
}

impl PackageReader {
    /// Open a reader over `path`, which must exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())),
            _ => exn::Exn::from(ErrorKind::Io),
        })?;
        match metadata.is_dir() {
            true => Ok(Self::Directory(path.to_path_buf())),
            false => Ok(Self::File(path.to_path_buf())),
        }
    }

    /// List every file (not directory), relative and sorted.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let root = match self {
            Self::File(path) => {
                let name = path.file_name().ok_or_raise(|| ErrorKind::NotFound(path.clone()))?;
                return Ok(vec![PathBuf::from(name)]);
            },
            Self::Directory(root) => root,
        };
        let mut files = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current).or_raise(|| ErrorKind::Io)? {
                let entry = entry.or_raise(|| ErrorKind::Io)?;
                let file_type = entry.file_type().or_raise(|| ErrorKind::Io)?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    // Paths under `root` came from read_dir, strip_prefix cannot fail.
                    if let Ok(relative) = entry.path().strip_prefix(root) {
                        files.push(relative.to_path_buf());
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Check whether `path` names a file in the package.
    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        match self.resolve(path) {
            Ok(absolute) => Ok(absolute.is_file()),
            Err(e) if matches!(*e, ErrorKind::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Open `path` for streaming reads.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<File> {
        let absolute = self.resolve(path.as_ref())?;
        File::open(&absolute).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => exn::Exn::from(ErrorKind::NotFound(path.as_ref().to_path_buf())),
            _ => exn::Exn::from(ErrorKind::Io),
        })
    }

    /// Read the whole of `path` into memory.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let mut file = self.open_file(path)?;
        let mut buffer = Vec::new();
        io::Read::read_to_end(&mut file, &mut buffer).or_raise(|| ErrorKind::Io)?;
        Ok(buffer)
    }

    /// Stream `path` into `writer`, returning the number of bytes copied.
    pub fn copy_to<W: Write>(&self, path: impl AsRef<Path>, writer: &mut W) -> Result<u64> {
        let mut file = self.open_file(path)?;
        io::copy(&mut file, writer).or_raise(|| ErrorKind::Io)
    }

    fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = validate_path(path.as_ref())?;
        match self {
            Self::Directory(root) => Ok(root.join(relative)),
            Self::File(file) => match file.file_name() {
                Some(name) if relative.as_os_str() == name => Ok(file.clone()),
                _ => exn::bail!(ErrorKind::NotFound(relative)),
            },
        }
    }
}
