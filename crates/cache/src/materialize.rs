//! Writing fetched content into a cache directory.

use crate::error::{ErrorKind, Result};
use crate::lock::FormatCode;
use exn::ResultExt;
use parcel_package::{Package, sanitize_file_name};
use parcel_source::{CacheKey, Fetched};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tracing::instrument;

/// Name used when the source suggests nothing usable.
const FALLBACK_FILE_NAME: &str = "content";

/// How the caller wants content laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MaterializeMode {
    /// Extract the content if it is a valid package.
    #[default]
    AttemptAsPackage,
    /// Write the content verbatim as a single file.
    AlwaysAsFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materialized {
    pub format: FormatCode,
    /// Number of bytes fetched from the source.
    pub content_length: u64,
}

#[derive(Debug, Clone)]
pub struct Materializer {
    manifest: String,
    fallback_invalid_as_file: bool,
}

impl Materializer {
    pub fn new(manifest: impl Into<String>, fallback_invalid_as_file: bool) -> Self {
        Self {
            manifest: manifest.into(),
            fallback_invalid_as_file,
        }
    }

    /// Write `fetched` into a fresh `directory`.
    ///
    /// Anything already at `directory` is removed first. On failure the
    /// directory is removed again before the error is returned, so callers
    /// never see partial output.
    #[instrument(level = "info", skip(self, fetched), fields(directory = %directory.display(), size = fetched.bytes.len()))]
    pub fn materialize(
        &self,
        key: &CacheKey,
        directory: &Path,
        fetched: &Fetched,
        mode: MaterializeMode,
    ) -> Result<Materialized> {
        let result = self.write(key, directory, fetched, mode);
        if result.is_err()
            && let Err(e) = remove_dir(directory)
        {
            tracing::warn!(error = %e, directory = %directory.display(), "Failed to clean up after materialization");
        }
        let format = result?;
        tracing::info!(format = ?format, "Materialized content");
        Ok(Materialized {
            format,
            content_length: fetched.bytes.len() as u64,
        })
    }

    fn write(&self, key: &CacheKey, directory: &Path, fetched: &Fetched, mode: MaterializeMode) -> Result<FormatCode> {
        fresh_dir(directory).or_raise(|| ErrorKind::Io)?;
        if mode == MaterializeMode::AlwaysAsFile {
            write_single(directory, fetched)?;
            return Ok(FormatCode::WrittenAsFile);
        }
        let extracted = Package::open(&fetched.bytes, &self.manifest).and_then(|package| {
            tracing::debug!(format = %package.format(), entries = package.entries().len(), "Valid package");
            package.extract_to(directory)
        });
        match extracted {
            Ok(stats) => {
                tracing::debug!(files = stats.files, bytes = stats.bytes, "Extracted package");
                Ok(FormatCode::WrittenAsPackage)
            },
            Err(e) if e.is_invalid_package() && self.fallback_invalid_as_file => {
                let reason: &parcel_package::error::ErrorKind = &e;
                tracing::warn!(%reason, "Invalid package, writing as a single file");
                // Extraction may have written part of the package already.
                fresh_dir(directory).or_raise(|| ErrorKind::Io)?;
                write_single(directory, fetched)?;
                Ok(FormatCode::InvalidPackageWrittenAsFile)
            },
            Err(e) => Err(ErrorKind::package(e, *key)),
        }
    }
}

fn fresh_dir(directory: &Path) -> io::Result<()> {
    remove_dir(directory)?;
    fs::create_dir_all(directory)
}

fn remove_dir(directory: &Path) -> io::Result<()> {
    match fs::remove_dir_all(directory) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn write_single(directory: &Path, fetched: &Fetched) -> Result<()> {
    let name = sanitize_file_name(&fetched.suggested_name, FALLBACK_FILE_NAME);
    let mut file = File::create(directory.join(&name)).or_raise(|| ErrorKind::Io)?;
    file.write_all(&fetched.bytes).or_raise(|| ErrorKind::Io)?;
    file.sync_all().or_raise(|| ErrorKind::Io)?;
    tracing::debug!(name = %name.display(), "Wrote single file");
    Ok(())
}
