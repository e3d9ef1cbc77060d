//! Package format detection, validation and extraction.
//!
//! Content fetched for the cache is either a structured package (a zip or tar
//! archive, optionally wrapped in a compression layer) or a single opaque
//! document. This crate decides which, by signature rather than by name, and provides:
//!
//! - **Format sniffing** via flat signature tables ([`Format::sniff`])
//! - **Validation** of every entry before anything touches the disk
//!   ([`Package::open`])
//! - **Extraction** preserving relative paths ([`Package::extract_to`])
//! - **Reading** materialized content back ([`PackageReader`])
//!
//! Gzip and Bzip2 compression layers are always available. XZ and Zstd are
//! behind feature flags of the same name.

mod compression;
pub mod error;
mod extract;
mod format;
mod path;
mod reader;

pub use crate::compression::Compression;
pub use crate::extract::{Extracted, Package};
pub use crate::format::{Archive, Format};
pub use crate::path::{file_name as sanitize_file_name, validate as validate_path};
pub use crate::reader::PackageReader;

/// Name of the manifest entry that marks an archive as a package.
pub const DEFAULT_MANIFEST: &str = "imsmanifest.xml";
