//! Package format sniffing.
//!
//! A package format is the pair of an optional compression layer and an
//! archive container. Both are picked from flat signature tables rather than
//! from file names or a type hierarchy; adding a format means adding a row.

use crate::compression::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
use tracing::instrument;

/// Bytes of decompressed content needed to see every archive signature.
const SNIFF_LENGTH: usize = 512;

/// A supported archive container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Archive {
    /// POSIX ustar or GNU tar.
    Tar,
    /// PKZIP, the usual container for SCORM and IMS content packages.
    Zip,
}

struct Signature {
    offset: usize,
    magic: &'static [u8],
    archive: Archive,
}

impl Signature {
    fn matches(&self, head: &[u8]) -> bool {
        head.get(self.offset..self.offset + self.magic.len()) == Some(self.magic)
    }
}

const ARCHIVE_SIGNATURES: &[Signature] = &[
    // Local file header of the first entry.
    Signature {
        offset: 0,
        magic: b"PK\x03\x04",
        archive: Archive::Zip,
    },
    // End of central directory record: an archive with no entries.
    Signature {
        offset: 0,
        magic: b"PK\x05\x06",
        archive: Archive::Zip,
    },
    // POSIX.1-1988 ustar: "ustar\0" followed by version "00".
    Signature {
        offset: 257,
        magic: b"ustar\0",
        archive: Archive::Tar,
    },
    // GNU tar: "ustar " followed by " \0".
    Signature {
        offset: 257,
        magic: b"ustar ",
        archive: Archive::Tar,
    },
];

/// The detected layers of a package.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Format {
    pub compression: Compression,
    pub archive: Archive,
}

impl Format {
    /// Sniff the format of `bytes`.
    ///
    /// The compression layer is detected from leading magic bytes, then just
    /// enough of the content is decompressed to look for an archive signature.
    ///
    /// # Errors
    /// - [`ErrorKind::InvalidData`] when the compression layer is corrupt.
    /// - [`ErrorKind::UnrecognizedFormat`] when no archive signature matches.
    #[instrument(level = "debug", skip(bytes), fields(size = bytes.len()))]
    pub fn sniff(bytes: &[u8]) -> Result<Self> {
        let compression = Compression::from_magic_bytes(bytes);
        let mut head = Vec::with_capacity(SNIFF_LENGTH);
        compression
            .wrap_reader(bytes)?
            .take(SNIFF_LENGTH as u64)
            .read_to_end(&mut head)
            .or_raise(|| ErrorKind::InvalidData)?;
        let archive = ARCHIVE_SIGNATURES
            .iter()
            .find(|signature| signature.matches(&head))
            .map(|signature| signature.archive);
        match archive {
            Some(archive) => Ok(Self { compression, archive }),
            None => exn::bail!(ErrorKind::UnrecognizedFormat),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match (self.archive, self.compression) {
            (Archive::Tar, Compression::None) => write!(f, "tar"),
            (Archive::Tar, compression) => write!(f, "tar+{compression}"),
            (Archive::Zip, Compression::None) => write!(f, "zip"),
            (Archive::Zip, compression) => write!(f, "zip+{compression}"),
        }
    }
}
