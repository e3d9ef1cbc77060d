//! Compression layer detection and decoding.
//!
//! Packages may arrive wrapped in a single compression layer (a `.tar.gz`,
//! for example). The layer is detected from magic bytes only; file names
//! supplied by the remote source are never trusted for this.

#[cfg(feature = "zstd")]
use crate::error::ErrorKind;
use crate::error::Result;
use bzip2::read::BzDecoder;
#[cfg(feature = "zstd")]
use exn::ResultExt;
use flate2::read::GzDecoder;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
#[cfg(feature = "xz")]
use xz2::read::XzDecoder;
#[cfg(feature = "zstd")]
use zstd::stream::read::Decoder as ZstdDecoder;

/// A supported compression layer.
///
/// Variants gated behind feature flags (`xz`, `zstd`) are only available when
/// the corresponding feature is enabled. Defaults to [`None`](Self::None).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    #[cfg(feature = "xz")]
    Xz,
    /// Zstd compression (.zst)
    #[cfg(feature = "zstd")]
    Zstd,
}

/// Magic-byte prefixes, checked in order. First match wins.
const SIGNATURES: &[(&[u8], Compression)] = &[
    (&[0x42, 0x5A, 0x68], Compression::Bzip2),
    (&[0x1F, 0x8B], Compression::Gzip),
    #[cfg(feature = "xz")]
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], Compression::Xz),
    #[cfg(feature = "zstd")]
    (&[0x28, 0xB5, 0x2F, 0xFD], Compression::Zstd),
];

impl Compression {
    /// Detect compression format from magic bytes.
    ///
    /// Returns the `None` variant if no magic bytes match or if the input
    /// is too short to detect any format.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|(magic, _)| bytes.starts_with(magic))
            .map(|(_, compression)| *compression)
            .unwrap_or(Compression::None)
    }

    /// Wrap a reader with the appropriate decompression layer.
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::InvalidData)?),
        })
    }

    /// Returns the short name (for logging and display).
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            #[cfg(feature = "xz")]
            Compression::Xz => "xz",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use rstest::rstest;
    use std::io::{Cursor, Write};

    #[test]
    fn compression_default() {
        assert_eq!(Compression::default(), Compression::None);
    }

    #[rstest]
    #[case(b"<!DOCTYPE html>", Compression::None)]
    #[case(b"", Compression::None)]
    #[case(&[0x42, 0x5A], Compression::None)]
    #[case(&[0x42, 0x5A, 0x68, 0x39], Compression::Bzip2)]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Compression::Gzip)]
    #[cfg_attr(feature = "xz", case(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00], Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(&[0x28, 0xB5, 0x2F, 0xFD], Compression::Zstd))]
    fn test_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Compression) {
        assert_eq!(Compression::from_magic_bytes(bytes), expected);
    }

    #[test]
    fn test_wrap_reader_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"Hello, world!").unwrap();
        let compressed = encoder.finish().unwrap();

        let format = Compression::from_magic_bytes(&compressed);
        assert_eq!(format, Compression::Gzip);
        let mut reader = format.wrap_reader(Cursor::new(compressed)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Hello, world!");
    }
}
