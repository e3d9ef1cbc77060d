//! The lock record: the single line persisted in every lock file.
//!
//! ```text
//! <protocol_version> <source_last_modified_ticks> <content_length> <format_code>\n
//! ```
//!
//! Ticks are 100 ns intervals since 0001-01-01T00:00:00Z, which keeps lock
//! files interchangeable with writers that count time that way.

use derive_more::{Display, Error};
use std::fmt::{Display as FmtDisplay, Formatter, Result as FmtResult};
use std::str::FromStr;
use time::UtcDateTime;

pub const PROTOCOL_VERSION: u32 = 1;

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_EPOCH_TICKS: i128 = 621_355_968_000_000_000;
const NANOS_PER_TICK: i128 = 100;

/// How the content of an entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCode {
    /// Written verbatim as a single file, by request.
    WrittenAsFile,
    /// Extracted from a validated package.
    WrittenAsPackage,
    /// Package validation failed and fallback wrote the content as a file.
    InvalidPackageWrittenAsFile,
}

impl FormatCode {
    pub fn code(self) -> u8 {
        match self {
            Self::WrittenAsFile => 0,
            Self::WrittenAsPackage => 1,
            Self::InvalidPackageWrittenAsFile => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::WrittenAsFile),
            1 => Some(Self::WrittenAsPackage),
            2 => Some(Self::InvalidPackageWrittenAsFile),
            _ => None,
        }
    }

    /// Whether the entry holds a single file rather than extracted content.
    pub fn is_single_file(self) -> bool {
        !matches!(self, Self::WrittenAsPackage)
    }
}

/// Why a lock file's content was rejected.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[display("empty lock record")]
    Empty,
    #[display("expected 4 fields, found {_0}")]
    FieldCount(#[error(not(source))] usize),
    #[display("unparseable {_0}")]
    Field(#[error(not(source))] &'static str),
    #[display("unsupported protocol version {_0}")]
    Version(#[error(not(source))] u32),
    #[display("unknown format code {_0}")]
    FormatCode(#[error(not(source))] u8),
    #[display("timestamp out of range")]
    Timestamp,
}

/// Metadata stamped into the lock file once an entry is fully written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    pub protocol_version: u32,
    /// Modification time of the content at the source, at tick precision.
    pub source_last_modified: UtcDateTime,
    /// Number of bytes fetched from the source.
    pub content_length: u64,
    pub format: FormatCode,
}

impl LockRecord {
    /// Build a record for the current protocol version. The timestamp is
    /// truncated to tick precision so that it survives a round trip.
    pub fn new(source_last_modified: UtcDateTime, content_length: u64, format: FormatCode) -> Self {
        let truncated = from_ticks(to_ticks(source_last_modified)).unwrap_or(source_last_modified);
        Self {
            protocol_version: PROTOCOL_VERSION,
            source_last_modified: truncated,
            content_length,
            format,
        }
    }

    pub fn source_ticks(&self) -> u64 {
        to_ticks(self.source_last_modified)
    }
}

impl FmtDisplay for LockRecord {
    /// The persisted line, newline included.
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(
            f,
            "{} {} {} {}",
            self.protocol_version,
            self.source_ticks(),
            self.content_length,
            self.format.code()
        )
    }
}

impl FromStr for LockRecord {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        let [version, ticks, length, format] = fields.as_slice() else {
            return Err(ParseError::FieldCount(fields.len()));
        };
        let protocol_version: u32 = version.parse().map_err(|_| ParseError::Field("protocol version"))?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(ParseError::Version(protocol_version));
        }
        let ticks: u64 = ticks.parse().map_err(|_| ParseError::Field("timestamp"))?;
        let content_length: u64 = length.parse().map_err(|_| ParseError::Field("content length"))?;
        let code: u8 = format.parse().map_err(|_| ParseError::Field("format code"))?;
        Ok(Self {
            protocol_version,
            source_last_modified: from_ticks(ticks).ok_or(ParseError::Timestamp)?,
            content_length,
            format: FormatCode::from_code(code).ok_or(ParseError::FormatCode(code))?,
        })
    }
}

/// Ticks for `moment`. Moments before year 1 clamp to zero.
pub fn to_ticks(moment: UtcDateTime) -> u64 {
    let ticks = moment.unix_timestamp_nanos().div_euclid(NANOS_PER_TICK) + UNIX_EPOCH_TICKS;
    u64::try_from(ticks.max(0)).unwrap_or(u64::MAX)
}

pub fn from_ticks(ticks: u64) -> Option<UtcDateTime> {
    let nanos = (i128::from(ticks) - UNIX_EPOCH_TICKS) * NANOS_PER_TICK;
    UtcDateTime::from_unix_timestamp_nanos(nanos).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_unix_epoch_ticks() {
        let epoch = UtcDateTime::from_unix_timestamp(0).unwrap();
        assert_eq!(to_ticks(epoch), 621_355_968_000_000_000);
        assert_eq!(from_ticks(621_355_968_000_000_000), Some(epoch));
    }

    #[test]
    fn test_persisted_line() {
        let modified = from_ticks(638_000_000_000_000_000).unwrap();
        // 2022-09-28T22:13:20Z
        assert_eq!(modified, UtcDateTime::from_unix_timestamp(1_664_403_200).unwrap());
        let record = LockRecord::new(modified, 1024, FormatCode::WrittenAsPackage);
        assert_eq!(record.to_string(), "1 638000000000000000 1024 1\n");
        assert_eq!("1 638000000000000000 1024 1\n".parse::<LockRecord>().unwrap(), record);
    }

    #[test]
    fn test_sub_tick_precision_is_truncated() {
        let precise = UtcDateTime::from_unix_timestamp_nanos(1_704_164_645_123_456_789).unwrap();
        let record = LockRecord::new(precise, 1, FormatCode::WrittenAsFile);
        assert_eq!(
            record.source_last_modified,
            UtcDateTime::from_unix_timestamp_nanos(1_704_164_645_123_456_700).unwrap()
        );
        assert_eq!(record.to_string().parse::<LockRecord>().unwrap(), record);
    }

    #[rstest]
    #[case(FormatCode::WrittenAsFile, 0)]
    #[case(FormatCode::WrittenAsPackage, 1)]
    #[case(FormatCode::InvalidPackageWrittenAsFile, 2)]
    fn test_format_codes(#[case] format: FormatCode, #[case] code: u8) {
        assert_eq!(format.code(), code);
        assert_eq!(FormatCode::from_code(code), Some(format));
    }

    #[rstest]
    #[case::empty("", ParseError::Empty)]
    #[case::whitespace(" \n", ParseError::Empty)]
    #[case::too_few("1 638000000000000000 1024", ParseError::FieldCount(3))]
    #[case::too_many("1 638000000000000000 1024 1 9", ParseError::FieldCount(5))]
    #[case::bad_version("x 638000000000000000 1024 1", ParseError::Field("protocol version"))]
    #[case::future_version("2 638000000000000000 1024 1", ParseError::Version(2))]
    #[case::bad_ticks("1 yesterday 1024 1", ParseError::Field("timestamp"))]
    #[case::negative_length("1 638000000000000000 -1 1", ParseError::Field("content length"))]
    #[case::unknown_format("1 638000000000000000 1024 7", ParseError::FormatCode(7))]
    #[case::huge_ticks("1 18446744073709551615 1024 1", ParseError::Timestamp)]
    fn test_corrupt_records(#[case] input: &str, #[case] expected: ParseError) {
        assert_eq!(input.parse::<LockRecord>().unwrap_err(), expected);
    }
}
