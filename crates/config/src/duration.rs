//! Human-readable durations: `"750ms"`, `"30s"`, `"2m"`, `"24h"`, `"30d"`.
//!
//! Bare integers are read as seconds, which is what environment variables
//! such as `PARCEL_CACHE__RETRY_BACKOFF=1` produce after figment's parsing.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};
use std::time::Duration;

const UNITS: &[(&str, u64)] = &[
    ("ms", 1),
    ("s", 1_000),
    ("m", 60 * 1_000),
    ("h", 60 * 60 * 1_000),
    ("d", 24 * 60 * 60 * 1_000),
    ("w", 7 * 24 * 60 * 60 * 1_000),
];

/// Parse a duration string. Returns `None` for empty input, unknown units or
/// overflow.
///
/// ```
/// use parcel_config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("750ms"), Some(Duration::from_millis(750)));
/// assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_duration("soon"), None);
/// ```
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: u64 = number.parse().ok()?;
    let multiplier = match unit.trim() {
        // Assume seconds if no unit
        "" => 1_000,
        unit => UNITS.iter().find(|(name, _)| *name == unit).map(|(_, millis)| *millis)?,
    };
    number.checked_mul(multiplier).map(Duration::from_millis)
}

/// Render a duration in the largest unit that divides it exactly.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return "0s".to_string();
    }
    let (name, size) = UNITS
        .iter()
        .rev()
        .find(|(_, size)| millis % size == 0)
        .copied()
        .unwrap_or(("ms", 1));
    format!("{}{name}", millis / size)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Seconds(u64),
    Text(String),
}

pub(crate) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*duration))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match Raw::deserialize(deserializer)? {
        Raw::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        Raw::Text(text) => parse_duration(&text).ok_or_else(|| de::Error::custom(format!("invalid duration `{text}`"))),
    }
}

/// `"never"` (or `"off"`) disables expiry; any other value is a duration.
pub(crate) mod ttl {
    use super::{Raw, format_duration, parse_duration};
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(ttl: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(duration) => serializer.serialize_str(&format_duration(*duration)),
            None => serializer.serialize_str("never"),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(seconds) => Ok(Some(Duration::from_secs(seconds))),
            Raw::Text(text) if matches!(text.trim(), "never" | "off") => Ok(None),
            Raw::Text(text) => {
                parse_duration(&text).map(Some).ok_or_else(|| de::Error::custom(format!("invalid ttl `{text}`")))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("750ms", Some(Duration::from_millis(750)))]
    #[case("30s", Some(Duration::from_secs(30)))]
    #[case("2m", Some(Duration::from_secs(120)))]
    #[case("24h", Some(Duration::from_secs(86_400)))]
    #[case("30d", Some(Duration::from_secs(30 * 86_400)))]
    #[case("1w", Some(Duration::from_secs(7 * 86_400)))]
    #[case(" 5 m ", Some(Duration::from_secs(300)))]
    #[case("90", Some(Duration::from_secs(90)))]
    #[case("0s", Some(Duration::ZERO))]
    #[case("", None)]
    #[case("m", None)]
    #[case("5y", None)]
    #[case("-1s", None)]
    #[case("1.5h", None)]
    fn test_parse_duration(#[case] input: &str, #[case] expected: Option<Duration>) {
        assert_eq!(parse_duration(input), expected);
    }

    #[rstest]
    #[case(Duration::from_millis(750), "750ms")]
    #[case(Duration::from_secs(120), "2m")]
    #[case(Duration::from_secs(86_400), "1d")]
    #[case(Duration::from_secs(90), "90s")]
    #[case(Duration::ZERO, "0s")]
    fn test_format_duration(#[case] input: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(input), expected);
        assert_eq!(parse_duration(expected), Some(input));
    }
}
