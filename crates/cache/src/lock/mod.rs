//! Cross-process coordination through lock files.

pub mod file;
pub mod protocol;
pub mod record;

pub use self::record::{FormatCode, LockRecord, ParseError};
