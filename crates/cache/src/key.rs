//! Fixed-width, filesystem-safe names for cache entries.
//!
//! Values are split into 5-bit groups, most significant first, and each
//! group becomes one symbol of a 32-symbol lowercase alphabet with no `i`,
//! `l`, `o` or `u`. Names never differ only by case, so they are safe on
//! case-insensitive filesystems.

use parcel_source::CacheKey;

const ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// Symbols needed for 128 bits.
pub const ID_LENGTH: usize = 26;
/// Symbols needed for 32 bits.
pub const VERSION_LENGTH: usize = 7;

fn encode(value: u128, bits: u32) -> String {
    let symbols = bits.div_ceil(5);
    (0..symbols)
        .rev()
        .map(|group| ALPHABET[((value >> (group * 5)) & 0x1F) as usize] as char)
        .collect()
}

/// Encode a 128-bit identifier as 26 symbols.
pub fn encode_id(id: u128) -> String {
    encode(id, 128)
}

/// Encode a version from its two's-complement bit pattern as 7 symbols, so
/// negative versions are representable.
pub fn encode_version(version: i32) -> String {
    encode(u128::from(version as u32), 32)
}

/// Name of the cache directory for `key`: `{item}_{version}`.
///
/// ```
/// use parcel_cache::key::directory_name;
/// use parcel_cache::CacheKey;
/// use uuid::Uuid;
///
/// let key = CacheKey::new(Uuid::nil(), Uuid::nil(), Uuid::from_u128(1), 3);
/// assert_eq!(directory_name(&key), "00000000000000000000000001_0000003");
/// ```
pub fn directory_name(key: &CacheKey) -> String {
    format!("{}_{}", encode_id(key.item.as_u128()), encode_version(key.version))
}
