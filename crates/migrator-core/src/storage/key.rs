//! Row key encoding.

/// Size of an encoded row id.
pub const ID_SIZE: usize = 8;

/// Size of the table name length that leads every key.
const NAME_LEN_SIZE: usize = 8;

/// Encode an id so that byte order matches numeric order.
///
/// Flipping the sign bit maps `i64::MIN..=i64::MAX` onto `0..=u64::MAX`, and
/// big-endian bytes keep that order lexicographically.
pub fn encode_id(id: i64) -> [u8; ID_SIZE] {
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

/// Decode an id produced by [`encode_id`].
pub fn decode_id(bytes: &[u8]) -> Option<i64> {
    let bytes: [u8; ID_SIZE] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64)
}

/// Prefix shared by every row of a table.
///
/// The name is length-prefixed, so no table's prefix is a prefix of another's
/// whatever bytes the names contain.
pub fn table_prefix(table: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(NAME_LEN_SIZE + table.len() + ID_SIZE);
    prefix.extend_from_slice(&(table.len() as u64).to_be_bytes());
    prefix.extend_from_slice(table.as_bytes());
    prefix
}

/// Full key of one row: `[name len (8 bytes)][table][id (8 bytes, order-preserving)]`.
pub fn row_key(table: &str, id: i64) -> Vec<u8> {
    let mut key = table_prefix(table);
    key.extend_from_slice(&encode_id(id));
    key
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
