use ethereum_types::U256;
use mam_common::constants::{DATA_LEN_LENGTH, INSTANCE_ID_LENGTH};

use crate::{MAX_ARRAY_ELEMENTS, error::CodecError};

/// Pack an unsigned integer as an 8-byte big-endian length followed by the
/// value's big-endian bytes without leading zeros. Zero packs as a bare
/// zero length.
pub fn pack_int(value: U256) -> Vec<u8> {
    let width = value.bits().div_ceil(8);
    let be = value.to_big_endian();
    let mut out = Vec::with_capacity(DATA_LEN_LENGTH + width);
    out.extend_from_slice(&(width as u64).to_be_bytes());
    out.extend_from_slice(&be[be.len() - width..]);
    out
}

/// Append an 8-byte big-endian length prefix followed by `data`.
pub fn put_length_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u64).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Encode an array of byte-strings: one count byte, then each element with
/// an 8-byte length prefix.
///
/// Zero-length elements are skipped, so setting an entry to empty bytes
/// removes it from the serialized form. Fails when the array holds more
/// than 255 elements.
pub fn array_to_bytes(elements: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
    if elements.len() > MAX_ARRAY_ELEMENTS {
        return Err(CodecError::ArrayTooLarge(elements.len()));
    }
    let retained = elements.iter().filter(|e| !e.is_empty()).count();
    let mut out = vec![retained as u8];
    for element in elements {
        if element.is_empty() {
            continue;
        }
        put_length_prefixed(&mut out, element);
    }
    Ok(out)
}

/// Encode an account's sub-record array.
///
/// Sub-records are sorted ascending by their leading 4-byte instance id
/// before encoding, giving account storage a single canonical serialization.
pub fn account_array_to_bytes(records: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|record| leading_instance_id(record));
    array_to_bytes(&sorted)
}

fn leading_instance_id(record: &[u8]) -> u32 {
    let mut id = [0u8; INSTANCE_ID_LENGTH];
    let head = record.get(..INSTANCE_ID_LENGTH).unwrap_or_default();
    id[..head.len()].copy_from_slice(head);
    u32::from_be_bytes(id)
}
