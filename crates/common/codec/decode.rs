use ethereum_types::U256;
use mam_common::InstanceId;
use mam_common::constants::{DATA_LEN_LENGTH, INSTANCE_ID_LENGTH};

use crate::{MAX_INT_BYTES, error::CodecError};

/// Decode a packed integer starting at `offset`.
///
/// Returns the value and the offset of the first byte after it. Rejects
/// value widths above 32 bytes; the machine's integer domain is `U256`.
pub fn unpack_int(buf: &[u8], offset: usize) -> Result<(U256, usize), CodecError> {
    let width = read_data_len(buf, offset, "packed integer length")?;
    let start = offset + DATA_LEN_LENGTH;
    if width > MAX_INT_BYTES as u64 {
        return Err(CodecError::IntTooLarge(width as usize));
    }
    let width = width as usize;
    let bytes = buf
        .get(start..start + width)
        .ok_or(CodecError::UnexpectedEof("packed integer value"))?;
    Ok((U256::from_big_endian(bytes), start + width))
}

/// Decode a length-prefixed array. Empty input decodes as an empty array;
/// otherwise the first byte is the element count, followed by exactly that
/// many 8-byte-length-prefixed elements.
pub fn parse_array(buf: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let Some(&count) = buf.first() else {
        return Ok(Vec::new());
    };
    let mut elements = Vec::with_capacity(count as usize);
    let mut offset = 1;
    for _ in 0..count {
        let len = read_data_len(buf, offset, "array element length")?;
        let len = usize::try_from(len).map_err(|_| CodecError::LengthOverflow(len))?;
        let start = offset + DATA_LEN_LENGTH;
        let end = start
            .checked_add(len)
            .ok_or(CodecError::LengthOverflow(len as u64))?;
        let element = buf
            .get(start..end)
            .ok_or(CodecError::UnexpectedEof("array element"))?;
        elements.push(element.to_vec());
        offset = end;
    }
    Ok(elements)
}

/// Find the sub-record belonging to an application instance inside an
/// account's decoded sub-record array.
///
/// Linear scan, first match wins. Returns the index alongside the record so
/// callers can replace it in place.
pub fn find_app_record(
    id: InstanceId,
    records: &[Vec<u8>],
) -> Option<(usize, &[u8])> {
    records.iter().enumerate().find_map(|(index, record)| {
        let head: [u8; INSTANCE_ID_LENGTH] = record.get(..INSTANCE_ID_LENGTH)?.try_into().ok()?;
        (u32::from_be_bytes(head) == id).then_some((index, record.as_slice()))
    })
}

fn read_data_len(buf: &[u8], offset: usize, what: &'static str) -> Result<u64, CodecError> {
    let bytes: [u8; DATA_LEN_LENGTH] = buf
        .get(offset..offset + DATA_LEN_LENGTH)
        .ok_or(CodecError::UnexpectedEof(what))?
        .try_into()
        .map_err(|_| CodecError::UnexpectedEof(what))?;
    Ok(u64::from_be_bytes(bytes))
}
