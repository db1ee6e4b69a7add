use ethereum_types::U256;
use mam_common::Address;
use mam_common::constants::{ADDRESS_LENGTH, DATA_LEN_LENGTH};

use crate::{decode::unpack_int, error::CodecError};

/// A bounds-checked cursor over a parameter or storage buffer.
///
/// Every read names the field being read so malformed input surfaces as a
/// [`CodecError`] that says what was missing, never as a panic.
///
/// ```
/// # use mam_codec::ByteReader;
/// let buf = [0x00, 0x2A, 0xFF];
/// let mut reader = ByteReader::new(&buf);
/// assert_eq!(reader.read_u16("flags").unwrap(), 42);
/// assert_eq!(reader.rest(), &[0xFF]);
/// ```
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Current read position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.buf.len()
    }

    /// Take the next `len` bytes.
    pub fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(CodecError::LengthOverflow(len as u64))?;
        let bytes = self
            .buf
            .get(self.offset..end)
            .ok_or(CodecError::UnexpectedEof(field))?;
        self.offset = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.fixed(field)?))
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.fixed(field)?))
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.fixed(field)?))
    }

    pub fn read_address(&mut self, field: &'static str) -> Result<Address, CodecError> {
        let bytes = self.take(ADDRESS_LENGTH, field)?;
        Address::from_slice(bytes).ok_or(CodecError::UnexpectedEof(field))
    }

    /// Read a packed integer (8-byte length, then that many value bytes).
    pub fn read_packed_int(&mut self, field: &'static str) -> Result<U256, CodecError> {
        let (value, next) = unpack_int(self.buf, self.offset).map_err(|err| match err {
            CodecError::UnexpectedEof(_) => CodecError::UnexpectedEof(field),
            other => other,
        })?;
        self.offset = next;
        Ok(value)
    }

    /// Read an 8-byte length prefix, then that many bytes.
    pub fn read_length_prefixed(
        &mut self,
        field: &'static str,
    ) -> Result<&'a [u8], CodecError> {
        let len = u64::from_be_bytes(self.fixed::<DATA_LEN_LENGTH>(field)?);
        let len = usize::try_from(len).map_err(|_| CodecError::LengthOverflow(len))?;
        self.take(len, field)
    }

    /// Everything after the current position, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        self.buf.get(self.offset..).unwrap_or_default()
    }

    fn fixed<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        self.take(N, field)?
            .try_into()
            .map_err(|_| CodecError::UnexpectedEof(field))
    }
}
