//! Fixed widths of the binary storage layouts.

/// Width of an account address, in bytes.
pub const ADDRESS_LENGTH: usize = 12;

/// Width of an application instance id inside storage records, in bytes.
pub const INSTANCE_ID_LENGTH: usize = 4;

/// Width of a block number, in bytes.
pub const BNUM_LENGTH: usize = 8;

/// Width of every big-endian length prefix inside storage records, in bytes.
pub const DATA_LEN_LENGTH: usize = 8;
