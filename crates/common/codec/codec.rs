//! # mam-codec
//!
//! Binary layout of the Mochimo Application Machine's storage records.
//!
//! Every application lays its state out with the same three building
//! blocks, all big-endian:
//!
//! - **Packed integers**: an 8-byte length `L` followed by `L` value bytes
//!   (`L = 0` encodes zero). See [`encode::pack_int`] / [`decode::unpack_int`].
//! - **Length-prefixed arrays**: one count byte (max 255 elements), then
//!   each element as an 8-byte length followed by its bytes. Zero-length
//!   elements are omitted on encode, so writing an empty element removes it.
//! - **Account sub-record arrays**: an array whose elements each start with
//!   a 4-byte application instance id. Serialization sorts sub-records
//!   ascending by id so account storage has a single canonical form.
//!
//! All functions here are pure and gas-free; metering happens in the
//! execution context that calls them.
//!
//! ## Modules
//!
//! - [`encode`]: packing integers, arrays and account arrays
//! - [`decode`]: the inverse operations plus sub-record lookup
//! - [`reader`]: a bounds-checked cursor for application parameter parsing
//! - [`error`]: [`error::CodecError`]

pub mod decode;
pub mod encode;
pub mod error;
pub mod reader;

pub use decode::{find_app_record, parse_array, unpack_int};
pub use encode::{account_array_to_bytes, array_to_bytes, pack_int, put_length_prefixed};
pub use error::CodecError;
pub use reader::ByteReader;

/// Maximum number of elements in a length-prefixed array.
pub const MAX_ARRAY_ELEMENTS: usize = 255;

/// Maximum width of a packed integer's value, in bytes. The machine's
/// integer domain is `U256`.
pub const MAX_INT_BYTES: usize = 32;
