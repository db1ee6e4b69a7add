//! Core identifier types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::ADDRESS_LENGTH;

/// Identifier of a deployed application instance.
///
/// Ids are assigned monotonically starting at 1; id 0 is permanently bound
/// to the native-coin application. Records encode the id as 4 big-endian
/// bytes (see [`crate::constants::INSTANCE_ID_LENGTH`]).
pub type InstanceId = u32;

/// A 12-byte account address.
///
/// Application instances live at reserved addresses of the form
/// `0x0000000000000000000000 ‖ u16_be(id)`; every other value is a regular
/// account address.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address. Used by the marketplace as the "anyone may
    /// match" counterparty sentinel.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// The reserved address of the application instance with the given id.
    pub fn instance(id: u16) -> Address {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes[ADDRESS_LENGTH - 2..].copy_from_slice(&id.to_be_bytes());
        Address(bytes)
    }

    /// Whether this address matches the reserved instance-address pattern.
    pub fn is_instance_address(&self) -> bool {
        self.0[..ADDRESS_LENGTH - 2].iter().all(|b| *b == 0)
    }

    /// Build an address from a slice, which must be exactly 12 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Address> {
        let bytes: [u8; ADDRESS_LENGTH] = bytes.try_into().ok()?;
        Some(Address(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
