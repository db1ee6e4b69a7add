//! Shared primitives for the Mochimo Application Machine.
//!
//! This crate carries the types and constants every other MAM crate agrees
//! on: the 12-byte account [`Address`], application instance identifiers,
//! and the fixed widths of the on-chain binary layouts.

pub mod constants;
pub mod types;

pub use types::{Address, InstanceId};
