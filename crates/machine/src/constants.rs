//! Gas schedule, economics and catalogue constants.

use mam_common::InstanceId;

// ── Gas schedule ──────────────────────────────────────────────────

/// Gas charged per simple operation.
pub const GAS_SIMPLE_OP: u64 = 1;

/// Gas charged per storage read.
pub const GAS_READ_STORAGE: u64 = 10 * GAS_SIMPLE_OP;

/// Base gas charged per storage write.
pub const GAS_WRITE_STORAGE_BASE: u64 = 10 * GAS_READ_STORAGE;

/// Additional gas charged per byte written to storage.
pub const GAS_WRITE_STORAGE_PER_BYTE: u64 = 10;

/// Price of one gas unit, in nMCM.
pub const GAS_PRICE: u64 = 3;

// ── Application catalogue ─────────────────────────────────────────

/// Instance id permanently bound to the native-coin application.
pub const MCM_APP_ID: InstanceId = 0;

pub const APP_TYPE_MCM: u8 = 0;
pub const APP_TYPE_ASSETS: u8 = 1;
pub const APP_TYPE_AMM: u8 = 2;
pub const APP_TYPE_MARKETPLACE: u8 = 3;
pub const APP_TYPE_CHAT: u8 = 5;

// ── Application economics ─────────────────────────────────────────

/// Width of a native-coin balance, in bytes.
pub const BALANCE_LENGTH: usize = 8;

/// Minimum funding required to create a new tag.
pub const MIN_TAG_FUNDING: u64 = 500;

/// Maximum transfer memo length, in bytes.
pub const MAX_MEMO_LENGTH: usize = 64;

/// Width of a token symbol, in bytes.
pub const SYMBOL_LENGTH: usize = 4;

/// Maximum decimals for a fungible token.
pub const MAX_TOKEN_DECIMALS: u64 = 18;

/// Fixed-point scale used by the AMM's fee arithmetic.
pub const DECIMAL_SCALE: u64 = 10_000;

/// Upper bound on a pool's fee, in basis points.
pub const MAX_FEE_BPS: u16 = 10_000;
