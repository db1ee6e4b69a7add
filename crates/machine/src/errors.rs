//! Failure taxonomy of the application machine.
//!
//! Every failure is fatal to the current call. Applications raise and
//! propagate with `?`; [`crate::runtime::Mam::call`] is the single catch
//! point, where a failure discards the buffered writes and, on a committed
//! call, converts the charge into the full gas budget.

use ethereum_types::U256;
use mam_codec::CodecError;
use mam_common::{Address, InstanceId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    // ── Gas and dispatch ──────────────────────────────────────────
    #[error("Out of gas")]
    OutOfGas,
    #[error("Application id {0} not found")]
    UnknownApp(InstanceId),
    #[error("Unknown application template type {0}")]
    UnknownTemplateType(u8),
    #[error("Application template type {0} already exists")]
    TemplateExists(u8),
    #[error("Instance id {0} exceeds the addressable range")]
    InstanceLimit(InstanceId),
    #[error("{app}: no such function selector {selector}")]
    UnknownSelector { app: &'static str, selector: u8 },
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("Multiple machine instances are not allowed")]
    MachineAlreadyRunning,
    #[error("Must specify max_gas when not a dry run")]
    MaxGasRequired,
    #[error("No-op context is not metered")]
    NoOpContext,

    // ── Encoding ──────────────────────────────────────────────────
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Arithmetic overflow")]
    Overflow,
    #[error("Internal error: {0}")]
    Internal(&'static str),

    // ── Native coin ───────────────────────────────────────────────
    #[error("Not enough balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },
    #[error("Address {0} already exists")]
    AddressExists(Address),
    #[error("Destination {0} not found")]
    DestinationNotFound(Address),
    #[error("Memo is too long: {0} bytes")]
    MemoTooLong(usize),
    #[error("Not enough funding: {0}")]
    FundingTooLow(u64),

    // ── Assets ────────────────────────────────────────────────────
    #[error("Token {0} already exists")]
    TokenExists(String),
    #[error("Symbol {0} not found")]
    SymbolNotFound(String),
    #[error("Token type {0} is not handled")]
    InvalidTokenType(u8),
    #[error("Total supply must be 0")]
    NonZeroInitialSupply,
    #[error("Decimals cannot be greater than 18")]
    DecimalsTooLarge,
    #[error("Not mintable")]
    NotMintable,
    #[error("Caller holds no {0} tokens")]
    MissingAssetRecord(String),
    #[error("Not enough {symbol}: have {have}, need {need}")]
    InsufficientAssetBalance {
        symbol: String,
        have: U256,
        need: U256,
    },

    // ── AMM ───────────────────────────────────────────────────────
    #[error("Invalid fee amount: {0} bps")]
    FeeTooHigh(u16),
    #[error("Pool has no liquidity")]
    NoLiquidity,
    #[error("Pool balance of {0} is below its reserve")]
    BadDebt(String),
    #[error("Token B amount limit breached: need {need}, max {max}")]
    AmountLimitExceeded { need: U256, max: U256 },
    #[error("Caller has no liquidity position")]
    NoLiquidityPosition,
    #[error("Caller already holds a liquidity position")]
    LiquidityPositionExists,
    #[error("Not enough output: {out} is below the {min} minimum")]
    InsufficientOutput { out: U256, min: U256 },

    // ── Marketplace ───────────────────────────────────────────────
    #[error("Offer {0} not found")]
    OfferNotFound(U256),
    #[error("Offer is reserved for another counterparty")]
    PrivateOffer,

    // ── Runtime bookkeeping ───────────────────────────────────────
    #[error("App storage overflow: {used} bytes exceeds the {max} byte limit")]
    StorageOverflow { used: usize, max: usize },
}
