//! # MAM - Mochimo Application Machine
//!
//! A deterministic, gas-metered execution environment hosting a fixed
//! catalogue of on-chain applications.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Mam                                │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌───────────────┐  │
//! │  │  Catalogue  │  │ ExecutionContext │  │   ChainHead   │  │
//! │  │ (MCM, ...)  │  │  (gas + buffers) │  │    (bnum)     │  │
//! │  └─────────────┘  └──────────────────┘  └───────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              application / account KV stores                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A caller submits *(dry-run, caller, max gas, app id, selector, params)*.
//! The runtime pre-debits the caller's gas reserve, dispatches into the
//! addressed application, meters every storage access through a fresh
//! [`context::ExecutionContext`], and either flushes the context's write
//! buffer (committed success) or drops it while still charging the caller
//! for the gas (committed failure). Dry-runs execute the same path without
//! touching the stores, so clients can estimate `max_gas` before
//! submitting.
//!
//! ## Key components
//!
//! - [`runtime::Mam`]: dispatch, gas economics, commit/discard
//! - [`context::ExecutionContext`]: gas counter and buffered writes
//! - [`apps`]: the application catalogue (native coin, assets, AMM,
//!   marketplace, chat)
//! - [`chain::ChainHead`]: read-only view of the external block height

pub mod apps;
pub mod chain;
pub mod constants;
pub mod context;
pub mod errors;
pub mod runtime;

pub use apps::App;
pub use context::ExecutionContext;
pub use errors::VmError;
pub use runtime::{AppTemplate, CallOutcome, Mam};
