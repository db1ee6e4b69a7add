//! Constant-product automated market maker.
//!
//! One pool per instance. Pool state lives in application storage:
//! `tokenA(4) ‖ typeA(1) ‖ tokenB(4) ‖ typeB(1) ‖ assets_app_id(4) ‖
//! pack_int(K) ‖ fee_bps(2) ‖ pack_int(totalLP) ‖ pack_int(Σbnum_i) ‖
//! pack_int(reserveA) ‖ pack_int(reserveB)`. Each liquidity provider holds
//! at most one position sub-record: `instance_id(4) ‖ bnum(8) ‖
//! pack_int(lp_shares)`.
//!
//! The pool's actual token balances (held at the instance address inside
//! the assets application) must never drop below the recorded reserves;
//! the excess above a reserve is the fee pot, distributed to providers on
//! withdrawal weighted by shares and blocks elapsed.

use ethereum_types::{U256, U512};
use mam_codec::{
    ByteReader, account_array_to_bytes, array_to_bytes, find_app_record, pack_int, parse_array,
};
use mam_common::{Address, InstanceId};
use mam_common::constants::{BNUM_LENGTH, INSTANCE_ID_LENGTH};

use crate::apps::assets::{Assets, Symbol, TYPE_FUNGIBLE};
use crate::apps::{Catalogue, symbol_display};
use crate::constants::{DECIMAL_SCALE, MAX_FEE_BPS, SYMBOL_LENGTH};
use crate::context::ExecutionContext;
use crate::errors::VmError;

#[derive(Debug, Clone)]
pub struct Amm {
    instance_id: InstanceId,
    instance_address: Address,
}

/// Decoded pool state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub token_a: Symbol,
    pub type_a: u8,
    pub token_b: Symbol,
    pub type_b: u8,
    pub assets_app_id: InstanceId,
    pub k: U256,
    pub fee_bps: u16,
    pub total_lp: U256,
    pub sum_bnum: U256,
    pub reserve_a: U256,
    pub reserve_b: U256,
}

impl PoolState {
    pub fn decode(buf: &[u8]) -> Result<PoolState, VmError> {
        let mut reader = ByteReader::new(buf);
        let token_a = read_symbol(&mut reader, "pool token A")?;
        let type_a = reader.read_u8("pool token A type")?;
        let token_b = read_symbol(&mut reader, "pool token B")?;
        let type_b = reader.read_u8("pool token B type")?;
        let assets_app_id = reader.read_u32("pool assets app id")?;
        let k = reader.read_packed_int("pool constant")?;
        let fee_bps = reader.read_u16("pool fee")?;
        let total_lp = reader.read_packed_int("pool LP supply")?;
        let sum_bnum = reader.read_packed_int("pool bnum sum")?;
        let reserve_a = reader.read_packed_int("pool reserve A")?;
        let reserve_b = reader.read_packed_int("pool reserve B")?;
        Ok(PoolState {
            token_a,
            type_a,
            token_b,
            type_b,
            assets_app_id,
            k,
            fee_bps,
            total_lp,
            sum_bnum,
            reserve_a,
            reserve_b,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.token_a);
        out.push(self.type_a);
        out.extend_from_slice(&self.token_b);
        out.push(self.type_b);
        out.extend_from_slice(&self.assets_app_id.to_be_bytes());
        out.extend_from_slice(&pack_int(self.k));
        out.extend_from_slice(&self.fee_bps.to_be_bytes());
        out.extend_from_slice(&pack_int(self.total_lp));
        out.extend_from_slice(&pack_int(self.sum_bnum));
        out.extend_from_slice(&pack_int(self.reserve_a));
        out.extend_from_slice(&pack_int(self.reserve_b));
        out
    }
}

/// A liquidity provider's position sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityPosition {
    /// Block at which the position was opened; the fee baseline.
    pub bnum: u64,
    pub shares: U256,
}

impl LiquidityPosition {
    pub fn decode(record: &[u8]) -> Result<LiquidityPosition, VmError> {
        let mut reader = ByteReader::new(record);
        reader.take(INSTANCE_ID_LENGTH, "position instance id")?;
        let bnum = reader.read_u64("position bnum")?;
        let shares = reader.read_packed_int("position shares")?;
        Ok(LiquidityPosition { bnum, shares })
    }

    pub fn encode(&self, instance_id: InstanceId) -> Vec<u8> {
        let mut record = Vec::with_capacity(INSTANCE_ID_LENGTH + BNUM_LENGTH + 40);
        record.extend_from_slice(&instance_id.to_be_bytes());
        record.extend_from_slice(&self.bnum.to_be_bytes());
        record.extend_from_slice(&pack_int(self.shares));
        record
    }
}

impl Amm {
    pub const MAX_STORAGE: usize = 128;

    pub fn new(instance_id: InstanceId, instance_address: Address) -> Self {
        Self {
            instance_id,
            instance_address,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn instance_address(&self) -> Address {
        self.instance_address
    }

    pub(crate) fn execute(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        selector: u8,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        match selector {
            1 => self.create(catalogue, caller, params, ctx),
            2 => Err(VmError::NotImplemented("set_fee")),
            3 => self.add_liquidity(catalogue, caller, params, ctx),
            4 => self.withdraw_liquidity(catalogue, caller, ctx),
            5 => self.swap(catalogue, caller, params, ctx),
            other => Err(VmError::UnknownSelector {
                app: "amm",
                selector: other,
            }),
        }
    }

    /// `create(tokenA(4) ‖ pack_int(amtA) ‖ tokenB(4) ‖ pack_int(amtB) ‖
    /// fee_bps(2) ‖ assets_app_id(4))`
    ///
    /// Governance-level pool seeding. The escrow transfer is the source of
    /// truth for the initial reserves; `K = A·B` and the creator receives
    /// `⌊√K⌋` liquidity shares.
    fn create(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let mut reader = ByteReader::new(params);
        let token_a = read_symbol(&mut reader, "pool token A")?;
        let amount_a = reader.read_packed_int("token A amount")?;
        let token_b = read_symbol(&mut reader, "pool token B")?;
        let amount_b = reader.read_packed_int("token B amount")?;
        let fee_bps = reader.read_u16("pool fee")?;
        ctx.op(3)?;
        if fee_bps > MAX_FEE_BPS {
            return Err(VmError::FeeTooHigh(fee_bps));
        }
        let assets_app_id = reader.read_u32("assets app id")?;

        // Seed the pool from the caller.
        self.escrow(
            catalogue,
            caller,
            assets_app_id,
            &[(token_a, amount_a), (token_b, amount_b)],
            ctx,
        )?;

        let balances = self.pool_balances(assets_app_id, ctx)?;
        let (type_a, balance_a) = balances.token(&token_a)?;
        let (type_b, balance_b) = balances.token(&token_b)?;
        if type_a != TYPE_FUNGIBLE || type_b != TYPE_FUNGIBLE {
            return Err(VmError::InvalidTokenType(if type_a != TYPE_FUNGIBLE {
                type_a
            } else {
                type_b
            }));
        }
        if balance_a < amount_a || balance_b < amount_b {
            return Err(VmError::Internal("pool escrow fell short"));
        }

        let k = checked_u256(balance_a.full_mul(balance_b))?;
        let shares = k.integer_sqrt();

        // Credit the creator's position.
        let caller_storage = ctx.read_account_storage(&caller)?;
        let mut records = parse_array(&caller_storage)?;
        if find_app_record(self.instance_id, &records).is_some() {
            return Err(VmError::LiquidityPositionExists);
        }
        let position = LiquidityPosition {
            bnum: catalogue.bnum(),
            shares,
        };
        records.push(position.encode(self.instance_id));
        ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;

        let pool = PoolState {
            token_a,
            type_a,
            token_b,
            type_b,
            assets_app_id,
            k,
            fee_bps,
            total_lp: shares,
            sum_bnum: U256::zero(),
            reserve_a: balance_a,
            reserve_b: balance_b,
        };
        ctx.write_app_storage(self.instance_id, pool.encode())?;
        Ok(())
    }

    /// `add_liquidity(pack_int(amtA) ‖ pack_int(maxAmtB))`
    ///
    /// An existing position is force-withdrawn first, which resets its
    /// fee baseline. Token B's amount follows the current reserve ratio
    /// and must not exceed the caller's limit.
    fn add_liquidity(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let mut reader = ByteReader::new(params);
        let amount_a = reader.read_packed_int("token A amount")?;
        let max_amount_b = reader.read_packed_int("token B max amount")?;

        let caller_storage = ctx.read_account_storage(&caller)?;
        let records = parse_array(&caller_storage)?;
        if find_app_record(self.instance_id, &records).is_some() {
            self.withdraw_liquidity(catalogue, caller, ctx)?;
        }

        // The withdrawal above rewrites the pool, so decode it afterwards.
        let pool_storage = ctx.read_app_storage(self.instance_id)?;
        let mut pool = PoolState::decode(&pool_storage)?;

        let balances = self.pool_balances(pool.assets_app_id, ctx)?;
        self.check_solvency(&pool, &balances)?;
        if pool.reserve_a.is_zero() {
            return Err(VmError::NoLiquidity);
        }

        let amount_b = mul_div(amount_a, pool.reserve_b, pool.reserve_a)?;
        ctx.op(4)?;
        if amount_b > max_amount_b {
            return Err(VmError::AmountLimitExceeded {
                need: amount_b,
                max: max_amount_b,
            });
        }

        self.escrow(
            catalogue,
            caller,
            pool.assets_app_id,
            &[(pool.token_a, amount_a), (pool.token_b, amount_b)],
            ctx,
        )?;

        let grown_reserve = pool.reserve_a.checked_add(amount_a).ok_or(VmError::Overflow)?;
        let new_total_lp = mul_div(pool.total_lp, grown_reserve, pool.reserve_a)?;
        let caller_shares = new_total_lp
            .checked_sub(pool.total_lp)
            .ok_or(VmError::Overflow)?;
        pool.total_lp = new_total_lp;
        pool.sum_bnum = pool
            .sum_bnum
            .checked_add(U256::from(catalogue.bnum()))
            .ok_or(VmError::Overflow)?;
        pool.reserve_a = grown_reserve;
        pool.reserve_b = pool.reserve_b.checked_add(amount_b).ok_or(VmError::Overflow)?;
        ctx.write_app_storage(self.instance_id, pool.encode())?;

        // Credit the caller's position; the escrow rewrote their storage.
        let caller_storage = ctx.read_account_storage(&caller)?;
        let mut records = parse_array(&caller_storage)?;
        if find_app_record(self.instance_id, &records).is_some() {
            return Err(VmError::LiquidityPositionExists);
        }
        let position = LiquidityPosition {
            bnum: catalogue.bnum(),
            shares: caller_shares,
        };
        records.push(position.encode(self.instance_id));
        ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;
        Ok(())
    }

    /// `withdraw_liquidity()`
    ///
    /// Pays out the caller's pro-rata principal from the reserves plus a
    /// fee share against each token's excess, weighted by shares and
    /// blocks elapsed since the position opened. Closes the position.
    fn withdraw_liquidity(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let pool_storage = ctx.read_app_storage(self.instance_id)?;
        let mut pool = PoolState::decode(&pool_storage)?;

        let balances = self.pool_balances(pool.assets_app_id, ctx)?;
        self.check_solvency(&pool, &balances)?;
        let (_, balance_a) = balances.token(&pool.token_a)?;
        let (_, balance_b) = balances.token(&pool.token_b)?;
        let excess_a = balance_a.checked_sub(pool.reserve_a).ok_or(VmError::Overflow)?;
        let excess_b = balance_b.checked_sub(pool.reserve_b).ok_or(VmError::Overflow)?;

        let caller_storage = ctx.read_account_storage(&caller)?;
        let records = parse_array(&caller_storage)?;
        let Some((_, record)) = find_app_record(self.instance_id, &records) else {
            return Err(VmError::NoLiquidityPosition);
        };
        let position = LiquidityPosition::decode(record)?;
        if pool.total_lp.is_zero() {
            return Err(VmError::NoLiquidity);
        }

        let principal_a = mul_div(pool.reserve_a, position.shares, pool.total_lp)?;
        let principal_b = mul_div(pool.reserve_b, position.shares, pool.total_lp)?;

        let elapsed = catalogue.bnum().saturating_sub(position.bnum);
        let fee_a = fee_share(elapsed, position.shares, excess_a, pool.sum_bnum, pool.total_lp)?;
        let fee_b = fee_share(elapsed, position.shares, excess_b, pool.sum_bnum, pool.total_lp)?;

        let payout_a = principal_a.checked_add(fee_a).ok_or(VmError::Overflow)?;
        let payout_b = principal_b.checked_add(fee_b).ok_or(VmError::Overflow)?;

        pool.reserve_a = pool
            .reserve_a
            .checked_sub(principal_a)
            .ok_or(VmError::Internal("principal exceeds reserve"))?;
        pool.reserve_b = pool
            .reserve_b
            .checked_sub(principal_b)
            .ok_or(VmError::Internal("principal exceeds reserve"))?;
        pool.total_lp = pool
            .total_lp
            .checked_sub(position.shares)
            .ok_or(VmError::Internal("shares exceed LP supply"))?;
        pool.sum_bnum = pool
            .sum_bnum
            .checked_sub(U256::from(position.bnum))
            .unwrap_or_default();

        // Would the payout leave a reserve unbacked?
        let remaining_a = balance_a.checked_sub(payout_a);
        let remaining_b = balance_b.checked_sub(payout_b);
        if remaining_a.is_none_or(|remaining| remaining < pool.reserve_a) {
            return Err(VmError::BadDebt(symbol_display(&pool.token_a)));
        }
        if remaining_b.is_none_or(|remaining| remaining < pool.reserve_b) {
            return Err(VmError::BadDebt(symbol_display(&pool.token_b)));
        }

        // Pay out from the pool account.
        let mut payload = Vec::new();
        for (symbol, amount) in [(pool.token_a, payout_a), (pool.token_b, payout_b)] {
            let mut element = symbol.to_vec();
            element.extend_from_slice(&pack_int(amount));
            element.extend_from_slice(caller.as_bytes());
            payload.push(element);
        }
        catalogue.app(pool.assets_app_id)?.execute(
            catalogue,
            self.instance_address,
            3,
            &array_to_bytes(&payload)?,
            ctx,
        )?;

        // Close the caller's position; the payout rewrote their storage.
        let caller_storage = ctx.read_account_storage(&caller)?;
        let mut records = parse_array(&caller_storage)?;
        if let Some((index, _)) = find_app_record(self.instance_id, &records) {
            records.remove(index);
        }
        ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;

        ctx.write_app_storage(self.instance_id, pool.encode())?;
        Ok(())
    }

    /// `swap(a_to_b(1) ‖ pack_int(amount_in) ‖ pack_int(min_out))`
    ///
    /// Constant-product swap with the fee skimmed off the input. The net
    /// input grows the input reserve while the full input lands in the
    /// pool's balance, so the fee accrues as excess for providers. `K` is
    /// never re-derived, accepting the rounding drift.
    fn swap(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let mut reader = ByteReader::new(params);
        let a_to_b = reader.read_u8("swap direction")? > 0;
        let amount_in = reader.read_packed_int("swap amount in")?;
        let min_out = reader.read_packed_int("swap minimum out")?;

        let pool_storage = ctx.read_app_storage(self.instance_id)?;
        let mut pool = PoolState::decode(&pool_storage)?;

        let balances = self.pool_balances(pool.assets_app_id, ctx)?;
        self.check_solvency(&pool, &balances)?;

        let (token_in, token_out, reserve_in, reserve_out) = if a_to_b {
            (pool.token_a, pool.token_b, pool.reserve_a, pool.reserve_b)
        } else {
            (pool.token_b, pool.token_a, pool.reserve_b, pool.reserve_a)
        };

        ctx.op(6)?;
        let fee = mul_div(amount_in, U256::from(pool.fee_bps), U256::from(DECIMAL_SCALE))?;
        let net_in = amount_in.checked_sub(fee).ok_or(VmError::Overflow)?;
        let new_reserve_in = reserve_in.checked_add(net_in).ok_or(VmError::Overflow)?;
        if new_reserve_in.is_zero() {
            return Err(VmError::NoLiquidity);
        }
        let amount_out = reserve_out
            .checked_sub(pool.k / new_reserve_in)
            .ok_or(VmError::InsufficientOutput {
                out: U256::zero(),
                min: min_out,
            })?;
        if amount_out < min_out {
            return Err(VmError::InsufficientOutput {
                out: amount_out,
                min: min_out,
            });
        }

        // Caller pays the full input into the pool.
        self.escrow(catalogue, caller, pool.assets_app_id, &[(token_in, amount_in)], ctx)?;

        // Pool pays the output to the caller.
        let mut element = token_out.to_vec();
        element.extend_from_slice(&pack_int(amount_out));
        element.extend_from_slice(caller.as_bytes());
        catalogue.app(pool.assets_app_id)?.execute(
            catalogue,
            self.instance_address,
            3,
            &array_to_bytes(&[element])?,
            ctx,
        )?;

        // Track the net movement so the reserves stay backed by balances;
        // the fee remains as excess on the input token.
        let new_reserve_out = reserve_out
            .checked_sub(amount_out)
            .ok_or(VmError::Overflow)?;
        if a_to_b {
            pool.reserve_a = new_reserve_in;
            pool.reserve_b = new_reserve_out;
        } else {
            pool.reserve_b = new_reserve_in;
            pool.reserve_a = new_reserve_out;
        }
        ctx.write_app_storage(self.instance_id, pool.encode())?;
        Ok(())
    }

    // ── Internal helpers ──────────────────────────────────────────

    /// Transfer `amounts` of tokens from `from` into the pool account via
    /// the assets application, on the caller's context.
    fn escrow(
        &self,
        catalogue: &Catalogue<'_>,
        from: Address,
        assets_app_id: InstanceId,
        amounts: &[(Symbol, U256)],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let mut payload = Vec::new();
        for (symbol, amount) in amounts {
            let mut element = symbol.to_vec();
            element.extend_from_slice(&pack_int(*amount));
            element.extend_from_slice(self.instance_address.as_bytes());
            payload.push(element);
        }
        catalogue.app(assets_app_id)?.execute(
            catalogue,
            from,
            3,
            &array_to_bytes(&payload)?,
            ctx,
        )
    }

    fn pool_balances(
        &self,
        assets_app_id: InstanceId,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<PoolBalances, VmError> {
        let account_storage = ctx.read_account_storage(&self.instance_address)?;
        let records = parse_array(&account_storage)?;
        let tokens = match find_app_record(assets_app_id, &records) {
            Some((_, record)) => Assets::account_tokens(record, ctx)?,
            None => Default::default(),
        };
        Ok(PoolBalances { tokens })
    }

    fn check_solvency(&self, pool: &PoolState, balances: &PoolBalances) -> Result<(), VmError> {
        let (_, balance_a) = balances.token(&pool.token_a)?;
        let (_, balance_b) = balances.token(&pool.token_b)?;
        if balance_a < pool.reserve_a {
            return Err(VmError::BadDebt(symbol_display(&pool.token_a)));
        }
        if balance_b < pool.reserve_b {
            return Err(VmError::BadDebt(symbol_display(&pool.token_b)));
        }
        Ok(())
    }
}

/// Token balances held by the pool's instance address.
struct PoolBalances {
    tokens: std::collections::BTreeMap<Symbol, (u8, U256)>,
}

impl PoolBalances {
    fn token(&self, symbol: &Symbol) -> Result<(u8, U256), VmError> {
        self.tokens
            .get(symbol)
            .copied()
            .ok_or_else(|| VmError::SymbolNotFound(symbol_display(symbol)))
    }
}

fn read_symbol(reader: &mut ByteReader<'_>, field: &'static str) -> Result<Symbol, VmError> {
    reader
        .take(SYMBOL_LENGTH, field)?
        .try_into()
        .map_err(|_| VmError::Internal("symbol width"))
}

/// `⌊a · b / denominator⌋` with a 512-bit intermediate product.
fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, VmError> {
    if denominator.is_zero() {
        return Err(VmError::Internal("division by zero"));
    }
    checked_u256(a.full_mul(b) / U512::from(denominator))
}

/// A provider's cut of one token's fee pot:
/// `⌊elapsed · shares · excess / (Σbnum_i · totalLP)⌋`, zero whenever the
/// pool has no weighted history to divide by.
fn fee_share(
    elapsed: u64,
    shares: U256,
    excess: U256,
    sum_bnum: U256,
    total_lp: U256,
) -> Result<U256, VmError> {
    if elapsed == 0 || sum_bnum.is_zero() || total_lp.is_zero() || excess.is_zero() {
        return Ok(U256::zero());
    }
    let numerator = shares
        .full_mul(excess)
        .checked_mul(U512::from(elapsed))
        .ok_or(VmError::Overflow)?;
    let denominator = sum_bnum.full_mul(total_lp);
    checked_u256(numerator / denominator)
}

fn checked_u256(wide: U512) -> Result<U256, VmError> {
    U256::try_from(wide).map_err(|_| VmError::Overflow)
}
