//! Fungible-asset registry application.
//!
//! Application storage holds the token registry: an array of token-info
//! records `symbol(4) ‖ type(1) ‖ admin(12) ‖ mode_count(1) ‖ modes ‖
//! data_len(8) ‖ data`, where fungible `data` packs the total supply and
//! decimals. Each account carries a sub-ledger:
//! `instance_id(4) ‖ data_len(8) ‖ array(symbol(4) ‖ type(1) ‖
//! pack_int(balance))`. Entries are removed when a balance hits zero.

use std::collections::BTreeMap;

use ethereum_types::U256;
use mam_codec::{
    ByteReader, account_array_to_bytes, array_to_bytes, find_app_record, pack_int, parse_array,
    put_length_prefixed, unpack_int,
};
use mam_common::{Address, InstanceId};
use mam_common::constants::{DATA_LEN_LENGTH, INSTANCE_ID_LENGTH};

use crate::apps::{set_app_record, symbol_display};
use crate::constants::{MAX_TOKEN_DECIMALS, SYMBOL_LENGTH};
use crate::context::ExecutionContext;
use crate::errors::VmError;

pub const TYPE_FUNGIBLE: u8 = 1;
pub const TYPE_NON_FUNGIBLE: u8 = 2;

/// Mode flag that permanently disables minting for a token.
pub const MODE_NOT_MINTABLE: u8 = 1;

/// Byte offset of the entry array inside an account's asset sub-record.
const ENTRIES_OFFSET: usize = INSTANCE_ID_LENGTH + DATA_LEN_LENGTH;

pub type Symbol = [u8; SYMBOL_LENGTH];

#[derive(Debug, Clone)]
pub struct Assets {
    instance_id: InstanceId,
    instance_address: Address,
}

/// Decoded token-info record from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: Symbol,
    pub token_type: u8,
    pub admin: Address,
    pub modes: Vec<u8>,
    pub total_supply: U256,
    pub decimals: U256,
}

impl TokenInfo {
    pub fn decode(buf: &[u8]) -> Result<TokenInfo, VmError> {
        let mut reader = ByteReader::new(buf);
        let symbol: Symbol = reader
            .take(SYMBOL_LENGTH, "token symbol")?
            .try_into()
            .map_err(|_| VmError::Internal("symbol width"))?;
        let token_type = reader.read_u8("token type")?;
        let admin = reader.read_address("token admin")?;
        let mode_count = reader.read_u8("token mode count")?;
        let modes = reader.take(usize::from(mode_count), "token modes")?.to_vec();
        let data = reader.read_length_prefixed("token data")?;
        match token_type {
            TYPE_FUNGIBLE => {
                let mut data = ByteReader::new(data);
                let total_supply = data.read_packed_int("total supply")?;
                let decimals = data.read_packed_int("decimals")?;
                Ok(TokenInfo {
                    symbol,
                    token_type,
                    admin,
                    modes,
                    total_supply,
                    decimals,
                })
            }
            TYPE_NON_FUNGIBLE => Err(VmError::NotImplemented("non-fungible tokens")),
            other => Err(VmError::InvalidTokenType(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = pack_int(self.total_supply);
        data.extend_from_slice(&pack_int(self.decimals));

        let mut out = Vec::with_capacity(
            SYMBOL_LENGTH + 1 + 12 + 1 + self.modes.len() + DATA_LEN_LENGTH + data.len(),
        );
        out.extend_from_slice(&self.symbol);
        out.push(self.token_type);
        out.extend_from_slice(self.admin.as_bytes());
        out.push(u8::try_from(self.modes.len()).unwrap_or(u8::MAX));
        out.extend_from_slice(&self.modes);
        put_length_prefixed(&mut out, &data);
        out
    }

    /// Whether `minter` may mint this token.
    pub fn is_mintable_by(&self, minter: &Address) -> bool {
        self.token_type == TYPE_FUNGIBLE
            && self.admin == *minter
            && !self.modes.contains(&MODE_NOT_MINTABLE)
    }
}

impl Assets {
    pub const MAX_STORAGE: usize = 128 * 1024 * 1024;

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
        caller: Address,
        selector: u8,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        match selector {
            1 => self.create(params, ctx),
            2 => self.mint(caller, params, ctx),
            3 => self.transfer(caller, params, ctx),
            4 => Err(VmError::NotImplemented("set_admin")),
            5 => Err(VmError::NotImplemented("set_modes")),
            other => Err(VmError::UnknownSelector {
                app: "assets",
                selector: other,
            }),
        }
    }

    /// `create(token_info)` — register a new token.
    ///
    /// Fungible tokens must start with zero supply and at most 18 decimals.
    fn create(&self, params: &[u8], ctx: &mut ExecutionContext<'_>) -> Result<(), VmError> {
        let registry_storage = ctx.read_app_storage(self.instance_id)?;
        ctx.op(3)?;
        let mut registry = parse_array(&registry_storage)?;
        let new_token = TokenInfo::decode(params)?;

        for record in &registry {
            if record.get(..SYMBOL_LENGTH) == Some(new_token.symbol.as_slice()) {
                return Err(VmError::TokenExists(symbol_display(&new_token.symbol)));
            }
        }

        if !new_token.total_supply.is_zero() {
            return Err(VmError::NonZeroInitialSupply);
        }
        if new_token.decimals > U256::from(MAX_TOKEN_DECIMALS) {
            return Err(VmError::DecimalsTooLarge);
        }

        ctx.op(5)?;
        registry.push(new_token.encode());
        ctx.write_app_storage(self.instance_id, array_to_bytes(&registry)?)?;
        Ok(())
    }

    /// `mint(symbol(4) ‖ array of (pack_int(amount) ‖ recipient(12)))`
    ///
    /// Only the token admin may mint, and only while the token carries no
    /// not-mintable mode. The registry's total supply advances by the
    /// minted sum.
    fn mint(
        &self,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let mut reader = ByteReader::new(params);
        let symbol: Symbol = reader
            .take(SYMBOL_LENGTH, "token symbol")?
            .try_into()
            .map_err(|_| VmError::Internal("symbol width"))?;
        let mint_list = parse_array(reader.rest())?;

        let registry_storage = ctx.read_app_storage(self.instance_id)?;
        let mut registry = parse_array(&registry_storage)?;
        let (token_index, mut token) = Self::find_token(&registry, &symbol)?;
        if !token.is_mintable_by(&caller) {
            return Err(VmError::NotMintable);
        }

        let mut minted = U256::zero();
        for entry in &mint_list {
            ctx.op(4)?;
            let mut entry = ByteReader::new(entry);
            let amount = entry.read_packed_int("mint amount")?;
            let recipient = entry.read_address("mint recipient")?;

            let recipient_storage = ctx.read_account_storage(&recipient)?;
            let mut records = parse_array(&recipient_storage)?;
            let (index, record) = find_app_record(self.instance_id, &records)
                .map(|(index, record)| (Some(index), record.to_vec()))
                .unwrap_or((None, Vec::new()));
            let credited = Self::credit_balance(
                self.instance_id,
                &record,
                &symbol,
                token.token_type,
                amount,
                ctx,
            )?;
            set_app_record(&mut records, index, credited);
            ctx.write_account_storage(&recipient, account_array_to_bytes(&records)?)?;

            minted = minted.checked_add(amount).ok_or(VmError::Overflow)?;
        }

        token.total_supply = token
            .total_supply
            .checked_add(minted)
            .ok_or(VmError::Overflow)?;
        set_app_record(&mut registry, Some(token_index), token.encode());
        ctx.write_app_storage(self.instance_id, array_to_bytes(&registry)?)?;
        Ok(())
    }

    /// `transfer(array of (symbol(4) ‖ pack_int(amount) ‖ recipient(12)))`
    ///
    /// Zero amounts are skipped. The caller must already hold a sub-ledger
    /// for the token; the recipient's is created on first credit.
    fn transfer(
        &self,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let token_params = parse_array(params)?;
        let registry_storage = ctx.read_app_storage(self.instance_id)?;
        let registry = parse_array(&registry_storage)?;

        for param in &token_params {
            ctx.op(4)?;
            let mut reader = ByteReader::new(param);
            let symbol: Symbol = reader
                .take(SYMBOL_LENGTH, "token symbol")?
                .try_into()
                .map_err(|_| VmError::Internal("symbol width"))?;
            let (_, token) = Self::find_token(&registry, &symbol)?;
            let amount = reader.read_packed_int("transfer amount")?;
            if amount.is_zero() {
                continue;
            }
            let recipient = reader.read_address("transfer recipient")?;

            let caller_storage = ctx.read_account_storage(&caller)?;
            let mut records = parse_array(&caller_storage)?;
            let Some((index, record)) = find_app_record(self.instance_id, &records) else {
                return Err(VmError::MissingAssetRecord(symbol_display(&symbol)));
            };
            let debited = Self::debit_balance(
                self.instance_id,
                record,
                &symbol,
                token.token_type,
                amount,
                ctx,
            )?;
            records[index] = debited;
            ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;

            let recipient_storage = ctx.read_account_storage(&recipient)?;
            let mut records = parse_array(&recipient_storage)?;
            let (index, record) = find_app_record(self.instance_id, &records)
                .map(|(index, record)| (Some(index), record.to_vec()))
                .unwrap_or((None, Vec::new()));
            let credited = Self::credit_balance(
                self.instance_id,
                &record,
                &symbol,
                token.token_type,
                amount,
                ctx,
            )?;
            set_app_record(&mut records, index, credited);
            ctx.write_account_storage(&recipient, account_array_to_bytes(&records)?)?;
        }
        Ok(())
    }

    fn find_token(registry: &[Vec<u8>], symbol: &Symbol) -> Result<(usize, TokenInfo), VmError> {
        for (index, record) in registry.iter().enumerate() {
            if record.get(..SYMBOL_LENGTH) == Some(symbol.as_slice()) {
                return Ok((index, TokenInfo::decode(record)?));
            }
        }
        Err(VmError::SymbolNotFound(symbol_display(symbol)))
    }

    // ── Sub-ledger helpers ────────────────────────────────────────

    pub(crate) fn credit_balance(
        instance_id: InstanceId,
        record: &[u8],
        symbol: &Symbol,
        token_type: u8,
        amount: U256,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Vec<u8>, VmError> {
        Self::apply_balance_change(instance_id, record, symbol, token_type, amount, true, ctx)
    }

    pub(crate) fn debit_balance(
        instance_id: InstanceId,
        record: &[u8],
        symbol: &Symbol,
        token_type: u8,
        amount: U256,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Vec<u8>, VmError> {
        Self::apply_balance_change(instance_id, record, symbol, token_type, amount, false, ctx)
    }

    /// Adjust one token entry inside an account's asset sub-record.
    ///
    /// A balance reaching zero removes the entry; a credit to a missing
    /// entry inserts one; a missing sub-record is created around the entry.
    /// Debiting past zero fails.
    fn apply_balance_change(
        instance_id: InstanceId,
        record: &[u8],
        symbol: &Symbol,
        token_type: u8,
        amount: U256,
        credit: bool,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Vec<u8>, VmError> {
        ctx.op(3)?;
        if token_type == TYPE_NON_FUNGIBLE {
            return Err(VmError::NotImplemented("non-fungible tokens"));
        }
        if token_type != TYPE_FUNGIBLE {
            return Err(VmError::InvalidTokenType(token_type));
        }

        let mut entries = match record.get(ENTRIES_OFFSET..) {
            Some(entry_bytes) => parse_array(entry_bytes)?,
            None => Vec::new(),
        };

        let mut applied = false;
        for index in 0..entries.len() {
            let entry = &entries[index];
            let entry_symbol = entry.get(..SYMBOL_LENGTH);
            let entry_type = entry.get(SYMBOL_LENGTH).copied();
            if entry_symbol != Some(symbol.as_slice()) || entry_type != Some(token_type) {
                continue;
            }
            ctx.op(5)?;
            let (balance, _) = unpack_int(entry, SYMBOL_LENGTH + 1)?;
            let updated = if credit {
                balance.checked_add(amount).ok_or(VmError::Overflow)?
            } else {
                balance
                    .checked_sub(amount)
                    .ok_or_else(|| VmError::InsufficientAssetBalance {
                        symbol: symbol_display(symbol),
                        have: balance,
                        need: amount,
                    })?
            };
            ctx.op(2)?;
            if updated.is_zero() {
                entries.remove(index);
            } else {
                entries[index] = Self::encode_entry(symbol, token_type, updated);
            }
            applied = true;
            break;
        }

        if !applied {
            if !credit {
                return Err(VmError::InsufficientAssetBalance {
                    symbol: symbol_display(symbol),
                    have: U256::zero(),
                    need: amount,
                });
            }
            ctx.op(9)?;
            entries.push(Self::encode_entry(symbol, token_type, amount));
        }

        ctx.op(7)?;
        let entry_bytes = array_to_bytes(&entries)?;
        let mut updated = Vec::with_capacity(ENTRIES_OFFSET + entry_bytes.len());
        updated.extend_from_slice(&instance_id.to_be_bytes());
        put_length_prefixed(&mut updated, &entry_bytes);
        Ok(updated)
    }

    fn encode_entry(symbol: &Symbol, token_type: u8, balance: U256) -> Vec<u8> {
        let mut entry = Vec::with_capacity(SYMBOL_LENGTH + 1 + DATA_LEN_LENGTH + 32);
        entry.extend_from_slice(symbol);
        entry.push(token_type);
        entry.extend_from_slice(&pack_int(balance));
        entry
    }

    // ── Introspection ─────────────────────────────────────────────

    /// Decode every fungible token entry inside an asset sub-record into
    /// `symbol -> (type, balance)`.
    pub fn account_tokens(
        record: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<BTreeMap<Symbol, (u8, U256)>, VmError> {
        ctx.op(1)?;
        let mut tokens = BTreeMap::new();
        let Some(entry_bytes) = record.get(ENTRIES_OFFSET..) else {
            return Ok(tokens);
        };
        for entry in parse_array(entry_bytes)? {
            ctx.op(4)?;
            let mut reader = ByteReader::new(&entry);
            let symbol: Symbol = reader
                .take(SYMBOL_LENGTH, "token symbol")?
                .try_into()
                .map_err(|_| VmError::Internal("symbol width"))?;
            let token_type = reader.read_u8("token type")?;
            if token_type == TYPE_NON_FUNGIBLE {
                return Err(VmError::NotImplemented("non-fungible tokens"));
            }
            if token_type != TYPE_FUNGIBLE {
                return Err(VmError::InvalidTokenType(token_type));
            }
            ctx.op(5)?;
            let balance = reader.read_packed_int("token balance")?;
            tokens.insert(symbol, (token_type, balance));
        }
        Ok(tokens)
    }

    /// Balance of one token held by an account, decoded from its full
    /// account storage. Read-only introspection for external harnesses.
    pub fn balance_of(
        account_storage: &[u8],
        assets_app_id: InstanceId,
        symbol: &Symbol,
    ) -> U256 {
        let Ok(records) = parse_array(account_storage) else {
            return U256::zero();
        };
        let Some((_, record)) = find_app_record(assets_app_id, &records) else {
            return U256::zero();
        };
        let mut ctx = ExecutionContext::no_op();
        Self::account_tokens(record, &mut ctx)
            .ok()
            .and_then(|tokens| tokens.get(symbol).map(|(_, balance)| *balance))
            .unwrap_or_default()
    }
}
