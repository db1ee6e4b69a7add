//! Native-coin application (instance id 0).
//!
//! Keeps one balance per account inside the account's MCM sub-record:
//! `instance_id(4) ‖ data_len(8) ‖ balance(8)`. Gas for every call in the
//! machine is priced in this coin, so the runtime also goes through the
//! helpers here for its reserve bookkeeping.

use mam_codec::{ByteReader, CodecError, account_array_to_bytes, find_app_record, parse_array};
use mam_common::{Address, InstanceId};
use mam_common::constants::{DATA_LEN_LENGTH, INSTANCE_ID_LENGTH};

use crate::apps::set_app_record;
use crate::constants::{BALANCE_LENGTH, MAX_MEMO_LENGTH, MCM_APP_ID, MIN_TAG_FUNDING};
use crate::context::ExecutionContext;
use crate::errors::VmError;

/// Byte offset of the balance inside an MCM sub-record.
const BALANCE_OFFSET: usize = INSTANCE_ID_LENGTH + DATA_LEN_LENGTH;

#[derive(Debug, Clone)]
pub struct Mcm {
    instance_id: InstanceId,
    instance_address: Address,
}

impl Mcm {
    /// MCM keeps no application storage of its own; only per-account
    /// sub-records. The cap is therefore never reached.
    pub const MAX_STORAGE: usize = 0;

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
            1 => self.create_tag(caller, params, ctx),
            2 => self.transfer(caller, params, ctx),
            other => Err(VmError::UnknownSelector {
                app: "mcm",
                selector: other,
            }),
        }
    }

    /// `create_tag(new_address(12) ‖ funding(8))`
    ///
    /// Funds a brand new account from the caller's balance. Refuses to
    /// overwrite an address that already holds any storage.
    fn create_tag(
        &self,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        ctx.op(3)?;
        let mut reader = ByteReader::new(params);
        let new_address = reader.read_address("new address")?;
        ctx.op(5)?;
        let funding = reader.read_u64("funding")?;
        ctx.op(3)?;
        if funding < MIN_TAG_FUNDING {
            return Err(VmError::FundingTooLow(funding));
        }

        // Debit the funding from the caller.
        let caller_storage = ctx.read_account_storage(&caller)?;
        let mut records = parse_array(&caller_storage)?;
        let (index, record) = find_app_record(MCM_APP_ID, &records)
            .map(|(index, record)| (Some(index), record.to_vec()))
            .unwrap_or((None, Vec::new()));
        let balance = Self::balance(&record, ctx)?;
        ctx.op(2)?;
        if balance < funding {
            return Err(VmError::InsufficientBalance {
                have: balance,
                need: funding,
            });
        }
        let debited = Self::subtract_from_balance(&record, funding, ctx)?;
        set_app_record(&mut records, index, debited);
        ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;

        let new_storage = ctx.read_account_storage(&new_address)?;
        ctx.op(3)?;
        if !new_storage.is_empty() {
            return Err(VmError::AddressExists(new_address));
        }

        ctx.op(4)?;
        let record = Self::encode_record(self.instance_id, funding);
        ctx.write_account_storage(&new_address, account_array_to_bytes(&[record])?)?;
        Ok(())
    }

    /// `transfer(array of (amount(8) ‖ destination(12) ‖ memo_len(8) ‖ memo))`
    ///
    /// Credits every destination, then debits the caller by the sum of the
    /// per-transfer amounts. Destinations must already exist.
    fn transfer(
        &self,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        ctx.op(3)?;
        let transfers = parse_array(params)?;
        let mut total: u64 = 0;
        for transfer in &transfers {
            let mut reader = ByteReader::new(transfer);
            let amount = reader.read_u64("transfer amount")?;
            let destination = reader.read_address("transfer destination")?;
            let memo_len = reader.read_u64("memo length")?;
            let memo_len = usize::try_from(memo_len).map_err(|_| VmError::Overflow)?;
            if memo_len > MAX_MEMO_LENGTH {
                return Err(VmError::MemoTooLong(memo_len));
            }
            // The memo rides along in the transaction; it is validated but
            // not stored.
            reader.take(memo_len, "memo")?;

            let destination_storage = ctx.read_account_storage(&destination)?;
            if destination_storage.is_empty() {
                return Err(VmError::DestinationNotFound(destination));
            }
            let mut records = parse_array(&destination_storage)?;
            let (index, record) = find_app_record(MCM_APP_ID, &records)
                .map(|(index, record)| (Some(index), record.to_vec()))
                .unwrap_or((None, Self::encode_record(MCM_APP_ID, 0)));
            let credited = Self::add_to_balance(&record, amount, ctx)?;
            set_app_record(&mut records, index, credited);
            ctx.write_account_storage(&destination, account_array_to_bytes(&records)?)?;

            total = total.checked_add(amount).ok_or(VmError::Overflow)?;
        }

        // Debit the accumulated total from the caller.
        let caller_storage = ctx.read_account_storage(&caller)?;
        let mut records = parse_array(&caller_storage)?;
        match find_app_record(MCM_APP_ID, &records) {
            Some((index, record)) => {
                let record = record.to_vec();
                let balance = Self::balance(&record, ctx)?;
                ctx.op(2)?;
                if balance < total {
                    return Err(VmError::InsufficientBalance {
                        have: balance,
                        need: total,
                    });
                }
                let debited = Self::subtract_from_balance(&record, total, ctx)?;
                records[index] = debited;
                ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;
            }
            None if total == 0 => {}
            None => {
                return Err(VmError::InsufficientBalance {
                    have: 0,
                    need: total,
                });
            }
        }
        Ok(())
    }

    // ── Sub-record helpers ────────────────────────────────────────

    /// Encode a fresh MCM sub-record carrying `balance`.
    pub fn encode_record(instance_id: InstanceId, balance: u64) -> Vec<u8> {
        let mut record = Vec::with_capacity(BALANCE_OFFSET + BALANCE_LENGTH);
        record.extend_from_slice(&instance_id.to_be_bytes());
        record.extend_from_slice(&8u64.to_be_bytes());
        record.extend_from_slice(&balance.to_be_bytes());
        record
    }

    /// Balance carried by a sub-record; an absent or truncated record reads
    /// as zero.
    pub fn balance(record: &[u8], ctx: &mut ExecutionContext<'_>) -> Result<u64, VmError> {
        ctx.op(7)?;
        Ok(Self::raw_balance(record))
    }

    pub(crate) fn raw_balance(record: &[u8]) -> u64 {
        record
            .get(BALANCE_OFFSET..BALANCE_OFFSET + BALANCE_LENGTH)
            .and_then(|bytes| <[u8; BALANCE_LENGTH]>::try_from(bytes).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0)
    }

    /// Copy of `record` with its balance replaced.
    pub(crate) fn with_balance(record: &[u8], balance: u64) -> Result<Vec<u8>, VmError> {
        if record.len() < BALANCE_OFFSET + BALANCE_LENGTH {
            return Err(CodecError::UnexpectedEof("native balance").into());
        }
        let mut copy = record.to_vec();
        copy[BALANCE_OFFSET..BALANCE_OFFSET + BALANCE_LENGTH]
            .copy_from_slice(&balance.to_be_bytes());
        Ok(copy)
    }

    pub fn add_to_balance(
        record: &[u8],
        amount: u64,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Vec<u8>, VmError> {
        ctx.op(4)?;
        let balance = Self::raw_balance(record)
            .checked_add(amount)
            .ok_or(VmError::Overflow)?;
        ctx.op(6)?;
        Self::with_balance(record, balance)
    }

    pub fn subtract_from_balance(
        record: &[u8],
        amount: u64,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Vec<u8>, VmError> {
        ctx.op(4)?;
        let balance = Self::raw_balance(record);
        let remaining = balance.checked_sub(amount).ok_or(VmError::InsufficientBalance {
            have: balance,
            need: amount,
        })?;
        ctx.op(6)?;
        Self::with_balance(record, remaining)
    }

    /// Balance held by an account, decoded from its full account storage.
    /// Read-only introspection for external harnesses.
    pub fn balance_of(account_storage: &[u8]) -> u64 {
        parse_array(account_storage)
            .ok()
            .and_then(|records| {
                find_app_record(MCM_APP_ID, &records)
                    .map(|(_, record)| Self::raw_balance(record))
            })
            .unwrap_or(0)
    }
}
