//! Gas-metered, buffered access to the two backing stores.
//!
//! Every call runs against a fresh `ExecutionContext`. Reads consult the
//! write buffer first, then fall through to the store; writes only ever
//! land in the buffer. The runtime flushes the buffer on the success path
//! of a committed call and drops it otherwise, which is what makes a call
//! atomic.

use std::collections::BTreeMap;

use bytes::Bytes;
use mam_common::{Address, InstanceId};
use mam_common::constants::INSTANCE_ID_LENGTH;
use mam_storage::KeyValueStore;

use crate::constants::{
    GAS_READ_STORAGE, GAS_SIMPLE_OP, GAS_WRITE_STORAGE_BASE, GAS_WRITE_STORAGE_PER_BYTE,
};
use crate::errors::VmError;

/// Buffered writes keyed by raw store key, in key order.
pub type WriteBuffer = BTreeMap<Vec<u8>, Bytes>;

/// Storage key of an application instance's own storage.
pub(crate) fn app_storage_key(id: InstanceId) -> [u8; INSTANCE_ID_LENGTH] {
    id.to_be_bytes()
}

struct Backing<'a> {
    app_storage: &'a dyn KeyValueStore,
    account_storage: &'a dyn KeyValueStore,
}

/// Execution state scoped to a single call.
///
/// Holds the gas counter and a write-through buffer over each of the two
/// stores. A context with no gas budget (`max_gas = None`) meters but never
/// exhausts; a [`no-op`](ExecutionContext::no_op) context does not meter at
/// all and is only suitable for pure record decoding.
pub struct ExecutionContext<'a> {
    max_gas: Option<u64>,
    backing: Option<Backing<'a>>,
    app_buffer: WriteBuffer,
    account_buffer: WriteBuffer,
    total_gas: u64,
    no_op: bool,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        max_gas: Option<u64>,
        app_storage: &'a dyn KeyValueStore,
        account_storage: &'a dyn KeyValueStore,
    ) -> Self {
        Self {
            max_gas,
            backing: Some(Backing {
                app_storage,
                account_storage,
            }),
            app_buffer: WriteBuffer::new(),
            account_buffer: WriteBuffer::new(),
            total_gas: 0,
            no_op: false,
        }
    }

    /// A context that performs no metering and has no store backing.
    ///
    /// Used by record-decoding helpers when they run outside a call.
    pub fn no_op() -> ExecutionContext<'static> {
        ExecutionContext {
            max_gas: None,
            backing: None,
            app_buffer: WriteBuffer::new(),
            account_buffer: WriteBuffer::new(),
            total_gas: 0,
            no_op: true,
        }
    }

    // ── Gas metering ──────────────────────────────────────────────

    /// Charge `multi` simple operations.
    pub fn op(&mut self, multi: u64) -> Result<(), VmError> {
        if self.no_op {
            return Ok(());
        }
        self.charge(GAS_SIMPLE_OP.checked_mul(multi).ok_or(VmError::Overflow)?)
    }

    fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        self.total_gas = self
            .total_gas
            .checked_add(amount)
            .ok_or(VmError::Internal("gas counter overflow"))?;
        if let Some(max_gas) = self.max_gas
            && self.total_gas > max_gas
        {
            return Err(VmError::OutOfGas);
        }
        Ok(())
    }

    fn charge_write(&mut self, value_len: usize) -> Result<(), VmError> {
        let per_byte = GAS_WRITE_STORAGE_PER_BYTE
            .checked_mul(u64::try_from(value_len).map_err(|_| VmError::Overflow)?)
            .ok_or(VmError::Overflow)?;
        self.charge(
            GAS_WRITE_STORAGE_BASE
                .checked_add(per_byte)
                .ok_or(VmError::Overflow)?,
        )
    }

    /// Gas consumed so far. Fails on a no-op context, which is not metered.
    pub fn total_gas_used(&self) -> Result<u64, VmError> {
        if self.no_op {
            return Err(VmError::NoOpContext);
        }
        Ok(self.total_gas)
    }

    pub(crate) fn total_gas(&self) -> u64 {
        self.total_gas
    }

    // ── Application storage ───────────────────────────────────────

    pub fn read_app_storage(&mut self, id: InstanceId) -> Result<Bytes, VmError> {
        if !self.no_op {
            self.charge(GAS_READ_STORAGE)?;
        }
        self.read_app_storage_unmetered(id)
    }

    /// Read without charging gas. Reserved for runtime bookkeeping.
    pub(crate) fn read_app_storage_unmetered(&self, id: InstanceId) -> Result<Bytes, VmError> {
        let key = app_storage_key(id);
        if let Some(value) = self.app_buffer.get(key.as_slice()) {
            return Ok(value.clone());
        }
        let backing = self.backing.as_ref().ok_or(VmError::NoOpContext)?;
        Ok(backing.app_storage.read(&key))
    }

    pub fn write_app_storage(&mut self, id: InstanceId, value: Vec<u8>) -> Result<(), VmError> {
        if !self.no_op {
            self.charge_write(value.len())?;
        }
        self.app_buffer
            .insert(app_storage_key(id).to_vec(), Bytes::from(value));
        Ok(())
    }

    // ── Account storage ───────────────────────────────────────────

    pub fn read_account_storage(&mut self, address: &Address) -> Result<Bytes, VmError> {
        if !self.no_op {
            self.charge(GAS_READ_STORAGE)?;
        }
        self.read_account_storage_unmetered(address)
    }

    /// Read without charging gas. Reserved for runtime bookkeeping, so the
    /// gas-reserve debit and credit do not themselves consume gas.
    pub(crate) fn read_account_storage_unmetered(
        &self,
        address: &Address,
    ) -> Result<Bytes, VmError> {
        if let Some(value) = self.account_buffer.get(address.as_bytes()) {
            return Ok(value.clone());
        }
        let backing = self.backing.as_ref().ok_or(VmError::NoOpContext)?;
        Ok(backing.account_storage.read(address.as_bytes()))
    }

    pub fn write_account_storage(
        &mut self,
        address: &Address,
        value: Vec<u8>,
    ) -> Result<(), VmError> {
        if !self.no_op {
            self.charge_write(value.len())?;
        }
        self.account_buffer
            .insert(address.as_bytes().to_vec(), Bytes::from(value));
        Ok(())
    }

    /// Write without charging gas. Reserved for runtime bookkeeping.
    pub(crate) fn write_account_storage_unmetered(
        &mut self,
        address: &Address,
        value: Vec<u8>,
    ) -> Result<(), VmError> {
        self.account_buffer
            .insert(address.as_bytes().to_vec(), Bytes::from(value));
        Ok(())
    }

    /// Surrender the buffered writes for the runtime to flush, in key order.
    pub(crate) fn into_buffers(self) -> (WriteBuffer, WriteBuffer) {
        (self.app_buffer, self.account_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mam_storage::InMemoryStore;

    fn stores() -> (InMemoryStore, InMemoryStore) {
        (InMemoryStore::new(), InMemoryStore::new())
    }

    #[test]
    fn gas_accumulates_monotonically() {
        let (app, account) = stores();
        let mut ctx = ExecutionContext::new(Some(100), &app, &account);
        ctx.op(1).unwrap();
        let after_one = ctx.total_gas_used().unwrap();
        ctx.op(5).unwrap();
        let after_six = ctx.total_gas_used().unwrap();
        assert!(after_six > after_one);
        assert_eq!(after_six, 6);
    }

    #[test]
    fn exceeding_the_budget_is_out_of_gas() {
        let (app, account) = stores();
        let mut ctx = ExecutionContext::new(Some(5), &app, &account);
        ctx.op(5).unwrap();
        assert_eq!(ctx.op(1), Err(VmError::OutOfGas));
    }

    #[test]
    fn no_budget_never_exhausts() {
        let (app, account) = stores();
        let mut ctx = ExecutionContext::new(None, &app, &account);
        ctx.op(1_000_000).unwrap();
        assert_eq!(ctx.total_gas_used().unwrap(), 1_000_000);
    }

    #[test]
    fn reads_see_buffered_writes_first() {
        let (mut app, account) = stores();
        app.write(&1u32.to_be_bytes(), Bytes::from_static(b"old"));
        let mut ctx = ExecutionContext::new(None, &app, &account);
        assert_eq!(ctx.read_app_storage(1).unwrap(), Bytes::from_static(b"old"));
        ctx.write_app_storage(1, b"new".to_vec()).unwrap();
        assert_eq!(ctx.read_app_storage(1).unwrap(), Bytes::from_static(b"new"));
        // The underlying store is untouched until the runtime flushes.
        assert_eq!(app.read(&1u32.to_be_bytes()), Bytes::from_static(b"old"));
    }

    #[test]
    fn write_gas_scales_with_value_length() {
        let (app, account) = stores();
        let mut ctx = ExecutionContext::new(None, &app, &account);
        ctx.write_app_storage(1, vec![0u8; 4]).unwrap();
        assert_eq!(
            ctx.total_gas_used().unwrap(),
            GAS_WRITE_STORAGE_BASE + 4 * GAS_WRITE_STORAGE_PER_BYTE
        );
    }

    #[test]
    fn unmetered_access_is_free() {
        let (app, account) = stores();
        let mut ctx = ExecutionContext::new(Some(0), &app, &account);
        let address = Address([0x11; 12]);
        ctx.write_account_storage_unmetered(&address, b"record".to_vec())
            .unwrap();
        let value = ctx.read_account_storage_unmetered(&address).unwrap();
        assert_eq!(value, Bytes::from_static(b"record"));
        assert_eq!(ctx.total_gas_used().unwrap(), 0);
    }

    #[test]
    fn no_op_context_does_not_meter() {
        let mut ctx = ExecutionContext::no_op();
        ctx.op(1_000).unwrap();
        assert_eq!(ctx.total_gas_used(), Err(VmError::NoOpContext));
    }

    #[test]
    fn no_op_context_has_no_storage() {
        let ctx = ExecutionContext::no_op();
        assert_eq!(
            ctx.read_app_storage_unmetered(0),
            Err(VmError::NoOpContext)
        );
    }

    #[test]
    fn buffers_flush_in_key_order() {
        let (app, account) = stores();
        let mut ctx = ExecutionContext::new(None, &app, &account);
        ctx.write_app_storage(7, b"seven".to_vec()).unwrap();
        ctx.write_app_storage(1, b"one".to_vec()).unwrap();
        let (app_buffer, _) = ctx.into_buffers();
        let keys: Vec<_> = app_buffer.keys().cloned().collect();
        assert_eq!(keys, vec![1u32.to_be_bytes().to_vec(), 7u32.to_be_bytes().to_vec()]);
    }
}
