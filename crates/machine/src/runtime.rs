//! The machine itself: registry, dispatch, gas economics, commit.
//!
//! `call` is the sole entry point for state changes. Every call runs
//! against a fresh [`ExecutionContext`]; the runtime pre-debits the
//! caller's gas reserve so the budget is always funded, dispatches into
//! the application behind a single catch point, re-credits the reserve,
//! and settles the actual gas. A committed success flushes the context's
//! buffers into the stores in key order; any failure drops the buffers
//! and charges the caller the full budget, clamped at their balance.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use mam_codec::{account_array_to_bytes, find_app_record, parse_array};
use mam_common::{Address, InstanceId};
use mam_storage::KeyValueStore;
use tracing::{debug, info};

use crate::apps::{App, Catalogue, Mcm};
use crate::chain::ChainHead;
use crate::constants::{APP_TYPE_MCM, GAS_PRICE, MCM_APP_ID};
use crate::context::{ExecutionContext, WriteBuffer, app_storage_key};
use crate::errors::VmError;

/// One machine per process. A second construction fails until the first
/// instance is dropped.
static MACHINE_LIVE: AtomicBool = AtomicBool::new(false);

/// A registered application template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTemplate {
    pub template_type: u8,
}

impl AppTemplate {
    pub fn new(template_type: u8) -> Self {
        Self { template_type }
    }
}

/// Result of a call: gas consumed, its price in nMCM, and the captured
/// failure if the call did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub gas_used: u64,
    pub gas_cost: u64,
    pub error: Option<VmError>,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The Mochimo Application Machine.
pub struct Mam {
    templates: Vec<AppTemplate>,
    apps: BTreeMap<InstanceId, App>,
    addresses: BTreeMap<Address, InstanceId>,
    app_storage: Box<dyn KeyValueStore>,
    account_storage: Box<dyn KeyValueStore>,
    next_instance_id: InstanceId,
    chain: ChainHead,
}

impl Mam {
    /// Build a machine over the given stores. The native-coin application
    /// is registered as instance 0 unconditionally.
    ///
    /// The stores may arrive pre-populated (genesis accounts); the machine
    /// never assumes they are empty.
    pub fn new(
        app_storage: Box<dyn KeyValueStore>,
        account_storage: Box<dyn KeyValueStore>,
    ) -> Result<Self, VmError> {
        if MACHINE_LIVE.swap(true, Ordering::SeqCst) {
            return Err(VmError::MachineAlreadyRunning);
        }
        let mut apps = BTreeMap::new();
        apps.insert(
            MCM_APP_ID,
            App::Mcm(Mcm::new(MCM_APP_ID, Address::instance(0))),
        );
        Ok(Self {
            templates: vec![AppTemplate::new(APP_TYPE_MCM)],
            apps,
            addresses: BTreeMap::new(),
            app_storage,
            account_storage,
            next_instance_id: 1,
            chain: ChainHead::new(),
        })
    }

    /// Convenience constructor over fresh in-memory stores.
    pub fn in_memory() -> Result<Self, VmError> {
        Self::new(
            Box::new(mam_storage::InMemoryStore::new()),
            Box::new(mam_storage::InMemoryStore::new()),
        )
    }

    // ── Registry ──────────────────────────────────────────────────

    /// Register an application template. Duplicate types are rejected.
    pub fn add_app_template(&mut self, template: AppTemplate) -> Result<(), VmError> {
        if self
            .templates
            .iter()
            .any(|existing| existing.template_type == template.template_type)
        {
            return Err(VmError::TemplateExists(template.template_type));
        }
        self.templates.push(template);
        Ok(())
    }

    /// Instantiate a registered template under the next instance id.
    ///
    /// The instance's reserved address starts with an empty account entry;
    /// instances are never destroyed.
    pub fn create_instance(&mut self, template_type: u8) -> Result<InstanceId, VmError> {
        if !self
            .templates
            .iter()
            .any(|template| template.template_type == template_type)
        {
            return Err(VmError::UnknownTemplateType(template_type));
        }
        let instance_id = self.next_instance_id;
        let short_id =
            u16::try_from(instance_id).map_err(|_| VmError::InstanceLimit(instance_id))?;
        let instance_address = Address::instance(short_id);
        let app = App::from_template(template_type, instance_id, instance_address)?;
        self.next_instance_id += 1;
        self.account_storage.write(instance_address.as_bytes(), Bytes::new());
        self.addresses.insert(instance_address, instance_id);
        self.apps.insert(instance_id, app);
        info!(instance_id, template_type, %instance_address, "created application instance");
        Ok(instance_id)
    }

    // ── Dispatch ──────────────────────────────────────────────────

    /// Execute one call against the machine.
    ///
    /// Returns `Err` only for caller misuse that never reaches dispatch
    /// (unknown application id, committed call without a gas budget).
    /// Every in-call failure lands in [`CallOutcome::error`] with the
    /// punitive gas charge applied.
    pub fn call(
        &mut self,
        dry_run: bool,
        caller: Address,
        max_gas: Option<u64>,
        app_id: InstanceId,
        selector: u8,
        params: &[u8],
    ) -> Result<CallOutcome, VmError> {
        if !self.apps.contains_key(&app_id) {
            return Err(VmError::UnknownApp(app_id));
        }
        if !dry_run && max_gas.is_none() {
            return Err(VmError::MaxGasRequired);
        }
        debug!(app_id, selector, dry_run, %caller, "executing call");

        let (outcome, buffers) = {
            let catalogue = Catalogue::new(&self.apps, self.chain.bnum());
            let mut ctx =
                ExecutionContext::new(max_gas, &*self.app_storage, &*self.account_storage);
            let result = dispatch(
                &catalogue, &mut ctx, dry_run, caller, max_gas, app_id, selector, params,
            );

            // On a committed failure the miner keeps the whole budget.
            let gas_used = match (&result, dry_run) {
                (Err(_), false) => max_gas.unwrap_or_default(),
                _ => ctx.total_gas(),
            };
            let gas_cost = gas_used
                .checked_mul(GAS_PRICE)
                .ok_or(VmError::Internal("gas cost overflow"))?;

            let error = result.err();
            let commit = !dry_run && error.is_none();
            if commit {
                debit_gas_buffered(&mut ctx, &caller, gas_cost)?;
            }
            let buffers = commit.then(|| ctx.into_buffers());
            (
                CallOutcome {
                    gas_used,
                    gas_cost,
                    error,
                },
                buffers,
            )
        };

        match buffers {
            Some((app_buffer, account_buffer)) => self.flush(app_buffer, account_buffer),
            // Committed failure: the buffers are gone; only the punitive
            // gas debit lands, clamped at the caller's balance.
            None if !dry_run => self.debit_gas_direct(&caller, outcome.gas_cost),
            None => {}
        }

        if let Some(error) = &outcome.error {
            debug!(%error, gas_used = outcome.gas_used, "call failed");
        }
        Ok(outcome)
    }

    /// Apply buffered writes to the stores, in key order.
    fn flush(&mut self, app_buffer: WriteBuffer, account_buffer: WriteBuffer) {
        for (key, value) in app_buffer {
            self.app_storage.write(&key, value);
        }
        for (key, value) in account_buffer {
            self.account_storage.write(&key, value);
        }
    }

    /// Debit the punitive gas charge straight against the store. Malformed
    /// or missing caller records debit nothing.
    fn debit_gas_direct(&mut self, caller: &Address, gas_cost: u64) {
        let storage = self.account_storage.read(caller.as_bytes());
        let Ok(mut records) = parse_array(&storage) else {
            return;
        };
        let Some((index, record)) = find_app_record(MCM_APP_ID, &records) else {
            return;
        };
        let balance = Mcm::raw_balance(record);
        let Ok(updated) = Mcm::with_balance(record, balance.saturating_sub(gas_cost)) else {
            return;
        };
        records[index] = updated;
        let Ok(encoded) = account_array_to_bytes(&records) else {
            return;
        };
        self.account_storage.write(caller.as_bytes(), Bytes::from(encoded));
    }

    // ── Introspection ─────────────────────────────────────────────

    /// Current block number of the external chain view.
    pub fn bnum(&self) -> u64 {
        self.chain.bnum()
    }

    /// Advance the external chain view by one block.
    pub fn advance_block(&mut self) {
        self.chain.advance();
    }

    /// Read an account's raw storage.
    pub fn read_account_storage(&self, address: &Address) -> Bytes {
        self.account_storage.read(address.as_bytes())
    }

    /// Read an application instance's raw storage.
    pub fn read_app_storage(&self, id: InstanceId) -> Bytes {
        self.app_storage.read(&app_storage_key(id))
    }

    /// Reserved address of a registered instance.
    pub fn instance_address(&self, id: InstanceId) -> Option<Address> {
        self.apps.get(&id).map(App::instance_address)
    }

    /// Instance registered at a reserved address, if any.
    pub fn instance_by_address(&self, address: &Address) -> Option<InstanceId> {
        self.addresses.get(address).copied()
    }
}

impl Drop for Mam {
    fn drop(&mut self) {
        MACHINE_LIVE.store(false, Ordering::SeqCst);
    }
}

/// The guarded body of a call: reserve bookkeeping around the application
/// dispatch, then the storage-cap check.
#[allow(clippy::too_many_arguments)]
fn dispatch(
    catalogue: &Catalogue<'_>,
    ctx: &mut ExecutionContext<'_>,
    dry_run: bool,
    caller: Address,
    max_gas: Option<u64>,
    app_id: InstanceId,
    selector: u8,
    params: &[u8],
) -> Result<(), VmError> {
    let reserve = if dry_run {
        0
    } else {
        max_gas
            .unwrap_or_default()
            .checked_mul(GAS_PRICE)
            .ok_or(VmError::Internal("gas reserve overflow"))?
    };

    if !dry_run {
        // Pre-debit the reserve, unmetered, so the budget is guaranteed to
        // be funded whatever the application does to the balance.
        let storage = ctx.read_account_storage_unmetered(&caller)?;
        let mut records = parse_array(&storage)?;
        match find_app_record(MCM_APP_ID, &records) {
            Some((index, record)) => {
                let balance = Mcm::raw_balance(record);
                if balance < reserve {
                    return Err(VmError::InsufficientBalance {
                        have: balance,
                        need: reserve,
                    });
                }
                records[index] = Mcm::with_balance(record, balance - reserve)?;
                ctx.write_account_storage_unmetered(&caller, account_array_to_bytes(&records)?)?;
            }
            None if reserve == 0 => {}
            None => {
                return Err(VmError::InsufficientBalance {
                    have: 0,
                    need: reserve,
                });
            }
        }
    }

    let app = catalogue.app(app_id)?;
    let executed = app.execute(catalogue, caller, selector, params, ctx);

    if !dry_run && reserve > 0 {
        // Re-credit the reserve unconditionally; on the failure path the
        // buffered edits cancel out when the buffer is dropped.
        let storage = ctx.read_account_storage_unmetered(&caller)?;
        let mut records = parse_array(&storage)?;
        if let Some((index, record)) = find_app_record(MCM_APP_ID, &records) {
            let balance = Mcm::raw_balance(record)
                .checked_add(reserve)
                .ok_or(VmError::Overflow)?;
            records[index] = Mcm::with_balance(record, balance)?;
            ctx.write_account_storage_unmetered(&caller, account_array_to_bytes(&records)?)?;
        }
    }
    executed?;

    let used = ctx.read_app_storage_unmetered(app_id)?.len();
    if used > app.max_storage() {
        return Err(VmError::StorageOverflow {
            used,
            max: app.max_storage(),
        });
    }
    Ok(())
}

/// Settle the actual gas inside the buffer before it flushes: the debit is
/// clamped at the caller's balance.
fn debit_gas_buffered(
    ctx: &mut ExecutionContext<'_>,
    caller: &Address,
    gas_cost: u64,
) -> Result<(), VmError> {
    let storage = ctx.read_account_storage_unmetered(caller)?;
    let mut records = parse_array(&storage)?;
    let Some((index, record)) = find_app_record(MCM_APP_ID, &records) else {
        return Ok(());
    };
    let balance = Mcm::raw_balance(record);
    records[index] = Mcm::with_balance(record, balance.saturating_sub(gas_cost))?;
    ctx.write_account_storage_unmetered(caller, account_array_to_bytes(&records)?)?;
    Ok(())
}
