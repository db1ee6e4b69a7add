//! On-account messaging application.
//!
//! One slot per account: the caller's sub-record is
//! `instance_id(4) ‖ params_as_sent`, and every send overwrites it, so
//! only the most recent message survives.

use mam_codec::{ByteReader, account_array_to_bytes, find_app_record, parse_array};
use mam_common::{Address, InstanceId};

use crate::apps::set_app_record;
use crate::context::ExecutionContext;
use crate::errors::VmError;

#[derive(Debug, Clone)]
pub struct Chat {
    instance_id: InstanceId,
    instance_address: Address,
}

impl Chat {
    pub const MAX_STORAGE: usize = 1024;

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
            1 => self.send(caller, params, ctx),
            other => Err(VmError::UnknownSelector {
                app: "chat",
                selector: other,
            }),
        }
    }

    /// `send(recipient_len(8) ‖ recipient ‖ msg_len(8) ‖ msg)`
    fn send(
        &self,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        // Validate the shape before storing the raw parameters.
        let mut reader = ByteReader::new(params);
        reader.read_length_prefixed("recipient")?;
        reader.read_length_prefixed("message")?;
        ctx.op(4)?;

        let mut record = self.instance_id.to_be_bytes().to_vec();
        record.extend_from_slice(params);

        let caller_storage = ctx.read_account_storage(&caller)?;
        let mut records = parse_array(&caller_storage)?;
        let index = find_app_record(self.instance_id, &records).map(|(index, _)| index);
        set_app_record(&mut records, index, record);
        ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;
        Ok(())
    }

    /// Decode a chat sub-record payload (the bytes after the instance id)
    /// into `(recipient, message)`. Read-only introspection for external
    /// harnesses.
    pub fn decode_entry(payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>), VmError> {
        let mut reader = ByteReader::new(payload);
        let recipient = reader.read_length_prefixed("recipient")?.to_vec();
        let message = reader.read_length_prefixed("message")?.to_vec();
        Ok((recipient, message))
    }
}
