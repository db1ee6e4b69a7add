//! Peer-to-peer marketplace application.
//!
//! Application storage: `pack_int(offer_fee) ‖ pack_int(match_fee) ‖
//! assets_app_id(4) ‖ pack_int(next_offer_id)`. Each seller's sub-record
//! is `instance_id(4) ‖ array(offers)`, an offer being `pack_int(id) ‖
//! data_len(8) ‖ array(goods) ‖ data_len(8) ‖ array(price) ‖
//! counterparty(12)` with goods/price elements shaped
//! `symbol(4) ‖ pack_int(amount)`.
//!
//! Listing escrows the goods at the marketplace's instance address;
//! matching atomically swaps the escrowed goods against the price and
//! deletes the offer. An all-zero counterparty makes an offer public.

use ethereum_types::U256;
use mam_codec::{
    ByteReader, account_array_to_bytes, array_to_bytes, find_app_record, pack_int, parse_array,
    put_length_prefixed,
};
use mam_common::{Address, InstanceId};
use mam_common::constants::INSTANCE_ID_LENGTH;

use crate::apps::{Catalogue, set_app_record};
use crate::context::ExecutionContext;
use crate::errors::VmError;

#[derive(Debug, Clone)]
pub struct Marketplace {
    instance_id: InstanceId,
    instance_address: Address,
}

/// Decoded marketplace configuration and offer counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketState {
    pub offer_fee: U256,
    pub match_fee: U256,
    pub assets_app_id: InstanceId,
    /// Next offer id; advances by one per listing.
    pub next_offer_id: U256,
}

impl MarketState {
    pub fn decode(buf: &[u8]) -> Result<MarketState, VmError> {
        let mut reader = ByteReader::new(buf);
        let offer_fee = reader.read_packed_int("offer fee")?;
        let match_fee = reader.read_packed_int("match fee")?;
        let assets_app_id = reader.read_u32("marketplace assets app id")?;
        let next_offer_id = reader.read_packed_int("next offer id")?;
        Ok(MarketState {
            offer_fee,
            match_fee,
            assets_app_id,
            next_offer_id,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = pack_int(self.offer_fee);
        out.extend_from_slice(&pack_int(self.match_fee));
        out.extend_from_slice(&self.assets_app_id.to_be_bytes());
        out.extend_from_slice(&pack_int(self.next_offer_id));
        out
    }
}

/// A listed offer inside a seller's sub-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub id: U256,
    /// Escrowed goods, each `symbol(4) ‖ pack_int(amount)`.
    pub goods: Vec<Vec<u8>>,
    /// Asking price, same element shape as the goods.
    pub price: Vec<Vec<u8>>,
    /// All zeros for a public offer.
    pub counterparty: Address,
}

impl Offer {
    pub fn decode(buf: &[u8]) -> Result<Offer, VmError> {
        let mut reader = ByteReader::new(buf);
        let id = reader.read_packed_int("offer id")?;
        let goods = parse_array(reader.read_length_prefixed("offer goods")?)?;
        let price = parse_array(reader.read_length_prefixed("offer price")?)?;
        let counterparty = reader.read_address("offer counterparty")?;
        Ok(Offer {
            id,
            goods,
            price,
            counterparty,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, VmError> {
        let mut out = pack_int(self.id);
        put_length_prefixed(&mut out, &array_to_bytes(&self.goods)?);
        put_length_prefixed(&mut out, &array_to_bytes(&self.price)?);
        out.extend_from_slice(self.counterparty.as_bytes());
        Ok(out)
    }

    /// Whether `caller` may match this offer.
    fn open_to(&self, caller: &Address) -> bool {
        self.counterparty == Address::ZERO || self.counterparty == *caller
    }
}

impl Marketplace {
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
        catalogue: &Catalogue<'_>,
        caller: Address,
        selector: u8,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        match selector {
            1 => self.create(params, ctx),
            2 => self.list(catalogue, caller, params, ctx),
            3 => self.match_offer(catalogue, caller, params, ctx),
            4 => Err(VmError::NotImplemented("cancel")),
            other => Err(VmError::UnknownSelector {
                app: "marketplace",
                selector: other,
            }),
        }
    }

    /// `create(pack_int(offer_fee) ‖ pack_int(match_fee) ‖ assets_app_id(4))`
    ///
    /// Initializes the marketplace configuration with a fresh offer
    /// counter.
    fn create(&self, params: &[u8], ctx: &mut ExecutionContext<'_>) -> Result<(), VmError> {
        let mut reader = ByteReader::new(params);
        let offer_fee = reader.read_packed_int("offer fee")?;
        let match_fee = reader.read_packed_int("match fee")?;
        let assets_app_id = reader.read_u32("marketplace assets app id")?;
        ctx.op(3)?;
        let state = MarketState {
            offer_fee,
            match_fee,
            assets_app_id,
            next_offer_id: U256::zero(),
        };
        ctx.write_app_storage(self.instance_id, state.encode())?;
        Ok(())
    }

    /// `list(data_len(8) ‖ array(goods) ‖ data_len(8) ‖ array(price) ‖
    /// counterparty(12))`
    ///
    /// Escrows every good at the marketplace's address and appends the
    /// offer, under a fresh id, to the caller's sub-record.
    fn list(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let mut reader = ByteReader::new(params);
        let goods = parse_array(reader.read_length_prefixed("goods")?)?;
        let price = parse_array(reader.read_length_prefixed("price")?)?;
        let counterparty = reader.read_address("counterparty")?;

        let state_storage = ctx.read_app_storage(self.instance_id)?;
        let mut state = MarketState::decode(&state_storage)?;

        // Escrow the goods at the marketplace's address.
        let mut payload = Vec::with_capacity(goods.len());
        for good in &goods {
            let mut element = good.clone();
            element.extend_from_slice(self.instance_address.as_bytes());
            payload.push(element);
        }
        catalogue.app(state.assets_app_id)?.execute(
            catalogue,
            caller,
            3,
            &array_to_bytes(&payload)?,
            ctx,
        )?;

        let offer = Offer {
            id: state.next_offer_id,
            goods,
            price,
            counterparty,
        };

        // The escrow rewrote the caller's storage; read it back before
        // appending the offer.
        let caller_storage = ctx.read_account_storage(&caller)?;
        let mut records = parse_array(&caller_storage)?;
        let (index, mut offers) = match find_app_record(self.instance_id, &records) {
            Some((index, record)) => {
                let offers = parse_array(record.get(INSTANCE_ID_LENGTH..).unwrap_or_default())?;
                (Some(index), offers)
            }
            None => (None, Vec::new()),
        };
        ctx.op(3)?;
        offers.push(offer.encode()?);
        set_app_record(&mut records, index, self.encode_record(&offers)?);
        ctx.write_account_storage(&caller, account_array_to_bytes(&records)?)?;

        state.next_offer_id = state
            .next_offer_id
            .checked_add(U256::one())
            .ok_or(VmError::Overflow)?;
        ctx.write_app_storage(self.instance_id, state.encode())?;
        Ok(())
    }

    /// `match(seller(12) ‖ pack_int(offer_id))`
    ///
    /// Pays the price from the caller to the seller, releases the escrowed
    /// goods to the caller, and deletes the offer.
    fn match_offer(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        let mut reader = ByteReader::new(params);
        let seller = reader.read_address("seller")?;
        let offer_id = reader.read_packed_int("offer id")?;

        let state_storage = ctx.read_app_storage(self.instance_id)?;
        let state = MarketState::decode(&state_storage)?;

        let seller_storage = ctx.read_account_storage(&seller)?;
        let records = parse_array(&seller_storage)?;
        let Some((_, record)) = find_app_record(self.instance_id, &records) else {
            return Err(VmError::OfferNotFound(offer_id));
        };
        let offers = parse_array(record.get(INSTANCE_ID_LENGTH..).unwrap_or_default())?;
        let offer = offers
            .iter()
            .map(|encoded| Offer::decode(encoded))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .find(|offer| offer.id == offer_id)
            .ok_or(VmError::OfferNotFound(offer_id))?;

        ctx.op(3)?;
        if !offer.open_to(&caller) {
            return Err(VmError::PrivateOffer);
        }

        // Price moves from the matcher to the seller.
        let mut price_payload = Vec::with_capacity(offer.price.len());
        for element in &offer.price {
            let mut transfer = element.clone();
            transfer.extend_from_slice(seller.as_bytes());
            price_payload.push(transfer);
        }
        catalogue.app(state.assets_app_id)?.execute(
            catalogue,
            caller,
            3,
            &array_to_bytes(&price_payload)?,
            ctx,
        )?;

        // Escrowed goods move from the marketplace to the matcher.
        let mut goods_payload = Vec::with_capacity(offer.goods.len());
        for element in &offer.goods {
            let mut transfer = element.clone();
            transfer.extend_from_slice(caller.as_bytes());
            goods_payload.push(transfer);
        }
        catalogue.app(state.assets_app_id)?.execute(
            catalogue,
            self.instance_address,
            3,
            &array_to_bytes(&goods_payload)?,
            ctx,
        )?;

        // The transfers rewrote the seller's storage; delete the matched
        // offer from the fresh copy.
        let seller_storage = ctx.read_account_storage(&seller)?;
        let mut records = parse_array(&seller_storage)?;
        let Some((index, record)) = find_app_record(self.instance_id, &records) else {
            return Err(VmError::Internal("seller record vanished"));
        };
        let mut offers = parse_array(record.get(INSTANCE_ID_LENGTH..).unwrap_or_default())?;
        offers.retain(|encoded| {
            Offer::decode(encoded).map(|o| o.id != offer_id).unwrap_or(true)
        });
        records[index] = self.encode_record(&offers)?;
        ctx.write_account_storage(&seller, account_array_to_bytes(&records)?)?;
        Ok(())
    }

    fn encode_record(&self, offers: &[Vec<u8>]) -> Result<Vec<u8>, VmError> {
        let mut record = self.instance_id.to_be_bytes().to_vec();
        record.extend_from_slice(&array_to_bytes(offers)?);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> Offer {
        let mut good = b"LAMA".to_vec();
        good.extend_from_slice(&pack_int(U256::one()));
        let mut price = b"FIAT".to_vec();
        price.extend_from_slice(&pack_int(U256::one()));
        Offer {
            id: U256::from(3u64),
            goods: vec![good],
            price: vec![price],
            counterparty: Address::ZERO,
        }
    }

    #[test]
    fn offer_roundtrip() {
        let offer = offer();
        let decoded = Offer::decode(&offer.encode().unwrap()).unwrap();
        assert_eq!(decoded, offer);
    }

    #[test]
    fn market_state_roundtrip() {
        let state = MarketState {
            offer_fee: U256::from(5u64),
            match_fee: U256::from(7u64),
            assets_app_id: 1,
            next_offer_id: U256::from(12u64),
        };
        assert_eq!(MarketState::decode(&state.encode()).unwrap(), state);
    }

    #[test]
    fn public_offers_are_open_to_anyone() {
        let offer = offer();
        assert!(offer.open_to(&Address([0x11; 12])));
    }

    #[test]
    fn reserved_offers_are_open_to_the_counterparty_only() {
        let mut offer = offer();
        offer.counterparty = Address([0x22; 12]);
        assert!(offer.open_to(&Address([0x22; 12])));
        assert!(!offer.open_to(&Address([0x11; 12])));
    }
}
