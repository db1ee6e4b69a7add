//! End-to-end scenarios driving the machine the way an external harness
//! would: every operation is dry-run first to estimate the budget, then
//! committed with exactly that budget.

use bytes::Bytes;
use ethereum_types::U256;
use mam_codec::{account_array_to_bytes, array_to_bytes, find_app_record, pack_int, parse_array, put_length_prefixed};
use mam_common::{Address, InstanceId};
use mam_machine::apps::amm::PoolState;
use mam_machine::apps::assets::TYPE_FUNGIBLE;
use mam_machine::apps::marketplace::MarketState;
use mam_machine::apps::{Assets, Chat, Mcm};
use mam_machine::constants::{
    APP_TYPE_AMM, APP_TYPE_ASSETS, APP_TYPE_CHAT, APP_TYPE_MARKETPLACE, GAS_PRICE, MCM_APP_ID,
};
use mam_machine::{AppTemplate, CallOutcome, Mam, VmError};
use mam_storage::{InMemoryStore, KeyValueStore};
use serial_test::serial;

const ADDR_A: Address = Address([0x11; 12]);
const ADDR_B: Address = Address([0x22; 12]);
const LAMA: [u8; 4] = *b"LAMA";
const FIAT: [u8; 4] = *b"FIAT";

const GENESIS_BALANCE: u64 = 1_000_000;
const TAG_FUNDING: u64 = 500_000;

struct TestBed {
    mam: Mam,
    assets_id: InstanceId,
    amm_id: InstanceId,
    market_id: InstanceId,
    chat_id: InstanceId,
    /// Gas spent by A funding B's tag during setup.
    setup_gas_cost: u64,
}

/// Genesis: account A pre-seeded with one million MCM.
fn machine_with_genesis() -> Mam {
    let app_store = InMemoryStore::new();
    let mut account_store = InMemoryStore::new();
    let record = Mcm::encode_record(MCM_APP_ID, GENESIS_BALANCE);
    account_store.write(
        ADDR_A.as_bytes(),
        Bytes::from(account_array_to_bytes(&[record]).expect("genesis record")),
    );
    Mam::new(Box::new(app_store), Box::new(account_store)).expect("fresh machine")
}

/// Register the whole catalogue and fund account B via `create_tag`.
fn setup() -> TestBed {
    let mut mam = machine_with_genesis();
    for template_type in [APP_TYPE_ASSETS, APP_TYPE_AMM, APP_TYPE_MARKETPLACE, APP_TYPE_CHAT] {
        mam.add_app_template(AppTemplate::new(template_type))
            .expect("register template");
    }
    let assets_id = mam.create_instance(APP_TYPE_ASSETS).expect("assets instance");
    let amm_id = mam.create_instance(APP_TYPE_AMM).expect("amm instance");
    let market_id = mam
        .create_instance(APP_TYPE_MARKETPLACE)
        .expect("marketplace instance");
    let chat_id = mam.create_instance(APP_TYPE_CHAT).expect("chat instance");

    let outcome = execute(
        &mut mam,
        ADDR_A,
        MCM_APP_ID,
        1,
        &payload_create_tag(&ADDR_B, TAG_FUNDING),
    );
    TestBed {
        mam,
        assets_id,
        amm_id,
        market_id,
        chat_id,
        setup_gas_cost: outcome.gas_cost,
    }
}

/// Dry-run to estimate, then commit with exactly the estimated budget.
/// Asserts the dry-run/committed gas equivalence along the way.
fn execute(mam: &mut Mam, caller: Address, app_id: InstanceId, selector: u8, params: &[u8]) -> CallOutcome {
    let dry = mam
        .call(true, caller, None, app_id, selector, params)
        .expect("dry-run dispatch");
    assert!(dry.error.is_none(), "dry run failed: {:?}", dry.error);
    let committed = mam
        .call(false, caller, Some(dry.gas_used), app_id, selector, params)
        .expect("committed dispatch");
    assert!(
        committed.error.is_none(),
        "committed call failed: {:?}",
        committed.error
    );
    assert_eq!(dry.gas_used, committed.gas_used);
    committed
}

fn mcm_balance(mam: &Mam, address: &Address) -> u64 {
    Mcm::balance_of(&mam.read_account_storage(address))
}

fn token_balance(mam: &Mam, address: &Address, assets_id: InstanceId, symbol: &[u8; 4]) -> U256 {
    Assets::balance_of(&mam.read_account_storage(address), assets_id, symbol)
}

// ── Payload builders ──────────────────────────────────────────────

fn payload_create_tag(new_address: &Address, funding: u64) -> Vec<u8> {
    let mut payload = new_address.as_bytes().to_vec();
    payload.extend_from_slice(&funding.to_be_bytes());
    payload
}

fn payload_mcm_transfer(transfers: &[(u64, Address, &[u8])]) -> Vec<u8> {
    let elements: Vec<Vec<u8>> = transfers
        .iter()
        .map(|(amount, destination, memo)| {
            let mut element = amount.to_be_bytes().to_vec();
            element.extend_from_slice(destination.as_bytes());
            put_length_prefixed(&mut element, memo);
            element
        })
        .collect();
    array_to_bytes(&elements).expect("transfer list")
}

fn payload_create_token(symbol: &[u8; 4], admin: &Address) -> Vec<u8> {
    let mut data = pack_int(U256::zero());
    data.extend_from_slice(&pack_int(U256::from(18u64)));

    let mut payload = symbol.to_vec();
    payload.push(TYPE_FUNGIBLE);
    payload.extend_from_slice(admin.as_bytes());
    payload.push(0); // no modes
    put_length_prefixed(&mut payload, &data);
    payload
}

fn payload_mint(symbol: &[u8; 4], amount: u64, recipient: &Address) -> Vec<u8> {
    let mut entry = pack_int(U256::from(amount));
    entry.extend_from_slice(recipient.as_bytes());
    let mut payload = symbol.to_vec();
    payload.extend_from_slice(&array_to_bytes(&[entry]).expect("mint list"));
    payload
}

fn payload_token_transfer(symbol: &[u8; 4], amount: u64, recipient: &Address) -> Vec<u8> {
    let mut element = symbol.to_vec();
    element.extend_from_slice(&pack_int(U256::from(amount)));
    element.extend_from_slice(recipient.as_bytes());
    array_to_bytes(&[element]).expect("transfer list")
}

fn payload_create_pool(
    token_a: &[u8; 4],
    amount_a: u64,
    token_b: &[u8; 4],
    amount_b: u64,
    fee_bps: u16,
    assets_id: InstanceId,
) -> Vec<u8> {
    let mut payload = token_a.to_vec();
    payload.extend_from_slice(&pack_int(U256::from(amount_a)));
    payload.extend_from_slice(token_b);
    payload.extend_from_slice(&pack_int(U256::from(amount_b)));
    payload.extend_from_slice(&fee_bps.to_be_bytes());
    payload.extend_from_slice(&assets_id.to_be_bytes());
    payload
}

fn payload_add_liquidity(amount_a: u64, max_amount_b: u64) -> Vec<u8> {
    let mut payload = pack_int(U256::from(amount_a));
    payload.extend_from_slice(&pack_int(U256::from(max_amount_b)));
    payload
}

fn payload_swap(a_to_b: bool, amount_in: u64, min_amount_out: u64) -> Vec<u8> {
    let mut payload = vec![u8::from(a_to_b)];
    payload.extend_from_slice(&pack_int(U256::from(amount_in)));
    payload.extend_from_slice(&pack_int(U256::from(min_amount_out)));
    payload
}

fn payload_create_marketplace(assets_id: InstanceId) -> Vec<u8> {
    let mut payload = pack_int(U256::zero());
    payload.extend_from_slice(&pack_int(U256::zero()));
    payload.extend_from_slice(&assets_id.to_be_bytes());
    payload
}

fn payload_list(
    goods: &[(&[u8; 4], u64)],
    price: &[(&[u8; 4], u64)],
    counterparty: &Address,
) -> Vec<u8> {
    let encode_side = |side: &[(&[u8; 4], u64)]| {
        let elements: Vec<Vec<u8>> = side
            .iter()
            .map(|(symbol, amount)| {
                let mut element = symbol.to_vec();
                element.extend_from_slice(&pack_int(U256::from(*amount)));
                element
            })
            .collect();
        array_to_bytes(&elements).expect("offer side")
    };
    let mut payload = Vec::new();
    put_length_prefixed(&mut payload, &encode_side(goods));
    put_length_prefixed(&mut payload, &encode_side(price));
    payload.extend_from_slice(counterparty.as_bytes());
    payload
}

fn payload_match(seller: &Address, offer_id: u64) -> Vec<u8> {
    let mut payload = seller.as_bytes().to_vec();
    payload.extend_from_slice(&pack_int(U256::from(offer_id)));
    payload
}

fn payload_send_message(recipient: &[u8], message: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    put_length_prefixed(&mut payload, recipient);
    put_length_prefixed(&mut payload, message);
    payload
}

// ── Scenarios ─────────────────────────────────────────────────────

#[test]
#[serial]
fn create_account_moves_funding() {
    let bed = setup();
    assert_eq!(mcm_balance(&bed.mam, &ADDR_B), TAG_FUNDING);
    assert_eq!(
        mcm_balance(&bed.mam, &ADDR_A),
        GENESIS_BALANCE - TAG_FUNDING - bed.setup_gas_cost
    );
}

#[test]
#[serial]
fn duplicate_create_is_rejected_and_charged_in_full() {
    let mut bed = setup();
    let balance_before = mcm_balance(&bed.mam, &ADDR_A);
    let b_storage_before = bed.mam.read_account_storage(&ADDR_B);

    let max_gas = 5_000;
    let outcome = bed
        .mam
        .call(
            false,
            ADDR_A,
            Some(max_gas),
            MCM_APP_ID,
            1,
            &payload_create_tag(&ADDR_B, TAG_FUNDING),
        )
        .expect("dispatch");
    assert!(matches!(outcome.error, Some(VmError::AddressExists(_))));
    assert_eq!(outcome.gas_used, max_gas);

    // The failed call left no buffered write behind; only the punitive
    // charge landed.
    assert_eq!(bed.mam.read_account_storage(&ADDR_B), b_storage_before);
    assert_eq!(
        mcm_balance(&bed.mam, &ADDR_A),
        balance_before - max_gas * GAS_PRICE
    );
}

#[test]
#[serial]
fn native_transfer_conserves_total_supply() {
    let mut bed = setup();
    let total_before = mcm_balance(&bed.mam, &ADDR_A) + mcm_balance(&bed.mam, &ADDR_B);

    let outcome = execute(
        &mut bed.mam,
        ADDR_A,
        MCM_APP_ID,
        2,
        &payload_mcm_transfer(&[(1_000, ADDR_B, b"rent")]),
    );

    // The transfer itself conserves; only the gas settlement leaves.
    let total_after = mcm_balance(&bed.mam, &ADDR_A) + mcm_balance(&bed.mam, &ADDR_B);
    assert_eq!(total_after, total_before - outcome.gas_cost);
}

#[test]
#[serial]
fn oversized_memo_is_rejected() {
    let mut bed = setup();
    let memo = [0u8; 65];
    let outcome = bed
        .mam
        .call(
            false,
            ADDR_A,
            Some(5_000),
            MCM_APP_ID,
            2,
            &payload_mcm_transfer(&[(1, ADDR_B, &memo)]),
        )
        .expect("dispatch");
    assert!(matches!(outcome.error, Some(VmError::MemoTooLong(65))));
}

#[test]
#[serial]
fn token_lifecycle() {
    let mut bed = setup();
    execute(
        &mut bed.mam,
        ADDR_A,
        bed.assets_id,
        1,
        &payload_create_token(&LAMA, &ADDR_A),
    );
    execute(
        &mut bed.mam,
        ADDR_A,
        bed.assets_id,
        2,
        &payload_mint(&LAMA, 1_337_000, &ADDR_B),
    );
    execute(
        &mut bed.mam,
        ADDR_B,
        bed.assets_id,
        3,
        &payload_token_transfer(&LAMA, 777_000, &ADDR_A),
    );

    assert_eq!(
        token_balance(&bed.mam, &ADDR_A, bed.assets_id, &LAMA),
        U256::from(777_000u64)
    );
    assert_eq!(
        token_balance(&bed.mam, &ADDR_B, bed.assets_id, &LAMA),
        U256::from(560_000u64)
    );
}

#[test]
#[serial]
fn duplicate_token_and_foreign_mint_are_rejected() {
    let mut bed = setup();
    execute(
        &mut bed.mam,
        ADDR_A,
        bed.assets_id,
        1,
        &payload_create_token(&LAMA, &ADDR_A),
    );

    let duplicate = bed
        .mam
        .call(
            false,
            ADDR_A,
            Some(5_000),
            bed.assets_id,
            1,
            &payload_create_token(&LAMA, &ADDR_A),
        )
        .expect("dispatch");
    assert!(matches!(duplicate.error, Some(VmError::TokenExists(_))));

    // B is not the admin.
    let foreign_mint = bed
        .mam
        .call(
            false,
            ADDR_B,
            Some(5_000),
            bed.assets_id,
            2,
            &payload_mint(&LAMA, 1, &ADDR_B),
        )
        .expect("dispatch");
    assert!(matches!(foreign_mint.error, Some(VmError::NotMintable)));
}

#[test]
#[serial]
fn mint_advances_total_supply() {
    let mut bed = setup();
    execute(
        &mut bed.mam,
        ADDR_A,
        bed.assets_id,
        1,
        &payload_create_token(&LAMA, &ADDR_A),
    );
    execute(
        &mut bed.mam,
        ADDR_A,
        bed.assets_id,
        2,
        &payload_mint(&LAMA, 1_337_000, &ADDR_B),
    );

    let registry = parse_array(&bed.mam.read_app_storage(bed.assets_id)).expect("registry");
    let info = mam_machine::apps::assets::TokenInfo::decode(&registry[0]).expect("token info");
    assert_eq!(info.total_supply, U256::from(1_337_000u64));
    // Supply matches the sum of balances.
    assert_eq!(
        info.total_supply,
        token_balance(&bed.mam, &ADDR_B, bed.assets_id, &LAMA)
    );
}

/// Shared pipeline for the AMM scenarios: tokens minted, pool seeded with
/// 100k LAMA / 10k FIAT at 30 bps, one 1000-FIAT swap executed by B.
fn amm_bed() -> TestBed {
    let mut bed = setup();
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 1, &payload_create_token(&LAMA, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 1, &payload_create_token(&FIAT, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&LAMA, 200_000, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&FIAT, 20_000, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&FIAT, 5_000, &ADDR_B));
    bed.mam.advance_block();

    execute(
        &mut bed.mam,
        ADDR_A,
        bed.amm_id,
        1,
        &payload_create_pool(&LAMA, 100_000, &FIAT, 10_000, 30, bed.assets_id),
    );
    bed.mam.advance_block();

    execute(&mut bed.mam, ADDR_B, bed.amm_id, 5, &payload_swap(false, 1_000, 9_000));
    bed
}

#[test]
#[serial]
fn amm_swap_pays_the_constant_product_output() {
    let bed = amm_bed();

    // net_in = 1000 - 3; amount_out = 100_000 - K / (10_000 + 997).
    assert_eq!(
        token_balance(&bed.mam, &ADDR_B, bed.assets_id, &LAMA),
        U256::from(9_067u64)
    );
    assert_eq!(
        token_balance(&bed.mam, &ADDR_B, bed.assets_id, &FIAT),
        U256::from(4_000u64)
    );

    let pool = PoolState::decode(&bed.mam.read_app_storage(bed.amm_id)).expect("pool state");
    assert_eq!(pool.k, U256::from(1_000_000_000u64));
    assert_eq!(pool.reserve_a, U256::from(90_933u64));
    assert_eq!(pool.reserve_b, U256::from(10_997u64));

    // Solvency: the pool's balances back its reserves; the fee is the
    // excess on the input token.
    let pool_address = bed.mam.instance_address(bed.amm_id).expect("pool address");
    let pool_lama = token_balance(&bed.mam, &pool_address, bed.assets_id, &LAMA);
    let pool_fiat = token_balance(&bed.mam, &pool_address, bed.assets_id, &FIAT);
    assert!(pool_lama >= pool.reserve_a);
    assert!(pool_fiat >= pool.reserve_b);
    assert_eq!(pool_fiat - pool.reserve_b, U256::from(3u64));
}

#[test]
#[serial]
fn amm_swap_below_minimum_is_rejected() {
    let mut bed = amm_bed();
    let outcome = bed
        .mam
        .call(
            false,
            ADDR_B,
            Some(10_000),
            bed.amm_id,
            5,
            &payload_swap(false, 1_000, 1_000_000),
        )
        .expect("dispatch");
    assert!(matches!(
        outcome.error,
        Some(VmError::InsufficientOutput { .. })
    ));
}

#[test]
#[serial]
fn amm_liquidity_roundtrip() {
    let mut bed = amm_bed();
    bed.mam.advance_block();

    // B pours the swapped LAMA back in as liquidity.
    execute(
        &mut bed.mam,
        ADDR_B,
        bed.amm_id,
        3,
        &payload_add_liquidity(9_067, 2_000),
    );

    let pool = PoolState::decode(&bed.mam.read_app_storage(bed.amm_id)).expect("pool state");
    assert_eq!(pool.reserve_a, U256::from(100_000u64));
    assert_eq!(pool.reserve_b, U256::from(12_093u64));
    assert_eq!(pool.total_lp, U256::from(34_775u64));

    bed.mam.advance_block();
    bed.mam.advance_block();

    execute(&mut bed.mam, ADDR_B, bed.amm_id, 4, &[]);

    // Pro-rata principal back, position closed, pool stays solvent.
    assert_eq!(
        token_balance(&bed.mam, &ADDR_B, bed.assets_id, &LAMA),
        U256::from(9_066u64)
    );
    assert_eq!(
        token_balance(&bed.mam, &ADDR_B, bed.assets_id, &FIAT),
        U256::from(4_000u64)
    );

    let records = parse_array(&bed.mam.read_account_storage(&ADDR_B)).expect("account records");
    assert!(find_app_record(bed.amm_id, &records).is_none());

    let pool = PoolState::decode(&bed.mam.read_app_storage(bed.amm_id)).expect("pool state");
    assert_eq!(pool.total_lp, U256::from(31_622u64));
    let pool_address = bed.mam.instance_address(bed.amm_id).expect("pool address");
    assert!(token_balance(&bed.mam, &pool_address, bed.assets_id, &LAMA) >= pool.reserve_a);
    assert!(token_balance(&bed.mam, &pool_address, bed.assets_id, &FIAT) >= pool.reserve_b);
}

#[test]
#[serial]
fn marketplace_match_swaps_goods_for_price() {
    let mut bed = setup();
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 1, &payload_create_token(&LAMA, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 1, &payload_create_token(&FIAT, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&LAMA, 10, &ADDR_B));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&FIAT, 10, &ADDR_A));
    execute(
        &mut bed.mam,
        ADDR_A,
        bed.market_id,
        1,
        &payload_create_marketplace(bed.assets_id),
    );

    execute(
        &mut bed.mam,
        ADDR_B,
        bed.market_id,
        2,
        &payload_list(&[(&LAMA, 1)], &[(&FIAT, 1)], &Address::ZERO),
    );

    // The goods are escrowed at the marketplace's address.
    let market_address = bed.mam.instance_address(bed.market_id).expect("market address");
    assert_eq!(
        token_balance(&bed.mam, &market_address, bed.assets_id, &LAMA),
        U256::one()
    );

    execute(&mut bed.mam, ADDR_A, bed.market_id, 3, &payload_match(&ADDR_B, 0));

    assert_eq!(token_balance(&bed.mam, &ADDR_A, bed.assets_id, &LAMA), U256::one());
    assert_eq!(token_balance(&bed.mam, &ADDR_A, bed.assets_id, &FIAT), U256::from(9u64));
    assert_eq!(token_balance(&bed.mam, &ADDR_B, bed.assets_id, &LAMA), U256::from(9u64));
    assert_eq!(token_balance(&bed.mam, &ADDR_B, bed.assets_id, &FIAT), U256::one());
    assert_eq!(
        token_balance(&bed.mam, &market_address, bed.assets_id, &LAMA),
        U256::zero()
    );

    // The offer is gone and the counter advanced.
    let records = parse_array(&bed.mam.read_account_storage(&ADDR_B)).expect("account records");
    let (_, record) = find_app_record(bed.market_id, &records).expect("marketplace record");
    assert!(parse_array(&record[4..]).expect("offers").is_empty());
    let state = MarketState::decode(&bed.mam.read_app_storage(bed.market_id)).expect("state");
    assert_eq!(state.next_offer_id, U256::one());
}

#[test]
#[serial]
fn reserved_offer_rejects_other_matchers() {
    let mut bed = setup();
    let addr_c = Address([0x33; 12]);
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 1, &payload_create_token(&LAMA, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 1, &payload_create_token(&FIAT, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&LAMA, 10, &ADDR_B));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&FIAT, 10, &ADDR_A));
    execute(
        &mut bed.mam,
        ADDR_A,
        bed.market_id,
        1,
        &payload_create_marketplace(bed.assets_id),
    );
    execute(
        &mut bed.mam,
        ADDR_B,
        bed.market_id,
        2,
        &payload_list(&[(&LAMA, 1)], &[(&FIAT, 1)], &addr_c),
    );

    let outcome = bed
        .mam
        .call(false, ADDR_A, Some(10_000), bed.market_id, 3, &payload_match(&ADDR_B, 0))
        .expect("dispatch");
    assert!(matches!(outcome.error, Some(VmError::PrivateOffer)));
}

#[test]
#[serial]
fn chat_keeps_only_the_latest_message() {
    let mut bed = setup();
    execute(
        &mut bed.mam,
        ADDR_B,
        bed.chat_id,
        1,
        &payload_send_message(b"world", b"Hello !"),
    );
    execute(
        &mut bed.mam,
        ADDR_B,
        bed.chat_id,
        1,
        &payload_send_message(b"alice", b"Hi"),
    );

    let records = parse_array(&bed.mam.read_account_storage(&ADDR_B)).expect("account records");
    let (_, record) = find_app_record(bed.chat_id, &records).expect("chat record");
    let (recipient, message) = Chat::decode_entry(&record[4..]).expect("chat entry");
    assert_eq!(recipient, b"alice");
    assert_eq!(message, b"Hi");
}

#[test]
#[serial]
fn account_sub_records_stay_sorted_by_instance_id() {
    let mut bed = setup();
    // Touch B with apps out of id order: chat (4) before assets (1).
    execute(
        &mut bed.mam,
        ADDR_B,
        bed.chat_id,
        1,
        &payload_send_message(b"world", b"Hello !"),
    );
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 1, &payload_create_token(&LAMA, &ADDR_A));
    execute(&mut bed.mam, ADDR_A, bed.assets_id, 2, &payload_mint(&LAMA, 5, &ADDR_B));

    let records = parse_array(&bed.mam.read_account_storage(&ADDR_B)).expect("account records");
    let ids: Vec<u32> = records
        .iter()
        .map(|record| u32::from_be_bytes(record[..4].try_into().expect("record header")))
        .collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
#[serial]
fn out_of_gas_charges_the_full_budget() {
    let mut bed = setup();
    let balance_before = mcm_balance(&bed.mam, &ADDR_A);
    let max_gas = 5;
    let outcome = bed
        .mam
        .call(
            false,
            ADDR_A,
            Some(max_gas),
            MCM_APP_ID,
            1,
            &payload_create_tag(&Address([0x44; 12]), TAG_FUNDING),
        )
        .expect("dispatch");
    assert_eq!(outcome.error, Some(VmError::OutOfGas));
    assert_eq!(outcome.gas_used, max_gas);
    assert_eq!(
        mcm_balance(&bed.mam, &ADDR_A),
        balance_before - max_gas * GAS_PRICE
    );
}

#[test]
#[serial]
fn dry_run_failure_reports_real_gas_and_charges_nothing() {
    let mut bed = setup();
    let balance_before = mcm_balance(&bed.mam, &ADDR_A);
    let outcome = bed
        .mam
        .call(
            true,
            ADDR_A,
            None,
            MCM_APP_ID,
            1,
            &payload_create_tag(&ADDR_B, TAG_FUNDING),
        )
        .expect("dispatch");
    assert!(matches!(outcome.error, Some(VmError::AddressExists(_))));
    assert!(outcome.gas_used > 0);
    assert_eq!(mcm_balance(&bed.mam, &ADDR_A), balance_before);
}
