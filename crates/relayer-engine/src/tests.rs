// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Engine scenario tests over a mocked chain client.
//!
//! The mocked provider serves responses as a stack, so every test pushes its
//! canned responses in *reverse* call order.

use std::sync::Arc;

use ethers::abi::AbiEncode;
use ethers::contract::EthEvent;
use ethers::providers::{MockProvider, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, Log, Transaction, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;

use metatx_relayer_store::{unix_time_secs, InMemoryTxStore, StoredTransaction, TxStore};
use metatx_relayer_utils::Error;

use crate::contracts::{GasLimits, RelayAddedFilter};
use crate::request::RelayTransactionRequest;
use crate::{RelayServer, RelayServerOpts};

const TEST_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
const GWEI: u64 = 1_000_000_000;

fn hub_address() -> Address {
    Address::repeat_byte(0x42)
}

fn test_relay(
    dev_mode: bool,
) -> (
    RelayServer<MockProvider, InMemoryTxStore>,
    MockProvider,
    InMemoryTxStore,
) {
    let (provider, mock) = Provider::mocked();
    let wallet: LocalWallet = TEST_KEY.parse().unwrap();
    let store = InMemoryTxStore::default();
    let opts = RelayServerOpts {
        owner_address: Address::zero(),
        base_fee: U256::zero(),
        percent_fee: U256::from(5),
        url: String::from("http://localhost:8090"),
        hub_address: hub_address(),
        gas_price_markup_percent: U256::zero(),
        registration_block_rate: 5800,
        dev_mode,
    };
    let relay = RelayServer::new(opts, Arc::new(provider), wallet, store.clone());
    (relay, mock, store)
}

fn relay_request() -> RelayTransactionRequest {
    RelayTransactionRequest {
        encoded_function: String::from("0xdeadbeef"),
        approval_data: Bytes::new(),
        signature: Bytes::from(vec![1u8; 65]),
        from: Address::repeat_byte(0x11),
        to: Address::repeat_byte(0x22),
        paymaster: Address::repeat_byte(0x33),
        gas_price: U256::from(12),
        gas_limit: U256::from(1_000_000),
        sender_nonce: U256::zero(),
        relay_max_nonce: U256::from(100),
        percent_relay_fee: U256::from(10),
        base_relay_fee: U256::zero(),
        relay_hub_address: hub_address(),
    }
}

fn gas_limits() -> GasLimits {
    GasLimits {
        accept_relayed_call_gas_limit: U256::from(50_000),
        pre_relayed_call_gas_limit: U256::from(50_000),
        post_relayed_call_gas_limit: U256::from(110_000),
    }
}

fn stored_tx(nonce: u64, gas_price: u64, sent_at: u64) -> StoredTransaction {
    let tx = Transaction {
        hash: H256::random(),
        nonce: U256::from(nonce),
        from: Address::repeat_byte(0x99),
        to: Some(hub_address()),
        value: U256::zero(),
        gas: U256::from(1_000_000),
        gas_price: Some(U256::from(gas_price)),
        input: Bytes::from(vec![0xde, 0xad]),
        ..Default::default()
    };
    let mut record = StoredTransaction::new(tx, Bytes::from(vec![1]));
    record.sent_at = sent_at;
    record
}

async fn seed_gas_price(
    relay: &RelayServer<MockProvider, InMemoryTxStore>,
    mock: &MockProvider,
    suggestion: u64,
) {
    mock.push(U256::from(suggestion)).unwrap();
    relay.refresh_gas_price().await.unwrap();
}

#[tokio::test]
async fn rejects_requests_for_a_foreign_hub() {
    let (relay, _mock, _store) = test_relay(false);
    let mut request = relay_request();
    request.relay_hub_address = Address::repeat_byte(0x43);
    let err = relay.create_relay_transaction(request).await.unwrap_err();
    assert!(matches!(err, Error::WrongHub { .. }));
}

#[tokio::test]
async fn rejects_fees_below_the_floor() {
    let (relay, mock, store) = test_relay(false);
    seed_gas_price(&relay, &mock, 10).await;
    let mut request = relay_request();
    request.percent_relay_fee = U256::from(4);
    let err = relay.create_relay_transaction(request).await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnacceptableFee { offered, floor }
            if offered == U256::from(4) && floor == U256::from(5)
    ));
    // no store mutation and no nonce movement on rejection.
    assert!(store.get_first().unwrap().is_none());
    assert_eq!(relay.last_nonce(), 0);
}

#[tokio::test]
async fn fails_closed_while_the_gas_price_is_uninitialized() {
    let (relay, _mock, _store) = test_relay(false);
    let err = relay
        .create_relay_transaction(relay_request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnacceptableGasPrice { floor, .. } if floor.is_zero()
    ));
}

#[tokio::test]
async fn rejects_gas_prices_below_the_floor() {
    let (relay, mock, _store) = test_relay(false);
    seed_gas_price(&relay, &mock, 10).await;
    let mut request = relay_request();
    request.gas_price = U256::from(9);
    let err = relay.create_relay_transaction(request).await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnacceptableGasPrice { offered, floor }
            if offered == U256::from(9) && floor == U256::from(10)
    ));
}

#[tokio::test]
async fn rejects_nonce_ceilings_below_our_counter() {
    let (relay, mock, _store) = test_relay(false);
    seed_gas_price(&relay, &mock, 10).await;
    relay.nonce.seed(7);
    let mut request = relay_request();
    request.relay_max_nonce = U256::from(6);
    let err = relay.create_relay_transaction(request).await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnacceptableRelayMaxNonce {
            relay_max_nonce,
            last_nonce: 7,
        } if relay_max_nonce == U256::from(6)
    ));

    // a ceiling equal to the counter is acceptable: the request proceeds to
    // the sponsor checks (and dies there on the mocked chain).
    let mut request = relay_request();
    request.relay_max_nonce = U256::from(7);
    let err = relay.create_relay_transaction(request).await.unwrap_err();
    assert!(matches!(err, Error::EthersContractCall(_)));
}

#[tokio::test]
async fn rejects_requests_the_sponsor_cannot_pay_for() {
    let (relay, mock, _store) = test_relay(false);
    seed_gas_price(&relay, &mock, 10).await;
    let max_charge = U256::from(1_000_000_000u64);

    // reverse call order: getGasLimits, getHubOverhead, calculateCharge,
    // balanceOf.
    mock.push::<Bytes, _>(Bytes::from((max_charge - 1).encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(max_charge.encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(U256::from(30_000).encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(gas_limits().encode())).unwrap();

    let err = relay
        .create_relay_transaction(relay_request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::SponsorBalanceTooLow { balance, max_charge: charge }
            if balance == max_charge - 1 && charge == max_charge
    ));
}

#[tokio::test]
async fn propagates_the_hubs_refusal_code() {
    let (relay, mock, store) = test_relay(false);
    seed_gas_price(&relay, &mock, 10).await;
    let max_charge = U256::from(1_000_000_000u64);

    // reverse call order: getGasLimits, getHubOverhead, calculateCharge,
    // balanceOf, canRelay.
    mock.push::<Bytes, _>(Bytes::from((U256::from(11), Bytes::new()).encode()))
        .unwrap();
    mock.push::<Bytes, _>(Bytes::from(max_charge.encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(max_charge.encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(U256::from(30_000).encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(gas_limits().encode())).unwrap();

    let err = relay
        .create_relay_transaction(relay_request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::CanRelayRefused { code } if code == U256::from(11)
    ));
    assert!(store.get_first().unwrap().is_none());
    assert_eq!(relay.last_nonce(), 0);
}

#[tokio::test]
async fn happy_relay_request_is_signed_stored_and_counted() {
    let (relay, mock, store) = test_relay(false);
    seed_gas_price(&relay, &mock, 10).await;
    let request = relay_request();
    let limits = gas_limits();
    let hub_overhead = U256::from(30_000);
    let max_charge = U256::from(1_000_000_000u64);

    // reverse call order: getGasLimits, getHubOverhead, calculateCharge,
    // balanceOf, canRelay, eth_chainId, pending nonce, sendRawTransaction.
    mock.push(H256::repeat_byte(0xaa)).unwrap();
    mock.push(U256::zero()).unwrap();
    mock.push(U256::from(1337)).unwrap();
    mock.push::<Bytes, _>(Bytes::from((U256::zero(), Bytes::new()).encode()))
        .unwrap();
    mock.push::<Bytes, _>(Bytes::from(max_charge.encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(max_charge.encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(hub_overhead.encode())).unwrap();
    mock.push::<Bytes, _>(Bytes::from(limits.clone().encode())).unwrap();

    let response = relay
        .create_relay_transaction(request.clone())
        .await
        .unwrap();

    // nonce accounting: the signed tx carries the pre-call counter, and the
    // counter advanced by exactly one.
    assert_eq!(response.signed_tx.nonce, U256::zero());
    assert_eq!(relay.last_nonce(), 1);

    // the wrapping transaction pays with the user's bid and budgets the worst
    // case gas.
    let expected_gas = hub_overhead
        + limits.accept_relayed_call_gas_limit
        + limits.pre_relayed_call_gas_limit
        + request.gas_limit
        + limits.post_relayed_call_gas_limit
        + U256::from(400_000)
        + U256::from(68 * request.encoded_function.len());
    assert_eq!(response.signed_tx.gas, expected_gas);
    assert_eq!(response.signed_tx.gas_price, Some(request.gas_price));
    assert_eq!(response.signed_tx.to, Some(hub_address()));
    assert_eq!(response.signed_tx.from, relay.address());

    // the record in the store is the transaction we answered with, and the
    // raw bytes are its canonical encoding.
    let stored = store.get_first().unwrap().unwrap();
    assert_eq!(stored.tx.hash, response.signed_tx.hash);
    assert_eq!(stored.raw, response.raw_tx_bytes);
    assert_eq!(stored.nonce(), 0);
    assert_eq!(H256::from(keccak256(&stored.raw)), stored.tx.hash);
}

#[tokio::test]
async fn adopts_the_owner_from_the_stake_entry_when_unset() {
    let (relay, mock, _store) = test_relay(false);
    let owner = Address::repeat_byte(0x77);
    mock.push::<Bytes, _>(Bytes::from(
        (U256::from(1_000), U256::zero(), U256::zero(), owner, 0u8).encode(),
    ))
    .unwrap();
    assert!(relay.is_staked().await.unwrap());
    assert_eq!(relay.owner_address(), owner);
}

#[tokio::test]
async fn zero_stake_means_not_staked() {
    let (relay, mock, _store) = test_relay(false);
    mock.push::<Bytes, _>(Bytes::from(
        (
            U256::zero(),
            U256::zero(),
            U256::zero(),
            Address::repeat_byte(0x77),
            0u8,
        )
            .encode(),
    ))
    .unwrap();
    assert!(!relay.is_staked().await.unwrap());
    assert!(relay.owner_address().is_zero());
}

#[tokio::test]
async fn confirmation_tracker_prunes_deeply_confirmed_records() {
    let (relay, mock, store) = test_relay(false);
    for nonce in 4u64..=7 {
        store
            .save(&stored_tx(nonce, 10 * GWEI, unix_time_secs()))
            .unwrap();
    }
    // reverse call order: head, nonce at head-12, latest nonce.
    mock.push(U256::from(6)).unwrap();
    mock.push(U256::from(6)).unwrap();
    mock.push(U64::from(100)).unwrap();

    let resent = relay.update_unconfirmed_transactions().await.unwrap();
    assert!(resent.is_none());

    // records 4 and 5 are gone; 6 is the first unconfirmed.
    assert_eq!(store.get_first().unwrap().unwrap().nonce(), 6);
    store.remove_less_than(7).unwrap();
    assert_eq!(store.get_first().unwrap().unwrap().nonce(), 7);
}

#[tokio::test]
async fn stuck_transaction_is_rebroadcast_with_bumped_gas_price() {
    let (relay, mock, store) = test_relay(false);
    let stale = stored_tx(3, 50 * GWEI, unix_time_secs() - 6 * 60);
    store.save(&stale).unwrap();

    // reverse call order: head, nonce at head-12, latest nonce, eth_chainId,
    // sendRawTransaction.
    mock.push(H256::repeat_byte(0xbb)).unwrap();
    mock.push(U256::from(1337)).unwrap();
    mock.push(U256::from(3)).unwrap();
    mock.push(U256::from(3)).unwrap();
    mock.push(U64::from(100)).unwrap();

    let resent = relay
        .update_unconfirmed_transactions()
        .await
        .unwrap()
        .expect("a rebroadcast");
    assert_eq!(resent.nonce(), 3);
    assert_eq!(resent.gas_price(), U256::from(60 * GWEI));
    assert_ne!(resent.tx.hash, stale.tx.hash);

    // the store now holds the replacement under the same nonce.
    let current = store.get_first().unwrap().unwrap();
    assert_eq!(current.nonce(), 3);
    assert_eq!(current.tx.hash, resent.tx.hash);
    assert_eq!(current.gas_price(), U256::from(60 * GWEI));
}

#[tokio::test]
async fn rebroadcast_gas_price_caps_at_one_hundred_gwei() {
    let (relay, mock, store) = test_relay(false);
    let stale = stored_tx(3, 90 * GWEI, unix_time_secs() - 6 * 60);
    store.save(&stale).unwrap();

    mock.push(H256::repeat_byte(0xbb)).unwrap();
    mock.push(U256::from(1337)).unwrap();
    mock.push(U256::from(3)).unwrap();
    mock.push(U256::from(3)).unwrap();
    mock.push(U64::from(100)).unwrap();

    let resent = relay
        .update_unconfirmed_transactions()
        .await
        .unwrap()
        .expect("a rebroadcast");
    assert_eq!(resent.gas_price(), U256::from(100 * GWEI));
}

#[tokio::test]
async fn young_pending_transactions_are_left_alone() {
    let (relay, mock, store) = test_relay(false);
    let fresh = stored_tx(3, 50 * GWEI, unix_time_secs());
    store.save(&fresh).unwrap();

    mock.push(U256::from(3)).unwrap();
    mock.push(U256::from(3)).unwrap();
    mock.push(U64::from(100)).unwrap();

    let resent = relay.update_unconfirmed_transactions().await.unwrap();
    assert!(resent.is_none());
    assert_eq!(store.get_first().unwrap().unwrap().tx.hash, fresh.tx.hash);
}

#[tokio::test]
async fn dev_mode_disables_the_confirmation_tracker() {
    let (relay, _mock, store) = test_relay(true);
    store
        .save(&stored_tx(3, 50 * GWEI, unix_time_secs() - 6 * 60))
        .unwrap();
    // no mocked responses: the pass must not touch the chain at all.
    let resent = relay.update_unconfirmed_transactions().await.unwrap();
    assert!(resent.is_none());
    assert_eq!(store.get_first().unwrap().unwrap().nonce(), 3);
}

#[tokio::test]
async fn dev_mode_refuses_well_known_chain_ids() {
    let (relay, mock, _store) = test_relay(true);
    mock.push(U256::one()).unwrap();
    let err = relay.chain_id().await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnsafeChainId { chain_id } if chain_id == U256::one()
    ));
}

#[tokio::test]
async fn dev_mode_accepts_dev_chain_ids() {
    let (relay, mock, _store) = test_relay(true);
    mock.push(U256::from(1337)).unwrap();
    assert_eq!(relay.chain_id().await.unwrap(), U256::from(1337));
}

#[tokio::test]
async fn chain_id_is_cached_after_the_first_query() {
    let (relay, mock, _store) = test_relay(false);
    mock.push(U256::from(1337)).unwrap();
    assert_eq!(relay.chain_id().await.unwrap(), U256::from(1337));
    // no second response pushed: a second query would fail if it hit the
    // chain again.
    assert_eq!(relay.chain_id().await.unwrap(), U256::from(1337));
}

#[tokio::test]
async fn await_mined_accepts_a_successful_receipt() {
    let (relay, mock, _store) = test_relay(false);
    let tx_hash = H256::repeat_byte(0xcc);
    let receipt = TransactionReceipt {
        transaction_hash: tx_hash,
        status: Some(U64::one()),
        ..Default::default()
    };
    mock.push(receipt).unwrap();
    relay.await_transaction_mined(tx_hash).await.unwrap();
}

#[tokio::test]
async fn await_mined_reports_reverted_transactions() {
    let (relay, mock, _store) = test_relay(false);
    let tx_hash = H256::repeat_byte(0xcc);
    let receipt = TransactionReceipt {
        transaction_hash: tx_hash,
        status: Some(U64::zero()),
        ..Default::default()
    };
    mock.push(receipt).unwrap();
    let err = relay.await_transaction_mined(tx_hash).await.unwrap_err();
    assert!(matches!(err, Error::TransactionFailed { .. }));
}

fn address_topic(address: Address) -> H256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(address.as_bytes());
    H256::from(topic)
}

fn relay_added_log(relay: Address, pct_relay_fee: U256, url: &str, block: u64) -> Log {
    let data = (
        pct_relay_fee,
        U256::zero(),
        U256::from(1_000),
        U256::zero(),
        url.to_string(),
    )
        .encode();
    Log {
        address: hub_address(),
        topics: vec![
            RelayAddedFilter::signature(),
            address_topic(relay),
            address_topic(Address::repeat_byte(0x77)),
        ],
        data: data.into(),
        block_hash: Some(H256::repeat_byte(0x01)),
        block_number: Some(block.into()),
        transaction_hash: Some(H256::repeat_byte(0x02)),
        transaction_index: Some(0u64.into()),
        log_index: Some(U256::zero()),
        ..Default::default()
    }
}

#[tokio::test]
async fn counts_blocks_since_a_matching_registration() {
    let (relay, mock, _store) = test_relay(false);
    // reverse call order: head, RelayAdded logs, TransactionRelayed logs.
    mock.push::<Vec<Log>, _>(Vec::<Log>::new()).unwrap();
    mock.push::<Vec<Log>, _>(vec![relay_added_log(
        relay.address(),
        U256::from(5),
        relay.url(),
        95,
    )])
    .unwrap();
    mock.push(U64::from(100)).unwrap();

    let count = relay.block_count_since_last_event().await.unwrap();
    assert_eq!(count, 5);
}

#[tokio::test]
async fn stale_fee_in_the_latest_registration_means_not_registered() {
    let (relay, mock, _store) = test_relay(false);
    // latest registration carries a fee we no longer charge.
    mock.push::<Vec<Log>, _>(vec![relay_added_log(
        relay.address(),
        U256::from(7),
        relay.url(),
        95,
    )])
    .unwrap();
    mock.push(U64::from(100)).unwrap();

    assert!(relay.block_count_since_last_event().await.is_err());
}

#[tokio::test]
async fn no_registration_event_means_not_registered() {
    let (relay, mock, _store) = test_relay(false);
    mock.push::<Vec<Log>, _>(Vec::<Log>::new()).unwrap();
    mock.push(U64::from(100)).unwrap();

    assert!(relay.block_count_since_last_event().await.is_err());
}

#[tokio::test]
async fn register_relay_signs_broadcasts_and_awaits_mining() {
    let (relay, mock, store) = test_relay(false);
    seed_gas_price(&relay, &mock, 10).await;

    // reverse call order: eth_estimateGas, eth_chainId, pending nonce,
    // sendRawTransaction, then the receipt poll.
    let receipt = TransactionReceipt {
        status: Some(U64::one()),
        ..Default::default()
    };
    mock.push(receipt).unwrap();
    mock.push(H256::repeat_byte(0xdd)).unwrap();
    mock.push(U256::zero()).unwrap();
    mock.push(U256::from(1337)).unwrap();
    mock.push(U256::from(200_000)).unwrap();

    relay.register_relay().await.unwrap();

    let stored = store.get_first().unwrap().unwrap();
    assert_eq!(stored.nonce(), 0);
    assert_eq!(stored.tx.to, Some(hub_address()));
    assert_eq!(stored.gas_price(), U256::from(10));
    assert_eq!(relay.last_nonce(), 1);
}

#[tokio::test]
async fn remove_relay_spends_the_owners_nonce_not_ours() {
    let (relay, mock, store) = test_relay(false);
    let owner_key: LocalWallet =
        "8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f"
            .parse()
            .unwrap();

    // reverse call order: eth_chainId, owner pending nonce, eth_gasPrice,
    // eth_estimateGas, sendRawTransaction, receipt poll.
    let receipt = TransactionReceipt {
        status: Some(U64::one()),
        ..Default::default()
    };
    mock.push(receipt).unwrap();
    mock.push(H256::repeat_byte(0xee)).unwrap();
    mock.push(U256::from(60_000)).unwrap();
    mock.push(U256::from(10)).unwrap();
    mock.push(U256::from(4)).unwrap();
    mock.push(U256::from(1337)).unwrap();

    relay.remove_relay(&owner_key).await.unwrap();

    // the owner's transaction is neither stored nor counted against our
    // outbound nonce.
    assert!(store.get_first().unwrap().is_none());
    assert_eq!(relay.last_nonce(), 0);
}

#[tokio::test(start_paused = true)]
async fn await_mined_reports_timeouts_explicitly() {
    let (relay, mock, _store) = test_relay(false);
    let tx_hash = H256::repeat_byte(0xcc);
    // enough "no receipt yet" answers to outlast the 60s budget at a 500ms
    // polling interval.
    for _ in 0..130 {
        mock.push(serde_json::Value::Null).unwrap();
    }
    let err = relay.await_transaction_mined(tx_hash).await.unwrap_err();
    assert!(matches!(err, Error::TransactionTimeout { .. }));
}
