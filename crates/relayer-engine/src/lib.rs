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

//! # Relay Engine Module 🕸️
//!
//! The engine behind a meta-transaction relay server.
//!
//! ## Overview
//!
//! The engine accepts signed-but-not-yet-broadcast user operations, validates
//! them against the on-chain hub and the sponsoring contract, wraps them into
//! chain-level transactions signed with the relay's own key, and keeps those
//! outbound transactions alive until they are buried deep enough in the
//! chain. Outbound nonces are issued in strict monotone order by a single
//! allocator; every broadcast, including rebroadcasts, goes through its
//! critical section.

use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Transaction, TransactionRequest, H256, U256, U64};
use ethers::utils::keccak256;
use parking_lot::RwLock;
use tokio::sync::OnceCell;

use metatx_relayer_store::{StoredTransaction, TxStore};
use metatx_relayer_utils::{Error, Result};

/// Bindings for the hub and sponsor contracts.
pub mod contracts;
mod gas_pricer;
mod lifecycle;
mod nonce;
mod relay;
/// Wire types of the operations surface.
pub mod request;
mod tracker;

pub use gas_pricer::GasPricer;
pub use nonce::{NonceAllocator, NonceLease};
pub use request::{RelayInfo, RelayTransactionRequest, RelayTransactionResponse};

#[cfg(test)]
mod tests;

use contracts::{RelayHub, RelaySponsor};

/// How long to wait for a receipt after broadcasting a transaction we care
/// about being mined.
const TX_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);
/// How often to poll for that receipt.
const TX_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Dev mode refuses chain ids below this, so a misconfigured relay cannot be
/// penalized on a real network.
const MIN_DEV_MODE_CHAIN_ID: u64 = 1000;

/// The static part of the relay's identity and policy, fixed at startup.
#[derive(Debug, Clone)]
pub struct RelayServerOpts {
    /// The address that funded our stake; the zero sentinel means "adopt the
    /// owner recorded on the hub once staked".
    pub owner_address: Address,
    /// Flat fee charged per relayed call.
    pub base_fee: U256,
    /// Percent markup charged on gas spent; also the admission floor.
    pub percent_fee: U256,
    /// The URL this relay advertises on the hub.
    pub url: String,
    /// The hub contract to serve.
    pub hub_address: Address,
    /// Linear markup over the node's gas price suggestion, in percent.
    pub gas_price_markup_percent: U256,
    /// How stale (in blocks) our last hub event may get before re-registering.
    pub registration_block_rate: u64,
    /// Trust the chain's pending nonce unconditionally and refuse well-known
    /// chain ids.
    pub dev_mode: bool,
}

/// RelayServer is the engine of the relay: admission control for incoming
/// relay requests, lifecycle management against the hub, and the outbound
/// transaction manager.
///
/// It exclusively owns the signing key, the outbound nonce counter, the gas
/// price cell and the tx-store handle; the chain client is a shared read-only
/// collaborator.
pub struct RelayServer<P: JsonRpcClient, S> {
    client: Arc<Provider<P>>,
    wallet: LocalWallet,
    address: Address,
    owner_address: RwLock<Address>,
    hub_address: RwLock<Address>,
    url: String,
    base_fee: U256,
    percent_fee: U256,
    registration_block_rate: u64,
    dev_mode: bool,
    gas_pricer: GasPricer<P>,
    nonce: NonceAllocator,
    chain_id: OnceCell<U256>,
    store: S,
}

impl<P: JsonRpcClient, S: TxStore> RelayServer<P, S> {
    /// Creates a new engine. No chain traffic happens here; the chain id is
    /// queried (and the dev mode guard enforced) on first use.
    pub fn new(
        opts: RelayServerOpts,
        client: Arc<Provider<P>>,
        wallet: LocalWallet,
        store: S,
    ) -> Self {
        let address = wallet.address();
        let gas_pricer = GasPricer::new(client.clone(), opts.gas_price_markup_percent);
        Self {
            client,
            wallet,
            address,
            owner_address: RwLock::new(opts.owner_address),
            hub_address: RwLock::new(opts.hub_address),
            url: opts.url,
            base_fee: opts.base_fee,
            percent_fee: opts.percent_fee,
            registration_block_rate: opts.registration_block_rate,
            dev_mode: opts.dev_mode,
            gas_pricer,
            nonce: NonceAllocator::new(),
            chain_id: OnceCell::new(),
            store,
        }
    }

    /// The relay's own address, derived from its signing key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The owner address, possibly adopted from the hub's stake entry.
    pub fn owner_address(&self) -> Address {
        *self.owner_address.read()
    }

    /// The hub this relay currently serves.
    pub fn hub_address(&self) -> Address {
        *self.hub_address.read()
    }

    /// Points the relay at a different hub. Operator-only.
    pub fn set_hub_address(&self, hub_address: Address) {
        tracing::info!(?hub_address, "switching relay hub");
        *self.hub_address.write() = hub_address;
    }

    /// The URL this relay advertises on the hub.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// How stale (in blocks) our last hub event may get before re-registering.
    pub fn registration_block_rate(&self) -> u64 {
        self.registration_block_rate
    }

    /// The next outbound nonce as far as this process knows.
    pub fn last_nonce(&self) -> u64 {
        self.nonce.last_nonce()
    }

    /// The current effective gas price; zero until the first refresh.
    pub fn gas_price(&self) -> U256 {
        self.gas_pricer.current_or_zero()
    }

    /// Recomputes the effective gas price from the node's suggestion.
    pub async fn refresh_gas_price(&self) -> Result<U256> {
        self.gas_pricer.refresh().await
    }

    /// The chain id, cached on first use.
    ///
    /// In dev mode, refuses chain ids below 1000: a relay accidentally
    /// pointed at a real network while trusting the pending nonce
    /// unconditionally is asking to be penalized.
    pub async fn chain_id(&self) -> Result<U256> {
        let chain_id = self
            .chain_id
            .get_or_try_init(|| async {
                let chain_id = self.client.get_chainid().await?;
                if self.dev_mode && chain_id < U256::from(MIN_DEV_MODE_CHAIN_ID) {
                    return Err(Error::UnsafeChainId { chain_id });
                }
                Ok(chain_id)
            })
            .await?;
        Ok(*chain_id)
    }

    /// The relay address's balance in the chain's native unit.
    pub async fn balance(&self) -> Result<U256> {
        Ok(self.client.get_balance(self.address, None).await?)
    }

    /// A snapshot of the relay's identity and readiness, served to clients
    /// that want to pick a relay.
    pub async fn relay_info(&self) -> RelayInfo {
        let priced = self.gas_pricer.current().is_some();
        let staked = self.is_staked().await.unwrap_or(false);
        let registered = matches!(
            self.block_count_since_last_event().await,
            Ok(count) if count <= self.registration_block_rate
        );
        RelayInfo {
            relay_server_address: self.address,
            min_gas_price: self.gas_pricer.current_or_zero(),
            ready: staked && registered && priced,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Flushes and releases the tx-store.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    fn hub(&self) -> RelayHub<Provider<P>> {
        RelayHub::new(self.hub_address(), self.client.clone())
    }

    fn sponsor(&self, paymaster: Address) -> RelaySponsor<Provider<P>> {
        RelaySponsor::new(paymaster, self.client.clone())
    }

    /// Builds, signs, broadcasts and persists an outbound transaction under
    /// the nonce allocator discipline. Every outbound path goes through here:
    /// registrations, relayed calls and balance drains.
    pub(crate) async fn send_outbound(
        &self,
        desc: &str,
        to: Address,
        value: U256,
        gas: U256,
        gas_price: U256,
        data: Bytes,
    ) -> Result<StoredTransaction> {
        tracing::debug!(desc, "tx sending");
        let chain_id = self.chain_id().await?;
        let lease = self
            .nonce
            .allocate(&self.client, self.address, self.dev_mode)
            .await?;
        let nonce = lease.nonce();
        let tx = TransactionRequest::new()
            .from(self.address)
            .to(to)
            .value(value)
            .gas(gas)
            .gas_price(gas_price)
            .data(data.clone())
            .nonce(nonce)
            .chain_id(chain_id.as_u64());
        let typed = TypedTransaction::Legacy(tx);
        let signature = self.wallet.sign_transaction(&typed).await?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        self.client.send_raw_transaction(raw.clone()).await?;
        lease.commit();
        tracing::info!(desc, nonce, tx_hash = %hash, "tx sent");

        let signed = Transaction {
            hash,
            nonce: U256::from(nonce),
            from: self.address,
            to: Some(to),
            value,
            gas_price: Some(gas_price),
            gas,
            input: data,
            v: U64::from(signature.v),
            r: signature.r,
            s: signature.s,
            chain_id: Some(chain_id),
            ..Default::default()
        };
        let record = StoredTransaction::new(signed, raw);
        // The transaction is already on the wire at this point; a persistence
        // failure surfaces to the caller but cannot recall the broadcast.
        self.store.save(&record)?;
        Ok(record)
    }

    /// Polls for the receipt of `tx_hash` every 500 ms for up to 60 s.
    ///
    /// A receipt with status ≠ 1 reports as [`Error::TransactionFailed`];
    /// running out the clock reports as [`Error::TransactionTimeout`], never
    /// as silent success.
    pub async fn await_transaction_mined(&self, tx_hash: H256) -> Result<()> {
        let deadline = tokio::time::Instant::now() + TX_RECEIPT_TIMEOUT;
        loop {
            if let Some(receipt) = self.client.get_transaction_receipt(tx_hash).await? {
                if receipt.status == Some(U64::one()) {
                    return Ok(());
                }
                tracing::warn!(%tx_hash, status = ?receipt.status, "tx mined but failed");
                return Err(Error::TransactionFailed { tx_hash });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::TransactionTimeout { tx_hash });
            }
            tokio::time::sleep(TX_RECEIPT_POLL_INTERVAL).await;
        }
    }
}
