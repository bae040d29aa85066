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

//! Lifecycle primitives of the relay: stake and registration queries against
//! the hub, registration and removal transactions, and the balance drain.
//!
//! The relay moves through *unstaked → staked → registered → active →
//! removed*; these are query and action primitives that a periodic scheduler
//! invokes, not a state machine driving itself.

use ethers::providers::{JsonRpcClient, Middleware};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{BlockNumber, TransactionRequest, H256, U256};
use ethers::utils::keccak256;

use metatx_relayer_store::TxStore;
use metatx_relayer_utils::{probe, Error, Result};

use crate::RelayServer;

/// Gas needed by a plain value transfer.
const TRANSFER_GAS_LIMIT: u64 = 21_000;

impl<P: JsonRpcClient, S: TxStore> RelayServer<P, S> {
    /// Whether the hub records a non-zero stake for our address.
    ///
    /// The first time we observe ourselves staked while the configured owner
    /// is the zero sentinel, we adopt the owner recorded in the stake entry.
    pub async fn is_staked(&self) -> Result<bool> {
        let (total_stake, _, _, owner, _) = self.hub().get_relay(self.address).call().await?;
        let staked = !total_stake.is_zero();
        if staked && self.owner_address().is_zero() {
            tracing::info!(?owner, stake = %total_stake, "got staked for the first time, adopting owner");
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Lifecycle,
                staked = true,
                owner = ?owner,
            );
            *self.owner_address.write() = owner;
        }
        Ok(staked)
    }

    /// Whether the hub ever emitted an `Unstaked` event for our address.
    pub async fn is_unstaked(&self) -> Result<bool> {
        let events = self
            .hub()
            .unstaked_filter()
            .topic1(self.address)
            .from_block(0u64)
            .query()
            .await?;
        Ok(!events.is_empty())
    }

    /// Whether the hub ever emitted a `RelayRemoved` event for our address.
    pub async fn is_removed(&self) -> Result<bool> {
        let events = self
            .hub()
            .relay_removed_filter()
            .topic1(self.address)
            .from_block(0u64)
            .query()
            .await?;
        Ok(!events.is_empty())
    }

    /// How many blocks ago the hub last mentioned this relay, considering the
    /// latest matching `RelayAdded` and any later `TransactionRelayed`.
    ///
    /// A `RelayAdded` that does not match our current *(address, percent fee,
    /// url)* exactly does not count: a stale registration with an old fee or
    /// URL means we must re-register, which callers trigger off the error
    /// returned here.
    pub async fn block_count_since_last_event(&self) -> Result<u64> {
        let head = self.client.get_block_number().await?.as_u64();
        let start = head.saturating_sub(self.registration_block_rate);
        let added = self
            .hub()
            .relay_added_filter()
            .topic1(self.address)
            .from_block(start)
            .to_block(head)
            .query_with_meta()
            .await?;
        // Only the most recent registration counts, and it must match what we
        // would register today.
        let mut last_event_block = match added.last() {
            Some((event, meta))
                if event.relay == self.address
                    && event.pct_relay_fee == self.percent_fee
                    && event.url == self.url =>
            {
                meta.block_number.as_u64()
            }
            _ => {
                return Err(Error::Generic(
                    "could not find a matching RelayAdded event for our relay",
                ))
            }
        };

        // A relayed transaction proves liveness just as well; use the later
        // of the two.
        let relayed = self
            .hub()
            .transaction_relayed_filter()
            .topic1(self.address)
            .from_block(start)
            .to_block(head)
            .query_with_meta()
            .await?;
        if let Some((event, meta)) = relayed.last() {
            if event.relay == self.address && meta.block_number.as_u64() > last_event_block {
                last_event_block = meta.block_number.as_u64();
            }
        }

        Ok(head - last_event_block)
    }

    /// Registers (or re-registers) this relay on the hub and waits for the
    /// registration to be mined.
    pub async fn register_relay(&self) -> Result<()> {
        let record = self.send_register_transaction().await?;
        self.await_transaction_mined(record.tx.hash).await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Registration,
            registered = true,
            url = %self.url,
        );
        Ok(())
    }

    async fn send_register_transaction(&self) -> Result<metatx_relayer_store::StoredTransaction> {
        let desc = format!(
            "RegisterRelay(hub={:?}, url={})",
            self.hub_address(),
            self.url
        );
        let call = self
            .hub()
            .register_relay(self.base_fee, self.percent_fee, self.url.clone());
        let data = call
            .calldata()
            .ok_or(Error::Generic("registerRelay produced no calldata"))?;
        let gas_price = match self.gas_pricer.current() {
            Some(price) => price,
            None => self.client.get_gas_price().await?,
        };
        let estimate: TypedTransaction = TransactionRequest::new()
            .from(self.address)
            .to(self.hub_address())
            .data(data.clone())
            .into();
        let gas = self.client.estimate_gas(&estimate, None).await?;
        self.send_outbound(&desc, self.hub_address(), U256::zero(), gas, gas_price, data)
            .await
    }

    /// Removes this relay from the hub, signed by the owner's key, which is
    /// supplied per call and never stored.
    ///
    /// The owner spends its own nonce, so this bypasses the relay's nonce
    /// allocator and tx-store entirely.
    pub async fn remove_relay(&self, owner_key: &LocalWallet) -> Result<()> {
        let desc = format!("RemoveRelayByOwner(relay={:?})", self.address);
        tracing::debug!(desc = %desc, "tx sending");
        let call = self.hub().remove_relay_by_owner(self.address);
        let data = call
            .calldata()
            .ok_or(Error::Generic("removeRelayByOwner produced no calldata"))?;
        let chain_id = self.chain_id().await?;
        let owner = owner_key.address();
        let nonce = self
            .client
            .get_transaction_count(owner, Some(BlockNumber::Pending.into()))
            .await?;
        let gas_price = self.client.get_gas_price().await?;
        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(owner)
            .to(self.hub_address())
            .data(data)
            .nonce(nonce)
            .gas_price(gas_price)
            .chain_id(chain_id.as_u64())
            .into();
        let gas = self.client.estimate_gas(&tx, None).await?;
        tx.set_gas(gas);
        let signature = owner_key.sign_transaction(&tx).await?;
        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        self.client.send_raw_transaction(raw).await?;
        tracing::info!(desc = %desc, tx_hash = %hash, "tx sent");
        self.await_transaction_mined(hash).await
    }

    /// Drains the relay's balance to the owner, leaving just enough to pay
    /// for the transfer itself. A zero balance is a no-op, not an error.
    ///
    /// The transfer cost uses the bare suggestion without our markup; the
    /// drain is not time-critical, so a briefly underpriced transfer is
    /// acceptable.
    pub async fn send_balance_to_owner(&self) -> Result<()> {
        let balance = self.balance().await?;
        if balance.is_zero() {
            tracing::info!("SendBalanceToOwner: balance is 0");
            return Ok(());
        }
        let owner = self.owner_address();
        let gas_limit = U256::from(TRANSFER_GAS_LIMIT);
        let gas_price = self.client.get_gas_price().await?;
        let cost = gas_price * gas_limit;
        let Some(value) = balance.checked_sub(cost) else {
            tracing::warn!(%balance, %cost, "balance does not cover the transfer cost, not draining");
            return Ok(());
        };
        tracing::info!(%value, to = ?owner, "sending balance to owner");
        let desc = format!("SendBalanceToOwner(to={owner:?})");
        let record = self
            .send_outbound(
                &desc,
                owner,
                value,
                gas_limit,
                gas_price,
                Default::default(),
            )
            .await?;
        self.await_transaction_mined(record.tx.hash).await
    }
}
