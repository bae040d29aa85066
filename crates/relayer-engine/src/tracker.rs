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

//! Confirmation tracking for outbound transactions.
//!
//! Periodically reconciles the tx-store with the chain: records whose nonce
//! is buried deeper than the confirmation depth are evicted, and the oldest
//! still-pending record is rebroadcast with bumped gas once it has sat in the
//! mempool for too long.

use ethers::providers::{JsonRpcClient, Middleware};
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Transaction, TransactionRequest, H256, U256, U64};
use ethers::utils::keccak256;

use metatx_relayer_store::{unix_time_secs, StoredTransaction, TxStore};
use metatx_relayer_utils::{probe, Error, Result};

use crate::RelayServer;

/// A nonce confirmed this many blocks below the head is treated as
/// irreversible. A design constant, not a policy knob.
const CONFIRMATIONS_NEEDED: u64 = 12;
/// How long a broadcast transaction may sit unmined before we consider it
/// stuck and rebroadcast it.
const PENDING_TX_TIMEOUT_SECS: u64 = 5 * 60;
/// Gas price bump applied on each rebroadcast, in percent.
const RETRY_GAS_PRICE_INCREASE_PERCENT: u64 = 20;
/// Hard ceiling on the rebroadcast gas price: 100 gwei. Keeps a long losing
/// streak from burning the whole balance on fees.
const MAX_GAS_PRICE_WEI: u64 = 100_000_000_000;

impl<P: JsonRpcClient, S: TxStore> RelayServer<P, S> {
    /// One reconciliation pass over the tx-store.
    ///
    /// Returns the rebroadcast transaction if this pass produced one. In dev
    /// mode this is a no-op: the allocator already trusts the chain's pending
    /// view unconditionally there.
    pub async fn update_unconfirmed_transactions(&self) -> Result<Option<StoredTransaction>> {
        if self.dev_mode {
            return Ok(None);
        }

        // Bail early while the store is empty, before touching the chain.
        if self.store.get_first()?.is_none() {
            return Ok(None);
        }

        let head = self.client.get_block_number().await?.as_u64();
        let confirmed_block = head.saturating_sub(CONFIRMATIONS_NEEDED);
        let confirmed_nonce = self
            .client
            .get_transaction_count(self.address, Some(confirmed_block.into()))
            .await?;

        // Evict everything below the deeply confirmed nonce. This is the only
        // path that prunes the store.
        self.store.remove_less_than(confirmed_nonce.as_u64())?;

        let Some(oldest) = self.store.get_first()? else {
            return Ok(None);
        };

        let latest_nonce = self
            .client
            .get_transaction_count(self.address, None)
            .await?;
        if U256::from(oldest.nonce()) < latest_nonce {
            // Mined, just not deeply enough yet.
            tracing::trace!(
                nonce = oldest.nonce(),
                tx_hash = %oldest.tx.hash,
                "awaiting confirmations for next mined transaction"
            );
            return Ok(None);
        }

        let age = unix_time_secs().saturating_sub(oldest.sent_at);
        if age < PENDING_TX_TIMEOUT_SECS {
            tracing::trace!(
                nonce = oldest.nonce(),
                tx_hash = %oldest.tx.hash,
                age,
                "awaiting transaction to be mined"
            );
            return Ok(None);
        }

        let resent = self.resend_transaction(&oldest).await?;
        self.store.update_by_nonce(&resent)?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Confirmations,
            rebroadcast = true,
            nonce = resent.nonce(),
            old_tx_hash = %oldest.tx.hash,
            new_tx_hash = %resent.tx.hash,
            gas_price = %resent.gas_price(),
        );
        Ok(Some(resent))
    }

    /// Rebroadcasts a stuck transaction: same nonce, recipient, value, gas
    /// limit and calldata, but with the gas price bumped.
    async fn resend_transaction(&self, stale: &StoredTransaction) -> Result<StoredTransaction> {
        let new_gas_price = bump_gas_price(stale.gas_price());
        let to = stale
            .tx
            .to
            .ok_or(Error::Generic("stored transaction has no recipient"))?;
        let chain_id = self.chain_id().await?;

        // Same critical section as fresh broadcasts, without allocating: the
        // nonce under rebroadcast is already ours.
        let _region = self.nonce.hold().await;
        let tx = TransactionRequest::new()
            .from(self.address)
            .to(to)
            .value(stale.tx.value)
            .gas(stale.tx.gas)
            .gas_price(new_gas_price)
            .data(stale.tx.input.clone())
            .nonce(stale.tx.nonce)
            .chain_id(chain_id.as_u64());
        let typed = TypedTransaction::Legacy(tx);
        let signature = self.wallet.sign_transaction(&typed).await?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        self.client.send_raw_transaction(raw.clone()).await?;
        tracing::info!(
            nonce = stale.nonce(),
            old_tx_hash = %stale.tx.hash,
            new_tx_hash = %hash,
            gas_price = %new_gas_price,
            "resent stuck transaction"
        );

        let signed = Transaction {
            hash,
            gas_price: Some(new_gas_price),
            v: U64::from(signature.v),
            r: signature.r,
            s: signature.s,
            ..stale.tx.clone()
        };
        Ok(StoredTransaction::new(signed, raw))
    }
}

/// `min(⌈old × 1.2⌉, 100 gwei)`.
fn bump_gas_price(old: U256) -> U256 {
    let bumped =
        (old * U256::from(100 + RETRY_GAS_PRICE_INCREASE_PERCENT) + U256::from(99)) / U256::from(100);
    let max = U256::from(MAX_GAS_PRICE_WEI);
    if bumped > max {
        tracing::info!(%max, "capping rebroadcast gas price to its ceiling");
        max
    } else {
        bumped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GWEI: u64 = 1_000_000_000;

    #[test]
    fn bumps_by_twenty_percent() {
        assert_eq!(
            bump_gas_price(U256::from(50 * GWEI)),
            U256::from(60 * GWEI)
        );
    }

    #[test]
    fn rounds_up_on_fractional_bumps() {
        assert_eq!(bump_gas_price(U256::from(1u64)), U256::from(2u64));
    }

    #[test]
    fn caps_at_one_hundred_gwei() {
        assert_eq!(
            bump_gas_price(U256::from(90 * GWEI)),
            U256::from(100 * GWEI)
        );
        assert_eq!(
            bump_gas_price(U256::from(200 * GWEI)),
            U256::from(100 * GWEI)
        );
    }
}
