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

//! Wire types of the relay's operations surface. An HTTP layer is expected to
//! demarshal into these; the engine itself never parses JSON.

use ethers::types::{Address, Bytes, Transaction, U256};
use serde::{Deserialize, Serialize};

use metatx_relayer_store::StoredTransaction;

/// A user's request to relay a sponsored call. Transient; only the outbound
/// transaction built from it is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransactionRequest {
    /// The target function call, ABI encoded, as a `0x`-prefixed hex string.
    pub encoded_function: String,
    /// Opaque approval blob, forwarded to the hub as-is.
    pub approval_data: Bytes,
    /// The user's signature over the relay request.
    ///
    /// Not length-checked here: the hub rejects anything that is not 65 bytes
    /// with a dedicated code during `canRelay`.
    pub signature: Bytes,
    /// The user (sender) address.
    pub from: Address,
    /// The target contract.
    pub to: Address,
    /// The sponsor contract paying for the call.
    pub paymaster: Address,
    /// The gas price the user is bidding.
    pub gas_price: U256,
    /// The gas limit of the relayed function call itself.
    pub gas_limit: U256,
    /// The user's nonce on the hub.
    pub sender_nonce: U256,
    /// The highest outbound relay nonce the user will accept; guards against
    /// griefing via delayed broadcast.
    pub relay_max_nonce: U256,
    /// The percent fee the user is offering.
    pub percent_relay_fee: U256,
    /// The flat fee the user is offering.
    pub base_relay_fee: U256,
    /// The hub the user expects this relay to serve.
    pub relay_hub_address: Address,
}

/// The relay's answer to an admitted [`RelayTransactionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransactionResponse {
    /// The signed `relayCall` transaction.
    pub signed_tx: Transaction,
    /// Canonical network-encoded bytes of `signed_tx`, byte-identical to what
    /// the relay broadcast, suitable for independent rebroadcast.
    pub raw_tx_bytes: Bytes,
}

impl From<StoredTransaction> for RelayTransactionResponse {
    fn from(record: StoredTransaction) -> Self {
        Self {
            signed_tx: record.tx,
            raw_tx_bytes: record.raw,
        }
    }
}

/// A snapshot of the relay's identity and readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInfo {
    /// The relay's own address.
    pub relay_server_address: Address,
    /// The lowest gas price the relay currently accepts; zero until the
    /// first gas price refresh.
    pub min_gas_price: U256,
    /// Whether the relay is staked, registered and priced, i.e. serving.
    pub ready: bool,
    /// The engine version.
    pub version: String,
}
