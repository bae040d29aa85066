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

//! Admission control and broadcast for incoming relay requests.
//!
//! The pipeline fails fast: the first violated check terminates the request
//! with its dedicated error, and nothing is persisted before a successful
//! broadcast.

use ethers::providers::JsonRpcClient;
use ethers::types::{Bytes, U256};

use metatx_relayer_store::TxStore;
use metatx_relayer_utils::{probe, Error, Result};

use crate::contracts::{GasData, GasLimits, RelayData, RelayRequest};
use crate::request::{RelayTransactionRequest, RelayTransactionResponse};
use crate::RelayServer;

/// Flat pad on top of the per-parameter estimates. Exact calldata accounting
/// (4 gas per zero byte, 68 otherwise) is deferred; this absorbs the
/// difference.
const RELAY_CALL_GAS_SLACK: u64 = 400_000;
/// Worst-case calldata gas charged per hex character of a dynamic parameter.
const CALLDATA_GAS_PER_CHAR: u64 = 68;

impl<P: JsonRpcClient, S: TxStore> RelayServer<P, S> {
    /// Validates an incoming relay request against our policy, the sponsor
    /// and the hub, then signs and broadcasts the wrapping `relayCall`
    /// transaction.
    ///
    /// Returns the signed transaction and its canonical network encoding.
    pub async fn create_relay_transaction(
        &self,
        request: RelayTransactionRequest,
    ) -> Result<RelayTransactionResponse> {
        // We only relay through the hub we are registered on.
        if request.relay_hub_address != self.hub_address() {
            return Err(Error::WrongHub {
                ours: self.hub_address(),
                theirs: request.relay_hub_address,
            });
        }

        // The advertised fee must clear our floor.
        if request.percent_relay_fee < self.percent_fee {
            return Err(Error::UnacceptableFee {
                offered: request.percent_relay_fee,
                floor: self.percent_fee,
            });
        }

        // The user must bid at least what we are currently willing to pay.
        // Fails closed until the first gas price refresh.
        let floor = self.gas_pricer.current();
        if floor.map_or(true, |floor| request.gas_price < floor) {
            return Err(Error::UnacceptableGasPrice {
                offered: request.gas_price,
                floor: floor.unwrap_or_default(),
            });
        }

        // The user caps how far ahead our nonce may run before their
        // operation goes stale.
        let last_nonce = self.last_nonce();
        if request.relay_max_nonce < U256::from(last_nonce) {
            return Err(Error::UnacceptableRelayMaxNonce {
                relay_max_nonce: request.relay_max_nonce,
                last_nonce,
            });
        }

        let (accept_relayed_call_gas_limit, pre_relayed_call_gas_limit, post_relayed_call_gas_limit) =
            self.sponsor(request.paymaster)
                .get_gas_limits()
                .call()
                .await?;
        let gas_limits = GasLimits {
            accept_relayed_call_gas_limit,
            pre_relayed_call_gas_limit,
            post_relayed_call_gas_limit,
        };
        let hub_overhead = self.hub().get_hub_overhead().call().await?;
        let max_possible_gas = max_possible_gas(&request, hub_overhead, &gas_limits);

        let gas_data = GasData {
            gas_limit: request.gas_limit,
            gas_price: request.gas_price,
            pct_relay_fee: request.percent_relay_fee,
            base_relay_fee: request.base_relay_fee,
        };
        let max_charge = self
            .hub()
            .calculate_charge(max_possible_gas, gas_data.clone())
            .call()
            .await?;

        // The sponsor must be able to pay us the worst case charge.
        let sponsor_balance = self.hub().balance_of(request.paymaster).call().await?;
        if sponsor_balance < max_charge {
            return Err(Error::SponsorBalanceTooLow {
                balance: sponsor_balance,
                max_charge,
            });
        }

        // Ask the hub whether we would get paid for relaying this.
        let relay_request = RelayRequest {
            target: request.to,
            encoded_function: decode_encoded_function(&request.encoded_function)?,
            gas_data,
            relay_data: RelayData {
                sender_address: request.from,
                sender_nonce: request.sender_nonce,
                relay_address: self.address,
                paymaster: request.paymaster,
            },
        };
        let (status, _recipient_context) = self
            .hub()
            .can_relay(
                relay_request.clone(),
                max_charge,
                gas_limits.accept_relayed_call_gas_limit,
                request.signature.clone(),
                request.approval_data.clone(),
            )
            .call()
            .await?;
        if !status.is_zero() {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::WARN,
                kind = %probe::Kind::RelayRequest,
                code = %status,
                encoded_function = %request.encoded_function,
                from = ?request.from,
                to = ?request.to,
                gas_price = %request.gas_price,
                gas_limit = %request.gas_limit,
                sender_nonce = %request.sender_nonce,
                base_relay_fee = %request.base_relay_fee,
                percent_relay_fee = %request.percent_relay_fee,
                approval_data = %hex::encode(&request.approval_data),
                signature = %hex::encode(&request.signature),
                "canRelay refused the request",
            );
            return Err(Error::CanRelayRefused { code: status });
        }

        tracing::debug!(%max_charge, %max_possible_gas, "estimated max charge of relayed tx");

        let call = self.hub().relay_call(
            relay_request,
            request.signature.clone(),
            request.approval_data.clone(),
        );
        let data = call
            .calldata()
            .ok_or(Error::Generic("relayCall produced no calldata"))?;
        let desc = format!("Relay(from={:?}, to={:?})", request.from, request.to);
        let record = self
            .send_outbound(
                &desc,
                self.hub_address(),
                U256::zero(),
                max_possible_gas,
                request.gas_price,
                data,
            )
            .await?;
        Ok(record.into())
    }
}

/// The upper bound on gas the wrapping `relayCall` transaction may consume,
/// which also becomes its gas limit.
fn max_possible_gas(
    request: &RelayTransactionRequest,
    hub_overhead: U256,
    limits: &GasLimits,
) -> U256 {
    hub_overhead
        + limits.accept_relayed_call_gas_limit
        + limits.pre_relayed_call_gas_limit
        + request.gas_limit
        + limits.post_relayed_call_gas_limit
        + U256::from(RELAY_CALL_GAS_SLACK)
        + encoded_param_max_gas(request.encoded_function.len())
        + encoded_param_max_gas(request.approval_data.len() * 2)
}

/// Coarse upper bound on the calldata cost of one dynamic bytes parameter,
/// charging every hex character of it at the non-zero byte rate.
fn encoded_param_max_gas(hex_len: usize) -> U256 {
    U256::from(hex_len as u64 * CALLDATA_GAS_PER_CHAR)
}

/// The encoded function arrives as a hex string with a leading `0x` marker;
/// strip it and decode.
fn decode_encoded_function(encoded_function: &str) -> Result<Bytes> {
    let stripped = encoded_function
        .strip_prefix("0x")
        .unwrap_or(encoded_function);
    Ok(hex::decode(stripped)?.into())
}
