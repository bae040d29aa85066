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

//! Bindings for the on-chain contracts the engine consumes: the hub
//! (registry + accounting) and the per-application sponsor.
//!
//! The bindings get only a chain-client handle, never the engine itself.

use ethers::prelude::abigen;

abigen!(
    RelayHub,
    r#"[
        struct GasData { uint256 gasLimit; uint256 gasPrice; uint256 pctRelayFee; uint256 baseRelayFee; }
        struct RelayData { address senderAddress; uint256 senderNonce; address relayAddress; address paymaster; }
        struct RelayRequest { address target; bytes encodedFunction; GasData gasData; RelayData relayData; }
        function registerRelay(uint256 baseRelayFee, uint256 pctRelayFee, string url)
        function removeRelayByOwner(address relay)
        function getRelay(address relay) external view returns (uint256 totalStake, uint256 unstakeDelay, uint256 unstakeTime, address owner, uint8 state)
        function getHubOverhead() external view returns (uint256)
        function calculateCharge(uint256 gasUsed, GasData gasData) external view returns (uint256)
        function canRelay(RelayRequest relayRequest, uint256 maxPossibleCharge, uint256 acceptRelayedCallGasLimit, bytes signature, bytes approvalData) external view returns (uint256 status, bytes recipientContext)
        function relayCall(RelayRequest relayRequest, bytes signature, bytes approvalData) external
        function balanceOf(address target) external view returns (uint256)
        event RelayAdded(address indexed relay, address indexed owner, uint256 pctRelayFee, uint256 baseRelayFee, uint256 stake, uint256 unstakeDelay, string url)
        event TransactionRelayed(address indexed relay, address indexed from, address indexed to, bytes4 selector, uint8 status, uint256 charge)
        event RelayRemoved(address indexed relay, uint256 unstakeTime)
        event Unstaked(address indexed relay, uint256 stake)
    ]"#
);

abigen!(
    RelaySponsor,
    r#"[
        struct GasLimits { uint256 acceptRelayedCallGasLimit; uint256 preRelayedCallGasLimit; uint256 postRelayedCallGasLimit; }
        function getGasLimits() external view returns (GasLimits)
    ]"#
);
