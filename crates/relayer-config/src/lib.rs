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

#![warn(missing_docs)]

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the relayer.
//!
//! ## Overview
//!
//! The relayer configuration module is responsible for configuring the
//! relayer: its identity (signing key, owner, advertised URL), its fee
//! policy, the hub it serves, and the node it talks to. Configuration is
//! read from a directory of `.toml`/`.json` files, merged with environment
//! variables under the `RELAY` prefix.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values for optional config knobs.
pub mod defaults;
/// Utils for processing configuration.
pub mod utils;

use std::path::PathBuf;

use ethereum_types::Address;
use metatx_relayer_types::{PrivateKey, RpcUrl};
use serde::{Deserialize, Serialize};

/// RelayConfig is the configuration of a single relay server instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    /// The port the relay's operations surface listens on.
    ///
    /// defaults to 8090
    #[serde(default = "defaults::relayer_port", skip_serializing)]
    pub port: u16,
    /// The URL at which this relay advertises itself on the hub.
    pub url: String,
    /// The address of the hub contract this relay serves.
    pub relay_hub_address: Address,
    /// The address that funded our stake and ultimately receives balances.
    ///
    /// May be left at the zero sentinel, in which case the relay adopts the
    /// owner recorded in the hub's stake entry once it observes itself staked.
    #[serde(default)]
    pub owner_address: Address,
    /// The flat fee charged per relayed call, in the chain's native unit.
    #[serde(default)]
    pub base_fee: u64,
    /// The markup charged on gas spent, in percent. Requests advertising a
    /// lower percent fee are rejected.
    #[serde(default = "defaults::percent_fee")]
    pub percent_fee: u64,
    /// The linear markup applied to the node's gas price suggestion, in percent.
    #[serde(default = "defaults::gas_price_markup_percent")]
    pub gas_price_markup_percent: u64,
    /// How often (in blocks) the relay must re-register itself on the hub if
    /// no hub event mentioned it in the meantime.
    #[serde(default = "defaults::registration_block_rate")]
    pub registration_block_rate: u64,
    /// Http(s) endpoint of the chain node.
    #[serde(skip_serializing)]
    pub http_endpoint: RpcUrl,
    /// The relay's signing key.
    #[serde(skip_serializing)]
    pub private_key: Option<PrivateKey>,
    /// Where the outbound transaction store lives on disk.
    #[serde(default = "defaults::db_path")]
    pub db_path: PathBuf,
    /// Dev mode: refuse well-known chain ids and trust the chain's pending
    /// nonce unconditionally. Never enable this against a real network.
    #[serde(default)]
    pub dev_mode: bool,
}

impl RelayConfig {
    /// Makes sure that the config is valid, by doing some basic checks.
    pub fn verify(&self) -> metatx_relayer_utils::Result<()> {
        if self.private_key.is_none() {
            return Err(metatx_relayer_utils::Error::MissingSecrets);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "url": "http://localhost:8090",
            "relay-hub-address": "0x254dffcd3277c0b1660f6d42efbb754edababc2b",
            "http-endpoint": "http://localhost:8545",
            "private-key": "0x000000000000000000000000000000000000000000000000000000000000002a",
        }))
        .unwrap();
        assert_eq!(config.port, defaults::relayer_port());
        assert_eq!(config.percent_fee, defaults::percent_fee());
        assert!(config.owner_address.is_zero());
        assert!(!config.dev_mode);
        config.verify().unwrap();
    }

    #[test]
    fn missing_private_key_fails_verification() {
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "url": "http://localhost:8090",
            "relay-hub-address": "0x254dffcd3277c0b1660f6d42efbb754edababc2b",
            "http-endpoint": "http://localhost:8545",
        }))
        .unwrap();
        assert!(config.verify().is_err());
    }
}
