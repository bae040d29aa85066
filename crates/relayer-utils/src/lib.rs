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

//! # Relayer Utils Module 🕸️
//!
//! Common error types and logging probes shared by every crate of the
//! meta-transaction relayer.

use ethereum_types::Address;
use ethers::types::{H256, U256};

/// A module used for debugging relayer lifecycle, admission decisions and
/// outbound transaction state.
pub mod probe;

/// An enum of all possible errors that could be encountered during the
/// execution of the relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Elliptic Curve error.
    #[error(transparent)]
    EllipticCurve(#[from] ethers::core::k256::elliptic_curve::Error),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWallet(#[from] ethers::signers::WalletError),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Error while decoding a hex string.
    #[error(transparent)]
    FromHex(#[from] hex::FromHexError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Smart contract error.
    #[error("Contract call failed: {}", _0)]
    EthersContractCall(String),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// Missing Secrets in the config, i.e the relay private key.
    #[error("Missing required private-key in the config")]
    MissingSecrets,
    /// The request named a hub we are not serving.
    #[error("Wrong hub address: relay serves {ours}, request named {theirs}")]
    WrongHub {
        /// The hub address this relay is configured for.
        ours: Address,
        /// The hub address carried by the request.
        theirs: Address,
    },
    /// The advertised relay fee is below our configured floor.
    #[error("Unacceptable fee: offered {offered}%, floor is {floor}%")]
    UnacceptableFee {
        /// The percent fee offered by the request.
        offered: U256,
        /// Our configured percent fee.
        floor: U256,
    },
    /// The gas price is not initialized yet, or the request bid below it.
    #[error("Unacceptable gas price: offered {offered}, floor is {floor}")]
    UnacceptableGasPrice {
        /// The gas price offered by the request.
        offered: U256,
        /// The current effective gas price, zero while uninitialized.
        floor: U256,
    },
    /// The user's nonce ceiling is below our outbound counter.
    #[error(
        "Unacceptable relay max nonce: ceiling {relay_max_nonce}, next outbound nonce is {last_nonce}"
    )]
    UnacceptableRelayMaxNonce {
        /// The highest outbound nonce the user allows.
        relay_max_nonce: U256,
        /// Our current outbound nonce counter.
        last_nonce: u64,
    },
    /// The sponsor cannot cover the worst case charge of the relayed call.
    #[error("Sponsor balance too low: {balance}, max charge: {max_charge}")]
    SponsorBalanceTooLow {
        /// The sponsor's balance on the hub.
        balance: U256,
        /// The worst case charge of the relayed call.
        max_charge: U256,
    },
    /// The hub's `canRelay` view function refused the request.
    #[error("canRelay view function returned error code={}", code)]
    CanRelayRefused {
        /// The numeric reason code reported by the hub.
        code: U256,
    },
    /// Refusing to run in dev mode against a well-known chain.
    #[error(
        "Cowardly refusing to connect to chain with id={chain_id} in dev mode. \
         Only chains with id 1000 or higher are supported, to prevent the relay \
         from being accidentally penalized."
    )]
    UnsafeChainId {
        /// The chain id reported by the node.
        chain_id: U256,
    },
    /// A transaction was mined but its receipt reports failure.
    #[error("Transaction {tx_hash} was mined but reverted")]
    TransactionFailed {
        /// The hash of the failed transaction.
        tx_hash: H256,
    },
    /// No receipt was observed within the mining-await window.
    #[error("Timed out waiting for transaction {tx_hash} to be mined")]
    TransactionTimeout {
        /// The hash of the transaction we gave up on.
        tx_hash: H256,
    },
}

/// A type alias for the result used across the relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

impl<M: ethers::providers::Middleware> From<ethers::contract::ContractError<M>> for Error {
    fn from(error: ethers::contract::ContractError<M>) -> Self {
        Error::EthersContractCall(error.to_string())
    }
}
