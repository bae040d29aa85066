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

//! # Relayer Store Module 🕸️
//!
//! A module for managing the storage of the relayer's outbound transactions.
//!
//! ## Overview
//!
//! Every transaction the relay broadcasts is persisted here, keyed by its
//! nonce, until the confirmation tracker observes it buried deep enough in
//! the chain. The store is an ordered map: iteration yields records in nonce
//! order, and the oldest unconfirmed transaction is always the first record.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::{Bytes, Transaction, U256};
use serde::{Deserialize, Serialize};

use metatx_relayer_utils::Result;

/// A module for managing in-memory storage of outbound transactions.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
pub use self::sled::SledTxStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryTxStore;

/// Returns the current wall-clock time as seconds since the unix epoch.
pub fn unix_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs()
}

/// An outbound transaction signed and broadcast by the relay, together with
/// the time it was handed to the chain node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    /// The signed transaction, as the relay broadcast it.
    pub tx: Transaction,
    /// The canonical network-encoded form of the signed transaction, suitable
    /// for independent rebroadcast.
    pub raw: Bytes,
    /// When the transaction was broadcast, in seconds since the unix epoch.
    pub sent_at: u64,
}

impl StoredTransaction {
    /// Wraps a freshly broadcast transaction, stamping it with the current time.
    pub fn new(tx: Transaction, raw: Bytes) -> Self {
        Self {
            tx,
            raw,
            sent_at: unix_time_secs(),
        }
    }

    /// The nonce of the transaction, which is also its key in the store.
    pub fn nonce(&self) -> u64 {
        self.tx.nonce.as_u64()
    }

    /// The gas price the transaction was broadcast with.
    pub fn gas_price(&self) -> U256 {
        self.tx.gas_price.unwrap_or_default()
    }
}

/// TxStore is the durable, nonce-ordered queue of outbound transactions.
///
/// Records are keyed by nonce, and nonces of live records form a contiguous
/// range from the oldest unconfirmed transaction up to the most recently sent
/// one. The confirmation tracker relies on this ordering.
pub trait TxStore: Send + Sync {
    /// Persist a freshly broadcast transaction under its nonce.
    fn save(&self, tx: &StoredTransaction) -> Result<()>;
    /// Get the record with the lowest nonce, the oldest unconfirmed one.
    fn get_first(&self) -> Result<Option<StoredTransaction>>;
    /// Remove every record whose nonce is strictly less than `nonce`.
    ///
    /// This is the only path that prunes the store.
    fn remove_less_than(&self, nonce: u64) -> Result<()>;
    /// Replace the record stored under `tx`'s nonce, after a rebroadcast.
    fn update_by_nonce(&self, tx: &StoredTransaction) -> Result<()>;
    /// Flush and release the store.
    fn close(&self) -> Result<()>;
}

impl<S> TxStore for Arc<S>
where
    S: TxStore,
{
    fn save(&self, tx: &StoredTransaction) -> Result<()> {
        S::save(self, tx)
    }

    fn get_first(&self) -> Result<Option<StoredTransaction>> {
        S::get_first(self)
    }

    fn remove_less_than(&self, nonce: u64) -> Result<()> {
        S::remove_less_than(self, nonce)
    }

    fn update_by_nonce(&self, tx: &StoredTransaction) -> Result<()> {
        S::update_by_nonce(self, tx)
    }

    fn close(&self) -> Result<()> {
        S::close(self)
    }
}
