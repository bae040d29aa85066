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

use std::path::Path;

use crate::{StoredTransaction, TxStore};

const TREE_NAME: &str = "outbound_transactions";

/// SledTxStore keeps the outbound transaction queue in a
/// [Sled](https://sled.rs)-based database.
///
/// Records live in a single tree keyed by the big-endian bytes of the nonce,
/// so sled's key order is the nonce order.
#[derive(Clone)]
pub struct SledTxStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledTxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledTxStore").finish()
    }
}

impl SledTxStore {
    /// Open the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> metatx_relayer_utils::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary store that is deleted when the process exits.
    pub fn temporary() -> metatx_relayer_utils::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk.
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn tree(&self) -> metatx_relayer_utils::Result<sled::Tree> {
        self.db.open_tree(TREE_NAME).map_err(Into::into)
    }
}

impl TxStore for SledTxStore {
    #[tracing::instrument(skip_all, fields(nonce = tx.nonce()))]
    fn save(&self, tx: &StoredTransaction) -> metatx_relayer_utils::Result<()> {
        let tree = self.tree()?;
        let value = serde_json::to_vec(tx)?;
        tree.insert(tx.nonce().to_be_bytes(), value)?;
        tracing::trace!("saved outbound transaction");
        // flush the db to make sure we don't lose anything.
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn get_first(&self) -> metatx_relayer_utils::Result<Option<StoredTransaction>> {
        let tree = self.tree()?;
        match tree.first()? {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, fields(nonce = nonce))]
    fn remove_less_than(&self, nonce: u64) -> metatx_relayer_utils::Result<()> {
        let tree = self.tree()?;
        let confirmed: Vec<_> = tree
            .range(..nonce.to_be_bytes())
            .keys()
            .collect::<Result<_, _>>()?;
        for key in confirmed {
            tree.remove(key)?;
        }
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(nonce = tx.nonce()))]
    fn update_by_nonce(&self, tx: &StoredTransaction) -> metatx_relayer_utils::Result<()> {
        let tree = self.tree()?;
        let value = serde_json::to_vec(tx)?;
        tree.insert(tx.nonce().to_be_bytes(), value)?;
        tracing::trace!("replaced outbound transaction");
        self.db.flush()?;
        Ok(())
    }

    fn close(&self) -> metatx_relayer_utils::Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, Bytes, Transaction, U256};

    fn make_tx(nonce: u64, gas_price: u64) -> StoredTransaction {
        let tx = Transaction {
            hash: ethers::types::H256::random(),
            nonce: U256::from(nonce),
            from: Address::random(),
            to: Some(Address::random()),
            value: U256::zero(),
            gas: U256::from(100_000u64),
            gas_price: Some(U256::from(gas_price)),
            input: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        };
        StoredTransaction::new(tx, Bytes::from(vec![nonce as u8]))
    }

    #[test]
    fn get_first_after_save_on_empty_store_should_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledTxStore::open(tmp.path()).unwrap();
        assert!(store.get_first().unwrap().is_none());

        let tx = make_tx(7, 1_000_000_000);
        store.save(&tx).unwrap();
        assert_eq!(store.get_first().unwrap(), Some(tx));
    }

    #[test]
    fn records_are_ordered_by_nonce() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledTxStore::open(tmp.path()).unwrap();
        // insertion order should not matter.
        for nonce in [6u64, 4, 7, 5] {
            store.save(&make_tx(nonce, 1)).unwrap();
        }
        assert_eq!(store.get_first().unwrap().unwrap().nonce(), 4);
    }

    #[test]
    fn remove_less_than_prunes_only_confirmed_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledTxStore::open(tmp.path()).unwrap();
        for nonce in 4u64..=7 {
            store.save(&make_tx(nonce, 1)).unwrap();
        }
        store.remove_less_than(6).unwrap();
        assert_eq!(store.get_first().unwrap().unwrap().nonce(), 6);
        store.remove_less_than(7).unwrap();
        assert_eq!(store.get_first().unwrap().unwrap().nonce(), 7);
        store.remove_less_than(8).unwrap();
        assert!(store.get_first().unwrap().is_none());
    }

    #[test]
    fn update_by_nonce_replaces_the_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledTxStore::open(tmp.path()).unwrap();
        let stale = make_tx(3, 50_000_000_000);
        store.save(&stale).unwrap();

        let mut bumped = make_tx(3, 60_000_000_000);
        bumped.sent_at = stale.sent_at;
        store.update_by_nonce(&bumped).unwrap();

        let first = store.get_first().unwrap().unwrap();
        assert_eq!(first.nonce(), 3);
        assert_eq!(first.gas_price(), U256::from(60_000_000_000u64));
        assert_ne!(first.tx.hash, stale.tx.hash);
    }
}
