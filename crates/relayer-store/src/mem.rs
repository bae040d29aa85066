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

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{StoredTransaction, TxStore};

/// InMemoryTxStore keeps the outbound transaction queue in memory.
///
/// Mostly useful for tests and local development; a relay restart forgets
/// everything in it.
#[derive(Clone, Default)]
pub struct InMemoryTxStore {
    txs: Arc<RwLock<BTreeMap<u64, StoredTransaction>>>,
}

impl std::fmt::Debug for InMemoryTxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTxStore").finish()
    }
}

impl TxStore for InMemoryTxStore {
    fn save(&self, tx: &StoredTransaction) -> metatx_relayer_utils::Result<()> {
        self.txs.write().insert(tx.nonce(), tx.clone());
        Ok(())
    }

    fn get_first(&self) -> metatx_relayer_utils::Result<Option<StoredTransaction>> {
        Ok(self.txs.read().values().next().cloned())
    }

    fn remove_less_than(&self, nonce: u64) -> metatx_relayer_utils::Result<()> {
        self.txs.write().retain(|&k, _| k >= nonce);
        Ok(())
    }

    fn update_by_nonce(&self, tx: &StoredTransaction) -> metatx_relayer_utils::Result<()> {
        self.txs.write().insert(tx.nonce(), tx.clone());
        Ok(())
    }

    fn close(&self) -> metatx_relayer_utils::Result<()> {
        Ok(())
    }
}
