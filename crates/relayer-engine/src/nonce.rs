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

use std::sync::atomic::{AtomicU64, Ordering};

use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::{Address, BlockNumber};
use tokio::sync::{Mutex, MutexGuard};

use metatx_relayer_utils::Result;

/// NonceAllocator owns the relay's outbound nonce counter together with the
/// mutex that serializes every outbound broadcast.
///
/// The chain's pending nonce lags behind our own rapid sends, so it cannot be
/// trusted as-is; conversely our counter may drift above reality after a
/// restart. [`NonceAllocator::allocate`] reconciles the two: it adopts the
/// pending nonce whenever the local counter is not ahead of it (always, in
/// dev mode), and keeps the local counter otherwise.
///
/// The counter is only written while the mutex is held. Reads through
/// [`NonceAllocator::last_nonce`] are lock-free so admission checks never
/// queue behind an in-flight broadcast.
#[derive(Debug, Default)]
pub struct NonceAllocator {
    last_nonce: AtomicU64,
    lock: Mutex<()>,
}

impl NonceAllocator {
    /// Creates an allocator starting at nonce zero; the first allocation
    /// reseats it on the chain's pending view.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next outbound nonce as far as this process knows.
    pub fn last_nonce(&self) -> u64 {
        self.last_nonce.load(Ordering::SeqCst)
    }

    /// Enters the outbound critical section and picks the nonce for the
    /// transaction under construction.
    ///
    /// The returned lease holds the mutex until it is dropped. Call
    /// [`NonceLease::commit`] once the broadcast succeeded; dropping the
    /// lease without committing leaves the counter unadvanced.
    pub async fn allocate<'a, P: JsonRpcClient>(
        &'a self,
        client: &Provider<P>,
        address: Address,
        dev_mode: bool,
    ) -> Result<NonceLease<'a>> {
        let guard = self.lock.lock().await;
        let pending = client
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await?
            .as_u64();
        let local = self.last_nonce.load(Ordering::SeqCst);
        // Always adopt the chain's view in dev mode, and whenever our counter
        // has fallen behind it (fresh start, or a restart after sends).
        let nonce = if dev_mode || local <= pending {
            self.last_nonce.store(pending, Ordering::SeqCst);
            pending
        } else {
            local
        };
        Ok(NonceLease {
            _guard: guard,
            counter: &self.last_nonce,
            nonce,
        })
    }

    /// Enters the outbound critical section without allocating a new nonce.
    ///
    /// Used by the rebroadcast path, which reuses the nonce of a stored
    /// transaction.
    pub async fn hold(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    #[cfg(test)]
    pub(crate) fn seed(&self, nonce: u64) {
        self.last_nonce.store(nonce, Ordering::SeqCst);
    }
}

/// An exclusive reservation of the next outbound nonce.
///
/// Holds the allocator's mutex for its whole lifetime; signing, broadcasting
/// and persisting all happen under it.
#[derive(Debug)]
pub struct NonceLease<'a> {
    _guard: MutexGuard<'a, ()>,
    counter: &'a AtomicU64,
    nonce: u64,
}

impl NonceLease<'_> {
    /// The nonce to use for the transaction under construction.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Marks the broadcast as successful, advancing the counter past the
    /// leased nonce.
    ///
    /// The lease stays alive after committing: the critical section extends
    /// until the record is persisted, so drop the lease only once the store
    /// write is done.
    pub fn commit(&self) {
        self.counter.store(self.nonce + 1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use std::sync::Arc;

    fn mocked_client() -> (Arc<Provider<ethers::providers::MockProvider>>, ethers::providers::MockProvider) {
        let (provider, mock) = Provider::mocked();
        (Arc::new(provider), mock)
    }

    #[tokio::test]
    async fn adopts_pending_nonce_when_local_counter_is_behind() {
        let (client, mock) = mocked_client();
        let allocator = NonceAllocator::new();
        mock.push(U256::from(5)).unwrap();

        let lease = allocator
            .allocate(&client, Address::random(), false)
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 5);
        lease.commit();
        assert_eq!(allocator.last_nonce(), 6);
    }

    #[tokio::test]
    async fn keeps_local_counter_when_chain_lags() {
        let (client, mock) = mocked_client();
        let allocator = NonceAllocator::new();
        allocator.seed(7);
        // The chain has not seen our two most recent sends yet.
        mock.push(U256::from(5)).unwrap();

        let lease = allocator
            .allocate(&client, Address::random(), false)
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 7);
        lease.commit();
        assert_eq!(allocator.last_nonce(), 8);
    }

    #[tokio::test]
    async fn dev_mode_always_adopts_pending_nonce() {
        let (client, mock) = mocked_client();
        let allocator = NonceAllocator::new();
        allocator.seed(7);
        mock.push(U256::from(5)).unwrap();

        let lease = allocator
            .allocate(&client, Address::random(), true)
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 5);
    }

    #[tokio::test]
    async fn dropping_the_lease_does_not_advance_the_counter() {
        let (client, mock) = mocked_client();
        let allocator = NonceAllocator::new();
        mock.push(U256::from(3)).unwrap();

        let lease = allocator
            .allocate(&client, Address::random(), false)
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 3);
        drop(lease);
        // the counter was reseated on the chain's view, but not advanced.
        assert_eq!(allocator.last_nonce(), 3);
    }

    #[tokio::test]
    async fn query_failure_aborts_the_allocation() {
        let (client, _mock) = mocked_client();
        let allocator = NonceAllocator::new();
        // nothing pushed on the mock: the nonce query fails.
        let res = allocator.allocate(&client, Address::random(), false).await;
        assert!(res.is_err());
        assert_eq!(allocator.last_nonce(), 0);
    }
}
