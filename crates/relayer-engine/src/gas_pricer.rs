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

use std::sync::Arc;

use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::U256;
use parking_lot::RwLock;

use metatx_relayer_utils::{probe, Result};

/// GasPricer maintains the effective gas price the relay is willing to pay:
/// the node's suggestion with a linear markup applied.
///
/// A single writer (the periodic refresher) updates the cell; request
/// admission reads race against it benignly, since a stale floor can only
/// reject, never over-accept. Until the first successful refresh the cell is
/// empty and admission fails closed.
pub struct GasPricer<P> {
    client: Arc<Provider<P>>,
    markup_percent: U256,
    current: RwLock<Option<U256>>,
}

impl<P> std::fmt::Debug for GasPricer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GasPricer")
            .field("markup_percent", &self.markup_percent)
            .field("current", &self.current.read())
            .finish()
    }
}

impl<P: JsonRpcClient> GasPricer<P> {
    /// Creates a pricer with an empty cell.
    pub fn new(client: Arc<Provider<P>>, markup_percent: U256) -> Self {
        Self {
            client,
            markup_percent,
            current: RwLock::new(None),
        }
    }

    /// Asks the node for a gas price suggestion and publishes
    /// `suggestion × (100 + markup) / 100`.
    pub async fn refresh(&self) -> Result<U256> {
        let suggested = self.client.get_gas_price().await?;
        let effective = suggested * (self.markup_percent + U256::from(100)) / U256::from(100);
        *self.current.write() = Some(effective);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::GasPrice,
            %suggested,
            %effective,
        );
        Ok(effective)
    }

    /// The current effective gas price, if at least one refresh succeeded.
    pub fn current(&self) -> Option<U256> {
        *self.current.read()
    }

    /// The current effective gas price, or zero while uninitialized.
    pub fn current_or_zero(&self) -> U256 {
        self.current().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::Provider;

    #[tokio::test]
    async fn applies_the_markup_on_refresh() {
        let (provider, mock) = Provider::mocked();
        let pricer = GasPricer::new(Arc::new(provider), U256::from(10));
        assert_eq!(pricer.current(), None);
        assert_eq!(pricer.current_or_zero(), U256::zero());

        mock.push(U256::from(100)).unwrap();
        let effective = pricer.refresh().await.unwrap();
        assert_eq!(effective, U256::from(110));
        assert_eq!(pricer.current(), Some(U256::from(110)));
    }

    #[tokio::test]
    async fn zero_markup_passes_the_suggestion_through() {
        let (provider, mock) = Provider::mocked();
        let pricer = GasPricer::new(Arc::new(provider), U256::zero());
        mock.push(U256::from(42)).unwrap();
        assert_eq!(pricer.refresh().await.unwrap(), U256::from(42));
    }
}
