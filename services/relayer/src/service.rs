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

//! # Relayer Service Module 🕸️
//!
//! A module for starting the long-running tasks of the relay.
//!
//! ## Overview
//!
//! Services are tasks which the relayer constantly runs throughout its
//! lifetime: refreshing the effective gas price, driving the hub lifecycle
//! (stake → register → active), and reconciling the outbound transaction
//! store with the chain.

use std::sync::Arc;
use std::time::Duration;

use ethers::providers::Http;

use metatx_relayer_context::RelayerContext;
use metatx_relayer_engine::{RelayServer, RelayServerOpts};
use metatx_relayer_store::SledTxStore;
use metatx_relayer_utils::probe;

/// Type alias for the relay engine over the production provider and store.
pub type Relay = RelayServer<Http, SledTxStore>;

/// How often the effective gas price is recomputed from the node suggestion.
const GAS_PRICE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// How often the outbound transaction store is reconciled with the chain.
const CONFIRMATIONS_INTERVAL: Duration = Duration::from_secs(15);
/// How often the hub lifecycle (stake, registration) is re-examined.
const LIFECYCLE_INTERVAL: Duration = Duration::from_secs(60);

/// Builds the relay engine out of the context: provider, wallet and policy.
///
/// Queries the chain id once, which also enforces the dev mode chain guard
/// before anything else runs.
pub async fn build_relay(ctx: &RelayerContext, store: SledTxStore) -> anyhow::Result<Arc<Relay>> {
    let provider = ctx.evm_provider()?;
    let wallet = ctx.evm_wallet()?;
    let config = &ctx.config;
    let opts = RelayServerOpts {
        owner_address: config.owner_address,
        base_fee: config.base_fee.into(),
        percent_fee: config.percent_fee.into(),
        url: config.url.clone(),
        hub_address: config.relay_hub_address,
        gas_price_markup_percent: config.gas_price_markup_percent.into(),
        registration_block_rate: config.registration_block_rate,
        dev_mode: config.dev_mode,
    };
    let relay = Arc::new(RelayServer::new(opts, Arc::new(provider), wallet, store));
    let chain_id = relay.chain_id().await?;

    // the relay's initial configuration, sans secrets.
    tracing::info!(
        relay_address = ?relay.address(),
        owner_address = ?relay.owner_address(),
        hub_address = ?relay.hub_address(),
        url = %relay.url(),
        base_fee = config.base_fee,
        percent_fee = config.percent_fee,
        gas_price_markup_percent = config.gas_price_markup_percent,
        registration_block_rate = config.registration_block_rate,
        %chain_id,
        dev_mode = config.dev_mode,
        "relay initial configuration"
    );
    if config.dev_mode {
        tracing::warn!("using dev mode");
    }
    Ok(relay)
}

/// Starts the periodic worker that keeps the effective gas price fresh.
pub fn start_gas_price_refresher(ctx: &RelayerContext, relay: Arc<Relay>) {
    let mut shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GAS_PRICE_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::trace!("gas price refresher stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = relay.refresh_gas_price().await {
                        tracing::warn!("failed to refresh gas price: {}", e);
                    }
                }
            }
        }
    });
}

/// Starts the periodic worker that reconciles the tx-store with the chain,
/// evicting confirmed transactions and rebroadcasting stuck ones.
pub fn start_confirmation_tracker(ctx: &RelayerContext, relay: Arc<Relay>) {
    let mut shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONFIRMATIONS_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::trace!("confirmation tracker stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = relay.update_unconfirmed_transactions().await {
                        tracing::warn!("failed to update unconfirmed transactions: {}", e);
                    }
                }
            }
        }
    });
}

/// Starts the periodic worker that drives the relay through the hub
/// lifecycle: waiting for stake, registering, re-registering when stale, and
/// draining the balance once unstaked.
pub fn start_lifecycle_worker(ctx: &RelayerContext, relay: Arc<Relay>) {
    let mut shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIFECYCLE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::trace!("lifecycle worker stopped");
                    break;
                }
                _ = interval.tick() => {
                    match lifecycle_tick(&relay).await {
                        Ok(true) => {
                            tracing::info!("relay removed from the hub, lifecycle worker retiring");
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => tracing::warn!("lifecycle tick failed: {}", e),
                    }
                }
            }
        }
    });
}

/// One lifecycle pass. Returns `true` once the relay is removed and fully
/// drained, meaning there is nothing left to drive.
async fn lifecycle_tick(relay: &Relay) -> metatx_relayer_utils::Result<bool> {
    if relay.is_removed().await? {
        // No further service. Once the stake is released the balance goes
        // back to the owner.
        if relay.is_unstaked().await? {
            relay.send_balance_to_owner().await?;
            return Ok(true);
        }
        tracing::info!("relay is removed from the hub, awaiting unstake");
        return Ok(false);
    }

    if !relay.is_staked().await? {
        tracing::info!("relay is not staked yet, waiting for the owner's stake");
        return Ok(false);
    }

    let needs_registration = match relay.block_count_since_last_event().await {
        Ok(count) => count > relay.registration_block_rate(),
        // No event matching our current address, fee and URL: register anew.
        Err(_) => true,
    };
    if needs_registration {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Registration,
            registering = true,
        );
        relay.register_relay().await?;
    }
    Ok(false)
}
