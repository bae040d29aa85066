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

//! Meta-Transaction Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use tokio::signal::unix;

use metatx_relayer_config::cli::{create_store, load_config, setup_logger, Opts};
use metatx_relayer_context::RelayerContext;
use metatx_relayer_utils::probe;

mod service;

/// The main entry point for the relayer.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose, "metatx_relayer")?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config = load_config(args.config_dir.clone())?;
    let ctx = RelayerContext::new(config);

    // persistent storage for outbound transactions
    let store = create_store(&args, &ctx.config)?;

    // The engine owns the signing key, the nonce counter and the store; the
    // workers below only tick it.
    let relay = service::build_relay(&ctx, store).await?;

    // an early gas price so the relay can serve requests right away; the
    // refresher keeps it current from here on.
    if let Err(e) = relay.refresh_gas_price().await {
        tracing::warn!("initial gas price refresh failed: {}", e);
    }

    service::start_gas_price_refresher(&ctx, relay.clone());
    service::start_confirmation_tracker(&ctx, relay.clone());
    service::start_lifecycle_worker(&ctx, relay.clone());

    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true,
    );

    let mut sigint = unix::signal(unix::SignalKind::interrupt())?;
    let mut sigterm = unix::signal(unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
    ctx.shutdown();
    relay.close()?;
    Ok(())
}
