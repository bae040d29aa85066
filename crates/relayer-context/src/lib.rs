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
//! # Relayer Context Module 🕸️
//!
//! A module for managing the context of the relayer: the configuration, the
//! chain node connection, the signing key, and the shutdown signal.
use std::time::Duration;

use ethers::core::k256::SecretKey;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use tokio::sync::broadcast;

use metatx_relayer_config::RelayConfig;

/// RelayerContext contains the relayer's configuration and shutdown signal.
#[derive(Debug, Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: RelayConfig,
    /// Broadcasts a shutdown signal to all active tasks.
    ///
    /// The initial `shutdown` trigger is provided by the `run` caller. When a
    /// background task is spawned, it is passed a broadcast receiver handle.
    /// When a graceful shutdown is initiated, a `()` value is sent via the
    /// broadcast::Sender. Each active task receives it, reaches a safe
    /// terminal state, and completes.
    notify_shutdown: broadcast::Sender<()>,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(config: RelayConfig) -> Self {
        let (notify_shutdown, _) = broadcast::channel(2);
        Self {
            config,
            notify_shutdown,
        }
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Returns a new chain node provider for the relayer.
    pub fn evm_provider(&self) -> metatx_relayer_utils::Result<Provider<Http>> {
        let provider = Provider::try_from(self.config.http_endpoint.as_str())?
            .interval(Duration::from_millis(500u64));
        Ok(provider)
    }

    /// Sets up and returns the relay's wallet.
    pub fn evm_wallet(&self) -> metatx_relayer_utils::Result<LocalWallet> {
        let private_key = self
            .config
            .private_key
            .as_ref()
            .ok_or(metatx_relayer_utils::Error::MissingSecrets)?;
        let key = SecretKey::from_bytes(private_key.as_bytes().into())?;
        Ok(LocalWallet::from(key))
    }
}

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the server
/// should shutdown.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal has
/// been received. Callers may query for whether the shutdown signal has been
/// received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}
