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

use derive_more::Display;
/// Target for logger
pub const TARGET: &str = "relay_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the Relayer changes, like starting, staking or shutting down.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Registration state of the relay on the hub.
    #[display(fmt = "registration")]
    Registration,
    /// Admission decisions for incoming relay requests.
    #[display(fmt = "relay_request")]
    RelayRequest,
    /// Outbound transaction confirmation tracking and rebroadcasts.
    #[display(fmt = "confirmations")]
    Confirmations,
    /// Effective gas price updates.
    #[display(fmt = "gas_price")]
    GasPrice,
}
