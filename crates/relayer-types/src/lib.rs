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

//! # Relayer Types Module 🕸️
//!
//! Newtypes used by the relayer configuration: secrets that must never leak
//! into logs, and endpoint URLs that may be supplied through the environment.

/// The relay signing key, loaded from the config or the environment.
pub mod private_key;
/// An RPC endpoint URL, loaded from the config or the environment.
pub mod rpc_url;

pub use private_key::PrivateKey;
pub use rpc_url::RpcUrl;
