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

use std::str::FromStr;

use ethereum_types::Secret;
use serde::Deserialize;

/// PrivateKey represents the relay signing key.
///
/// It never implements `Serialize` and its `Debug` output is redacted, so the
/// key cannot accidentally end up in logs or in a config dump.
#[derive(Clone)]
pub struct PrivateKey(Secret);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl From<Secret> for PrivateKey {
    fn from(secret: Secret) -> Self {
        PrivateKey(secret)
    }
}

impl std::ops::Deref for PrivateKey {
    type Target = Secret;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for PrivateKey {
    type Err = String;

    /// Parses a private key from one of two forms:
    ///
    /// 1. a raw hex encoded key, `0x` prefixed:
    ///    `0x8917174396171783496173419137618235192359106130478137647163400318`
    /// 2. the name of an environment variable holding form (1), `$` prefixed:
    ///    `$RELAY_PRIVATE_KEY`
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(var) = value.strip_prefix('$') {
            tracing::trace!("Reading private key from ${}", var);
            let val = std::env::var(var)
                .map_err(|e| format!("error while loading the env var ${var}: {e}"))?;
            return val.parse();
        }
        if !value.starts_with("0x") {
            return Err(String::from(
                "expected a 0x-prefixed hex string or a $ENV_VAR holding one",
            ));
        }
        let secret = Secret::from_str(value).map_err(|e| {
            format!(
                "{e}\n got {} chars but expected a 66 chars string (including the 0x prefix)",
                value.len()
            )
        })?;
        Ok(Self(secret))
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
