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

use serde::Deserialize;

/// RpcUrl represents a chain node endpoint.
///
/// Like [`crate::PrivateKey`], the value may either be given inline or point
/// to an environment variable (`$NODE_URL`) that holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcUrl(url::Url);

impl RpcUrl {
    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for RpcUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<url::Url> for RpcUrl {
    fn from(url: url::Url) -> Self {
        RpcUrl(url)
    }
}

impl std::ops::Deref for RpcUrl {
    type Target = url::Url;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for RpcUrl {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(var) = value.strip_prefix('$') {
            tracing::trace!("Reading rpc url from ${}", var);
            let val = std::env::var(var)
                .map_err(|e| format!("error while loading the env var ${var}: {e}"))?;
            return val.parse();
        }
        let url = url::Url::parse(value).map_err(|e| format!("invalid rpc url {value}: {e}"))?;
        Ok(Self(url))
    }
}

impl<'de> Deserialize<'de> for RpcUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_url() {
        let url: RpcUrl = "http://localhost:8545".parse().unwrap();
        assert_eq!(url.as_str(), "http://localhost:8545/");
    }

    #[test]
    fn parses_from_env_var() {
        std::env::set_var("TEST_RELAY_NODE_URL", "http://localhost:8545");
        let url: RpcUrl = "$TEST_RELAY_NODE_URL".parse().unwrap();
        assert_eq!(url.as_str(), "http://localhost:8545/");
    }
}
