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

use config::{Config, File};
use std::path::{Path, PathBuf};

use crate::RelayConfig;

/// A helper function that will search for all config files in the given
/// directory and return them as a vec of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> metatx_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory
    // and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(metatx_relayer_utils::Error::from))
        .collect()
}

/// Try to parse the [`RelayConfig`] from the given config file(s).
pub fn parse_from_files(files: &[PathBuf]) -> metatx_relayer_utils::Result<RelayConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder.add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of RELAY).
    let builder = builder.add_source(config::Environment::with_prefix("RELAY").separator("_"));
    let cfg = builder.build()?;
    // and finally deserialize the config and verify it.
    let config: Result<RelayConfig, serde_path_to_error::Error<config::ConfigError>> =
        serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => {
            c.verify()?;
            Ok(c)
        }
        Err(e) => Err(e.into()),
    }
}

/// Loads the configuration from the given directory.
pub fn load<P: AsRef<Path>>(path: P) -> metatx_relayer_utils::Result<RelayConfig> {
    parse_from_files(&search_config_files(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_config_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("relay.toml")).unwrap();
        write!(
            file,
            r#"
            url = "http://relay.example:8090"
            relay-hub-address = "0x254dffcd3277c0b1660f6d42efbb754edababc2b"
            http-endpoint = "http://localhost:8545"
            private-key = "0x000000000000000000000000000000000000000000000000000000000000002a"
            percent-fee = 5
            dev-mode = true
            "#
        )
        .unwrap();

        let config = load(dir.path()).unwrap();
        assert_eq!(config.url, "http://relay.example:8090");
        assert_eq!(config.percent_fee, 5);
        assert!(config.dev_mode);
    }
}
