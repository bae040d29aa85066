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

use std::path::PathBuf;

/// The default port the relay will listen on. Defaults to 8090.
pub const fn relayer_port() -> u16 {
    8090
}

/// The default percent fee charged on relayed calls. Defaults to 70%.
pub const fn percent_fee() -> u64 {
    70
}

/// The default markup over the node's gas price suggestion. Defaults to 10%.
pub const fn gas_price_markup_percent() -> u64 {
    10
}

/// How stale (in blocks) the last hub event mentioning us may get before we
/// re-register. Defaults to 5800 blocks, roughly a day.
pub const fn registration_block_rate() -> u64 {
    5800
}

/// The default on-disk location of the outbound transaction store.
pub fn db_path() -> PathBuf {
    PathBuf::from("relay-txstore")
}
