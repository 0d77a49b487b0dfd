// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(clippy::disallowed_methods)]

pub mod metrics;
pub mod retry;

use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::str::FromStr;

use tracing::{error, info};

pub fn setup_logging_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn get_from_env<T: FromStr + Debug>(key: &str, default_value: T) -> T {
    if let Some(value) = get_from_env_opt(key) {
        return value;
    }
    info!(value=?default_value, "setting `{}` from default", key);
    default_value
}

pub fn get_from_env_opt<T: FromStr + Debug>(key: &str) -> Option<T> {
    let value_str = std::env::var(key).ok()?;
    match T::from_str(&value_str) {
        Ok(value) => {
            info!(value=?value, "setting `{}` from environment", key);
            Some(value)
        }
        Err(_) => {
            error!(value_str=%value_str, "failed to parse `{}` from environment", key);
            None
        }
    }
}

pub fn get_bool_from_env(key: &str, default_value: bool) -> bool {
    let Ok(value_str) = std::env::var(key) else {
        return default_value;
    };
    match value_str.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            error!(value_str=%value_str, "failed to parse `{}` from environment", key);
            default_value
        }
    }
}

/// Maps a key to one of `num_shards` shards. The mapping is stable for the lifetime of the
/// process, which is all the pipeline needs to keep per-producer ordering.
pub fn shard_for_key<K: Hash + ?Sized>(key: &K, num_shards: usize) -> usize {
    assert!(num_shards > 0, "number of shards should be greater than zero");
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % num_shards as u64) as usize
}

pub fn truncate_str(text: &str, max_len: usize) -> &str {
    if max_len > text.len() {
        return text;
    }
    let mut truncation_index = max_len;
    while !text.is_char_boundary(truncation_index) {
        truncation_index -= 1;
    }
    &text[..truncation_index]
}
