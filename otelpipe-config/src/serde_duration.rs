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

//! Human-readable durations (`250ms`, `10s`, `5m`) for config fields.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let duration_str = humantime::format_duration(*duration).to_string();
    serializer.serialize_str(&duration_str)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let duration_str = String::deserialize(deserializer)?;
    humantime::parse_duration(&duration_str).map_err(|error| {
        serde::de::Error::custom(format!("invalid duration `{duration_str}`: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "super")]
        timeout: Duration,
    }

    #[test]
    fn test_duration_serde() {
        let timeouts: Timeouts = serde_json::from_str(r#"{"timeout": "1m 30s"}"#).unwrap();
        assert_eq!(timeouts.timeout, Duration::from_secs(90));
        assert_eq!(
            serde_json::to_string(&timeouts).unwrap(),
            r#"{"timeout":"1m 30s"}"#
        );
        serde_json::from_str::<Timeouts>(r#"{"timeout": "10 parsecs"}"#).unwrap_err();
        serde_json::from_str::<Timeouts>(r#"{"timeout": 10}"#).unwrap_err();
    }
}
