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

use std::time::Duration;

use anyhow::ensure;
use otelpipe_common::{get_from_env, get_from_env_opt};
use serde::{Deserialize, Serialize};

use crate::pipeline_config::RetryConfig;
use crate::serde_duration;

pub const OTELPIPE_COLLECTOR_ENDPOINT_ENV_KEY: &str = "OTELPIPE_COLLECTOR_ENDPOINT";
pub const OTELPIPE_SERVICE_INSTANCE_ID_ENV_KEY: &str = "OTELPIPE_SERVICE_INSTANCE_ID";
pub const OTELPIPE_MAX_BATCH_SIZE_ENV_KEY: &str = "OTELPIPE_MAX_BATCH_SIZE";
pub const OTELPIPE_SAMPLING_RATIO_ENV_KEY: &str = "OTELPIPE_SAMPLING_RATIO";

fn default_endpoint() -> String {
    "http://127.0.0.1:4318".to_string()
}

fn default_instance_id() -> String {
    get_from_env_opt::<String>(OTELPIPE_SERVICE_INSTANCE_ID_ENV_KEY)
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn default_max_batch_size() -> usize {
    512
}

fn default_max_batch_age() -> Duration {
    Duration::from_secs(5)
}

fn default_intake_capacity() -> usize {
    2048
}

fn default_client_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_metric_export_interval() -> Duration {
    Duration::from_secs(60)
}

/// Decides whether a new trace is recorded. Child spans inherit the decision of their parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SamplerConfig {
    #[default]
    AlwaysOn,
    AlwaysOff,
    Ratio { ratio: f64 },
}

/// Settings of the exporter client embedded in an instrumented service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterClientConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub service_name: String,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_batch_age", with = "serde_duration")]
    pub max_batch_age: Duration,
    /// Capacity of the intake queue of each telemetry kind.
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
    #[serde(default = "default_client_retry")]
    pub retry: RetryConfig,
    #[serde(default = "default_request_timeout", with = "serde_duration")]
    pub request_timeout: Duration,
    #[serde(default = "default_shutdown_timeout", with = "serde_duration")]
    pub shutdown_timeout: Duration,
    #[serde(default = "default_metric_export_interval", with = "serde_duration")]
    pub metric_export_interval: Duration,
    #[serde(default)]
    pub sampler: SamplerConfig,
}

impl ExporterClientConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        ExporterClientConfig {
            endpoint: default_endpoint(),
            service_name: service_name.into(),
            instance_id: default_instance_id(),
            max_batch_size: default_max_batch_size(),
            max_batch_age: default_max_batch_age(),
            intake_capacity: default_intake_capacity(),
            retry: default_client_retry(),
            request_timeout: default_request_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            metric_export_interval: default_metric_export_interval(),
            sampler: SamplerConfig::default(),
        }
    }

    /// Builds a config from defaults overridden by `OTELPIPE_*` environment variables.
    pub fn from_env(service_name: impl Into<String>) -> anyhow::Result<Self> {
        let mut client_config = ExporterClientConfig::new(service_name);
        client_config.endpoint =
            get_from_env(OTELPIPE_COLLECTOR_ENDPOINT_ENV_KEY, client_config.endpoint);
        client_config.max_batch_size =
            get_from_env(OTELPIPE_MAX_BATCH_SIZE_ENV_KEY, client_config.max_batch_size);

        if let Some(ratio) = get_from_env_opt::<f64>(OTELPIPE_SAMPLING_RATIO_ENV_KEY) {
            client_config.sampler = SamplerConfig::Ratio { ratio };
        }
        client_config.validate()?;
        Ok(client_config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.service_name.is_empty(), "`service_name` must not be empty");
        ensure!(
            self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://"),
            "collector endpoint `{}` must start with `http://` or `https://`",
            self.endpoint
        );
        ensure!(
            self.max_batch_size > 0,
            "`max_batch_size` must be greater than zero"
        );
        ensure!(
            !self.max_batch_age.is_zero(),
            "`max_batch_age` must not be zero"
        );
        ensure!(
            self.intake_capacity > 0,
            "`intake_capacity` must be greater than zero"
        );
        if let SamplerConfig::Ratio { ratio } = self.sampler {
            ensure!(
                (0.0..=1.0).contains(&ratio),
                "sampling ratio must be between 0 and 1, got {ratio}"
            );
        }
        self.retry.validate("exporter client")
    }

    /// Endpoint of the ingestion RPC of the collector.
    pub fn ingest_url(&self) -> String {
        format!("{}/api/v1/ingest", self.endpoint.trim_end_matches('/'))
    }

    #[cfg(any(test, feature = "testsuite"))]
    pub fn for_test(service_name: &str) -> Self {
        let mut client_config = ExporterClientConfig::new(service_name);
        client_config.instance_id = format!("{service_name}-1");
        client_config.max_batch_size = 5;
        client_config.max_batch_age = Duration::from_secs(2);
        client_config.intake_capacity = 16;
        client_config.retry = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        client_config.shutdown_timeout = Duration::from_secs(1);
        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_client_config_defaults() {
        let client_config: ExporterClientConfig =
            serde_yaml::from_str("service_name: service-a").unwrap();
        assert_eq!(client_config.endpoint, "http://127.0.0.1:4318");
        assert_eq!(client_config.max_batch_size, 512);
        assert_eq!(client_config.max_batch_age, Duration::from_secs(5));
        assert_eq!(client_config.intake_capacity, 2048);
        assert_eq!(client_config.retry.max_attempts, 5);
        assert_eq!(client_config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(client_config.retry.max_delay, Duration::from_secs(5));
        assert_eq!(client_config.sampler, SamplerConfig::AlwaysOn);
        assert!(!client_config.instance_id.is_empty());
        client_config.validate().unwrap();
        assert_eq!(
            client_config.ingest_url(),
            "http://127.0.0.1:4318/api/v1/ingest"
        );
    }

    #[test]
    fn test_exporter_client_config_sampler() {
        let client_config: ExporterClientConfig =
            serde_yaml::from_str("service_name: service-b\nsampler: {type: ratio, ratio: 1.5}")
                .unwrap();
        assert_eq!(client_config.sampler, SamplerConfig::Ratio { ratio: 1.5 });
        client_config.validate().unwrap_err();
    }

    #[test]
    fn test_exporter_client_config_from_env() {
        unsafe {
            std::env::set_var(OTELPIPE_COLLECTOR_ENDPOINT_ENV_KEY, "http://collector:4318/");
            std::env::set_var(OTELPIPE_SAMPLING_RATIO_ENV_KEY, "0.25");
        }
        let client_config = ExporterClientConfig::from_env("service-a").unwrap();
        unsafe {
            std::env::remove_var(OTELPIPE_COLLECTOR_ENDPOINT_ENV_KEY);
            std::env::remove_var(OTELPIPE_SAMPLING_RATIO_ENV_KEY);
        }
        assert_eq!(client_config.endpoint, "http://collector:4318/");
        assert_eq!(client_config.sampler, SamplerConfig::Ratio { ratio: 0.25 });
        assert_eq!(
            client_config.ingest_url(),
            "http://collector:4318/api/v1/ingest"
        );
    }
}
