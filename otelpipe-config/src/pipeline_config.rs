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

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use otelpipe_common::retry::RetryParams;
use otelpipe_proto::{Attributes, AttributeValue, Severity, TelemetryKind};
use serde::{Deserialize, Serialize};

use crate::templating::render_config;
use crate::{ConfigFormat, serde_duration, validate_identifier};

pub const SUPPORTED_CONFIG_VERSIONS: &[&str] = &["0.3"];

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4318))
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_receiver_queue_capacity() -> usize {
    64
}

fn default_receiver_num_shards() -> usize {
    4
}

fn default_exporter_queue_capacity() -> usize {
    64
}

fn default_exporter_num_shards() -> usize {
    2
}

fn default_exporter_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_unhealthy_threshold() -> usize {
    3
}

fn default_metric_expiration() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_memory_max_items() -> usize {
    10_000
}

fn default_max_batch_size() -> usize {
    512
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

/// Retry policy of an exporter or of the exporter client.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay", with = "serde_duration")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "serde_duration")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryConfig {
    pub fn retry_params(&self) -> RetryParams {
        RetryParams {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            max_attempts: self.max_attempts,
        }
    }

    pub(crate) fn validate(&self, label: &str) -> anyhow::Result<()> {
        ensure!(
            self.max_attempts > 0,
            "{label}: `retry.max_attempts` must be greater than zero"
        );
        ensure!(
            self.base_delay <= self.max_delay,
            "{label}: `retry.base_delay` must not exceed `retry.max_delay`"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverConfig {
    /// Capacity, in batches, of each processing shard queue.
    #[serde(default = "default_receiver_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_receiver_num_shards")]
    pub num_shards: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            queue_capacity: default_receiver_queue_capacity(),
            num_shards: default_receiver_num_shards(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
    Resource(ResourceProcessorConfig),
    Attributes(AttributesProcessorConfig),
    Filter(FilterProcessorConfig),
    Batch(BatchProcessorConfig),
}

impl ProcessorConfig {
    pub fn processor_type(&self) -> &'static str {
        match self {
            ProcessorConfig::Resource(_) => "resource",
            ProcessorConfig::Attributes(_) => "attributes",
            ProcessorConfig::Filter(_) => "filter",
            ProcessorConfig::Batch(_) => "batch",
        }
    }
}

/// Stamps the producer identity, plus static attributes, on every item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceProcessorConfig {
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum AttributeAction {
    /// Sets the attribute only if it is absent.
    Insert { key: String, value: AttributeValue },
    /// Sets the attribute, overwriting any existing value.
    Upsert { key: String, value: AttributeValue },
    Delete { key: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributesProcessorConfig {
    #[serde(default)]
    pub actions: Vec<AttributeAction>,
    #[serde(default)]
    pub max_attributes: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterProcessorConfig {
    #[serde(default)]
    pub min_log_severity: Option<Severity>,
    #[serde(default)]
    pub exclude_span_names: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchProcessorConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for BatchProcessorConfig {
    fn default() -> Self {
        BatchProcessorConfig {
            max_batch_size: default_max_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterType {
    Prometheus,
    TracePush,
    LogPush,
    Debug,
    Memory,
}

impl ExporterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExporterType::Prometheus => "prometheus",
            ExporterType::TracePush => "trace_push",
            ExporterType::LogPush => "log_push",
            ExporterType::Debug => "debug",
            ExporterType::Memory => "memory",
        }
    }

    pub fn supports(&self, kind: TelemetryKind) -> bool {
        match self {
            ExporterType::Prometheus => kind == TelemetryKind::Metrics,
            ExporterType::TracePush => kind == TelemetryKind::Traces,
            ExporterType::LogPush => kind == TelemetryKind::Logs,
            ExporterType::Debug | ExporterType::Memory => true,
        }
    }

    fn requires_endpoint(&self) -> bool {
        matches!(self, ExporterType::TracePush | ExporterType::LogPush)
    }
}

/// Transport security of a push exporter.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransportSecurity {
    #[default]
    Insecure,
    Tls {
        #[serde(default)]
        ca_cert_path: Option<PathBuf>,
        #[serde(default)]
        insecure_skip_verify: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    #[serde(rename = "type")]
    pub exporter_type: ExporterType,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tls: TransportSecurity,
    /// Timeout of a single export attempt.
    #[serde(default = "default_exporter_timeout", with = "serde_duration")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_exporter_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_exporter_num_shards")]
    pub num_shards: usize,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: usize,
    /// Prometheus series that were not updated for that long are no longer exposed.
    #[serde(default = "default_metric_expiration", with = "serde_duration")]
    pub metric_expiration: Duration,
    /// Maximum number of items of each kind kept by a memory exporter.
    #[serde(default = "default_memory_max_items")]
    pub max_items: usize,
    /// Static labels attached to every stream by a log push exporter.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Makes the debug exporter log every item instead of a per-batch summary.
    #[serde(default)]
    pub verbose: bool,
}

impl ExporterConfig {
    pub fn new(exporter_type: ExporterType) -> Self {
        ExporterConfig {
            exporter_type,
            endpoint: None,
            tls: TransportSecurity::default(),
            timeout: default_exporter_timeout(),
            retry: RetryConfig::default(),
            queue_capacity: default_exporter_queue_capacity(),
            num_shards: default_exporter_num_shards(),
            unhealthy_threshold: default_unhealthy_threshold(),
            metric_expiration: default_metric_expiration(),
            max_items: default_memory_max_items(),
            labels: BTreeMap::new(),
            verbose: false,
        }
    }

    fn validate(&self, exporter_id: &str) -> anyhow::Result<()> {
        let label = format!("exporter `{exporter_id}`");
        ensure!(self.num_shards > 0, "{label}: `num_shards` must be greater than zero");
        ensure!(
            self.queue_capacity > 0,
            "{label}: `queue_capacity` must be greater than zero"
        );
        ensure!(
            self.unhealthy_threshold > 0,
            "{label}: `unhealthy_threshold` must be greater than zero"
        );
        ensure!(!self.timeout.is_zero(), "{label}: `timeout` must not be zero");
        self.retry.validate(&label)?;

        if self.exporter_type == ExporterType::Memory {
            ensure!(self.max_items > 0, "{label}: `max_items` must be greater than zero");
        }
        if !self.exporter_type.requires_endpoint() {
            if self.endpoint.is_some() {
                bail!(
                    "{label}: exporters of type `{}` do not accept an `endpoint`",
                    self.exporter_type.as_str()
                );
            }
            return Ok(());
        }
        let endpoint = self.endpoint.as_deref().with_context(|| {
            format!(
                "{label}: exporters of type `{}` require an `endpoint`",
                self.exporter_type.as_str()
            )
        })?;
        match &self.tls {
            TransportSecurity::Insecure => ensure!(
                endpoint.starts_with("http://") || endpoint.starts_with("https://"),
                "{label}: endpoint `{endpoint}` must start with `http://` or `https://`"
            ),
            TransportSecurity::Tls { .. } => ensure!(
                endpoint.starts_with("https://"),
                "{label}: endpoint `{endpoint}` must start with `https://` when TLS is enabled"
            ),
        }
        Ok(())
    }
}

/// Ordered processors and exporters of one telemetry kind.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    #[serde(default)]
    pub processors: Vec<String>,
    pub exporters: Vec<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traces: Option<RouteConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RouteConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<RouteConfig>,
}

impl RoutesConfig {
    pub fn route(&self, kind: TelemetryKind) -> Option<&RouteConfig> {
        match kind {
            TelemetryKind::Traces => self.traces.as_ref(),
            TelemetryKind::Metrics => self.metrics.as_ref(),
            TelemetryKind::Logs => self.logs.as_ref(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TelemetryKind, &RouteConfig)> + '_ {
        TelemetryKind::all()
            .into_iter()
            .filter_map(|kind| self.route(kind).map(|route| (kind, route)))
    }
}

/// Receivers, processors, and exporters of a collector, wired per telemetry kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub version: String,
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub processors: BTreeMap<String, ProcessorConfig>,
    pub exporters: BTreeMap<String, ExporterConfig>,
    pub pipelines: RoutesConfig,
    #[serde(default = "default_shutdown_timeout", with = "serde_duration")]
    pub shutdown_timeout: Duration,
}

impl PipelineConfig {
    /// Parses, renders, and validates a pipeline config.
    pub fn load(config_format: ConfigFormat, config_content: &[u8]) -> anyhow::Result<Self> {
        let rendered_config = render_config(config_content)?;
        let pipeline_config: PipelineConfig = config_format.parse(rendered_config.as_bytes())?;
        pipeline_config.validate()?;
        Ok(pipeline_config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !SUPPORTED_CONFIG_VERSIONS.contains(&self.version.as_str()) {
            bail!(
                "config version `{}` is not supported, supported versions are: {}",
                self.version,
                SUPPORTED_CONFIG_VERSIONS.join(", ")
            );
        }
        ensure!(
            self.receiver.num_shards > 0,
            "receiver: `num_shards` must be greater than zero"
        );
        ensure!(
            self.receiver.queue_capacity > 0,
            "receiver: `queue_capacity` must be greater than zero"
        );
        for (processor_id, processor_config) in &self.processors {
            validate_identifier("processor", processor_id)?;

            if let ProcessorConfig::Batch(batch_config) = processor_config {
                ensure!(
                    batch_config.max_batch_size > 0,
                    "processor `{processor_id}`: `max_batch_size` must be greater than zero"
                );
            }
        }
        for (exporter_id, exporter_config) in &self.exporters {
            validate_identifier("exporter", exporter_id)?;
            exporter_config.validate(exporter_id)?;
        }
        let mut num_routes = 0;

        for (kind, route) in self.pipelines.iter() {
            num_routes += 1;

            if route.exporters.is_empty() {
                bail!("pipeline `{kind}` must route to at least one exporter");
            }
            for processor_id in &route.processors {
                if !self.processors.contains_key(processor_id) {
                    bail!("pipeline `{kind}` references unknown processor `{processor_id}`");
                }
            }
            let mut seen_exporter_ids = BTreeSet::new();

            for exporter_id in &route.exporters {
                let exporter_config = self.exporters.get(exporter_id).with_context(|| {
                    format!("pipeline `{kind}` references unknown exporter `{exporter_id}`")
                })?;
                if !exporter_config.exporter_type.supports(kind) {
                    bail!(
                        "exporter `{exporter_id}` of type `{}` cannot export {kind}",
                        exporter_config.exporter_type.as_str()
                    );
                }
                if !seen_exporter_ids.insert(exporter_id) {
                    bail!("pipeline `{kind}` references exporter `{exporter_id}` twice");
                }
            }
        }
        ensure!(num_routes > 0, "at least one pipeline must be configured");
        Ok(())
    }

    /// IDs of the exporters referenced by at least one pipeline.
    pub fn active_exporter_ids(&self) -> BTreeSet<&str> {
        self.pipelines
            .iter()
            .flat_map(|(_, route)| route.exporters.iter().map(String::as_str))
            .collect()
    }

    #[cfg(any(test, feature = "testsuite"))]
    pub fn for_test() -> Self {
        let mut exporters = BTreeMap::new();
        exporters.insert(
            "memory".to_string(),
            ExporterConfig::new(ExporterType::Memory),
        );
        let memory_route = RouteConfig {
            processors: Vec::new(),
            exporters: vec!["memory".to_string()],
        };
        PipelineConfig {
            version: "0.3".to_string(),
            listen_address: default_listen_address(),
            receiver: ReceiverConfig::default(),
            processors: BTreeMap::new(),
            exporters,
            pipelines: RoutesConfig {
                traces: Some(memory_route.clone()),
                metrics: Some(memory_route.clone()),
                logs: Some(memory_route),
            },
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE_CONFIG_YAML: &str = r#"
version: 0.3
listen_address: 0.0.0.0:4318
receiver:
  num_shards: 2
processors:
  resource:
    type: resource
    attributes:
      deployment.environment: dev
  redact:
    type: attributes
    max_attributes: 64
    actions:
      - action: delete
        key: http.request.header.authorization
      - action: insert
        key: collector
        value: otelpipe
  batch:
    type: batch
    max_batch_size: 256
  drop-noise:
    type: filter
    min_log_severity: INFO
    exclude_span_names: [healthcheck]
exporters:
  prometheus:
    type: prometheus
    metric_expiration: 10m
  tempo:
    type: trace_push
    endpoint: ${OTELPIPE_TEST_TEMPO_ENDPOINT:-http://tempo:4318/api/traces}
    timeout: 5s
    retry:
      max_attempts: 3
      base_delay: 100ms
  loki:
    type: log_push
    endpoint: https://loki:3100/loki/api/v1/push
    tls:
      mode: tls
      insecure_skip_verify: true
    labels:
      job: otelpipe
  memory:
    type: memory
    max_items: 1000
pipelines:
  traces:
    processors: [resource, redact, batch]
    exporters: [tempo, memory]
  metrics:
    processors: [resource]
    exporters: [prometheus]
  logs:
    processors: [resource, drop-noise]
    exporters: [loki, memory]
shutdown_timeout: 15s
"#;

    #[test]
    fn test_load_pipeline_config_yaml() {
        let pipeline_config =
            PipelineConfig::load(ConfigFormat::Yaml, PIPELINE_CONFIG_YAML.as_bytes()).unwrap();
        assert_eq!(pipeline_config.version, "0.3");
        assert_eq!(
            pipeline_config.listen_address,
            "0.0.0.0:4318".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(pipeline_config.receiver.num_shards, 2);
        assert_eq!(pipeline_config.receiver.queue_capacity, 64);
        assert_eq!(pipeline_config.shutdown_timeout, Duration::from_secs(15));

        let tempo_config = &pipeline_config.exporters["tempo"];
        assert_eq!(tempo_config.exporter_type, ExporterType::TracePush);
        assert_eq!(
            tempo_config.endpoint.as_deref(),
            Some("http://tempo:4318/api/traces")
        );
        assert_eq!(tempo_config.timeout, Duration::from_secs(5));
        assert_eq!(tempo_config.retry.max_attempts, 3);
        assert_eq!(tempo_config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(tempo_config.retry.max_delay, Duration::from_secs(10));
        assert_eq!(tempo_config.tls, TransportSecurity::Insecure);

        let loki_config = &pipeline_config.exporters["loki"];
        assert_eq!(
            loki_config.tls,
            TransportSecurity::Tls {
                ca_cert_path: None,
                insecure_skip_verify: true
            }
        );
        assert_eq!(loki_config.labels["job"], "otelpipe");
        assert_eq!(
            pipeline_config.exporters["prometheus"].metric_expiration,
            Duration::from_secs(600)
        );

        let traces_route = pipeline_config
            .pipelines
            .route(TelemetryKind::Traces)
            .unwrap();
        assert_eq!(traces_route.processors, ["resource", "redact", "batch"]);
        assert_eq!(traces_route.exporters, ["tempo", "memory"]);

        let ProcessorConfig::Attributes(attributes_config) = &pipeline_config.processors["redact"]
        else {
            panic!("expected attributes processor");
        };
        assert_eq!(attributes_config.max_attributes, Some(64));
        assert_eq!(
            attributes_config.actions[1],
            AttributeAction::Insert {
                key: "collector".to_string(),
                value: AttributeValue::from("otelpipe"),
            }
        );
        let ProcessorConfig::Filter(filter_config) = &pipeline_config.processors["drop-noise"]
        else {
            panic!("expected filter processor");
        };
        assert_eq!(filter_config.min_log_severity, Some(Severity::Info));
        assert!(filter_config.exclude_span_names.contains("healthcheck"));

        assert_eq!(
            pipeline_config.active_exporter_ids().into_iter().collect::<Vec<_>>(),
            ["loki", "memory", "prometheus", "tempo"]
        );
    }

    #[test]
    fn test_load_pipeline_config_json_and_toml() {
        let config_json = r#"{
            // Comments are allowed.
            "version": "0.3",
            "exporters": {"memory": {"type": "memory"}},
            "pipelines": {"logs": {"exporters": ["memory"]}}
        }"#;
        let pipeline_config =
            PipelineConfig::load(ConfigFormat::Json, config_json.as_bytes()).unwrap();
        assert_eq!(pipeline_config.listen_address.port(), 4318);
        assert!(pipeline_config.pipelines.route(TelemetryKind::Logs).is_some());
        assert!(pipeline_config.pipelines.route(TelemetryKind::Traces).is_none());

        let config_toml = r#"
            version = "0.3"
            [exporters.debug]
            type = "debug"
            verbose = true
            [pipelines.traces]
            exporters = ["debug"]
        "#;
        let pipeline_config =
            PipelineConfig::load(ConfigFormat::Toml, config_toml.as_bytes()).unwrap();
        assert!(pipeline_config.exporters["debug"].verbose);
    }

    fn assert_invalid(config_yaml: &str, expected_error: &str) {
        let error = PipelineConfig::load(ConfigFormat::Yaml, config_yaml.as_bytes()).unwrap_err();
        let error_msg = format!("{error:#}");
        assert!(
            error_msg.contains(expected_error),
            "`{error_msg}` does not contain `{expected_error}`"
        );
    }

    #[test]
    fn test_pipeline_config_validation_errors() {
        assert_invalid(
            "version: 0.1\nexporters: {}\npipelines: {}",
            "not supported",
        );
        assert_invalid(
            "version: 0.3\nexporters: {memory: {type: memory}}\npipelines: {}",
            "at least one pipeline",
        );
        assert_invalid(
            "version: 0.3\nexporters: {memory: {type: memory}}\npipelines: {logs: {exporters: [loki]}}",
            "unknown exporter `loki`",
        );
        assert_invalid(
            "version: 0.3\nexporters: {prometheus: {type: prometheus}}\npipelines: {logs: {exporters: [prometheus]}}",
            "cannot export logs",
        );
        assert_invalid(
            "version: 0.3\nexporters: {tempo: {type: trace_push}}\npipelines: {traces: {exporters: [tempo]}}",
            "require an `endpoint`",
        );
        assert_invalid(
            "version: 0.3\nexporters: {tempo: {type: trace_push, endpoint: 'http://tempo', tls: {mode: tls}}}\npipelines: {traces: {exporters: [tempo]}}",
            "must start with `https://`",
        );
        assert_invalid(
            "version: 0.3\nexporters: {memory: {type: memory}}\npipelines: {traces: {processors: [batch], exporters: [memory]}}",
            "unknown processor `batch`",
        );
        assert_invalid(
            "version: 0.3\nexporters: {memory: {type: memory, num_shards: 0}}\npipelines: {traces: {exporters: [memory]}}",
            "`num_shards` must be greater than zero",
        );
        assert_invalid(
            "version: 0.3\nexporters: {memory: {type: memory, colour: blue}}\npipelines: {traces: {exporters: [memory]}}",
            "unknown field",
        );
        assert_invalid(
            "version: 0.3\nexporters: {m: {type: memory}}\npipelines: {traces: {exporters: [m]}}",
            "identifier `m` is invalid",
        );
    }

    #[test]
    fn test_pipeline_config_for_test_is_valid() {
        PipelineConfig::for_test().validate().unwrap();
    }
}
