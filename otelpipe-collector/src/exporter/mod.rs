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

mod debug;
mod http_client;
mod log_push;
mod memory;
mod prometheus_exporter;
mod trace_push;

use async_trait::async_trait;
use otelpipe_config::{ExporterConfig, ExporterType};
use otelpipe_proto::{ItemStatus, PipelineResult, TelemetryBatch};

pub use self::debug::DebugExporter;
pub use self::log_push::LogPushExporter;
pub use self::memory::MemoryExporter;
pub use self::prometheus_exporter::PrometheusExporter;
pub use self::trace_push::TracePushExporter;

/// Per-item outcome of an export.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExportResponse {
    pub item_statuses: Vec<ItemStatus>,
}

impl ExportResponse {
    pub fn all_accepted(num_items: usize) -> Self {
        ExportResponse {
            item_statuses: vec![ItemStatus::Accepted; num_items],
        }
    }

    pub fn num_accepted(&self) -> usize {
        self.item_statuses
            .iter()
            .filter(|item_status| item_status.is_accepted())
            .count()
    }

    pub fn num_rejected(&self) -> usize {
        self.item_statuses.len() - self.num_accepted()
    }
}

/// Delivers a batch to a backend.
#[cfg_attr(any(test, feature = "testsuite"), mockall::automock)]
#[async_trait]
pub trait Export: Send + Sync + 'static {
    async fn export(&self, batch: &TelemetryBatch) -> PipelineResult<ExportResponse>;
}

/// The exporters a pipeline can be configured with.
pub enum Exporter {
    Prometheus(PrometheusExporter),
    TracePush(TracePushExporter),
    LogPush(LogPushExporter),
    Debug(DebugExporter),
    Memory(MemoryExporter),
    #[cfg(any(test, feature = "testsuite"))]
    Mock(MockExport),
}

impl Exporter {
    pub fn from_config(exporter_id: &str, exporter_config: &ExporterConfig) -> anyhow::Result<Self> {
        let exporter = match exporter_config.exporter_type {
            ExporterType::Prometheus => {
                Exporter::Prometheus(PrometheusExporter::new(exporter_config.metric_expiration))
            }
            ExporterType::TracePush => {
                Exporter::TracePush(TracePushExporter::from_config(exporter_id, exporter_config)?)
            }
            ExporterType::LogPush => {
                Exporter::LogPush(LogPushExporter::from_config(exporter_id, exporter_config)?)
            }
            ExporterType::Debug => {
                Exporter::Debug(DebugExporter::new(exporter_id, exporter_config.verbose))
            }
            ExporterType::Memory => Exporter::Memory(MemoryExporter::new(exporter_config.max_items)),
        };
        Ok(exporter)
    }

    pub fn exporter_type(&self) -> &'static str {
        match self {
            Exporter::Prometheus(_) => ExporterType::Prometheus.as_str(),
            Exporter::TracePush(_) => ExporterType::TracePush.as_str(),
            Exporter::LogPush(_) => ExporterType::LogPush.as_str(),
            Exporter::Debug(_) => ExporterType::Debug.as_str(),
            Exporter::Memory(_) => ExporterType::Memory.as_str(),
            #[cfg(any(test, feature = "testsuite"))]
            Exporter::Mock(_) => "mock",
        }
    }

    pub fn as_prometheus(&self) -> Option<&PrometheusExporter> {
        match self {
            Exporter::Prometheus(prometheus_exporter) => Some(prometheus_exporter),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryExporter> {
        match self {
            Exporter::Memory(memory_exporter) => Some(memory_exporter),
            _ => None,
        }
    }
}

#[async_trait]
impl Export for Exporter {
    async fn export(&self, batch: &TelemetryBatch) -> PipelineResult<ExportResponse> {
        match self {
            Exporter::Prometheus(prometheus_exporter) => prometheus_exporter.export(batch),
            Exporter::TracePush(trace_push_exporter) => trace_push_exporter.export(batch).await,
            Exporter::LogPush(log_push_exporter) => log_push_exporter.export(batch).await,
            Exporter::Debug(debug_exporter) => Ok(debug_exporter.export(batch)),
            Exporter::Memory(memory_exporter) => Ok(memory_exporter.export(batch)),
            #[cfg(any(test, feature = "testsuite"))]
            Exporter::Mock(mock_export) => mock_export.export(batch).await,
        }
    }
}
