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

use otelpipe_proto::TelemetryBatch;
use tracing::info;

use super::ExportResponse;

/// Writes what it receives to the collector's own log.
#[derive(Debug, Clone)]
pub struct DebugExporter {
    exporter_id: String,
    verbose: bool,
}

impl DebugExporter {
    pub fn new(exporter_id: impl Into<String>, verbose: bool) -> Self {
        DebugExporter {
            exporter_id: exporter_id.into(),
            verbose,
        }
    }

    pub(crate) fn export(&self, batch: &TelemetryBatch) -> ExportResponse {
        info!(
            exporter_id=%self.exporter_id,
            kind=%batch.kind(),
            num_items=%batch.len(),
            "received batch"
        );
        if self.verbose {
            match batch {
                TelemetryBatch::Traces(spans) => {
                    for span in spans {
                        info!(
                            exporter_id=%self.exporter_id,
                            trace_id=%span.trace_id,
                            span_id=%span.span_id,
                            name=%span.name,
                            duration_ms=%span.duration().as_millis(),
                            "span"
                        );
                    }
                }
                TelemetryBatch::Metrics(metric_points) => {
                    for metric_point in metric_points {
                        info!(
                            exporter_id=%self.exporter_id,
                            name=%metric_point.name,
                            kind=%metric_point.kind.as_str(),
                            labels=?metric_point.labels,
                            value=?metric_point.value,
                            "metric point"
                        );
                    }
                }
                TelemetryBatch::Logs(log_records) => {
                    for log_record in log_records {
                        info!(
                            exporter_id=%self.exporter_id,
                            severity=%log_record.severity,
                            trace_id=?log_record.trace_id,
                            span_id=?log_record.span_id,
                            body=%log_record.body,
                            "log record"
                        );
                    }
                }
            }
        }
        ExportResponse::all_accepted(batch.len())
    }
}
