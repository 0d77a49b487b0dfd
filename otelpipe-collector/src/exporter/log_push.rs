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

use std::collections::BTreeMap;

use otelpipe_config::ExporterConfig;
use otelpipe_proto::{LogRecord, PipelineResult, TelemetryBatch, ValidationError};
use serde::Serialize;

use super::ExportResponse;
use super::http_client::{build_http_client, post_json};

const SERVICE_NAME_LABEL: &str = "service_name";
const SEVERITY_LABEL: &str = "severity";
const UNKNOWN_SERVICE_NAME: &str = "unknown_service";

type StreamLabels = BTreeMap<String, String>;

/// `[timestamp in nanoseconds, line, structured metadata]`
type StreamValue<'a> = (String, &'a str, BTreeMap<String, String>);

#[derive(Debug, Serialize)]
struct Stream<'a> {
    stream: StreamLabels,
    values: Vec<StreamValue<'a>>,
}

#[derive(Debug, Serialize)]
struct LogPushRequest<'a> {
    streams: Vec<Stream<'a>>,
}

/// Pushes log records to a Loki-compatible log store. Records are grouped into streams by label
/// set, the correlation identifiers travel with each line.
#[derive(Clone)]
pub struct LogPushExporter {
    http_client: reqwest::Client,
    endpoint: String,
    static_labels: StreamLabels,
}

impl LogPushExporter {
    pub fn from_config(exporter_id: &str, exporter_config: &ExporterConfig) -> anyhow::Result<Self> {
        let http_client = build_http_client(exporter_id, exporter_config)?;
        let endpoint = exporter_config.endpoint.clone().unwrap_or_default();
        Ok(LogPushExporter {
            http_client,
            endpoint,
            static_labels: exporter_config.labels.clone(),
        })
    }

    fn stream_labels(&self, log_record: &LogRecord) -> StreamLabels {
        let mut stream_labels = self.static_labels.clone();
        let service_name = log_record.service_name().unwrap_or(UNKNOWN_SERVICE_NAME);
        stream_labels.insert(SERVICE_NAME_LABEL.to_string(), service_name.to_string());
        stream_labels.insert(
            SEVERITY_LABEL.to_string(),
            log_record.severity.as_str().to_ascii_lowercase(),
        );
        stream_labels
    }

    fn build_request<'a>(&self, log_records: &'a [LogRecord]) -> LogPushRequest<'a> {
        let mut values_by_labels: BTreeMap<StreamLabels, Vec<StreamValue<'a>>> = BTreeMap::new();

        for log_record in log_records {
            let mut structured_metadata: BTreeMap<String, String> = log_record
                .attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect();
            if let Some(trace_id) = log_record.trace_id {
                structured_metadata.insert("trace_id".to_string(), trace_id.to_hex());
            }
            if let Some(span_id) = log_record.span_id {
                structured_metadata.insert("span_id".to_string(), span_id.to_hex());
            }
            let stream_value = (
                log_record.timestamp_nanos.to_string(),
                log_record.body.as_str(),
                structured_metadata,
            );
            values_by_labels
                .entry(self.stream_labels(log_record))
                .or_default()
                .push(stream_value);
        }
        let streams = values_by_labels
            .into_iter()
            .map(|(stream, values)| Stream { stream, values })
            .collect();
        LogPushRequest { streams }
    }

    pub(crate) async fn export(&self, batch: &TelemetryBatch) -> PipelineResult<ExportResponse> {
        let TelemetryBatch::Logs(log_records) = batch else {
            return Err(ValidationError::new(format!(
                "log push exporters only accept logs, got {}",
                batch.kind()
            ))
            .into());
        };
        let log_push_request = self.build_request(log_records);
        post_json(&self.http_client, &self.endpoint, &log_push_request).await?;
        Ok(ExportResponse::all_accepted(log_records.len()))
    }
}
