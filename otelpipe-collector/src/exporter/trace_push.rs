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
use otelpipe_proto::{PipelineResult, Span, TelemetryBatch, TraceId, ValidationError};
use serde::Serialize;

use super::ExportResponse;
use super::http_client::{build_http_client, post_json};

#[derive(Debug, Serialize)]
struct TraceGroup<'a> {
    trace_id: TraceId,
    spans: Vec<&'a Span>,
}

#[derive(Debug, Serialize)]
struct TracePushRequest<'a> {
    traces: Vec<TraceGroup<'a>>,
}

fn group_by_trace_id(spans: &[Span]) -> TracePushRequest<'_> {
    let mut spans_by_trace_id: BTreeMap<TraceId, Vec<&Span>> = BTreeMap::new();

    for span in spans {
        spans_by_trace_id.entry(span.trace_id).or_default().push(span);
    }
    let traces = spans_by_trace_id
        .into_iter()
        .map(|(trace_id, spans)| TraceGroup { trace_id, spans })
        .collect();
    TracePushRequest { traces }
}

/// Pushes completed spans, grouped by trace ID, to a trace store as JSON.
#[derive(Clone)]
pub struct TracePushExporter {
    http_client: reqwest::Client,
    endpoint: String,
}

impl TracePushExporter {
    pub fn from_config(exporter_id: &str, exporter_config: &ExporterConfig) -> anyhow::Result<Self> {
        let http_client = build_http_client(exporter_id, exporter_config)?;
        let endpoint = exporter_config.endpoint.clone().unwrap_or_default();
        Ok(TracePushExporter {
            http_client,
            endpoint,
        })
    }

    pub(crate) async fn export(&self, batch: &TelemetryBatch) -> PipelineResult<ExportResponse> {
        let TelemetryBatch::Traces(spans) = batch else {
            return Err(ValidationError::new(format!(
                "trace push exporters only accept traces, got {}",
                batch.kind()
            ))
            .into());
        };
        let trace_push_request = group_by_trace_id(spans);
        post_json(&self.http_client, &self.endpoint, &trace_push_request).await?;
        Ok(ExportResponse::all_accepted(spans.len()))
    }
}
