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

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::log::LogRecord;
use crate::metric::MetricPoint;
use crate::span::Span;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Traces,
    Metrics,
    Logs,
}

impl TelemetryKind {
    pub fn all() -> [TelemetryKind; 3] {
        [
            TelemetryKind::Traces,
            TelemetryKind::Metrics,
            TelemetryKind::Logs,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Traces => "traces",
            TelemetryKind::Metrics => "metrics",
            TelemetryKind::Logs => "logs",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryKind {
    type Err = String;

    fn from_str(kind_str: &str) -> Result<Self, Self::Err> {
        match kind_str {
            "traces" => Ok(TelemetryKind::Traces),
            "metrics" => Ok(TelemetryKind::Metrics),
            "logs" => Ok(TelemetryKind::Logs),
            _ => Err(format!(
                "unknown telemetry kind `{kind_str}`, expected one of `traces`, `metrics`, `logs`"
            )),
        }
    }
}

/// An ordered sequence of items of a single telemetry kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum TelemetryBatch {
    Traces(Vec<Span>),
    Metrics(Vec<MetricPoint>),
    Logs(Vec<LogRecord>),
}

impl TelemetryBatch {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryBatch::Traces(_) => TelemetryKind::Traces,
            TelemetryBatch::Metrics(_) => TelemetryKind::Metrics,
            TelemetryBatch::Logs(_) => TelemetryKind::Logs,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TelemetryBatch::Traces(spans) => spans.len(),
            TelemetryBatch::Metrics(points) => points.len(),
            TelemetryBatch::Logs(log_records) => log_records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn empty(kind: TelemetryKind) -> Self {
        match kind {
            TelemetryKind::Traces => TelemetryBatch::Traces(Vec::new()),
            TelemetryKind::Metrics => TelemetryBatch::Metrics(Vec::new()),
            TelemetryKind::Logs => TelemetryBatch::Logs(Vec::new()),
        }
    }

    /// Splits the batch into consecutive batches of at most `max_size` items, preserving order.
    pub fn split_into_chunks(self, max_size: usize) -> Vec<TelemetryBatch> {
        let max_size = max_size.max(1);
        if self.len() <= max_size {
            return vec![self];
        }
        match self {
            TelemetryBatch::Traces(spans) => chunk(spans, max_size, TelemetryBatch::Traces),
            TelemetryBatch::Metrics(points) => chunk(points, max_size, TelemetryBatch::Metrics),
            TelemetryBatch::Logs(log_records) => chunk(log_records, max_size, TelemetryBatch::Logs),
        }
    }

    /// Validates every item, keeping the valid ones. Returns one status per original item, in
    /// order.
    pub fn retain_valid(&mut self) -> Vec<ItemStatus> {
        match self {
            TelemetryBatch::Traces(spans) => retain_valid(spans, Span::validate),
            TelemetryBatch::Metrics(points) => retain_valid(points, MetricPoint::validate),
            TelemetryBatch::Logs(log_records) => retain_valid(log_records, LogRecord::validate),
        }
    }
}

fn chunk<T>(
    items: Vec<T>,
    max_size: usize,
    into_batch: fn(Vec<T>) -> TelemetryBatch,
) -> Vec<TelemetryBatch> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(max_size));
    let mut current_chunk = Vec::with_capacity(max_size);

    for item in items {
        current_chunk.push(item);

        if current_chunk.len() == max_size {
            chunks.push(into_batch(std::mem::replace(
                &mut current_chunk,
                Vec::with_capacity(max_size),
            )));
        }
    }
    if !current_chunk.is_empty() {
        chunks.push(into_batch(current_chunk));
    }
    chunks
}

fn retain_valid<T>(
    items: &mut Vec<T>,
    validate: fn(&T) -> Result<(), ValidationError>,
) -> Vec<ItemStatus> {
    let mut item_statuses = Vec::with_capacity(items.len());
    items.retain(|item| match validate(item) {
        Ok(()) => {
            item_statuses.push(ItemStatus::Accepted);
            true
        }
        Err(validation_error) => {
            item_statuses.push(ItemStatus::Rejected {
                reason: validation_error.0,
            });
            false
        }
    });
    item_statuses
}

/// A telemetry item that can be buffered on its own and later assembled into a batch.
pub trait TelemetryItem: Sized + Send + 'static {
    const KIND: TelemetryKind;

    fn into_batch(items: Vec<Self>) -> TelemetryBatch;
}

impl TelemetryItem for Span {
    const KIND: TelemetryKind = TelemetryKind::Traces;

    fn into_batch(items: Vec<Self>) -> TelemetryBatch {
        TelemetryBatch::Traces(items)
    }
}

impl TelemetryItem for MetricPoint {
    const KIND: TelemetryKind = TelemetryKind::Metrics;

    fn into_batch(items: Vec<Self>) -> TelemetryBatch {
        TelemetryBatch::Metrics(items)
    }
}

impl TelemetryItem for LogRecord {
    const KIND: TelemetryKind = TelemetryKind::Logs;

    fn into_batch(items: Vec<Self>) -> TelemetryBatch {
        TelemetryBatch::Logs(items)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProducerIdentity {
    pub service_name: String,
    pub instance_id: String,
}

impl ProducerIdentity {
    pub fn new(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        ProducerIdentity {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for ProducerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_name, self.instance_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub producer: ProducerIdentity,
    pub batch: TelemetryBatch,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Accepted,
    Rejected { reason: String },
}

impl ItemStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ItemStatus::Accepted)
    }
}

/// Per-item acknowledgment, in the order of the items of the request.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub item_statuses: Vec<ItemStatus>,
}

impl IngestResponse {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TraceId;
    use crate::log::Severity;

    #[test]
    fn test_split_into_chunks_preserves_order() {
        let log_records: Vec<LogRecord> = (0..5)
            .map(|i| LogRecord::new(Severity::Info, format!("log-{i}")))
            .collect();
        let chunks = TelemetryBatch::Logs(log_records).split_into_chunks(2);
        let chunk_bodies: Vec<Vec<String>> = chunks
            .into_iter()
            .map(|chunk| match chunk {
                TelemetryBatch::Logs(log_records) => log_records
                    .into_iter()
                    .map(|log_record| log_record.body)
                    .collect(),
                _ => panic!("expected logs"),
            })
            .collect();
        assert_eq!(
            chunk_bodies,
            vec![
                vec!["log-0".to_string(), "log-1".to_string()],
                vec!["log-2".to_string(), "log-3".to_string()],
                vec!["log-4".to_string()],
            ]
        );
    }

    #[test]
    fn test_split_into_chunks_small_batch() {
        let batch = TelemetryBatch::empty(TelemetryKind::Metrics);
        let chunks = batch.split_into_chunks(0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_retain_valid_keeps_siblings() {
        let trace_id = TraceId::random();
        let mut invalid_span = Span::for_test("invalid", trace_id, None);
        invalid_span.end_timestamp_nanos = 0;
        let mut batch = TelemetryBatch::Traces(vec![
            Span::for_test("first", trace_id, None),
            invalid_span,
            Span::for_test("third", trace_id, None),
        ]);
        let item_statuses = batch.retain_valid();
        assert_eq!(item_statuses.len(), 3);
        assert!(item_statuses[0].is_accepted());
        assert!(!item_statuses[1].is_accepted());
        assert!(item_statuses[2].is_accepted());
        assert_eq!(batch.len(), 2);

        let response = IngestResponse { item_statuses };
        assert_eq!(response.num_accepted(), 2);
        assert_eq!(response.num_rejected(), 1);
    }

    #[test]
    fn test_ingest_request_serde() {
        let request_json = r#"{
            "producer": {"service_name": "service-a", "instance_id": "a-1"},
            "batch": {"kind": "metrics", "items": [
                {"name": "hits", "kind": "counter", "value": 1, "timestamp_nanos": 7}
            ]}
        }"#;
        let request: IngestRequest = serde_json::from_str(request_json).unwrap();
        assert_eq!(request.producer.to_string(), "service-a/a-1");
        assert_eq!(request.batch.kind(), TelemetryKind::Metrics);
        assert_eq!(request.batch.len(), 1);

        let response_json = serde_json::to_value(IngestResponse {
            item_statuses: vec![
                ItemStatus::Accepted,
                ItemStatus::Rejected {
                    reason: "bad".to_string(),
                },
            ],
        })
        .unwrap();
        assert_eq!(
            response_json,
            serde_json::json!({"item_statuses": [
                {"status": "accepted"},
                {"status": "rejected", "reason": "bad"}
            ]})
        );
    }
}
