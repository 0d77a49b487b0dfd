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

use std::sync::Mutex;

use otelpipe_proto::{LogRecord, MetricPoint, Span};

/// Destination of completed telemetry. Implementations must not block the caller.
pub trait TelemetrySink: Send + Sync + 'static {
    fn send_span(&self, span: Span);

    fn send_metric(&self, metric_point: MetricPoint);

    fn send_log(&self, log_record: LogRecord);
}

/// Keeps everything it receives in memory.
#[derive(Default)]
pub struct MemorySink {
    spans: Mutex<Vec<Span>>,
    metric_points: Mutex<Vec<MetricPoint>>,
    log_records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().map(|spans| spans.clone()).unwrap_or_default()
    }

    pub fn metric_points(&self) -> Vec<MetricPoint> {
        self.metric_points
            .lock()
            .map(|metric_points| metric_points.clone())
            .unwrap_or_default()
    }

    pub fn log_records(&self) -> Vec<LogRecord> {
        self.log_records
            .lock()
            .map(|log_records| log_records.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for MemorySink {
    fn send_span(&self, span: Span) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span);
        }
    }

    fn send_metric(&self, metric_point: MetricPoint) {
        if let Ok(mut metric_points) = self.metric_points.lock() {
            metric_points.push(metric_point);
        }
    }

    fn send_log(&self, log_record: LogRecord) {
        if let Ok(mut log_records) = self.log_records.lock() {
            log_records.push(log_record);
        }
    }
}
