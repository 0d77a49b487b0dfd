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

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use otelpipe_proto::{LogRecord, MetricPoint, Span, TelemetryBatch, TraceId};

use super::ExportResponse;

#[derive(Default)]
struct MemoryStore {
    spans: VecDeque<Span>,
    log_records: VecDeque<LogRecord>,
    metric_points: VecDeque<MetricPoint>,
}

fn push_bounded<T: Clone>(queue: &mut VecDeque<T>, items: &[T], max_items: usize) {
    queue.extend(items.iter().cloned());

    if queue.len() > max_items {
        let num_evicted_items = queue.len() - max_items;
        queue.drain(..num_evicted_items);
    }
}

/// Keeps the most recent `max_items` items of each kind in memory, queryable by trace ID.
#[derive(Clone)]
pub struct MemoryExporter {
    memory_store: Arc<Mutex<MemoryStore>>,
    max_items: usize,
}

impl MemoryExporter {
    pub fn new(max_items: usize) -> Self {
        MemoryExporter {
            memory_store: Arc::default(),
            max_items,
        }
    }

    fn lock_memory_store(&self) -> MutexGuard<'_, MemoryStore> {
        self.memory_store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn export(&self, batch: &TelemetryBatch) -> ExportResponse {
        let mut memory_store = self.lock_memory_store();

        match batch {
            TelemetryBatch::Traces(spans) => {
                push_bounded(&mut memory_store.spans, spans, self.max_items)
            }
            TelemetryBatch::Logs(log_records) => {
                push_bounded(&mut memory_store.log_records, log_records, self.max_items)
            }
            TelemetryBatch::Metrics(metric_points) => {
                push_bounded(&mut memory_store.metric_points, metric_points, self.max_items)
            }
        }
        ExportResponse::all_accepted(batch.len())
    }

    pub fn spans(&self) -> Vec<Span> {
        self.lock_memory_store().spans.iter().cloned().collect()
    }

    pub fn spans_by_trace_id(&self, trace_id: TraceId) -> Vec<Span> {
        self.lock_memory_store()
            .spans
            .iter()
            .filter(|span| span.trace_id == trace_id)
            .cloned()
            .collect()
    }

    pub fn log_records(&self) -> Vec<LogRecord> {
        self.lock_memory_store()
            .log_records
            .iter()
            .cloned()
            .collect()
    }

    pub fn log_records_by_trace_id(&self, trace_id: TraceId) -> Vec<LogRecord> {
        self.lock_memory_store()
            .log_records
            .iter()
            .filter(|log_record| log_record.trace_id == Some(trace_id))
            .cloned()
            .collect()
    }

    pub fn metric_points(&self) -> Vec<MetricPoint> {
        self.lock_memory_store()
            .metric_points
            .iter()
            .cloned()
            .collect()
    }
}
