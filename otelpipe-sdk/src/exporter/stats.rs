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

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub(crate) struct ClientCounters {
    pub num_enqueued_items: AtomicU64,
    pub num_dropped_items: AtomicU64,
    pub num_buffered_items: AtomicU64,
    pub num_sent_batches: AtomicU64,
    pub num_sent_items: AtomicU64,
    pub num_rejected_items: AtomicU64,
    pub num_failed_batches: AtomicU64,
    pub num_failed_items: AtomicU64,
    pub num_discarded_items: AtomicU64,
}

impl ClientCounters {
    pub fn incr(counter: &AtomicU64, delta: u64) {
        counter.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn decr(counter: &AtomicU64, delta: u64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
            Some(value.saturating_sub(delta))
        });
    }

    pub fn snapshot(&self) -> ExporterClientStats {
        ExporterClientStats {
            num_enqueued_items: self.num_enqueued_items.load(Ordering::Relaxed),
            num_dropped_items: self.num_dropped_items.load(Ordering::Relaxed),
            num_buffered_items: self.num_buffered_items.load(Ordering::Relaxed),
            num_sent_batches: self.num_sent_batches.load(Ordering::Relaxed),
            num_sent_items: self.num_sent_items.load(Ordering::Relaxed),
            num_rejected_items: self.num_rejected_items.load(Ordering::Relaxed),
            num_failed_batches: self.num_failed_batches.load(Ordering::Relaxed),
            num_failed_items: self.num_failed_items.load(Ordering::Relaxed),
            num_discarded_items: self.num_discarded_items.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of an exporter client, all kinds combined.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct ExporterClientStats {
    pub num_enqueued_items: u64,
    /// Items evicted from a full intake queue.
    pub num_dropped_items: u64,
    /// Items waiting in an intake queue or in a batch not yet acknowledged.
    pub num_buffered_items: u64,
    pub num_sent_batches: u64,
    pub num_sent_items: u64,
    pub num_rejected_items: u64,
    pub num_failed_batches: u64,
    pub num_failed_items: u64,
    /// Items pushed after shutdown started, or still buffered when the shutdown timeout elapsed.
    pub num_discarded_items: u64,
}
