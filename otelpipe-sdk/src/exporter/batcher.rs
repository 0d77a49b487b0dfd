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

use std::sync::Arc;
use std::time::Duration;

use otelpipe_common::retry::{RetryParams, retry};
use otelpipe_proto::{IngestRequest, ProducerIdentity, TelemetryItem};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::stats::ClientCounters;
use super::transport::CollectorTransport;
use crate::metrics::SDK_METRICS;

/// Accumulates the items of one telemetry kind and delivers them as batches, one at a time, so
/// batches reach the collector in enqueue order.
pub(crate) struct Batcher<T> {
    pub receiver: flume::Receiver<T>,
    pub producer: ProducerIdentity,
    pub transport: Arc<dyn CollectorTransport>,
    pub max_batch_size: usize,
    pub max_batch_age: Duration,
    pub retry_params: RetryParams,
    pub counters: Arc<ClientCounters>,
    pub cancellation_token: CancellationToken,
}

impl<T: TelemetryItem> Batcher<T> {
    pub async fn run(self) {
        let mut batch: Vec<T> = Vec::with_capacity(self.max_batch_size);
        // Set when the first item of the current batch arrives.
        let mut flush_deadline_opt: Option<Instant> = None;

        loop {
            let flush_deadline = flush_deadline_opt.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                _ = sleep_until(flush_deadline), if flush_deadline_opt.is_some() => {
                    debug!(kind=%T::KIND, num_items=batch.len(), "flushing batch on max age");
                    self.flush(&mut batch).await;
                    flush_deadline_opt = None;
                }
                recv_result = self.receiver.recv_async() => {
                    let Ok(item) = recv_result else {
                        break;
                    };
                    if batch.is_empty() {
                        flush_deadline_opt = Some(Instant::now() + self.max_batch_age);
                    }
                    batch.push(item);

                    if batch.len() >= self.max_batch_size {
                        debug!(kind=%T::KIND, num_items=batch.len(), "flushing batch on max size");
                        self.flush(&mut batch).await;
                        flush_deadline_opt = None;
                    }
                }
            }
        }
        // Final flush of everything buffered at shutdown.
        while let Ok(item) = self.receiver.try_recv() {
            batch.push(item);

            if batch.len() >= self.max_batch_size {
                self.flush(&mut batch).await;
            }
        }
        self.flush(&mut batch).await;
    }

    async fn flush(&self, batch: &mut Vec<T>) {
        if batch.is_empty() {
            return;
        }
        let items = std::mem::replace(batch, Vec::with_capacity(self.max_batch_size));
        let num_items = items.len() as u64;
        let kind_label = T::KIND.as_str();
        let ingest_request = IngestRequest {
            producer: self.producer.clone(),
            batch: T::into_batch(items),
        };
        let send_result = retry(&self.retry_params, |_| {
            self.transport.send(ingest_request.clone())
        })
        .await;

        match send_result {
            Ok(ingest_response) => {
                let num_accepted = ingest_response.num_accepted() as u64;
                let num_rejected = ingest_response.num_rejected() as u64;

                ClientCounters::incr(&self.counters.num_sent_batches, 1);
                ClientCounters::incr(&self.counters.num_sent_items, num_accepted);
                ClientCounters::incr(&self.counters.num_rejected_items, num_rejected);
                SDK_METRICS
                    .sent_batches_total
                    .with_label_values([kind_label])
                    .inc();
                SDK_METRICS
                    .sent_items_total
                    .with_label_values([kind_label])
                    .inc_by(num_accepted);

                if num_rejected > 0 {
                    SDK_METRICS
                        .rejected_items_total
                        .with_label_values([kind_label])
                        .inc_by(num_rejected);
                    warn!(
                        kind=%T::KIND,
                        num_rejected=%num_rejected,
                        "collector rejected invalid telemetry items"
                    );
                }
            }
            Err(error) => {
                ClientCounters::incr(&self.counters.num_failed_batches, 1);
                ClientCounters::incr(&self.counters.num_failed_items, num_items);
                SDK_METRICS
                    .failed_batches_total
                    .with_label_values([kind_label])
                    .inc();
                SDK_METRICS
                    .failed_items_total
                    .with_label_values([kind_label])
                    .inc_by(num_items);
                warn!(
                    kind=%T::KIND,
                    num_items=%num_items,
                    error=%error,
                    "failed to deliver batch to collector, dropping it"
                );
            }
        }
        ClientCounters::decr(&self.counters.num_buffered_items, num_items);
    }
}
