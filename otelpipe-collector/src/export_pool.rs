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

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flume::TrySendError;
use otelpipe_common::retry::{RetryParams, Retryable, retry};
use otelpipe_common::shard_for_key;
use otelpipe_config::ExporterConfig;
use otelpipe_proto::{PipelineError, PipelineResult, TelemetryBatch};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exporter::{Export, ExportResponse, Exporter};
use crate::health::ExporterHealth;
use crate::lifecycle::{BatchState, BatchTracker};
use crate::metrics::COLLECTOR_METRICS;

pub(crate) struct ExportTask {
    pub batch: TelemetryBatch,
    pub batch_tracker: Arc<BatchTracker>,
}

#[derive(Debug, Default)]
pub(crate) struct ExporterCounters {
    num_acked_batches: AtomicU64,
    num_failed_batches: AtomicU64,
    num_dropped_batches: AtomicU64,
    num_abandoned_batches: AtomicU64,
    num_exported_items: AtomicU64,
    num_rejected_items: AtomicU64,
}

impl ExporterCounters {
    pub fn snapshot(&self) -> ExporterStats {
        ExporterStats {
            num_acked_batches: self.num_acked_batches.load(Ordering::Relaxed),
            num_failed_batches: self.num_failed_batches.load(Ordering::Relaxed),
            num_dropped_batches: self.num_dropped_batches.load(Ordering::Relaxed),
            num_abandoned_batches: self.num_abandoned_batches.load(Ordering::Relaxed),
            num_exported_items: self.num_exported_items.load(Ordering::Relaxed),
            num_rejected_items: self.num_rejected_items.load(Ordering::Relaxed),
        }
    }
}

/// Counters of an exporter since the pipeline started.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct ExporterStats {
    pub num_acked_batches: u64,
    pub num_failed_batches: u64,
    pub num_dropped_batches: u64,
    pub num_abandoned_batches: u64,
    pub num_exported_items: u64,
    pub num_rejected_items: u64,
}

/// Records the terminal state of a batch for an exporter.
fn finish_batch(
    exporter_id: &str,
    counters: &ExporterCounters,
    batch_tracker: &BatchTracker,
    batch_state: BatchState,
) {
    let counter = match batch_state {
        BatchState::Acked => &counters.num_acked_batches,
        BatchState::FailedExhausted => &counters.num_failed_batches,
        BatchState::Dropped => &counters.num_dropped_batches,
        _ => &counters.num_abandoned_batches,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    COLLECTOR_METRICS
        .export_batches_total
        .with_label_values([exporter_id, batch_state.as_str()])
        .inc();
    batch_tracker.record_outcome(exporter_id, batch_state);
}

/// Sending half of an exporter's worker pool. Owned by the processing workers: once they are all
/// gone, the export workers drain their queues and exit.
pub(crate) struct ExporterSender {
    exporter_id: String,
    shard_senders: Vec<flume::Sender<ExportTask>>,
    counters: Arc<ExporterCounters>,
}

impl ExporterSender {
    /// Queues a batch without waiting. A full queue drops the batch for this exporter only.
    pub fn send<K: Hash + ?Sized>(&self, shard_key: &K, export_task: ExportTask) {
        let shard_id = shard_for_key(shard_key, self.shard_senders.len());

        let (export_task, batch_state) = match self.shard_senders[shard_id].try_send(export_task) {
            Ok(()) => return,
            Err(TrySendError::Full(export_task)) => {
                warn!(
                    exporter_id=%self.exporter_id,
                    batch_id=%export_task.batch_tracker.batch_id(),
                    num_items=%export_task.batch.len(),
                    "exporter queue is full, dropping batch"
                );
                (export_task, BatchState::Dropped)
            }
            Err(TrySendError::Disconnected(export_task)) => (export_task, BatchState::Abandoned),
        };
        finish_batch(
            &self.exporter_id,
            &self.counters,
            &export_task.batch_tracker,
            batch_state,
        );
    }
}

/// Handle kept by the pipeline on an exporter and its workers.
pub(crate) struct ExporterPool {
    pub exporter: Arc<Exporter>,
    pub exporter_type: &'static str,
    pub health: Arc<ExporterHealth>,
    pub counters: Arc<ExporterCounters>,
    pub abandon_token: CancellationToken,
}

struct ExportWorker {
    exporter_id: String,
    exporter: Arc<Exporter>,
    health: Arc<ExporterHealth>,
    counters: Arc<ExporterCounters>,
    retry_params: RetryParams,
    attempt_timeout: Duration,
    shutdown_token: CancellationToken,
    abandon_token: CancellationToken,
}

impl ExportWorker {
    async fn run(self, export_task_rx: flume::Receiver<ExportTask>) {
        loop {
            let export_task = tokio::select! {
                biased;
                _ = self.abandon_token.cancelled() => break,
                export_task_res = export_task_rx.recv_async() => match export_task_res {
                    Ok(export_task) => export_task,
                    // Every sender is gone and the queue is drained.
                    Err(_) => return,
                },
            };
            self.export(export_task).await;

            if self.shutdown_token.is_cancelled() && !self.health.is_healthy() {
                self.abandon_token.cancel();
            }
        }
        let mut num_abandoned_batches = 0;

        for export_task in export_task_rx.drain() {
            finish_batch(
                &self.exporter_id,
                &self.counters,
                &export_task.batch_tracker,
                BatchState::Abandoned,
            );
            num_abandoned_batches += 1;
        }
        if num_abandoned_batches > 0 {
            warn!(
                exporter_id=%self.exporter_id,
                num_abandoned_batches=%num_abandoned_batches,
                "abandoned queued batches"
            );
        }
    }

    async fn export_attempt(&self, batch: &TelemetryBatch) -> PipelineResult<ExportResponse> {
        COLLECTOR_METRICS
            .export_attempts_total
            .with_label_values([&self.exporter_id])
            .inc();

        match tokio::time::timeout(self.attempt_timeout, self.exporter.export(batch)).await {
            Ok(export_result) => export_result,
            Err(_) => Err(PipelineError::transport(format!(
                "export attempt timed out after {:?}",
                self.attempt_timeout
            ))),
        }
    }

    async fn export(&self, export_task: ExportTask) {
        let ExportTask {
            batch,
            batch_tracker,
        } = export_task;
        debug!(
            exporter_id=%self.exporter_id,
            batch_id=%batch_tracker.batch_id(),
            state=%BatchState::Exporting,
            "exporting batch"
        );
        let start = Instant::now();

        let export_result = tokio::select! {
            biased;
            _ = self.abandon_token.cancelled() => {
                finish_batch(&self.exporter_id, &self.counters, &batch_tracker, BatchState::Abandoned);
                return;
            }
            export_result = retry(&self.retry_params, |_num_attempts| self.export_attempt(&batch)) => export_result,
        };
        COLLECTOR_METRICS
            .export_duration_seconds
            .with_label_values([&self.exporter_id])
            .observe(start.elapsed().as_secs_f64());

        let batch_state = match export_result {
            Ok(export_response) => {
                self.health.record_success();
                let num_rejected_items = export_response.num_rejected();
                let num_exported_items = export_response.num_accepted();
                self.counters
                    .num_exported_items
                    .fetch_add(num_exported_items as u64, Ordering::Relaxed);
                COLLECTOR_METRICS
                    .exported_items_total
                    .with_label_values([&self.exporter_id])
                    .inc_by(num_exported_items as u64);

                if num_rejected_items > 0 {
                    warn!(
                        exporter_id=%self.exporter_id,
                        batch_id=%batch_tracker.batch_id(),
                        num_rejected_items=%num_rejected_items,
                        "exporter rejected items"
                    );
                    self.counters
                        .num_rejected_items
                        .fetch_add(num_rejected_items as u64, Ordering::Relaxed);
                    COLLECTOR_METRICS
                        .export_rejected_items_total
                        .with_label_values([&self.exporter_id])
                        .inc_by(num_rejected_items as u64);
                }
                BatchState::Acked
            }
            Err(error) => {
                // Only retry exhaustion says anything about the health of the backend.
                if error.is_retryable() {
                    self.health.record_failure();
                }
                warn!(
                    exporter_id=%self.exporter_id,
                    batch_id=%batch_tracker.batch_id(),
                    num_items=%batch.len(),
                    error=%error,
                    "failed to export batch"
                );
                BatchState::FailedExhausted
            }
        };
        finish_batch(&self.exporter_id, &self.counters, &batch_tracker, batch_state);
    }
}

/// Spawns the workers of an exporter, one per shard, each owning a bounded queue.
pub(crate) fn spawn_exporter_pool(
    exporter_id: &str,
    exporter: Exporter,
    exporter_config: &ExporterConfig,
    shutdown_token: &CancellationToken,
    hard_stop_token: &CancellationToken,
    export_workers: &mut JoinSet<()>,
) -> (ExporterPool, ExporterSender) {
    let exporter_type = exporter.exporter_type();
    let exporter = Arc::new(exporter);
    let health = Arc::new(ExporterHealth::new(
        exporter_id,
        exporter_config.unhealthy_threshold,
    ));
    let counters = Arc::new(ExporterCounters::default());
    let abandon_token = hard_stop_token.child_token();
    let mut shard_senders = Vec::with_capacity(exporter_config.num_shards);

    for _ in 0..exporter_config.num_shards.max(1) {
        let (export_task_tx, export_task_rx) = flume::bounded(exporter_config.queue_capacity);
        let export_worker = ExportWorker {
            exporter_id: exporter_id.to_string(),
            exporter: exporter.clone(),
            health: health.clone(),
            counters: counters.clone(),
            retry_params: exporter_config.retry.retry_params(),
            attempt_timeout: exporter_config.timeout,
            shutdown_token: shutdown_token.clone(),
            abandon_token: abandon_token.clone(),
        };
        export_workers.spawn(export_worker.run(export_task_rx));
        shard_senders.push(export_task_tx);
    }
    let exporter_pool = ExporterPool {
        exporter,
        exporter_type,
        health,
        counters: counters.clone(),
        abandon_token,
    };
    let exporter_sender = ExporterSender {
        exporter_id: exporter_id.to_string(),
        shard_senders,
        counters,
    };
    (exporter_pool, exporter_sender)
}
