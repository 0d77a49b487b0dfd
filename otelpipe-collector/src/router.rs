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
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use otelpipe_proto::{ProducerIdentity, TelemetryBatch, TelemetryKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::export_pool::{ExportTask, ExporterSender};
use crate::lifecycle::{BatchState, BatchTracker};
use crate::metrics::COLLECTOR_METRICS;
use crate::processor::ProcessorChain;

/// Ordered processors and exporters of one telemetry kind. Immutable once the pipeline started.
pub(crate) struct PipelineRoute {
    pub processor_chain: ProcessorChain,
    pub exporter_senders: Vec<Arc<ExporterSender>>,
}

#[derive(Default)]
pub(crate) struct Router {
    routes: BTreeMap<TelemetryKind, PipelineRoute>,
}

impl Router {
    pub fn add_route(&mut self, kind: TelemetryKind, pipeline_route: PipelineRoute) {
        self.routes.insert(kind, pipeline_route);
    }

    pub fn route(&self, kind: TelemetryKind) -> Option<&PipelineRoute> {
        self.routes.get(&kind)
    }

    pub fn routed_kinds(&self) -> impl Iterator<Item = TelemetryKind> + '_ {
        self.routes.keys().copied()
    }
}

pub(crate) struct ProcessingTask {
    pub batch_id: Ulid,
    pub producer: ProducerIdentity,
    pub batch: TelemetryBatch,
}

/// Runs batches of one processing shard through their route and fans them out to the exporters.
pub(crate) struct ProcessingWorker {
    pub router: Arc<Router>,
    pub hard_stop_token: CancellationToken,
    pub num_abandoned_batches: Arc<AtomicU64>,
}

impl ProcessingWorker {
    pub async fn run(self, processing_task_rx: flume::Receiver<ProcessingTask>) {
        loop {
            let processing_task = tokio::select! {
                biased;
                _ = self.hard_stop_token.cancelled() => break,
                processing_task_res = processing_task_rx.recv_async() => match processing_task_res {
                    Ok(processing_task) => processing_task,
                    Err(_) => return,
                },
            };
            self.process(processing_task);
        }
        let num_abandoned_batches = processing_task_rx.drain().count();

        if num_abandoned_batches > 0 {
            warn!(
                num_abandoned_batches=%num_abandoned_batches,
                "abandoned batches waiting for processing"
            );
            self.num_abandoned_batches
                .fetch_add(num_abandoned_batches as u64, Ordering::Relaxed);
        }
    }

    fn process(&self, processing_task: ProcessingTask) {
        let ProcessingTask {
            batch_id,
            producer,
            batch,
        } = processing_task;
        let kind = batch.kind();

        COLLECTOR_METRICS
            .processing_queue_depth
            .with_label_values([kind.as_str()])
            .dec();

        let Some(pipeline_route) = self.router.route(kind) else {
            return;
        };
        debug!(
            batch_id=%batch_id,
            producer=%producer,
            kind=%kind,
            num_items=%batch.len(),
            state=%BatchState::Processing,
            "processing batch"
        );
        let processed_batches = pipeline_route.processor_chain.run(&producer, batch);
        let num_processed_batches = processed_batches.len();
        let shard_key = (
            producer.service_name.as_str(),
            producer.instance_id.as_str(),
            kind,
        );
        for (batch_ord, processed_batch) in processed_batches.into_iter().enumerate() {
            let batch_id = if num_processed_batches == 1 {
                batch_id.to_string()
            } else {
                format!("{batch_id}-{batch_ord}")
            };
            let batch_tracker = Arc::new(BatchTracker::new(
                batch_id,
                kind,
                processed_batch.len(),
                pipeline_route.exporter_senders.len(),
            ));
            for exporter_sender in &pipeline_route.exporter_senders {
                let export_task = ExportTask {
                    batch: processed_batch.clone(),
                    batch_tracker: batch_tracker.clone(),
                };
                exporter_sender.send(&shard_key, export_task);
            }
        }
    }
}
