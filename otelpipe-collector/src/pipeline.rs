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

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use flume::TrySendError;
use otelpipe_common::shard_for_key;
use otelpipe_config::PipelineConfig;
use otelpipe_proto::{
    IngestRequest, IngestResponse, PipelineError, PipelineResult, TelemetryKind,
};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::export_pool::{ExporterPool, ExporterStats, spawn_exporter_pool};
use crate::exporter::{Exporter, MemoryExporter, PrometheusExporter};
use crate::metrics::COLLECTOR_METRICS;
use crate::processor::ProcessorChain;
use crate::router::{PipelineRoute, ProcessingTask, ProcessingWorker, Router};

/// Time left to the workers to wind down once the shutdown timeout has elapsed.
const HARD_STOP_GRACE_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct ExporterStatus {
    pub exporter_id: String,
    pub exporter_type: &'static str,
    pub healthy: bool,
    pub consecutive_failures: usize,
    #[serde(flatten)]
    pub stats: ExporterStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub accepting: bool,
    pub exporters: Vec<ExporterStatus>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ExporterShutdownReport {
    pub healthy: bool,
    /// Batches delivered, or given up on after retries, during the shutdown.
    pub num_drained_batches: u64,
    pub num_abandoned_batches: u64,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub timed_out: bool,
    pub elapsed_millis: u64,
    /// Batches that never made it through processing.
    pub num_abandoned_processing_batches: u64,
    pub exporters: BTreeMap<String, ExporterShutdownReport>,
}

impl ShutdownReport {
    pub fn num_abandoned_batches(&self) -> u64 {
        self.num_abandoned_processing_batches
            + self
                .exporters
                .values()
                .map(|exporter_report| exporter_report.num_abandoned_batches)
                .sum::<u64>()
    }
}

struct Workers {
    processing_workers: JoinSet<()>,
    export_workers: JoinSet<()>,
}

impl Workers {
    async fn join_all(&mut self) {
        while self.processing_workers.join_next().await.is_some() {}
        while self.export_workers.join_next().await.is_some() {}
    }
}

struct PipelineInner {
    processing_task_txs: RwLock<Option<Vec<flume::Sender<ProcessingTask>>>>,
    routed_kinds: BTreeSet<TelemetryKind>,
    exporter_pools: BTreeMap<String, ExporterPool>,
    workers: Mutex<Option<Workers>>,
    num_abandoned_processing_batches: Arc<AtomicU64>,
    shutdown_token: CancellationToken,
    hard_stop_token: CancellationToken,
    shutdown_timeout: Duration,
}

/// The collector pipeline: receives batches, runs them through the processors of their route,
/// and fans them out to the route's exporters.
///
/// Ingestion never waits on processing or export: batches are queued to a fixed number of
/// processing shards, then to the per-exporter shards, each queue being bounded.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Builds the exporters described by the config and starts the pipeline.
    pub fn spawn(pipeline_config: &PipelineConfig) -> anyhow::Result<Pipeline> {
        let exporters = pipeline_config
            .active_exporter_ids()
            .into_iter()
            .map(|exporter_id| {
                let exporter_config = &pipeline_config.exporters[exporter_id];
                let exporter = Exporter::from_config(exporter_id, exporter_config)?;
                Ok((exporter_id.to_string(), exporter))
            })
            .collect::<anyhow::Result<BTreeMap<String, Exporter>>>()?;
        Pipeline::spawn_with_exporters(pipeline_config, exporters)
    }

    /// Starts the pipeline with the given exporters, keyed by exporter ID. Queue sizes, retries,
    /// and health thresholds still come from the config.
    pub fn spawn_with_exporters(
        pipeline_config: &PipelineConfig,
        mut exporters: BTreeMap<String, Exporter>,
    ) -> anyhow::Result<Pipeline> {
        pipeline_config.validate()?;

        let shutdown_token = CancellationToken::new();
        let hard_stop_token = CancellationToken::new();
        let mut export_workers = JoinSet::new();
        let mut exporter_pools = BTreeMap::new();
        let mut exporter_senders = BTreeMap::new();

        for exporter_id in pipeline_config.active_exporter_ids() {
            let exporter = exporters
                .remove(exporter_id)
                .with_context(|| format!("exporter `{exporter_id}` was not provided"))?;
            let exporter_config = &pipeline_config.exporters[exporter_id];
            let (exporter_pool, exporter_sender) = spawn_exporter_pool(
                exporter_id,
                exporter,
                exporter_config,
                &shutdown_token,
                &hard_stop_token,
                &mut export_workers,
            );
            exporter_pools.insert(exporter_id.to_string(), exporter_pool);
            exporter_senders.insert(exporter_id, Arc::new(exporter_sender));
        }
        let mut router = Router::default();

        for (kind, route_config) in pipeline_config.pipelines.iter() {
            let processor_chain =
                ProcessorChain::new(&route_config.processors, &pipeline_config.processors)?;
            let route_exporter_senders = route_config
                .exporters
                .iter()
                .filter_map(|exporter_id| exporter_senders.get(exporter_id.as_str()).cloned())
                .collect();
            info!(
                kind=%kind,
                processors=?processor_chain.processor_ids().collect::<Vec<_>>(),
                exporters=?route_config.exporters,
                "pipeline route configured"
            );
            let pipeline_route = PipelineRoute {
                processor_chain,
                exporter_senders: route_exporter_senders,
            };
            router.add_route(kind, pipeline_route);
        }
        // The router must end up owned by the processing workers only.
        drop(exporter_senders);

        let routed_kinds: BTreeSet<TelemetryKind> = router.routed_kinds().collect();
        let router = Arc::new(router);
        let num_abandoned_processing_batches = Arc::new(AtomicU64::new(0));
        let mut processing_workers = JoinSet::new();
        let mut processing_task_txs = Vec::with_capacity(pipeline_config.receiver.num_shards);

        for _ in 0..pipeline_config.receiver.num_shards {
            let (processing_task_tx, processing_task_rx) =
                flume::bounded(pipeline_config.receiver.queue_capacity);
            let processing_worker = ProcessingWorker {
                router: router.clone(),
                hard_stop_token: hard_stop_token.clone(),
                num_abandoned_batches: num_abandoned_processing_batches.clone(),
            };
            processing_workers.spawn(processing_worker.run(processing_task_rx));
            processing_task_txs.push(processing_task_tx);
        }
        let workers = Workers {
            processing_workers,
            export_workers,
        };
        let inner = PipelineInner {
            processing_task_txs: RwLock::new(Some(processing_task_txs)),
            routed_kinds,
            exporter_pools,
            workers: Mutex::new(Some(workers)),
            num_abandoned_processing_batches,
            shutdown_token,
            hard_stop_token,
            shutdown_timeout: pipeline_config.shutdown_timeout,
        };
        info!(
            num_processing_shards=%pipeline_config.receiver.num_shards,
            num_exporters=%inner.exporter_pools.len(),
            "pipeline started"
        );
        Ok(Pipeline {
            inner: Arc::new(inner),
        })
    }

    /// Validates the items of the batch and queues the valid ones for processing. Never waits:
    /// a full processing queue is reported as `QueueSaturated`, and a pipeline shutting down as
    /// `Unavailable`.
    pub fn ingest(&self, ingest_request: IngestRequest) -> PipelineResult<IngestResponse> {
        let IngestRequest {
            producer,
            mut batch,
        } = ingest_request;
        let kind = batch.kind();

        let processing_task_txs_guard = self
            .inner
            .processing_task_txs
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(processing_task_txs) = processing_task_txs_guard.as_ref() else {
            COLLECTOR_METRICS
                .rejected_requests_total
                .with_label_values([kind.as_str(), "unavailable"])
                .inc();
            return Err(PipelineError::unavailable("the collector is shutting down"));
        };
        let item_statuses = batch.retain_valid();
        let ingest_response = IngestResponse { item_statuses };
        let num_rejected_items = ingest_response.num_rejected();

        if num_rejected_items > 0 {
            debug!(
                producer=%producer,
                kind=%kind,
                num_rejected_items=%num_rejected_items,
                "rejected invalid items"
            );
            COLLECTOR_METRICS
                .received_items_total
                .with_label_values([kind.as_str(), "rejected"])
                .inc_by(num_rejected_items as u64);
        }
        if batch.is_empty() {
            return Ok(ingest_response);
        }
        let num_accepted_items = batch.len() as u64;

        if !self.inner.routed_kinds.contains(&kind) {
            debug!(kind=%kind, "no pipeline is configured for this telemetry kind");
            COLLECTOR_METRICS
                .unrouted_items_total
                .with_label_values([kind.as_str()])
                .inc_by(num_accepted_items);
            return Ok(ingest_response);
        }
        let shard_key = (
            producer.service_name.as_str(),
            producer.instance_id.as_str(),
            kind,
        );
        let shard_id = shard_for_key(&shard_key, processing_task_txs.len());
        let processing_task = ProcessingTask {
            batch_id: Ulid::new(),
            producer,
            batch,
        };
        match processing_task_txs[shard_id].try_send(processing_task) {
            Ok(()) => {
                COLLECTOR_METRICS
                    .received_items_total
                    .with_label_values([kind.as_str(), "accepted"])
                    .inc_by(num_accepted_items);
                COLLECTOR_METRICS
                    .processing_queue_depth
                    .with_label_values([kind.as_str()])
                    .inc();
                Ok(ingest_response)
            }
            Err(TrySendError::Full(_)) => {
                COLLECTOR_METRICS
                    .rejected_requests_total
                    .with_label_values([kind.as_str(), "queue_saturated"])
                    .inc();
                Err(PipelineError::QueueSaturated)
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(PipelineError::unavailable("the collector is shutting down"))
            }
        }
    }

    pub fn is_accepting(&self) -> bool {
        !self.inner.shutdown_token.is_cancelled()
    }

    pub fn exporter(&self, exporter_id: &str) -> Option<&Exporter> {
        self.inner
            .exporter_pools
            .get(exporter_id)
            .map(|exporter_pool| exporter_pool.exporter.as_ref())
    }

    pub fn prometheus_exporter(&self, exporter_id: &str) -> Option<&PrometheusExporter> {
        self.exporter(exporter_id)?.as_prometheus()
    }

    /// Returns the memory exporter with the given ID, or the first one if no ID is given.
    pub fn memory_exporter(&self, exporter_id_opt: Option<&str>) -> Option<&MemoryExporter> {
        match exporter_id_opt {
            Some(exporter_id) => self.exporter(exporter_id)?.as_memory(),
            None => self
                .inner
                .exporter_pools
                .values()
                .find_map(|exporter_pool| exporter_pool.exporter.as_memory()),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let exporters = self
            .inner
            .exporter_pools
            .iter()
            .map(|(exporter_id, exporter_pool)| ExporterStatus {
                exporter_id: exporter_id.clone(),
                exporter_type: exporter_pool.exporter_type,
                healthy: exporter_pool.health.is_healthy(),
                consecutive_failures: exporter_pool.health.consecutive_failures(),
                stats: exporter_pool.counters.snapshot(),
            })
            .collect();
        PipelineStatus {
            accepting: self.is_accepting(),
            exporters,
        }
    }

    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown_with_timeout(self.inner.shutdown_timeout)
            .await
    }

    /// Stops ingestion, then drains the processing queues and the queues of healthy exporters.
    /// Batches queued for unhealthy exporters are abandoned. Whatever is left when the timeout
    /// elapses is abandoned too. Subsequent calls return an empty report.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> ShutdownReport {
        let Some(mut workers) = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return ShutdownReport::default();
        };
        info!(timeout=?timeout, "shutting down pipeline");
        let start = Instant::now();

        // Dropping the senders lets the processing workers exit once their queue is drained.
        self.inner
            .processing_task_txs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.shutdown_token.cancel();

        let mut stats_before_shutdown = BTreeMap::new();

        for (exporter_id, exporter_pool) in &self.inner.exporter_pools {
            stats_before_shutdown.insert(exporter_id.as_str(), exporter_pool.counters.snapshot());

            if !exporter_pool.health.is_healthy() {
                warn!(
                    exporter_id=%exporter_id,
                    "exporter is unhealthy, abandoning its queued batches"
                );
                exporter_pool.abandon_token.cancel();
            }
        }
        let timed_out = tokio::time::timeout(timeout, workers.join_all())
            .await
            .is_err();

        if timed_out {
            warn!(timeout=?timeout, "pipeline shutdown timed out, abandoning remaining batches");
            self.inner.hard_stop_token.cancel();

            if tokio::time::timeout(HARD_STOP_GRACE_PERIOD, workers.join_all())
                .await
                .is_err()
            {
                workers.processing_workers.abort_all();
                workers.export_workers.abort_all();
            }
        }
        let exporters = self
            .inner
            .exporter_pools
            .iter()
            .map(|(exporter_id, exporter_pool)| {
                let stats_before = stats_before_shutdown
                    .get(exporter_id.as_str())
                    .copied()
                    .unwrap_or_default();
                let stats_after = exporter_pool.counters.snapshot();
                let exporter_report = ExporterShutdownReport {
                    healthy: exporter_pool.health.is_healthy(),
                    num_drained_batches: (stats_after.num_acked_batches
                        + stats_after.num_failed_batches)
                        - (stats_before.num_acked_batches + stats_before.num_failed_batches),
                    num_abandoned_batches: (stats_after.num_abandoned_batches
                        + stats_after.num_dropped_batches)
                        - (stats_before.num_abandoned_batches + stats_before.num_dropped_batches),
                };
                (exporter_id.clone(), exporter_report)
            })
            .collect();
        let shutdown_report = ShutdownReport {
            timed_out,
            elapsed_millis: start.elapsed().as_millis() as u64,
            num_abandoned_processing_batches: self
                .inner
                .num_abandoned_processing_batches
                .load(Ordering::Relaxed),
            exporters,
        };
        info!(
            timed_out=%shutdown_report.timed_out,
            num_abandoned_batches=%shutdown_report.num_abandoned_batches(),
            elapsed_millis=%shutdown_report.elapsed_millis,
            "pipeline shut down"
        );
        shutdown_report
    }
}
