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

use once_cell::sync::Lazy;
use otelpipe_common::metrics::{
    HistogramVec, IntCounterVec, IntGaugeVec, exponential_buckets, new_counter_vec,
    new_gauge_vec, new_histogram_vec,
};

pub struct CollectorMetrics {
    pub received_items_total: IntCounterVec<2>,
    pub rejected_requests_total: IntCounterVec<2>,
    pub processing_queue_depth: IntGaugeVec<1>,
    pub processor_failed_items_total: IntCounterVec<1>,
    pub filtered_items_total: IntCounterVec<1>,
    pub unrouted_items_total: IntCounterVec<1>,
    pub export_batches_total: IntCounterVec<2>,
    pub exported_items_total: IntCounterVec<1>,
    pub export_rejected_items_total: IntCounterVec<1>,
    pub export_attempts_total: IntCounterVec<1>,
    pub export_duration_seconds: HistogramVec<1>,
    pub exporter_healthy: IntGaugeVec<1>,
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        CollectorMetrics {
            received_items_total: new_counter_vec(
                "received_items_total",
                "Number of telemetry items received, by validation outcome.",
                "collector",
                &[],
                ["kind", "status"],
            ),
            rejected_requests_total: new_counter_vec(
                "rejected_requests_total",
                "Number of ingest requests refused because of back pressure or shutdown.",
                "collector",
                &[],
                ["kind", "reason"],
            ),
            processing_queue_depth: new_gauge_vec(
                "processing_queue_depth",
                "Number of batches waiting in the processing queues.",
                "collector",
                &[],
                ["kind"],
            ),
            processor_failed_items_total: new_counter_vec(
                "processor_failed_items_total",
                "Number of items dropped because a processor failed on them.",
                "collector",
                &[],
                ["processor"],
            ),
            filtered_items_total: new_counter_vec(
                "filtered_items_total",
                "Number of items dropped by filter processors.",
                "collector",
                &[],
                ["kind"],
            ),
            unrouted_items_total: new_counter_vec(
                "unrouted_items_total",
                "Number of accepted items of a kind no pipeline is configured for.",
                "collector",
                &[],
                ["kind"],
            ),
            export_batches_total: new_counter_vec(
                "export_batches_total",
                "Number of batches handed to each exporter, by final state.",
                "collector",
                &[],
                ["exporter", "state"],
            ),
            exported_items_total: new_counter_vec(
                "exported_items_total",
                "Number of items acknowledged by each exporter.",
                "collector",
                &[],
                ["exporter"],
            ),
            export_rejected_items_total: new_counter_vec(
                "export_rejected_items_total",
                "Number of items rejected by each exporter.",
                "collector",
                &[],
                ["exporter"],
            ),
            export_attempts_total: new_counter_vec(
                "export_attempts_total",
                "Number of export attempts, retries included.",
                "collector",
                &[],
                ["exporter"],
            ),
            export_duration_seconds: new_histogram_vec(
                "export_duration_seconds",
                "Time spent exporting a batch, retries included.",
                "collector",
                &[],
                ["exporter"],
                exponential_buckets(0.001, 2.0, 15).unwrap_or_default(),
            ),
            exporter_healthy: new_gauge_vec(
                "exporter_healthy",
                "Whether each exporter is currently healthy (1) or not (0).",
                "collector",
                &[],
                ["exporter"],
            ),
        }
    }
}

pub static COLLECTOR_METRICS: Lazy<CollectorMetrics> = Lazy::new(CollectorMetrics::default);
