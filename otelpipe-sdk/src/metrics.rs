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
use otelpipe_common::metrics::{IntCounterVec, new_counter_vec};

pub struct SdkMetrics {
    pub enqueued_items_total: IntCounterVec<1>,
    pub dropped_items_total: IntCounterVec<1>,
    pub sent_batches_total: IntCounterVec<1>,
    pub sent_items_total: IntCounterVec<1>,
    pub rejected_items_total: IntCounterVec<1>,
    pub failed_batches_total: IntCounterVec<1>,
    pub failed_items_total: IntCounterVec<1>,
    pub discarded_items_total: IntCounterVec<1>,
}

impl Default for SdkMetrics {
    fn default() -> Self {
        SdkMetrics {
            enqueued_items_total: new_counter_vec(
                "enqueued_items_total",
                "Number of telemetry items handed to the exporter client.",
                "exporter_client",
                &[],
                ["kind"],
            ),
            dropped_items_total: new_counter_vec(
                "dropped_items_total",
                "Number of telemetry items dropped because the intake queue was full.",
                "exporter_client",
                &[],
                ["kind"],
            ),
            sent_batches_total: new_counter_vec(
                "sent_batches_total",
                "Number of batches acknowledged by the collector.",
                "exporter_client",
                &[],
                ["kind"],
            ),
            sent_items_total: new_counter_vec(
                "sent_items_total",
                "Number of telemetry items accepted by the collector.",
                "exporter_client",
                &[],
                ["kind"],
            ),
            rejected_items_total: new_counter_vec(
                "rejected_items_total",
                "Number of telemetry items rejected by the collector as invalid.",
                "exporter_client",
                &[],
                ["kind"],
            ),
            failed_batches_total: new_counter_vec(
                "failed_batches_total",
                "Number of batches dropped after exhausting delivery attempts.",
                "exporter_client",
                &[],
                ["kind"],
            ),
            failed_items_total: new_counter_vec(
                "failed_items_total",
                "Number of telemetry items dropped after exhausting delivery attempts.",
                "exporter_client",
                &[],
                ["kind"],
            ),
            discarded_items_total: new_counter_vec(
                "discarded_items_total",
                "Number of telemetry items still buffered when the shutdown timeout elapsed.",
                "exporter_client",
                &[],
                ["kind"],
            ),
        }
    }
}

pub static SDK_METRICS: Lazy<SdkMetrics> = Lazy::new(SdkMetrics::default);
