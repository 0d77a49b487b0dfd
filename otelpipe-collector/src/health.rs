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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::metrics::COLLECTOR_METRICS;

/// Tracks whether an exporter is healthy: it becomes unhealthy after `unhealthy_threshold`
/// consecutive batches exhausted their retries, and healthy again on the first success.
#[derive(Debug)]
pub struct ExporterHealth {
    exporter_id: String,
    unhealthy_threshold: usize,
    consecutive_failures: AtomicUsize,
    is_healthy: AtomicBool,
}

impl ExporterHealth {
    pub fn new(exporter_id: impl Into<String>, unhealthy_threshold: usize) -> Self {
        let exporter_id = exporter_id.into();
        COLLECTOR_METRICS
            .exporter_healthy
            .with_label_values([&exporter_id])
            .set(1);
        ExporterHealth {
            exporter_id,
            unhealthy_threshold: unhealthy_threshold.max(1),
            consecutive_failures: AtomicUsize::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if !self.is_healthy.swap(true, Ordering::Relaxed) {
            info!(exporter_id=%self.exporter_id, "exporter is healthy again");
            COLLECTOR_METRICS
                .exporter_healthy
                .with_label_values([&self.exporter_id])
                .set(1);
        }
    }

    pub fn record_failure(&self) {
        let consecutive_failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        if consecutive_failures >= self.unhealthy_threshold
            && self.is_healthy.swap(false, Ordering::Relaxed)
        {
            warn!(
                exporter_id=%self.exporter_id,
                consecutive_failures=%consecutive_failures,
                "exporter is unhealthy"
            );
            COLLECTOR_METRICS
                .exporter_healthy
                .with_label_values([&self.exporter_id])
                .set(0);
        }
    }
}
