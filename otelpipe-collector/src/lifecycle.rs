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

use std::fmt;
use std::sync::{Mutex, PoisonError};

use otelpipe_proto::{PipelineError, TelemetryKind};
use serde::Serialize;
use tracing::{debug, error, warn};

/// Lifecycle of a batch inside the pipeline. The terminal states are tracked per exporter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Received,
    Processing,
    Exporting,
    Acked,
    FailedExhausted,
    /// The exporter queue was full.
    Dropped,
    /// Given up on during shutdown.
    Abandoned,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Received => "received",
            BatchState::Processing => "processing",
            BatchState::Exporting => "exporting",
            BatchState::Acked => "acked",
            BatchState::FailedExhausted => "failed_exhausted",
            BatchState::Dropped => "dropped",
            BatchState::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Acked
                | BatchState::FailedExhausted
                | BatchState::Dropped
                | BatchState::Abandoned
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collects the terminal state of a batch for each of the exporters it was fanned out to, and
/// reports the overall outcome once every exporter is done with it.
#[derive(Debug)]
pub(crate) struct BatchTracker {
    batch_id: String,
    kind: TelemetryKind,
    num_items: usize,
    num_exporters: usize,
    outcomes: Mutex<Vec<(String, BatchState)>>,
}

impl BatchTracker {
    pub fn new(batch_id: String, kind: TelemetryKind, num_items: usize, num_exporters: usize) -> Self {
        BatchTracker {
            batch_id,
            kind,
            num_items,
            num_exporters,
            outcomes: Mutex::new(Vec::with_capacity(num_exporters)),
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Records the terminal state reached by one exporter. Returns the outcome of the batch when
    /// it was the last exporter: `Ok` if every exporter acknowledged it, a
    /// `PartialExportFailure` otherwise.
    pub fn record_outcome(
        &self,
        exporter_id: &str,
        batch_state: BatchState,
    ) -> Option<Result<(), PipelineError>> {
        debug_assert!(batch_state.is_terminal());

        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        outcomes.push((exporter_id.to_string(), batch_state));

        if outcomes.len() < self.num_exporters {
            return None;
        }
        let failed_exporters: Vec<String> = outcomes
            .iter()
            .filter(|(_, batch_state)| *batch_state != BatchState::Acked)
            .map(|(exporter_id, batch_state)| format!("{exporter_id} ({batch_state})"))
            .collect();

        if failed_exporters.is_empty() {
            debug!(
                batch_id=%self.batch_id,
                kind=%self.kind,
                num_items=%self.num_items,
                state=%BatchState::Acked,
                "batch acknowledged by every exporter"
            );
            return Some(Ok(()));
        }
        let num_failed_exporters = failed_exporters.len();
        let partial_export_failure = PipelineError::PartialExportFailure {
            failed_exporters,
            num_exporters: self.num_exporters,
        };
        if num_failed_exporters < self.num_exporters {
            warn!(
                batch_id=%self.batch_id,
                kind=%self.kind,
                num_items=%self.num_items,
                error=%partial_export_failure,
                "batch partially exported"
            );
        } else {
            error!(
                batch_id=%self.batch_id,
                kind=%self.kind,
                num_items=%self.num_items,
                error=%partial_export_failure,
                "batch could not be exported"
            );
        }
        Some(Err(partial_export_failure))
    }
}
