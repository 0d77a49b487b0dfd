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

#![deny(clippy::disallowed_methods)]

//! The collector pipeline: receives telemetry from many producers, runs it through the processor
//! chain of its route, and fans it out to independent backend exporters.

mod export_pool;
mod exporter;
mod health;
mod lifecycle;
mod metrics;
mod pipeline;
mod processor;
mod router;

pub use export_pool::ExporterStats;
#[cfg(any(test, feature = "testsuite"))]
pub use exporter::MockExport;
pub use exporter::{
    DebugExporter, Export, ExportResponse, Exporter, LogPushExporter, MemoryExporter,
    PrometheusExporter, TracePushExporter,
};
pub use health::ExporterHealth;
pub use lifecycle::BatchState;
pub use pipeline::{
    ExporterShutdownReport, ExporterStatus, Pipeline, PipelineStatus, ShutdownReport,
};
pub use processor::{INSTANCE_ID_LABEL, Processor, ProcessorChain, SERVICE_NAME_LABEL};
