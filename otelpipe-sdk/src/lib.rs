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

//! Instrumentation side of otelpipe: trace context propagation, the telemetry emitter and meter,
//! and the client exporting telemetry to a collector.

mod emitter;
mod exporter;
mod instrumentation;
mod meter;
mod metrics;
pub mod propagation;
mod sink;

pub use emitter::{Emitter, Sampler, SpanHandle};
#[cfg(any(test, feature = "testsuite"))]
pub use exporter::MockCollectorTransport;
pub use exporter::{
    CollectorTransport, ExporterClient, ExporterClientStats, HttpCollectorTransport,
};
pub use instrumentation::{
    HTTP_SERVER_REQUEST_DURATION, HttpServerInstrumentation, RequestScope, inject_outbound,
};
pub use meter::{Counter, DEFAULT_SECONDS_BOUNDS, Gauge, Histogram, Meter, PeriodicReader};
pub use propagation::{Baggage, TraceContext, TraceFlags};
pub use sink::{MemorySink, TelemetrySink};
