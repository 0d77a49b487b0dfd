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

//! Telemetry data model shared by the SDK and the collector, along with the messages of the
//! ingestion protocol.

mod attributes;
mod batch;
mod error;
mod ids;
mod log;
mod metric;
mod span;

use std::time::{SystemTime, UNIX_EPOCH};

pub use attributes::{AttributeValue, Attributes};
pub use batch::{
    IngestRequest, IngestResponse, ItemStatus, ProducerIdentity, TelemetryBatch, TelemetryItem,
    TelemetryKind,
};
pub use error::{
    PipelineError, PipelineResult, ServiceError, ServiceErrorCode, ValidationError,
};
pub use ids::{ParseIdError, SpanId, TraceId, TryFromSliceError};
pub use log::{LogRecord, Severity};
pub use metric::{HistogramValue, Labels, MetricKind, MetricPoint, MetricValue};
pub use span::{
    SERVICE_INSTANCE_ID_KEY, SERVICE_NAME_KEY, Span, SpanEvent, SpanKind, SpanStatus,
};

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos() as u64)
        .unwrap_or_default()
}
