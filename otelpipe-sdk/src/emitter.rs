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

use std::sync::Arc;

use otelpipe_config::{ExporterClientConfig, SamplerConfig};
use otelpipe_proto::{
    AttributeValue, Attributes, LogRecord, MetricPoint, SERVICE_INSTANCE_ID_KEY, SERVICE_NAME_KEY,
    Severity, Span, SpanEvent, SpanId, SpanKind, SpanStatus, TraceId, now_unix_nanos,
};

use crate::TelemetrySink;
use crate::propagation::{Baggage, TraceContext, TraceFlags};

/// Sampling decision for new traces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampler {
    AlwaysOn,
    AlwaysOff,
    /// Samples this fraction of traces, deterministically by trace ID.
    Ratio(f64),
}

impl Sampler {
    pub fn should_sample(&self, trace_id: TraceId) -> bool {
        match *self {
            Sampler::AlwaysOn => true,
            Sampler::AlwaysOff => false,
            Sampler::Ratio(ratio) if ratio >= 1.0 => true,
            Sampler::Ratio(ratio) if ratio <= 0.0 => false,
            Sampler::Ratio(ratio) => {
                let mut low_bytes = [0u8; 8];
                low_bytes.copy_from_slice(&trace_id.as_bytes()[8..]);
                let value = u64::from_be_bytes(low_bytes) >> 1;
                let threshold = (ratio * (1u64 << 63) as f64) as u64;
                value < threshold
            }
        }
    }
}

impl From<SamplerConfig> for Sampler {
    fn from(sampler_config: SamplerConfig) -> Self {
        match sampler_config {
            SamplerConfig::AlwaysOn => Sampler::AlwaysOn,
            SamplerConfig::AlwaysOff => Sampler::AlwaysOff,
            SamplerConfig::Ratio { ratio } => Sampler::Ratio(ratio),
        }
    }
}

/// A span being recorded. Consumed by [`Emitter::end_span`].
#[derive(Debug)]
pub struct SpanHandle {
    span: Span,
    context: TraceContext,
}

impl SpanHandle {
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn name(&self) -> &str {
        &self.span.name
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.span.attributes.insert(key.into(), value.into());
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Attributes) {
        self.span.events.push(SpanEvent {
            timestamp_nanos: now_unix_nanos(),
            name: name.into(),
            attributes,
        });
    }
}

/// Produces the spans, metrics, and correlated logs of one service.
///
/// The emitter holds no notion of a current span: the active [`TraceContext`] is passed to every
/// call.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    sink: Arc<dyn TelemetrySink>,
    resource_attributes: Attributes,
    sampler: Sampler,
}

impl Emitter {
    pub fn new(sink: Arc<dyn TelemetrySink>, resource_attributes: Attributes, sampler: Sampler) -> Self {
        let inner = EmitterInner {
            sink,
            resource_attributes,
            sampler,
        };
        Emitter {
            inner: Arc::new(inner),
        }
    }

    /// Creates an emitter whose resource identifies the service described by the config.
    pub fn from_client_config(
        sink: Arc<dyn TelemetrySink>,
        client_config: &ExporterClientConfig,
    ) -> Self {
        let mut resource_attributes = Attributes::new();
        resource_attributes.insert(
            SERVICE_NAME_KEY.to_string(),
            AttributeValue::from(client_config.service_name.as_str()),
        );
        resource_attributes.insert(
            SERVICE_INSTANCE_ID_KEY.to_string(),
            AttributeValue::from(client_config.instance_id.as_str()),
        );
        Emitter::new(sink, resource_attributes, client_config.sampler.into())
    }

    pub fn resource_attributes(&self) -> &Attributes {
        &self.inner.resource_attributes
    }

    /// Starts a span. Without a parent, a new trace starts and the sampler decides whether it is
    /// recorded. Returns the handle of the span and its context, to be passed to nested calls.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        parent_context_opt: Option<&TraceContext>,
    ) -> (SpanHandle, TraceContext) {
        let context = match parent_context_opt {
            Some(parent_context) => parent_context.child(),
            None => {
                let trace_id = TraceId::random();
                let sampled = self.inner.sampler.should_sample(trace_id);
                TraceContext::new(
                    trace_id,
                    SpanId::random(),
                    TraceFlags::default().with_sampled(sampled),
                    Baggage::new(),
                )
            }
        };
        let span = Span {
            trace_id: context.trace_id(),
            span_id: context.span_id(),
            parent_span_id: context.parent_span_id(),
            name: name.into(),
            kind,
            start_timestamp_nanos: now_unix_nanos(),
            end_timestamp_nanos: 0,
            attributes: Attributes::new(),
            status: SpanStatus::Unset,
            events: Vec::new(),
            resource_attributes: Attributes::new(),
        };
        let span_handle = SpanHandle {
            span,
            context: context.clone(),
        };
        (span_handle, context)
    }

    /// Ends the span and hands it over for export if sampled. Never blocks.
    pub fn end_span(&self, span_handle: SpanHandle, status: SpanStatus) {
        let SpanHandle { mut span, context } = span_handle;

        if !context.is_sampled() {
            return;
        }
        span.end_timestamp_nanos = now_unix_nanos().max(span.start_timestamp_nanos);
        span.status = status;
        span.resource_attributes = self.inner.resource_attributes.clone();
        self.inner.sink.send_span(span);
    }

    pub fn record_metric(&self, metric_point: MetricPoint) {
        self.inner.sink.send_metric(metric_point);
    }

    /// Queues a log record, stamped with the identifiers of the active span if any.
    pub fn log(&self, mut log_record: LogRecord, active_context_opt: Option<&TraceContext>) {
        if let Some(active_context) = active_context_opt {
            log_record.trace_id = Some(active_context.trace_id());
            log_record.span_id = Some(active_context.span_id());
        }
        for (key, value) in &self.inner.resource_attributes {
            log_record
                .resource_attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.inner.sink.send_log(log_record);
    }

    pub fn log_message(
        &self,
        severity: Severity,
        body: impl Into<String>,
        active_context_opt: Option<&TraceContext>,
    ) {
        self.log(LogRecord::new(severity, body), active_context_opt);
    }
}
