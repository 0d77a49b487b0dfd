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

use http::HeaderMap;
use otelpipe_proto::{LogRecord, Severity, SpanKind, SpanStatus};
use tokio::time::Instant;

use crate::emitter::{Emitter, SpanHandle};
use crate::meter::{Histogram, Meter};
use crate::propagation::{self, TraceContext};

pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";

/// In-flight server request.
pub struct RequestScope {
    span_handle: SpanHandle,
    context: TraceContext,
    method: String,
    route: String,
    start: Instant,
}

impl RequestScope {
    /// Context to pass to the work done on behalf of the request.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn span_handle_mut(&mut self) -> &mut SpanHandle {
        &mut self.span_handle
    }
}

/// Traces, measures, and logs the requests served by an HTTP service.
#[derive(Clone)]
pub struct HttpServerInstrumentation {
    emitter: Emitter,
    request_duration: Histogram,
    instance_id: String,
}

impl HttpServerInstrumentation {
    pub fn new(emitter: Emitter, meter: &Meter, instance_id: impl Into<String>) -> Self {
        let request_duration = meter.histogram(
            HTTP_SERVER_REQUEST_DURATION,
            "Duration of HTTP server requests.",
            "s",
        );
        HttpServerInstrumentation {
            emitter,
            request_duration,
            instance_id: instance_id.into(),
        }
    }

    /// Starts the server span of a request, continuing the trace of the caller if the headers
    /// carry one.
    pub fn start_request(&self, method: &str, route: &str, headers: &HeaderMap) -> RequestScope {
        let parent_context_opt = propagation::extract(headers);
        let (mut span_handle, context) = self.emitter.start_span(
            format!("{method} {route}"),
            SpanKind::Server,
            parent_context_opt.as_ref(),
        );
        span_handle.set_attribute("http.method", method);
        span_handle.set_attribute("http.route", route);
        span_handle.set_attribute("service.instance.id", self.instance_id.as_str());

        RequestScope {
            span_handle,
            context,
            method: method.to_string(),
            route: route.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish_request(&self, request_scope: RequestScope, status_code: u16) {
        let RequestScope {
            mut span_handle,
            context,
            method,
            route,
            start,
        } = request_scope;
        let elapsed_secs = start.elapsed().as_secs_f64();
        let status_code_str = status_code.to_string();

        self.request_duration.record(
            elapsed_secs,
            &[
                ("route", route.as_str()),
                ("method", method.as_str()),
                ("status_code", status_code_str.as_str()),
                ("instance_id", self.instance_id.as_str()),
            ],
        );
        span_handle.set_attribute("http.status_code", status_code);
        span_handle.set_attribute("http.duration", elapsed_secs);

        let (span_status, severity) = if status_code >= 500 {
            (SpanStatus::error(format!("HTTP {status_code}")), Severity::Error)
        } else {
            (SpanStatus::Ok, Severity::Info)
        };
        let log_record = LogRecord::new(
            severity,
            format!("{method} {route} -> {status_code} ({elapsed_secs:.3}s)"),
        )
        .with_attribute("http.method", method.as_str())
        .with_attribute("http.route", route.as_str())
        .with_attribute("http.status_code", status_code);

        self.emitter.log(log_record, Some(&context));
        self.emitter.end_span(span_handle, span_status);
    }
}

/// Starts a client span for an outbound call and injects its context into the outbound headers.
pub fn inject_outbound(
    emitter: &Emitter,
    name: impl Into<String>,
    parent_context: &TraceContext,
    headers: &mut HeaderMap,
) -> (SpanHandle, TraceContext) {
    let (span_handle, context) = emitter.start_span(name, SpanKind::Client, Some(parent_context));
    propagation::inject(&context, headers);
    (span_handle, context)
}
