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

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Extension, Router};
use clap::{ArgMatches, Command, arg};
use http::HeaderMap;
use otelpipe_config::ExporterClientConfig;
use otelpipe_proto::{Severity, SpanKind, SpanStatus};
use otelpipe_sdk::{
    Emitter, ExporterClient, HttpServerInstrumentation, Meter, TraceContext, inject_outbound,
};
use otelpipe_serve::shutdown_signal;
use rand::Rng;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info};

const DOWNSTREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Work taking longer than this fails with a 500.
const SLOW_WORK_THRESHOLD: Duration = Duration::from_millis(150);

pub fn build_demo_service_command() -> Command {
    Command::new("demo-service")
        .about("Runs an instrumented HTTP service exporting its telemetry to the collector.")
        .args(&[
            arg!(--"service-name" <SERVICE_NAME> "Name of the service, attached to its telemetry.")
                .env("OTELPIPE_SERVICE_NAME")
                .required(true),
            arg!(--"listen-address" <LISTEN_ADDRESS> "Address the service binds to.")
                .default_value("127.0.0.1:8000")
                .required(false),
            arg!(--"downstream-url" <DOWNSTREAM_URL> "Base URL of the service called by `/external`.")
                .env("OTELPIPE_DOWNSTREAM_URL")
                .required(false),
            arg!(--"collector-endpoint" <COLLECTOR_ENDPOINT> "Base URL of the collector.")
                .env("OTELPIPE_COLLECTOR_ENDPOINT")
                .required(false),
        ])
}

#[derive(Debug, Eq, PartialEq)]
pub struct DemoServiceCliCommand {
    pub service_name: String,
    pub listen_address: SocketAddr,
    pub downstream_url_opt: Option<String>,
    pub collector_endpoint_opt: Option<String>,
}

impl DemoServiceCliCommand {
    pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
        let service_name = matches
            .remove_one::<String>("service-name")
            .context("`service-name` should be a required arg")?;
        let listen_address_str = matches
            .remove_one::<String>("listen-address")
            .context("`listen-address` should have a default value")?;
        let listen_address = listen_address_str
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address `{listen_address_str}`"))?;
        let downstream_url_opt = matches.remove_one::<String>("downstream-url");
        let collector_endpoint_opt = matches.remove_one::<String>("collector-endpoint");
        Ok(DemoServiceCliCommand {
            service_name,
            listen_address,
            downstream_url_opt,
            collector_endpoint_opt,
        })
    }

    pub async fn execute(self) -> anyhow::Result<()> {
        debug!(args=?self, "demo-service");
        let mut client_config = ExporterClientConfig::from_env(self.service_name.clone())?;

        if let Some(collector_endpoint) = self.collector_endpoint_opt {
            client_config.endpoint = collector_endpoint;
            client_config.validate()?;
        }
        let exporter_client = ExporterClient::spawn(&client_config)?;
        let emitter = Emitter::from_client_config(Arc::new(exporter_client.clone()), &client_config);
        let meter = Meter::new();
        let periodic_reader =
            meter.spawn_periodic_reader(emitter.clone(), client_config.metric_export_interval);

        let demo_state = DemoState::new(
            emitter,
            &meter,
            client_config.service_name.clone(),
            client_config.instance_id.clone(),
            self.downstream_url_opt,
        )?;
        let tcp_listener = TcpListener::bind(self.listen_address)
            .await
            .with_context(|| format!("failed to bind demo service to `{}`", self.listen_address))?;
        info!(
            service_name=%client_config.service_name,
            listen_address=%self.listen_address,
            "demo service listening"
        );
        let serve_res = axum::serve(tcp_listener, demo_routes(demo_state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("demo service failed");

        periodic_reader.shutdown().await;
        let exporter_client_stats = exporter_client.shutdown().await;
        info!(stats=?exporter_client_stats, "exporter client shut down");
        serve_res
    }
}

#[derive(Clone)]
pub struct DemoState {
    inner: Arc<DemoStateInner>,
}

struct DemoStateInner {
    emitter: Emitter,
    instrumentation: HttpServerInstrumentation,
    http_client: reqwest::Client,
    service_name: String,
    instance_id: String,
    downstream_url_opt: Option<String>,
}

impl DemoState {
    pub fn new(
        emitter: Emitter,
        meter: &Meter,
        service_name: String,
        instance_id: String,
        downstream_url_opt: Option<String>,
    ) -> anyhow::Result<Self> {
        let instrumentation =
            HttpServerInstrumentation::new(emitter.clone(), meter, instance_id.clone());
        let http_client = reqwest::Client::builder()
            .timeout(DOWNSTREAM_REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let inner = DemoStateInner {
            emitter,
            instrumentation,
            http_client,
            service_name,
            instance_id,
            downstream_url_opt,
        };
        Ok(DemoState {
            inner: Arc::new(inner),
        })
    }
}

/// Routes of the demo service, every request being traced, measured, and logged.
pub fn demo_routes(demo_state: DemoState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/compute", get(compute_handler))
        .route("/external", get(external_handler))
        .route("/work", get(work_handler))
        .layer(middleware::from_fn_with_state(
            demo_state.clone(),
            instrument_request,
        ))
        .with_state(demo_state)
}

/// Wraps the request in a server span and hands its context to the handler.
async fn instrument_request(
    State(demo_state): State<DemoState>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let route = request.uri().path().to_string();
    let request_scope =
        demo_state
            .inner
            .instrumentation
            .start_request(&method, &route, request.headers());
    request
        .extensions_mut()
        .insert(request_scope.context().clone());
    let response = next.run(request).await;
    demo_state
        .inner
        .instrumentation
        .finish_request(request_scope, response.status().as_u16());
    response
}

async fn root_handler(
    State(demo_state): State<DemoState>,
    Extension(context): Extension<TraceContext>,
) -> Json<serde_json::Value> {
    let emitter = &demo_state.inner.emitter;
    let (span_handle, span_context) =
        emitter.start_span("home_handler", SpanKind::Internal, Some(&context));
    emitter.log_message(Severity::Info, "root endpoint hit", Some(&span_context));
    emitter.end_span(span_handle, SpanStatus::Ok);

    Json(json!({
        "service": demo_state.inner.service_name,
        "status": "ok",
        "host": demo_state.inner.instance_id,
    }))
}

async fn compute_handler(
    State(demo_state): State<DemoState>,
    Extension(context): Extension<TraceContext>,
) -> Json<serde_json::Value> {
    let emitter = &demo_state.inner.emitter;
    let (mut span_handle, span_context) =
        emitter.start_span("compute_operation", SpanKind::Internal, Some(&context));
    let (delay_secs, value) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(1..=3u64), rng.gen_range(10..=100u64))
    };
    tokio::time::sleep(Duration::from_secs(delay_secs)).await;

    span_handle.set_attribute("compute.value", value as i64);
    emitter.log_message(
        Severity::Info,
        format!("computed value={value} after {delay_secs}s delay"),
        Some(&span_context),
    );
    emitter.end_span(span_handle, SpanStatus::Ok);
    Json(json!({ "value": value, "delay": delay_secs }))
}

async fn external_handler(
    State(demo_state): State<DemoState>,
    Extension(context): Extension<TraceContext>,
) -> Response {
    let emitter = &demo_state.inner.emitter;
    let Some(downstream_url) = demo_state.inner.downstream_url_opt.as_deref() else {
        let body = json!({ "message": "no downstream service is configured" });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    };
    let (mut span_handle, span_context) =
        emitter.start_span("external_call", SpanKind::Internal, Some(&context));
    let mut headers = HeaderMap::new();
    let (mut client_span_handle, _client_context) =
        inject_outbound(emitter, "GET /work", &span_context, &mut headers);

    let work_url = format!("{}/work", downstream_url.trim_end_matches('/'));
    let send_res = demo_state
        .inner
        .http_client
        .get(&work_url)
        .headers(headers)
        .send()
        .await;

    match send_res {
        Ok(response) => {
            let status_code = response.status().as_u16();
            client_span_handle.set_attribute("http.status_code", status_code);
            span_handle.set_attribute("external.status_code", status_code);
            let client_span_status = if response.status().is_server_error() {
                SpanStatus::error(format!("HTTP {status_code}"))
            } else {
                SpanStatus::Ok
            };
            emitter.end_span(client_span_handle, client_span_status);
            emitter.log_message(
                Severity::Info,
                format!("called downstream service, status_code={status_code}"),
                Some(&span_context),
            );
            emitter.end_span(span_handle, SpanStatus::Ok);
            Json(json!({ "external_status": status_code })).into_response()
        }
        Err(error) => {
            let message = format!("failed to call downstream service: {error}");
            emitter.end_span(client_span_handle, SpanStatus::error(message.clone()));
            emitter.log_message(Severity::Error, message.clone(), Some(&span_context));
            emitter.end_span(span_handle, SpanStatus::error(message.clone()));
            (StatusCode::BAD_GATEWAY, Json(json!({ "message": message }))).into_response()
        }
    }
}

async fn work_handler(
    State(demo_state): State<DemoState>,
    Extension(context): Extension<TraceContext>,
) -> Response {
    let emitter = &demo_state.inner.emitter;
    let (mut span_handle, span_context) =
        emitter.start_span("work-span", SpanKind::Internal, Some(&context));
    emitter.log_message(Severity::Info, "handling request", Some(&span_context));
    let work_duration = Duration::from_millis(rand::thread_rng().gen_range(50..=200));
    let work_secs = work_duration.as_secs_f64();
    span_handle.set_attribute("work.duration", work_secs);

    if work_duration > SLOW_WORK_THRESHOLD {
        emitter.log_message(
            Severity::Warn,
            format!("work slow: {work_secs:.3}s"),
            Some(&span_context),
        );
        emitter.end_span(span_handle, SpanStatus::error("work took too long"));
        return (StatusCode::INTERNAL_SERVER_ERROR, "work took too long").into_response();
    }
    tokio::time::sleep(work_duration).await;

    emitter.log_message(
        Severity::Info,
        format!("completed work in {work_secs:.3}s"),
        Some(&span_context),
    );
    emitter.end_span(span_handle, SpanStatus::Ok);
    Json(json!({ "status": "work completed", "duration": work_secs })).into_response()
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use otelpipe_proto::{AttributeValue, Attributes, MetricValue};
    use otelpipe_sdk::{HTTP_SERVER_REQUEST_DURATION, MemorySink, Sampler};
    use serde_json::Value as JsonValue;

    use super::*;
    use crate::cli::{CliCommand, build_cli};

    fn test_demo_state(
        service_name: &str,
        downstream_url_opt: Option<String>,
    ) -> (DemoState, Meter, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let emitter = Emitter::new(sink.clone(), Attributes::new(), Sampler::AlwaysOn);
        let meter = Meter::new();
        let demo_state = DemoState::new(
            emitter,
            &meter,
            service_name.to_string(),
            format!("{service_name}-1"),
            downstream_url_opt,
        )
        .unwrap();
        (demo_state, meter, sink)
    }

    #[test]
    fn test_parse_demo_service_args() -> anyhow::Result<()> {
        let command = build_cli().no_binary_name(true);
        let matches = command.try_get_matches_from([
            "demo-service",
            "--service-name",
            "service-a",
            "--listen-address",
            "127.0.0.1:8001",
            "--downstream-url",
            "http://127.0.0.1:8002",
            "--collector-endpoint",
            "http://127.0.0.1:4318",
        ])?;
        let command = CliCommand::parse_cli_args(matches)?;
        assert_eq!(
            command,
            CliCommand::DemoService(DemoServiceCliCommand {
                service_name: "service-a".to_string(),
                listen_address: "127.0.0.1:8001".parse()?,
                downstream_url_opt: Some("http://127.0.0.1:8002".to_string()),
                collector_endpoint_opt: Some("http://127.0.0.1:4318".to_string()),
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_root_handler_is_traced() {
        let (demo_state, meter, sink) = test_demo_state("service-a", None);
        let server = TestServer::new(demo_routes(demo_state)).unwrap();

        let response = server.get("/").await;
        response.assert_status_ok();
        let body: JsonValue = response.json();
        assert_eq!(body["service"], "service-a");
        assert_eq!(body["host"], "service-a-1");

        let spans = sink.spans();
        assert_eq!(spans.len(), 2);
        let handler_span = &spans[0];
        let server_span = &spans[1];
        assert_eq!(handler_span.name, "home_handler");
        assert_eq!(server_span.name, "GET /");
        assert_eq!(handler_span.trace_id, server_span.trace_id);
        assert_eq!(handler_span.parent_span_id, Some(server_span.span_id));
        assert_eq!(
            server_span.attributes.get("http.status_code"),
            Some(&AttributeValue::from(200u16))
        );

        let log_records = sink.log_records();
        assert_eq!(log_records.len(), 2);
        assert_eq!(log_records[0].body, "root endpoint hit");
        assert_eq!(log_records[0].span_id, Some(handler_span.span_id));
        assert!(log_records[1].body.starts_with("GET / -> 200 ("));
        assert_eq!(log_records[1].trace_id, Some(server_span.trace_id));

        let metric_points = meter.collect();
        let request_duration = metric_points
            .iter()
            .find(|metric_point| metric_point.name == HTTP_SERVER_REQUEST_DURATION)
            .unwrap();
        assert!(matches!(
            &request_duration.value,
            MetricValue::Histogram(histogram) if histogram.count == 1
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_compute_handler() {
        let (demo_state, _meter, sink) = test_demo_state("service-a", None);
        let server = TestServer::new(demo_routes(demo_state)).unwrap();

        let response = server.get("/compute").await;
        response.assert_status_ok();
        let body: JsonValue = response.json();
        let delay_secs = body["delay"].as_u64().unwrap();
        assert!((1..=3).contains(&delay_secs));
        let value = body["value"].as_u64().unwrap();
        assert!((10..=100).contains(&value));

        let log_records = sink.log_records();
        assert_eq!(
            log_records[0].body,
            format!("computed value={value} after {delay_secs}s delay")
        );
    }

    #[tokio::test]
    async fn test_work_handler() {
        let (demo_state, _meter, sink) = test_demo_state("service-b", None);
        let server = TestServer::new(demo_routes(demo_state)).unwrap();

        let response = server.get("/work").await;
        let status_code = response.status_code();
        let spans = sink.spans();
        let work_span = spans.iter().find(|span| span.name == "work-span").unwrap();
        let server_span = spans.iter().find(|span| span.name == "GET /work").unwrap();

        if status_code == StatusCode::OK {
            assert_eq!(work_span.status, SpanStatus::Ok);
            assert_eq!(server_span.status, SpanStatus::Ok);
        } else {
            assert_eq!(status_code, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(work_span.status.is_error());
            assert!(server_span.status.is_error());
            let log_records = sink.log_records();
            assert!(
                log_records
                    .iter()
                    .any(|log_record| log_record.severity == Severity::Warn)
            );
        }
    }

    #[tokio::test]
    async fn test_external_handler_without_downstream() {
        let (demo_state, _meter, _sink) = test_demo_state("service-a", None);
        let server = TestServer::new(demo_routes(demo_state)).unwrap();
        server
            .get("/external")
            .expect_failure()
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_external_handler_propagates_context() {
        let (downstream_state, _meter, downstream_sink) = test_demo_state("service-b", None);
        let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let downstream_addr = tcp_listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(tcp_listener, demo_routes(downstream_state))
                .await
                .unwrap();
        });
        let (demo_state, _meter, sink) =
            test_demo_state("service-a", Some(format!("http://{downstream_addr}")));
        let server = TestServer::new(demo_routes(demo_state)).unwrap();

        let response = server.get("/external").await;
        response.assert_status_ok();
        let body: JsonValue = response.json();
        let external_status = body["external_status"].as_u64().unwrap();
        assert!(external_status == 200 || external_status == 500);

        let upstream_spans = sink.spans();
        let client_span = upstream_spans
            .iter()
            .find(|span| span.name == "GET /work")
            .unwrap();
        assert_eq!(client_span.kind, SpanKind::Client);

        let downstream_spans = downstream_sink.spans();
        let downstream_server_span = downstream_spans
            .iter()
            .find(|span| span.name == "GET /work")
            .unwrap();
        assert_eq!(downstream_server_span.kind, SpanKind::Server);
        assert_eq!(downstream_server_span.trace_id, client_span.trace_id);
        assert_eq!(
            downstream_server_span.parent_span_id,
            Some(client_span.span_id)
        );
        assert!(
            downstream_sink
                .log_records()
                .iter()
                .all(|log_record| log_record.trace_id == Some(client_span.trace_id))
        );
    }
}
