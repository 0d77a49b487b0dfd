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

use axum::extract::Path;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use otelpipe_collector::Pipeline;
use tracing::error;

use crate::error::ApiError;
use crate::rest_api_response::{RestApiError, RestApiResponse};

const PROMETHEUS_TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub(crate) fn metrics_routes() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route(
            "/exporters/:exporter_id/metrics",
            get(exporter_metrics_handler),
        )
}

/// The collector's own metrics.
async fn metrics_handler() -> impl IntoResponse {
    match otelpipe_common::metrics::metrics_text_payload() {
        Ok(metrics) => (
            StatusCode::OK,
            [(CONTENT_TYPE, PROMETHEUS_TEXT_FORMAT)],
            metrics,
        ),
        Err(error) => {
            error!("failed to encode prometheus metrics: {error}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, PROMETHEUS_TEXT_FORMAT)],
                String::new(),
            )
        }
    }
}

/// Scrape endpoint of a `prometheus` exporter.
async fn exporter_metrics_handler(
    Extension(pipeline): Extension<Pipeline>,
    Path(exporter_id): Path<String>,
) -> Response {
    match render_exporter_metrics(&pipeline, &exporter_id) {
        Ok(payload) => (
            StatusCode::OK,
            [(CONTENT_TYPE, PROMETHEUS_TEXT_FORMAT)],
            payload,
        )
            .into_response(),
        Err(api_error) => RestApiResponse::from(RestApiError::from(api_error)).into_response(),
    }
}

fn render_exporter_metrics(pipeline: &Pipeline, exporter_id: &str) -> Result<String, ApiError> {
    let exporter = pipeline
        .exporter(exporter_id)
        .ok_or_else(|| ApiError::ExporterNotFound(exporter_id.to_string()))?;
    let prometheus_exporter = exporter
        .as_prometheus()
        .ok_or_else(|| ApiError::WrongExporterType {
            exporter_id: exporter_id.to_string(),
            expected_type: "prometheus",
        })?;
    let payload = prometheus_exporter.render()?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum_test::TestServer;
    use otelpipe_config::{ExporterConfig, ExporterType, PipelineConfig, RouteConfig};
    use otelpipe_proto::{IngestRequest, MetricPoint, ProducerIdentity, TelemetryBatch};
    use serde_json::Value as JsonValue;

    use super::*;

    fn prometheus_pipeline() -> Pipeline {
        let mut pipeline_config = PipelineConfig::for_test();
        pipeline_config.exporters.insert(
            "prometheus".to_string(),
            ExporterConfig::new(ExporterType::Prometheus),
        );
        pipeline_config.pipelines.metrics = Some(RouteConfig {
            processors: Vec::new(),
            exporters: vec!["prometheus".to_string()],
        });
        Pipeline::spawn(&pipeline_config).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let server = TestServer::new(metrics_routes()).unwrap();
        let response = server.get("/metrics").await;
        response.assert_status_ok();
        response.assert_header("content-type", PROMETHEUS_TEXT_FORMAT);
    }

    #[tokio::test]
    async fn test_exporter_metrics_handler() {
        let pipeline = prometheus_pipeline();
        let app = metrics_routes().layer(Extension(pipeline.clone()));
        let server = TestServer::new(app).unwrap();

        let ingest_request = IngestRequest {
            producer: ProducerIdentity::new("service-a", "service-a-1"),
            batch: TelemetryBatch::Metrics(vec![
                MetricPoint::counter("requests_total", 3.0).with_label("route", "/work"),
            ]),
        };
        pipeline.ingest(ingest_request).unwrap();

        let prometheus_exporter = pipeline.prometheus_exporter("prometheus").unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            while prometheus_exporter.num_series() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let response = server.get("/exporters/prometheus/metrics").await;
        response.assert_status_ok();
        assert!(
            response
                .text()
                .contains(r#"requests_total{route="/work"} 3"#)
        );
    }

    #[tokio::test]
    async fn test_exporter_metrics_handler_errors() {
        let pipeline = prometheus_pipeline();
        let app = metrics_routes().layer(Extension(pipeline));
        let server = TestServer::new(app).unwrap();

        let response = server
            .get("/exporters/unknown/metrics")
            .expect_failure()
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: JsonValue = response.json();
        assert_eq!(body["message"], "exporter `unknown` does not exist");

        let response = server
            .get("/exporters/memory/metrics")
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
