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

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Router};
use otelpipe_collector::Pipeline;
use otelpipe_proto::IngestRequest;
use tracing::debug;

use crate::rest_api_response::{RestApiError, RestApiResponse, into_rest_api_response};

pub(crate) fn ingest_routes() -> Router {
    Router::new().route("/api/v1/ingest", post(ingest_handler))
}

/// Ingests a batch of telemetry for one producer. Replies with the status of every item of the
/// batch, or with 429 when the processing queues are saturated.
async fn ingest_handler(Extension(pipeline): Extension<Pipeline>, body: Bytes) -> RestApiResponse {
    let ingest_request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(ingest_request) => ingest_request,
        Err(error) => {
            debug!(error=%error, "received malformed ingest request");
            let message = format!("failed to parse ingest request: {error}");
            return RestApiError::new(StatusCode::BAD_REQUEST, message).into();
        }
    };
    into_rest_api_response(pipeline.ingest(ingest_request))
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use otelpipe_config::PipelineConfig;
    use otelpipe_proto::{
        IngestResponse, LogRecord, ProducerIdentity, Severity, Span, TelemetryBatch, TraceId,
    };
    use serde_json::Value as JsonValue;

    use super::*;

    fn test_server(pipeline: &Pipeline) -> TestServer {
        let app = ingest_routes().layer(Extension(pipeline.clone()));
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_handler() {
        let pipeline = Pipeline::spawn(&PipelineConfig::for_test()).unwrap();
        let server = test_server(&pipeline);

        let trace_id = TraceId::random();
        let mut invalid_span = Span::for_test("GET /work", trace_id, None);
        invalid_span.name.clear();
        let ingest_request = IngestRequest {
            producer: ProducerIdentity::new("service-a", "service-a-1"),
            batch: TelemetryBatch::Traces(vec![
                Span::for_test("GET /", trace_id, None),
                invalid_span,
            ]),
        };
        let response = server.post("/api/v1/ingest").json(&ingest_request).await;
        response.assert_status_ok();

        let ingest_response: IngestResponse = response.json();
        assert_eq!(ingest_response.num_accepted(), 1);
        assert_eq!(ingest_response.num_rejected(), 1);
    }

    #[tokio::test]
    async fn test_ingest_handler_malformed_request() {
        let pipeline = Pipeline::spawn(&PipelineConfig::for_test()).unwrap();
        let server = test_server(&pipeline);

        let response = server
            .post("/api/v1/ingest")
            .text("{\"producer\": 42}")
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: JsonValue = response.json();
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("failed to parse ingest request")
        );
    }

    #[tokio::test]
    async fn test_ingest_handler_after_shutdown() {
        let pipeline = Pipeline::spawn(&PipelineConfig::for_test()).unwrap();
        pipeline.shutdown().await;
        let server = test_server(&pipeline);

        let ingest_request = IngestRequest {
            producer: ProducerIdentity::new("service-a", "service-a-1"),
            batch: TelemetryBatch::Logs(vec![LogRecord::new(Severity::Info, "too late")]),
        };
        let response = server
            .post("/api/v1/ingest")
            .json(&ingest_request)
            .expect_failure()
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: JsonValue = response.json();
        assert_eq!(
            body["message"],
            "service unavailable: the collector is shutting down"
        );
    }
}
