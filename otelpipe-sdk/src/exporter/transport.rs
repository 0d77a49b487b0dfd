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

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use otelpipe_common::truncate_str;
use otelpipe_proto::{IngestRequest, IngestResponse, PipelineError, PipelineResult};

/// Delivers one batch to the collector and returns its per-item acknowledgment.
#[cfg_attr(any(test, feature = "testsuite"), mockall::automock)]
#[async_trait]
pub trait CollectorTransport: Send + Sync + 'static {
    async fn send(&self, ingest_request: IngestRequest) -> PipelineResult<IngestResponse>;
}

/// JSON over HTTP transport posting to the ingestion endpoint of the collector.
pub struct HttpCollectorTransport {
    http_client: reqwest::Client,
    ingest_url: String,
}

impl HttpCollectorTransport {
    pub fn new(ingest_url: String, request_timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpCollectorTransport {
            http_client,
            ingest_url,
        })
    }
}

#[async_trait]
impl CollectorTransport for HttpCollectorTransport {
    async fn send(&self, ingest_request: IngestRequest) -> PipelineResult<IngestResponse> {
        let response = self
            .http_client
            .post(&self.ingest_url)
            .json(&ingest_request)
            .send()
            .await
            .map_err(PipelineError::transport)?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<IngestResponse>()
                .await
                .map_err(|error| PipelineError::transport(format!("invalid response: {error}")));
        }
        let message = response.text().await.unwrap_or_default();
        Err(PipelineError::from_http_status(
            "collector",
            status,
            truncate_str(&message, 512),
        ))
    }
}

#[cfg(test)]
mod tests {
    use otelpipe_common::retry::Retryable;

    use super::*;

    #[tokio::test]
    async fn test_http_transport_connection_refused_is_retryable() {
        let transport = HttpCollectorTransport::new(
            "http://127.0.0.1:1/api/v1/ingest".to_string(),
            Duration::from_secs(1),
        )
        .unwrap();
        let ingest_request = IngestRequest {
            producer: otelpipe_proto::ProducerIdentity::new("service-a", "a-1"),
            batch: otelpipe_proto::TelemetryBatch::Logs(Vec::new()),
        };
        let error = transport.send(ingest_request).await.unwrap_err();
        assert!(matches!(error, PipelineError::Transport { .. }));
        assert!(error.is_retryable());
    }
}
