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
use otelpipe_collector::{MemoryExporter, Pipeline, ShutdownReport};
use otelpipe_config::{ConfigFormat, PipelineConfig};
use otelpipe_proto::{IngestRequest, IngestResponse};
use otelpipe_serve::serve_pipeline;
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;

use super::shutdown::ShutdownHandle;
use super::wait_until_predicate;

/// A collector serving its REST API on an ephemeral port.
pub(crate) struct CollectorSandbox {
    pipeline: Pipeline,
    base_url: String,
    http_client: reqwest::Client,
    shutdown_handle: ShutdownHandle<ShutdownReport>,
}

impl CollectorSandbox {
    pub async fn start(pipeline_config_yaml: &str) -> anyhow::Result<Self> {
        let pipeline_config =
            PipelineConfig::load(ConfigFormat::Yaml, pipeline_config_yaml.as_bytes())?;
        let tcp_listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", tcp_listener.local_addr()?);
        let pipeline = Pipeline::spawn(&pipeline_config)?;

        let mut shutdown_handle = ShutdownHandle::new();
        let join_handle = tokio::spawn(serve_pipeline(
            pipeline.clone(),
            tcp_listener,
            shutdown_handle.shutdown_signal(),
        ));
        shutdown_handle.set_join_handle(join_handle);

        Ok(CollectorSandbox {
            pipeline,
            base_url,
            http_client: reqwest::Client::new(),
            shutdown_handle,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Waits until the content of the memory exporter satisfies `predicate`.
    pub async fn wait_for_memory_exporter(
        &self,
        predicate: impl Fn(&MemoryExporter) -> bool,
    ) -> anyhow::Result<()> {
        let memory_exporter = self
            .pipeline
            .memory_exporter(None)
            .context("no memory exporter is configured")?;
        let predicate = &predicate;
        wait_until_predicate(
            || async move { predicate(memory_exporter) },
            Duration::from_secs(10),
            Duration::from_millis(20),
        )
        .await
    }

    pub async fn ingest(&self, ingest_request: &IngestRequest) -> anyhow::Result<IngestResponse> {
        let response = self
            .http_client
            .post(format!("{}/api/v1/ingest", self.base_url))
            .json(ingest_request)
            .send()
            .await?
            .error_for_status()?;
        let ingest_response = response.json().await?;
        Ok(ingest_response)
    }

    /// GETs a path of the REST API, returning the status code and the body parsed as JSON.
    pub async fn get_json(&self, path: &str) -> anyhow::Result<(u16, JsonValue)> {
        let response = self
            .http_client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        let status_code = response.status().as_u16();
        let body = response.json().await?;
        Ok((status_code, body))
    }

    pub async fn get_text(&self, path: &str) -> anyhow::Result<String> {
        let response = self
            .http_client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    /// Returns the status of an exporter as reported by the REST API.
    pub async fn exporter_status(&self, exporter_id: &str) -> anyhow::Result<JsonValue> {
        let (_, pipeline_status) = self.get_json("/api/v1/pipeline").await?;
        pipeline_status["exporters"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|exporter_status| exporter_status["exporter_id"] == exporter_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("exporter `{exporter_id}` not found"))
    }

    pub async fn shutdown(self) -> anyhow::Result<ShutdownReport> {
        self.shutdown_handle.shutdown().await
    }
}
