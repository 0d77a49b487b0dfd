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

use std::fs;

use anyhow::Context;
use otelpipe_common::truncate_str;
use otelpipe_config::{ExporterConfig, TransportSecurity};
use otelpipe_proto::{PipelineError, PipelineResult};
use serde::Serialize;
use tracing::warn;

const MAX_ERROR_BODY_LEN: usize = 512;

/// Builds the HTTP client of a push exporter, honoring its transport security mode.
pub(crate) fn build_http_client(
    exporter_id: &str,
    exporter_config: &ExporterConfig,
) -> anyhow::Result<reqwest::Client> {
    let mut client_builder = reqwest::Client::builder().timeout(exporter_config.timeout);

    if let TransportSecurity::Tls {
        ca_cert_path,
        insecure_skip_verify,
    } = &exporter_config.tls
    {
        client_builder = client_builder.https_only(true);

        if let Some(ca_cert_path) = ca_cert_path {
            let ca_cert_pem = fs::read(ca_cert_path).with_context(|| {
                format!(
                    "failed to read CA certificate `{}` of exporter `{exporter_id}`",
                    ca_cert_path.display()
                )
            })?;
            let ca_cert = reqwest::Certificate::from_pem(&ca_cert_pem).with_context(|| {
                format!(
                    "failed to parse CA certificate `{}` of exporter `{exporter_id}`",
                    ca_cert_path.display()
                )
            })?;
            client_builder = client_builder.add_root_certificate(ca_cert);
        }
        if *insecure_skip_verify {
            warn!(
                exporter_id=%exporter_id,
                "TLS certificate verification is disabled"
            );
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }
    }
    client_builder
        .build()
        .with_context(|| format!("failed to build HTTP client of exporter `{exporter_id}`"))
}

/// Posts `body` as JSON. Connection errors and timeouts are retryable transport errors.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    http_client: &reqwest::Client,
    url: &str,
    body: &T,
) -> PipelineResult<()> {
    let response = http_client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(PipelineError::transport)?;
    let status = response.status();

    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    Err(PipelineError::from_http_status(
        "backend",
        status,
        truncate_str(&message, MAX_ERROR_BODY_LEN),
    ))
}
