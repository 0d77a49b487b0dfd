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
use std::time::Duration;

use anyhow::Context;
use otelpipe_cli::demo_service::{DemoState, demo_routes};
use otelpipe_config::ExporterClientConfig;
use otelpipe_sdk::{Emitter, ExporterClient, ExporterClientStats, Meter, PeriodicReader};
use tokio::net::TcpListener;

use super::shutdown::ShutdownHandle;

const METRIC_EXPORT_INTERVAL: Duration = Duration::from_millis(100);

/// An instrumented demo service exporting its telemetry to a collector.
pub(crate) struct DemoServiceSandbox {
    base_url: String,
    meter: Meter,
    periodic_reader: PeriodicReader,
    exporter_client: ExporterClient,
    shutdown_handle: ShutdownHandle<()>,
}

impl DemoServiceSandbox {
    pub async fn start(
        service_name: &str,
        collector_base_url: &str,
        downstream_url_opt: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut client_config = ExporterClientConfig::for_test(service_name);
        client_config.endpoint = collector_base_url.to_string();

        let exporter_client = ExporterClient::spawn(&client_config)?;
        let emitter =
            Emitter::from_client_config(Arc::new(exporter_client.clone()), &client_config);
        let meter = Meter::new();
        let periodic_reader =
            meter.spawn_periodic_reader(emitter.clone(), METRIC_EXPORT_INTERVAL);
        let demo_state = DemoState::new(
            emitter,
            &meter,
            client_config.service_name.clone(),
            client_config.instance_id.clone(),
            downstream_url_opt,
        )?;
        let tcp_listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", tcp_listener.local_addr()?);

        let mut shutdown_handle = ShutdownHandle::new();
        let shutdown_signal = shutdown_handle.shutdown_signal();
        let join_handle = tokio::spawn(async move {
            axum::serve(tcp_listener, demo_routes(demo_state))
                .with_graceful_shutdown(shutdown_signal)
                .await
                .context("demo service failed")
        });
        shutdown_handle.set_join_handle(join_handle);

        Ok(DemoServiceSandbox {
            base_url,
            meter,
            periodic_reader,
            exporter_client,
            shutdown_handle,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Stops the service, then flushes the telemetry it buffered to the collector.
    pub async fn shutdown(self) -> anyhow::Result<ExporterClientStats> {
        self.shutdown_handle.shutdown().await?;
        self.periodic_reader.shutdown().await;
        Ok(self.exporter_client.shutdown().await)
    }
}
