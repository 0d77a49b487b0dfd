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

//! HTTP surface of the collector: ingestion, metrics scraping, in-memory store queries, and
//! health checks.

mod error;
mod ingest_api;
mod metrics_api;
mod pipeline_api;
mod query_api;
mod rest_api_response;

use std::future::Future;

use anyhow::Context;
use axum::{Extension, Router};
use otelpipe_collector::{Pipeline, ShutdownReport};
use otelpipe_config::PipelineConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use crate::error::ApiError;
pub use crate::query_api::{LogsResponse, TraceResponse};

/// Builds the REST API router of a running pipeline.
pub fn rest_routes(pipeline: Pipeline) -> Router {
    Router::new()
        .merge(ingest_api::ingest_routes())
        .merge(metrics_api::metrics_routes())
        .merge(query_api::query_routes())
        .merge(pipeline_api::pipeline_routes())
        .layer(Extension(pipeline))
}

/// Starts the pipeline described by the config and serves its REST API until `shutdown_signal`
/// resolves, then shuts the pipeline down.
pub async fn serve_otelpipe<F>(
    pipeline_config: PipelineConfig,
    shutdown_signal: F,
) -> anyhow::Result<ShutdownReport>
where
    F: Future<Output = ()> + Send + 'static,
{
    let tcp_listener = TcpListener::bind(pipeline_config.listen_address)
        .await
        .with_context(|| {
            format!(
                "failed to bind REST server to `{}`",
                pipeline_config.listen_address
            )
        })?;
    let pipeline = Pipeline::spawn(&pipeline_config)?;
    serve_pipeline(pipeline, tcp_listener, shutdown_signal).await
}

/// Serves the REST API of `pipeline` on `tcp_listener`. Once `shutdown_signal` resolves, the
/// server stops accepting connections, finishes the in-flight requests, then the pipeline drains.
pub async fn serve_pipeline<F>(
    pipeline: Pipeline,
    tcp_listener: TcpListener,
    shutdown_signal: F,
) -> anyhow::Result<ShutdownReport>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = tcp_listener.local_addr()?;
    info!(listen_address=%local_addr, "REST server listening");

    let serve_res = axum::serve(tcp_listener, rest_routes(pipeline.clone()))
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("REST server failed");

    let shutdown_report = pipeline.shutdown().await;

    if shutdown_report.timed_out {
        warn!(
            num_abandoned_batches=%shutdown_report.num_abandoned_batches(),
            elapsed_millis=%shutdown_report.elapsed_millis,
            "pipeline shutdown timed out"
        );
    } else {
        info!(
            num_abandoned_batches=%shutdown_report.num_abandoned_batches(),
            elapsed_millis=%shutdown_report.elapsed_millis,
            "pipeline shut down"
        );
    }
    serve_res?;
    Ok(shutdown_report)
}

/// Resolves on ctrl-c or, on Unix, on SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error=%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                warn!(error=%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = sigterm => info!("received SIGTERM, shutting down"),
    }
}
