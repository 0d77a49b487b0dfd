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

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::{Extension, Router};
use otelpipe_collector::{Pipeline, PipelineStatus};

pub(crate) fn pipeline_routes() -> Router {
    Router::new()
        .route("/api/v1/pipeline", get(pipeline_status_handler))
        .route("/health/livez", get(livez_handler))
        .route("/health/readyz", get(readyz_handler))
}

/// Health and counters of every exporter.
async fn pipeline_status_handler(Extension(pipeline): Extension<Pipeline>) -> Json<PipelineStatus> {
    Json(pipeline.status())
}

async fn livez_handler() -> impl IntoResponse {
    Json(true)
}

/// Ready as long as the pipeline accepts telemetry.
async fn readyz_handler(Extension(pipeline): Extension<Pipeline>) -> impl IntoResponse {
    let is_ready = pipeline.is_accepting();
    let status_code = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(is_ready))
}
