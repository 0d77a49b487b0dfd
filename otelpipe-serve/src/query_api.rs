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

use axum::extract::{Path, Query};
use axum::routing::get;
use axum::{Extension, Router};
use otelpipe_collector::{MemoryExporter, Pipeline};
use otelpipe_proto::{LogRecord, Span, TraceId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::rest_api_response::{RestApiResponse, into_rest_api_response};

pub(crate) fn query_routes() -> Router {
    Router::new()
        .route("/api/v1/traces/:trace_id", get(get_trace_handler))
        .route("/api/v1/logs", get(search_logs_handler))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TraceQueryParams {
    exporter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogsQueryParams {
    trace_id: Option<String>,
    exporter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TraceResponse {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub log_records: Vec<LogRecord>,
}

fn find_memory_exporter<'a>(
    pipeline: &'a Pipeline,
    exporter_id_opt: Option<&str>,
) -> Result<&'a MemoryExporter, ApiError> {
    let Some(exporter_id) = exporter_id_opt else {
        return pipeline
            .memory_exporter(None)
            .ok_or(ApiError::NoMemoryExporter);
    };
    pipeline
        .exporter(exporter_id)
        .ok_or_else(|| ApiError::ExporterNotFound(exporter_id.to_string()))?
        .as_memory()
        .ok_or_else(|| ApiError::WrongExporterType {
            exporter_id: exporter_id.to_string(),
            expected_type: "memory",
        })
}

fn parse_trace_id(trace_id: &str) -> Result<TraceId, ApiError> {
    trace_id
        .parse::<TraceId>()
        .map_err(|error| ApiError::InvalidTraceId {
            trace_id: trace_id.to_string(),
            error,
        })
}

/// Returns the spans of a trace stored by a `memory` exporter, in start time order.
async fn get_trace_handler(
    Extension(pipeline): Extension<Pipeline>,
    Path(trace_id): Path<String>,
    Query(query_params): Query<TraceQueryParams>,
) -> RestApiResponse {
    into_rest_api_response(get_trace(
        &pipeline,
        &trace_id,
        query_params.exporter.as_deref(),
    ))
}

fn get_trace(
    pipeline: &Pipeline,
    trace_id: &str,
    exporter_id_opt: Option<&str>,
) -> Result<TraceResponse, ApiError> {
    let trace_id = parse_trace_id(trace_id)?;
    let memory_exporter = find_memory_exporter(pipeline, exporter_id_opt)?;
    let mut spans = memory_exporter.spans_by_trace_id(trace_id);
    spans.sort_by_key(|span| span.start_timestamp_nanos);
    Ok(TraceResponse { trace_id, spans })
}

/// Returns the log records stored by a `memory` exporter, optionally restricted to one trace.
async fn search_logs_handler(
    Extension(pipeline): Extension<Pipeline>,
    Query(query_params): Query<LogsQueryParams>,
) -> RestApiResponse {
    into_rest_api_response(search_logs(&pipeline, &query_params))
}

fn search_logs(
    pipeline: &Pipeline,
    query_params: &LogsQueryParams,
) -> Result<LogsResponse, ApiError> {
    let trace_id_opt = query_params
        .trace_id
        .as_deref()
        .map(parse_trace_id)
        .transpose()?;
    let memory_exporter = find_memory_exporter(pipeline, query_params.exporter.as_deref())?;
    let log_records = match trace_id_opt {
        Some(trace_id) => memory_exporter.log_records_by_trace_id(trace_id),
        None => memory_exporter.log_records(),
    };
    Ok(LogsResponse { log_records })
}
