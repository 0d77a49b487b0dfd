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

use otelpipe_proto::{ParseIdError, PipelineError, ServiceError, ServiceErrorCode};
use thiserror::Error;

/// Errors returned by the REST API handlers on top of the pipeline's own errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("exporter `{0}` does not exist")]
    ExporterNotFound(String),
    #[error("exporter `{exporter_id}` is not a `{expected_type}` exporter")]
    WrongExporterType {
        exporter_id: String,
        expected_type: &'static str,
    },
    #[error("no `memory` exporter is configured")]
    NoMemoryExporter,
    #[error("invalid trace ID `{trace_id}`: {error}")]
    InvalidTraceId {
        trace_id: String,
        error: ParseIdError,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ServiceError for ApiError {
    fn error_code(&self) -> ServiceErrorCode {
        match self {
            ApiError::ExporterNotFound(_) => ServiceErrorCode::NotFound,
            ApiError::WrongExporterType { .. } => ServiceErrorCode::BadRequest,
            ApiError::NoMemoryExporter => ServiceErrorCode::NotFound,
            ApiError::InvalidTraceId { .. } => ServiceErrorCode::BadRequest,
            ApiError::Pipeline(pipeline_error) => pipeline_error.error_code(),
        }
    }
}
