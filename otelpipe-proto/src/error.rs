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

use std::fmt;

use otelpipe_common::retry::Retryable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorCode {
    BadRequest,
    Internal,
    NotFound,
    TooManyRequests,
    Unavailable,
}

impl ServiceErrorCode {
    pub fn to_http_status_code(self) -> http::StatusCode {
        match self {
            ServiceErrorCode::BadRequest => http::StatusCode::BAD_REQUEST,
            ServiceErrorCode::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            ServiceErrorCode::NotFound => http::StatusCode::NOT_FOUND,
            ServiceErrorCode::TooManyRequests => http::StatusCode::TOO_MANY_REQUESTS,
            ServiceErrorCode::Unavailable => http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub trait ServiceError: ToString {
    fn error_code(&self) -> ServiceErrorCode;
}

/// A malformed batch or item. Never retried.
#[derive(Debug, Clone, Eq, PartialEq, Error, Serialize, Deserialize)]
#[error("{0}")]
#[serde(transparent)]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError(message.into())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("validation error: {error}")]
    Validation { error: ValidationError },
    #[error("queue saturated, retry later")]
    QueueSaturated,
    #[error("{} out of {num_exporters} exporter(s) failed: {}", failed_exporters.len(), failed_exporters.join(", "))]
    PartialExportFailure {
        failed_exporters: Vec<String>,
        num_exporters: usize,
    },
    #[error("service unavailable: {message}")]
    Unavailable { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PipelineError {
    pub fn transport(message: impl fmt::Display) -> Self {
        PipelineError::Transport {
            message: message.to_string(),
        }
    }

    pub fn unavailable(message: impl fmt::Display) -> Self {
        PipelineError::Unavailable {
            message: message.to_string(),
        }
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        PipelineError::Internal {
            message: message.to_string(),
        }
    }

    /// Maps the unsuccessful HTTP response of a peer, the collector or a backend, to an error.
    pub fn from_http_status(peer: &str, status: http::StatusCode, message: &str) -> Self {
        match status {
            http::StatusCode::TOO_MANY_REQUESTS => PipelineError::QueueSaturated,
            http::StatusCode::BAD_REQUEST => ValidationError::new(message).into(),
            http::StatusCode::SERVICE_UNAVAILABLE => {
                PipelineError::unavailable(format!("{peer} is unavailable: {message}"))
            }
            _ if status.is_server_error() => {
                PipelineError::transport(format!("{peer} responded with {status}: {message}"))
            }
            _ => PipelineError::internal(format!("{peer} responded with {status}: {message}")),
        }
    }

    /// Short label used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineError::Transport { .. } => "transport",
            PipelineError::Validation { .. } => "validation",
            PipelineError::QueueSaturated => "queue_saturated",
            PipelineError::PartialExportFailure { .. } => "partial_export_failure",
            PipelineError::Unavailable { .. } => "unavailable",
            PipelineError::Internal { .. } => "internal",
        }
    }
}

impl From<ValidationError> for PipelineError {
    fn from(error: ValidationError) -> Self {
        PipelineError::Validation { error }
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transport { .. }
                | PipelineError::QueueSaturated
                | PipelineError::Unavailable { .. }
        )
    }
}

impl ServiceError for PipelineError {
    fn error_code(&self) -> ServiceErrorCode {
        match self {
            PipelineError::Transport { .. } => ServiceErrorCode::Unavailable,
            PipelineError::Validation { .. } => ServiceErrorCode::BadRequest,
            PipelineError::QueueSaturated => ServiceErrorCode::TooManyRequests,
            PipelineError::PartialExportFailure { .. } => ServiceErrorCode::Internal,
            PipelineError::Unavailable { .. } => ServiceErrorCode::Unavailable,
            PipelineError::Internal { .. } => ServiceErrorCode::Internal,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
