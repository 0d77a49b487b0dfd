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
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use otelpipe_proto::ServiceError;
use serde::Serialize;
use tracing::error;

const JSON_SERIALIZATION_ERROR: &str = "JSON serialization failed.";

#[derive(Serialize)]
pub(crate) struct RestApiError {
    #[serde(skip_serializing)]
    pub status_code: StatusCode,
    pub message: String,
}

impl RestApiError {
    pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
        RestApiError {
            status_code,
            message: message.into(),
        }
    }
}

impl<E: ServiceError> From<E> for RestApiError {
    fn from(error: E) -> Self {
        RestApiError {
            status_code: error.error_code().to_http_status_code(),
            message: error.to_string(),
        }
    }
}

/// Makes a JSON API response from a result. Errors are exposed as `{"message": ...}` with the
/// status code of their [`ServiceError`] code.
pub(crate) fn into_rest_api_response<T: Serialize, E: ServiceError>(
    result: Result<T, E>,
) -> RestApiResponse {
    match result {
        Ok(payload) => RestApiResponse::new(StatusCode::OK, &payload),
        Err(error) => RestApiError::from(error).into(),
    }
}

/// A JSON reply for the REST API.
pub(crate) struct RestApiResponse {
    status_code: StatusCode,
    body_res: serde_json::Result<Vec<u8>>,
}

impl RestApiResponse {
    pub fn new<T: Serialize>(status_code: StatusCode, payload: &T) -> Self {
        RestApiResponse {
            status_code,
            body_res: serde_json::to_vec(payload),
        }
    }
}

impl From<RestApiError> for RestApiResponse {
    fn from(rest_api_error: RestApiError) -> Self {
        RestApiResponse::new(rest_api_error.status_code, &rest_api_error)
    }
}

impl IntoResponse for RestApiResponse {
    fn into_response(self) -> Response {
        match self.body_res {
            Ok(body) => (
                self.status_code,
                [(CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(serialization_error) => {
                error!(error=%serialization_error, "failed to serialize REST response body");
                let body = serde_json::json!({ "message": JSON_SERIALIZATION_ERROR }).to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(CONTENT_TYPE, "application/json")],
                    body,
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use otelpipe_proto::PipelineError;

    use super::*;

    #[test]
    fn test_rest_api_error_from_service_error() {
        let rest_api_error = RestApiError::from(PipelineError::QueueSaturated);
        assert_eq!(rest_api_error.status_code, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rest_api_error.message, "queue saturated, retry later");

        let rest_api_error = RestApiError::from(PipelineError::unavailable("shutting down"));
        assert_eq!(rest_api_error.status_code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rest_api_error_serialization_omits_status_code() {
        let rest_api_error = RestApiError::new(StatusCode::NOT_FOUND, "not found");
        let json = serde_json::to_value(&rest_api_error).unwrap();
        assert_eq!(json, serde_json::json!({"message": "not found"}));
    }
}
