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

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, Attributes};
use crate::error::ValidationError;
use crate::ids::{SpanId, TraceId};

pub const SERVICE_NAME_KEY: &str = "service.name";
pub const SERVICE_INSTANCE_ID_KEY: &str = "service.instance.id";

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Unspecified,
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "unspecified",
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
    },
}

impl SpanStatus {
    pub fn error(message: impl Into<String>) -> Self {
        SpanStatus::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub timestamp_nanos: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

/// A completed unit of work. Spans are immutable once their end timestamp is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    #[serde(default)]
    pub kind: SpanKind,
    pub start_timestamp_nanos: u64,
    pub end_timestamp_nanos: u64,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default)]
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub resource_attributes: Attributes,
}

impl Span {
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(
            self.end_timestamp_nanos
                .saturating_sub(self.start_timestamp_nanos),
        )
    }

    pub fn service_name(&self) -> Option<&str> {
        self.resource_attributes
            .get(SERVICE_NAME_KEY)
            .and_then(AttributeValue::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.trace_id.is_valid() {
            return Err(ValidationError::new("span has an invalid trace ID"));
        }
        if !self.span_id.is_valid() {
            return Err(ValidationError::new("span has an invalid span ID"));
        }
        if let Some(parent_span_id) = self.parent_span_id {
            if !parent_span_id.is_valid() {
                return Err(ValidationError::new("span has an invalid parent span ID"));
            }
            if parent_span_id == self.span_id {
                return Err(ValidationError::new("span cannot be its own parent"));
            }
        }
        if self.name.is_empty() {
            return Err(ValidationError::new("span name is empty"));
        }
        if self.end_timestamp_nanos < self.start_timestamp_nanos {
            return Err(ValidationError::new(format!(
                "span `{}` ends before it starts",
                self.name
            )));
        }
        Ok(())
    }

    #[cfg(any(test, feature = "testsuite"))]
    pub fn for_test(name: &str, trace_id: TraceId, parent_span_id: Option<SpanId>) -> Self {
        Span {
            trace_id,
            span_id: SpanId::random(),
            parent_span_id,
            name: name.to_string(),
            kind: SpanKind::Internal,
            start_timestamp_nanos: 1_000,
            end_timestamp_nanos: 2_000,
            attributes: Attributes::new(),
            status: SpanStatus::Unset,
            events: Vec::new(),
            resource_attributes: Attributes::new(),
        }
    }
}
