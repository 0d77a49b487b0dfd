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
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, Attributes};
use crate::error::ValidationError;
use crate::ids::{SpanId, TraceId};
use crate::span::SERVICE_NAME_KEY;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(severity_str: &str) -> Result<Self, Self::Err> {
        let severity = match severity_str.to_ascii_lowercase().as_str() {
            "trace" => Severity::Trace,
            "debug" => Severity::Debug,
            "info" => Severity::Info,
            "warn" | "warning" => Severity::Warn,
            "error" => Severity::Error,
            "fatal" => Severity::Fatal,
            _ => return Err(format!("unknown severity `{severity_str}`")),
        };
        Ok(severity)
    }
}

/// A structured log record. When emitted within a span, `trace_id` and `span_id` identify that
/// span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_nanos: u64,
    #[serde(default)]
    pub severity: Severity,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<SpanId>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub resource_attributes: Attributes,
}

impl LogRecord {
    pub fn new(severity: Severity, body: impl Into<String>) -> Self {
        LogRecord {
            timestamp_nanos: crate::now_unix_nanos(),
            severity,
            body: body.into(),
            trace_id: None,
            span_id: None,
            attributes: Attributes::new(),
            resource_attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn service_name(&self) -> Option<&str> {
        self.resource_attributes
            .get(SERVICE_NAME_KEY)
            .and_then(AttributeValue::as_str)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(trace_id) = self.trace_id {
            if !trace_id.is_valid() {
                return Err(ValidationError::new("log record has an invalid trace ID"));
            }
        }
        match self.span_id {
            Some(span_id) if self.trace_id.is_none() => {
                return Err(ValidationError::new(format!(
                    "log record references span `{span_id}` without a trace ID"
                )));
            }
            Some(span_id) if !span_id.is_valid() => {
                return Err(ValidationError::new("log record has an invalid span ID"));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_str() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warn);
        assert_eq!("info".parse::<Severity>().unwrap(), Severity::Info);
        "loud".parse::<Severity>().unwrap_err();
        assert!(Severity::Error > Severity::Info);
    }

    #[test]
    fn test_log_record_validate() {
        let log_record = LogRecord::new(Severity::Info, "handling request");
        log_record.validate().unwrap();

        let mut orphan_span_id = log_record.clone();
        orphan_span_id.span_id = Some(SpanId::random());
        orphan_span_id.validate().unwrap_err();

        let mut correlated = orphan_span_id.clone();
        correlated.trace_id = Some(TraceId::random());
        correlated.validate().unwrap();

        let mut invalid_trace_id = correlated;
        invalid_trace_id.trace_id = Some(TraceId::INVALID);
        invalid_trace_id.validate().unwrap_err();
    }

    #[test]
    fn test_log_record_serde() {
        let log_record: LogRecord = serde_json::from_str(
            r#"{
                "timestamp_nanos": 42,
                "severity": "WARN",
                "body": "slow request",
                "trace_id": "4bf92f3577b34da6a3ce929d0e0e4736",
                "span_id": "00f067aa0ba902b7",
                "resource_attributes": {"service.name": "service-b"}
            }"#,
        )
        .unwrap();
        assert_eq!(log_record.severity, Severity::Warn);
        assert_eq!(
            log_record.trace_id.unwrap().to_hex(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(log_record.service_name(), Some("service-b"));
    }
}
