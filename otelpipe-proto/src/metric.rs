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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Cumulative histogram state with explicit bucket bounds. `bucket_counts[i]` counts the
/// observations in `(bounds[i - 1], bounds[i]]`, the last bucket counting observations above the
/// last bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramValue {
    pub bounds: Vec<f64>,
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramValue {
    pub fn empty(bounds: Vec<f64>) -> Self {
        let bucket_counts = vec![0; bounds.len() + 1];
        HistogramValue {
            bounds,
            bucket_counts,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, value: f64) {
        let bucket_idx = self.bounds.partition_point(|bound| *bound < value);
        self.bucket_counts[bucket_idx] += 1;
        self.sum += value;
        self.count += 1;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.bucket_counts.len() != self.bounds.len() + 1 {
            return Err(ValidationError::new(format!(
                "histogram has {} bounds but {} buckets",
                self.bounds.len(),
                self.bucket_counts.len()
            )));
        }
        if self.bounds.iter().any(|bound| !bound.is_finite())
            || self.bounds.windows(2).any(|window| window[0] >= window[1])
        {
            return Err(ValidationError::new(
                "histogram bounds must be finite and strictly increasing",
            ));
        }
        if self.bucket_counts.iter().sum::<u64>() != self.count {
            return Err(ValidationError::new(
                "histogram count does not match the sum of its buckets",
            ));
        }
        if !self.sum.is_finite() {
            return Err(ValidationError::new("histogram sum must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Histogram(HistogramValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub kind: MetricKind,
    pub value: MetricValue,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    pub timestamp_nanos: u64,
}

impl MetricPoint {
    fn new(name: impl Into<String>, kind: MetricKind, value: MetricValue) -> Self {
        MetricPoint {
            name: name.into(),
            description: None,
            unit: None,
            kind,
            value,
            labels: Labels::new(),
            timestamp_nanos: crate::now_unix_nanos(),
        }
    }

    /// A cumulative counter value.
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Counter, MetricValue::Scalar(value))
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, MetricValue::Scalar(value))
    }

    pub fn histogram(name: impl Into<String>, histogram: HistogramValue) -> Self {
        Self::new(name, MetricKind::Histogram, MetricValue::Histogram(histogram))
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn scalar_value(&self) -> Option<f64> {
        match &self.value {
            MetricValue::Scalar(value) => Some(*value),
            MetricValue::Histogram(_) => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("metric name is empty"));
        }
        if self.labels.keys().any(|label_name| label_name.is_empty()) {
            return Err(ValidationError::new(format!(
                "metric `{}` has an empty label name",
                self.name
            )));
        }
        match (&self.kind, &self.value) {
            (MetricKind::Counter, MetricValue::Scalar(value)) => {
                if !value.is_finite() || *value < 0.0 {
                    return Err(ValidationError::new(format!(
                        "counter `{}` must have a finite non-negative value, got {value}",
                        self.name
                    )));
                }
            }
            (MetricKind::Gauge, MetricValue::Scalar(value)) => {
                if !value.is_finite() {
                    return Err(ValidationError::new(format!(
                        "gauge `{}` must have a finite value",
                        self.name
                    )));
                }
            }
            (MetricKind::Histogram, MetricValue::Histogram(histogram)) => {
                histogram.validate()?;
            }
            (kind, _) => {
                return Err(ValidationError::new(format!(
                    "metric `{}` of kind `{}` has a mismatching value",
                    self.name,
                    kind.as_str()
                )));
            }
        }
        Ok(())
    }
}
