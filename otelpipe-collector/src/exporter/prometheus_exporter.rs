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

//! Pull-based metrics sink: keeps the latest state of every series and renders it in the
//! Prometheus text exposition format when scraped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use otelpipe_proto::{
    HistogramValue, ItemStatus, Labels, MetricKind, MetricPoint, MetricValue, PipelineError,
    PipelineResult, TelemetryBatch, ValidationError,
};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use tokio::time::Instant;

use super::ExportResponse;

/// Turns an arbitrary name into a valid Prometheus metric or label name.
fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '_' {
                character
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() || sanitized.starts_with(|character: char| character.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

struct Series {
    value: MetricValue,
    last_update: Instant,
}

struct Family {
    kind: MetricKind,
    help: String,
    series: BTreeMap<Labels, Series>,
}

impl Family {
    fn update(&mut self, metric_point: MetricPoint, now: Instant) -> Result<(), ValidationError> {
        if metric_point.kind != self.kind {
            return Err(ValidationError::new(format!(
                "metric `{}` is already exported as a {}",
                metric_point.name,
                self.kind.as_str()
            )));
        }
        if let Some(series) = self.series.get(&metric_point.labels) {
            check_update(&metric_point, &series.value)?;
        }
        if self.help.is_empty() {
            if let Some(description) = &metric_point.description {
                self.help = description.clone();
            }
        }
        let series = Series {
            value: metric_point.value,
            last_update: now,
        };
        self.series.insert(metric_point.labels, series);
        Ok(())
    }
}

fn check_update(metric_point: &MetricPoint, current_value: &MetricValue) -> Result<(), ValidationError> {
    match (&metric_point.value, current_value) {
        (MetricValue::Scalar(new_value), MetricValue::Scalar(current_value))
            if metric_point.kind == MetricKind::Counter && new_value < current_value =>
        {
            Err(ValidationError::new(format!(
                "counter `{}` cannot decrease from {current_value} to {new_value}",
                metric_point.name
            )))
        }
        (MetricValue::Histogram(new_histogram), MetricValue::Histogram(current_histogram)) => {
            if new_histogram.bounds != current_histogram.bounds {
                return Err(ValidationError::new(format!(
                    "histogram `{}` cannot change its bucket bounds",
                    metric_point.name
                )));
            }
            if new_histogram.count < current_histogram.count {
                return Err(ValidationError::new(format!(
                    "histogram `{}` cannot decrease its count from {} to {}",
                    metric_point.name, current_histogram.count, new_histogram.count
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn label_pairs(labels: &Labels) -> Vec<proto::LabelPair> {
    // Sanitizing may map distinct labels to the same name, the first one wins.
    let mut sanitized_labels: BTreeMap<String, &str> = BTreeMap::new();

    for (label_name, label_value) in labels {
        sanitized_labels
            .entry(sanitize_name(label_name))
            .or_insert(label_value.as_str());
    }
    sanitized_labels
        .into_iter()
        .map(|(label_name, label_value)| {
            let mut label_pair = proto::LabelPair::default();
            label_pair.set_name(label_name);
            label_pair.set_value(label_value.to_string());
            label_pair
        })
        .collect()
}

fn histogram_proto(histogram: &HistogramValue) -> proto::Histogram {
    let mut histogram_proto = proto::Histogram::default();
    histogram_proto.set_sample_count(histogram.count);
    histogram_proto.set_sample_sum(histogram.sum);

    let mut cumulative_count = 0;
    for (upper_bound, bucket_count) in histogram.bounds.iter().zip(&histogram.bucket_counts) {
        cumulative_count += bucket_count;
        let mut bucket = proto::Bucket::default();
        bucket.set_upper_bound(*upper_bound);
        bucket.set_cumulative_count(cumulative_count);
        histogram_proto.mut_bucket().push(bucket);
    }
    histogram_proto
}

fn metric_family(name: &str, family: &Family) -> MetricFamily {
    let mut metric_family = MetricFamily::default();
    metric_family.set_name(name.to_string());
    metric_family.set_help(family.help.clone());
    metric_family.set_field_type(match family.kind {
        MetricKind::Counter => MetricType::COUNTER,
        MetricKind::Gauge => MetricType::GAUGE,
        MetricKind::Histogram => MetricType::HISTOGRAM,
    });
    for (labels, series) in &family.series {
        let mut metric = proto::Metric::default();

        for label_pair in label_pairs(labels) {
            metric.mut_label().push(label_pair);
        }
        match (&series.value, family.kind) {
            (MetricValue::Scalar(value), MetricKind::Counter) => {
                let mut counter = proto::Counter::default();
                counter.set_value(*value);
                metric.set_counter(counter);
            }
            (MetricValue::Scalar(value), _) => {
                let mut gauge = proto::Gauge::default();
                gauge.set_value(*value);
                metric.set_gauge(gauge);
            }
            (MetricValue::Histogram(histogram), _) => {
                metric.set_histogram(histogram_proto(histogram));
            }
        }
        metric_family.mut_metric().push(metric);
    }
    metric_family
}

#[derive(Default)]
struct SeriesStore {
    families: BTreeMap<String, Family>,
}

impl SeriesStore {
    fn remove_expired(&mut self, metric_expiration: Duration, now: Instant) {
        for family in self.families.values_mut() {
            family
                .series
                .retain(|_, series| now.duration_since(series.last_update) <= metric_expiration);
        }
        self.families.retain(|_, family| !family.series.is_empty());
    }
}

/// Exposes the latest value of every series it received. Series that were not updated within
/// `metric_expiration` are dropped.
#[derive(Clone)]
pub struct PrometheusExporter {
    series_store: Arc<Mutex<SeriesStore>>,
    metric_expiration: Duration,
}

impl PrometheusExporter {
    pub fn new(metric_expiration: Duration) -> Self {
        PrometheusExporter {
            series_store: Arc::default(),
            metric_expiration,
        }
    }

    fn lock_series_store(&self) -> MutexGuard<'_, SeriesStore> {
        self.series_store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn export(&self, batch: &TelemetryBatch) -> PipelineResult<ExportResponse> {
        let TelemetryBatch::Metrics(metric_points) = batch else {
            return Err(ValidationError::new(format!(
                "prometheus exporters only accept metrics, got {}",
                batch.kind()
            ))
            .into());
        };
        let now = Instant::now();
        let mut series_store = self.lock_series_store();
        series_store.remove_expired(self.metric_expiration, now);

        let item_statuses = metric_points
            .iter()
            .map(|metric_point| {
                let family = series_store
                    .families
                    .entry(sanitize_name(&metric_point.name))
                    .or_insert_with(|| Family {
                        kind: metric_point.kind,
                        help: String::new(),
                        series: BTreeMap::new(),
                    });
                match family.update(metric_point.clone(), now) {
                    Ok(()) => ItemStatus::Accepted,
                    Err(validation_error) => ItemStatus::Rejected {
                        reason: validation_error.0,
                    },
                }
            })
            .collect();
        // A rejected first point may leave an empty family behind.
        series_store
            .families
            .retain(|_, family| !family.series.is_empty());
        Ok(ExportResponse { item_statuses })
    }

    /// Renders the live series in the Prometheus text format.
    pub fn render(&self) -> PipelineResult<String> {
        let metric_families = self.collect();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(PipelineError::internal)?;
        String::from_utf8(buffer).map_err(PipelineError::internal)
    }

    pub fn num_series(&self) -> usize {
        self.lock_series_store()
            .families
            .values()
            .map(|family| family.series.len())
            .sum()
    }
}

impl Collector for PrometheusExporter {
    fn desc(&self) -> Vec<&Desc> {
        Vec::new()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut series_store = self.lock_series_store();
        series_store.remove_expired(self.metric_expiration, Instant::now());
        series_store
            .families
            .iter()
            .map(|(name, family)| metric_family(name, family))
            .collect()
    }
}
