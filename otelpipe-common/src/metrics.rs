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

use std::collections::HashMap;

use prometheus::{Encoder, HistogramOpts, Opts, TextEncoder};
pub use prometheus::{
    Histogram, HistogramVec as PrometheusHistogramVec, IntCounter,
    IntCounterVec as PrometheusIntCounterVec, IntGauge, IntGaugeVec as PrometheusIntGaugeVec,
    exponential_buckets,
};

const NAMESPACE: &str = "otelpipe";

/// Label-count-checked wrapper around [`prometheus::HistogramVec`].
#[derive(Clone)]
pub struct HistogramVec<const N: usize> {
    underlying: PrometheusHistogramVec,
}

impl<const N: usize> HistogramVec<N> {
    pub fn with_label_values(&self, label_values: [&str; N]) -> Histogram {
        self.underlying.with_label_values(&label_values)
    }
}

#[derive(Clone)]
pub struct IntCounterVec<const N: usize> {
    underlying: PrometheusIntCounterVec,
}

impl<const N: usize> IntCounterVec<N> {
    pub fn with_label_values(&self, label_values: [&str; N]) -> IntCounter {
        self.underlying.with_label_values(&label_values)
    }
}

#[derive(Clone)]
pub struct IntGaugeVec<const N: usize> {
    underlying: PrometheusIntGaugeVec,
}

impl<const N: usize> IntGaugeVec<N> {
    pub fn with_label_values(&self, label_values: [&str; N]) -> IntGauge {
        self.underlying.with_label_values(&label_values)
    }
}

fn owned_labels(const_labels: &[(&str, &str)]) -> HashMap<String, String> {
    const_labels
        .iter()
        .map(|(label_name, label_value)| (label_name.to_string(), label_value.to_string()))
        .collect()
}

pub fn new_counter(name: &str, help: &str, subsystem: &str) -> IntCounter {
    let counter_opts = Opts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(subsystem);
    let counter = IntCounter::with_opts(counter_opts).expect("failed to create counter");
    prometheus::register(Box::new(counter.clone())).expect("failed to register counter");
    counter
}

pub fn new_counter_vec<const N: usize>(
    name: &str,
    help: &str,
    subsystem: &str,
    const_labels: &[(&str, &str)],
    label_names: [&str; N],
) -> IntCounterVec<N> {
    let counter_opts = Opts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(subsystem)
        .const_labels(owned_labels(const_labels));
    let underlying = PrometheusIntCounterVec::new(counter_opts, &label_names)
        .expect("failed to create counter vec");
    prometheus::register(Box::new(underlying.clone())).expect("failed to register counter vec");
    IntCounterVec { underlying }
}

pub fn new_gauge(name: &str, help: &str, subsystem: &str) -> IntGauge {
    let gauge_opts = Opts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(subsystem);
    let gauge = IntGauge::with_opts(gauge_opts).expect("failed to create gauge");
    prometheus::register(Box::new(gauge.clone())).expect("failed to register gauge");
    gauge
}

pub fn new_gauge_vec<const N: usize>(
    name: &str,
    help: &str,
    subsystem: &str,
    const_labels: &[(&str, &str)],
    label_names: [&str; N],
) -> IntGaugeVec<N> {
    let gauge_opts = Opts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(subsystem)
        .const_labels(owned_labels(const_labels));
    let underlying =
        PrometheusIntGaugeVec::new(gauge_opts, &label_names).expect("failed to create gauge vec");
    prometheus::register(Box::new(underlying.clone())).expect("failed to register gauge vec");
    IntGaugeVec { underlying }
}

pub fn new_histogram_vec<const N: usize>(
    name: &str,
    help: &str,
    subsystem: &str,
    const_labels: &[(&str, &str)],
    label_names: [&str; N],
    buckets: Vec<f64>,
) -> HistogramVec<N> {
    let histogram_opts = HistogramOpts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(subsystem)
        .const_labels(owned_labels(const_labels))
        .buckets(buckets);
    let underlying = PrometheusHistogramVec::new(histogram_opts, &label_names)
        .expect("failed to create histogram vec");
    prometheus::register(Box::new(underlying.clone())).expect("failed to register histogram vec");
    HistogramVec { underlying }
}

/// Increments a gauge on creation and decrements it by the same amount on drop.
pub struct GaugeGuard<'a> {
    gauge: &'a IntGauge,
    delta: i64,
}

impl<'a> GaugeGuard<'a> {
    pub fn from_gauge(gauge: &'a IntGauge) -> Self {
        Self { gauge, delta: 0 }
    }

    pub fn add(&mut self, delta: i64) {
        self.gauge.add(delta);
        self.delta += delta;
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.sub(self.delta);
    }
}

/// Renders every metric registered in the default registry in the Prometheus text format.
pub fn metrics_text_payload() -> Result<String, String> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|error| error.to_string())?;
    String::from_utf8(buffer).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_guard() {
        let gauge = new_gauge("test_gauge_guard", "help", "common");
        {
            let mut guard = GaugeGuard::from_gauge(&gauge);
            guard.add(3);
            assert_eq!(gauge.get(), 3);
            guard.add(-1);
            assert_eq!(gauge.get(), 2);
        }
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_metrics_text_payload() {
        let counter_vec = new_counter_vec(
            "test_metrics_text_payload_total",
            "help",
            "common",
            &[],
            ["outcome"],
        );
        counter_vec.with_label_values(["ok"]).inc_by(2);
        let payload = metrics_text_payload().unwrap();
        assert!(payload.contains("otelpipe_common_test_metrics_text_payload_total{outcome=\"ok\"} 2"));
    }
}
