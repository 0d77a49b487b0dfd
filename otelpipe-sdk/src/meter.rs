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

//! Synchronous metric instruments aggregated per label set, and a reader that periodically
//! exports their cumulative state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use otelpipe_proto::{HistogramValue, Labels, MetricKind, MetricPoint, now_unix_nanos};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::emitter::Emitter;

/// Default histogram bounds, suited to durations in seconds.
pub const DEFAULT_SECONDS_BOUNDS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn labels_from(label_pairs: &[(&str, &str)]) -> Labels {
    label_pairs
        .iter()
        .map(|(label_name, label_value)| (label_name.to_string(), label_value.to_string()))
        .collect()
}

#[derive(Debug)]
struct InstrumentDescriptor {
    name: String,
    description: Option<String>,
    unit: Option<String>,
}

impl InstrumentDescriptor {
    fn new(name: &str, description: &str, unit: &str) -> Arc<Self> {
        let non_empty = |text: &str| (!text.is_empty()).then(|| text.to_string());
        Arc::new(InstrumentDescriptor {
            name: name.to_string(),
            description: non_empty(description),
            unit: non_empty(unit),
        })
    }

    fn describe(&self, metric_point: MetricPoint, labels: &Labels) -> MetricPoint {
        let mut metric_point = metric_point.with_labels(labels.clone());
        metric_point.description = self.description.clone();
        metric_point.unit = self.unit.clone();
        metric_point
    }
}

/// A monotonic sum.
#[derive(Debug, Clone)]
pub struct Counter {
    descriptor: Arc<InstrumentDescriptor>,
    series: Arc<Mutex<BTreeMap<Labels, f64>>>,
}

impl Counter {
    /// Adds `value` to the series identified by `labels`. Negative increments are ignored.
    pub fn add(&self, value: f64, labels: &[(&str, &str)]) {
        if !value.is_finite() || value < 0.0 {
            warn!(
                name=%self.descriptor.name,
                value=%value,
                "counter increments must be finite and non-negative, ignoring"
            );
            return;
        }
        *lock(&self.series).entry(labels_from(labels)).or_default() += value;
    }

    fn collect(&self, timestamp_nanos: u64) -> Vec<MetricPoint> {
        lock(&self.series)
            .iter()
            .map(|(labels, value)| {
                let mut metric_point = MetricPoint::counter(self.descriptor.name.clone(), *value);
                metric_point.timestamp_nanos = timestamp_nanos;
                self.descriptor.describe(metric_point, labels)
            })
            .collect()
    }
}

/// The last recorded value of each series.
#[derive(Debug, Clone)]
pub struct Gauge {
    descriptor: Arc<InstrumentDescriptor>,
    series: Arc<Mutex<BTreeMap<Labels, f64>>>,
}

impl Gauge {
    pub fn set(&self, value: f64, labels: &[(&str, &str)]) {
        if !value.is_finite() {
            warn!(name=%self.descriptor.name, "gauge values must be finite, ignoring");
            return;
        }
        lock(&self.series).insert(labels_from(labels), value);
    }

    fn collect(&self, timestamp_nanos: u64) -> Vec<MetricPoint> {
        lock(&self.series)
            .iter()
            .map(|(labels, value)| {
                let mut metric_point = MetricPoint::gauge(self.descriptor.name.clone(), *value);
                metric_point.timestamp_nanos = timestamp_nanos;
                self.descriptor.describe(metric_point, labels)
            })
            .collect()
    }
}

/// Distribution of recorded values over explicit buckets.
#[derive(Debug, Clone)]
pub struct Histogram {
    descriptor: Arc<InstrumentDescriptor>,
    bounds: Arc<Vec<f64>>,
    series: Arc<Mutex<BTreeMap<Labels, HistogramValue>>>,
}

impl Histogram {
    pub fn record(&self, value: f64, labels: &[(&str, &str)]) {
        if !value.is_finite() {
            warn!(name=%self.descriptor.name, "histogram values must be finite, ignoring");
            return;
        }
        lock(&self.series)
            .entry(labels_from(labels))
            .or_insert_with(|| HistogramValue::empty(self.bounds.as_ref().clone()))
            .observe(value);
    }

    fn collect(&self, timestamp_nanos: u64) -> Vec<MetricPoint> {
        lock(&self.series)
            .iter()
            .map(|(labels, histogram)| {
                let mut metric_point =
                    MetricPoint::histogram(self.descriptor.name.clone(), histogram.clone());
                metric_point.timestamp_nanos = timestamp_nanos;
                self.descriptor.describe(metric_point, labels)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Instrument {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

impl Instrument {
    fn kind(&self) -> MetricKind {
        match self {
            Instrument::Counter(_) => MetricKind::Counter,
            Instrument::Gauge(_) => MetricKind::Gauge,
            Instrument::Histogram(_) => MetricKind::Histogram,
        }
    }

    fn collect(&self, timestamp_nanos: u64) -> Vec<MetricPoint> {
        match self {
            Instrument::Counter(counter) => counter.collect(timestamp_nanos),
            Instrument::Gauge(gauge) => gauge.collect(timestamp_nanos),
            Instrument::Histogram(histogram) => histogram.collect(timestamp_nanos),
        }
    }
}

/// Registry of the instruments of a service.
#[derive(Debug, Clone, Default)]
pub struct Meter {
    instruments: Arc<Mutex<BTreeMap<String, Instrument>>>,
}

impl Meter {
    pub fn new() -> Self {
        Meter::default()
    }

    /// Returns the instrument registered under `name`, registering `new_instrument` first if
    /// there is none. An instrument of another kind under the same name is kept, and the new
    /// one is returned unregistered.
    fn register(&self, name: &str, new_instrument: Instrument) -> Instrument {
        let mut instruments = lock(&self.instruments);

        match instruments.get(name) {
            Some(instrument) if instrument.kind() == new_instrument.kind() => instrument.clone(),
            Some(instrument) => {
                warn!(
                    name=%name,
                    registered_kind=%instrument.kind().as_str(),
                    requested_kind=%new_instrument.kind().as_str(),
                    "instrument already registered with another kind, it will not be exported"
                );
                new_instrument
            }
            None => {
                instruments.insert(name.to_string(), new_instrument.clone());
                new_instrument
            }
        }
    }

    pub fn counter(&self, name: &str, description: &str) -> Counter {
        let counter = Counter {
            descriptor: InstrumentDescriptor::new(name, description, ""),
            series: Arc::default(),
        };
        match self.register(name, Instrument::Counter(counter.clone())) {
            Instrument::Counter(counter) => counter,
            _ => counter,
        }
    }

    pub fn gauge(&self, name: &str, description: &str) -> Gauge {
        let gauge = Gauge {
            descriptor: InstrumentDescriptor::new(name, description, ""),
            series: Arc::default(),
        };
        match self.register(name, Instrument::Gauge(gauge.clone())) {
            Instrument::Gauge(gauge) => gauge,
            _ => gauge,
        }
    }

    /// Registers a histogram with the default bounds, suited to seconds.
    pub fn histogram(&self, name: &str, description: &str, unit: &str) -> Histogram {
        self.histogram_with_bounds(name, description, unit, DEFAULT_SECONDS_BOUNDS.to_vec())
    }

    pub fn histogram_with_bounds(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        bounds: Vec<f64>,
    ) -> Histogram {
        let bounds_are_valid = bounds.iter().all(|bound| bound.is_finite())
            && bounds.windows(2).all(|window| window[0] < window[1]);
        let bounds = if bounds_are_valid {
            bounds
        } else {
            warn!(name=%name, "histogram bounds must be finite and strictly increasing, using defaults");
            DEFAULT_SECONDS_BOUNDS.to_vec()
        };
        let histogram = Histogram {
            descriptor: InstrumentDescriptor::new(name, description, unit),
            bounds: Arc::new(bounds),
            series: Arc::default(),
        };
        match self.register(name, Instrument::Histogram(histogram.clone())) {
            Instrument::Histogram(histogram) => histogram,
            _ => histogram,
        }
    }

    /// Snapshots the cumulative state of every series.
    pub fn collect(&self) -> Vec<MetricPoint> {
        let timestamp_nanos = now_unix_nanos();
        let instruments: Vec<Instrument> = lock(&self.instruments).values().cloned().collect();
        instruments
            .iter()
            .flat_map(|instrument| instrument.collect(timestamp_nanos))
            .collect()
    }

    /// Exports a snapshot through the emitter every `export_interval`, and once more on
    /// shutdown.
    pub fn spawn_periodic_reader(&self, emitter: Emitter, export_interval: Duration) -> PeriodicReader {
        let meter = self.clone();
        let cancellation_token = CancellationToken::new();
        let task_cancellation_token = cancellation_token.clone();

        let join_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(export_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = task_cancellation_token.cancelled() => break,
                    _ = interval.tick() => export_snapshot(&meter, &emitter),
                }
            }
            export_snapshot(&meter, &emitter);
        });
        PeriodicReader {
            cancellation_token,
            join_handle,
        }
    }
}

fn export_snapshot(meter: &Meter, emitter: &Emitter) {
    let metric_points = meter.collect();
    debug!(num_points=%metric_points.len(), "exporting metric snapshot");

    for metric_point in metric_points {
        emitter.record_metric(metric_point);
    }
}

pub struct PeriodicReader {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl PeriodicReader {
    /// Stops the reader after a final snapshot.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();

        if let Err(join_error) = self.join_handle.await {
            warn!(error=%join_error, "periodic metric reader failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use otelpipe_proto::{Attributes, MetricValue};

    use super::*;
    use crate::MemorySink;
    use crate::emitter::Sampler;

    #[test]
    fn test_counter_aggregates_per_label_set() {
        let meter = Meter::new();
        let counter = meter.counter("requests_total", "Number of requests");
        counter.add(1.0, &[("route", "/work")]);
        counter.add(2.0, &[("route", "/work")]);
        counter.add(1.0, &[("route", "/")]);
        counter.add(-5.0, &[("route", "/")]);

        let metric_points = meter.collect();
        assert_eq!(metric_points.len(), 2);
        assert_eq!(metric_points[0].labels["route"], "/");
        assert_eq!(metric_points[0].scalar_value(), Some(1.0));
        assert_eq!(metric_points[1].scalar_value(), Some(3.0));
        assert_eq!(metric_points[1].description.as_deref(), Some("Number of requests"));
        for metric_point in &metric_points {
            metric_point.validate().unwrap();
        }
    }

    #[test]
    fn test_register_returns_existing_instrument() {
        let meter = Meter::new();
        meter.counter("hits", "").add(1.0, &[]);
        meter.counter("hits", "").add(1.0, &[]);
        let gauge = meter.gauge("hits", "");
        gauge.set(42.0, &[]);

        let metric_points = meter.collect();
        assert_eq!(metric_points.len(), 1);
        assert_eq!(metric_points[0].kind, MetricKind::Counter);
        assert_eq!(metric_points[0].scalar_value(), Some(2.0));
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let meter = Meter::new();
        let gauge = meter.gauge("queue_depth", "");
        gauge.set(3.0, &[]);
        gauge.set(1.0, &[]);
        gauge.set(f64::NAN, &[]);
        assert_eq!(meter.collect()[0].scalar_value(), Some(1.0));
    }

    #[test]
    fn test_histogram_record() {
        let meter = Meter::new();
        let histogram = meter.histogram_with_bounds("latency", "", "s", vec![0.1, 1.0]);
        histogram.record(0.05, &[]);
        histogram.record(0.5, &[]);
        histogram.record(2.0, &[]);

        let metric_points = meter.collect();
        assert_eq!(metric_points[0].unit.as_deref(), Some("s"));
        let MetricValue::Histogram(histogram_value) = &metric_points[0].value else {
            panic!("expected a histogram");
        };
        assert_eq!(histogram_value.bucket_counts, vec![1, 1, 1]);
        assert_eq!(histogram_value.count, 3);

        let fallback = meter.histogram_with_bounds("bad_bounds", "", "s", vec![1.0, 0.5]);
        fallback.record(0.2, &[]);
        let MetricValue::Histogram(histogram_value) = &meter.collect()[0].value else {
            panic!("expected a histogram");
        };
        assert_eq!(histogram_value.bounds, DEFAULT_SECONDS_BOUNDS.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_reader_exports_snapshots() {
        let sink = Arc::new(MemorySink::default());
        let emitter = Emitter::new(sink.clone(), Attributes::new(), Sampler::AlwaysOn);
        let meter = Meter::new();
        let counter = meter.counter("hits", "");
        counter.add(1.0, &[]);

        let periodic_reader = meter.spawn_periodic_reader(emitter, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(sink.metric_points().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sink.metric_points().len(), 1);

        counter.add(1.0, &[]);
        periodic_reader.shutdown().await;
        let metric_points = sink.metric_points();
        assert_eq!(metric_points.len(), 2);
        assert_eq!(metric_points[1].scalar_value(), Some(2.0));
    }
}
