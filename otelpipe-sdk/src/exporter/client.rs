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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use otelpipe_config::ExporterClientConfig;
use otelpipe_proto::{LogRecord, MetricPoint, ProducerIdentity, Span, TelemetryItem};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::batcher::Batcher;
use super::intake::IntakeQueue;
use super::stats::{ClientCounters, ExporterClientStats};
use super::transport::{CollectorTransport, HttpCollectorTransport};
use crate::TelemetrySink;

/// Buffers the telemetry of one producer and ships it to the collector in the background.
///
/// Cloning is cheap and yields a handle to the same client.
#[derive(Clone)]
pub struct ExporterClient {
    inner: Arc<ExporterClientInner>,
}

struct ExporterClientInner {
    producer: ProducerIdentity,
    span_queue: IntakeQueue<Span>,
    metric_queue: IntakeQueue<MetricPoint>,
    log_queue: IntakeQueue<LogRecord>,
    accepting: Arc<AtomicBool>,
    counters: Arc<ClientCounters>,
    cancellation_token: CancellationToken,
    batcher_handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl ExporterClient {
    /// Spawns a client delivering to the collector over HTTP. Must be called within a Tokio
    /// runtime.
    pub fn spawn(client_config: &ExporterClientConfig) -> anyhow::Result<Self> {
        client_config.validate()?;
        let transport = HttpCollectorTransport::new(
            client_config.ingest_url(),
            client_config.request_timeout,
        )?;
        info!(
            service_name=%client_config.service_name,
            instance_id=%client_config.instance_id,
            endpoint=%client_config.endpoint,
            "starting exporter client"
        );
        Ok(Self::spawn_with_transport(client_config, Arc::new(transport)))
    }

    pub fn spawn_with_transport(
        client_config: &ExporterClientConfig,
        transport: Arc<dyn CollectorTransport>,
    ) -> Self {
        let producer = ProducerIdentity::new(
            client_config.service_name.clone(),
            client_config.instance_id.clone(),
        );
        let accepting = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(ClientCounters::default());
        let cancellation_token = CancellationToken::new();

        let span_queue = IntakeQueue::new(
            client_config.intake_capacity,
            accepting.clone(),
            counters.clone(),
        );
        let metric_queue = IntakeQueue::new(
            client_config.intake_capacity,
            accepting.clone(),
            counters.clone(),
        );
        let log_queue = IntakeQueue::new(
            client_config.intake_capacity,
            accepting.clone(),
            counters.clone(),
        );
        let batcher_handles = vec![
            spawn_batcher(
                &span_queue,
                &producer,
                &transport,
                client_config,
                &counters,
                &cancellation_token,
            ),
            spawn_batcher(
                &metric_queue,
                &producer,
                &transport,
                client_config,
                &counters,
                &cancellation_token,
            ),
            spawn_batcher(
                &log_queue,
                &producer,
                &transport,
                client_config,
                &counters,
                &cancellation_token,
            ),
        ];
        let inner = ExporterClientInner {
            producer,
            span_queue,
            metric_queue,
            log_queue,
            accepting,
            counters,
            cancellation_token,
            batcher_handles: Mutex::new(batcher_handles),
            shutdown_timeout: client_config.shutdown_timeout,
        };
        ExporterClient {
            inner: Arc::new(inner),
        }
    }

    pub fn producer(&self) -> &ProducerIdentity {
        &self.inner.producer
    }

    pub fn enqueue_span(&self, span: Span) {
        self.inner.span_queue.push(span);
    }

    pub fn enqueue_metric(&self, metric_point: MetricPoint) {
        self.inner.metric_queue.push(metric_point);
    }

    pub fn enqueue_log(&self, log_record: LogRecord) {
        self.inner.log_queue.push(log_record);
    }

    pub fn stats(&self) -> ExporterClientStats {
        self.inner.counters.snapshot()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Stops accepting telemetry and makes one final flush attempt of every buffer, bounded by
    /// the configured shutdown timeout.
    pub async fn shutdown(&self) -> ExporterClientStats {
        self.shutdown_with_timeout(self.inner.shutdown_timeout).await
    }

    pub async fn shutdown_with_timeout(&self, shutdown_timeout: Duration) -> ExporterClientStats {
        if !self.inner.accepting.swap(false, Ordering::AcqRel) {
            return self.stats();
        }
        self.inner.cancellation_token.cancel();

        let batcher_handles = std::mem::take(&mut *self.inner.batcher_handles.lock().await);
        let abort_handles: Vec<_> = batcher_handles
            .iter()
            .map(|batcher_handle| batcher_handle.abort_handle())
            .collect();

        if tokio::time::timeout(shutdown_timeout, futures::future::join_all(batcher_handles))
            .await
            .is_err()
        {
            for abort_handle in abort_handles {
                abort_handle.abort();
            }
        }
        let num_discarded_items = self
            .inner
            .counters
            .num_buffered_items
            .swap(0, Ordering::Relaxed);

        if num_discarded_items > 0 {
            ClientCounters::incr(&self.inner.counters.num_discarded_items, num_discarded_items);
            warn!(
                num_discarded_items=%num_discarded_items,
                timeout=?shutdown_timeout,
                "exporter client shutdown timed out, discarding unflushed telemetry"
            );
        }
        let stats = self.stats();
        info!(stats=?stats, "exporter client shut down");
        stats
    }
}

fn spawn_batcher<T: TelemetryItem>(
    intake_queue: &IntakeQueue<T>,
    producer: &ProducerIdentity,
    transport: &Arc<dyn CollectorTransport>,
    client_config: &ExporterClientConfig,
    counters: &Arc<ClientCounters>,
    cancellation_token: &CancellationToken,
) -> JoinHandle<()> {
    let batcher = Batcher {
        receiver: intake_queue.receiver(),
        producer: producer.clone(),
        transport: transport.clone(),
        max_batch_size: client_config.max_batch_size,
        max_batch_age: client_config.max_batch_age,
        retry_params: client_config.retry.retry_params(),
        counters: counters.clone(),
        cancellation_token: cancellation_token.clone(),
    };
    tokio::spawn(batcher.run())
}

impl TelemetrySink for ExporterClient {
    fn send_span(&self, span: Span) {
        self.enqueue_span(span);
    }

    fn send_metric(&self, metric_point: MetricPoint) {
        self.enqueue_metric(metric_point);
    }

    fn send_log(&self, log_record: LogRecord) {
        self.enqueue_log(log_record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use otelpipe_proto::{
        IngestRequest, IngestResponse, ItemStatus, PipelineError, Severity, TelemetryBatch,
        TelemetryKind, TraceId,
    };

    use super::*;
    use crate::exporter::MockCollectorTransport;

    fn accept_all(ingest_request: &IngestRequest) -> IngestResponse {
        IngestResponse {
            item_statuses: vec![ItemStatus::Accepted; ingest_request.batch.len()],
        }
    }

    /// A transport recording every request it receives.
    fn recording_transport() -> (Arc<dyn CollectorTransport>, flume::Receiver<IngestRequest>) {
        let (request_tx, request_rx) = flume::unbounded();
        let mut mock_transport = MockCollectorTransport::new();
        mock_transport
            .expect_send()
            .returning(move |ingest_request| {
                let ingest_response = accept_all(&ingest_request);
                request_tx.send(ingest_request).unwrap();
                Ok(ingest_response)
            });
        (Arc::new(mock_transport), request_rx)
    }

    fn log(body: &str) -> LogRecord {
        LogRecord::new(Severity::Info, body)
    }

    fn log_bodies(ingest_request: &IngestRequest) -> Vec<String> {
        let TelemetryBatch::Logs(log_records) = &ingest_request.batch else {
            panic!("expected a batch of logs");
        };
        log_records
            .iter()
            .map(|log_record| log_record.body.clone())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_exporter_client_flushes_on_max_size() {
        let (transport, request_rx) = recording_transport();
        let client_config = ExporterClientConfig::for_test("service-a");
        let exporter_client = ExporterClient::spawn_with_transport(&client_config, transport);

        let start = tokio::time::Instant::now();
        for i in 0..5 {
            exporter_client.enqueue_log(log(&format!("log-{i}")));
        }
        let ingest_request = request_rx.recv_async().await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(ingest_request.producer, ProducerIdentity::new("service-a", "service-a-1"));
        assert_eq!(
            log_bodies(&ingest_request),
            ["log-0", "log-1", "log-2", "log-3", "log-4"]
        );
        let stats = exporter_client.shutdown().await;
        assert_eq!(stats.num_sent_batches, 1);
        assert_eq!(stats.num_sent_items, 5);
        assert_eq!(stats.num_buffered_items, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exporter_client_flushes_on_max_age() {
        let (transport, request_rx) = recording_transport();
        let client_config = ExporterClientConfig::for_test("service-a");
        let exporter_client = ExporterClient::spawn_with_transport(&client_config, transport);

        exporter_client.enqueue_log(log("lonely"));
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(request_rx.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let ingest_request = request_rx.try_recv().unwrap();
        assert_eq!(log_bodies(&ingest_request), ["lonely"]);
        exporter_client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exporter_client_preserves_order_within_kind() {
        let (transport, request_rx) = recording_transport();
        let client_config = ExporterClientConfig::for_test("service-a");
        let exporter_client = ExporterClient::spawn_with_transport(&client_config, transport);

        for i in 0..12 {
            exporter_client.enqueue_log(log(&format!("log-{i:02}")));
        }
        let stats = exporter_client.shutdown().await;
        assert_eq!(stats.num_sent_items, 12);

        let bodies: Vec<String> = request_rx
            .try_iter()
            .flat_map(|ingest_request| log_bodies(&ingest_request))
            .collect();
        let expected_bodies: Vec<String> = (0..12).map(|i| format!("log-{i:02}")).collect();
        assert_eq!(bodies, expected_bodies);
    }

    #[tokio::test]
    async fn test_exporter_client_retries_then_drops_batch() {
        let num_attempts = Arc::new(StdMutex::new(0));
        let num_attempts_clone = num_attempts.clone();
        let mut mock_transport = MockCollectorTransport::new();
        mock_transport.expect_send().returning(move |_| {
            *num_attempts_clone.lock().unwrap() += 1;
            Err(PipelineError::transport("connection refused"))
        });
        let client_config = ExporterClientConfig::for_test("service-a");
        let exporter_client =
            ExporterClient::spawn_with_transport(&client_config, Arc::new(mock_transport));

        let trace_id = TraceId::random();
        exporter_client.enqueue_span(Span::for_test("GET /external", trace_id, None));
        let stats = exporter_client.shutdown().await;

        assert_eq!(*num_attempts.lock().unwrap(), client_config.retry.max_attempts);
        assert_eq!(stats.num_failed_batches, 1);
        assert_eq!(stats.num_failed_items, 1);
        assert_eq!(stats.num_sent_batches, 0);
    }

    #[tokio::test]
    async fn test_exporter_client_does_not_retry_validation_errors() {
        let mut mock_transport = MockCollectorTransport::new();
        mock_transport
            .expect_send()
            .times(1)
            .returning(|_| Err(otelpipe_proto::ValidationError::new("bad batch").into()));
        let client_config = ExporterClientConfig::for_test("service-a");
        let exporter_client =
            ExporterClient::spawn_with_transport(&client_config, Arc::new(mock_transport));

        exporter_client.enqueue_metric(MetricPoint::counter("hits", 1.0));
        let stats = exporter_client.shutdown().await;
        assert_eq!(stats.num_failed_batches, 1);
    }

    #[tokio::test]
    async fn test_exporter_client_counts_rejected_items() {
        let mut mock_transport = MockCollectorTransport::new();
        mock_transport.expect_send().returning(|ingest_request| {
            assert_eq!(ingest_request.batch.kind(), TelemetryKind::Metrics);
            Ok(IngestResponse {
                item_statuses: vec![
                    ItemStatus::Accepted,
                    ItemStatus::Rejected {
                        reason: "counter `hits` must have a finite non-negative value".to_string(),
                    },
                ],
            })
        });
        let client_config = ExporterClientConfig::for_test("service-a");
        let exporter_client =
            ExporterClient::spawn_with_transport(&client_config, Arc::new(mock_transport));

        exporter_client.enqueue_metric(MetricPoint::counter("hits", 1.0));
        exporter_client.enqueue_metric(MetricPoint::counter("hits", -1.0));
        let stats = exporter_client.shutdown().await;
        assert_eq!(stats.num_sent_items, 1);
        assert_eq!(stats.num_rejected_items, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exporter_client_shutdown_is_bounded() {
        let mut mock_transport = MockCollectorTransport::new();
        mock_transport.expect_send().returning(|_| Err(PipelineError::QueueSaturated));
        let mut client_config = ExporterClientConfig::for_test("service-a");
        client_config.retry.max_attempts = 1_000;
        client_config.retry.base_delay = Duration::from_secs(1);
        client_config.retry.max_delay = Duration::from_secs(1);
        let exporter_client =
            ExporterClient::spawn_with_transport(&client_config, Arc::new(mock_transport));

        for i in 0..3 {
            exporter_client.enqueue_log(log(&format!("log-{i}")));
        }
        let start = tokio::time::Instant::now();
        let stats = exporter_client
            .shutdown_with_timeout(Duration::from_secs(5))
            .await;
        assert!(start.elapsed() <= Duration::from_secs(6));
        assert_eq!(stats.num_discarded_items, 3);
        assert_eq!(stats.num_buffered_items, 0);

        exporter_client.enqueue_log(log("too late"));
        assert_eq!(exporter_client.stats().num_discarded_items, 4);
        assert!(!exporter_client.is_accepting());
    }
}
