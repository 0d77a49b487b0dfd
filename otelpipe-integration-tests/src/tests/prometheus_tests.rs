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

use otelpipe_common::setup_logging_for_tests;

use crate::test_utils::{CollectorSandbox, DemoServiceSandbox, wait_until_predicate};

const PROMETHEUS_PIPELINE_YAML: &str = r#"
version: 0.3
processors:
  resource:
    type: resource
exporters:
  prometheus:
    type: prometheus
  memory:
    type: memory
pipelines:
  metrics:
    processors: [resource]
    exporters: [prometheus]
  traces:
    exporters: [memory]
"#;

#[tokio::test]
async fn test_service_metrics_are_scraped_with_producer_labels() {
    setup_logging_for_tests();
    let collector = CollectorSandbox::start(PROMETHEUS_PIPELINE_YAML)
        .await
        .unwrap();
    let service_a = DemoServiceSandbox::start("service-a", collector.base_url(), None)
        .await
        .unwrap();

    let status_code = reqwest::get(format!("{}/", service_a.base_url()))
        .await
        .unwrap()
        .status();
    assert_eq!(status_code, 200);

    let jobs_counter = service_a
        .meter()
        .counter("demo.jobs", "Number of jobs processed.");
    jobs_counter.add(2.0, &[("queue", "default")]);
    jobs_counter.add(1.0, &[("queue", "default")]);

    service_a.shutdown().await.unwrap();

    let collector_ref = &collector;
    wait_until_predicate(
        || async move {
            collector_ref
                .get_text("/exporters/prometheus/metrics")
                .await
                .map(|payload| payload.contains("demo_jobs"))
                .unwrap_or(false)
        },
        Duration::from_secs(10),
        Duration::from_millis(20),
    )
    .await
    .unwrap();
    let payload = collector
        .get_text("/exporters/prometheus/metrics")
        .await
        .unwrap();

    assert!(payload.contains("# TYPE demo_jobs counter"));
    assert!(payload.contains(
        r#"demo_jobs{instance_id="service-a-1",queue="default",service_name="service-a"} 3"#
    ));
    assert!(payload.contains("# TYPE http_server_request_duration histogram"));
    assert!(payload.contains(
        r#"http_server_request_duration_count{instance_id="service-a-1",method="GET",route="/",service_name="service-a",status_code="200"} 1"#
    ));

    // The collector exposes its own metrics separately.
    let self_metrics = collector.get_text("/metrics").await.unwrap();
    assert!(self_metrics.contains("otelpipe_collector_"));
    assert!(!self_metrics.contains("demo_jobs"));

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scrape_non_prometheus_exporter() {
    let collector = CollectorSandbox::start(PROMETHEUS_PIPELINE_YAML)
        .await
        .unwrap();

    let (status_code, body) = collector
        .get_json("/exporters/memory/metrics")
        .await
        .unwrap();
    assert_eq!(status_code, 400);
    assert!(body["message"].as_str().unwrap().contains("memory"));

    let (status_code, _) = collector
        .get_json("/exporters/unknown/metrics")
        .await
        .unwrap();
    assert_eq!(status_code, 404);

    collector.shutdown().await.unwrap();
}
