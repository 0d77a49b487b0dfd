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

use anyhow::Context;
use otelpipe_config::{
    AttributeAction, AttributesProcessorConfig, FilterProcessorConfig, ProcessorConfig,
    ResourceProcessorConfig,
};
use otelpipe_proto::{
    Attributes, Labels, ProducerIdentity, SERVICE_INSTANCE_ID_KEY, SERVICE_NAME_KEY,
    TelemetryBatch, ValidationError,
};
use tracing::warn;

use crate::metrics::COLLECTOR_METRICS;

/// Metric label names under which the resource processor records the producer identity.
pub const SERVICE_NAME_LABEL: &str = "service_name";
pub const INSTANCE_ID_LABEL: &str = "instance_id";

/// The closed set of batch transformations. Processors are pure: the same batch and producer
/// always yield the same output.
#[derive(Debug, Clone)]
pub enum Processor {
    Resource(ResourceProcessorConfig),
    Attributes(AttributesProcessorConfig),
    Filter(FilterProcessorConfig),
    Batch { max_batch_size: usize },
}

impl Processor {
    pub fn from_config(processor_config: &ProcessorConfig) -> Self {
        match processor_config {
            ProcessorConfig::Resource(config) => Processor::Resource(config.clone()),
            ProcessorConfig::Attributes(config) => Processor::Attributes(config.clone()),
            ProcessorConfig::Filter(config) => Processor::Filter(config.clone()),
            ProcessorConfig::Batch(config) => Processor::Batch {
                max_batch_size: config.max_batch_size,
            },
        }
    }

    fn process(
        &self,
        processor_id: &str,
        producer: &ProducerIdentity,
        batch: TelemetryBatch,
    ) -> Vec<TelemetryBatch> {
        match self {
            Processor::Resource(config) => vec![stamp_resource(config, producer, batch)],
            Processor::Attributes(config) => vec![apply_attribute_actions(processor_id, config, batch)],
            Processor::Filter(config) => vec![filter(config, batch)],
            Processor::Batch { max_batch_size } => batch.split_into_chunks(*max_batch_size),
        }
    }
}

fn stamp_resource(
    config: &ResourceProcessorConfig,
    producer: &ProducerIdentity,
    mut batch: TelemetryBatch,
) -> TelemetryBatch {
    let stamp_attributes = |attributes: &mut Attributes| {
        for (key, value) in &config.attributes {
            attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        attributes.insert(
            SERVICE_NAME_KEY.to_string(),
            producer.service_name.as_str().into(),
        );
        attributes.insert(
            SERVICE_INSTANCE_ID_KEY.to_string(),
            producer.instance_id.as_str().into(),
        );
    };
    match &mut batch {
        TelemetryBatch::Traces(spans) => {
            for span in spans {
                stamp_attributes(&mut span.resource_attributes);
            }
        }
        TelemetryBatch::Logs(log_records) => {
            for log_record in log_records {
                stamp_attributes(&mut log_record.resource_attributes);
            }
        }
        TelemetryBatch::Metrics(metric_points) => {
            for metric_point in metric_points {
                for (key, value) in &config.attributes {
                    metric_point
                        .labels
                        .entry(key.clone())
                        .or_insert_with(|| value.to_string());
                }
                metric_point
                    .labels
                    .insert(SERVICE_NAME_LABEL.to_string(), producer.service_name.clone());
                metric_point
                    .labels
                    .insert(INSTANCE_ID_LABEL.to_string(), producer.instance_id.clone());
            }
        }
    }
    batch
}

fn apply_actions_to_attributes(actions: &[AttributeAction], attributes: &mut Attributes) {
    for action in actions {
        match action {
            AttributeAction::Insert { key, value } => {
                attributes.entry(key.clone()).or_insert_with(|| value.clone());
            }
            AttributeAction::Upsert { key, value } => {
                attributes.insert(key.clone(), value.clone());
            }
            AttributeAction::Delete { key } => {
                attributes.remove(key);
            }
        }
    }
}

fn apply_actions_to_labels(actions: &[AttributeAction], labels: &mut Labels) {
    for action in actions {
        match action {
            AttributeAction::Insert { key, value } => {
                labels.entry(key.clone()).or_insert_with(|| value.to_string());
            }
            AttributeAction::Upsert { key, value } => {
                labels.insert(key.clone(), value.to_string());
            }
            AttributeAction::Delete { key } => {
                labels.remove(key);
            }
        }
    }
}

fn check_num_attributes(
    max_attributes_opt: Option<usize>,
    num_attributes: usize,
) -> Result<(), ValidationError> {
    match max_attributes_opt {
        Some(max_attributes) if num_attributes > max_attributes => Err(ValidationError::new(
            format!("item has {num_attributes} attributes, exceeding the limit of {max_attributes}"),
        )),
        _ => Ok(()),
    }
}

/// Retains the items for which `process_item` succeeds. Returns the first error and the number
/// of failed items.
fn retain_processed<T>(
    items: &mut Vec<T>,
    mut process_item: impl FnMut(&mut T) -> Result<(), ValidationError>,
) -> (usize, Option<ValidationError>) {
    let mut num_failed_items = 0;
    let mut first_error_opt = None;

    items.retain_mut(|item| match process_item(item) {
        Ok(()) => true,
        Err(error) => {
            num_failed_items += 1;
            first_error_opt.get_or_insert(error);
            false
        }
    });
    (num_failed_items, first_error_opt)
}

fn apply_attribute_actions(
    processor_id: &str,
    config: &AttributesProcessorConfig,
    mut batch: TelemetryBatch,
) -> TelemetryBatch {
    let actions = &config.actions;
    let max_attributes_opt = config.max_attributes;

    let (num_failed_items, first_error_opt) = match &mut batch {
        TelemetryBatch::Traces(spans) => retain_processed(spans, |span| {
            apply_actions_to_attributes(actions, &mut span.attributes);
            check_num_attributes(max_attributes_opt, span.attributes.len())
        }),
        TelemetryBatch::Logs(log_records) => retain_processed(log_records, |log_record| {
            apply_actions_to_attributes(actions, &mut log_record.attributes);
            check_num_attributes(max_attributes_opt, log_record.attributes.len())
        }),
        TelemetryBatch::Metrics(metric_points) => retain_processed(metric_points, |metric_point| {
            apply_actions_to_labels(actions, &mut metric_point.labels);
            check_num_attributes(max_attributes_opt, metric_point.labels.len())
        }),
    };
    if let Some(first_error) = first_error_opt {
        warn!(
            processor_id=%processor_id,
            num_failed_items=%num_failed_items,
            error=%first_error,
            "attributes processor dropped items"
        );
        COLLECTOR_METRICS
            .processor_failed_items_total
            .with_label_values([processor_id])
            .inc_by(num_failed_items as u64);
    }
    batch
}

fn filter(config: &FilterProcessorConfig, mut batch: TelemetryBatch) -> TelemetryBatch {
    let num_items_before = batch.len();

    match &mut batch {
        TelemetryBatch::Traces(spans) if !config.exclude_span_names.is_empty() => {
            spans.retain(|span| !config.exclude_span_names.contains(&span.name));
        }
        TelemetryBatch::Logs(log_records) => {
            if let Some(min_log_severity) = config.min_log_severity {
                log_records.retain(|log_record| log_record.severity >= min_log_severity);
            }
        }
        _ => {}
    }
    let num_filtered_items = num_items_before - batch.len();

    if num_filtered_items > 0 {
        COLLECTOR_METRICS
            .filtered_items_total
            .with_label_values([batch.kind().as_str()])
            .inc_by(num_filtered_items as u64);
    }
    batch
}

/// Processors of a route, applied in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<(String, Processor)>,
}

impl ProcessorChain {
    pub fn new(
        processor_ids: &[String],
        processor_configs: &BTreeMap<String, ProcessorConfig>,
    ) -> anyhow::Result<Self> {
        let processors = processor_ids
            .iter()
            .map(|processor_id| {
                let processor_config = processor_configs
                    .get(processor_id)
                    .with_context(|| format!("processor `{processor_id}` is not defined"))?;
                Ok((processor_id.clone(), Processor::from_config(processor_config)))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ProcessorChain { processors })
    }

    pub fn processor_ids(&self) -> impl Iterator<Item = &str> {
        self.processors
            .iter()
            .map(|(processor_id, _)| processor_id.as_str())
    }

    /// Runs the batch through every processor. Batches emptied along the way are discarded.
    pub fn run(&self, producer: &ProducerIdentity, batch: TelemetryBatch) -> Vec<TelemetryBatch> {
        let mut batches = vec![batch];

        for (processor_id, processor) in &self.processors {
            batches = batches
                .into_iter()
                .flat_map(|batch| processor.process(processor_id, producer, batch))
                .filter(|batch| !batch.is_empty())
                .collect();
        }
        batches
    }
}
