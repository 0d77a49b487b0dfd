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

use flume::TrySendError;
use otelpipe_proto::TelemetryItem;

use super::stats::ClientCounters;
use crate::metrics::SDK_METRICS;

/// Bounded queue between the emitting code and a batcher. Pushing never blocks: when the queue is
/// full, the oldest unsent item is dropped to make room.
pub(crate) struct IntakeQueue<T> {
    sender: flume::Sender<T>,
    // Held so the producer side can evict the oldest item.
    receiver: flume::Receiver<T>,
    accepting: Arc<AtomicBool>,
    counters: Arc<ClientCounters>,
}

impl<T: TelemetryItem> IntakeQueue<T> {
    pub fn new(capacity: usize, accepting: Arc<AtomicBool>, counters: Arc<ClientCounters>) -> Self {
        let (sender, receiver) = flume::bounded(capacity.max(1));
        IntakeQueue {
            sender,
            receiver,
            accepting,
            counters,
        }
    }

    pub fn receiver(&self) -> flume::Receiver<T> {
        self.receiver.clone()
    }

    pub fn push(&self, item: T) {
        let kind_label = T::KIND.as_str();

        if !self.accepting.load(Ordering::Acquire) {
            ClientCounters::incr(&self.counters.num_discarded_items, 1);
            SDK_METRICS
                .discarded_items_total
                .with_label_values([kind_label])
                .inc();
            return;
        }
        ClientCounters::incr(&self.counters.num_enqueued_items, 1);
        SDK_METRICS
            .enqueued_items_total
            .with_label_values([kind_label])
            .inc();
        ClientCounters::incr(&self.counters.num_buffered_items, 1);

        let mut item = item;
        loop {
            match self.sender.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected_item)) => {
                    if self.receiver.try_recv().is_ok() {
                        ClientCounters::decr(&self.counters.num_buffered_items, 1);
                        ClientCounters::incr(&self.counters.num_dropped_items, 1);
                        SDK_METRICS
                            .dropped_items_total
                            .with_label_values([kind_label])
                            .inc();
                    }
                    item = rejected_item;
                }
                Err(TrySendError::Disconnected(_)) => {
                    ClientCounters::decr(&self.counters.num_buffered_items, 1);
                    ClientCounters::incr(&self.counters.num_discarded_items, 1);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use otelpipe_proto::{LogRecord, Severity};

    use super::*;

    fn log(body: &str) -> LogRecord {
        LogRecord::new(Severity::Info, body)
    }

    #[test]
    fn test_intake_queue_drops_oldest_on_overflow() {
        let counters = Arc::new(ClientCounters::default());
        let accepting = Arc::new(AtomicBool::new(true));
        let intake_queue = IntakeQueue::new(2, accepting, counters.clone());
        let receiver = intake_queue.receiver();

        intake_queue.push(log("first"));
        intake_queue.push(log("second"));
        intake_queue.push(log("third"));

        let bodies: Vec<String> = receiver
            .try_iter()
            .map(|log_record| log_record.body)
            .collect();
        assert_eq!(bodies, ["second", "third"]);

        let stats = counters.snapshot();
        assert_eq!(stats.num_enqueued_items, 3);
        assert_eq!(stats.num_dropped_items, 1);
        assert_eq!(stats.num_buffered_items, 2);
    }

    #[test]
    fn test_intake_queue_rejects_after_close() {
        let counters = Arc::new(ClientCounters::default());
        let accepting = Arc::new(AtomicBool::new(true));
        let intake_queue = IntakeQueue::new(2, accepting.clone(), counters.clone());

        intake_queue.push(log("before"));
        accepting.store(false, Ordering::Release);
        intake_queue.push(log("after"));

        assert_eq!(intake_queue.receiver().len(), 1);
        let stats = counters.snapshot();
        assert_eq!(stats.num_enqueued_items, 1);
        assert_eq!(stats.num_discarded_items, 1);
    }
}
