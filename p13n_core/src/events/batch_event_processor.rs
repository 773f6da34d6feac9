use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::experiments::ExperimentEvent;

/// Experiment event waiting for delivery, addressed to its project.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub project: String,
    pub event: ExperimentEvent,
}

#[derive(Debug, Clone)]
pub struct BatchEventProcessor {
    batch_size: usize,
    max_queue_size: usize,
    event_queue: Arc<Mutex<VecDeque<QueuedEvent>>>,
}

const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 10_000;
const DEFAULT_MAX_QUEUE_SIZE: usize = 100_000;

impl BatchEventProcessor {
    pub fn new(batch_size: usize) -> Self {
        BatchEventProcessor::with_max_queue_size(batch_size, DEFAULT_MAX_QUEUE_SIZE)
    }

    pub fn with_max_queue_size(batch_size: usize, max_queue_size: usize) -> Self {
        BatchEventProcessor {
            batch_size: batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            max_queue_size: max_queue_size.max(1),
            event_queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// A queue is only ever pushed to or drained, so a panic while holding the lock cannot leave
    /// it inconsistent.
    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedEvent>> {
        self.event_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an event. Returns `false` and drops the event when the queue is full.
    pub fn push(&self, event: QueuedEvent) -> bool {
        let mut queue = self.queue();
        if queue.len() >= self.max_queue_size {
            return false;
        }
        queue.push_back(event);
        true
    }

    pub fn next_batch(&self) -> Vec<QueuedEvent> {
        let mut queue = self.queue();
        let n = queue.len().min(self.batch_size);
        queue.drain(..n).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn queued_event_count(&self) -> usize {
        self.queue().len()
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchEventProcessor, QueuedEvent};
    use crate::config::MetricConfig;
    use crate::experiments::ExperimentEvent;

    fn event(project: &str) -> QueuedEvent {
        let metric = MetricConfig {
            entity_id_key: "userId".to_owned(),
            value_key: "value".to_owned(),
            track_exposures: true,
        };
        QueuedEvent {
            project: project.to_owned(),
            event: ExperimentEvent::exposure(&metric, "u"),
        }
    }

    #[test]
    fn batches_in_fifo_order() {
        let processor = BatchEventProcessor::new(2);
        processor.push(event("a"));
        processor.push(event("b"));
        processor.push(event("c"));

        let batch = processor.next_batch();
        assert_eq!(
            batch.iter().map(|e| e.project.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(processor.queued_event_count(), 1);
        assert_eq!(processor.next_batch().len(), 1);
        assert!(processor.is_empty());
        assert!(processor.next_batch().is_empty());
    }

    #[test]
    fn full_queue_drops_events() {
        let processor = BatchEventProcessor::with_max_queue_size(10, 2);
        assert!(processor.push(event("a")));
        assert!(processor.push(event("b")));
        assert!(!processor.push(event("c")));
        assert_eq!(processor.queued_event_count(), 2);
    }
}
