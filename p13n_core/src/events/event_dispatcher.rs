use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{interval_at, sleep, Duration, Instant};

use super::batch_event_processor::{BatchEventProcessor, QueuedEvent};
use crate::experiments::{ExperimentEvent, ExperimentService};

#[derive(Debug, Clone)]
pub struct EventDispatcherConfig {
    pub delivery_interval_ms: u64,
    pub retry_interval_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_retries: Option<u32>,
}

impl Default for EventDispatcherConfig {
    fn default() -> EventDispatcherConfig {
        EventDispatcherConfig {
            delivery_interval_ms: 1_000,
            retry_interval_ms: 250,
            max_retry_delay_ms: 1_500,
            max_retries: Some(3),
        }
    }
}

/// Delivers queued experiment events in the background.
///
/// Events are pushed to a [`BatchEventProcessor`]. A delivery loop runs while the queue is
/// non-empty, and each batch is written per project with bounded retries. Callers never wait on
/// delivery.
pub struct EventDispatcher {
    config: EventDispatcherConfig,
    batch_processor: BatchEventProcessor,
    service: Arc<dyn ExperimentService>,
    delivery_task_active: Arc<AtomicBool>,
}

impl EventDispatcher {
    pub fn new(
        config: EventDispatcherConfig,
        batch_processor: BatchEventProcessor,
        service: Arc<dyn ExperimentService>,
    ) -> Self {
        EventDispatcher {
            config,
            batch_processor,
            service,
            delivery_task_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues an event in the batch event processor and starts delivery if needed.
    pub fn dispatch(&self, project: &str, event: ExperimentEvent) {
        let queued = self.batch_processor.push(QueuedEvent {
            project: project.to_owned(),
            event,
        });
        if !queued {
            log::warn!(target: "p13n", project; "experiment event queue is full; dropping event");
            return;
        }

        self.start_delivery_loop();
    }

    fn start_delivery_loop(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            log::warn!(target: "p13n", "no async runtime available; experiment events stay queued");
            return;
        }

        if self
            .delivery_task_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Already running.
            return;
        }

        let active_flag = Arc::clone(&self.delivery_task_active);
        let config = self.config.clone();
        let batch_processor = self.batch_processor.clone();
        let service = Arc::clone(&self.service);

        tokio::spawn(async move {
            let interval_duration = Duration::from_millis(config.delivery_interval_ms);
            let mut interval = interval_at(Instant::now() + interval_duration, interval_duration);
            loop {
                interval.tick().await;
                let events_to_process = batch_processor.next_batch();
                if !events_to_process.is_empty() {
                    deliver(&config, service.as_ref(), events_to_process).await;
                    continue;
                }

                active_flag.store(false, Ordering::Release);
                // An event pushed after the batch was taken but before the flag was cleared saw
                // an active loop. Pick it up instead of leaving it stranded.
                if batch_processor.is_empty()
                    || active_flag
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    break;
                }
            }
        });
    }

    pub fn queued_event_count(&self) -> usize {
        self.batch_processor.queued_event_count()
    }
}

async fn deliver(
    config: &EventDispatcherConfig,
    service: &dyn ExperimentService,
    events: Vec<QueuedEvent>,
) {
    let mut by_project: BTreeMap<String, Vec<ExperimentEvent>> = BTreeMap::new();
    for QueuedEvent { project, event } in events {
        by_project.entry(project).or_default().push(event);
    }

    for (project, events) in by_project {
        let mut attempt: u32 = 0;
        loop {
            match service.put_events(&project, &events).await {
                Ok(()) => {
                    log::debug!(target: "p13n", project = project.as_str(), count = events.len(); "delivered experiment events");
                    break;
                }
                Err(err) if config.max_retries.map_or(true, |max| attempt < max) => {
                    let delay = retry_delay(config, attempt);
                    log::debug!(target: "p13n", project = project.as_str(), attempt; "experiment event delivery failed, retrying: {err}");
                    attempt += 1;
                    sleep(delay).await;
                }
                Err(err) => {
                    log::warn!(target: "p13n", project = project.as_str(), count = events.len(); "dropping experiment events after failed delivery: {err}");
                    break;
                }
            }
        }
    }
}

/// Exponential backoff starting at `retry_interval_ms`, capped at `max_retry_delay_ms`.
fn retry_delay(config: &EventDispatcherConfig, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(
        config
            .retry_interval_ms
            .saturating_mul(factor)
            .min(config.max_retry_delay_ms),
    )
}
