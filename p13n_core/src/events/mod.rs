//! Event handling: background delivery of experiment events and fan-out of interaction events to
//! configured targets.
mod batch_event_processor;
mod event_dispatcher;
mod ingest;
mod targets;

pub use batch_event_processor::{BatchEventProcessor, QueuedEvent};
pub use event_dispatcher::{EventDispatcher, EventDispatcherConfig};
pub use ingest::EventIngest;
pub use targets::{
    fan_out, target_record, EventSink, HttpEventSink, HttpEventSinkConfig, ReceivedRequest,
    TargetRecord,
};
