use std::sync::Arc;

use p13n_core::backends::{
    BackendClientConfig, Backends, FunctionBackend, HttpBackend, HttpFunctionInvoker,
    ModelEndpointBackend, PersonalizeBackend, PostProcessor,
};
use p13n_core::configuration_store::ConfigurationStore;
use p13n_core::dispatcher::RequestDispatcher;
use p13n_core::events::{
    BatchEventProcessor, EventDispatcher, EventDispatcherConfig, EventIngest, EventSink,
    HttpEventSink, HttpEventSinkConfig,
};
use p13n_core::experiments::{
    ExperimentSelector, HttpExperimentService, HttpExperimentServiceConfig,
};
use p13n_core::metadata::{HttpTableStore, HttpTableStoreConfig, ItemMetadataDecorator, LocalDbStore};

use crate::settings::ServerConfig;

/// Experiment events delivered per request to the experiment service.
const EXPERIMENT_EVENT_BATCH_SIZE: usize = 100;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RequestDispatcher>,
}

impl AppState {
    pub fn new(dispatcher: RequestDispatcher) -> AppState {
        AppState {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Wire the dispatcher's collaborators from process settings. Collaborators whose URL is not set
/// are left out: their variation types answer `BackendUnavailable`, experiments fall back to the
/// first declared variation, and metadata and event targets are skipped.
pub(crate) fn build_dispatcher(
    config: &ServerConfig,
    store: Arc<ConfigurationStore>,
    local_db: Option<Arc<LocalDbStore>>,
) -> RequestDispatcher {
    let mut backends = Backends::new().with_http(Arc::new(HttpBackend::new(config.backend_timeout)));
    let mut post_processor = PostProcessor::disabled();

    if let Some(base_url) = &config.backend_base_url {
        let client_config = BackendClientConfig {
            base_url: base_url.clone(),
            timeout: config.backend_timeout,
        };
        let invoker = Arc::new(HttpFunctionInvoker::new(client_config.clone()));

        backends = backends
            .with_personalize(Arc::new(PersonalizeBackend::new(client_config.clone())))
            .with_function(Arc::new(FunctionBackend::new(invoker.clone())))
            .with_model_endpoint(Arc::new(ModelEndpointBackend::new(client_config)));
        post_processor = PostProcessor::new(invoker);
    }

    let experiment_events = config.experiment_service_url.as_ref().map(|base_url| {
        let service = Arc::new(HttpExperimentService::new(HttpExperimentServiceConfig {
            base_url: base_url.clone(),
            timeout: config.experiment_timeout,
        }));
        let events = Arc::new(EventDispatcher::new(
            EventDispatcherConfig::default(),
            BatchEventProcessor::new(EXPERIMENT_EVENT_BATCH_SIZE),
            service.clone(),
        ));
        (service, events)
    });

    let selector = match &experiment_events {
        Some((service, events)) => ExperimentSelector::new(service.clone(), events.clone()),
        None => ExperimentSelector::disabled(),
    };

    let mut decorator = ItemMetadataDecorator::new();
    if let Some(local_db) = local_db {
        decorator = decorator.with_local_db(local_db);
    }
    if let Some(base_url) = &config.metadata_table_url {
        decorator = decorator.with_table(Arc::new(HttpTableStore::new(HttpTableStoreConfig::new(
            base_url.clone(),
        ))));
    }

    let sink = config.event_sink_url.as_ref().map(|base_url| {
        Arc::new(HttpEventSink::new(HttpEventSinkConfig {
            base_url: base_url.clone(),
            timeout: config.backend_timeout,
        })) as Arc<dyn EventSink>
    });
    let events = EventIngest::new(sink, experiment_events.map(|(_, events)| events));

    RequestDispatcher::new(store, backends)
        .with_experiments(selector)
        .with_decorator(decorator)
        .with_post_processor(post_processor)
        .with_event_ingest(events)
}
