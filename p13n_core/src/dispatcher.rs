//! Per-request orchestration of the pipeline.
//!
//! A recommendation request moves through
//! `Received → ConfigResolved → VariationSelected → ContextDerived → BackendInvoked → Decorated →
//! CacheComputed → Responded`, leaving early as `NotFound` or `BackendError`. The configuration
//! snapshot taken at `ConfigResolved` serves the whole request.
use std::sync::Arc;

use serde_json::Value;

use crate::backends::{BackendRequest, Backends, PostProcessor, Subject, MAX_MANAGED_RESULTS};
use crate::blend::{blend_context, blend_filter, select_filter_arn};
use crate::cache::{compute_cache_headers, is_not_modified};
use crate::config::{ActionType, ItemMetadataType};
use crate::configuration_store::ConfigurationStore;
use crate::context::{derive_context, AutoContext, RequestSignals};
use crate::events::{EventIngest, ReceivedRequest};
use crate::experiments::{ExperimentSelector, Selection};
use crate::metadata::ItemMetadataDecorator;
use crate::request::RequestParams;
use crate::{Error, ErrorKind, Result};

/// `Cache-Control` for responses that must never be stored.
pub const NO_STORE: &str = "no-store";

/// One inbound recommendation request.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationRequest<'a> {
    pub namespace: &'a str,
    pub recommender: &'a str,
    pub subject: Subject<'a>,
    pub params: &'a RequestParams,
    pub signals: &'a RequestSignals,
    pub if_none_match: Option<&'a str>,
    /// `false` for requests whose input travels in the body. Those are answered `no-store`
    /// without an entity tag.
    pub cacheable: bool,
}

/// Headers to set on the HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    /// `X-Personalization-Config-Version`
    pub config_version: Option<String>,
    pub cache_control: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Serialized [`RecommendationResponse`](crate::response::RecommendationResponse).
    Ok {
        body: Vec<u8>,
        headers: ResponseHeaders,
    },
    /// The caller's `If-None-Match` matched. No body is sent.
    NotModified { headers: ResponseHeaders },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    ConfigResolved,
    VariationSelected,
    ContextDerived,
    BackendInvoked,
    Decorated,
    CacheComputed,
    Responded,
    NotFound,
    BackendError,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::ConfigResolved => "config_resolved",
            Stage::VariationSelected => "variation_selected",
            Stage::ContextDerived => "context_derived",
            Stage::BackendInvoked => "backend_invoked",
            Stage::Decorated => "decorated",
            Stage::CacheComputed => "cache_computed",
            Stage::Responded => "responded",
            Stage::NotFound => "not_found",
            Stage::BackendError => "backend_error",
        }
    }
}

/// Serves recommendation and event requests against the current configuration.
pub struct RequestDispatcher {
    store: Arc<ConfigurationStore>,
    backends: Backends,
    selector: ExperimentSelector,
    decorator: ItemMetadataDecorator,
    post_processor: PostProcessor,
    events: EventIngest,
}

impl RequestDispatcher {
    /// Dispatcher without experiments, item metadata stores, post-processing or event targets.
    /// Add them with the `with_*` methods.
    pub fn new(store: Arc<ConfigurationStore>, backends: Backends) -> RequestDispatcher {
        RequestDispatcher {
            store,
            backends,
            selector: ExperimentSelector::disabled(),
            decorator: ItemMetadataDecorator::new(),
            post_processor: PostProcessor::disabled(),
            events: EventIngest::new(None, None),
        }
    }

    pub fn with_experiments(mut self, selector: ExperimentSelector) -> RequestDispatcher {
        self.selector = selector;
        self
    }

    pub fn with_decorator(mut self, decorator: ItemMetadataDecorator) -> RequestDispatcher {
        self.decorator = decorator;
        self
    }

    pub fn with_post_processor(mut self, post_processor: PostProcessor) -> RequestDispatcher {
        self.post_processor = post_processor;
        self
    }

    pub fn with_event_ingest(mut self, events: EventIngest) -> RequestDispatcher {
        self.events = events;
        self
    }

    /// Version of the configuration currently serving, if one is loaded.
    pub fn config_version(&self) -> Option<String> {
        self.store
            .get_configuration()
            .and_then(|configuration| configuration.version().map(str::to_owned))
    }

    /// Serve a recommend, related or rerank request.
    pub async fn recommend(&self, request: &RecommendationRequest<'_>) -> Result<DispatchOutcome> {
        trace(Stage::Received, request);

        let result = self.run(request).await;
        match &result {
            Ok(_) => trace(Stage::Responded, request),
            Err(err @ Error::ConfigNotFound { .. }) => {
                log::debug!(target: "p13n", stage = Stage::NotFound.as_str(), namespace = request.namespace, recommender = request.recommender, code = err.code(); "dispatch");
            }
            Err(err) if err.kind() == ErrorKind::Server => {
                log::error!(target: "p13n", stage = Stage::BackendError.as_str(), namespace = request.namespace, recommender = request.recommender; "request failed: {err}");
            }
            Err(err) => {
                log::debug!(target: "p13n", namespace = request.namespace, recommender = request.recommender, code = err.code(); "request rejected");
            }
        }
        result
    }

    async fn run(&self, request: &RecommendationRequest<'_>) -> Result<DispatchOutcome> {
        let configuration = self
            .store
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)?;
        let params = request.params;
        let action = request.subject.action();
        let user_id = request.subject.user_id();

        let recommender =
            configuration
                .config
                .recommender(request.namespace, action, request.recommender)?;
        trace(Stage::ConfigResolved, request);

        let Selection {
            variation,
            matched_experiment,
        } = self
            .selector
            .select_variation(&recommender, params.feature.as_deref(), user_id)
            .await?;
        log::debug!(target: "p13n", stage = Stage::VariationSelected.as_str(), variation = variation.key; "dispatch");

        let lineage = variation.lineage();
        let auto_context = derive_context(lineage.auto_context(), request.signals);
        let context = blend_context(params.context.clone(), &auto_context);

        let filter_arn = select_filter_arn(
            lineage.filters(),
            params.filter.as_deref(),
            variation.variation.arn.as_deref(),
            user_id.is_some(),
        )?;
        let dynamic_filter_values: AutoContext = variation
            .variation
            .filter
            .as_ref()
            .and_then(|filter| filter.auto_dynamic_filter_values.as_ref())
            .map(|fields| derive_context(fields.iter(), request.signals))
            .unwrap_or_default();
        let filter = blend_filter(filter_arn, params.filter_values.clone(), &dynamic_filter_values);
        trace(Stage::ContextDerived, request);

        let metadata_config = lineage.item_metadata();
        let item_columns = metadata_config
            .as_ref()
            .filter(|config| {
                params.decorate_items && config.store_type == Some(ItemMetadataType::Inline)
            })
            .and_then(|config| config.item_columns.clone());

        let post_processor_config = recommender.recommender.response_post_processor.as_ref();
        let variation_type = variation.variation.variation_type;
        let mut num_results = PostProcessor::look_ahead(post_processor_config, params.num_results);
        if variation_type.is_managed() {
            num_results = num_results.min(MAX_MANAGED_RESULTS);
        }

        let backend_request = BackendRequest {
            variation,
            subject: request.subject,
            num_results,
            filter,
            context,
            item_columns,
            query: &params.query,
        };
        let mut response = self
            .backends
            .for_type(variation_type)?
            .invoke(&backend_request)
            .await?;
        trace(Stage::BackendInvoked, request);

        if params.decorate_items {
            self.decorator
                .decorate(
                    recommender.namespace.key,
                    metadata_config.as_ref(),
                    &mut response,
                )
                .await;
        } else {
            response.strip_metadata();
        }
        trace(Stage::Decorated, request);

        response.matched_experiment = matched_experiment;

        if let Some(post_processor_config) = post_processor_config {
            response = self
                .post_processor
                .process(post_processor_config, &backend_request, response)
                .await?;
        }
        if action != ActionType::RerankItems {
            response.truncate(params.num_results);
        }

        let body = serde_json::to_vec(&response).map_err(|err| {
            Error::BackendUnavailable(format!("response could not be serialized: {err}"))
        })?;

        let mut headers = ResponseHeaders {
            config_version: configuration.version().map(str::to_owned),
            ..Default::default()
        };

        if !request.cacheable {
            headers.cache_control = Some(NO_STORE.to_owned());
            trace(Stage::CacheComputed, request);
            return Ok(DispatchOutcome::Ok { body, headers });
        }

        let cache = compute_cache_headers(
            &lineage.cache_control(),
            user_id.is_some(),
            params.synthetic_user,
            &body,
        );
        trace(Stage::CacheComputed, request);

        let not_modified = is_not_modified(request.if_none_match, &cache.etag);
        headers.cache_control = cache.cache_control;
        headers.etag = Some(cache.etag);

        if not_modified {
            return Ok(DispatchOutcome::NotModified { headers });
        }
        Ok(DispatchOutcome::Ok { body, headers })
    }

    /// Serve `POST /events/{namespace}`.
    pub async fn put_events(
        &self,
        namespace: &str,
        body: Value,
        request: &ReceivedRequest,
        signals: &RequestSignals,
    ) -> Result<ResponseHeaders> {
        let configuration = self
            .store
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)?;

        self.events
            .put_events(&configuration.config, namespace, body, request, signals)
            .await?;

        Ok(ResponseHeaders {
            config_version: configuration.version().map(str::to_owned),
            cache_control: Some(NO_STORE.to_owned()),
            etag: None,
        })
    }
}

fn trace(stage: Stage, request: &RecommendationRequest<'_>) {
    log::debug!(target: "p13n", stage = stage.as_str(), namespace = request.namespace, recommender = request.recommender, action = request.subject.action().as_str(); "dispatch");
}
