//! Recommendation backends, one per variation type.
//!
//! The dispatcher builds a [`BackendRequest`] for the selected variation and hands it to the
//! backend registered for the variation's `type` in [`Backends`].
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::blend::{FilterSelection, ParamMap};
use crate::config::{ActionType, ResolvedVariation, VariationType};
use crate::response::RecommendationResponse;
use crate::{Error, Result};

mod function;
mod http;
mod model_endpoint;
mod personalize;
mod post_processor;

pub use function::{FunctionBackend, FunctionInvoker, HttpFunctionInvoker};
pub use http::HttpBackend;
pub use model_endpoint::ModelEndpointBackend;
pub use personalize::{PersonalizeBackend, MAX_MANAGED_RESULTS};
pub use post_processor::PostProcessor;

/// Version of the JSON payloads sent to function, model-endpoint and post-processor backends.
pub const PAYLOAD_VERSION: &str = "1.0";

/// Who or what recommendations are requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    /// `recommend-items`
    User { user_id: &'a str },
    /// `related-items`
    Item {
        item_id: &'a str,
        user_id: Option<&'a str>,
    },
    /// `rerank-items`
    Rerank {
        user_id: &'a str,
        item_ids: &'a [String],
    },
}

impl<'a> Subject<'a> {
    pub fn action(&self) -> ActionType {
        match self {
            Subject::User { .. } => ActionType::RecommendItems,
            Subject::Item { .. } => ActionType::RelatedItems,
            Subject::Rerank { .. } => ActionType::RerankItems,
        }
    }

    pub fn user_id(&self) -> Option<&'a str> {
        match *self {
            Subject::User { user_id } | Subject::Rerank { user_id, .. } => Some(user_id),
            Subject::Item { user_id, .. } => user_id,
        }
    }
}

/// One call to a recommendation backend.
#[derive(Debug, Clone)]
pub struct BackendRequest<'a> {
    pub variation: ResolvedVariation<'a>,
    pub subject: Subject<'a>,
    /// Results to request from the backend, look-ahead included.
    pub num_results: usize,
    pub filter: Option<FilterSelection>,
    pub context: Option<ParamMap>,
    /// Metadata columns the backend should return inline.
    pub item_columns: Option<Vec<String>>,
    /// Raw query string parameters of the inbound request.
    pub query: &'a BTreeMap<String, String>,
}

impl<'a> BackendRequest<'a> {
    pub fn action(&self) -> ActionType {
        self.variation.recommender.action
    }

    /// Path key of the recommender, as addressed in the request URL.
    pub fn recommender_path(&self) -> &'a str {
        self.variation.recommender.key
    }

    /// `{version, action, recommender, variation}` plus the subject fields, shared by every
    /// function-style payload.
    pub(crate) fn payload_base(&self, include_config: bool) -> Map<String, Value> {
        let mut recommender = Map::new();
        recommender.insert("path".to_owned(), Value::from(self.recommender_path()));
        if include_config {
            recommender.insert(
                "config".to_owned(),
                serde_json::to_value(self.variation.recommender.recommender).unwrap_or_default(),
            );
        }

        let mut payload = Map::new();
        payload.insert("version".to_owned(), Value::from(PAYLOAD_VERSION));
        payload.insert("action".to_owned(), Value::from(self.action().as_str()));
        payload.insert("recommender".to_owned(), Value::Object(recommender));
        payload.insert(
            "variation".to_owned(),
            serde_json::to_value(self.variation.variation).unwrap_or_default(),
        );
        payload
    }

    /// Subject fields of a function-style inference payload.
    pub(crate) fn insert_subject(&self, payload: &mut Map<String, Value>) {
        match self.subject {
            Subject::User { user_id } => {
                payload.insert("userId".to_owned(), Value::from(user_id));
                payload.insert("numResults".to_owned(), Value::from(self.num_results));
            }
            Subject::Item { item_id, user_id } => {
                payload.insert("itemId".to_owned(), Value::from(item_id));
                payload.insert("userId".to_owned(), Value::from(user_id.unwrap_or_default()));
                payload.insert("numResults".to_owned(), Value::from(self.num_results));
            }
            Subject::Rerank { user_id, item_ids } => {
                payload.insert("userId".to_owned(), Value::from(user_id));
                payload.insert("itemList".to_owned(), Value::from(item_ids.to_vec()));
            }
        }

        if let Some(context) = &self.context {
            payload.insert("context".to_owned(), Value::Object(context.clone()));
        }
    }
}

/// Produces recommendations for one family of variation types.
#[async_trait]
pub trait RecommendationBackend: Send + Sync {
    async fn invoke(&self, request: &BackendRequest<'_>) -> Result<RecommendationResponse>;
}

/// Backend registry keyed by variation type.
#[derive(Clone, Default)]
pub struct Backends {
    personalize: Option<Arc<dyn RecommendationBackend>>,
    function: Option<Arc<dyn RecommendationBackend>>,
    model_endpoint: Option<Arc<dyn RecommendationBackend>>,
    http: Option<Arc<dyn RecommendationBackend>>,
}

impl Backends {
    pub fn new() -> Backends {
        Backends::default()
    }

    /// Serves both `personalize-campaign` and `personalize-recommender` variations.
    pub fn with_personalize(mut self, backend: Arc<dyn RecommendationBackend>) -> Backends {
        self.personalize = Some(backend);
        self
    }

    pub fn with_function(mut self, backend: Arc<dyn RecommendationBackend>) -> Backends {
        self.function = Some(backend);
        self
    }

    pub fn with_model_endpoint(mut self, backend: Arc<dyn RecommendationBackend>) -> Backends {
        self.model_endpoint = Some(backend);
        self
    }

    pub fn with_http(mut self, backend: Arc<dyn RecommendationBackend>) -> Backends {
        self.http = Some(backend);
        self
    }

    pub fn for_type(&self, variation_type: VariationType) -> Result<&dyn RecommendationBackend> {
        let backend = match variation_type {
            VariationType::Campaign | VariationType::Recommender => &self.personalize,
            VariationType::Function => &self.function,
            VariationType::ModelEndpoint => &self.model_endpoint,
            VariationType::Http => &self.http,
        };

        backend.as_deref().ok_or_else(|| {
            Error::BackendUnavailable(format!(
                "no backend registered for variation type {variation_type:?}"
            ))
        })
    }
}

/// Connection settings for a JSON-over-HTTP backend gateway.
#[derive(Debug, Clone)]
pub struct BackendClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl BackendClientConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

    pub fn new(base_url: impl Into<String>) -> BackendClientConfig {
        BackendClientConfig {
            base_url: base_url.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// POST `body` and decode the JSON answer. Every failure is [`Error::BackendUnavailable`] and
/// never carries the URL.
pub(crate) async fn post_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: reqwest::Url,
    timeout: Duration,
    body: &Value,
) -> Result<T> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| Error::BackendUnavailable(err.without_url().to_string()))?;

    response
        .json()
        .await
        .map_err(|err| Error::BackendUnavailable(err.without_url().to_string()))
}
