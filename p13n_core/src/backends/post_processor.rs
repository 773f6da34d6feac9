use std::sync::Arc;

use serde_json::Value;

use super::{BackendRequest, FunctionInvoker, Subject};
use crate::config::PostProcessorConfig;
use crate::response::RecommendationResponse;
use crate::{Error, Result};

/// Runs a recommender's `responsePostProcessor` function over a backend response.
#[derive(Clone, Default)]
pub struct PostProcessor {
    invoker: Option<Arc<dyn FunctionInvoker>>,
}

impl PostProcessor {
    pub fn new(invoker: Arc<dyn FunctionInvoker>) -> PostProcessor {
        PostProcessor {
            invoker: Some(invoker),
        }
    }

    /// A post-processor that fails every call. Recommenders configured with a post-processor then
    /// answer with [`Error::BackendUnavailable`].
    pub fn disabled() -> PostProcessor {
        PostProcessor::default()
    }

    /// Number of results to request from the backend so the post-processor has room to drop
    /// items: `num_results * lookAheadMultiplier`, capped by `lookAheadMaximumValue`.
    pub fn look_ahead(config: Option<&PostProcessorConfig>, num_results: usize) -> usize {
        let Some(multiplier) = config.and_then(|config| config.look_ahead_multiplier) else {
            return num_results;
        };

        let inference = num_results.saturating_mul(multiplier);
        match config.and_then(|config| config.look_ahead_maximum_value) {
            Some(maximum) => inference.min(maximum),
            None => inference,
        }
    }

    pub async fn process(
        &self,
        config: &PostProcessorConfig,
        request: &BackendRequest<'_>,
        response: RecommendationResponse,
    ) -> Result<RecommendationResponse> {
        let arn = config.arn.as_deref().ok_or_else(|| {
            Error::not_found(
                "FunctionArnNotConfigured",
                "Post process function ARN has not been configured for this namespace and recommender name",
            )
        })?;
        let invoker = self.invoker.as_ref().ok_or_else(|| {
            Error::BackendUnavailable("no post-processor function invoker registered".to_owned())
        })?;

        let mut payload = request.payload_base(true);
        match request.subject {
            Subject::User { user_id } | Subject::Rerank { user_id, .. } => {
                payload.insert("userId".to_owned(), Value::from(user_id));
            }
            Subject::Item { item_id, .. } => {
                payload.insert("itemId".to_owned(), Value::from(item_id));
            }
        }
        payload.insert(
            "response".to_owned(),
            serde_json::to_value(&response).unwrap_or_default(),
        );

        log::debug!(target: "p13n", recommender = request.recommender_path(), action = request.action().as_str(); "invoking response post-processor");

        let processed = invoker.invoke(arn, &Value::Object(payload)).await?;
        serde_json::from_value(processed).map_err(|err| {
            Error::BackendUnavailable(format!(
                "post-processor returned an invalid response: {err}"
            ))
        })
    }
}
