use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{post_json, BackendClientConfig, BackendRequest, RecommendationBackend, Subject};
use crate::endpoint::endpoint_url;
use crate::response::RecommendationResponse;
use crate::{Error, Result};

/// Largest `numResults` the managed recommendation service accepts.
pub const MAX_MANAGED_RESULTS: usize = 500;

/// Managed recommendation service, serving campaign and recommender variations.
///
/// - recommend/related: `POST {base}/recommendations`
/// - rerank: `POST {base}/personalize-ranking`
pub struct PersonalizeBackend {
    client: reqwest::Client,
    config: BackendClientConfig,
}

impl PersonalizeBackend {
    pub fn new(config: BackendClientConfig) -> PersonalizeBackend {
        PersonalizeBackend {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl RecommendationBackend for PersonalizeBackend {
    async fn invoke(&self, request: &BackendRequest<'_>) -> Result<RecommendationResponse> {
        let (operation, params) = personalize_params(request)?;
        let url = endpoint_url(&self.config.base_url, &[operation])?;

        log::debug!(target: "p13n", operation, recommender = request.recommender_path(), variation = request.variation.key; "calling managed recommendation service");

        post_json(&self.client, url, self.config.timeout, &params).await
    }
}

/// Operation path and parameters of a managed-service call.
fn personalize_params(request: &BackendRequest<'_>) -> Result<(&'static str, Value)> {
    let arn = request.variation.variation.arn.as_deref().ok_or_else(|| {
        Error::not_found(
            "RecommenderArnNotConfigured",
            "Recommender or campaign ARN has not been configured for this namespace and recommender name",
        )
    })?;

    let mut params = Map::new();
    let operation = match request.subject {
        Subject::User { user_id } => {
            params.insert("userId".to_owned(), Value::from(user_id));
            params.insert("numResults".to_owned(), Value::from(request.num_results));
            "recommendations"
        }
        Subject::Item { item_id, user_id } => {
            params.insert("itemId".to_owned(), Value::from(item_id));
            params.insert("numResults".to_owned(), Value::from(request.num_results));
            if let Some(user_id) = user_id {
                params.insert("userId".to_owned(), Value::from(user_id));
            }
            "recommendations"
        }
        Subject::Rerank { user_id, item_ids } => {
            params.insert("userId".to_owned(), Value::from(user_id));
            params.insert("inputList".to_owned(), Value::from(item_ids.to_vec()));
            "personalize-ranking"
        }
    };

    let arn_key = if is_recommender_arn(arn) {
        "recommenderArn"
    } else {
        "campaignArn"
    };
    params.insert(arn_key.to_owned(), Value::from(arn));

    if let Some(filter) = &request.filter {
        params.insert("filterArn".to_owned(), Value::from(filter.arn.as_str()));
        if let Some(values) = &filter.values {
            params.insert("filterValues".to_owned(), Value::Object(values.clone()));
        }
    }

    if let Some(context) = &request.context {
        params.insert("context".to_owned(), Value::Object(context.clone()));
    }

    if let Some(columns) = &request.item_columns {
        params.insert("metadataColumns".to_owned(), json!({ "ITEMS": columns }));
    }

    Ok((operation, Value::Object(params)))
}

/// `arn:aws:personalize:us-east-1:123:recommender/x` names a recommender; anything else is a
/// campaign.
fn is_recommender_arn(arn: &str) -> bool {
    arn.split(':')
        .nth(5)
        .is_some_and(|resource| resource.starts_with("recommender/"))
}
