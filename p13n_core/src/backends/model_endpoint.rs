use async_trait::async_trait;
use serde_json::Value;

use super::{post_json, BackendClientConfig, BackendRequest, RecommendationBackend};
use crate::endpoint::endpoint_url;
use crate::response::RecommendationResponse;
use crate::{Error, Result};

/// Hosted model endpoints (`sagemaker`): `POST {base}/endpoints/{name}/invocations`.
pub struct ModelEndpointBackend {
    client: reqwest::Client,
    config: BackendClientConfig,
}

impl ModelEndpointBackend {
    pub fn new(config: BackendClientConfig) -> ModelEndpointBackend {
        ModelEndpointBackend {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl RecommendationBackend for ModelEndpointBackend {
    async fn invoke(&self, request: &BackendRequest<'_>) -> Result<RecommendationResponse> {
        let endpoint_name = request
            .variation
            .variation
            .endpoint_name
            .as_deref()
            .ok_or_else(|| {
                Error::not_found(
                    "EndpointNameNotConfigured",
                    "Endpoint name has not been configured for this namespace and recommender name",
                )
            })?;

        let mut payload = request.payload_base(false);
        request.insert_subject(&mut payload);

        let url = endpoint_url(
            &self.config.base_url,
            &["endpoints", endpoint_name, "invocations"],
        )?;

        log::debug!(target: "p13n", endpoint = endpoint_name, recommender = request.recommender_path(); "invoking model endpoint");

        post_json(&self.client, url, self.config.timeout, &Value::Object(payload)).await
    }
}
