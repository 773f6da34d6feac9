use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{post_json, BackendClientConfig, BackendRequest, RecommendationBackend};
use crate::endpoint::endpoint_url;
use crate::response::RecommendationResponse;
use crate::{Error, Result};

/// Synchronous invocation of a serverless function by ARN.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_arn: &str, payload: &Value) -> Result<Value>;
}

/// `POST {base}/2015-03-31/functions/{arn}/invocations`
pub struct HttpFunctionInvoker {
    client: reqwest::Client,
    config: BackendClientConfig,
}

impl HttpFunctionInvoker {
    pub fn new(config: BackendClientConfig) -> HttpFunctionInvoker {
        HttpFunctionInvoker {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl FunctionInvoker for HttpFunctionInvoker {
    async fn invoke(&self, function_arn: &str, payload: &Value) -> Result<Value> {
        let url = endpoint_url(
            &self.config.base_url,
            &["2015-03-31", "functions", function_arn, "invocations"],
        )?;
        post_json(&self.client, url, self.config.timeout, payload).await
    }
}

/// Function variations (`lambda`).
pub struct FunctionBackend {
    invoker: Arc<dyn FunctionInvoker>,
}

impl FunctionBackend {
    pub fn new(invoker: Arc<dyn FunctionInvoker>) -> FunctionBackend {
        FunctionBackend { invoker }
    }
}

#[async_trait]
impl RecommendationBackend for FunctionBackend {
    async fn invoke(&self, request: &BackendRequest<'_>) -> Result<RecommendationResponse> {
        let arn = request.variation.variation.arn.as_deref().ok_or_else(|| {
            Error::not_found(
                "FunctionArnNotConfigured",
                "Function ARN has not been configured for this namespace and recommender name",
            )
        })?;

        let mut payload = request.payload_base(true);
        request.insert_subject(&mut payload);

        log::debug!(target: "p13n", recommender = request.recommender_path(), variation = request.variation.key; "invoking recommendation function");

        let response = self.invoker.invoke(arn, &Value::Object(payload)).await?;
        serde_json::from_value(response).map_err(|err| {
            Error::BackendUnavailable(format!("function returned an invalid response: {err}"))
        })
    }
}
