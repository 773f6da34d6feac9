use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::events::ExperimentEvent;
use crate::endpoint::endpoint_url;
use crate::{Error, Result};

/// Reason reported when the entity was allocated by an experiment rule. Exposures are recorded
/// only for this reason.
pub const EXPERIMENT_RULE_MATCH: &str = "EXPERIMENT_RULE_MATCH";

/// Outcome of evaluating a feature for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvaluation {
    pub value: EvaluatedValue,
    #[serde(default)]
    pub reason: Option<String>,
    /// Name of the experiment-service variation, for logging.
    #[serde(default)]
    pub variation: Option<String>,
    /// JSON-encoded experiment details.
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_value: Option<i64>,
}

/// External experimentation backend.
#[async_trait]
pub trait ExperimentService: Send + Sync {
    async fn evaluate_feature(
        &self,
        project: &str,
        feature: &str,
        entity_id: &str,
    ) -> Result<FeatureEvaluation>;

    async fn put_events(&self, project: &str, events: &[ExperimentEvent]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpExperimentServiceConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpExperimentServiceConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
}

/// JSON-over-HTTP experiment service client.
///
/// - `POST {base}/projects/{project}/evaluations/{feature}` with `{"entityId": ...}`
/// - `POST {base}/events/projects/{project}` with `{"events": [...]}`
pub struct HttpExperimentService {
    client: reqwest::Client,
    config: HttpExperimentServiceConfig,
}

impl HttpExperimentService {
    pub fn new(config: HttpExperimentServiceConfig) -> HttpExperimentService {
        HttpExperimentService {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        endpoint_url(&self.config.base_url, segments)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateFeatureRequest<'a> {
    entity_id: &'a str,
}

#[derive(Serialize)]
struct PutEventsRequest<'a> {
    events: &'a [ExperimentEvent],
}

#[async_trait]
impl ExperimentService for HttpExperimentService {
    async fn evaluate_feature(
        &self,
        project: &str,
        feature: &str,
        entity_id: &str,
    ) -> Result<FeatureEvaluation> {
        let url = self.url(&["projects", project, "evaluations", feature])?;

        let response = self
            .client
            .post(url)
            .timeout(self.config.timeout)
            .json(&EvaluateFeatureRequest { entity_id })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| Error::ExperimentService(err.without_url().to_string()))?;

        response
            .json()
            .await
            .map_err(|err| Error::ExperimentService(err.without_url().to_string()))
    }

    async fn put_events(&self, project: &str, events: &[ExperimentEvent]) -> Result<()> {
        let url = self.url(&["events", "projects", project])?;

        self.client
            .post(url)
            .timeout(self.config.timeout)
            .json(&PutEventsRequest { events })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| Error::ExperimentService(err.without_url().to_string()))?;

        Ok(())
    }
}
