//! Wire format of the personalization configuration document.
use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use super::OrderedMap;

/// Root of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizationConfig {
    /// Identifier echoed to clients in `X-Personalization-Config-Version`.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Value is wrapped in `TryParse` so that if we fail to parse one namespace, other namespaces
    /// keep serving.
    #[serde(default)]
    pub namespaces: HashMap<String, TryParse<Namespace>>,
    /// Global defaults.
    #[serde(flatten)]
    pub inherited: InheritedAttributes,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Attributes that may be declared at any level of the hierarchy (root, namespace, recommender,
/// variation) and are resolved from the nearest level that defines them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritedAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_item_metadata: Option<ItemMetadataConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_context: Option<OrderedMap<AutoValueField>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<FilterConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recommenders: HashMap<ActionType, HashMap<String, Recommender>>,
    #[serde(default)]
    pub event_targets: Vec<EventTargetConfig>,
    #[serde(flatten)]
    pub inherited: InheritedAttributes,
}

/// The three recommendation actions exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    RecommendItems,
    RelatedItems,
    RerankItems,
}

impl ActionType {
    pub const ALL: [ActionType; 3] = [
        ActionType::RecommendItems,
        ActionType::RelatedItems,
        ActionType::RerankItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::RecommendItems => "recommend-items",
            ActionType::RelatedItems => "related-items",
            ActionType::RerankItems => "rerank-items",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommender {
    /// Declaration order matters: the first variation is the default.
    #[serde(default)]
    pub variations: OrderedMap<Variation>,
    /// Keyed by feature name.
    #[serde(default)]
    pub experiments: Option<OrderedMap<Experiment>>,
    #[serde(default)]
    pub response_post_processor: Option<PostProcessorConfig>,
    #[serde(flatten)]
    pub inherited: InheritedAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    #[serde(rename = "type")]
    pub variation_type: VariationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_name: Option<String>,
    /// URL template for `http` variations. `{name}` placeholders are substituted from the request
    /// query string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<VariationFilter>,
    #[serde(flatten)]
    pub inherited: InheritedAttributes,
}

/// Backend kind a variation dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariationType {
    #[serde(rename = "personalize-campaign")]
    Campaign,
    #[serde(rename = "personalize-recommender")]
    Recommender,
    #[serde(rename = "lambda", alias = "function")]
    Function,
    #[serde(rename = "sagemaker", alias = "model-endpoint")]
    ModelEndpoint,
    #[serde(rename = "http")]
    Http,
}

impl VariationType {
    /// Campaign and recommender variations share the managed-service request shape.
    pub fn is_managed(&self) -> bool {
        matches!(self, VariationType::Campaign | VariationType::Recommender)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationFilter {
    #[serde(default)]
    pub auto_dynamic_filter_values: Option<OrderedMap<AutoValueField>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FilterCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterCondition {
    /// Filter applies only when the request identifies a user.
    UserRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub method: ExperimentMethod,
    pub project: String,
    /// Keyed by metric name, in declaration order.
    #[serde(default)]
    pub metrics: OrderedMap<MetricConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentMethod {
    #[serde(rename = "evidently", alias = "external-experiment-service")]
    ExperimentService,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricConfig {
    /// Dot-separated path where the entity id is placed in event data.
    pub entity_id_key: String,
    /// Dot-separated path where the metric value is placed in event data.
    pub value_key: String,
    #[serde(default = "default_track_exposures")]
    pub track_exposures: bool,
}

fn default_track_exposures() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessorConfig {
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub look_ahead_multiplier: Option<usize>,
    #[serde(default)]
    pub look_ahead_maximum_value: Option<usize>,
}

/// Declaration of one automatically derived field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoValueField {
    /// Declared value type. `string` changes how multiple values are rendered into filters and
    /// events.
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub evaluate_all: bool,
    #[serde(default)]
    pub rules: Vec<AutoValueRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoValueRule {
    #[serde(flatten)]
    pub signal: RuleSignal,
    /// When empty, the signal value itself is the rule's output.
    #[serde(default)]
    pub value_mappings: Vec<ValueMapping>,
}

/// Request signal a rule reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuleSignal {
    HeaderValue {
        header: String,
    },
    HourOfDay,
    /// Monday is 0.
    DayOfWeek,
    #[serde(alias = "season")]
    SeasonOfYear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMapping {
    pub operator: Operator,
    pub value: serde_json::Value,
    pub map_to: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    Equals,
    LessThan,
    GreaterThan,
    Contains,
    #[serde(alias = "starts-with")]
    StartWith,
    EndsWith,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheControl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_specified: Option<CacheProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic_user_specified: Option<CacheProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_user_specified: Option<CacheProfile>,
}

/// Which of the three cache profiles applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheProfileKind {
    UserSpecified,
    SyntheticUserSpecified,
    NoUserSpecified,
}

impl CacheControl {
    pub fn profile(&self, kind: CacheProfileKind) -> Option<&CacheProfile> {
        match kind {
            CacheProfileKind::UserSpecified => self.user_specified.as_ref(),
            CacheProfileKind::SyntheticUserSpecified => self.synthetic_user_specified.as_ref(),
            CacheProfileKind::NoUserSpecified => self.no_user_specified.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directives: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadataConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub store_type: Option<ItemMetadataType>,
    /// Seconds between local store syncs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<u64>,
    /// Columns requested inline from the recommendation backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemMetadataType {
    /// In-process map synced from a bulk export.
    #[serde(rename = "localdb")]
    LocalDb,
    /// Networked key-value table.
    #[serde(rename = "dynamodb", alias = "table")]
    Table,
    /// Columns returned inline by the recommendation backend.
    #[serde(rename = "personalize", alias = "inline")]
    Inline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventTargetConfig {
    PersonalizeEventTracker { tracking_id: String },
    KinesisStream { stream_name: String },
    KinesisFirehose { stream_name: String },
}
