use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ExperimentMethod;

/// Body returned to clients and, in the same shape, by recommendation backends.
///
/// Recommend and related requests carry `itemList`; rerank requests carry `personalizedRanking`.
/// Fields the pipeline does not interpret (e.g., `recommendationId`) pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_list: Option<Vec<RecommendedItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personalized_ranking: Option<Vec<RecommendedItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_experiment: Option<MatchedExperiment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecommendationResponse {
    pub fn from_items(items: Vec<RecommendedItem>) -> RecommendationResponse {
        RecommendationResponse {
            item_list: Some(items),
            ..Default::default()
        }
    }

    /// The item sequence, whichever key holds it.
    pub fn items(&self) -> &[RecommendedItem] {
        self.item_list
            .as_deref()
            .or(self.personalized_ranking.as_deref())
            .unwrap_or_default()
    }

    pub fn items_mut(&mut self) -> &mut [RecommendedItem] {
        match (&mut self.item_list, &mut self.personalized_ranking) {
            (Some(items), _) => items,
            (None, Some(items)) => items,
            (None, None) => &mut [],
        }
    }

    /// Keep at most `n` items.
    pub fn truncate(&mut self, n: usize) {
        if let Some(items) = &mut self.item_list {
            items.truncate(n);
        }
        if let Some(items) = &mut self.personalized_ranking {
            items.truncate(n);
        }
    }

    pub fn strip_metadata(&mut self) {
        for item in self.items_mut() {
            item.metadata = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedItem {
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecommendedItem {
    pub fn new(item_id: impl Into<String>, score: Option<f64>) -> RecommendedItem {
        RecommendedItem {
            item_id: item_id.into(),
            score,
            metadata: None,
            extra: Map::new(),
        }
    }
}

/// Experiment that decided the variation serving a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedExperiment {
    #[serde(rename = "type")]
    pub method: ExperimentMethod,
    pub feature: String,
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RecommendationResponse, RecommendedItem};

    #[test]
    fn passes_through_unknown_fields() {
        let response: RecommendationResponse = serde_json::from_value(json!({
            "itemList": [{"itemId": "1", "score": 0.5, "reason": ["popular"]}],
            "recommendationId": "RID-1"
        }))
        .unwrap();

        assert_eq!(response.items().len(), 1);
        assert_eq!(response.extra["recommendationId"], json!("RID-1"));

        let round = serde_json::to_value(&response).unwrap();
        assert_eq!(
            round,
            json!({
                "itemList": [{"itemId": "1", "score": 0.5, "reason": ["popular"]}],
                "recommendationId": "RID-1"
            })
        );
    }

    #[test]
    fn items_come_from_ranking_when_no_item_list() {
        let mut response: RecommendationResponse = serde_json::from_value(json!({
            "personalizedRanking": [{"itemId": "a"}, {"itemId": "b"}, {"itemId": "c"}]
        }))
        .unwrap();

        assert_eq!(response.items().len(), 3);
        response.truncate(2);
        assert_eq!(response.items_mut().len(), 2);
    }

    #[test]
    fn metadata_omitted_when_absent() {
        let response = RecommendationResponse::from_items(vec![RecommendedItem::new("1", None)]);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"itemList": [{"itemId": "1"}]})
        );
    }
}
