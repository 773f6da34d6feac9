use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::MetricConfig;

/// Metric value recorded with exposure events. Small enough to never count as a conversion.
pub const EXPOSURE_VALUE: f64 = 0.0000001;
/// Metric value recorded with conversions that do not carry one.
pub const DEFAULT_CONVERSION_VALUE: f64 = 1.0;

const CUSTOM_EVENT_TYPE: &str = "aws.evidently.custom";

/// Event written to the experiment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON document with entity id and value placed at the metric's keys.
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl ExperimentEvent {
    pub fn exposure(metric: &MetricConfig, entity_id: &str) -> ExperimentEvent {
        ExperimentEvent::with_value(metric, entity_id, EXPOSURE_VALUE)
    }

    pub fn conversion(metric: &MetricConfig, entity_id: &str, value: Option<f64>) -> ExperimentEvent {
        ExperimentEvent::with_value(
            metric,
            entity_id,
            value.unwrap_or(DEFAULT_CONVERSION_VALUE),
        )
    }

    fn with_value(metric: &MetricConfig, entity_id: &str, value: f64) -> ExperimentEvent {
        let mut data = Map::new();
        set_path(&mut data, &metric.entity_id_key, Value::from(entity_id));
        set_path(&mut data, &metric.value_key, Value::from(value));

        ExperimentEvent {
            event_type: CUSTOM_EVENT_TYPE.to_owned(),
            data: Value::Object(data).to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Set `value` at a dot-separated `path`, creating intermediate objects. A non-object value in
/// the way is replaced.
fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_owned(), value);
            return;
        }

        let slot = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
}
