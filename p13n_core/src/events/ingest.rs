//! Handling of `POST /events/{namespace}`: conversion validation, event enrichment and fan-out.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use super::event_dispatcher::EventDispatcher;
use super::targets::{fan_out, target_record, EventSink, ReceivedRequest, TargetRecord};
use crate::config::{ExperimentMethod, PersonalizationConfig, ResolvedNamespace};
use crate::context::{derive_context, AutoContext, RequestSignals};
use crate::experiments::ExperimentEvent;
use crate::{Error, Result};

/// Receives interaction events and experiment conversions for a namespace.
pub struct EventIngest {
    sink: Option<Arc<dyn EventSink>>,
    conversions: Option<Arc<EventDispatcher>>,
}

impl EventIngest {
    pub fn new(
        sink: Option<Arc<dyn EventSink>>,
        conversions: Option<Arc<EventDispatcher>>,
    ) -> EventIngest {
        EventIngest { sink, conversions }
    }

    /// Validate and publish one events request.
    ///
    /// Everything is validated before anything is written. Target writes are best-effort and
    /// conversions are queued for background delivery.
    ///
    /// # Errors
    ///
    /// - `ConfigNotFound` when the namespace is unknown, or when it has no event targets and
    ///   the request carries no conversions.
    /// - `Validation` for malformed bodies and conversions.
    pub async fn put_events(
        &self,
        config: &PersonalizationConfig,
        namespace: &str,
        body: Value,
        request: &ReceivedRequest,
        signals: &RequestSignals,
    ) -> Result<()> {
        let namespace = config.namespace(namespace)?;

        let Value::Object(mut body) = body else {
            return Err(Error::validation(
                "InvalidRequestPayload",
                "Request body must be a JSON object",
            ));
        };

        let has_events = match body.get("eventList") {
            None | Some(Value::Null) => false,
            Some(Value::Array(events)) => !events.is_empty(),
            Some(_) => {
                return Err(Error::validation(
                    "InvalidRequestPayload",
                    "eventList must be a list",
                ))
            }
        };

        let conversions = validate_conversions(&namespace, &body)?;
        if !has_events && conversions.is_empty() {
            return Err(Error::validation(
                "InvalidRequestPayload",
                "Request must include eventList or experimentConversions",
            ));
        }

        let targets = &namespace.namespace.event_targets;
        if targets.is_empty() && conversions.is_empty() {
            return Err(Error::not_found(
                "NamespaceEventTargetsNotFound",
                "No event targets are defined for this namespace path",
            ));
        }

        if !targets.is_empty() {
            let auto_context = derive_context(namespace.lineage().auto_context(), signals);
            prepare_event_list(&mut body, &auto_context)?;

            let records: Vec<TargetRecord> = targets
                .iter()
                .filter_map(|target| target_record(target, namespace.key, request, &body))
                .collect();

            match &self.sink {
                Some(sink) => fan_out(sink.as_ref(), &records).await,
                None => {
                    log::warn!(target: "p13n", namespace = namespace.key, count = records.len(); "no event sink configured; dropping target records")
                }
            }
        }

        self.queue_conversions(conversions);
        Ok(())
    }

    fn queue_conversions(&self, conversions: BTreeMap<String, Vec<ExperimentEvent>>) {
        if conversions.is_empty() {
            return;
        }
        let Some(dispatcher) = &self.conversions else {
            log::warn!(target: "p13n", projects = conversions.len(); "no experiment service configured; dropping conversions");
            return;
        };

        for (project, events) in conversions {
            for event in events {
                dispatcher.dispatch(&project, event);
            }
        }
    }
}

/// Validate `experimentConversions` and build conversion events grouped per project.
fn validate_conversions(
    namespace: &ResolvedNamespace<'_>,
    body: &Map<String, Value>,
) -> Result<BTreeMap<String, Vec<ExperimentEvent>>> {
    let mut by_project: BTreeMap<String, Vec<ExperimentEvent>> = BTreeMap::new();

    let conversions = match body.get("experimentConversions") {
        None | Some(Value::Null) => return Ok(by_project),
        Some(Value::Array(conversions)) if conversions.is_empty() => return Ok(by_project),
        Some(Value::Array(conversions)) => conversions,
        Some(_) => {
            return Err(Error::validation(
                "InvalidExperimentConversions",
                "Must be a list",
            ))
        }
    };

    let user_id = body
        .get("userId")
        .and_then(Value::as_str)
        .filter(|user_id| !user_id.is_empty())
        .ok_or_else(|| {
            Error::validation(
                "UserIdRequired",
                "userId is a required field in payload object",
            )
        })?;

    for (idx, conversion) in conversions.iter().enumerate() {
        let field = |name: &str| conversion.get(name).and_then(Value::as_str);

        let recommender_key = field("recommender").ok_or_else(|| {
            Error::validation(
                "InvalidExperimentConversions",
                format!("Experiment conversion at index {idx} is missing recommender"),
            )
        })?;

        let recommender = namespace.find_recommender(recommender_key).ok_or_else(|| {
            Error::validation(
                "InvalidRecommender",
                format!("Experiment conversion at index {idx} is referencing a recommender that does not exist"),
            )
        })?;

        let experiments = recommender
            .recommender
            .experiments
            .as_ref()
            .filter(|experiments| !experiments.is_empty())
            .ok_or_else(|| {
                Error::invalid_configuration(
                    "ExperimentsNotFound",
                    format!("\"experiments\" not defined for recommender (\"{recommender_key}\")"),
                )
            })?;

        let experiment = match field("feature") {
            Some(feature) => experiments.get(feature).ok_or_else(|| {
                Error::validation(
                    "InvalidExperimentFeature",
                    format!("Experiment for feature {feature} for conversion at index {idx} is referencing a feature that is not in the configuration"),
                )
            })?,
            None if experiments.len() == 1 => experiments.values().next().ok_or_else(|| {
                Error::invalid_configuration("ExperimentsNotFound", "no experiments configured")
            })?,
            None => {
                return Err(Error::validation(
                    "InvalidExperimentFeature",
                    format!("Experiment has multiple features configured but the feature name was not specified at conversion index {idx}"),
                ))
            }
        };

        match experiment.method {
            ExperimentMethod::ExperimentService => {}
        }

        let metric = match field("metric") {
            Some(metric) => experiment.metrics.get(metric).ok_or_else(|| {
                Error::validation(
                    "InvalidExperimentMetric",
                    format!("Conversion at index {idx} is referencing a metric name {metric} that is not in the configuration"),
                )
            })?,
            None => match experiment.metrics.first() {
                Some((_, metric)) if experiment.metrics.len() == 1 => metric,
                _ => {
                    return Err(Error::validation(
                        "InvalidExperimentMetric",
                        format!("Conversion at index {idx} does not specify a metric name"),
                    ))
                }
            },
        };

        let value = match conversion.get("value") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| {
                Error::validation(
                    "InvalidExperimentConversions",
                    format!("Experiment conversion at index {idx} has a non-numeric value"),
                )
            })?),
        };

        by_project
            .entry(experiment.project.clone())
            .or_default()
            .push(ExperimentEvent::conversion(metric, user_id, value));
    }

    Ok(by_project)
}

/// Default `sentAt` and merge auto-context into each event's `properties` JSON string.
/// Properties already set by the caller win.
fn prepare_event_list(body: &mut Map<String, Value>, auto_context: &AutoContext) -> Result<()> {
    let Some(Value::Array(events)) = body.get_mut("eventList") else {
        return Ok(());
    };

    let now = Utc::now().timestamp();
    for event in events.iter_mut() {
        let Value::Object(event) = event else {
            return Err(Error::validation(
                "InvalidRequestPayload",
                "eventList entries must be objects",
            ));
        };

        event.entry("sentAt").or_insert_with(|| Value::from(now));

        if auto_context.is_empty() {
            continue;
        }

        let mut properties: Map<String, Value> = match event.get("properties") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::String(raw)) if raw.is_empty() => Map::new(),
            Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|_| {
                Error::validation(
                    "InvalidEventProperties",
                    "Event properties must be a JSON object encoded as a string",
                )
            })?,
            Some(Value::Object(properties)) => properties.clone(),
            Some(_) => {
                return Err(Error::validation(
                    "InvalidEventProperties",
                    "Event properties must be a JSON object encoded as a string",
                ))
            }
        };

        for (field, resolved) in auto_context {
            properties
                .entry(field.clone())
                .or_insert_with(|| Value::from(resolved.event_property()));
        }

        event.insert(
            "properties".to_owned(),
            Value::from(Value::Object(properties).to_string()),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::EventIngest;
    use crate::config::PersonalizationConfig;
    use crate::context::RequestSignals;
    use crate::events::{
        BatchEventProcessor, EventDispatcher, EventDispatcherConfig, EventSink, ReceivedRequest,
        TargetRecord,
    };
    use crate::experiments::{ExperimentEvent, ExperimentService, FeatureEvaluation};
    use crate::{Error, Result};

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<TargetRecord>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, record: &TargetRecord) -> Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct NoopService;

    #[async_trait]
    impl ExperimentService for NoopService {
        async fn evaluate_feature(&self, _: &str, _: &str, _: &str) -> Result<FeatureEvaluation> {
            Err(Error::ExperimentService("not used".to_owned()))
        }

        async fn put_events(&self, _: &str, _: &[ExperimentEvent]) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> PersonalizationConfig {
        serde_json::from_value(json!({
            "namespaces": {
                "my-store": {
                    "autoContext": {
                        "deviceType": {
                            "type": "string",
                            "evaluateAll": true,
                            "rules": [
                                {"type": "header-value", "header": "cloudfront-is-mobile-viewer",
                                 "valueMappings": [{"operator": "equals", "value": "true", "mapTo": "Phone"}]},
                                {"type": "header-value", "header": "cloudfront-is-tablet-viewer",
                                 "valueMappings": [{"operator": "equals", "value": "true", "mapTo": "Tablet"}]}
                            ]
                        }
                    },
                    "eventTargets": [
                        {"type": "personalize-event-tracker", "trackingId": "tid"},
                        {"type": "kinesis-firehose", "streamName": "archive"}
                    ],
                    "recommenders": {"recommend-items": {"rfy": {
                        "variations": {
                            "a": {"type": "personalize-campaign", "arn": "arn:a"},
                            "b": {"type": "personalize-campaign", "arn": "arn:b"}
                        },
                        "experiments": {"rfy-feature": {
                            "method": "evidently",
                            "project": "my-store",
                            "metrics": {"clicks": {"entityIdKey": "userId", "valueKey": "value"}}
                        }}
                    }}}
                },
                "no-targets": {
                    "recommenders": {"recommend-items": {"rfy": {
                        "variations": {"a": {"type": "personalize-campaign", "arn": "arn:a"}}
                    }}}
                }
            }
        }))
        .unwrap()
    }

    fn signals() -> RequestSignals {
        RequestSignals::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .with_header("cloudfront-is-mobile-viewer", "true")
            .with_header("cloudfront-is-tablet-viewer", "true")
    }

    fn ingest() -> (EventIngest, Arc<RecordingSink>, BatchEventProcessor) {
        let sink = Arc::new(RecordingSink::default());
        let batch_processor = BatchEventProcessor::new(100);
        let dispatcher = EventDispatcher::new(
            EventDispatcherConfig {
                delivery_interval_ms: 60_000,
                ..Default::default()
            },
            batch_processor.clone(),
            Arc::new(NoopService),
        );
        (
            EventIngest::new(Some(sink.clone()), Some(Arc::new(dispatcher))),
            sink,
            batch_processor,
        )
    }

    #[tokio::test]
    async fn fans_out_enriched_events_and_queues_conversions() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (ingest, sink, conversions) = ingest();

        ingest
            .put_events(
                &config(),
                "my-store",
                json!({
                    "sessionId": "s1",
                    "userId": "u1",
                    "eventList": [{"eventType": "click", "properties": "{\"itemId\":\"42\"}"}],
                    "experimentConversions": [{"recommender": "rfy", "value": 2.5}]
                }),
                &ReceivedRequest::default(),
                &signals(),
            )
            .await
            .unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);

        let TargetRecord::EventTracker { body, .. } = &records[0] else {
            panic!("expected tracker record first");
        };
        assert!(body.get("experimentConversions").is_none());
        assert_eq!(body["trackingId"], json!("tid"));

        let event = &body["eventList"][0];
        assert!(event["sentAt"].is_i64());
        let properties: Value =
            serde_json::from_str(event["properties"].as_str().unwrap()).unwrap();
        assert_eq!(
            properties,
            json!({"itemId": "42", "deviceType": "Phone|Tablet"})
        );

        assert_eq!(conversions.queued_event_count(), 1);
    }

    #[tokio::test]
    async fn caller_sent_at_is_kept() {
        let (ingest, sink, _) = ingest();

        ingest
            .put_events(
                &config(),
                "my-store",
                json!({"sessionId": "s1", "eventList": [{"eventType": "click", "sentAt": 17}]}),
                &ReceivedRequest::default(),
                &signals(),
            )
            .await
            .unwrap();

        let records = sink.records.lock().unwrap();
        let TargetRecord::EventTracker { body, .. } = &records[0] else {
            panic!("expected tracker record first");
        };
        assert_eq!(body["eventList"][0]["sentAt"], json!(17));
    }

    #[tokio::test]
    async fn conversions_require_user() {
        let (ingest, sink, _) = ingest();

        let err = ingest
            .put_events(
                &config(),
                "my-store",
                json!({"sessionId": "s1", "experimentConversions": [{"recommender": "rfy"}]}),
                &ReceivedRequest::default(),
                &signals(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "UserIdRequired");
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversion_validation_codes() {
        let (ingest, _, _) = ingest();
        let config = config();

        let ingest = &ingest;
        let config = &config;
        let code = move |conversion: Value| {
            async move {
                ingest
                    .put_events(
                        config,
                        "my-store",
                        json!({"userId": "u1", "experimentConversions": [conversion]}),
                        &ReceivedRequest::default(),
                        &signals(),
                    )
                    .await
                    .unwrap_err()
                    .code()
            }
        };

        assert_eq!(code(json!({})).await, "InvalidExperimentConversions");
        assert_eq!(code(json!({"recommender": "nope"})).await, "InvalidRecommender");
        assert_eq!(
            code(json!({"recommender": "rfy", "feature": "nope"})).await,
            "InvalidExperimentFeature"
        );
        assert_eq!(
            code(json!({"recommender": "rfy", "metric": "nope"})).await,
            "InvalidExperimentMetric"
        );
    }

    #[tokio::test]
    async fn namespace_without_targets_or_conversions() {
        let (ingest, _, _) = ingest();

        let err = ingest
            .put_events(
                &config(),
                "no-targets",
                json!({"sessionId": "s1", "eventList": [{"eventType": "click"}]}),
                &ReceivedRequest::default(),
                &signals(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NamespaceEventTargetsNotFound");

        let err = ingest
            .put_events(
                &config(),
                "missing",
                json!({"eventList": [{"eventType": "click"}]}),
                &ReceivedRequest::default(),
                &signals(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NamespaceNotFound");
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let (ingest, _, _) = ingest();

        let err = ingest
            .put_events(
                &config(),
                "my-store",
                json!({"sessionId": "s1"}),
                &ReceivedRequest::default(),
                &signals(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidRequestPayload");
    }
}
