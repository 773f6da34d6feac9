//! Event fan-out destinations.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::EventTargetConfig;
use crate::endpoint::endpoint_url;
use crate::{Error, Result};

/// One write to one configured event target.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetRecord {
    /// Interaction events for a managed event tracker. `body` already carries `trackingId`.
    EventTracker { tracking_id: String, body: Value },
    /// Data record for a partitioned stream.
    Stream {
        stream_name: String,
        partition_key: String,
        data: Value,
    },
    /// Data record for a delivery stream.
    DeliveryStream { stream_name: String, data: Value },
}

impl TargetRecord {
    /// Identifier of the destination, for logging.
    pub fn destination(&self) -> &str {
        match self {
            TargetRecord::EventTracker { tracking_id, .. } => tracking_id,
            TargetRecord::Stream { stream_name, .. }
            | TargetRecord::DeliveryStream { stream_name, .. } => stream_name,
        }
    }
}

/// Request the events were received with. Stream targets forward it alongside the body.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedRequest {
    pub path: String,
    pub headers: Map<String, Value>,
    pub query_string_parameters: Map<String, Value>,
}

/// Build the record written to `target`. Returns `None` when the target has nothing to receive.
pub fn target_record(
    target: &EventTargetConfig,
    namespace: &str,
    request: &ReceivedRequest,
    body: &Map<String, Value>,
) -> Option<TargetRecord> {
    match target {
        EventTargetConfig::PersonalizeEventTracker { tracking_id } => {
            let has_events = body
                .get("eventList")
                .and_then(Value::as_array)
                .is_some_and(|events| !events.is_empty());
            if !has_events {
                log::warn!(target: "p13n", tracking_id = tracking_id.as_str(); "request has no events; skipping event tracker");
                return None;
            }

            let mut tracker_body = body.clone();
            tracker_body.remove("experimentConversions");
            tracker_body.insert("trackingId".to_owned(), Value::from(tracking_id.as_str()));

            Some(TargetRecord::EventTracker {
                tracking_id: tracking_id.clone(),
                body: Value::Object(tracker_body),
            })
        }
        EventTargetConfig::KinesisStream { stream_name } => {
            let partition_key = ["sessionId", "userId"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str))
                .unwrap_or(namespace)
                .to_owned();

            Some(TargetRecord::Stream {
                stream_name: stream_name.clone(),
                partition_key,
                data: stream_data(namespace, request, body),
            })
        }
        EventTargetConfig::KinesisFirehose { stream_name } => Some(TargetRecord::DeliveryStream {
            stream_name: stream_name.clone(),
            data: stream_data(namespace, request, body),
        }),
    }
}

fn stream_data(namespace: &str, request: &ReceivedRequest, body: &Map<String, Value>) -> Value {
    serde_json::json!({
        "namespace": namespace,
        "path": request.path,
        "headers": request.headers,
        "queryStringParameters": request.query_string_parameters,
        "body": body,
    })
}

/// Destination writer for event fan-out.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, record: &TargetRecord) -> Result<()>;
}

/// Write every record concurrently. Failures are logged and swallowed.
pub async fn fan_out(sink: &dyn EventSink, records: &[TargetRecord]) {
    let results =
        futures::future::join_all(records.iter().map(|record| sink.publish(record))).await;

    for (record, result) in records.iter().zip(results) {
        if let Err(err) = result {
            log::warn!(target: "p13n", destination = record.destination(); "failed to publish events: {err}");
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpEventSinkConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// JSON-over-HTTP event sink.
///
/// - event tracker: `POST {base}/events`
/// - stream: `POST {base}/streams/{name}/records` with `{data, partitionKey}`
/// - delivery stream: `POST {base}/delivery-streams/{name}/records` with `{data}`
pub struct HttpEventSink {
    client: reqwest::Client,
    config: HttpEventSinkConfig,
}

impl HttpEventSink {
    pub fn new(config: HttpEventSinkConfig) -> HttpEventSink {
        HttpEventSink {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        endpoint_url(&self.config.base_url, segments)
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn publish(&self, record: &TargetRecord) -> Result<()> {
        let (url, payload) = match record {
            TargetRecord::EventTracker { body, .. } => (self.url(&["events"])?, body.clone()),
            TargetRecord::Stream {
                stream_name,
                partition_key,
                data,
            } => (
                self.url(&["streams", stream_name, "records"])?,
                serde_json::json!({"data": data.to_string(), "partitionKey": partition_key}),
            ),
            TargetRecord::DeliveryStream { stream_name, data } => (
                self.url(&["delivery-streams", stream_name, "records"])?,
                serde_json::json!({"data": data.to_string()}),
            ),
        };

        log::debug!(target: "p13n", destination = record.destination(); "publishing events");

        self.client
            .post(url)
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| Error::EventSink(err.without_url().to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use super::*;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn tracker_gets_body_without_conversions() {
        let target = EventTargetConfig::PersonalizeEventTracker {
            tracking_id: "tid".to_owned(),
        };
        let body = body(json!({
            "sessionId": "s1",
            "eventList": [{"eventType": "click", "sentAt": 1}],
            "experimentConversions": [{"recommender": "rfy"}]
        }));

        let record = target_record(&target, "my-store", &ReceivedRequest::default(), &body).unwrap();
        assert_eq!(
            record,
            TargetRecord::EventTracker {
                tracking_id: "tid".to_owned(),
                body: json!({
                    "sessionId": "s1",
                    "eventList": [{"eventType": "click", "sentAt": 1}],
                    "trackingId": "tid"
                }),
            }
        );
    }

    #[test]
    fn tracker_skipped_without_events() {
        let target = EventTargetConfig::PersonalizeEventTracker {
            tracking_id: "tid".to_owned(),
        };
        let body = body(json!({"experimentConversions": [{"recommender": "rfy"}]}));

        assert_eq!(
            target_record(&target, "my-store", &ReceivedRequest::default(), &body),
            None
        );
    }

    #[test]
    fn stream_record_wraps_request() {
        let target = EventTargetConfig::KinesisStream {
            stream_name: "clicks".to_owned(),
        };
        let request = ReceivedRequest {
            path: "/events/my-store".to_owned(),
            ..Default::default()
        };
        let body = body(json!({"sessionId": "s1", "eventList": []}));

        let Some(TargetRecord::Stream {
            partition_key,
            data,
            ..
        }) = target_record(&target, "my-store", &request, &body)
        else {
            panic!("expected stream record");
        };

        assert_eq!(partition_key, "s1");
        assert_eq!(data["namespace"], json!("my-store"));
        assert_eq!(data["path"], json!("/events/my-store"));
        assert_eq!(data["body"]["sessionId"], json!("s1"));
    }

    struct FlakySink {
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn publish(&self, record: &TargetRecord) -> crate::Result<()> {
            if record.destination() == "broken" {
                return Err(crate::Error::EventSink("rejected".to_owned()));
            }
            self.published
                .lock()
                .unwrap()
                .push(record.destination().to_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn fan_out_swallows_failures() {
        let sink = FlakySink {
            published: Mutex::new(Vec::new()),
        };
        let records = vec![
            TargetRecord::DeliveryStream {
                stream_name: "broken".to_owned(),
                data: json!({}),
            },
            TargetRecord::DeliveryStream {
                stream_name: "archive".to_owned(),
                data: json!({}),
            },
        ];

        fan_out(&sink, &records).await;

        assert_eq!(*sink.published.lock().unwrap(), vec!["archive".to_owned()]);
    }
}
