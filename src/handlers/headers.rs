//! Translation between HTTP headers and the pipeline's request and response headers.
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use p13n_core::context::RequestSignals;
use p13n_core::dispatcher::{DispatchOutcome, ResponseHeaders};
use serde_json::{Map, Value};

pub const CONFIG_VERSION_HEADER: &str = "x-personalization-config-version";

/// Request headers as auto-context signals, timestamped now.
pub(crate) fn request_signals(headers: &HeaderMap) -> RequestSignals {
    RequestSignals::from_headers(
        headers.iter().filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str(), value.to_owned()))
        }),
        Utc::now(),
    )
}

pub(crate) fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
}

/// Headers as a JSON object, as forwarded to stream event targets.
pub(crate) fn headers_object(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), Value::from(value)))
        })
        .collect()
}

pub(crate) fn dispatch_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Ok { body, headers } => {
            let mut response = (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body)
                .into_response();
            apply_headers(response.headers_mut(), &headers);
            response
        }
        DispatchOutcome::NotModified { headers } => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            apply_headers(response.headers_mut(), &headers);
            response
        }
    }
}

pub(crate) fn apply_headers(target: &mut HeaderMap, headers: &ResponseHeaders) {
    let pairs = [
        (
            HeaderName::from_static(CONFIG_VERSION_HEADER),
            &headers.config_version,
        ),
        (CACHE_CONTROL, &headers.cache_control),
        (ETAG, &headers.etag),
    ];

    for (name, value) in pairs {
        let Some(value) = value else {
            continue;
        };
        match HeaderValue::from_str(value) {
            Ok(value) => {
                target.insert(name, value);
            }
            Err(_) => {
                log::warn!(target: "p13n", header = name.as_str(); "dropping response header with invalid characters");
            }
        }
    }
}
