use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use p13n_core::events::ReceivedRequest;
use p13n_core::Error;
use serde_json::Value;

use super::headers::{apply_headers, headers_object, request_signals};
use crate::{ApiError, AppState};

/// `POST /events/{namespace}`
///
/// Answers 200 with an empty body once events are validated and handed to the event targets.
pub async fn handle_events(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: Value = serde_json::from_slice(&body).map_err(|_| Error::Validation {
        code: "InvalidRequestPayload",
        message: "Request body must be a JSON object".to_owned(),
    })?;

    let received = ReceivedRequest {
        path: uri.path().to_owned(),
        headers: headers_object(&headers),
        query_string_parameters: query
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect(),
    };
    let signals = request_signals(&headers);

    let response_headers = state
        .dispatcher
        .put_events(&namespace, body, &received, &signals)
        .await?;

    let mut response = StatusCode::OK.into_response();
    apply_headers(response.headers_mut(), &response_headers);
    Ok(response)
}
