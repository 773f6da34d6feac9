//! `recommend-items`, `related-items` and `rerank-items`.
use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use p13n_core::backends::Subject;
use p13n_core::dispatcher::RecommendationRequest;
use p13n_core::request::{parse_item_ids, parse_item_list_body, RequestParams};

use super::headers::{dispatch_response, if_none_match, request_signals};
use crate::{ApiError, AppState};

/// `GET /recommend-items/{namespace}/{recommender}/{user_id}`
pub async fn handle_recommend_items(
    State(state): State<AppState>,
    Path((namespace, recommender, user_id)): Path<(String, String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let params = RequestParams::from_query(query)?;
    serve(
        &state,
        &namespace,
        &recommender,
        Subject::User { user_id: &user_id },
        &params,
        &headers,
        true,
    )
    .await
}

/// `GET /related-items/{namespace}/{recommender}/{item_id}`
pub async fn handle_related_items(
    State(state): State<AppState>,
    Path((namespace, recommender, item_id)): Path<(String, String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let params = RequestParams::from_query(query)?;
    let subject = Subject::Item {
        item_id: &item_id,
        user_id: params.user_id.as_deref(),
    };
    serve(&state, &namespace, &recommender, subject, &params, &headers, true).await
}

/// `GET /rerank-items/{namespace}/{recommender}/{user_id}/{item_ids}`
pub async fn handle_rerank_items(
    State(state): State<AppState>,
    Path((namespace, recommender, user_id, item_ids)): Path<(String, String, String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let params = RequestParams::from_query(query)?;
    let item_ids = parse_item_ids(&item_ids)?;
    let subject = Subject::Rerank {
        user_id: &user_id,
        item_ids: &item_ids,
    };
    serve(&state, &namespace, &recommender, subject, &params, &headers, true).await
}

/// `POST /rerank-items/{namespace}/{recommender}/{user_id}` with a JSON array of item ids.
///
/// The item list travels in the body, so the response is never cacheable.
pub async fn handle_rerank_items_body(
    State(state): State<AppState>,
    Path((namespace, recommender, user_id)): Path<(String, String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let params = RequestParams::from_query(query)?;
    let item_ids = parse_item_list_body(&body)?;
    let subject = Subject::Rerank {
        user_id: &user_id,
        item_ids: &item_ids,
    };
    serve(&state, &namespace, &recommender, subject, &params, &headers, false).await
}

async fn serve(
    state: &AppState,
    namespace: &str,
    recommender: &str,
    subject: Subject<'_>,
    params: &RequestParams,
    headers: &HeaderMap,
    cacheable: bool,
) -> Result<Response, ApiError> {
    let signals = request_signals(headers);
    let request = RecommendationRequest {
        namespace,
        recommender,
        subject,
        params,
        signals: &signals,
        if_none_match: if_none_match(headers),
        cacheable,
    };

    let outcome = state.dispatcher.recommend(&request).await?;
    Ok(dispatch_response(outcome))
}
