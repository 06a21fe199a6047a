//! API key middleware for axum

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use crate::AppState;
use crate::http::error_response;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Query parameter accepted when the header is absent
pub const API_KEY_QUERY_PARAM: &str = "apikey";

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeyQuery {
    apikey: Option<String>,
}

/// Extract the API key, preferring the header over the query string
fn provided_key(request: &Request, query: ApiKeyQuery) -> Option<String> {
    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or(query.apikey.filter(|value| !value.is_empty()))
}

/// Reject requests without the configured API key.
///
/// Missing key is 401, wrong key is 403.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    query: Option<Query<ApiKeyQuery>>,
    request: Request,
    next: Next,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();

    match provided_key(&request, query) {
        None => {
            tracing::debug!(path = %request.uri().path(), "No API key provided");
            error_response(
                StatusCode::UNAUTHORIZED,
                "API key required. Provide via X-API-Key header or apikey query parameter.",
            )
        }
        Some(key) if key.as_str() != &*state.api_key => {
            tracing::debug!(path = %request.uri().path(), "Invalid API key");
            error_response(StatusCode::FORBIDDEN, "Invalid API key.")
        }
        Some(_) => next.run(request).await,
    }
}
