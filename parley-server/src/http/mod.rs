//! HTTP server module

mod api;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::middleware::require_api_key;

pub use api::{ErrorResponse, HealthResponse, SendRequest, SendResponse};
pub(crate) use api::error_response;

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/send", post(api::send))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(api::health))
        .merge(protected)
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
