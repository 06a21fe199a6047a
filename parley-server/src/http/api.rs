//! REST API handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use parley_core::{ConnectionState, SendError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;
use crate::phone::{normalize_phone, to_address};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" when the session is open, "unhealthy" otherwise
    pub status: String,
    /// "connected" or "disconnected"
    pub connection: String,
    /// Lifecycle state of the messaging session
    pub state: ConnectionState,
    /// Server version
    pub version: String,
    /// Seconds since server started
    pub uptime_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /send`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SendRequest {
    pub phone: Option<String>,
    pub message: Option<String>,
}

/// Successful send response
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    /// Provider message identifier, when one was reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Error message
    pub error: String,
    /// Field errors or the underlying failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub(crate) fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    error_with_details(status, error, None)
}

fn error_with_details(
    status: StatusCode,
    error: impl Into<String>,
    details: Option<serde_json::Value>,
) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
            details,
        }),
    )
        .into_response()
}

/// GET /health - 200 while the session is open, 503 otherwise
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let connected = state.manager.is_connected();
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if connected { "healthy" } else { "unhealthy" }.to_string(),
        connection: if connected { "connected" } else { "disconnected" }.to_string(),
        state: state.manager.state(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    };

    (status, Json(body)).into_response()
}

/// POST /send - deliver a text message to an allow-listed phone number
pub async fn send(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_with_details(
                StatusCode::BAD_REQUEST,
                "Invalid request body",
                Some(json!(rejection.body_text())),
            );
        }
    };

    let Some(phone) = request.phone.as_deref().filter(|p| !p.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Phone number is required.");
    };

    if !state.allowed_phones.contains(phone) {
        let normalized = normalize_phone(phone);
        tracing::warn!(phone = %normalized, "Rejected send to number outside the allow-list");
        return error_response(
            StatusCode::FORBIDDEN,
            format!("Phone number {} is not in the allowed list.", normalized),
        );
    }

    let Some(message) = request.message.as_deref().filter(|m| !m.is_empty()) else {
        return error_with_details(
            StatusCode::BAD_REQUEST,
            "Invalid request body",
            Some(json!({ "message": ["Message is required"] })),
        );
    };

    if !state.manager.is_connected() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Not connected to the messaging service. Complete pairing first.",
        );
    }

    let address = to_address(phone, &state.address_domain);
    match state.manager.send_message(&address, message).await {
        Ok(ack) => (
            StatusCode::OK,
            Json(SendResponse {
                success: true,
                message: "Message sent successfully".to_string(),
                message_id: ack.message_id,
            }),
        )
            .into_response(),
        Err(SendError::NotConnected) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Not connected to the messaging service. Complete pairing first.",
        ),
        Err(SendError::Transport(details)) => error_with_details(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to send message",
            Some(json!(details)),
        ),
    }
}

/// Fallback for unknown routes
pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}
