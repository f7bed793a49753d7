//! REST handlers for message ingestion and operational endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use kissmetrics_core::settings::{CHANNELS, INTEGRATION_NAME};
use kissmetrics_core::{ForwarderError, Message, MessageKind};
use kissmetrics_dispatch::{DispatchReport, Dispatcher};
use kissmetrics_mapper::Call;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub start_time: Instant,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn parse_message(body: &[u8]) -> Result<Message, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Rejected unparsable message");
        metrics::counter!("api.validation_errors").increment(1);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_message".to_string(),
                message: e.to_string(),
            }),
        )
    })
}

/// Mapping failures are 400, destination failures 502, anything else 500.
fn error_response(err: &ForwarderError) -> ApiError {
    let (status, code, message) = match err {
        ForwarderError::Mapping(m) => {
            metrics::counter!("api.validation_errors").increment(1);
            (StatusCode::BAD_REQUEST, "mapping_failed", m.clone())
        }
        ForwarderError::Dispatch { .. } => {
            metrics::counter!("api.errors").increment(1);
            (StatusCode::BAD_GATEWAY, "dispatch_failed", err.to_string())
        }
        other => {
            error!(error = %other, "Message forwarding failed");
            metrics::counter!("api.errors").increment(1);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal processing error".to_string(),
            )
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message,
        }),
    )
}

/// POST /v1/messages: map one message and deliver it.
pub async fn handle_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DispatchReport>, ApiError> {
    let message = parse_message(&body)?;
    state
        .dispatcher
        .dispatch(&message)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// POST /v1/map: the calls a message would produce, without sending them.
pub async fn handle_map(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MapResponse>, ApiError> {
    let message = parse_message(&body)?;
    let kind = message.kind();
    let mapped = state
        .dispatcher
        .plan(&message)
        .map_err(|e| error_response(&e))?;
    debug!(%kind, calls = mapped.call_count(), "Planned message");
    Ok(Json(MapResponse {
        kind,
        calls: mapped.into_calls(),
    }))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        integration: INTEGRATION_NAME,
        channels: CHANNELS,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MapResponse {
    pub kind: MessageKind,
    pub calls: Vec<Call>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub integration: &'static str,
    pub channels: &'static [&'static str],
    pub uptime_secs: u64,
}
