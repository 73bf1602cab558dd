//! REST facade and WebSocket upgrade handlers for operator UIs and
//! device connections.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{error, info};
use wick_core::{CommandPayload, DeviceState};

use crate::registry::RegistryError;
use crate::server::AppState;
use crate::session;

/// Process liveness plus the current connected-device count.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "connected_devices": state.registry.connected_count(),
    }))
}

/// All known devices, connected and recently disconnected.
pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceState>> {
    Json(state.registry.list_states())
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceState>, StatusCode> {
    state
        .registry
        .get_state(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Dispatch a command to a connected device.
pub async fn send_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(command): Json<CommandPayload>,
) -> impl IntoResponse {
    if !command.speed_in_range() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "speed must be within 1..=100" })),
        );
    }

    match state.registry.send_command(&id, &command) {
        Ok(()) => {
            info!(device_id = %id, "command sent");
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        Err(e @ RegistryError::NotConnected(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })))
        }
        Err(e @ RegistryError::SendFailed(..)) => {
            error!(device_id = %id, error = %e, "command dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// WebSocket endpoint for device agents, one path per device id.
pub async fn device_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_device_session(socket, id, state.registry))
}

/// WebSocket endpoint for passive observers (operator UIs).
pub async fn observer_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_observer_session(socket, state.registry))
}
