//! `GET /api/devices` — current registry contents.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn list_devices(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(registry) = state.gateway.registry() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No device registry in MQTT mode"})),
        );
    };
    let devices = registry.list().await;
    (
        StatusCode::OK,
        Json(json!({"count": devices.len(), "devices": devices})),
    )
}
