//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health` — liveness probe.
///
/// Reports uptime, version, the command transport, and its connection view:
/// registered device count for Socket.IO, broker session state for MQTT.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();

    let devices = match state.gateway.registry() {
        Some(registry) => json!(registry.len().await),
        None => json!(null),
    };
    let mqtt_connected = state
        .gateway
        .mqtt()
        .and_then(|m| m.is_connected())
        .map_or(json!(null), |c| json!(c));

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "transport": state.gateway.transport_name(),
        "registered_devices": devices,
        "mqtt_connected": mqtt_connected,
        "telemetry_ingress": state.ingress.is_some(),
    }))
}
